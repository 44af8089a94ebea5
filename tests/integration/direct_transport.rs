use crate::fake_engine::{create_worker, FakeEngine};
use crate::media::{audio_producer_options, consumer_device_capabilities, router_options};
use bytes::Bytes;
use futures_lite::future;
use serde_json::json;
use sfu_control::consumer::ConsumerOptions;
use sfu_control::data_consumer::{DataConsumer, DataConsumerOptions, DataConsumerType};
use sfu_control::data_producer::{DataProducer, DataProducerOptions, DataProducerType};
use sfu_control::data_structures::WebRtcMessage;
use sfu_control::direct_transport::{DirectTransport, DirectTransportOptions};
use sfu_control::producer::Producer;
use sfu_control::router::Router;
use sfu_control::transport::Transport;
use sfu_control::worker::Worker;

async fn init() -> (Worker, FakeEngine, Router, DirectTransport) {
    let (worker, engine) = create_worker().await;

    let router = worker
        .create_router(router_options())
        .await
        .expect("Failed to create router");

    let transport = router
        .create_direct_transport(DirectTransportOptions::default())
        .await
        .expect("Failed to create direct transport");

    (worker, engine, router, transport)
}

#[test]
fn create_succeeds() {
    future::block_on(async move {
        let (_worker, engine, router, transport) = init().await;

        assert_eq!(transport.router_id(), router.id());

        let requests = engine.requests("router.createDirectTransport");
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0]["data"]["direct"], true);
        assert_eq!(requests[0]["data"]["maxMessageSize"], 262_144);
    });
}

#[test]
fn send_and_receive_rtcp() {
    future::block_on(async move {
        let (_worker, engine, _router, transport) = init().await;

        let (rtcp_tx, rtcp_rx) = async_channel::unbounded();
        let _handler = transport.on_rtcp(move |rtcp_packet| {
            let _ = rtcp_tx.try_send(rtcp_packet.clone());
        });

        transport
            .send_rtcp(Bytes::from_static(b"\x81\xc9\x00\x07outgoing"))
            .await
            .expect("Failed to send RTCP");

        let messages = engine
            .wait_for_payload_messages("transport.sendRtcp", 1)
            .await;
        assert_eq!(
            messages[0].0["internal"]["transportId"],
            transport.id().to_string()
        );
        assert_eq!(messages[0].1, b"\x81\xc9\x00\x07outgoing");

        engine.notify_with_payload(transport.id(), "rtcp", json!(null), b"incoming");

        assert_eq!(
            rtcp_rx.recv().await.expect("Failed to receive RTCP"),
            Bytes::from_static(b"incoming")
        );
    });
}

#[test]
fn direct_producer_sends_rtp() {
    future::block_on(async move {
        let (_worker, engine, _router, transport) = init().await;

        let producer = transport
            .produce(audio_producer_options())
            .await
            .expect("Failed to produce audio");

        let direct_producer = match &producer {
            Producer::Direct(direct_producer) => direct_producer,
            _ => panic!("Expected direct producer"),
        };

        direct_producer
            .send(Bytes::from_static(b"rtp packet"))
            .await
            .expect("Failed to send RTP");

        let messages = engine.wait_for_payload_messages("producer.send", 1).await;
        assert_eq!(
            messages[0].0["internal"]["producerId"],
            producer.id().to_string()
        );
        assert_eq!(messages[0].1, b"rtp packet");
    });
}

#[test]
fn consumer_receives_rtp() {
    future::block_on(async move {
        let (_worker, engine, router, transport) = init().await;

        let producer = transport
            .produce(audio_producer_options())
            .await
            .expect("Failed to produce audio");
        let consumer = transport
            .consume(ConsumerOptions::new(
                producer.id(),
                consumer_device_capabilities(&router),
            ))
            .await
            .expect("Failed to consume audio");

        let (rtp_tx, rtp_rx) = async_channel::unbounded();
        let _handler = consumer.on_rtp(move |rtp_packet| {
            let _ = rtp_tx.try_send(rtp_packet.clone());
        });

        engine.notify_with_payload(consumer.id(), "rtp", json!(null), b"forwarded");

        assert_eq!(
            rtp_rx.recv().await.expect("Failed to receive RTP"),
            Bytes::from_static(b"forwarded")
        );
    });
}

#[test]
fn direct_data_producer_sends_messages() {
    future::block_on(async move {
        let (_worker, engine, _router, transport) = init().await;

        let data_producer = transport
            .produce_data(DataProducerOptions::new_direct())
            .await
            .expect("Failed to produce data");

        assert_eq!(data_producer.r#type(), DataProducerType::Direct);
        assert_eq!(data_producer.sctp_stream_parameters(), None);

        let direct_data_producer = match &data_producer {
            DataProducer::Direct(direct_data_producer) => direct_data_producer,
            _ => panic!("Expected direct data producer"),
        };

        direct_data_producer
            .send(WebRtcMessage::String("hello".to_string()))
            .await
            .expect("Failed to send string");
        direct_data_producer
            .send(WebRtcMessage::Binary(Bytes::from_static(b"\x00\x01")))
            .await
            .expect("Failed to send binary");
        direct_data_producer
            .send(WebRtcMessage::EmptyString)
            .await
            .expect("Failed to send empty string");

        let messages = engine
            .wait_for_payload_messages("dataProducer.send", 3)
            .await;
        let sent = messages
            .iter()
            .map(|(header, payload)| (header["data"]["ppid"].clone(), payload.clone()))
            .collect::<Vec<_>>();

        // Empty messages are carried as a single space
        assert_eq!(
            sent,
            vec![
                (json!(51), b"hello".to_vec()),
                (json!(53), b"\x00\x01".to_vec()),
                (json!(56), b" ".to_vec()),
            ]
        );
    });
}

#[test]
fn direct_data_consumer_messages() {
    future::block_on(async move {
        let (_worker, engine, _router, transport) = init().await;

        let data_producer = transport
            .produce_data(DataProducerOptions::new_direct())
            .await
            .expect("Failed to produce data");
        let data_consumer = transport
            .consume_data(DataConsumerOptions::new_direct(data_producer.id()))
            .await
            .expect("Failed to consume data");

        assert_eq!(data_consumer.r#type(), DataConsumerType::Direct);
        assert_eq!(data_consumer.sctp_stream_parameters(), None);

        let (message_tx, message_rx) = async_channel::unbounded();
        let _handler = data_consumer.on_message(move |message| {
            let _ = message_tx.try_send(message.clone());
        });

        engine.notify_with_payload(
            data_consumer.id(),
            "message",
            json!({ "ppid": 53 }),
            b"\x07\x08",
        );
        engine.notify_with_payload(
            data_consumer.id(),
            "message",
            json!({ "ppid": 51 }),
            b"text",
        );

        assert_eq!(
            message_rx.recv().await.expect("Failed to receive message"),
            WebRtcMessage::Binary(Bytes::from_static(b"\x07\x08"))
        );
        assert_eq!(
            message_rx.recv().await.expect("Failed to receive message"),
            WebRtcMessage::String("text".to_string())
        );

        let direct_data_consumer = match &data_consumer {
            DataConsumer::Direct(direct_data_consumer) => direct_data_consumer,
            _ => panic!("Expected direct data consumer"),
        };

        direct_data_consumer
            .send(WebRtcMessage::String("reply".to_string()))
            .await
            .expect("Failed to send message");

        let messages = engine
            .wait_for_payload_messages("dataConsumer.send", 1)
            .await;
        assert_eq!(
            messages[0].0["internal"]["dataConsumerId"],
            data_consumer.id().to_string()
        );
        assert_eq!(messages[0].0["data"]["ppid"], 51);
        assert_eq!(messages[0].1, b"reply");
    });
}
