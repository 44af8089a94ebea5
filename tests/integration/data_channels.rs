use crate::fake_engine::{create_worker, settle, FakeEngine};
use crate::media::{router_options, webrtc_transport_options};
use futures_lite::future;
use sfu_control::data_consumer::{DataConsumerOptions, DataConsumerType};
use sfu_control::data_producer::{DataProducerOptions, DataProducerType};
use sfu_control::router::Router;
use sfu_control::sctp_parameters::{NumSctpStreams, SctpStreamParameters};
use sfu_control::transport::{ConsumeDataError, ProduceDataError, Transport, TransportGeneric};
use sfu_control::webrtc_transport::WebRtcTransport;
use sfu_control::worker::Worker;

struct Setup {
    _worker: Worker,
    engine: FakeEngine,
    _router: Router,
    transport_1: WebRtcTransport,
    transport_2: WebRtcTransport,
}

async fn init(incoming_streams: u16) -> Setup {
    let (worker, engine) = create_worker().await;

    let router = worker
        .create_router(router_options())
        .await
        .expect("Failed to create router");

    let transport_options = {
        let mut options = webrtc_transport_options();
        options.enable_sctp = true;
        options.num_sctp_streams = NumSctpStreams {
            os: 1024,
            mis: incoming_streams,
        };
        options
    };

    let transport_1 = router
        .create_webrtc_transport(transport_options.clone())
        .await
        .expect("Failed to create transport 1");
    let transport_2 = router
        .create_webrtc_transport(transport_options)
        .await
        .expect("Failed to create transport 2");

    Setup {
        _worker: worker,
        engine,
        _router: router,
        transport_1,
        transport_2,
    }
}

fn data_producer_options() -> DataProducerOptions {
    let mut options =
        DataProducerOptions::new_sctp(SctpStreamParameters::new_unordered_with_retransmits(12, 3));
    options.label = "chat".to_string();
    options.protocol = "json".to_string();
    options
}

#[test]
fn produce_data_succeeds() {
    future::block_on(async move {
        let Setup {
            engine,
            transport_1,
            ..
        } = init(1024).await;

        let (new_data_producer_tx, new_data_producer_rx) = async_channel::unbounded();
        let _handler = transport_1.on_new_data_producer(move |data_producer| {
            let _ = new_data_producer_tx.try_send(data_producer.id());
        });

        let data_producer = transport_1
            .produce_data(data_producer_options())
            .await
            .expect("Failed to produce data");

        assert_eq!(
            new_data_producer_rx
                .recv()
                .await
                .expect("Failed to receive new data producer"),
            data_producer.id()
        );
        assert_eq!(data_producer.r#type(), DataProducerType::Sctp);
        assert_eq!(data_producer.label(), "chat");
        assert_eq!(data_producer.protocol(), "json");

        let sctp_stream_parameters = data_producer
            .sctp_stream_parameters()
            .expect("SCTP stream parameters must be present");
        assert_eq!(sctp_stream_parameters.stream_id(), 12);
        assert!(!sctp_stream_parameters.ordered());
        assert_eq!(sctp_stream_parameters.max_retransmits(), Some(3));

        let requests = engine.requests("transport.produceData");
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0]["data"]["type"], "sctp");
        assert_eq!(requests[0]["data"]["sctpStreamParameters"]["streamId"], 12);
    });
}

#[test]
fn produce_data_without_stream_parameters_fails() {
    future::block_on(async move {
        let Setup {
            engine,
            transport_1,
            ..
        } = init(1024).await;

        let result = transport_1
            .produce_data(DataProducerOptions::new_direct())
            .await;

        assert!(matches!(
            result,
            Err(ProduceDataError::SctpStreamParametersRequired)
        ));
        assert!(engine.requests("transport.produceData").is_empty());
    });
}

#[test]
fn consume_data_succeeds() {
    future::block_on(async move {
        let Setup {
            engine,
            transport_1,
            transport_2,
            ..
        } = init(1024).await;

        let data_producer = transport_1
            .produce_data(data_producer_options())
            .await
            .expect("Failed to produce data");

        let data_consumer = transport_2
            .consume_data(DataConsumerOptions::new_sctp(data_producer.id()))
            .await
            .expect("Failed to consume data");

        assert_eq!(data_consumer.data_producer_id(), data_producer.id());
        assert_eq!(data_consumer.r#type(), DataConsumerType::Sctp);
        assert_eq!(data_consumer.label(), "chat");
        assert_eq!(data_consumer.protocol(), "json");

        // Reliability is inherited from the data producer, the stream id is allocated locally
        let sctp_stream_parameters = data_consumer
            .sctp_stream_parameters()
            .expect("SCTP stream parameters must be present");
        assert_eq!(sctp_stream_parameters.stream_id(), 0);
        assert!(!sctp_stream_parameters.ordered());
        assert_eq!(sctp_stream_parameters.max_retransmits(), Some(3));

        let requests = engine.requests("transport.consumeData");
        assert_eq!(requests.len(), 1);
        assert_eq!(
            requests[0]["internal"]["dataProducerId"],
            data_producer.id().to_string()
        );

        let buffered_amount = data_consumer
            .get_buffered_amount()
            .await
            .expect("Failed to get buffered amount");
        assert_eq!(buffered_amount, 0);
    });
}

#[test]
fn stream_ids_run_out_and_are_reused() {
    future::block_on(async move {
        let Setup {
            transport_1,
            transport_2,
            ..
        } = init(2).await;

        let data_producer = transport_1
            .produce_data(data_producer_options())
            .await
            .expect("Failed to produce data");

        let first = transport_2
            .consume_data(DataConsumerOptions::new_sctp(data_producer.id()))
            .await
            .expect("Failed to consume data");
        let second = transport_2
            .consume_data(DataConsumerOptions::new_sctp(data_producer.id()))
            .await
            .expect("Failed to consume data");

        let stream_id = |data_consumer: &sfu_control::data_consumer::DataConsumer| {
            data_consumer
                .sctp_stream_parameters()
                .map(|sctp_stream_parameters| sctp_stream_parameters.stream_id())
        };
        assert_eq!(stream_id(&first), Some(0));
        assert_eq!(stream_id(&second), Some(1));

        assert!(matches!(
            transport_2
                .consume_data(DataConsumerOptions::new_sctp(data_producer.id()))
                .await,
            Err(ConsumeDataError::NoSctpStreamId)
        ));

        first.close();

        let third = transport_2
            .consume_data(DataConsumerOptions::new_sctp(data_producer.id()))
            .await
            .expect("Failed to consume data");
        assert_eq!(stream_id(&third), Some(0));
    });
}

#[test]
fn rejected_consume_data_releases_stream_id() {
    future::block_on(async move {
        let Setup {
            engine,
            transport_1,
            transport_2,
            ..
        } = init(1).await;

        let data_producer = transport_1
            .produce_data(data_producer_options())
            .await
            .expect("Failed to produce data");

        engine.reject("transport.consumeData", "busy");
        assert!(matches!(
            transport_2
                .consume_data(DataConsumerOptions::new_sctp(data_producer.id()))
                .await,
            Err(ConsumeDataError::Request(_))
        ));

        engine.accept("transport.consumeData");
        let data_consumer = transport_2
            .consume_data(DataConsumerOptions::new_sctp(data_producer.id()))
            .await
            .expect("Failed to consume data");
        assert_eq!(
            data_consumer
                .sctp_stream_parameters()
                .map(|sctp_stream_parameters| sctp_stream_parameters.stream_id()),
            Some(0)
        );
    });
}

#[test]
fn data_producer_close_closes_data_consumer() {
    future::block_on(async move {
        let Setup {
            engine,
            transport_1,
            transport_2,
            ..
        } = init(1024).await;

        let data_producer = transport_1
            .produce_data(data_producer_options())
            .await
            .expect("Failed to produce data");
        let data_consumer = transport_2
            .consume_data(DataConsumerOptions::new_sctp(data_producer.id()))
            .await
            .expect("Failed to consume data");

        let (mut data_producer_close_tx, data_producer_close_rx) = async_oneshot::oneshot::<()>();
        let _handler = data_consumer.on_data_producer_close(move || {
            let _ = data_producer_close_tx.send(());
        });

        let (mut close_tx, close_rx) = async_oneshot::oneshot::<()>();
        let _close_handler = data_consumer.on_close(move || {
            let _ = close_tx.send(());
        });

        data_producer.close();

        data_producer_close_rx
            .await
            .expect("Failed to receive data producer close event");
        close_rx.await.expect("Failed to receive close event");
        assert!(data_consumer.closed());

        settle().await;

        assert_eq!(engine.requests("dataProducer.close").len(), 1);
        assert!(engine.requests("dataConsumer.close").is_empty());
    });
}

#[test]
fn transport_close_closes_data_children() {
    future::block_on(async move {
        let Setup {
            transport_1,
            transport_2,
            ..
        } = init(1024).await;

        let data_producer = transport_1
            .produce_data(data_producer_options())
            .await
            .expect("Failed to produce data");
        let data_consumer = transport_2
            .consume_data(DataConsumerOptions::new_sctp(data_producer.id()))
            .await
            .expect("Failed to consume data");

        let (mut transport_close_tx, transport_close_rx) = async_oneshot::oneshot::<()>();
        let _handler = data_consumer.on_transport_close(move || {
            let _ = transport_close_tx.send(());
        });

        transport_2.close();

        transport_close_rx
            .await
            .expect("Failed to receive transport close event");
        assert!(data_consumer.closed());
        assert!(!data_producer.closed());
    });
}
