use crate::fake_engine::{create_worker, settle, FakeEngine};
use crate::media::{
    audio_producer_options, consumer_device_capabilities, router_options,
    video_only_capabilities, video_producer_options, webrtc_transport_options,
};
use futures_lite::future;
use serde_json::json;
use sfu_control::consumer::{ConsumerOptions, ConsumerType};
use sfu_control::ortc::{
    ConsumerRtpParametersError, RtpParametersError, RtpParametersMappingError,
};
use sfu_control::producer::{ProducerOptions, ProducerType};
use sfu_control::router::Router;
use sfu_control::rtp_parameters::{
    MediaKind, MimeType, RtcpFeedback, RtpCodecParameters, RtpEncodingParameters, RtpParameters,
};
use sfu_control::transport::{ConsumeError, ProduceError, Transport, TransportGeneric};
use sfu_control::webrtc_transport::WebRtcTransport;
use sfu_control::worker::Worker;
use std::num::NonZeroU32;

struct Setup {
    _worker: Worker,
    engine: FakeEngine,
    router: Router,
    transport_1: WebRtcTransport,
    transport_2: WebRtcTransport,
}

async fn init() -> Setup {
    let (worker, engine) = create_worker().await;

    let router = worker
        .create_router(router_options())
        .await
        .expect("Failed to create router");

    let transport_1 = router
        .create_webrtc_transport(webrtc_transport_options())
        .await
        .expect("Failed to create transport 1");
    let transport_2 = router
        .create_webrtc_transport(webrtc_transport_options())
        .await
        .expect("Failed to create transport 2");

    Setup {
        _worker: worker,
        engine,
        router,
        transport_1,
        transport_2,
    }
}

#[test]
fn produce_succeeds() {
    future::block_on(async move {
        let Setup {
            engine,
            transport_1,
            ..
        } = init().await;

        let (new_producer_tx, new_producer_rx) = async_channel::unbounded();
        let _handler = transport_1.on_new_producer(move |producer| {
            let _ = new_producer_tx.try_send(producer.id());
        });

        let audio_producer = transport_1
            .produce(audio_producer_options())
            .await
            .expect("Failed to produce audio");

        assert_eq!(
            new_producer_rx
                .recv()
                .await
                .expect("Failed to receive new producer"),
            audio_producer.id()
        );
        assert_eq!(audio_producer.kind(), MediaKind::Audio);
        assert_eq!(audio_producer.r#type(), ProducerType::Simple);
        assert!(!audio_producer.paused());
        assert_eq!(audio_producer.transport_id(), transport_1.id());

        let requests = engine.requests("transport.produce");
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0]["data"]["kind"], "audio");
        // Producer payload type is mapped onto the one router allocated
        assert_eq!(
            requests[0]["data"]["rtpMapping"]["codecs"],
            json!([{ "payloadType": 111, "mappedPayloadType": 100 }])
        );

        let video_producer = transport_1
            .produce(video_producer_options())
            .await
            .expect("Failed to produce video");

        assert_eq!(video_producer.r#type(), ProducerType::Simulcast);
        // The first CNAME seen on a transport is used for every producer on it
        assert_eq!(
            video_producer.rtp_parameters().rtcp.cname.as_deref(),
            Some("audio-1")
        );

        let consumable_rtp_parameters = video_producer.consumable_rtp_parameters();
        assert_eq!(consumable_rtp_parameters.encodings.len(), 2);
        // SSRCs are replaced with router-side ones, RTX included
        assert!(consumable_rtp_parameters.encodings.iter().all(|encoding| {
            encoding.ssrc != Some(22222222)
                && encoding.ssrc != Some(22222224)
                && encoding.rtx.is_some()
        }));
    });
}

#[test]
fn produce_unsupported_codec_fails() {
    future::block_on(async move {
        let Setup {
            engine,
            transport_1,
            ..
        } = init().await;

        let result = transport_1
            .produce(ProducerOptions::new(
                MediaKind::Video,
                RtpParameters {
                    mid: Some("VIDEO".to_string()),
                    codecs: vec![RtpCodecParameters::new(
                        MimeType::H264,
                        112,
                        NonZeroU32::new(90000).unwrap(),
                    )],
                    encodings: vec![RtpEncodingParameters {
                        ssrc: Some(6666),
                        ..RtpEncodingParameters::default()
                    }],
                    ..RtpParameters::default()
                },
            ))
            .await;

        assert!(matches!(
            result,
            Err(ProduceError::FailedRtpParametersMapping(
                RtpParametersMappingError::UnsupportedCodec { .. }
            ))
        ));
        assert!(engine.requests("transport.produce").is_empty());
    });
}

#[test]
fn produce_with_duplicated_payload_type_fails() {
    future::block_on(async move {
        let Setup { transport_1, .. } = init().await;

        let result = transport_1
            .produce({
                let mut options = audio_producer_options();
                let codec = options.rtp_parameters.codecs[0].clone();
                options.rtp_parameters.codecs.push(codec);
                options
            })
            .await;

        assert!(matches!(
            result,
            Err(ProduceError::IncorrectRtpParameters(
                RtpParametersError::DuplicatedPayloadType(111)
            ))
        ));
    });
}

#[test]
fn consume_succeeds() {
    future::block_on(async move {
        let Setup {
            engine,
            router,
            transport_1,
            transport_2,
            ..
        } = init().await;

        let audio_producer = transport_1
            .produce(audio_producer_options())
            .await
            .expect("Failed to produce audio");

        let capabilities = consumer_device_capabilities(&router);
        assert!(router.can_consume(&audio_producer.id(), &capabilities));

        let audio_consumer = transport_2
            .consume(ConsumerOptions::new(audio_producer.id(), capabilities))
            .await
            .expect("Failed to consume audio");

        assert_eq!(audio_consumer.producer_id(), audio_producer.id());
        assert_eq!(audio_consumer.kind(), MediaKind::Audio);
        assert_eq!(audio_consumer.r#type(), ConsumerType::Simple);
        assert!(!audio_consumer.paused());
        assert!(!audio_consumer.producer_paused());
        assert_eq!(audio_consumer.score().score, 10);

        let rtp_parameters = audio_consumer.rtp_parameters();
        assert_eq!(rtp_parameters.mid.as_deref(), Some("0"));
        assert_eq!(rtp_parameters.codecs.len(), 1);
        assert_eq!(rtp_parameters.codecs[0].mime_type, MimeType::OPUS);
        assert_eq!(rtp_parameters.codecs[0].payload_type, 100);
        assert_eq!(rtp_parameters.encodings.len(), 1);

        let requests = engine.requests("transport.consume");
        assert_eq!(requests.len(), 1);
        assert_eq!(
            requests[0]["internal"]["producerId"],
            audio_producer.id().to_string()
        );
        assert_eq!(requests[0]["data"]["type"], "simple");

        // Next consumer on the same transport gets the next MID
        let second_consumer = transport_2
            .consume(ConsumerOptions::new(
                audio_producer.id(),
                consumer_device_capabilities(&router),
            ))
            .await
            .expect("Failed to consume audio again");
        assert_eq!(second_consumer.rtp_parameters().mid.as_deref(), Some("1"));
    });
}

#[test]
fn consume_with_incompatible_capabilities_fails() {
    future::block_on(async move {
        let Setup {
            engine,
            router,
            transport_1,
            transport_2,
            ..
        } = init().await;

        let audio_producer = transport_1
            .produce(audio_producer_options())
            .await
            .expect("Failed to produce audio");

        let capabilities = video_only_capabilities(&router);
        assert!(!router.can_consume(&audio_producer.id(), &capabilities));

        let result = transport_2
            .consume(ConsumerOptions::new(audio_producer.id(), capabilities))
            .await;

        assert!(matches!(
            result,
            Err(ConsumeError::BadConsumerRtpParameters(
                ConsumerRtpParametersError::NoCompatibleMediaCodecs
            ))
        ));
        assert!(engine.requests("transport.consume").is_empty());
    });
}

#[test]
fn consume_unknown_producer_fails() {
    future::block_on(async move {
        let Setup {
            router,
            transport_1,
            transport_2,
            ..
        } = init().await;

        let audio_producer = transport_1
            .produce(audio_producer_options())
            .await
            .expect("Failed to produce audio");
        let producer_id = audio_producer.id();

        audio_producer.close();

        assert!(!router.can_consume(&producer_id, &consumer_device_capabilities(&router)));
        assert!(matches!(
            transport_2
                .consume(ConsumerOptions::new(
                    producer_id,
                    consumer_device_capabilities(&router),
                ))
                .await,
            Err(ConsumeError::ProducerNotFound(id)) if id == producer_id
        ));
    });
}

#[test]
fn consume_with_given_mid() {
    future::block_on(async move {
        let Setup {
            engine,
            router,
            transport_1,
            transport_2,
            ..
        } = init().await;

        let audio_producer = transport_1
            .produce(audio_producer_options())
            .await
            .expect("Failed to produce audio");

        let consumer = transport_2
            .consume({
                let mut options =
                    ConsumerOptions::new(audio_producer.id(), consumer_device_capabilities(&router));
                options.mid = Some("custom".to_string());
                options
            })
            .await
            .expect("Failed to consume audio");
        assert_eq!(consumer.rtp_parameters().mid.as_deref(), Some("custom"));

        // Transport counter is untouched
        let consumer = transport_2
            .consume(ConsumerOptions::new(
                audio_producer.id(),
                consumer_device_capabilities(&router),
            ))
            .await
            .expect("Failed to consume audio");
        assert_eq!(consumer.rtp_parameters().mid.as_deref(), Some("0"));

        let result = transport_2
            .consume({
                let mut options =
                    ConsumerOptions::new(audio_producer.id(), consumer_device_capabilities(&router));
                options.mid = Some(String::new());
                options
            })
            .await;
        assert!(matches!(result, Err(ConsumeError::EmptyMid)));
        assert_eq!(engine.requests("transport.consume").len(), 2);
    });
}

#[test]
fn consume_video_with_and_without_rtx() {
    future::block_on(async move {
        let Setup {
            router,
            transport_1,
            transport_2,
            ..
        } = init().await;

        let video_producer = transport_1
            .produce(video_producer_options())
            .await
            .expect("Failed to produce video");

        // Enabled by default for video
        let consumer = transport_2
            .consume(ConsumerOptions::new(
                video_producer.id(),
                consumer_device_capabilities(&router),
            ))
            .await
            .expect("Failed to consume video");
        let rtp_parameters = consumer.rtp_parameters();
        assert!(rtp_parameters
            .codecs
            .iter()
            .any(|codec| codec.mime_type.is_rtx()));
        assert!(rtp_parameters.encodings[0].rtx.is_some());

        let consumer = transport_2
            .consume({
                let mut options =
                    ConsumerOptions::new(video_producer.id(), consumer_device_capabilities(&router));
                options.enable_rtx = Some(false);
                options
            })
            .await
            .expect("Failed to consume video");
        let rtp_parameters = consumer.rtp_parameters();
        assert_eq!(rtp_parameters.codecs.len(), 1);
        assert_eq!(rtp_parameters.codecs[0].mime_type, MimeType::VP8);
        assert!(!rtp_parameters.codecs[0]
            .rtcp_feedback
            .contains(&RtcpFeedback::NACK));
        assert_eq!(rtp_parameters.encodings[0].rtx, None);
    });
}

#[test]
fn pipe_consume_forwards_every_stream() {
    future::block_on(async move {
        let Setup {
            engine,
            router,
            transport_1,
            transport_2,
            ..
        } = init().await;

        let video_producer = transport_1
            .produce(video_producer_options())
            .await
            .expect("Failed to produce video");

        let consumer = transport_2
            .consume({
                let mut options =
                    ConsumerOptions::new(video_producer.id(), consumer_device_capabilities(&router));
                options.pipe = true;
                options.ignore_dtx = true;
                options
            })
            .await
            .expect("Failed to consume video");

        assert_eq!(consumer.r#type(), ConsumerType::Pipe);
        let rtp_parameters = consumer.rtp_parameters();
        assert_eq!(rtp_parameters.mid, None);
        assert_eq!(rtp_parameters.encodings.len(), 2);
        assert!(rtp_parameters
            .encodings
            .iter()
            .all(|encoding| encoding.rtx.is_some()));

        let requests = engine.requests("transport.consume");
        assert_eq!(requests[0]["data"]["type"], "pipe");
        assert_eq!(requests[0]["data"]["ignoreDtx"], true);
    });
}

#[test]
fn producer_close_closes_consumer() {
    future::block_on(async move {
        let Setup {
            engine,
            router,
            transport_1,
            transport_2,
            ..
        } = init().await;

        let audio_producer = transport_1
            .produce(audio_producer_options())
            .await
            .expect("Failed to produce audio");
        let audio_consumer = transport_2
            .consume(ConsumerOptions::new(
                audio_producer.id(),
                consumer_device_capabilities(&router),
            ))
            .await
            .expect("Failed to consume audio");

        let (mut producer_close_tx, producer_close_rx) = async_oneshot::oneshot::<()>();
        let _producer_close_handler = audio_consumer.on_producer_close(move || {
            let _ = producer_close_tx.send(());
        });
        let (mut close_tx, close_rx) = async_oneshot::oneshot::<()>();
        let _close_handler = audio_consumer.on_close(move || {
            let _ = close_tx.send(());
        });

        audio_producer.close();

        producer_close_rx
            .await
            .expect("Failed to receive producer close event");
        close_rx.await.expect("Failed to receive close event");
        assert!(audio_consumer.closed());

        settle().await;

        // Engine already dropped the consumer, nothing else is asked of it
        assert_eq!(engine.requests("producer.close").len(), 1);
        assert!(engine.requests("consumer.close").is_empty());
    });
}

#[test]
fn producer_pause_and_resume_reach_consumer() {
    future::block_on(async move {
        let Setup {
            router,
            transport_1,
            transport_2,
            ..
        } = init().await;

        let audio_producer = transport_1
            .produce(audio_producer_options())
            .await
            .expect("Failed to produce audio");
        let audio_consumer = transport_2
            .consume(ConsumerOptions::new(
                audio_producer.id(),
                consumer_device_capabilities(&router),
            ))
            .await
            .expect("Failed to consume audio");

        let (producer_pause_tx, producer_pause_rx) = async_channel::unbounded::<()>();
        let _pause_handler = audio_consumer.on_producer_pause(move || {
            let _ = producer_pause_tx.try_send(());
        });
        let (producer_resume_tx, producer_resume_rx) = async_channel::unbounded::<()>();
        let _resume_handler = audio_consumer.on_producer_resume(move || {
            let _ = producer_resume_tx.try_send(());
        });

        audio_producer
            .pause()
            .await
            .expect("Failed to pause producer");
        assert!(audio_producer.paused());

        producer_pause_rx
            .recv()
            .await
            .expect("Failed to receive producer pause event");
        assert!(audio_consumer.producer_paused());

        audio_producer
            .resume()
            .await
            .expect("Failed to resume producer");
        assert!(!audio_producer.paused());

        producer_resume_rx
            .recv()
            .await
            .expect("Failed to receive producer resume event");
        assert!(!audio_consumer.producer_paused());
    });
}

#[test]
fn consumer_of_paused_producer_starts_producer_paused() {
    future::block_on(async move {
        let Setup {
            router,
            transport_1,
            transport_2,
            ..
        } = init().await;

        let audio_producer = transport_1
            .produce({
                let mut options = audio_producer_options();
                options.paused = true;
                options
            })
            .await
            .expect("Failed to produce audio");
        assert!(audio_producer.paused());

        let audio_consumer = transport_2
            .consume(ConsumerOptions::new(
                audio_producer.id(),
                consumer_device_capabilities(&router),
            ))
            .await
            .expect("Failed to consume audio");

        assert!(audio_consumer.producer_paused());
    });
}

#[test]
fn consumer_score_event() {
    future::block_on(async move {
        let Setup {
            engine,
            router,
            transport_1,
            transport_2,
            ..
        } = init().await;

        let audio_producer = transport_1
            .produce(audio_producer_options())
            .await
            .expect("Failed to produce audio");
        let audio_consumer = transport_2
            .consume(ConsumerOptions::new(
                audio_producer.id(),
                consumer_device_capabilities(&router),
            ))
            .await
            .expect("Failed to consume audio");

        let (score_tx, score_rx) = async_channel::unbounded();
        let _handler = audio_consumer.on_score(move |score| {
            let _ = score_tx.try_send(score.clone());
        });

        engine.notify(
            audio_consumer.id(),
            "score",
            json!({ "score": 7, "producerScore": 9, "producerScores": [9] }),
        );

        let score = score_rx.recv().await.expect("Failed to receive score");
        assert_eq!(score.score, 7);
        assert_eq!(score.producer_score, 9);
        assert_eq!(audio_consumer.score().score, 7);
    });
}

#[test]
fn transport_close_cascades_to_producers_and_remote_consumers() {
    future::block_on(async move {
        let Setup {
            engine,
            router,
            transport_1,
            transport_2,
            ..
        } = init().await;

        let audio_producer = transport_1
            .produce(audio_producer_options())
            .await
            .expect("Failed to produce audio");
        let video_producer = transport_1
            .produce(video_producer_options())
            .await
            .expect("Failed to produce video");

        let capabilities = consumer_device_capabilities(&router);
        let mut consumers = Vec::new();
        for producer_id in [audio_producer.id(), video_producer.id()] {
            for _ in 0..2 {
                consumers.push(
                    transport_2
                        .consume(ConsumerOptions::new(producer_id, capabilities.clone()))
                        .await
                        .expect("Failed to consume"),
                );
            }
        }

        let (producer_close_tx, producer_close_rx) = async_channel::unbounded::<()>();
        let (close_tx, close_rx) = async_channel::unbounded::<()>();
        let _handlers = consumers
            .iter()
            .flat_map(|consumer| {
                let producer_close_tx = producer_close_tx.clone();
                let close_tx = close_tx.clone();
                [
                    consumer.on_producer_close(move || {
                        let _ = producer_close_tx.try_send(());
                    }),
                    consumer.on_close(move || {
                        let _ = close_tx.try_send(());
                    }),
                ]
            })
            .collect::<Vec<_>>();

        let (transport_close_tx, transport_close_rx) = async_channel::unbounded::<()>();
        let _transport_close_handlers = [&audio_producer, &video_producer]
            .iter()
            .map(|producer| {
                let transport_close_tx = transport_close_tx.clone();
                producer.on_transport_close(move || {
                    let _ = transport_close_tx.try_send(());
                })
            })
            .collect::<Vec<_>>();

        transport_1.close();

        for _ in 0..2 {
            transport_close_rx
                .recv()
                .await
                .expect("Failed to receive transport close event");
        }
        assert!(audio_producer.closed());
        assert!(video_producer.closed());

        for _ in 0..consumers.len() {
            producer_close_rx
                .recv()
                .await
                .expect("Failed to receive producer close event");
            close_rx
                .recv()
                .await
                .expect("Failed to receive close event");
        }
        assert!(consumers.iter().all(|consumer| consumer.closed()));
        assert!(!transport_2.closed());

        settle().await;

        assert_eq!(engine.requests("transport.close").len(), 1);
        assert!(engine.requests("producer.close").is_empty());
        assert!(engine.requests("consumer.close").is_empty());
        assert!(!router.can_consume(&audio_producer.id(), &capabilities));
    });
}
