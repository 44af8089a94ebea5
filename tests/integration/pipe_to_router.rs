use crate::fake_engine::{create_worker, settle, FakeEngine};
use crate::media::{
    audio_producer_options, consumer_device_capabilities, router_options,
    video_producer_options, webrtc_transport_options,
};
use futures_lite::future;
use sfu_control::consumer::{ConsumerOptions, ConsumerType};
use sfu_control::data_consumer::DataConsumerOptions;
use sfu_control::data_producer::DataProducerOptions;
use sfu_control::router::{
    NewTransport, PipeDataProducerToRouterError, PipeProducerToRouterError, PipeToRouterOptions,
    Router,
};
use sfu_control::sctp_parameters::SctpStreamParameters;
use sfu_control::transport::Transport;
use sfu_control::webrtc_transport::WebRtcTransport;
use sfu_control::worker::Worker;

struct Setup {
    _worker: Worker,
    engine: FakeEngine,
    router_1: Router,
    router_2: Router,
    transport_1: WebRtcTransport,
    transport_2: WebRtcTransport,
}

async fn init() -> Setup {
    let (worker, engine) = create_worker().await;

    let router_1 = worker
        .create_router(router_options())
        .await
        .expect("Failed to create router 1");
    let router_2 = worker
        .create_router(router_options())
        .await
        .expect("Failed to create router 2");

    let transport_options = {
        let mut options = webrtc_transport_options();
        options.enable_sctp = true;
        options
    };

    let transport_1 = router_1
        .create_webrtc_transport(transport_options.clone())
        .await
        .expect("Failed to create transport 1");
    let transport_2 = router_2
        .create_webrtc_transport(transport_options)
        .await
        .expect("Failed to create transport 2");

    Setup {
        _worker: worker,
        engine,
        router_1,
        router_2,
        transport_1,
        transport_2,
    }
}

#[test]
fn pipe_producer_succeeds() {
    future::block_on(async move {
        let Setup {
            engine,
            router_1,
            router_2,
            transport_1,
            transport_2,
            ..
        } = init().await;

        let audio_producer = transport_1
            .produce(audio_producer_options())
            .await
            .expect("Failed to produce audio");

        let pipe_pair = router_1
            .pipe_producer_to_router(
                audio_producer.id(),
                PipeToRouterOptions::new(router_2.clone()),
            )
            .await
            .expect("Failed to pipe producer");

        assert_eq!(pipe_pair.pipe_consumer.producer_id(), audio_producer.id());
        assert_eq!(pipe_pair.pipe_consumer.r#type(), ConsumerType::Pipe);
        assert_eq!(pipe_pair.pipe_producer.id(), audio_producer.id());
        assert_eq!(pipe_pair.pipe_producer.kind(), audio_producer.kind());
        assert_ne!(
            pipe_pair.pipe_consumer.transport_id(),
            pipe_pair.pipe_producer.transport_id()
        );

        assert_eq!(engine.requests("router.createPipeTransport").len(), 2);
        assert_eq!(engine.requests("transport.connect").len(), 2);

        // Piped producer can be consumed in the other router
        let capabilities = consumer_device_capabilities(&router_2);
        assert!(router_2.can_consume(&audio_producer.id(), &capabilities));

        transport_2
            .consume(ConsumerOptions::new(audio_producer.id(), capabilities))
            .await
            .expect("Failed to consume piped producer");
    });
}

#[test]
fn concurrent_pipes_share_one_transport_pair() {
    future::block_on(async move {
        let Setup {
            engine,
            router_1,
            router_2,
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

        let (audio_pipe_pair, video_pipe_pair) = future::zip(
            router_1.pipe_producer_to_router(
                audio_producer.id(),
                PipeToRouterOptions::new(router_2.clone()),
            ),
            router_1.pipe_producer_to_router(
                video_producer.id(),
                PipeToRouterOptions::new(router_2.clone()),
            ),
        )
        .await;

        let audio_pipe_pair = audio_pipe_pair.expect("Failed to pipe audio producer");
        let video_pipe_pair = video_pipe_pair.expect("Failed to pipe video producer");

        assert_eq!(engine.requests("router.createPipeTransport").len(), 2);
        assert_eq!(
            audio_pipe_pair.pipe_consumer.transport_id(),
            video_pipe_pair.pipe_consumer.transport_id()
        );
        assert_eq!(
            audio_pipe_pair.pipe_producer.transport_id(),
            video_pipe_pair.pipe_producer.transport_id()
        );

        // Piping in the opposite direction reuses the same pair
        let reverse_producer = transport_2
            .produce(audio_producer_options())
            .await
            .expect("Failed to produce audio in router 2");
        let reverse_pipe_pair = router_2
            .pipe_producer_to_router(
                reverse_producer.id(),
                PipeToRouterOptions::new(router_1.clone()),
            )
            .await
            .expect("Failed to pipe producer back");

        assert_eq!(engine.requests("router.createPipeTransport").len(), 2);
        assert_eq!(
            reverse_pipe_pair.pipe_consumer.transport_id(),
            audio_pipe_pair.pipe_producer.transport_id()
        );
        assert_eq!(
            reverse_pipe_pair.pipe_producer.transport_id(),
            audio_pipe_pair.pipe_consumer.transport_id()
        );
    });
}

#[test]
fn closed_pair_is_replaced() {
    future::block_on(async move {
        let Setup {
            engine,
            router_1,
            router_2,
            transport_1,
            ..
        } = init().await;

        let (new_pipe_transport_tx, new_pipe_transport_rx) = async_channel::unbounded();
        let _handler = router_1.on_new_transport(move |transport| {
            if let NewTransport::Pipe(pipe_transport) = transport {
                let _ = new_pipe_transport_tx.try_send(pipe_transport.clone());
            }
        });

        let audio_producer = transport_1
            .produce(audio_producer_options())
            .await
            .expect("Failed to produce audio");

        let first_pipe_pair = router_1
            .pipe_producer_to_router(
                audio_producer.id(),
                PipeToRouterOptions::new(router_2.clone()),
            )
            .await
            .expect("Failed to pipe producer");

        let pipe_transport = new_pipe_transport_rx
            .recv()
            .await
            .expect("Failed to receive pipe transport");

        let (mut pipe_producer_close_tx, pipe_producer_close_rx) = async_oneshot::oneshot::<()>();
        let _close_handler = first_pipe_pair.pipe_producer.on_close(move || {
            let _ = pipe_producer_close_tx.send(());
        });

        // Either pipe transport going away takes the other one and everything on them down
        pipe_transport.close();

        pipe_producer_close_rx
            .await
            .expect("Failed to receive pipe producer close event");
        assert!(first_pipe_pair.pipe_consumer.closed());

        let second_pipe_pair = router_1
            .pipe_producer_to_router(
                audio_producer.id(),
                PipeToRouterOptions::new(router_2.clone()),
            )
            .await
            .expect("Failed to pipe producer again");

        assert_eq!(engine.requests("router.createPipeTransport").len(), 4);
        assert_ne!(
            second_pipe_pair.pipe_consumer.transport_id(),
            pipe_transport.id()
        );
    });
}

#[test]
fn pipe_to_same_router_fails() {
    future::block_on(async move {
        let Setup {
            engine,
            router_1,
            transport_1,
            ..
        } = init().await;

        let audio_producer = transport_1
            .produce(audio_producer_options())
            .await
            .expect("Failed to produce audio");

        assert!(matches!(
            router_1
                .pipe_producer_to_router(
                    audio_producer.id(),
                    PipeToRouterOptions::new(router_1.clone()),
                )
                .await,
            Err(PipeProducerToRouterError::SameRouter)
        ));
        assert!(engine.requests("router.createPipeTransport").is_empty());
    });
}

#[test]
fn pipe_producer_of_other_router_fails() {
    future::block_on(async move {
        let Setup {
            router_1,
            router_2,
            transport_2,
            ..
        } = init().await;

        let audio_producer = transport_2
            .produce(audio_producer_options())
            .await
            .expect("Failed to produce audio");

        assert!(matches!(
            router_1
                .pipe_producer_to_router(
                    audio_producer.id(),
                    PipeToRouterOptions::new(router_2.clone()),
                )
                .await,
            Err(PipeProducerToRouterError::ProducerNotFound(id)) if id == audio_producer.id()
        ));
    });
}

#[test]
fn original_producer_close_closes_pipe() {
    future::block_on(async move {
        let Setup {
            router_1,
            router_2,
            transport_1,
            ..
        } = init().await;

        let audio_producer = transport_1
            .produce(audio_producer_options())
            .await
            .expect("Failed to produce audio");

        let pipe_pair = router_1
            .pipe_producer_to_router(
                audio_producer.id(),
                PipeToRouterOptions::new(router_2.clone()),
            )
            .await
            .expect("Failed to pipe producer");

        let (mut pipe_producer_close_tx, pipe_producer_close_rx) = async_oneshot::oneshot::<()>();
        let _handler = pipe_pair.pipe_producer.on_close(move || {
            let _ = pipe_producer_close_tx.send(());
        });

        audio_producer.close();

        pipe_producer_close_rx
            .await
            .expect("Failed to receive pipe producer close event");
        assert!(pipe_pair.pipe_consumer.closed());

        settle().await;
        assert!(!router_2.can_consume(
            &audio_producer.id(),
            &consumer_device_capabilities(&router_2)
        ));
    });
}

#[test]
fn pipe_data_producer_succeeds() {
    future::block_on(async move {
        let Setup {
            engine,
            router_1,
            router_2,
            transport_1,
            transport_2,
            ..
        } = init().await;

        let data_producer = transport_1
            .produce_data({
                let mut options =
                    DataProducerOptions::new_sctp(SctpStreamParameters::new_ordered(4));
                options.label = "chat".to_string();
                options
            })
            .await
            .expect("Failed to produce data");

        let pipe_pair = router_1
            .pipe_data_producer_to_router(
                data_producer.id(),
                PipeToRouterOptions::new(router_2.clone()),
            )
            .await
            .expect("Failed to pipe data producer");

        assert_eq!(pipe_pair.pipe_data_consumer.data_producer_id(), data_producer.id());
        assert_eq!(pipe_pair.pipe_data_producer.id(), data_producer.id());
        assert_eq!(pipe_pair.pipe_data_producer.label(), "chat");

        let requests = engine.requests("router.createPipeTransport");
        assert_eq!(requests.len(), 2);
        assert!(requests
            .iter()
            .all(|request| request["data"]["enableSctp"] == true));

        // Piped data producer can be consumed in the other router
        transport_2
            .consume_data(DataConsumerOptions::new_sctp(data_producer.id()))
            .await
            .expect("Failed to consume piped data producer");

        assert!(matches!(
            router_2
                .pipe_data_producer_to_router(
                    data_producer.id(),
                    PipeToRouterOptions::new(router_2.clone()),
                )
                .await,
            Err(PipeDataProducerToRouterError::SameRouter)
        ));
    });
}
