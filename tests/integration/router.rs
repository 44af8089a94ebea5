use crate::fake_engine::{create_worker, settle};
use crate::media::{listen_ip, media_codecs, router_options, webrtc_transport_options};
use futures_lite::future;
use sfu_control::audio_level_observer::AudioLevelObserverOptions;
use sfu_control::direct_transport::DirectTransportOptions;
use sfu_control::ortc::RouterRtpCapabilitiesError;
use sfu_control::plain_transport::PlainTransportOptions;
use sfu_control::router::{NewTransport, RouterOptions};
use sfu_control::rtp_parameters::{MediaKind, MimeType, RtpCodecCapability};
use sfu_control::rtp_observer::RtpObserver;
use sfu_control::transport::{Transport, TransportGeneric};
use sfu_control::worker::{CreateRouterError, RequestError};
use std::num::NonZeroU32;

#[test]
fn create_router_succeeds() {
    future::block_on(async move {
        let (worker, engine) = create_worker().await;

        let router = worker
            .create_router(router_options())
            .await
            .expect("Failed to create router");

        assert!(!router.closed());

        let requests = engine.requests("worker.createRouter");
        assert_eq!(requests.len(), 1);
        assert_eq!(
            requests[0]["internal"]["routerId"],
            router.id().to_string()
        );

        let rtp_capabilities = router.rtp_capabilities();
        // Opus, VP8 and RTX for VP8
        assert_eq!(rtp_capabilities.codecs.len(), 3);
        assert!(rtp_capabilities
            .codecs
            .iter()
            .all(|codec| codec.preferred_payload_type >= 100));
        assert!(!rtp_capabilities.header_extensions.is_empty());
    });
}

#[test]
fn unsupported_codec_fails_before_request() {
    future::block_on(async move {
        let (worker, engine) = create_worker().await;

        let result = worker
            .create_router(RouterOptions::new(vec![RtpCodecCapability::new(
                MimeType::new(MediaKind::Audio, "chicken"),
                NonZeroU32::new(8000).unwrap(),
            )]))
            .await;

        assert!(matches!(
            result,
            Err(CreateRouterError::FailedRtpCapabilitiesGeneration(
                RouterRtpCapabilitiesError::UnsupportedCodec { .. }
            ))
        ));
        assert!(engine.requests("worker.createRouter").is_empty());
    });
}

#[test]
fn rejected_by_engine() {
    future::block_on(async move {
        let (worker, engine) = create_worker().await;
        engine.reject("worker.createRouter", "out of routers");

        let result = worker.create_router(router_options()).await;

        match result {
            Err(CreateRouterError::Request(RequestError::Response { reason })) => {
                assert_eq!(reason, "out of routers");
            }
            other => panic!("Unexpected result: {:?}", other.map(|router| router.id())),
        }
        assert!(worker.router_ids().is_empty());
    });
}

#[test]
fn dump_lists_transports_and_observers() {
    future::block_on(async move {
        let (worker, _engine) = create_worker().await;

        let router = worker
            .create_router(RouterOptions::new(media_codecs()))
            .await
            .expect("Failed to create router");

        let webrtc_transport = router
            .create_webrtc_transport(webrtc_transport_options())
            .await
            .expect("Failed to create WebRTC transport");
        let plain_transport = router
            .create_plain_transport(PlainTransportOptions::new(listen_ip()))
            .await
            .expect("Failed to create plain transport");
        let audio_level_observer = router
            .create_audio_level_observer(AudioLevelObserverOptions::default())
            .await
            .expect("Failed to create audio level observer");

        let mut dump = router.dump().await.expect("Failed to dump router");
        dump.transport_ids.sort();

        let mut expected_transport_ids = vec![webrtc_transport.id(), plain_transport.id()];
        expected_transport_ids.sort();

        assert_eq!(dump.id, router.id());
        assert_eq!(dump.transport_ids, expected_transport_ids);
        assert_eq!(dump.rtp_observer_ids, vec![audio_level_observer.id()]);

        plain_transport.close();
        settle().await;

        let dump = router.dump().await.expect("Failed to dump router");
        assert_eq!(dump.transport_ids, vec![webrtc_transport.id()]);
    });
}

#[test]
fn new_transport_event() {
    future::block_on(async move {
        let (worker, _engine) = create_worker().await;

        let router = worker
            .create_router(router_options())
            .await
            .expect("Failed to create router");

        let (new_transport_tx, new_transport_rx) = async_channel::unbounded();
        let _handler = router.on_new_transport(move |transport| {
            let kind = match transport {
                NewTransport::Direct(_) => "direct",
                NewTransport::Pipe(_) => "pipe",
                NewTransport::Plain(_) => "plain",
                NewTransport::WebRtc(_) => "webrtc",
            };
            let _ = new_transport_tx.try_send((kind, transport.id()));
        });

        let transport = router
            .create_direct_transport(DirectTransportOptions::default())
            .await
            .expect("Failed to create direct transport");

        assert_eq!(
            new_transport_rx
                .recv()
                .await
                .expect("Failed to receive new transport"),
            ("direct", transport.id())
        );
    });
}

#[test]
fn close_event_and_single_request() {
    future::block_on(async move {
        let (worker, engine) = create_worker().await;

        let router = worker
            .create_router(router_options())
            .await
            .expect("Failed to create router");

        let (mut close_tx, close_rx) = async_oneshot::oneshot::<()>();
        let _handler = router.on_close(move || {
            let _ = close_tx.send(());
        });

        router.close();
        router.close();

        close_rx.await.expect("Failed to receive close event");
        assert!(router.closed());

        engine.wait_for_requests("router.close", 1).await;
        settle().await;
        assert_eq!(engine.requests("router.close").len(), 1);
        assert!(worker.router_ids().is_empty());
    });
}

#[test]
fn dropping_router_closes_it() {
    future::block_on(async move {
        let (worker, engine) = create_worker().await;

        let router = worker
            .create_router(router_options())
            .await
            .expect("Failed to create router");
        let router_id = router.id();
        let weak_router = router.downgrade();

        assert_eq!(worker.router_ids(), vec![router_id]);

        drop(router);

        assert!(weak_router.upgrade().is_none());
        assert!(worker.router_ids().is_empty());

        engine.wait_for_requests("router.close", 1).await;
        let requests = engine.requests("router.close");
        assert_eq!(requests.len(), 1);
        assert_eq!(
            requests[0]["internal"]["routerId"],
            router_id.to_string()
        );
    });
}

#[test]
fn router_keeps_worker_alive() {
    future::block_on(async move {
        let (worker, engine) = create_worker().await;

        let router = worker
            .create_router(router_options())
            .await
            .expect("Failed to create router");

        drop(worker);
        settle().await;

        assert!(!router.closed());
        assert!(!router.worker().closed());
        assert_eq!(router.worker().router_ids(), vec![router.id()]);

        router
            .create_webrtc_transport(webrtc_transport_options())
            .await
            .expect("Failed to create WebRTC transport");
        assert!(engine.requests("router.close").is_empty());
    });
}

#[test]
fn close_cascades_to_transports_and_observers() {
    future::block_on(async move {
        let (worker, engine) = create_worker().await;

        let router = worker
            .create_router(router_options())
            .await
            .expect("Failed to create router");

        let transport = router
            .create_webrtc_transport(webrtc_transport_options())
            .await
            .expect("Failed to create WebRTC transport");
        let audio_level_observer = router
            .create_audio_level_observer(AudioLevelObserverOptions::default())
            .await
            .expect("Failed to create audio level observer");

        let (mut router_close_tx, router_close_rx) = async_oneshot::oneshot::<()>();
        let _handler = transport.on_router_close(move || {
            let _ = router_close_tx.send(());
        });

        router.close();

        router_close_rx
            .await
            .expect("Failed to receive router close event");
        assert!(transport.closed());
        assert!(audio_level_observer.closed());

        settle().await;

        // Only the router itself is closed on the engine side
        assert_eq!(engine.requests("router.close").len(), 1);
        assert!(engine.requests("transport.close").is_empty());
        assert!(engine.requests("rtpObserver.close").is_empty());
    });
}

#[test]
fn create_transport_after_close_fails() {
    future::block_on(async move {
        let (worker, _engine) = create_worker().await;

        let router = worker
            .create_router(router_options())
            .await
            .expect("Failed to create router");

        router.close();

        assert!(router
            .create_webrtc_transport(webrtc_transport_options())
            .await
            .is_err());
    });
}
