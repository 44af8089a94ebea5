use crate::fake_engine::{create_worker, settle};
use crate::media::router_options;
use futures_lite::future;
use serde_json::json;
use sfu_control::worker::{ExitError, WorkerLogLevel, WorkerLogTag, WorkerUpdateSettings};

#[test]
fn create_worker_succeeds() {
    future::block_on(async move {
        let (worker, engine) = create_worker().await;

        assert_eq!(worker.pid(), engine.pid());
        assert!(!worker.closed());
        assert!(worker.router_ids().is_empty());
    });
}

#[test]
fn dump_succeeds() {
    future::block_on(async move {
        let (worker, engine) = create_worker().await;

        let router = worker
            .create_router(router_options())
            .await
            .expect("Failed to create router");

        let dump = worker.dump().await.expect("Failed to dump worker");

        assert_eq!(dump.pid, engine.pid());
        assert_eq!(dump.router_ids, vec![router.id()]);
    });
}

#[test]
fn get_resource_usage_succeeds() {
    future::block_on(async move {
        let (worker, _engine) = create_worker().await;

        let usage = worker
            .get_resource_usage()
            .await
            .expect("Failed to get resource usage");

        assert_eq!(usage.ru_utime, 120);
        assert_eq!(usage.ru_maxrss, 20480);
        assert_eq!(usage.ru_nivcsw, 12);
    });
}

#[test]
fn update_settings_sends_only_given_fields() {
    future::block_on(async move {
        let (worker, engine) = create_worker().await;

        let mut settings = WorkerUpdateSettings::default();
        settings.log_level = Some(WorkerLogLevel::Debug);
        worker
            .update_settings(settings)
            .await
            .expect("Failed to update settings");

        let mut settings = WorkerUpdateSettings::default();
        settings.log_tags = Some(vec![WorkerLogTag::Ice, WorkerLogTag::Dtls]);
        worker
            .update_settings(settings)
            .await
            .expect("Failed to update settings");

        let requests = engine.requests("worker.updateSettings");
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0]["data"], json!({ "logLevel": "debug" }));
        assert_eq!(requests[1]["data"], json!({ "logTags": ["ice", "dtls"] }));
    });
}

#[test]
fn new_router_event() {
    future::block_on(async move {
        let (worker, _engine) = create_worker().await;

        let (new_router_tx, new_router_rx) = async_channel::unbounded();
        let _handler = worker.on_new_router(move |router| {
            let _ = new_router_tx.try_send(router.id());
        });

        let router = worker
            .create_router(router_options())
            .await
            .expect("Failed to create router");

        assert_eq!(
            new_router_rx
                .recv()
                .await
                .expect("Failed to receive new router"),
            router.id()
        );
        assert_eq!(worker.router_ids(), vec![router.id()]);
    });
}

#[test]
fn close_event() {
    future::block_on(async move {
        let (worker, _engine) = create_worker().await;

        let (mut close_tx, close_rx) = async_oneshot::oneshot::<()>();
        let _handler = worker.on_close(move || {
            let _ = close_tx.send(());
        });

        worker.close();

        close_rx.await.expect("Failed to receive close event");
        assert!(worker.closed());
    });
}

#[test]
fn close_event_fires_in_place_when_already_closed() {
    future::block_on(async move {
        let (worker, _engine) = create_worker().await;

        worker.close();

        let (mut close_tx, close_rx) = async_oneshot::oneshot::<()>();
        let _handler = worker.on_close(move || {
            let _ = close_tx.send(());
        });

        close_rx.await.expect("Failed to receive close event");
    });
}

#[test]
fn close_cascades_to_routers_without_requests() {
    future::block_on(async move {
        let (worker, engine) = create_worker().await;

        let router = worker
            .create_router(router_options())
            .await
            .expect("Failed to create router");

        let (mut worker_close_tx, worker_close_rx) = async_oneshot::oneshot::<()>();
        let _handler = router.on_worker_close(move || {
            let _ = worker_close_tx.send(());
        });

        worker.close();

        worker_close_rx
            .await
            .expect("Failed to receive worker close event");
        assert!(router.closed());

        settle().await;

        assert!(engine.requests("router.close").is_empty());
    });
}

#[test]
fn engine_going_away_is_reported_as_death() {
    future::block_on(async move {
        let (worker, engine) = create_worker().await;

        let router = worker
            .create_router(router_options())
            .await
            .expect("Failed to create router");

        let (mut dead_tx, dead_rx) = async_oneshot::oneshot::<Result<(), ExitError>>();
        let _dead_handler = worker.on_dead(move |result| {
            let _ = dead_tx.send(result);
        });
        let (mut close_tx, close_rx) = async_oneshot::oneshot::<()>();
        let _close_handler = worker.on_close(move || {
            let _ = close_tx.send(());
        });

        engine.crash();

        let result = dead_rx.await.expect("Failed to receive dead event");
        assert!(matches!(result, Err(ExitError::Unexpected)));

        close_rx.await.expect("Failed to receive close event");
        assert!(worker.closed());
        assert!(router.closed());
    });
}

#[test]
fn requests_fail_after_close() {
    future::block_on(async move {
        let (worker, _engine) = create_worker().await;

        worker.close();

        assert!(worker.dump().await.is_err());
        assert!(worker.create_router(router_options()).await.is_err());
    });
}
