//! Entry point of the crate: owns the executor workers run their channels on and creates them.


use crate::data_structures::AppData;
use crate::worker::{Worker, WorkerEndpoints, WorkerSettings};
use async_executor::Executor;
use async_oneshot::Sender;
use event_listener_primitives::{Bag, HandlerId};
use futures_lite::future;
use log::debug;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::{fmt, io};

#[derive(Default)]
struct Handlers {
    new_worker: Bag<Arc<dyn Fn(&Worker) + Send + Sync>, Worker>,
}

struct Inner {
    executor: Arc<Executor<'static>>,
    engine_binary: PathBuf,
    handlers: Handlers,
    // Dropping it ends the executor thread started by `WorkerManager::new`
    _executor_thread_stop: Option<Sender<()>>,
}

/// Creates [`Worker`]s, either by spawning the engine binary or from the byte streams of an
/// engine that is already running.
///
/// Workers hold on to their manager, so the executor keeps running until the last of them is
/// gone.
///
/// ```no_run
/// use futures_lite::future;
/// use sfu_control::worker::WorkerSettings;
/// use sfu_control::worker_manager::WorkerManager;
///
/// let worker_manager = WorkerManager::new("/usr/local/bin/media-engine".into());
///
/// future::block_on(async move {
///     let worker = worker_manager
///         .create_worker(WorkerSettings::default())
///         .await
///         .unwrap();
///     println!("engine running with pid {}", worker.pid());
/// })
/// ```
#[derive(Clone)]
pub struct WorkerManager {
    inner: Arc<Inner>,
}

impl fmt::Debug for WorkerManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerManager")
            .field("engine_binary", &self.inner.engine_binary)
            .finish()
    }
}

impl WorkerManager {
    /// Runs its own executor on a dedicated thread.
    pub fn new(engine_binary: PathBuf) -> Self {
        let executor = Arc::new(Executor::new());
        let (stop_sender, stop_receiver) = async_oneshot::oneshot::<()>();

        std::thread::spawn({
            let executor = Arc::clone(&executor);

            // Receiver resolves with an error once the sender is dropped
            move || future::block_on(executor.run(stop_receiver)).ok()
        });

        Self::from_parts(engine_binary, executor, Some(stop_sender))
    }

    /// Uses an executor the application already drives.
    pub fn with_executor(engine_binary: PathBuf, executor: Arc<Executor<'static>>) -> Self {
        Self::from_parts(engine_binary, executor, None)
    }

    fn from_parts(
        engine_binary: PathBuf,
        executor: Arc<Executor<'static>>,
        executor_thread_stop: Option<Sender<()>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                executor,
                engine_binary,
                handlers: Handlers::default(),
                _executor_thread_stop: executor_thread_stop,
            }),
        }
    }

    /// Spawns the engine binary with `worker_settings` and waits until it reports running.
    pub async fn create_worker(&self, worker_settings: WorkerSettings) -> io::Result<Worker> {
        debug!("create_worker()");

        self.announce(Worker::new(
            Arc::clone(&self.inner.executor),
            self.inner.engine_binary.clone(),
            worker_settings,
            self.clone(),
        ))
        .await
    }

    /// Attaches to an engine reachable over `endpoints` and waits until it reports running.
    pub async fn create_worker_with_endpoints(
        &self,
        endpoints: WorkerEndpoints,
        app_data: AppData,
    ) -> io::Result<Worker> {
        debug!("create_worker_with_endpoints()");

        self.announce(Worker::with_endpoints(
            Arc::clone(&self.inner.executor),
            endpoints,
            app_data,
            self.clone(),
        ))
        .await
    }

    async fn announce<F>(&self, worker: F) -> io::Result<Worker>
    where
        F: Future<Output = io::Result<Worker>>,
    {
        let worker = worker.await?;
        self.inner.handlers.new_worker.call_simple(&worker);

        Ok(worker)
    }

    pub fn on_new_worker<F: Fn(&Worker) + Send + Sync + 'static>(&self, callback: F) -> HandlerId {
        self.inner.handlers.new_worker.add(Arc::new(callback))
    }
}
