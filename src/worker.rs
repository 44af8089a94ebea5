//! Supervision of one media engine, either a spawned process or an engine reached over byte
//! streams handed in by the application.

mod channel;
mod common;
mod payload_channel;
mod utils;

use crate::data_structures::AppData;
use crate::messages::{self, Target};
use crate::ortc::{self, RouterRtpCapabilitiesError};
use crate::router::resource::EngineLink;
use crate::router::{Router, RouterId, RouterOptions, WeakRouter};
use crate::worker_manager::WorkerManager;
use async_executor::Executor;
use async_process::{Child, Command, ExitStatus, Stdio};
use channel::InternalMessage;
pub(crate) use channel::Channel;
pub use channel::RequestError;
pub(crate) use common::{SubscriptionHandler, SubscriptionTarget};
use event_listener_primitives::{Bag, BagOnce, HandlerId};
use futures_lite::io::BufReader;
use futures_lite::{future, AsyncBufReadExt, AsyncRead, AsyncWrite, StreamExt};
use hash_hasher::HashedMap;
use log::{debug, error, warn};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use parking_lot::Mutex;
pub use payload_channel::NotificationError;
pub(crate) use payload_channel::{NotificationMessage, PayloadChannel};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use std::ffi::OsString;
use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::{fmt, io};
use thiserror::Error;
use utils::SpawnResult;

/// How chatty the engine is.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum WorkerLogLevel {
    Debug,
    Warn,
    Error,
    /// Silent.
    None,
}

impl Default for WorkerLogLevel {
    fn default() -> Self {
        Self::Error
    }
}

impl Serialize for WorkerLogLevel {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl WorkerLogLevel {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Warn => "warn",
            Self::Error => "error",
            Self::None => "none",
        }
    }
}

/// Engine areas whose debug logs are wanted.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum WorkerLogTag {
    Info,
    Ice,
    Dtls,
    Rtp,
    Srtp,
    Rtcp,
    Rtx,
    Bwe,
    Score,
    Simulcast,
    Svc,
    Sctp,
    Message,
}

impl Serialize for WorkerLogTag {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl WorkerLogTag {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Ice => "ice",
            Self::Dtls => "dtls",
            Self::Rtp => "rtp",
            Self::Srtp => "srtp",
            Self::Rtcp => "rtcp",
            Self::Rtx => "rtx",
            Self::Bwe => "bwe",
            Self::Score => "score",
            Self::Simulcast => "simulcast",
            Self::Svc => "svc",
            Self::Sctp => "sctp",
            Self::Message => "message",
        }
    }
}

/// Command line of a spawned engine.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct WorkerSettings {
    /// Default [`WorkerLogLevel::Error`].
    pub log_level: WorkerLogLevel,
    pub log_tags: Vec<WorkerLogTag>,
    /// Lowest port media may be bound to. Default 10000.
    pub rtc_min_port: u16,
    /// Highest port media may be bound to. Default 59999.
    pub rtc_max_port: u16,
    /// PEM certificate for DTLS, the engine makes one up when unset.
    pub dtls_certificate_file: Option<PathBuf>,
    /// PEM private key matching `dtls_certificate_file`.
    pub dtls_private_key_file: Option<PathBuf>,
    /// Application data.
    pub app_data: AppData,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            log_level: WorkerLogLevel::default(),
            log_tags: Vec::new(),
            rtc_min_port: 10000,
            rtc_max_port: 59999,
            dtls_certificate_file: None,
            dtls_private_key_file: None,
            app_data: AppData::default(),
        }
    }
}

impl WorkerSettings {
    fn to_spawn_args(&self) -> Vec<OsString> {
        let flag = |name: &str, value: &dyn fmt::Display| OsString::from(format!("--{}={}", name, value));
        let path_flag = |name: &str, path: &PathBuf| {
            let mut arg = OsString::from(format!("--{}=", name));
            arg.push(path);
            arg
        };

        let mut args = vec![flag("logLevel", &self.log_level.as_str())];
        if !self.log_tags.is_empty() {
            let tags: Vec<&str> = self.log_tags.iter().map(WorkerLogTag::as_str).collect();
            args.push(flag("logTags", &tags.join(",")));
        }
        args.push(flag("rtcMinPort", &self.rtc_min_port));
        args.push(flag("rtcMaxPort", &self.rtc_max_port));
        args.extend(
            self.dtls_certificate_file
                .iter()
                .map(|path| path_flag("dtlsCertificateFile", path)),
        );
        args.extend(
            self.dtls_private_key_file
                .iter()
                .map(|path| path_flag("dtlsPrivateKeyFile", path)),
        );

        args
    }
}

/// Logging changes for a running engine, unset fields stay as they are.
#[derive(Debug, Default, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct WorkerUpdateSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<WorkerLogLevel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_tags: Option<Vec<WorkerLogTag>>,
}

/// `getrusage()` of the engine process, field names are the ones of `struct rusage`. CPU times
/// are in milliseconds.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[non_exhaustive]
pub struct WorkerResourceUsage {
    pub ru_utime: u64,
    pub ru_stime: u64,
    pub ru_maxrss: u64,
    pub ru_ixrss: u64,
    pub ru_idrss: u64,
    pub ru_isrss: u64,
    pub ru_minflt: u64,
    pub ru_majflt: u64,
    pub ru_nswap: u64,
    pub ru_inblock: u64,
    pub ru_oublock: u64,
    pub ru_msgsnd: u64,
    pub ru_msgrcv: u64,
    pub ru_nsignals: u64,
    pub ru_nvcsw: u64,
    pub ru_nivcsw: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
#[doc(hidden)]
#[non_exhaustive]
pub struct WorkerDump {
    pub pid: u32,
    pub router_ids: Vec<RouterId>,
}

/// Byte streams of an engine that is already running somewhere, used instead of spawning a
/// process.
pub struct WorkerEndpoints {
    /// Identifier the engine uses as `targetId` of its `running` notification.
    pub pid: u32,
    /// Control channel, engine to supervisor.
    pub channel_reader: Box<dyn AsyncRead + Send + Unpin>,
    /// Control channel, supervisor to engine.
    pub channel_writer: Box<dyn AsyncWrite + Send + Unpin>,
    /// Payload channel, engine to supervisor.
    pub payload_channel_reader: Box<dyn AsyncRead + Send + Unpin>,
    /// Payload channel, supervisor to engine.
    pub payload_channel_writer: Box<dyn AsyncWrite + Send + Unpin>,
}

impl fmt::Debug for WorkerEndpoints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerEndpoints")
            .field("pid", &self.pid)
            .finish()
    }
}

impl WorkerEndpoints {
    /// Wrap the four byte streams of an already running engine.
    pub fn new<CR, CW, PR, PW>(
        pid: u32,
        channel_reader: CR,
        channel_writer: CW,
        payload_channel_reader: PR,
        payload_channel_writer: PW,
    ) -> Self
    where
        CR: AsyncRead + Send + Unpin + 'static,
        CW: AsyncWrite + Send + Unpin + 'static,
        PR: AsyncRead + Send + Unpin + 'static,
        PW: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            pid,
            channel_reader: Box::new(channel_reader),
            channel_writer: Box::new(channel_writer),
            payload_channel_reader: Box::new(payload_channel_reader),
            payload_channel_writer: Box::new(payload_channel_writer),
        }
    }
}

/// Reason the engine stopped without being closed.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Error)]
pub enum ExitError {
    /// Exit code 1.
    #[error("Engine failed")]
    Generic,
    /// Exit code 42, the engine rejected its command line.
    #[error("Engine rejected its settings")]
    Settings,
    #[error("Engine exited with status code {status_code:?}")]
    Unknown {
        /// `None` when killed by a signal.
        status_code: Option<i32>,
    },
    /// Engine went away without an exit status (process status unavailable or its streams were
    /// closed).
    #[error("Worker exited unexpectedly")]
    Unexpected,
}

impl From<ExitStatus> for ExitError {
    fn from(exit_status: ExitStatus) -> Self {
        match exit_status.code() {
            Some(1) => Self::Generic,
            Some(42) => Self::Settings,
            status_code => Self::Unknown { status_code },
        }
    }
}

/// Why [`Worker::create_router`] failed.
#[derive(Debug, Error)]
pub enum CreateRouterError {
    /// Media codecs can't be turned into router capabilities.
    #[error("Invalid media codecs: {0}")]
    FailedRtpCapabilitiesGeneration(RouterRtpCapabilitiesError),
    #[error("Engine request failed: {0}")]
    Request(RequestError),
}

#[derive(Default)]
#[allow(clippy::type_complexity)]
struct Handlers {
    new_router: Bag<Arc<dyn Fn(&Router) + Send + Sync>, Router>,
    dead: BagOnce<Box<dyn FnOnce(Result<(), ExitError>) + Send>>,
    close: BagOnce<Box<dyn FnOnce() + Send>>,
}

struct Inner {
    pid: u32,
    link: EngineLink,
    child: Mutex<Option<Child>>,
    handlers: Handlers,
    app_data: AppData,
    routers: Arc<Mutex<HashedMap<RouterId, WeakRouter>>>,
    closed: AtomicBool,
    // Manager's executor thread outlives its workers
    _worker_manager: WorkerManager,
}

impl Drop for Inner {
    fn drop(&mut self) {
        debug!("drop()");

        self.close();
    }
}

impl Inner {
    fn new(
        pid: u32,
        channel: Channel,
        payload_channel: PayloadChannel,
        child: Option<Child>,
        executor: Arc<Executor<'static>>,
        app_data: AppData,
        worker_manager: WorkerManager,
    ) -> Self {
        Self {
            pid,
            link: EngineLink::new(executor, channel, payload_channel),
            child: Mutex::new(child),
            handlers: Handlers::default(),
            app_data,
            routers: Arc::default(),
            closed: AtomicBool::new(false),
            _worker_manager: worker_manager,
        }
    }

    fn close(&self) {
        if self.shut_down() {
            debug!("close()");

            self.kill_child();
            self.handlers.close.call_simple();
        }
    }

    /// Engine went away on its own.
    fn died(&self, result: Result<(), ExitError>) {
        if self.shut_down() {
            match result {
                Ok(()) => debug!("worker process exited [pid:{}]", self.pid),
                Err(error) => error!("worker process died [pid:{}]: {}", self.pid, error),
            }

            self.handlers.dead.call(|callback| {
                callback(result);
            });
            self.handlers.close.call_simple();
        }
    }

    /// Marks the worker closed, closes its routers and channels. `false` if it already was.
    fn shut_down(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }

        self.close_routers();
        self.link.channel().close();
        self.link.payload_channel().close();

        true
    }

    fn close_routers(&self) {
        // Routers leave the map on close, so it's drained before they are told
        let routers = self
            .routers
            .lock()
            .drain()
            .filter_map(|(_, router)| router.upgrade())
            .collect::<Vec<_>>();

        for router in routers {
            router.worker_closed();
        }
    }

    fn kill_child(&self) {
        if let Some(child) = self.child.lock().as_mut() {
            if matches!(child.try_status(), Ok(None)) {
                if let Err(error) = signal::kill(Pid::from_raw(self.pid as i32), Signal::SIGTERM) {
                    warn!("failed to kill worker process [pid:{}]: {}", self.pid, error);
                }
            }
        }
    }

    fn setup_output_forwarding(child: &mut Child, executor: &Executor<'static>) {
        if let Some(stdout) = child.stdout.take() {
            executor
                .spawn(async move {
                    let mut lines = BufReader::new(stdout).lines();
                    while let Some(Ok(line)) = lines.next().await {
                        debug!("(stdout) {}", line);
                    }
                })
                .detach();
        }

        if let Some(stderr) = child.stderr.take() {
            executor
                .spawn(async move {
                    let mut lines = BufReader::new(stderr).lines();
                    while let Some(Ok(line)) = lines.next().await {
                        error!("(stderr) {}", line);
                    }
                })
                .detach();
        }
    }

    /// Forwards engine log lines and watches for the control channel going away.
    fn setup_message_handling(self: &Arc<Self>, watch_channel_eof: bool) {
        let channel_receiver = self.link.channel().get_internal_message_receiver();
        let pid = self.pid;
        let inner_weak = Arc::downgrade(self);

        self.link
            .executor()
            .spawn(async move {
                while let Ok(message) = channel_receiver.recv().await {
                    match message {
                        InternalMessage::Debug(text) => debug!("[pid:{}] {}", pid, text),
                        InternalMessage::Warn(text) => warn!("[pid:{}] {}", pid, text),
                        InternalMessage::Error(text) => error!("[pid:{}] {}", pid, text),
                        InternalMessage::Dump(text) => debug!("[pid:{}] (dump) {}", pid, text),
                        InternalMessage::Unexpected(data) => error!(
                            "worker[pid:{}] unexpected data: {}",
                            pid,
                            String::from_utf8_lossy(&data)
                        ),
                    }
                }

                if watch_channel_eof {
                    if let Some(inner) = inner_weak.upgrade() {
                        inner.died(Err(ExitError::Unexpected));
                    }
                }
            })
            .detach();
    }

    fn setup_exit_watch<F>(self: &Arc<Self>, status_fut: F)
    where
        F: Future<Output = io::Result<ExitStatus>> + Send + 'static,
    {
        let inner_weak = Arc::downgrade(self);

        self.link
            .executor()
            .spawn(async move {
                let status = status_fut.await;

                if let Some(inner) = inner_weak.upgrade() {
                    let result = match status {
                        Ok(exit_status) if exit_status.success() => Ok(()),
                        Ok(exit_status) => Err(ExitError::from(exit_status)),
                        Err(error) => {
                            error!("failed to get worker process status: {}", error);
                            Err(ExitError::Unexpected)
                        }
                    };

                    inner.died(result);
                }
            })
            .detach();
    }
}

/// Callback watching for the engine's `running` notification (addressed to its pid) and the
/// receiver it resolves.
fn worker_ready_watch(
    pid: u32,
) -> (
    impl Fn(Value) + Send + Sync + 'static,
    async_oneshot::Receiver<io::Result<()>>,
) {
    let (sender, receiver) = async_oneshot::oneshot::<io::Result<()>>();
    let sender = Mutex::new(Some(sender));

    let callback = move |notification: Value| {
        let result = match notification.get("event").and_then(Value::as_str) {
            Some("running") => {
                debug!("worker process running [pid:{}]", pid);
                Ok(())
            }
            _ => Err(io::Error::new(
                io::ErrorKind::Other,
                format!(
                    "unexpected first notification from worker [pid:{}]: {}",
                    pid, notification
                ),
            )),
        };
        if let Some(mut sender) = sender.lock().take() {
            let _ = sender.send(result);
        }
    };

    (callback, receiver)
}

async fn wait_for_worker_ready(
    receiver: async_oneshot::Receiver<io::Result<()>>,
    _subscription_handler: SubscriptionHandler,
) -> io::Result<()> {
    match receiver.await {
        Ok(result) => result,
        Err(_closed) => Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "worker channel closed before worker was ready",
        )),
    }
}

/// Handle to one media engine, the root of the resource tree. Routers live in exactly one
/// worker, closing it closes them all.
#[derive(Clone)]
#[must_use = "Worker will be destroyed on drop, make sure to keep it around for as long as needed"]
pub struct Worker {
    inner: Arc<Inner>,
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("pid", &self.inner.pid)
            .field("closed", &self.inner.closed)
            .finish()
    }
}

impl Worker {
    pub(crate) async fn new(
        executor: Arc<Executor<'static>>,
        worker_binary: PathBuf,
        worker_settings: WorkerSettings,
        worker_manager: WorkerManager,
    ) -> io::Result<Self> {
        debug!("new()");

        let spawn_args = worker_settings.to_spawn_args();

        debug!(
            "spawning worker process: {} {}",
            worker_binary.to_string_lossy(),
            spawn_args
                .iter()
                .map(|arg| arg.to_string_lossy())
                .collect::<Vec<_>>()
                .join(" ")
        );

        let mut command = Command::new(worker_binary);
        command
            .args(spawn_args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .env("SFU_CONTROL_VERSION", env!("CARGO_PKG_VERSION"));

        let SpawnResult {
            mut child,
            channel,
            payload_channel,
        } = utils::spawn_with_worker_channels(Arc::clone(&executor), &mut command)?;

        let pid = child.id();

        Inner::setup_output_forwarding(&mut child, &executor);

        let status_fut = child.status();
        let ready = future::or(
            async {
                let status = status_fut.await?;
                Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("worker process exited before being ready: {}", status),
                ))
            },
            {
                let (callback, receiver) = worker_ready_watch(pid);
                let subscription_handler = channel.subscribe_to_notifications(pid.into(), callback);
                wait_for_worker_ready(receiver, subscription_handler)
            },
        );
        if let Err(error) = ready.await {
            channel.close();
            payload_channel.close();
            return Err(error);
        }

        let status_fut = child.status();
        let inner = Arc::new(Inner::new(
            pid,
            channel,
            payload_channel,
            Some(child),
            executor,
            worker_settings.app_data,
            worker_manager,
        ));

        inner.setup_message_handling(false);
        inner.setup_exit_watch(status_fut);

        Ok(Self { inner })
    }

    pub(crate) async fn with_endpoints(
        executor: Arc<Executor<'static>>,
        endpoints: WorkerEndpoints,
        app_data: AppData,
        worker_manager: WorkerManager,
    ) -> io::Result<Self> {
        debug!("with_endpoints()");

        let WorkerEndpoints {
            pid,
            channel_reader,
            channel_writer,
            payload_channel_reader,
            payload_channel_writer,
        } = endpoints;

        // The engine may announce itself as soon as the channel is read from
        let (callback, receiver) = worker_ready_watch(pid);
        let (channel, subscription_handler) = Channel::with_early_subscription(
            Arc::clone(&executor),
            channel_reader,
            channel_writer,
            pid.into(),
            callback,
        );
        let payload_channel = PayloadChannel::new(
            Arc::clone(&executor),
            payload_channel_reader,
            payload_channel_writer,
        );

        if let Err(error) = wait_for_worker_ready(receiver, subscription_handler).await {
            channel.close();
            payload_channel.close();
            return Err(error);
        }

        let inner = Arc::new(Inner::new(
            pid,
            channel,
            payload_channel,
            None,
            executor,
            app_data,
            worker_manager,
        ));

        // Without a process to watch, the control channel going away is the only death signal
        inner.setup_message_handling(true);

        Ok(Self { inner })
    }

    /// Process id, or the id an engine given by [`WorkerEndpoints`] announced itself with.
    #[must_use]
    pub fn pid(&self) -> u32 {
        self.inner.pid
    }

    #[must_use]
    pub fn app_data(&self) -> &AppData {
        &self.inner.app_data
    }

    #[must_use]
    pub fn closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Routers that are still open.
    #[must_use]
    pub fn router_ids(&self) -> Vec<RouterId> {
        self.inner.routers.lock().keys().copied().collect()
    }

    #[doc(hidden)]
    pub async fn dump(&self) -> Result<WorkerDump, RequestError> {
        debug!("dump()");

        self.inner.link.request(messages::worker_dump()).await
    }

    pub async fn get_resource_usage(&self) -> Result<WorkerResourceUsage, RequestError> {
        debug!("get_resource_usage()");

        self.inner
            .link
            .request(messages::worker_get_resource_usage())
            .await
    }

    /// Changes engine logging on the fly.
    pub async fn update_settings(&self, data: WorkerUpdateSettings) -> Result<(), RequestError> {
        debug!("update_settings()");

        self.inner
            .link
            .request(messages::worker_update_settings(data))
            .await
    }

    /// Creates a router accepting `media_codecs`. Capabilities are computed here, an invalid
    /// codec list fails without talking to the engine.
    pub async fn create_router(
        &self,
        router_options: RouterOptions,
    ) -> Result<Router, CreateRouterError> {
        debug!("create_router()");

        let RouterOptions {
            media_codecs,
            app_data,
        } = router_options;

        let rtp_capabilities = ortc::generate_router_rtp_capabilities(media_codecs)
            .map_err(CreateRouterError::FailedRtpCapabilitiesGeneration)?;

        let router_id = RouterId::new();

        self.inner
            .link
            .request(messages::worker_create_router(Target::router(router_id)))
            .await
            .map_err(CreateRouterError::Request)?;

        let router = Router::new(
            router_id,
            self.inner.link.clone(),
            rtp_capabilities,
            app_data,
            self.clone(),
        );

        // Worker may have been closed while the request was in flight
        if self.closed() {
            router.worker_closed();
            return Err(CreateRouterError::Request(RequestError::ChannelClosed));
        }

        self.inner
            .routers
            .lock()
            .insert(router_id, router.downgrade());
        router
            .on_close({
                let routers = Arc::downgrade(&self.inner.routers);

                move || {
                    if let Some(routers) = routers.upgrade() {
                        routers.lock().remove(&router_id);
                    }
                }
            })
            .detach();

        self.inner.handlers.new_router.call_simple(&router);

        Ok(router)
    }

    /// Closes every router and terminates a spawned engine.
    pub fn close(&self) {
        self.inner.close();
    }

    pub fn on_new_router<F: Fn(&Router) + Send + Sync + 'static>(&self, callback: F) -> HandlerId {
        self.inner.handlers.new_router.add(Arc::new(callback))
    }

    /// Engine stopped without being closed, `Ok(())` when it exited cleanly.
    pub fn on_dead<F: FnOnce(Result<(), ExitError>) + Send + 'static>(
        &self,
        callback: F,
    ) -> HandlerId {
        self.inner.handlers.dead.add(Box::new(callback))
    }

    /// Worker was closed, for whatever reason. Runs right away if it already is.
    pub fn on_close<F: FnOnce() + Send + 'static>(&self, callback: F) -> HandlerId {
        let handler_id = self.inner.handlers.close.add(Box::new(callback));
        if self.inner.closed.load(Ordering::Relaxed) {
            self.inner.handlers.close.call_simple();
        }
        handler_id
    }
}
