
use crate::messages::Request;
use crate::worker::common::{
    write_netstring, EventHandlers, NetstringReader, SubscriptionHandler, SubscriptionTarget,
    WeakEventHandlers, NS_PAYLOAD_MAX_LEN,
};
use async_executor::Executor;
use futures_lite::{future, AsyncRead, AsyncWrite, AsyncWriteExt};
use log::{debug, error, trace, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::error::Error;
use std::fmt::Debug;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
// Time given to the reader to drain frames that are already in flight after close.
const CLOSE_GRACE_PERIOD: Duration = Duration::from_millis(200);

/// Log line or garbage the engine wrote to the control channel instead of a JSON message.
#[derive(Debug)]
pub(super) enum InternalMessage {
    Debug(String),
    Warn(String),
    Error(String),
    /// Output of a dump the engine was asked for.
    Dump(String),
    Unexpected(Vec<u8>),
}

impl InternalMessage {
    /// Log lines start with a one byte level marker.
    fn from_frame(frame: &[u8]) -> Self {
        let (marker, text) = match frame.split_first() {
            Some((marker, text)) => (*marker, String::from_utf8_lossy(text).into_owned()),
            None => return Self::Unexpected(Vec::new()),
        };

        match marker {
            b'D' => Self::Debug(text),
            b'W' => Self::Warn(text),
            b'E' => Self::Error(text),
            b'X' => Self::Dump(text),
            _ => Self::Unexpected(frame.to_vec()),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum JsonReceiveMessage {
    ResponseSuccess {
        id: u32,
        #[allow(dead_code)]
        accepted: bool,
        data: Option<Value>,
    },
    ResponseError {
        id: u32,
        reason: String,
    },
    Notification(Value),
}

enum ChannelReceiveMessage {
    Json(JsonReceiveMessage),
    Internal(InternalMessage),
}

fn deserialize_message(bytes: &[u8]) -> ChannelReceiveMessage {
    if bytes.first() != Some(&b'{') {
        return ChannelReceiveMessage::Internal(InternalMessage::from_frame(bytes));
    }

    serde_json::from_slice(bytes)
        .map(ChannelReceiveMessage::Json)
        .unwrap_or_else(|error| {
            error!("failed to parse JSON message: {}", error);
            ChannelReceiveMessage::Internal(InternalMessage::Unexpected(bytes.to_vec()))
        })
}

/// Failure of a request sent to the engine.
#[derive(Debug, Error)]
pub enum RequestError {
    /// Channel already closed.
    #[error("Channel already closed")]
    ChannelClosed,
    /// Serialized request exceeds maximum frame size.
    #[error("Message is too long")]
    MessageTooLong,
    /// No response before deadline.
    #[error("Request timed out")]
    TimedOut,
    /// Engine rejected the request.
    #[error("Received response error: {reason}")]
    Response {
        /// Reason sent by the engine.
        reason: String,
    },
    /// Response data doesn't have expected shape.
    #[error("Failed to parse response from worker: {error}")]
    FailedToParse {
        /// Parsing error.
        error: Box<dyn Error + Send + Sync>,
    },
    /// Response carried no data while some was expected.
    #[error("Worker did not return any data in response")]
    NoData,
}

pub(super) struct ResponseError {
    pub(super) reason: String,
}

pub(super) type Response<T> = Result<Option<T>, ResponseError>;

/// Pending requests keyed by request id.
pub(super) struct RequestsContainer {
    next_id: u32,
    handlers: HashMap<u32, async_oneshot::Sender<Response<Value>>>,
}

impl Default for RequestsContainer {
    fn default() -> Self {
        Self {
            next_id: 1,
            handlers: HashMap::new(),
        }
    }
}

impl RequestsContainer {
    /// Registers new pending request, returns its id and number of requests already waiting.
    pub(super) fn insert(
        &mut self,
        sender: async_oneshot::Sender<Response<Value>>,
    ) -> (u32, usize) {
        let id = self.next_id;
        self.next_id = match self.next_id.wrapping_add(1) {
            0 => 1,
            next_id => next_id,
        };
        let queue_len = self.handlers.len();
        self.handlers.insert(id, sender);

        (id, queue_len)
    }

    pub(super) fn resolve(&mut self, id: u32, response: Response<Value>) {
        match self.handlers.remove(&id) {
            Some(mut sender) => {
                let _ = sender.send(response);
            }
            None => {
                warn!("received response does not match any sent request [id:{}]", id);
            }
        }
    }

    pub(super) fn remove(&mut self, id: u32) {
        self.handlers.remove(&id);
    }

    /// Drops every pending request, each waiter gets [`RequestError::ChannelClosed`].
    pub(super) fn clear(&mut self) {
        self.handlers.clear();
    }
}

pub(super) fn request_timeout(base: Duration, queue_len: usize) -> Duration {
    base + Duration::from_millis(100 * queue_len as u64)
}

/// Waits for a response registered in `requests_container` under `id` or for a timeout,
/// whichever comes first. Timed out entries are removed, so that a late response is ignored.
pub(super) async fn wait_for_response(
    requests_container: &Mutex<RequestsContainer>,
    receiver: async_oneshot::Receiver<Response<Value>>,
    id: u32,
    timeout: Duration,
) -> Result<Option<Value>, RequestError> {
    let result = future::or(
        async move { receiver.await.map_err(|_| RequestError::ChannelClosed) },
        async move {
            async_io::Timer::after(timeout).await;

            requests_container.lock().remove(id);

            Err(RequestError::TimedOut)
        },
    )
    .await?;

    result.map_err(|ResponseError { reason }| RequestError::Response { reason })
}

pub(super) fn parse_response<T: serde::de::DeserializeOwned>(
    data: Option<Value>,
) -> Result<T, RequestError> {
    match data {
        Some(data) => serde_json::from_value(data).map_err(|error| RequestError::FailedToParse {
            error: Box::new(error),
        }),
        // `()` and `Option<_>` responses are fine without data
        None => serde_json::from_value(Value::Null).map_err(|_| RequestError::NoData),
    }
}

#[derive(Debug, Serialize)]
struct RequestMessagePrivate<'a> {
    id: u32,
    method: &'static str,
    #[serde(flatten)]
    message: &'a Value,
}

fn handle_json_message(
    message: JsonReceiveMessage,
    requests_container: &Mutex<RequestsContainer>,
    event_handlers: &EventHandlers<Value>,
) -> Result<(), InternalMessage> {
    match message {
        JsonReceiveMessage::ResponseSuccess { id, data, .. } => {
            requests_container.lock().resolve(id, Ok(data));
        }
        JsonReceiveMessage::ResponseError { id, reason } => {
            requests_container
                .lock()
                .resolve(id, Err(ResponseError { reason }));
        }
        JsonReceiveMessage::Notification(notification) => {
            let target_id = SubscriptionTarget::from_notification(&notification);
            let has_event = notification.get("event").map_or(false, Value::is_string);

            match target_id {
                Some(target_id) if has_event => {
                    if !event_handlers.call_callbacks_with_value(&target_id, notification) {
                        debug!("notification without subscribers [target_id:{:?}]", target_id);
                    }
                }
                _ => {
                    let bytes = serde_json::to_vec(&notification).unwrap_or_default();
                    return Err(InternalMessage::Unexpected(bytes));
                }
            }
        }
    }

    Ok(())
}

struct Inner {
    executor: Arc<Executor<'static>>,
    sender: async_channel::Sender<Vec<u8>>,
    internal_message_receiver: async_channel::Receiver<InternalMessage>,
    requests_container: Arc<Mutex<RequestsContainer>>,
    event_handlers: EventHandlers<Value>,
    shutdown_sender: async_channel::Sender<()>,
    request_timeout: Duration,
    closed: AtomicBool,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.close();
    }
}

impl Inner {
    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.requests_container.lock().clear();
            self.sender.close();
            let _ = self.shutdown_sender.try_send(());
        }
    }
}

/// Control channel: JSON requests, responses and notifications in netstring frames.
#[derive(Clone)]
pub(crate) struct Channel {
    inner: Arc<Inner>,
}

impl Channel {
    pub(super) fn new<R, W>(executor: Arc<Executor<'static>>, reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self::with_timeout(executor, reader, writer, DEFAULT_REQUEST_TIMEOUT)
    }

    pub(super) fn with_timeout<R, W>(
        executor: Arc<Executor<'static>>,
        reader: R,
        writer: W,
        request_timeout: Duration,
    ) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self::start(
            executor,
            reader,
            writer,
            request_timeout,
            EventHandlers::new(),
        )
    }

    /// Same as [`Channel::new()`], but `callback` is subscribed to `target_id` before the first
    /// frame is read, so a notification the engine sends right away is not missed.
    pub(super) fn with_early_subscription<R, W, F>(
        executor: Arc<Executor<'static>>,
        reader: R,
        writer: W,
        target_id: SubscriptionTarget,
        callback: F,
    ) -> (Self, SubscriptionHandler)
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
        F: Fn(Value) + Send + Sync + 'static,
    {
        let event_handlers = EventHandlers::<Value>::new();
        let subscription_handler = event_handlers.add(target_id, Box::new(callback));
        let channel = Self::start(
            executor,
            reader,
            writer,
            DEFAULT_REQUEST_TIMEOUT,
            event_handlers,
        );

        (channel, subscription_handler)
    }

    fn start<R, W>(
        executor: Arc<Executor<'static>>,
        reader: R,
        mut writer: W,
        request_timeout: Duration,
        event_handlers: EventHandlers<Value>,
    ) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let requests_container = Arc::<Mutex<RequestsContainer>>::default();
        let (shutdown_sender, shutdown_receiver) = async_channel::bounded::<()>(1);

        let internal_message_receiver = {
            let requests_container = Arc::clone(&requests_container);
            let event_handlers_weak = event_handlers.downgrade();
            let (sender, receiver) = async_channel::bounded(1);

            executor
                .spawn(async move {
                    let read_loop = read_messages(
                        reader,
                        &requests_container,
                        &event_handlers_weak,
                        &sender,
                    );
                    let shutdown = async {
                        let _ = shutdown_receiver.recv().await;
                        async_io::Timer::after(CLOSE_GRACE_PERIOD).await;
                        Ok(())
                    };

                    if let Err(error) = future::or(read_loop, shutdown).await {
                        debug!("channel read failed: {}", error);
                    }
                    // Nothing can be answered anymore
                    requests_container.lock().clear();
                })
                .detach();

            receiver
        };

        let sender = {
            let (sender, receiver) = async_channel::bounded::<Vec<u8>>(1);

            executor
                .spawn(async move {
                    let mut bytes = Vec::with_capacity(1024);
                    while let Ok(message) = receiver.recv().await {
                        bytes.clear();
                        write_netstring(&mut bytes, &message);

                        writer.write_all(&bytes).await?;
                    }

                    writer.close().await
                })
                .detach();

            sender
        };

        let inner = Arc::new(Inner {
            executor,
            sender,
            internal_message_receiver,
            requests_container,
            event_handlers,
            shutdown_sender,
            request_timeout,
            closed: AtomicBool::new(false),
        });

        Self { inner }
    }

    pub(super) fn get_internal_message_receiver(&self) -> async_channel::Receiver<InternalMessage> {
        self.inner.internal_message_receiver.clone()
    }

    pub(crate) fn executor(&self) -> &Arc<Executor<'static>> {
        &self.inner.executor
    }

    pub(crate) fn closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Rejects every pending request and stops talking to the engine.
    pub(crate) fn close(&self) {
        debug!("close()");

        self.inner.close();
    }

    pub(crate) async fn request<R>(&self, request: R) -> Result<R::Response, RequestError>
    where
        R: Request,
    {
        let method = request.as_method();
        let message = serde_json::to_value(&request).map_err(|error| {
            RequestError::FailedToParse {
                error: Box::new(error),
            }
        })?;
        let data = self.request_internal(method, message).await?;

        parse_response(data)
    }

    pub(crate) fn subscribe_to_notifications<F>(
        &self,
        target_id: SubscriptionTarget,
        callback: F,
    ) -> SubscriptionHandler
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        self.inner
            .event_handlers
            .add(target_id, Box::new(callback))
    }

    // Untyped half of `request`, shared by every request type
    async fn request_internal(
        &self,
        method: &'static str,
        message: Value,
    ) -> Result<Option<Value>, RequestError> {
        if self.closed() {
            return Err(RequestError::ChannelClosed);
        }

        let (result_sender, result_receiver) = async_oneshot::oneshot();
        let requests_container = &self.inner.requests_container;

        let (id, queue_len) = requests_container.lock().insert(result_sender);

        debug!("request() [method:{}, id:{}]", method, id);

        let serialized_message = serde_json::to_vec(&RequestMessagePrivate {
            id,
            method,
            message: &message,
        })
        .map_err(|error| {
            requests_container.lock().remove(id);
            RequestError::FailedToParse {
                error: Box::new(error),
            }
        })?;

        if serialized_message.len() > NS_PAYLOAD_MAX_LEN {
            requests_container.lock().remove(id);
            return Err(RequestError::MessageTooLong);
        }

        trace!("sending request: {}", String::from_utf8_lossy(&serialized_message));

        if self.inner.sender.send(serialized_message).await.is_err() {
            requests_container.lock().remove(id);
            return Err(RequestError::ChannelClosed);
        }

        let timeout = request_timeout(self.inner.request_timeout, queue_len);
        let result = wait_for_response(requests_container, result_receiver, id, timeout).await;

        match &result {
            Ok(_) => {
                debug!("request succeeded [method:{}, id:{}]", method, id);
            }
            Err(error) => {
                debug!("request failed [method:{}, id:{}]: {}", method, id, error);
            }
        }

        result
    }
}

async fn read_messages<R>(
    reader: R,
    requests_container: &Mutex<RequestsContainer>,
    event_handlers_weak: &WeakEventHandlers<Value>,
    internal_message_sender: &async_channel::Sender<InternalMessage>,
) -> io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut reader = NetstringReader::new(reader, NS_PAYLOAD_MAX_LEN);

    while let Some(bytes) = reader.next_frame().await? {
        trace!("received raw message: {}", String::from_utf8_lossy(bytes));

        let internal_message = match deserialize_message(bytes) {
            ChannelReceiveMessage::Json(message) => {
                let event_handlers = match event_handlers_weak.upgrade() {
                    Some(event_handlers) => event_handlers,
                    None => break,
                };
                match handle_json_message(message, requests_container, &event_handlers) {
                    Ok(()) => continue,
                    Err(internal_message) => internal_message,
                }
            }
            ChannelReceiveMessage::Internal(internal_message) => internal_message,
        };

        if internal_message_sender.send(internal_message).await.is_err() {
            break;
        }
    }

    Ok(())
}
