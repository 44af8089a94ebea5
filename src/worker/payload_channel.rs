
use crate::messages::{Notification, Request};
use crate::worker::channel::{
    parse_response, request_timeout, wait_for_response, RequestError, RequestsContainer,
    ResponseError,
};
use crate::worker::common::{
    write_netstring, EventHandlers, NetstringReader, SubscriptionHandler, SubscriptionTarget,
    WeakEventHandlers, NS_PAYLOAD_MAX_LEN,
};
use async_executor::Executor;
use bytes::Bytes;
use futures_lite::{future, AsyncRead, AsyncWrite, AsyncWriteExt};
use log::{debug, error, trace, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
const CLOSE_GRACE_PERIOD: Duration = Duration::from_millis(200);

struct MessageWithPayload {
    message: Vec<u8>,
    payload: Bytes,
}

/// Notification that arrived together with its binary payload.
#[derive(Debug, Clone)]
pub(crate) struct NotificationMessage {
    /// Whole `{targetId, event, data}` notification.
    pub(crate) message: Value,
    pub(crate) payload: Bytes,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PayloadChannelReceiveMessage {
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

/// Notification waiting for its payload frame.
struct OngoingNotification {
    target_id: SubscriptionTarget,
    message: Value,
}

/// Interprets `bytes` as a notification header, if it looks like one.
fn notification_from_value(message: Value) -> Option<OngoingNotification> {
    if !message.get("event").map_or(false, Value::is_string) {
        return None;
    }
    let target_id = SubscriptionTarget::from_notification(&message)?;

    Some(OngoingNotification { target_id, message })
}

/// Failure of a payload channel notification.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum NotificationError {
    /// Channel already closed.
    #[error("Channel already closed")]
    ChannelClosed,
    /// Message or payload exceeds maximum frame size.
    #[error("Message is too long")]
    MessageTooLong,
}

#[derive(Debug, Serialize)]
struct RequestMessagePrivate<'a> {
    id: u32,
    method: &'static str,
    #[serde(flatten)]
    message: &'a Value,
}

#[derive(Debug, Serialize)]
struct NotificationMessagePrivate<'a> {
    event: &'static str,
    #[serde(flatten)]
    message: &'a Value,
}

struct Inner {
    sender: async_channel::Sender<MessageWithPayload>,
    requests_container: Arc<Mutex<RequestsContainer>>,
    event_handlers: EventHandlers<NotificationMessage>,
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

/// Sibling of the control channel where every notification or request is followed by a frame
/// with binary payload.
#[derive(Clone)]
pub(crate) struct PayloadChannel {
    inner: Arc<Inner>,
}

impl PayloadChannel {
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
        mut writer: W,
        request_timeout: Duration,
    ) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let requests_container = Arc::<Mutex<RequestsContainer>>::default();
        let event_handlers = EventHandlers::<NotificationMessage>::new();
        let (shutdown_sender, shutdown_receiver) = async_channel::bounded::<()>(1);

        {
            let requests_container = Arc::clone(&requests_container);
            let event_handlers_weak = event_handlers.downgrade();

            executor
                .spawn(async move {
                    let read_loop = read_messages(reader, &requests_container, &event_handlers_weak);
                    let shutdown = async {
                        let _ = shutdown_receiver.recv().await;
                        async_io::Timer::after(CLOSE_GRACE_PERIOD).await;
                        Ok(())
                    };

                    if let Err(error) = future::or(read_loop, shutdown).await {
                        debug!("payload channel read failed: {}", error);
                    }
                    requests_container.lock().clear();
                })
                .detach();
        }

        let sender = {
            let (sender, receiver) = async_channel::bounded::<MessageWithPayload>(1);

            executor
                .spawn(async move {
                    let mut bytes = Vec::with_capacity(1024);
                    while let Ok(message) = receiver.recv().await {
                        bytes.clear();
                        write_netstring(&mut bytes, &message.message);
                        write_netstring(&mut bytes, &message.payload);

                        writer.write_all(&bytes).await?;
                    }

                    writer.close().await
                })
                .detach();

            sender
        };

        let inner = Arc::new(Inner {
            sender,
            requests_container,
            event_handlers,
            shutdown_sender,
            request_timeout,
            closed: AtomicBool::new(false),
        });

        Self { inner }
    }

    pub(crate) fn closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn close(&self) {
        debug!("close()");

        self.inner.close();
    }

    pub(crate) async fn request<R>(
        &self,
        request: R,
        payload: Bytes,
    ) -> Result<R::Response, RequestError>
    where
        R: Request,
    {
        let method = request.as_method();
        let message = serde_json::to_value(&request).map_err(|error| {
            RequestError::FailedToParse {
                error: Box::new(error),
            }
        })?;
        let data = self.request_internal(method, message, payload).await?;

        parse_response(data)
    }

    pub(crate) async fn notify<N>(
        &self,
        notification: N,
        payload: Bytes,
    ) -> Result<(), NotificationError>
    where
        N: Notification,
    {
        let event = notification.as_event();

        debug!("notify() [event:{}]", event);

        if self.closed() {
            return Err(NotificationError::ChannelClosed);
        }

        let message = serde_json::to_value(&notification)
            .and_then(|message| {
                serde_json::to_vec(&NotificationMessagePrivate {
                    event,
                    message: &message,
                })
            })
            .map_err(|error| {
                error!("failed to serialize notification [event:{}]: {}", event, error);
                NotificationError::MessageTooLong
            })?;

        if message.len() > NS_PAYLOAD_MAX_LEN || payload.len() > NS_PAYLOAD_MAX_LEN {
            return Err(NotificationError::MessageTooLong);
        }

        self.inner
            .sender
            .send(MessageWithPayload { message, payload })
            .await
            .map_err(|_| NotificationError::ChannelClosed)
    }

    pub(crate) fn subscribe_to_notifications<F>(
        &self,
        target_id: SubscriptionTarget,
        callback: F,
    ) -> SubscriptionHandler
    where
        F: Fn(NotificationMessage) + Send + Sync + 'static,
    {
        self.inner
            .event_handlers
            .add(target_id, Box::new(callback))
    }

    async fn request_internal(
        &self,
        method: &'static str,
        message: Value,
        payload: Bytes,
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

        if serialized_message.len() > NS_PAYLOAD_MAX_LEN || payload.len() > NS_PAYLOAD_MAX_LEN {
            requests_container.lock().remove(id);
            return Err(RequestError::MessageTooLong);
        }

        let sent = self
            .inner
            .sender
            .send(MessageWithPayload {
                message: serialized_message,
                payload,
            })
            .await;
        if sent.is_err() {
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
    event_handlers_weak: &WeakEventHandlers<NotificationMessage>,
) -> io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut reader = NetstringReader::new(reader, NS_PAYLOAD_MAX_LEN);
    let mut ongoing_notification = Option::<OngoingNotification>::None;

    while let Some(bytes) = reader.next_frame().await? {
        let event_handlers = match event_handlers_weak.upgrade() {
            Some(event_handlers) => event_handlers,
            None => break,
        };

        match ongoing_notification.take() {
            // Frame right after a notification header is its payload, whatever it looks like
            Some(notification) => {
                trace!("received notification payload of {} bytes", bytes.len());

                let OngoingNotification { target_id, message } = notification;
                let delivered = event_handlers.call_callbacks_with_value(
                    &target_id,
                    NotificationMessage {
                        message,
                        payload: Bytes::copy_from_slice(bytes),
                    },
                );
                if !delivered {
                    debug!("notification without subscribers [target_id:{:?}]", target_id);
                }
            }
            None => {
                trace!("received raw message: {}", String::from_utf8_lossy(bytes));

                if bytes.first() != Some(&b'{') {
                    warn!("unexpected data on payload channel ({} bytes)", bytes.len());
                    continue;
                }

                match serde_json::from_slice::<PayloadChannelReceiveMessage>(bytes) {
                    Ok(PayloadChannelReceiveMessage::ResponseSuccess { id, data, .. }) => {
                        requests_container.lock().resolve(id, Ok(data));
                    }
                    Ok(PayloadChannelReceiveMessage::ResponseError { id, reason }) => {
                        requests_container
                            .lock()
                            .resolve(id, Err(ResponseError { reason }));
                    }
                    Ok(PayloadChannelReceiveMessage::Notification(message)) => {
                        match notification_from_value(message) {
                            Some(notification) => {
                                ongoing_notification = Some(notification);
                            }
                            None => {
                                error!("received data is not a notification nor a response");
                            }
                        }
                    }
                    Err(error) => {
                        error!("received invalid data from the worker process: {}", error);
                    }
                }
            }
        }
    }

    Ok(())
}
