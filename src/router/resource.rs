use crate::messages::Request;
use crate::worker::{
    Channel, NotificationMessage, PayloadChannel, RequestError, SubscriptionHandler,
    SubscriptionTarget,
};
use async_executor::Executor;
use bytes::Bytes;
use event_listener_primitives::{BagOnce, HandlerId};
use log::error;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt::{self, Debug};
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Way to the engine every resource of one worker shares.
#[derive(Clone)]
pub(crate) struct EngineLink {
    executor: Arc<Executor<'static>>,
    channel: Channel,
    payload_channel: PayloadChannel,
}

impl Debug for EngineLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineLink").finish()
    }
}

impl EngineLink {
    pub(crate) fn new(
        executor: Arc<Executor<'static>>,
        channel: Channel,
        payload_channel: PayloadChannel,
    ) -> Self {
        Self {
            executor,
            channel,
            payload_channel,
        }
    }

    pub(crate) fn executor(&self) -> &Arc<Executor<'static>> {
        &self.executor
    }

    pub(crate) fn channel(&self) -> &Channel {
        &self.channel
    }

    pub(crate) fn payload_channel(&self) -> &PayloadChannel {
        &self.payload_channel
    }

    pub(crate) async fn request<R: Request>(&self, request: R) -> Result<R::Response, RequestError> {
        self.channel.request(request).await
    }

    /// Control channel notifications of one target, parsed into `N`. Notifications that don't
    /// parse are logged and skipped.
    pub(crate) fn subscribe<N, F>(
        &self,
        target: impl Into<SubscriptionTarget>,
        callback: F,
    ) -> SubscriptionHandler
    where
        N: DeserializeOwned,
        F: Fn(N) + Send + Sync + 'static,
    {
        self.channel
            .subscribe_to_notifications(target.into(), move |notification: Value| {
                if let Some(notification) = parse_notification(notification) {
                    callback(notification);
                }
            })
    }

    /// Same as [`EngineLink::subscribe`] for the payload channel, the payload is handed over
    /// together with the parsed notification.
    pub(crate) fn subscribe_payload<N, F>(
        &self,
        target: impl Into<SubscriptionTarget>,
        callback: F,
    ) -> SubscriptionHandler
    where
        N: DeserializeOwned,
        F: Fn(N, Bytes) + Send + Sync + 'static,
    {
        self.payload_channel
            .subscribe_to_notifications(target.into(), move |notification| {
                let NotificationMessage { message, payload } = notification;
                if let Some(notification) = parse_notification(message) {
                    callback(notification, payload);
                }
            })
    }

    /// Tells the engine to drop a resource without waiting for the outcome, failures are only
    /// logged.
    pub(crate) fn spawn_close<R>(&self, request: R)
    where
        R: Request + Send + 'static,
    {
        let channel = self.channel.clone();
        let method = request.as_method();

        self.executor
            .spawn(async move {
                if let Err(error) = channel.request(request).await {
                    error!("{} failed: {}", method, error);
                }
            })
            .detach();
    }
}

pub(crate) fn parse_notification<N: DeserializeOwned>(notification: Value) -> Option<N> {
    match serde_json::from_value(notification) {
        Ok(notification) => Some(notification),
        Err(error) => {
            error!("failed to parse notification: {}", error);
            None
        }
    }
}

/// Closed flag, close callbacks and engine subscriptions shared by every resource in the tree.
///
/// A resource closes once: either on its own (explicit close or drop of the last handle) or
/// because its parent went away, in which case parent close callbacks run first.
#[derive(Default)]
pub(crate) struct Lifecycle {
    closed: AtomicBool,
    close: BagOnce<Box<dyn FnOnce() + Send>>,
    parent_close: BagOnce<Box<dyn FnOnce() + Send>>,
    subscriptions: Mutex<Vec<SubscriptionHandler>>,
}

impl Debug for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lifecycle")
            .field("closed", &self.closed())
            .finish()
    }
}

impl Lifecycle {
    pub(crate) fn closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Keeps an engine subscription alive until close.
    pub(crate) fn keep(&self, subscription: SubscriptionHandler) {
        self.subscriptions.lock().push(subscription);
    }

    /// Runs in place when already closed.
    pub(crate) fn on_close<F: FnOnce() + Send + 'static>(&self, callback: F) -> HandlerId {
        let handler_id = self.close.add(Box::new(callback));
        if self.closed() {
            self.close.call_simple();
        }
        handler_id
    }

    pub(crate) fn on_parent_close<F: FnOnce() + Send + 'static>(&self, callback: F) -> HandlerId {
        self.parent_close.add(Box::new(callback))
    }

    /// Marks the resource closed and returns `true` for the call that did it. Subscriptions are
    /// dropped and `cleanup` runs before close callbacks.
    pub(crate) fn close<F: FnOnce()>(&self, cleanup: F) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }

        let subscriptions = mem::take(&mut *self.subscriptions.lock());
        drop(subscriptions);

        cleanup();
        self.close.call_simple();

        true
    }

    /// Same as [`Lifecycle::close`], preceded by parent close callbacks.
    pub(crate) fn parent_closed<F: FnOnce()>(&self, cleanup: F) -> bool {
        if self.closed() {
            return false;
        }

        self.parent_close.call_simple();
        self.close(cleanup)
    }
}
