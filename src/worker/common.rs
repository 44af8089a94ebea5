use futures_lite::io::{self as lite_io, BufReader};
use futures_lite::{AsyncBufReadExt, AsyncRead, AsyncReadExt};
use log::warn;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Weak};
use uuid::Uuid;

// Netstring payload limit, same for both channels.
pub(super) const NS_PAYLOAD_MAX_LEN: usize = 4194304;

struct EventHandlersList<V: Clone + 'static> {
    index: usize,
    #[allow(clippy::type_complexity)]
    callbacks: HashMap<usize, Arc<dyn Fn(V) + Send + Sync>>,
}

impl<V: Clone + 'static> Default for EventHandlersList<V> {
    fn default() -> Self {
        Self {
            index: 0,
            callbacks: HashMap::new(),
        }
    }
}

/// Notification dispatch table keyed by the id of the object notifications are about.
#[derive(Clone)]
pub(super) struct EventHandlers<V: Clone + 'static> {
    handlers: Arc<Mutex<HashMap<SubscriptionTarget, EventHandlersList<V>>>>,
}

impl<V: Clone + 'static> EventHandlers<V> {
    pub(super) fn new() -> Self {
        let handlers = Arc::<Mutex<HashMap<SubscriptionTarget, EventHandlersList<V>>>>::default();
        Self { handlers }
    }

    pub(super) fn add(
        &self,
        target_id: SubscriptionTarget,
        callback: Box<dyn Fn(V) + Send + Sync + 'static>,
    ) -> SubscriptionHandler {
        let index = {
            let mut event_handlers = self.handlers.lock();
            let list = event_handlers.entry(target_id).or_default();
            let index = list.index;
            list.index += 1;
            list.callbacks.insert(index, Arc::from(callback));
            index
        };

        SubscriptionHandler::new({
            let event_handlers_weak = Arc::downgrade(&self.handlers);

            Box::new(move || {
                if let Some(event_handlers) = event_handlers_weak.upgrade() {
                    // Removed callback is dropped after the lock is released: it may own another
                    // subscription handler whose removal needs the same lock.
                    let removed_handler = {
                        let mut handlers = event_handlers.lock();
                        let (removed_handler, is_empty) = match handlers.get_mut(&target_id) {
                            Some(list) => {
                                let removed_handler = list.callbacks.remove(&index);
                                (removed_handler, list.callbacks.is_empty())
                            }
                            None => (None, false),
                        };
                        if is_empty {
                            handlers.remove(&target_id);
                        }
                        removed_handler
                    };
                    drop(removed_handler);
                }
            })
        })
    }

    /// Returns `false` if nobody is subscribed to `target_id`.
    pub(super) fn call_callbacks_with_value(&self, target_id: &SubscriptionTarget, value: V) -> bool {
        let callbacks = match self.handlers.lock().get(target_id) {
            Some(list) => list.callbacks.values().cloned().collect::<Vec<_>>(),
            None => return false,
        };
        // Mutex guard is already dropped here, callbacks are free to (un)subscribe
        if let Some((last, rest)) = callbacks.split_last() {
            for callback in rest {
                callback(value.clone());
            }
            last(value);
        }
        true
    }

    pub(super) fn downgrade(&self) -> WeakEventHandlers<V> {
        WeakEventHandlers {
            handlers: Arc::downgrade(&self.handlers),
        }
    }
}

#[derive(Clone)]
pub(super) struct WeakEventHandlers<V: Clone + 'static> {
    handlers: Weak<Mutex<HashMap<SubscriptionTarget, EventHandlersList<V>>>>,
}

impl<V: Clone + 'static> WeakEventHandlers<V> {
    pub(super) fn upgrade(&self) -> Option<EventHandlers<V>> {
        self.handlers
            .upgrade()
            .map(|handlers| EventHandlers { handlers })
    }
}

/// Id a notification is addressed to: an object id or the worker pid.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub(crate) enum SubscriptionTarget {
    Uuid(Uuid),
    Number(u32),
}

impl From<u32> for SubscriptionTarget {
    fn from(number: u32) -> Self {
        Self::Number(number)
    }
}

impl SubscriptionTarget {
    /// Extracts `targetId` from a notification, which is either a UUID string or a number (also
    /// sent as a string by some engine versions).
    pub(super) fn from_notification(notification: &Value) -> Option<Self> {
        match notification.get("targetId")? {
            Value::String(target_id) => match target_id.parse::<Uuid>() {
                Ok(uuid) => Some(Self::Uuid(uuid)),
                Err(_) => target_id.parse::<u32>().ok().map(Self::Number),
            },
            Value::Number(number) => number
                .as_u64()
                .and_then(|number| u32::try_from(number).ok())
                .map(Self::Number),
            _ => None,
        }
    }
}

/// Keeps a notification callback registered, dropping it unregisters.
pub(crate) struct SubscriptionHandler {
    remove_callback: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl SubscriptionHandler {
    fn new(remove_callback: Box<dyn FnOnce() + Send + Sync>) -> Self {
        Self {
            remove_callback: Some(remove_callback),
        }
    }
}

impl Drop for SubscriptionHandler {
    fn drop(&mut self) {
        if let Some(remove_callback) = self.remove_callback.take() {
            remove_callback();
        }
    }
}

/// Appends `<len>:<message>,` to `bytes`.
pub(super) fn write_netstring(bytes: &mut Vec<u8>, message: &[u8]) {
    bytes.extend_from_slice(message.len().to_string().as_bytes());
    bytes.push(b':');
    bytes.extend_from_slice(message);
    bytes.push(b',');
}

/// Reads netstring frames one at a time from a byte stream.
pub(super) struct NetstringReader<R> {
    reader: BufReader<R>,
    len_bytes: Vec<u8>,
    buffer: Vec<u8>,
    max_len: usize,
}

impl<R: AsyncRead + Unpin> NetstringReader<R> {
    pub(super) fn new(reader: R, max_len: usize) -> Self {
        Self {
            reader: BufReader::new(reader),
            len_bytes: Vec::with_capacity(16),
            buffer: Vec::new(),
            max_len,
        }
    }

    /// Next frame payload, `None` on EOF or when the stream is no longer parseable.
    ///
    /// Frames longer than the limit are skipped with a warning.
    pub(super) async fn next_frame(&mut self) -> io::Result<Option<&[u8]>> {
        loop {
            self.len_bytes.clear();
            let read_bytes = self.reader.read_until(b':', &mut self.len_bytes).await?;
            if read_bytes == 0 || self.len_bytes.last() != Some(&b':') {
                return Ok(None);
            }

            let length = match std::str::from_utf8(&self.len_bytes[..read_bytes - 1])
                .ok()
                .and_then(|length| length.trim().parse::<usize>().ok())
            {
                Some(length) => length,
                None => {
                    warn!(
                        "invalid netstring length {:?}, stop reading",
                        String::from_utf8_lossy(&self.len_bytes),
                    );
                    return Ok(None);
                }
            };

            if length > self.max_len {
                warn!(
                    "received frame of {} bytes is too long, max supported is {}, skipping",
                    length, self.max_len,
                );
                // Payload plus the trailing comma
                let skip = (length + 1) as u64;
                let skipped =
                    lite_io::copy((&mut self.reader).take(skip), &mut lite_io::sink()).await?;
                if skipped < skip {
                    return Ok(None);
                }
                continue;
            }

            if self.buffer.len() < length + 1 {
                self.buffer.resize(length + 1, 0);
            }
            self.reader.read_exact(&mut self.buffer[..=length]).await?;
            if self.buffer[length] != b',' {
                warn!("netstring frame is not terminated with `,`");
            }

            return Ok(Some(&self.buffer[..length]));
        }
    }
}
