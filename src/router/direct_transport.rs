use crate::data_structures::AppData;
use crate::messages;
use crate::router::transport::{TransportCore, TransportKind};
use crate::router::Router;
use crate::transport::TransportId;
use crate::worker::NotificationError;
use bytes::Bytes;
use event_listener_primitives::{Bag, HandlerId};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// What [`Router::create_direct_transport`] needs.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct DirectTransportOptions {
    /// Largest message a direct data producer may send. Default 262144.
    pub max_message_size: u32,
    /// Application data.
    #[serde(skip)]
    pub app_data: AppData,
}

impl Default for DirectTransportOptions {
    fn default() -> Self {
        Self {
            max_message_size: 262_144,
            app_data: AppData::default(),
        }
    }
}

#[derive(Default)]
#[allow(clippy::type_complexity)]
struct Handlers {
    rtcp: Bag<Arc<dyn Fn(&Bytes) + Send + Sync>, Bytes>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase", content = "data")]
enum PayloadNotification {
    Rtcp,
}

struct Inner {
    core: TransportCore,
    handlers: Arc<Handlers>,
}

/// Transport between the router and the application itself, no network involved. Media and data
/// messages are sent and received through the producers and consumers created on it.
#[derive(Clone)]
#[must_use = "Transport will be closed on drop, make sure to keep it around for as long as needed"]
pub struct DirectTransport {
    inner: Arc<Inner>,
}

impl fmt::Debug for DirectTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectTransport")
            .field("core", &self.inner.core)
            .finish()
    }
}

impl_transport!(DirectTransport);

impl DirectTransport {
    pub(super) fn new(id: TransportId, app_data: AppData, router: Router) -> Self {
        let handlers = Arc::<Handlers>::default();

        let core = TransportCore::new(
            id,
            TransportKind::Direct,
            router,
            app_data,
            None,
            |notification: Value| {
                warn!("unexpected notification {}", notification["event"]);
            },
        );

        core.lifecycle().keep({
            let handlers = Arc::clone(&handlers);

            core.link().subscribe_payload(
                id,
                move |_rtcp: PayloadNotification, packet: Bytes| {
                    handlers.rtcp.call_simple(&packet);
                },
            )
        });

        Self {
            inner: Arc::new(Inner { core, handlers }),
        }
    }

    /// Injects an RTCP packet as if it came from an endpoint.
    pub async fn send_rtcp(&self, rtcp_packet: Bytes) -> Result<(), NotificationError> {
        debug!("send_rtcp()");

        self.inner
            .core
            .link()
            .payload_channel()
            .notify(
                messages::transport_send_rtcp(self.inner.core.target()),
                rtcp_packet,
            )
            .await
    }

    /// RTCP the router sends towards this transport.
    pub fn on_rtcp<F: Fn(&Bytes) + Send + Sync + 'static>(&self, callback: F) -> HandlerId {
        self.inner.handlers.rtcp.add(Arc::new(callback))
    }

    /// Closes the transport and everything created on it.
    pub fn close(&self) {
        self.inner.core.close();
    }

    pub(super) fn router_closed(&self) {
        self.inner.core.router_closed();
    }
}

weak_handle!(
    /// Handle that doesn't keep the transport open.
    WeakDirectTransport => DirectTransport
);
