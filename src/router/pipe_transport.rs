use crate::data_structures::{AppData, SctpState, TransportListenIp, TransportTuple};
use crate::messages::{self, RemoteAddressData};
use crate::router::resource::parse_notification;
use crate::router::transport::{TransportCore, TransportKind};
use crate::router::Router;
use crate::sctp_parameters::{NumSctpStreams, SctpParameters};
use crate::srtp_parameters::SrtpParameters;
use crate::transport::TransportId;
use crate::worker::RequestError;
use event_listener_primitives::{Bag, HandlerId};
use log::debug;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

/// What [`Router::create_pipe_transport`] needs. Both ends of a pipe must agree on `enable_rtx`
/// and `enable_srtp`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct PipeTransportOptions {
    pub listen_ip: TransportListenIp,
    /// Default false.
    pub enable_sctp: bool,
    pub num_sctp_streams: NumSctpStreams,
    /// Default 268435456.
    pub max_sctp_message_size: u32,
    /// Default 268435456.
    pub sctp_send_buffer_size: u32,
    /// Retransmit lost packets with RTX and NACK, worth it when the routers are on different
    /// hosts. Default false.
    pub enable_rtx: bool,
    /// Encrypt media between the two ends. Default false.
    pub enable_srtp: bool,
    /// Application data.
    #[serde(skip)]
    pub app_data: AppData,
}

impl PipeTransportOptions {
    #[must_use]
    pub fn new(listen_ip: TransportListenIp) -> Self {
        Self {
            listen_ip,
            enable_sctp: false,
            num_sctp_streams: NumSctpStreams::default(),
            max_sctp_message_size: 268_435_456,
            sctp_send_buffer_size: 268_435_456,
            enable_rtx: false,
            enable_srtp: false,
            app_data: AppData::default(),
        }
    }
}

/// Address of the other end of the pipe, see [`PipeTransport::connect`].
#[derive(Debug, Clone)]
pub struct PipeTransportRemoteParameters {
    pub ip: IpAddr,
    pub port: u16,
    /// Keys the other end encrypts with, needed when SRTP is enabled.
    pub srtp_parameters: Option<SrtpParameters>,
}

/// Tuple and SCTP state reported on creation and kept current by notifications.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PipeTransportState {
    tuple: TransportTuple,
    #[serde(default)]
    sctp_parameters: Option<SctpParameters>,
    #[serde(default)]
    sctp_state: Option<SctpState>,
    #[serde(default)]
    rtx: bool,
    #[serde(default)]
    srtp_parameters: Option<SrtpParameters>,
}

#[derive(Default)]
#[allow(clippy::type_complexity)]
struct Handlers {
    sctp_state_change: Bag<Arc<dyn Fn(SctpState) + Send + Sync>>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase", content = "data")]
enum Notification {
    #[serde(rename_all = "camelCase")]
    SctpStateChange { sctp_state: SctpState },
}

struct Inner {
    core: TransportCore,
    state: Arc<Mutex<PipeTransportState>>,
    handlers: Arc<Handlers>,
}

/// One end of a link between two routers, possibly in different workers or on different hosts.
/// Created in pairs by [`Router::pipe_producer_to_router`] and
/// [`Router::pipe_data_producer_to_router`].
#[derive(Clone)]
#[must_use = "Transport will be closed on drop, make sure to keep it around for as long as needed"]
pub struct PipeTransport {
    inner: Arc<Inner>,
}

impl fmt::Debug for PipeTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipeTransport")
            .field("core", &self.inner.core)
            .field("state", &*self.inner.state.lock())
            .finish()
    }
}

impl_transport!(PipeTransport);

impl PipeTransport {
    pub(super) fn new(
        id: TransportId,
        state: PipeTransportState,
        app_data: AppData,
        router: Router,
    ) -> Self {
        let handlers = Arc::<Handlers>::default();
        let kind = TransportKind::Pipe { rtx: state.rtx };
        let sctp_parameters = state.sctp_parameters;
        let state = Arc::new(Mutex::new(state));

        let core = TransportCore::new(id, kind, router, app_data, sctp_parameters.as_ref(), {
            let state = Arc::clone(&state);
            let handlers = Arc::clone(&handlers);

            move |notification: Value| {
                if let Some(Notification::SctpStateChange { sctp_state }) =
                    parse_notification(notification)
                {
                    state.lock().sctp_state = Some(sctp_state);
                    handlers.sctp_state_change.call(|callback| callback(sctp_state));
                }
            }
        });

        Self {
            inner: Arc::new(Inner {
                core,
                state,
                handlers,
            }),
        }
    }

    #[must_use]
    pub fn tuple(&self) -> TransportTuple {
        self.inner.state.lock().tuple
    }

    #[must_use]
    pub fn sctp_parameters(&self) -> Option<SctpParameters> {
        self.inner.state.lock().sctp_parameters
    }

    #[must_use]
    pub fn sctp_state(&self) -> Option<SctpState> {
        self.inner.state.lock().sctp_state
    }

    /// Whether lost packets are retransmitted, consumers created here then keep RTX.
    #[must_use]
    pub fn rtx(&self) -> bool {
        self.inner.state.lock().rtx
    }

    /// Local SRTP parameters the other end must decrypt with.
    #[must_use]
    pub fn srtp_parameters(&self) -> Option<SrtpParameters> {
        self.inner.state.lock().srtp_parameters.clone()
    }

    /// Points this end at the other one.
    pub async fn connect(
        &self,
        remote_parameters: PipeTransportRemoteParameters,
    ) -> Result<(), RequestError> {
        debug!("connect()");

        let PipeTransportRemoteParameters {
            ip,
            port,
            srtp_parameters,
        } = remote_parameters;

        let reply = self
            .inner
            .core
            .link()
            .request(messages::transport_connect_address(
                self.inner.core.target(),
                RemoteAddressData {
                    ip: Some(ip),
                    port: Some(port),
                    rtcp_port: None,
                    srtp_parameters,
                },
            ))
            .await?;

        if let Some(tuple) = reply.tuple {
            self.inner.state.lock().tuple = tuple;
        }

        Ok(())
    }

    pub fn on_sctp_state_change<F: Fn(SctpState) + Send + Sync + 'static>(
        &self,
        callback: F,
    ) -> HandlerId {
        self.inner.handlers.sctp_state_change.add(Arc::new(callback))
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
    WeakPipeTransport => PipeTransport
);
