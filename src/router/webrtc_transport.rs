use crate::data_structures::{
    AppData, DtlsParameters, DtlsRole, DtlsState, IceCandidate, IceParameters, IceRole, IceState,
    SctpState, TransportListenIp, TransportTuple,
};
use crate::messages::{self, BitrateData, WebRtcConnectData};
use crate::router::resource::parse_notification;
use crate::router::transport::{TransportCore, TransportKind};
use crate::router::Router;
use crate::sctp_parameters::{NumSctpStreams, SctpParameters};
use crate::transport::TransportId;
use crate::worker::RequestError;
use event_listener_primitives::{Bag, HandlerId};
use log::debug;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::convert::TryFrom;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use thiserror::Error;

/// At least one address to gather ICE candidates on, most preferred first.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct TransportListenIps(Vec<TransportListenIp>);

impl TransportListenIps {
    #[must_use]
    pub fn new(listen_ip: TransportListenIp) -> Self {
        Self(vec![listen_ip])
    }

    /// Appends a less preferred address.
    #[must_use]
    pub fn insert(mut self, listen_ip: TransportListenIp) -> Self {
        self.0.push(listen_ip);
        self
    }
}

impl Deref for TransportListenIps {
    type Target = [TransportListenIp];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Returned when building [`TransportListenIps`] out of nothing.
#[derive(Error, Debug, Eq, PartialEq)]
#[error("At least one listen IP is needed")]
pub struct EmptyListError;

impl TryFrom<Vec<TransportListenIp>> for TransportListenIps {
    type Error = EmptyListError;

    fn try_from(listen_ips: Vec<TransportListenIp>) -> Result<Self, Self::Error> {
        if listen_ips.is_empty() {
            return Err(EmptyListError);
        }

        Ok(Self(listen_ips))
    }
}

/// What [`Router::create_webrtc_transport`] needs.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct WebRtcTransportOptions {
    pub listen_ips: TransportListenIps,
    /// Default true.
    pub enable_udp: bool,
    /// Default false.
    pub enable_tcp: bool,
    /// Order UDP candidates first. Default false.
    pub prefer_udp: bool,
    /// Order TCP candidates first. Default false.
    pub prefer_tcp: bool,
    /// Bandwidth estimation starting point, in bps. Default 600000.
    pub initial_available_outgoing_bitrate: u32,
    /// Negotiate an SCTP association for data channels. Default false.
    pub enable_sctp: bool,
    pub num_sctp_streams: NumSctpStreams,
    /// Largest message a data producer may send. Default 262144.
    pub max_sctp_message_size: u32,
    /// Send buffer shared by the data consumers. Default 262144.
    pub sctp_send_buffer_size: u32,
    /// Application data.
    #[serde(skip)]
    pub app_data: AppData,
}

impl WebRtcTransportOptions {
    #[must_use]
    pub fn new(listen_ips: TransportListenIps) -> Self {
        Self {
            listen_ips,
            enable_udp: true,
            enable_tcp: false,
            prefer_udp: false,
            prefer_tcp: false,
            initial_available_outgoing_bitrate: 600_000,
            enable_sctp: false,
            num_sctp_streams: NumSctpStreams::default(),
            max_sctp_message_size: 262_144,
            sctp_send_buffer_size: 262_144,
            app_data: AppData::default(),
        }
    }
}

/// What the remote endpoint tells about its DTLS side, see [`WebRtcTransport::connect`].
#[derive(Debug, Clone)]
pub struct WebRtcTransportRemoteParameters {
    pub dtls_parameters: DtlsParameters,
}

/// ICE and DTLS state as reported on creation and kept current by notifications.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WebRtcTransportState {
    ice_role: IceRole,
    ice_parameters: IceParameters,
    ice_candidates: Vec<IceCandidate>,
    ice_state: IceState,
    #[serde(default)]
    ice_selected_tuple: Option<TransportTuple>,
    dtls_parameters: DtlsParameters,
    dtls_state: DtlsState,
    #[serde(default)]
    dtls_remote_cert: Option<String>,
    #[serde(default)]
    sctp_parameters: Option<SctpParameters>,
    #[serde(default)]
    sctp_state: Option<SctpState>,
}

#[derive(Default)]
#[allow(clippy::type_complexity)]
struct Handlers {
    ice_state_change: Bag<Arc<dyn Fn(IceState) + Send + Sync>>,
    ice_selected_tuple_change: Bag<Arc<dyn Fn(&TransportTuple) + Send + Sync>, TransportTuple>,
    dtls_state_change: Bag<Arc<dyn Fn(DtlsState) + Send + Sync>>,
    sctp_state_change: Bag<Arc<dyn Fn(SctpState) + Send + Sync>>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase", content = "data")]
enum Notification {
    #[serde(rename_all = "camelCase")]
    IceStateChange { ice_state: IceState },
    #[serde(rename_all = "camelCase")]
    IceSelectedTupleChange { ice_selected_tuple: TransportTuple },
    #[serde(rename_all = "camelCase")]
    DtlsStateChange {
        dtls_state: DtlsState,
        dtls_remote_cert: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    SctpStateChange { sctp_state: SctpState },
}

fn apply(state: &Mutex<WebRtcTransportState>, handlers: &Handlers, notification: Notification) {
    match notification {
        Notification::IceStateChange { ice_state } => {
            state.lock().ice_state = ice_state;
            handlers.ice_state_change.call(|callback| callback(ice_state));
        }
        Notification::IceSelectedTupleChange { ice_selected_tuple } => {
            state.lock().ice_selected_tuple = Some(ice_selected_tuple);
            handlers
                .ice_selected_tuple_change
                .call_simple(&ice_selected_tuple);
        }
        Notification::DtlsStateChange {
            dtls_state,
            dtls_remote_cert,
        } => {
            {
                let mut state = state.lock();
                state.dtls_state = dtls_state;
                if dtls_remote_cert.is_some() {
                    state.dtls_remote_cert = dtls_remote_cert;
                }
            }
            handlers.dtls_state_change.call(|callback| callback(dtls_state));
        }
        Notification::SctpStateChange { sctp_state } => {
            state.lock().sctp_state = Some(sctp_state);
            handlers.sctp_state_change.call(|callback| callback(sctp_state));
        }
    }
}

struct Inner {
    core: TransportCore,
    state: Arc<Mutex<WebRtcTransportState>>,
    handlers: Arc<Handlers>,
}

/// Network path to a WebRTC endpoint, set up with ICE and secured with DTLS. Media and data
/// can flow both ways.
#[derive(Clone)]
#[must_use = "Transport will be closed on drop, make sure to keep it around for as long as needed"]
pub struct WebRtcTransport {
    inner: Arc<Inner>,
}

impl fmt::Debug for WebRtcTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebRtcTransport")
            .field("core", &self.inner.core)
            .field("state", &*self.inner.state.lock())
            .finish()
    }
}

impl_transport!(WebRtcTransport);

impl WebRtcTransport {
    pub(super) fn new(
        id: TransportId,
        state: WebRtcTransportState,
        app_data: AppData,
        router: Router,
    ) -> Self {
        let handlers = Arc::<Handlers>::default();
        let sctp_parameters = state.sctp_parameters;
        let state = Arc::new(Mutex::new(state));

        let core = TransportCore::new(
            id,
            TransportKind::WebRtc,
            router,
            app_data,
            sctp_parameters.as_ref(),
            {
                let state = Arc::clone(&state);
                let handlers = Arc::clone(&handlers);

                move |notification: Value| {
                    if let Some(notification) = parse_notification(notification) {
                        apply(&state, &handlers, notification);
                    }
                }
            },
        );

        Self {
            inner: Arc::new(Inner {
                core,
                state,
                handlers,
            }),
        }
    }

    /// Always `controlled`, the engine is ICE Lite.
    #[must_use]
    pub fn ice_role(&self) -> IceRole {
        self.inner.state.lock().ice_role
    }

    /// Local ICE parameters, updated by [`WebRtcTransport::restart_ice`].
    #[must_use]
    pub fn ice_parameters(&self) -> IceParameters {
        self.inner.state.lock().ice_parameters.clone()
    }

    #[must_use]
    pub fn ice_candidates(&self) -> Vec<IceCandidate> {
        self.inner.state.lock().ice_candidates.clone()
    }

    #[must_use]
    pub fn ice_state(&self) -> IceState {
        self.inner.state.lock().ice_state
    }

    /// Tuple media flows over once ICE has picked one.
    #[must_use]
    pub fn ice_selected_tuple(&self) -> Option<TransportTuple> {
        self.inner.state.lock().ice_selected_tuple
    }

    /// Local DTLS parameters, the role is updated on connect.
    #[must_use]
    pub fn dtls_parameters(&self) -> DtlsParameters {
        self.inner.state.lock().dtls_parameters.clone()
    }

    #[must_use]
    pub fn dtls_state(&self) -> DtlsState {
        self.inner.state.lock().dtls_state
    }

    /// PEM certificate of the remote endpoint, known once DTLS is connected.
    #[must_use]
    pub fn dtls_remote_cert(&self) -> Option<String> {
        self.inner.state.lock().dtls_remote_cert.clone()
    }

    #[must_use]
    pub fn sctp_parameters(&self) -> Option<SctpParameters> {
        self.inner.state.lock().sctp_parameters
    }

    #[must_use]
    pub fn sctp_state(&self) -> Option<SctpState> {
        self.inner.state.lock().sctp_state
    }

    /// Hands the remote DTLS parameters to the engine, which then takes the opposite DTLS role.
    pub async fn connect(
        &self,
        remote_parameters: WebRtcTransportRemoteParameters,
    ) -> Result<(), RequestError> {
        debug!("connect()");

        let reply = self
            .inner
            .core
            .link()
            .request(messages::transport_connect_webrtc(
                self.inner.core.target(),
                WebRtcConnectData {
                    dtls_parameters: remote_parameters.dtls_parameters,
                },
            ))
            .await?;

        let local_role: DtlsRole = reply.dtls_local_role;
        self.inner.state.lock().dtls_parameters.role = local_role;

        Ok(())
    }

    /// Caps the bitrate sent to the endpoint, in bps.
    pub async fn set_max_outgoing_bitrate(&self, bitrate: u32) -> Result<(), RequestError> {
        debug!("set_max_outgoing_bitrate() [bitrate:{}]", bitrate);

        self.inner
            .core
            .link()
            .request(messages::transport_set_max_outgoing_bitrate(
                self.inner.core.target(),
                BitrateData { bitrate },
            ))
            .await
    }

    /// Generates new local ICE credentials and returns them.
    pub async fn restart_ice(&self) -> Result<IceParameters, RequestError> {
        debug!("restart_ice()");

        let reply = self
            .inner
            .core
            .link()
            .request(messages::transport_restart_ice(self.inner.core.target()))
            .await?;

        self.inner.state.lock().ice_parameters = reply.ice_parameters.clone();

        Ok(reply.ice_parameters)
    }

    pub fn on_ice_state_change<F: Fn(IceState) + Send + Sync + 'static>(
        &self,
        callback: F,
    ) -> HandlerId {
        self.inner.handlers.ice_state_change.add(Arc::new(callback))
    }

    /// ICE picked another tuple, typically after a network change on the endpoint.
    pub fn on_ice_selected_tuple_change<F: Fn(&TransportTuple) + Send + Sync + 'static>(
        &self,
        callback: F,
    ) -> HandlerId {
        self.inner
            .handlers
            .ice_selected_tuple_change
            .add(Arc::new(callback))
    }

    pub fn on_dtls_state_change<F: Fn(DtlsState) + Send + Sync + 'static>(
        &self,
        callback: F,
    ) -> HandlerId {
        self.inner.handlers.dtls_state_change.add(Arc::new(callback))
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
    WeakWebRtcTransport => WebRtcTransport
);
