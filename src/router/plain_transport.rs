use crate::data_structures::{AppData, SctpState, TransportListenIp, TransportTuple};
use crate::messages::{self, RemoteAddressData};
use crate::router::resource::parse_notification;
use crate::router::transport::{TransportCore, TransportKind};
use crate::router::Router;
use crate::sctp_parameters::{NumSctpStreams, SctpParameters};
use crate::srtp_parameters::{SrtpCryptoSuite, SrtpParameters};
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

/// What [`Router::create_plain_transport`] needs.
///
/// With `comedia` the remote address is learned from the first packet that arrives, which only
/// works when the endpoint sends media. Endpoints that only receive call
/// [`PlainTransport::connect`] with their address instead.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct PlainTransportOptions {
    pub listen_ip: TransportListenIp,
    /// RTP and RTCP share one port. Default true.
    pub rtcp_mux: bool,
    /// Learn the remote address from incoming media. Default false.
    pub comedia: bool,
    /// Default false.
    pub enable_sctp: bool,
    pub num_sctp_streams: NumSctpStreams,
    /// Default 262144.
    pub max_sctp_message_size: u32,
    /// Default 262144.
    pub sctp_send_buffer_size: u32,
    /// Encrypt media, [`PlainTransport::connect`] then needs the remote SRTP parameters.
    /// Default false.
    pub enable_srtp: bool,
    /// Suite used when `enable_srtp` is set.
    pub srtp_crypto_suite: SrtpCryptoSuite,
    /// Application data.
    #[serde(skip)]
    pub app_data: AppData,
}

impl PlainTransportOptions {
    #[must_use]
    pub fn new(listen_ip: TransportListenIp) -> Self {
        Self {
            listen_ip,
            rtcp_mux: true,
            comedia: false,
            enable_sctp: false,
            num_sctp_streams: NumSctpStreams::default(),
            max_sctp_message_size: 262_144,
            sctp_send_buffer_size: 262_144,
            enable_srtp: false,
            srtp_crypto_suite: SrtpCryptoSuite::default(),
            app_data: AppData::default(),
        }
    }
}

/// Where the remote endpoint receives, see [`PlainTransport::connect`]. Address and ports are
/// left out in `comedia` mode, the RTCP port is only needed without RTCP-mux.
#[derive(Debug, Clone, Default)]
pub struct PlainTransportRemoteParameters {
    pub ip: Option<IpAddr>,
    pub port: Option<u16>,
    pub rtcp_port: Option<u16>,
    /// Keys the endpoint encrypts with, needed when SRTP is enabled.
    pub srtp_parameters: Option<SrtpParameters>,
}

/// Tuples and SCTP state reported on creation and kept current by notifications.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PlainTransportState {
    rtcp_mux: bool,
    comedia: bool,
    tuple: TransportTuple,
    #[serde(default)]
    rtcp_tuple: Option<TransportTuple>,
    #[serde(default)]
    sctp_parameters: Option<SctpParameters>,
    #[serde(default)]
    sctp_state: Option<SctpState>,
    #[serde(default)]
    srtp_parameters: Option<SrtpParameters>,
}

#[derive(Default)]
#[allow(clippy::type_complexity)]
struct Handlers {
    tuple: Bag<Arc<dyn Fn(&TransportTuple) + Send + Sync>, TransportTuple>,
    rtcp_tuple: Bag<Arc<dyn Fn(&TransportTuple) + Send + Sync>, TransportTuple>,
    sctp_state_change: Bag<Arc<dyn Fn(SctpState) + Send + Sync>>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase", content = "data")]
enum Notification {
    Tuple {
        tuple: TransportTuple,
    },
    #[serde(rename_all = "camelCase")]
    RtcpTuple {
        rtcp_tuple: TransportTuple,
    },
    #[serde(rename_all = "camelCase")]
    SctpStateChange {
        sctp_state: SctpState,
    },
}

fn apply(state: &Mutex<PlainTransportState>, handlers: &Handlers, notification: Notification) {
    match notification {
        Notification::Tuple { tuple } => {
            state.lock().tuple = tuple;
            handlers.tuple.call_simple(&tuple);
        }
        Notification::RtcpTuple { rtcp_tuple } => {
            state.lock().rtcp_tuple = Some(rtcp_tuple);
            handlers.rtcp_tuple.call_simple(&rtcp_tuple);
        }
        Notification::SctpStateChange { sctp_state } => {
            state.lock().sctp_state = Some(sctp_state);
            handlers.sctp_state_change.call(|callback| callback(sctp_state));
        }
    }
}

struct Inner {
    core: TransportCore,
    state: Arc<Mutex<PlainTransportState>>,
    handlers: Arc<Handlers>,
}

/// Plain RTP and RTCP over UDP, optionally with SRTP, for endpoints that don't speak ICE or DTLS
/// such as media servers, recorders and encoders. Can carry SCTP as well.
#[derive(Clone)]
#[must_use = "Transport will be closed on drop, make sure to keep it around for as long as needed"]
pub struct PlainTransport {
    inner: Arc<Inner>,
}

impl fmt::Debug for PlainTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlainTransport")
            .field("core", &self.inner.core)
            .field("state", &*self.inner.state.lock())
            .finish()
    }
}

impl_transport!(PlainTransport);

impl PlainTransport {
    pub(super) fn new(
        id: TransportId,
        state: PlainTransportState,
        app_data: AppData,
        router: Router,
    ) -> Self {
        let handlers = Arc::<Handlers>::default();
        let sctp_parameters = state.sctp_parameters;
        let state = Arc::new(Mutex::new(state));

        let core = TransportCore::new(
            id,
            TransportKind::Plain,
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

    #[must_use]
    pub fn rtcp_mux(&self) -> bool {
        self.inner.state.lock().rtcp_mux
    }

    #[must_use]
    pub fn comedia(&self) -> bool {
        self.inner.state.lock().comedia
    }

    /// Local address, plus the remote one once connected or learned.
    #[must_use]
    pub fn tuple(&self) -> TransportTuple {
        self.inner.state.lock().tuple
    }

    /// Separate RTCP tuple, only without RTCP-mux.
    #[must_use]
    pub fn rtcp_tuple(&self) -> Option<TransportTuple> {
        self.inner.state.lock().rtcp_tuple
    }

    #[must_use]
    pub fn sctp_parameters(&self) -> Option<SctpParameters> {
        self.inner.state.lock().sctp_parameters
    }

    #[must_use]
    pub fn sctp_state(&self) -> Option<SctpState> {
        self.inner.state.lock().sctp_state
    }

    /// Local SRTP parameters the endpoint must decrypt with.
    #[must_use]
    pub fn srtp_parameters(&self) -> Option<SrtpParameters> {
        self.inner.state.lock().srtp_parameters.clone()
    }

    /// Tells the engine where to send media and, with SRTP, how the endpoint encrypts.
    pub async fn connect(
        &self,
        remote_parameters: PlainTransportRemoteParameters,
    ) -> Result<(), RequestError> {
        debug!("connect()");

        let PlainTransportRemoteParameters {
            ip,
            port,
            rtcp_port,
            srtp_parameters,
        } = remote_parameters;

        let reply = self
            .inner
            .core
            .link()
            .request(messages::transport_connect_address(
                self.inner.core.target(),
                RemoteAddressData {
                    ip,
                    port,
                    rtcp_port,
                    srtp_parameters,
                },
            ))
            .await?;

        let mut state = self.inner.state.lock();
        if let Some(tuple) = reply.tuple {
            state.tuple = tuple;
        }
        if reply.rtcp_tuple.is_some() {
            state.rtcp_tuple = reply.rtcp_tuple;
        }
        if reply.srtp_parameters.is_some() {
            state.srtp_parameters = reply.srtp_parameters;
        }

        Ok(())
    }

    /// Remote address was learned from incoming media, `comedia` only.
    pub fn on_tuple<F: Fn(&TransportTuple) + Send + Sync + 'static>(
        &self,
        callback: F,
    ) -> HandlerId {
        self.inner.handlers.tuple.add(Arc::new(callback))
    }

    /// Remote RTCP address was learned from incoming RTCP, `comedia` without RTCP-mux only.
    pub fn on_rtcp_tuple<F: Fn(&TransportTuple) + Send + Sync + 'static>(
        &self,
        callback: F,
    ) -> HandlerId {
        self.inner.handlers.rtcp_tuple.add(Arc::new(callback))
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
    WeakPlainTransport => PlainTransport
);
