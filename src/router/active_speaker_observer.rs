//! Dominant speaker detection among a set of audio producers.

use crate::data_structures::AppData;
use crate::producer::{Producer, ProducerId};
use crate::router::Router;
use crate::router::rtp_observer::ObserverCore;
use crate::rtp_observer::RtpObserverId;
use event_listener_primitives::{Bag, HandlerId};
use log::warn;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// What [`Router::create_active_speaker_observer`] needs.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct ActiveSpeakerObserverOptions {
    /// Speech activity sampling interval in ms. Default 300.
    pub interval: u16,
    /// Application data.
    #[serde(skip)]
    pub app_data: AppData,
}

impl Default for ActiveSpeakerObserverOptions {
    fn default() -> Self {
        Self {
            interval: 300,
            app_data: AppData::default(),
        }
    }
}

/// Producer that became the dominant speaker.
#[derive(Debug, Clone)]
pub struct ActiveSpeakerObserverDominantSpeaker {
    pub producer: Producer,
}

#[derive(Default)]
#[allow(clippy::type_complexity)]
struct Handlers {
    dominant_speaker: Bag<
        Arc<dyn Fn(&ActiveSpeakerObserverDominantSpeaker) + Send + Sync>,
        ActiveSpeakerObserverDominantSpeaker,
    >,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase", content = "data")]
enum Notification {
    #[serde(rename_all = "camelCase")]
    DominantSpeaker { producer_id: ProducerId },
}

struct Inner {
    core: ObserverCore,
    handlers: Arc<Handlers>,
}

/// Tells which of the observed audio producers is speaking, reporting only changes.
#[derive(Clone)]
#[must_use = "Active speaker observer will be closed on drop, make sure to keep it around for as \
long as needed"]
pub struct ActiveSpeakerObserver {
    inner: Arc<Inner>,
}

impl fmt::Debug for ActiveSpeakerObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveSpeakerObserver")
            .field("core", &self.inner.core)
            .finish()
    }
}

impl_rtp_observer!(ActiveSpeakerObserver);

impl ActiveSpeakerObserver {
    pub(super) fn new(id: RtpObserverId, app_data: AppData, router: Router) -> Self {
        let handlers = Arc::<Handlers>::default();
        let core = ObserverCore::new(id, router, app_data);

        core.lifecycle().keep({
            let router = core.router().downgrade();
            let handlers = Arc::clone(&handlers);

            core.link().subscribe(
                id,
                move |Notification::DominantSpeaker { producer_id }: Notification| {
                    let producer = router
                        .upgrade()
                        .and_then(|router| router.get_producer(&producer_id));

                    match producer {
                        Some(producer) => {
                            handlers
                                .dominant_speaker
                                .call_simple(&ActiveSpeakerObserverDominantSpeaker { producer });
                        }
                        None => {
                            warn!("dominant speaker {} is not in the router", producer_id);
                        }
                    }
                },
            )
        });

        Self {
            inner: Arc::new(Inner { core, handlers }),
        }
    }

    /// Another producer became the dominant speaker.
    pub fn on_dominant_speaker<
        F: Fn(&ActiveSpeakerObserverDominantSpeaker) + Send + Sync + 'static,
    >(
        &self,
        callback: F,
    ) -> HandlerId {
        self.inner.handlers.dominant_speaker.add(Arc::new(callback))
    }

    pub fn close(&self) {
        self.inner.core.close();
    }

    pub(super) fn router_closed(&self) {
        self.inner.core.router_closed();
    }
}

weak_handle!(
    /// Handle that doesn't keep the observer open.
    WeakActiveSpeakerObserver => ActiveSpeakerObserver
);
