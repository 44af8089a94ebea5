//! Volume reports for a set of audio producers.

use crate::data_structures::AppData;
use crate::producer::{Producer, ProducerId};
use crate::router::{Router, WeakRouter};
use crate::router::rtp_observer::ObserverCore;
use crate::rtp_observer::RtpObserverId;
use event_listener_primitives::{Bag, HandlerId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroU16;
use std::sync::Arc;

/// What [`Router::create_audio_level_observer`] needs.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct AudioLevelObserverOptions {
    /// Producers reported in one volumes event at most. Default 1.
    pub max_entries: NonZeroU16,
    /// Quietest average volume reported, in dBov from -127 to 0. Default -80.
    pub threshold: i8,
    /// Reporting interval in ms. Default 1000.
    pub interval: u16,
    /// Application data.
    #[serde(skip)]
    pub app_data: AppData,
}

impl Default for AudioLevelObserverOptions {
    fn default() -> Self {
        Self {
            max_entries: NonZeroU16::MIN,
            threshold: -80,
            interval: 1000,
            app_data: AppData::default(),
        }
    }
}

/// Average volume of one producer over the last interval.
#[derive(Debug, Clone)]
pub struct AudioLevelObserverVolume {
    pub producer: Producer,
    /// dBov, from -127 to 0.
    pub volume: i8,
}

#[derive(Default)]
#[allow(clippy::type_complexity)]
struct Handlers {
    volumes: Bag<Arc<dyn Fn(&[AudioLevelObserverVolume]) + Send + Sync>>,
    silence: Bag<Arc<dyn Fn() + Send + Sync>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VolumeEntry {
    producer_id: ProducerId,
    volume: i8,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase", content = "data")]
enum Notification {
    Volumes(Vec<VolumeEntry>),
    Silence,
}

struct Inner {
    core: ObserverCore,
    handlers: Arc<Handlers>,
}

/// Reports the loudest of the observed audio producers every interval, or silence when none of
/// them is above the threshold.
///
/// Levels come from the RFC 6464 header extension, audio is never decoded. Only audio producers
/// can be added.
#[derive(Clone)]
#[must_use = "Audio level observer will be closed on drop, make sure to keep it around for as long \
as needed"]
pub struct AudioLevelObserver {
    inner: Arc<Inner>,
}

impl fmt::Debug for AudioLevelObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioLevelObserver")
            .field("core", &self.inner.core)
            .finish()
    }
}

impl_rtp_observer!(AudioLevelObserver);

impl AudioLevelObserver {
    pub(super) fn new(id: RtpObserverId, app_data: AppData, router: Router) -> Self {
        let handlers = Arc::<Handlers>::default();
        let core = ObserverCore::new(id, router, app_data);

        core.lifecycle().keep({
            let router = core.router().downgrade();
            let handlers = Arc::clone(&handlers);

            core.link()
                .subscribe(id, move |notification: Notification| match notification {
                    Notification::Volumes(entries) => {
                        let volumes = resolve_volumes(&router, entries);
                        if !volumes.is_empty() {
                            handlers.volumes.call(|callback| callback(&volumes));
                        }
                    }
                    Notification::Silence => {
                        handlers.silence.call_simple();
                    }
                })
        });

        Self {
            inner: Arc::new(Inner { core, handlers }),
        }
    }

    /// Loudest producers first.
    pub fn on_volumes<F: Fn(&[AudioLevelObserverVolume]) + Send + Sync + 'static>(
        &self,
        callback: F,
    ) -> HandlerId {
        self.inner.handlers.volumes.add(Arc::new(callback))
    }

    /// None of the producers is above the threshold.
    pub fn on_silence<F: Fn() + Send + Sync + 'static>(&self, callback: F) -> HandlerId {
        self.inner.handlers.silence.add(Arc::new(callback))
    }

    pub fn close(&self) {
        self.inner.core.close();
    }

    pub(super) fn router_closed(&self) {
        self.inner.core.router_closed();
    }
}

/// Producers already gone from the router are left out.
fn resolve_volumes(router: &WeakRouter, entries: Vec<VolumeEntry>) -> Vec<AudioLevelObserverVolume> {
    let router = match router.upgrade() {
        Some(router) => router,
        None => return Vec::new(),
    };

    entries
        .into_iter()
        .filter_map(|VolumeEntry { producer_id, volume }| {
            router
                .get_producer(&producer_id)
                .map(|producer| AudioLevelObserverVolume { producer, volume })
        })
        .collect()
}

weak_handle!(
    /// Handle that doesn't keep the observer open.
    WeakAudioLevelObserver => AudioLevelObserver
);
