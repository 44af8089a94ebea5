//! Observers watch the audio of selected producers in a router and report on it:
//! * [`AudioLevelObserver`](crate::audio_level_observer::AudioLevelObserver) reports volumes
//! * [`ActiveSpeakerObserver`](crate::active_speaker_observer::ActiveSpeakerObserver) reports the
//!   dominant speaker

use crate::data_structures::AppData;
use crate::messages::{self, Target};
use crate::producer::{Producer, ProducerId};
use crate::router::resource::{EngineLink, Lifecycle};
use crate::router::{Router, RouterId};
use crate::worker::RequestError;
use async_trait::async_trait;
use event_listener_primitives::{Bag, HandlerId};
use log::debug;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

resource_id!(
    /// RTP observer identifier.
    RtpObserverId
);

/// Producer to start observing, see [`RtpObserver::add_producer`].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[non_exhaustive]
pub struct RtpObserverAddProducerOptions {
    /// Audio producer of the same router.
    pub producer_id: ProducerId,
}

impl RtpObserverAddProducerOptions {
    #[must_use]
    pub fn new(producer_id: ProducerId) -> Self {
        Self { producer_id }
    }
}

/// Operations every observer kind supports.
#[async_trait(?Send)]
pub trait RtpObserver {
    fn id(&self) -> RtpObserverId;

    /// Router the observer was created on.
    fn router_id(&self) -> RouterId;

    fn paused(&self) -> bool;

    fn app_data(&self) -> &AppData;

    fn closed(&self) -> bool;

    /// Stops inspecting media until [`RtpObserver::resume`].
    async fn pause(&self) -> Result<(), RequestError>;

    async fn resume(&self) -> Result<(), RequestError>;

    /// Starts observing a producer.
    async fn add_producer(
        &self,
        rtp_observer_add_producer_options: RtpObserverAddProducerOptions,
    ) -> Result<(), RequestError>;

    /// Stops observing a producer.
    async fn remove_producer(&self, producer_id: ProducerId) -> Result<(), RequestError>;

    fn on_pause<F: Fn() + Send + Sync + 'static>(&self, callback: F) -> HandlerId;

    fn on_resume<F: Fn() + Send + Sync + 'static>(&self, callback: F) -> HandlerId;

    /// Producer was added with [`RtpObserver::add_producer`].
    fn on_add_producer<F: Fn(&Producer) + Send + Sync + 'static>(&self, callback: F) -> HandlerId;

    /// Producer was removed with [`RtpObserver::remove_producer`].
    fn on_remove_producer<F: Fn(&Producer) + Send + Sync + 'static>(
        &self,
        callback: F,
    ) -> HandlerId;

    /// Router was closed, which closes the observer as well.
    fn on_router_close<F: FnOnce() + Send + 'static>(&self, callback: F) -> HandlerId;

    /// Observer was closed, for whatever reason. Runs right away if it already is.
    fn on_close<F: FnOnce() + Send + 'static>(&self, callback: F) -> HandlerId;
}

#[derive(Default)]
#[allow(clippy::type_complexity)]
pub(super) struct ObserverHandlers {
    pub(super) pause: Bag<Arc<dyn Fn() + Send + Sync>>,
    pub(super) resume: Bag<Arc<dyn Fn() + Send + Sync>>,
    pub(super) add_producer: Bag<Arc<dyn Fn(&Producer) + Send + Sync>, Producer>,
    pub(super) remove_producer: Bag<Arc<dyn Fn(&Producer) + Send + Sync>, Producer>,
}

/// Part of an observer that doesn't depend on its kind. Dropping it closes the observer.
pub(super) struct ObserverCore {
    id: RtpObserverId,
    router: Router,
    link: EngineLink,
    paused: AtomicBool,
    app_data: AppData,
    handlers: ObserverHandlers,
    lifecycle: Lifecycle,
}

impl fmt::Debug for ObserverCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverCore")
            .field("id", &self.id)
            .field("router_id", &self.router.id())
            .field("paused", &self.paused)
            .field("lifecycle", &self.lifecycle)
            .finish()
    }
}

impl Drop for ObserverCore {
    fn drop(&mut self) {
        debug!("drop()");

        self.close();
    }
}

impl ObserverCore {
    pub(super) fn new(id: RtpObserverId, router: Router, app_data: AppData) -> Self {
        debug!("new() [id:{}]", id);

        Self {
            id,
            link: router.link().clone(),
            router,
            paused: AtomicBool::new(false),
            app_data,
            handlers: ObserverHandlers::default(),
            lifecycle: Lifecycle::default(),
        }
    }

    pub(super) fn id(&self) -> RtpObserverId {
        self.id
    }

    pub(super) fn router(&self) -> &Router {
        &self.router
    }

    pub(super) fn link(&self) -> &EngineLink {
        &self.link
    }

    pub(super) fn app_data(&self) -> &AppData {
        &self.app_data
    }

    pub(super) fn handlers(&self) -> &ObserverHandlers {
        &self.handlers
    }

    pub(super) fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    pub(super) fn paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    fn target(&self) -> Target {
        Target::router(self.router.id()).rtp_observer(self.id)
    }

    pub(super) fn close(&self) {
        if self.lifecycle.close(|| {}) {
            debug!("close() [id:{}]", self.id);

            self.link.spawn_close(messages::rtp_observer_close(self.target()));
        }
    }

    pub(super) fn router_closed(&self) {
        self.lifecycle.parent_closed(|| {});
    }

    pub(super) async fn pause(&self) -> Result<(), RequestError> {
        debug!("pause()");

        self.link
            .request(messages::rtp_observer_pause(self.target()))
            .await?;

        if !self.paused.swap(true, Ordering::SeqCst) {
            self.handlers.pause.call_simple();
        }

        Ok(())
    }

    pub(super) async fn resume(&self) -> Result<(), RequestError> {
        debug!("resume()");

        self.link
            .request(messages::rtp_observer_resume(self.target()))
            .await?;

        if self.paused.swap(false, Ordering::SeqCst) {
            self.handlers.resume.call_simple();
        }

        Ok(())
    }

    pub(super) async fn add_producer(&self, producer_id: ProducerId) -> Result<(), RequestError> {
        debug!("add_producer() [producer_id:{}]", producer_id);

        self.link
            .request(messages::rtp_observer_add_producer(
                self.target().producer(producer_id),
            ))
            .await?;

        if let Some(producer) = self.router.get_producer(&producer_id) {
            self.handlers.add_producer.call_simple(&producer);
        }

        Ok(())
    }

    pub(super) async fn remove_producer(
        &self,
        producer_id: ProducerId,
    ) -> Result<(), RequestError> {
        debug!("remove_producer() [producer_id:{}]", producer_id);

        self.link
            .request(messages::rtp_observer_remove_producer(
                self.target().producer(producer_id),
            ))
            .await?;

        if let Some(producer) = self.router.get_producer(&producer_id) {
            self.handlers.remove_producer.call_simple(&producer);
        }

        Ok(())
    }
}
