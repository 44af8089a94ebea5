// Identifier of a resource living on the engine, generated here and sent along with the request
// that creates it.
macro_rules! resource_id {
    ($(#[$attribute: meta])* $name: ident) => {
        $(#[$attribute])*
        #[derive(
            Debug,
            Copy,
            Clone,
            Eq,
            PartialEq,
            Ord,
            PartialOrd,
            Hash,
            serde::Deserialize,
            serde::Serialize,
        )]
        #[serde(transparent)]
        pub struct $name(uuid::Uuid);

        impl $name {
            pub(crate) fn new() -> Self {
                Self(uuid::Uuid::new_v4())
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.parse().map(Self)
            }
        }

        impl From<$name> for uuid::Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl From<$name> for crate::worker::SubscriptionTarget {
            fn from(id: $name) -> Self {
                Self::Uuid(id.0)
            }
        }
    };
}

// `Transport` and `TransportGeneric` for a transport whose `inner.core` is a `TransportCore`.
macro_rules! impl_transport {
    ($transport: ty) => {
        #[async_trait::async_trait(?Send)]
        impl crate::transport::Transport for $transport {
            fn id(&self) -> crate::transport::TransportId {
                self.inner.core.id()
            }

            fn router_id(&self) -> crate::router::RouterId {
                self.inner.core.router().id()
            }

            fn app_data(&self) -> &crate::data_structures::AppData {
                self.inner.core.app_data()
            }

            fn closed(&self) -> bool {
                self.inner.core.closed()
            }

            async fn produce(
                &self,
                producer_options: crate::producer::ProducerOptions,
            ) -> Result<crate::producer::Producer, crate::transport::ProduceError> {
                self.inner.core.produce(producer_options).await
            }

            async fn consume(
                &self,
                consumer_options: crate::consumer::ConsumerOptions,
            ) -> Result<crate::consumer::Consumer, crate::transport::ConsumeError> {
                self.inner.core.consume(consumer_options).await
            }

            async fn produce_data(
                &self,
                data_producer_options: crate::data_producer::DataProducerOptions,
            ) -> Result<crate::data_producer::DataProducer, crate::transport::ProduceDataError> {
                self.inner.core.produce_data(data_producer_options).await
            }

            async fn consume_data(
                &self,
                data_consumer_options: crate::data_consumer::DataConsumerOptions,
            ) -> Result<crate::data_consumer::DataConsumer, crate::transport::ConsumeDataError> {
                self.inner.core.consume_data(data_consumer_options).await
            }

            async fn set_max_incoming_bitrate(
                &self,
                bitrate: u32,
            ) -> Result<(), crate::worker::RequestError> {
                self.inner.core.set_max_incoming_bitrate(bitrate).await
            }

            async fn enable_trace_event(
                &self,
                types: Vec<crate::transport::TransportTraceEventType>,
            ) -> Result<(), crate::worker::RequestError> {
                self.inner.core.enable_trace_event(types).await
            }
        }

        #[async_trait::async_trait(?Send)]
        impl crate::transport::TransportGeneric for $transport {
            async fn dump(
                &self,
            ) -> Result<crate::transport::TransportDump, crate::worker::RequestError> {
                self.inner.core.dump().await
            }

            async fn get_stats(
                &self,
            ) -> Result<Vec<crate::data_structures::StatsReport>, crate::worker::RequestError> {
                self.inner.core.get_stats().await
            }

            fn on_new_producer<F>(&self, callback: F) -> event_listener_primitives::HandlerId
            where
                F: Fn(&crate::producer::Producer) + Send + Sync + 'static,
            {
                self.inner.core.handlers().new_producer.add(std::sync::Arc::new(callback))
            }

            fn on_new_consumer<F>(&self, callback: F) -> event_listener_primitives::HandlerId
            where
                F: Fn(&crate::consumer::Consumer) + Send + Sync + 'static,
            {
                self.inner.core.handlers().new_consumer.add(std::sync::Arc::new(callback))
            }

            fn on_new_data_producer<F>(&self, callback: F) -> event_listener_primitives::HandlerId
            where
                F: Fn(&crate::data_producer::DataProducer) + Send + Sync + 'static,
            {
                self.inner
                    .core
                    .handlers()
                    .new_data_producer
                    .add(std::sync::Arc::new(callback))
            }

            fn on_new_data_consumer<F>(&self, callback: F) -> event_listener_primitives::HandlerId
            where
                F: Fn(&crate::data_consumer::DataConsumer) + Send + Sync + 'static,
            {
                self.inner
                    .core
                    .handlers()
                    .new_data_consumer
                    .add(std::sync::Arc::new(callback))
            }

            fn on_trace<F>(&self, callback: F) -> event_listener_primitives::HandlerId
            where
                F: Fn(&crate::transport::TransportTraceEvent) + Send + Sync + 'static,
            {
                self.inner.core.handlers().trace.add(std::sync::Arc::new(callback))
            }

            fn on_router_close<F>(&self, callback: F) -> event_listener_primitives::HandlerId
            where
                F: FnOnce() + Send + 'static,
            {
                self.inner.core.lifecycle().on_parent_close(callback)
            }

            fn on_close<F>(&self, callback: F) -> event_listener_primitives::HandlerId
            where
                F: FnOnce() + Send + 'static,
            {
                self.inner.core.lifecycle().on_close(callback)
            }
        }
    };
}

// `RtpObserver` for an observer whose `inner.core` is an `ObserverCore`.
macro_rules! impl_rtp_observer {
    ($observer: ty) => {
        #[async_trait::async_trait(?Send)]
        impl crate::rtp_observer::RtpObserver for $observer {
            fn id(&self) -> crate::rtp_observer::RtpObserverId {
                self.inner.core.id()
            }

            fn router_id(&self) -> crate::router::RouterId {
                self.inner.core.router().id()
            }

            fn paused(&self) -> bool {
                self.inner.core.paused()
            }

            fn app_data(&self) -> &crate::data_structures::AppData {
                self.inner.core.app_data()
            }

            fn closed(&self) -> bool {
                self.inner.core.lifecycle().closed()
            }

            async fn pause(&self) -> Result<(), crate::worker::RequestError> {
                self.inner.core.pause().await
            }

            async fn resume(&self) -> Result<(), crate::worker::RequestError> {
                self.inner.core.resume().await
            }

            async fn add_producer(
                &self,
                options: crate::rtp_observer::RtpObserverAddProducerOptions,
            ) -> Result<(), crate::worker::RequestError> {
                self.inner.core.add_producer(options.producer_id).await
            }

            async fn remove_producer(
                &self,
                producer_id: crate::producer::ProducerId,
            ) -> Result<(), crate::worker::RequestError> {
                self.inner.core.remove_producer(producer_id).await
            }

            fn on_pause<F>(&self, callback: F) -> event_listener_primitives::HandlerId
            where
                F: Fn() + Send + Sync + 'static,
            {
                self.inner.core.handlers().pause.add(std::sync::Arc::new(callback))
            }

            fn on_resume<F>(&self, callback: F) -> event_listener_primitives::HandlerId
            where
                F: Fn() + Send + Sync + 'static,
            {
                self.inner.core.handlers().resume.add(std::sync::Arc::new(callback))
            }

            fn on_add_producer<F>(&self, callback: F) -> event_listener_primitives::HandlerId
            where
                F: Fn(&crate::producer::Producer) + Send + Sync + 'static,
            {
                self.inner
                    .core
                    .handlers()
                    .add_producer
                    .add(std::sync::Arc::new(callback))
            }

            fn on_remove_producer<F>(&self, callback: F) -> event_listener_primitives::HandlerId
            where
                F: Fn(&crate::producer::Producer) + Send + Sync + 'static,
            {
                self.inner
                    .core
                    .handlers()
                    .remove_producer
                    .add(std::sync::Arc::new(callback))
            }

            fn on_router_close<F>(&self, callback: F) -> event_listener_primitives::HandlerId
            where
                F: FnOnce() + Send + 'static,
            {
                self.inner.core.lifecycle().on_parent_close(callback)
            }

            fn on_close<F>(&self, callback: F) -> event_listener_primitives::HandlerId
            where
                F: FnOnce() + Send + 'static,
            {
                self.inner.core.lifecycle().on_close(callback)
            }
        }
    };
}

// Handle that doesn't keep a resource open, plus `downgrade()` on the resource. A struct resource
// keeps its `Arc<Inner>` in `inner`, an enum resource exposes `inner()` and `from_inner()`.
macro_rules! weak_handle {
    (@debug $weak: ident) => {
        impl std::fmt::Debug for $weak {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.debug_struct(stringify!($weak)).finish()
            }
        }
    };
    ($(#[$attribute: meta])* $weak: ident => $strong: ident) => {
        $(#[$attribute])*
        #[derive(Clone)]
        pub struct $weak {
            inner: std::sync::Weak<Inner>,
        }

        weak_handle!(@debug $weak);

        impl $weak {
            #[must_use]
            pub fn upgrade(&self) -> Option<$strong> {
                let inner = self.inner.upgrade()?;

                Some($strong { inner })
            }
        }

        impl $strong {
            #[must_use]
            pub fn downgrade(&self) -> $weak {
                $weak {
                    inner: std::sync::Arc::downgrade(&self.inner),
                }
            }
        }
    };
    ($(#[$attribute: meta])* $weak: ident => enum $strong: ident) => {
        $(#[$attribute])*
        #[derive(Clone)]
        pub struct $weak {
            inner: std::sync::Weak<Inner>,
        }

        weak_handle!(@debug $weak);

        impl $weak {
            #[must_use]
            pub fn upgrade(&self) -> Option<$strong> {
                self.inner.upgrade().map($strong::from_inner)
            }
        }

        impl $strong {
            #[must_use]
            pub fn downgrade(&self) -> $weak {
                $weak {
                    inner: std::sync::Arc::downgrade(self.inner()),
                }
            }
        }
    };
}
