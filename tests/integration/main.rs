mod data_channels;
mod direct_transport;
mod fake_engine;
mod media;
mod pipe_to_router;
mod producer_consumer;
mod router;
mod worker;
