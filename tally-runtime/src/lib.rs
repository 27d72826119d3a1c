pub use {
    tally_core::{Trigger, Envelope, CountBody, MessageBody},
    crate::{counter::CounterService, server::TallyServer},
};

pub mod config;
pub mod counter;
pub mod http;
pub mod kv;
pub mod logs;
pub mod metrics;
pub mod server;
