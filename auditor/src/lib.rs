pub mod config;
pub mod db;
pub mod lineage;
pub mod metrics;
pub mod model;
pub mod normalizer;
pub mod poller;
pub mod provider;
pub mod reconciler;
pub mod sell_events;
pub mod store;
pub mod terms;

pub mod error;
pub mod logger;
