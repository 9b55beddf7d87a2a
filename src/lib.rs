pub mod api;
pub mod config;
pub mod error;
pub mod frame;
pub mod metrics;
pub mod node;
pub mod poller;
pub mod runtime;
pub mod source;
pub mod storage;
pub mod tracker;
