//! Campus LINE-bot service.
//!
//! The webhook ingress acks the platform synchronously and processes
//! events on a detached worker; replies pass through per-conversation and
//! global rate limiters, unmatched questions go to the LLM intent parser
//! behind an hourly quota, and a background scheduler keeps the local
//! cache warm. When an object store is configured, instances elect a
//! leader that publishes compressed database snapshots for the others to
//! hot-swap.

pub mod app;
pub mod config;
pub mod handlers;
pub mod jobs;
pub mod line;
pub mod routes;
pub mod storage;
pub mod text;
pub mod upstream;
pub mod webhook;

pub use app::App;
pub use config::Config;
