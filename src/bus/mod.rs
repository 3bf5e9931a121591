//! Update distribution: broadcast bus plus fan-out to live connections.
//!
//! Updates flow producer → `UpdateBus` → `FanoutPublisher` → every live
//! connection:
//! - `UpdateBus`: in-memory broadcast channel decoupling ingestion from
//!   delivery; a slow or failing fan-out never blocks a producer.
//! - `FanoutPublisher`: background loop that serializes each update once and
//!   delivers it to all registered connections concurrently, evicting the
//!   ones whose channel has gone stale.

mod fanout;
mod update_bus;

pub use fanout::{DeliveryReport, FanoutPublisher};
pub use update_bus::UpdateBus;
