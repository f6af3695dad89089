//! C7 MetricsCollector: TCP liveness probe plus `/proc` + `df` resource
//! sampling behind a short-TTL cache.

pub mod collector;

pub use collector::{MetricsCollector, MetricsError, MetricsSnapshot};
