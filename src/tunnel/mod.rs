//! C8 TunnelEngine: the per-tunnel state machine with retry/backoff,
//! remote-process marker tagging, autoreconnect, cancellation, and
//! exhaustion described by the control plane's component design.

pub mod engine;
pub mod reap;
pub mod types;

pub use engine::{TunnelEngine, TunnelHandle, TunnelStatusMap, TunnelTiming};
pub use types::{TunnelConnectConfig, TunnelError, TunnelErrorKind, TunnelState, TunnelStatus};
