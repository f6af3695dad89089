//! C5 SSHPool and its underlying client primitives.
//!
//! `client` holds the thin russh wrapper (handshake, auth, exec, PTY) with
//! no notion of pooling. `pool` is the per-host bounded pool described by
//! the control plane's component design: bucket keyed by
//! `(ip, port, username)`, FIFO acquire, idle janitor, orderly shutdown.

pub mod client;
pub mod pool;

pub use client::{AuthParams, SshClient, SshError};
pub use pool::{PoolError, PooledClient, SshPool};
