//! C2 Store: persistent relational store for users, hosts, credentials,
//! tunnel configs (embedded in hosts), file-manager metadata, dismissed
//! alerts, and settings. Typed CRUD; per-user scoping enforced at the
//! repository boundary.

pub mod error;
pub mod models;
pub mod repo;
pub mod schema;

pub use error::StoreError;
pub use repo::Store;
