//! Target-system adapters
//!
//! Integration-specific clients for the external systems of record the
//! engine writes to. Every adapter exposes the same narrow contract:
//! `fetch` the current state of a record and `write` a set of fields, both
//! idempotent on retry with the same record and fields.

pub mod netsuite;
pub mod registry;
pub mod shopify;
pub mod trait_;

pub use netsuite::NetSuiteAdapter;
pub use registry::{AdapterRegistry, RegistryError};
pub use shopify::ShopifyAdapter;
pub use trait_::{AdapterError, TargetAdapter, TargetState};
