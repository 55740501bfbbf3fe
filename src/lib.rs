//! Bootstrap automation for Juniper cPTX nodes running as cluster workloads.
//!
//! A node is driven through its CLI over `kubectl exec`: the PKI is polled
//! until it can issue a self-signed certificate, the gRPC service is enabled
//! with it, and configuration is pushed or reset through candidate
//! transactions that either commit fully or are rolled back.

pub mod cert;
pub mod classify;
pub mod config;
pub mod error;
pub mod junos;
pub mod models;
pub mod readiness;
pub mod session;
pub mod transport;
pub mod txn;
pub mod vendor;

pub use error::{Error, Result};
