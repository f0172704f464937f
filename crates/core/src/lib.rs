//! Domain services for medlearn.
//!
//! Services own policy (validation, access rules, metrics, logging) and
//! delegate storage and transactions to the repositories in `medlearn-db`.

pub mod services;

pub use services::*;
