//! Civic Ledger - complaint intake with a tamper-evident audit trail
//!
//! Complaints are filed, routed to departments by a keyword heuristic and an
//! optional AI classifier, and every administrative action is appended to a
//! SHA-256 hash chain. A background daemon serves requests over a Unix socket.

pub mod classifier;
pub mod cli;
pub mod clustering;
pub mod complaints;
pub mod config;
pub mod daemon;
pub mod department;
pub mod error;
pub mod ledger;
pub mod pipeline;
pub mod reconcile;
pub mod storage;

pub use error::{CivicError, Result};
