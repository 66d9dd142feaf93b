//! Finmail — inbound transaction-email worker.

pub mod backend;
pub mod classifier;
pub mod config;
pub mod error;
pub mod institutions;
pub mod mail;
pub mod pipeline;
pub mod server;
pub mod verification;
