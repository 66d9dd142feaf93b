//! Message processing pipeline.
//!
//! Every inbound email flows through:
//! 1. `normalize` — headers, transfer encodings, HTML stripping
//! 2. Institution matching — unknown senders never get further
//! 3. `intent` — transactional vs promotional
//! 4. `extract` — movement type, amount, counterparty, reference
//! 5. `fingerprint` + record assembly, then delivery to the backend
//!
//! The processor never fails an invocation: anything that goes wrong
//! becomes a drop, a diagnostic record, or a log line.

pub mod extract;
pub mod fingerprint;
pub mod intent;
pub mod processor;
pub mod types;
