//! Out-of-process model worker.
//!
//! Classification and explanation run in a separate long-lived process that
//! speaks a line protocol over its stdin/stdout. Everything here is about
//! getting commands to it and its answers back to the right callers.

pub mod correlator;
pub mod ipc_types;
pub mod process_manager;
pub mod worker_bridge;
