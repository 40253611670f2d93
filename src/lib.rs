//! mpsync library
//!
//! Incremental upload of a local tree to a MicroPython device whose
//! filesystem is only reachable through its REPL.

pub mod cli;
pub mod clock;
pub mod fs_enum;
pub mod listing;
pub mod log;
pub mod logger;
pub mod memory;
pub mod options;
pub mod progress;
pub mod protocol;
pub mod remote_index;
pub mod repl;
pub mod serial;
pub mod session;
pub mod sync;
pub mod url;
