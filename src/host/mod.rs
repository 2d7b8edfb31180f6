//! Newline-delimited JSON command bridge for host processes.

pub mod contract;
pub mod handler;
pub mod stdio;
