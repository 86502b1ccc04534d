//! Infrastructure adapters for external workers.

pub mod process;

pub use process::{serve_if_worker, serve_stdio, JobRegistry};
