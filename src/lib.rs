//! Admission-controlled asynchronous task pipeline.

pub mod config;
pub mod error;
pub mod load;
pub mod store;
pub mod tasks;
