//! Single-tenant automation gateway.
//!
//! Runs an agent CLI as supervised subprocess jobs inside one working
//! directory, and publishes that directory's git branches as live-reloading
//! preview sites.

pub mod config;
pub mod errors;
pub mod gateway;
pub mod jobs;
pub mod logging;
pub mod preview;
