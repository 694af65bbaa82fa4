//! Command handlers

pub mod config;
pub mod host;
pub mod relay;
pub mod session;
