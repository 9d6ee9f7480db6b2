//! Schema-driven autofill and approval driver for investment project applications.

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod telemetry;
pub mod workflows;
