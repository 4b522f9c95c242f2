//! HTTP API: the auth gate, permission-check endpoints and admin writers.

pub mod app;
pub mod bootstrap;
pub mod config;
pub mod context;
pub mod middleware;
pub mod routing;
pub mod transport;
