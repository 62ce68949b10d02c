//! HTTP API: server, routing, and request/response mapping.

pub mod app;
pub mod config;
pub mod context;
pub mod cookies;
pub mod middleware;

pub use app::build_app;
pub use app::services::{AppServices, build_services};
pub use config::ApiConfig;
