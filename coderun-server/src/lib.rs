//! HTTP front end for the coderun sandbox
//!
//! A thin shell: configuration loading and an axum router that hands
//! requests to a [`coderun_sandbox::CodeRunner`].

pub mod config;
pub mod http_server;

pub use config::ServerConfig;
pub use http_server::{create_router, start_server};
