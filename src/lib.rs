//! # HydraMCP
//!
//! A multi-model orchestration server: one AI coding agent consults other
//! AI models through a uniform MCP tool surface over standard streams.
//!
//! The crate is organized around three layers:
//!
//! - **Backends** ([`backend`]) — one connector per provider wire format
//!   (chat-completions, messages, generate-content, a local Ollama server,
//!   and an OAuth subscription backend), all behind the same three-operation
//!   [`Backend`](backend::Backend) contract.
//! - **Orchestration** — [`routing::MultiBackend`] routes a model ID to the
//!   right connector; [`smart::SmartBackend`] wraps the router with a
//!   per-model circuit breaker ([`breaker`]), content-addressed response
//!   caching ([`cache`]), and metrics ([`metrics`]).
//! - **Tools** ([`tools`], [`server`]) — the high-level semantics: single
//!   query, parallel comparison, consensus with an LLM judge, synthesis,
//!   server-side file analysis, and session recaps.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use hydramcp::backend::{Backend, MockBackend, QueryOptions};
//! use hydramcp::smart::SmartBackend;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let inner = Arc::new(MockBackend::fixed("hello from the mock"));
//!     let smart = SmartBackend::new(inner);
//!
//!     let response = smart.query("mock-model", "say hello", &QueryOptions::default()).await?;
//!     println!("{} ({}ms)", response.content, response.latency_ms);
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod breaker;
pub mod cache;
pub mod config;
pub mod distill;
pub mod error;
pub mod extract;
pub mod judge;
pub mod metrics;
pub mod reasoning;
pub mod routing;
pub mod selection;
pub mod server;
pub mod sessions;
pub mod smart;
pub mod tools;

pub use backend::{Backend, ModelInfo, QueryOptions, QueryResponse, TokenUsage};
pub use config::Config;
pub use error::{HydraError, Result};
pub use routing::MultiBackend;
pub use server::HydraServer;
pub use smart::SmartBackend;
