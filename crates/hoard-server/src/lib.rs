//! The HTTP surface: blob get/upload/stat/enumerate/remove, the search
//! verbs, signing endpoints, and discovery.

pub mod auth;
pub mod config;
pub mod error;
pub mod handler;
pub mod router;
pub mod server;
pub mod state;

pub use auth::AuthMode;
pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use router::build_router;
pub use server::HoardServer;
pub use state::ServerState;
