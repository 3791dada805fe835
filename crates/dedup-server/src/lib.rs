//! HTTP server for the dedup store.
//!
//! Uploads arrive as multipart forms. Each upload is spooled to a temporary
//! file while it is hashed, then handed to [`DedupStore::submit`] on a
//! blocking thread. The response says whether the content was new (201) or
//! a duplicate of something already stored (200), and how many bytes the
//! duplicate saved.
//!
//! [`DedupStore::submit`]: dedup_store::DedupStore::submit

pub mod config;
pub mod error;
pub mod handler;
pub mod router;
pub mod server;
pub mod state;

pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use handler::{ListQuery, ObjectView, StatsView, UploadView};
pub use server::DedupServer;
pub use state::AppState;
