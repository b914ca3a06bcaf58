//! Client for the Dicoding forum REST API.
//!
//! Reads are served from a TTL cache, writes invalidate the cache families
//! they affect, and only one request per URL is ever live: a newer request
//! cancels the one it supersedes.

pub mod cache;
pub mod config;
pub mod coordinator;
pub mod db;
pub mod error;
pub mod forum_client;
pub mod models;
pub mod render;
pub mod transport;

pub use cache::CacheStore;
pub use config::ClientConfig;
pub use coordinator::RequestCoordinator;
pub use db::{MemoryTokenStore, SqliteTokenStore, TokenStore};
pub use error::{ForumError, Result};
pub use forum_client::ForumClient;
pub use transport::{ApiRequest, ApiResponse, HttpTransport, Transport};
