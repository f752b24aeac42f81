//! # Ontolink - fault-tolerant ontology database access
//!
//! Ontolink sits in front of a triple-store style graph database.
//!
//! Ontolink provides:
//! - `ConnectionConfig`: connection strings, in-memory mode and a stable,
//!   non-sensitive identifier for an ontology + database target
//! - `ResilientStore`: a proxy over one store handle that reconnects and
//!   retries each operation once when the connection has silently died
//! - `SqliteGraphStore`: the SQLite backend implementing the `GraphStore` contract
//! - `MemoryGraph`: a transient graph for loading ontology files before merging

pub mod term;
pub mod namespace;
pub mod config;
pub mod graph;
pub mod store;
pub mod resilient;

// Re-exports for convenient access
pub use config::{ConfigError, ConfigSource, ConnectionConfig, ConnectionMode, ConnectionParams, Credentials};
pub use graph::MemoryGraph;
pub use namespace::{NamespaceMap, QName};
pub use resilient::{DESTROY_CONFIRMATION, FailureRecord, ResilientStore};
pub use store::{GraphStore, QueryRows, SqliteGraphStore};
pub use term::{Literal, Quad, Term, Triple, TriplePattern};

/// Result type alias for Ontolink operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for Ontolink operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store unavailable ({target}): {reason}")]
    StoreUnavailable { target: String, reason: String },

    #[error("No schema for graph {identifier}; open with create=true to initialise it")]
    SchemaMissing { identifier: String },

    #[error("Refusing to destroy the store: confirmation phrase does not match")]
    GuardViolation,

    #[error("Store is not connected")]
    NotConnected,

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid term: {0}")]
    InvalidTerm(String),

    #[error("Parse error on line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Uniqueness error: {0}")]
    Uniqueness(String),

    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),
}
