//! Persistence layer: libSQL-backed storage for transcripts, groups, and
//! session identifiers.

pub mod gateway;
pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use gateway::PersistenceGateway;
pub use libsql_backend::LibSqlBackend;
pub use traits::{ChatTranscript, Database, StoredChat};
