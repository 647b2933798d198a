//! Storage collaborators: an in-memory store for tests and throwaway
//! sessions, and a SQLite store for the CLI.

pub mod memory;
pub mod prefab;
pub mod sqlite;

pub use memory::InMemoryStore;
pub use prefab::import_prefab;
pub use sqlite::SqliteStore;
