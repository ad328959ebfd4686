//! Block graph infrastructure implementations
//!
//! Concrete implementations of the graph repository trait using SQLite.

mod repository;

pub use repository::{SqliteGraphBatch, SqliteGraphRepository};
