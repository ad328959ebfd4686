//! Infrastructure layer
//!
//! Concrete adapters behind the domain ports: SQLite persistence, HTTP
//! content fetching, the vision model and the follow-up queue.

pub mod content;
pub mod graph;
pub mod scheduler;
pub mod vision;

pub use content::HttpContentResolver;
pub use graph::{SqliteGraphBatch, SqliteGraphRepository};
pub use scheduler::{FollowUpWorker, QueueScheduler, WorkerReport};
pub use vision::VisionAnalyzer;
