mod kv;
mod preferences;
mod schema;
mod types;
mod watermarks;

pub use kv::{KeyValueStore, Lifetime, MemoryStore};
pub use schema::Database;
pub use types::DatabaseError;
pub use watermarks::FeedStore;
