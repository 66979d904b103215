pub mod backend;
pub mod config;
pub mod controller;
pub mod db;
pub mod error;
pub mod llm;
pub mod models;
pub mod store;
pub mod telemetry;

#[cfg(test)]
mod testing;

/**
 * \brief Common re-exports for presentation layers.
 */
pub mod prelude {
    pub use crate::backend::{resolve, Backend};
    pub use crate::config::ChatConfig;
    pub use crate::controller::{ChatController, Outcome, Phase, SendOutcome, CANCELLED_NOTICE};
    pub use crate::db::SqliteStore;
    pub use crate::error::{InvalidInput, TransportError};
    pub use crate::models::{Message, Role, Theme};
    pub use crate::store::{KeyValueStore, MemoryStore};
    pub use crate::telemetry;
}
