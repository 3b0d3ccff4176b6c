// Store module — persistence backends, chat history, trust data

pub mod backend;
pub mod history;
pub mod trust;

pub use backend::{MemoryStorage, SledStorage, StorageBackend};
pub use history::MessageStore;
pub use trust::TrustStore;
