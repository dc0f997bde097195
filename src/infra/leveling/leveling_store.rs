// Implementations of the leveling ports.

pub mod config_loader;
pub mod in_memory;
pub mod sqlite_store;

pub use config_loader::load_config;
pub use in_memory::InMemoryLevelingStore;
pub use sqlite_store::SqliteLevelingStore;
