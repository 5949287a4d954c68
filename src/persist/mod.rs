//! Persistence abstraction for store snapshots

mod json_file;
mod memory;
mod traits;

pub use json_file::JsonFilePersister;
pub use memory::MemoryPersister;
pub use traits::{PersistError, Persister};
