//! Store implementations:
//! - `memory`: in-process storage for tests and transient queues
//! - `file`: one file per message in a spool directory

pub mod file;
pub mod memory;

pub use file::FileQueueStore;
pub use memory::MemoryQueueStore;
