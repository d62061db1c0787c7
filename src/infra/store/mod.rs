//! Job store backends.

pub mod file;
pub mod memory;
pub mod table;

pub use file::FileJobStore;
pub use memory::InMemoryJobStore;
pub use table::JobTable;
