pub mod batch;
pub mod session_manager;

pub use batch::{BatchError, BatchProcessor, BatchReport, StopSignal};
pub use session_manager::SessionManager;
