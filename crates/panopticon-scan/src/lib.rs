//! panopticon-scan: Scan orchestration for the Panopticon network inventory.
//!
//! Runs nmap (or a mock runner), merges its XML report into the
//! reconciliation store, and drives the periodic scan and maintenance loops.

pub mod error;
pub mod nmap_xml;
pub mod orchestrator;
pub mod output;
pub mod runner;
pub mod scheduler;
pub mod snapshot;
mod store_task;
pub mod templates;

pub use error::ScanError;
pub use orchestrator::{ScanOrchestrator, ScanState, ScanStats};
pub use runner::{MockRunner, NmapRunner, ScanRunner};
pub use scheduler::MaintenanceScheduler;
