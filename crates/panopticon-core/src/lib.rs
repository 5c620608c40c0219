//! panopticon-core: Shared types, configuration, and error handling for the Panopticon scanner.
//!
//! This crate provides the foundational types used across all Panopticon components:
//! - Inventory entities (Device, Port, Scan, Change, LogEntry)
//! - Observations produced by a scan before reconciliation
//! - Configuration management
//! - Common error types

pub mod config;
pub mod error;
pub mod types;

pub use config::AppConfig;
pub use error::PanopticonError;
pub use types::{
    Change, ChangeType, DatabaseStats, Device, DeviceDetails, DeviceId, HostObservation, LogEntry,
    Port, PortId, PortObservation, Scan, ScanId, ScanParameters, ScanStatus, ScanTemplate,
};
