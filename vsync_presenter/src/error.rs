//! Error types for the vsync presenter
//!
//! This module defines the error types used throughout the presentation core,
//! covering startup negotiation, buffer allocation and per-frame flip handling.

use std::fmt;

/// Result type for presenter operations
pub type Result<T> = std::result::Result<T, Error>;

/// Presenter errors
///
/// Setup-time variants (`InitializationFailed`, `BufferAllocationFailed`) are
/// fatal for the backend. Steady-state variants (`FlipQueueFull`, `DeviceBusy`,
/// `HardwareEventLost`) are absorbed by the presenter and only show up in
/// diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// Backend-specific error (console video interface, page-flip device, etc.)
    BackendError(String),

    /// Initialization failed (device, initial mode negotiation)
    InitializationFailed(String),

    /// Frame buffer memory could not be allocated or registered
    BufferAllocationFailed(String),

    /// Requested geometry has no matching hardware mode
    ModeNotSupported { width: u32, height: u32 },

    /// No free swap chain slot while nothing is in flight
    ChainExhausted,

    /// The device already has a flip queued
    FlipQueueFull,

    /// The device cannot accept work right now
    DeviceBusy,

    /// A flip confirmation never arrived
    HardwareEventLost { missed_intervals: u32 },

    /// Slot token is unknown, stale or in the wrong state
    InvalidSlot(String),

    /// Operation not legal in the current presenter state
    InvalidState(String),
}

impl Error {
    /// Whether this error is a steady-state condition that costs one frame
    /// rather than the backend
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::FlipQueueFull | Error::DeviceBusy | Error::HardwareEventLost { .. }
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::BackendError(msg) => write!(f, "Backend error: {}", msg),
            Error::InitializationFailed(msg) => write!(f, "Initialization failed: {}", msg),
            Error::BufferAllocationFailed(msg) => write!(f, "Buffer allocation failed: {}", msg),
            Error::ModeNotSupported { width, height } => {
                write!(f, "Display mode {}x{} not supported", width, height)
            }
            Error::ChainExhausted => write!(f, "Swap chain exhausted"),
            Error::FlipQueueFull => write!(f, "Flip queue full"),
            Error::DeviceBusy => write!(f, "Display device busy"),
            Error::HardwareEventLost { missed_intervals } => {
                write!(f, "Flip confirmation lost after {} refresh intervals", missed_intervals)
            }
            Error::InvalidSlot(msg) => write!(f, "Invalid slot: {}", msg),
            Error::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
