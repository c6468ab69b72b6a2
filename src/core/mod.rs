//! Core module containing the test console functionality
//!
//! This module provides:
//! - Parameter catalog keyed by device and test type
//! - Scanner capability, TPI serial driver and a simulated scanner
//! - Scan session owning the instrument link
//! - VSWR conversion and pass/fail evaluation
//! - Test sequencing state machine
//! - Artifact naming, serial entry and plot export

pub mod catalog;
pub mod chart;
pub mod filename;
pub mod scanner;
pub mod serial_entry;
pub mod session;
pub mod state_machine;
pub mod vswr;
