//! # pds-types
//!
//! Core type definitions for photon-detector waveform calibration.
//!
//! This crate provides the data model shared by the rest of the workspace:
//! - Sampling units with compile-time safety
//! - Waveform records with acquisition metadata and named analyses
//! - The per-waveform analysis contract (`WfAnalyser`) and its records
//! - Waveform sets with derived run/record/channel indices
//! - Physical channel maps

pub mod error;
pub mod units;
pub mod analysis;
pub mod waveform;
pub mod waveform_set;
pub mod channel_map;

pub use error::{TypesError, TypesResult};
pub use units::*;
pub use analysis::*;
pub use waveform::*;
pub use waveform_set::*;
pub use channel_map::*;
