//! # strata-common
//!
//! Common types and constants for Strata.
//!
//! This crate provides the foundational identifiers shared by every
//! Strata component:
//!
//! - **Types**: `PageId` and `SectionId` newtypes
//! - **Constants**: page geometry defaults and system-wide limits

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod constants;
pub mod types;

pub use constants::*;
pub use types::{PageId, SectionId};
