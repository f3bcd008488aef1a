//! This library crate contains everything needed to correlate asynchronous broker events with in-flight operations.
//!
//! Submodules have been introduced to split responsibilities. Each module has a specific focus
//! and they together form a chain of dependencies from the low-level [`library`], over the tutorial [`domain`]
//! specific logic, through the executable [`harness`], up to the high-level [`modules`](module) run by the binary.

#![deny(missing_docs)]

pub mod domain;
pub mod harness;
pub mod library;
pub mod module;
