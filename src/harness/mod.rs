//! Runtime harness to execute modules and manage the process lifecycle

mod heart;
mod module;

pub use heart::*;
pub use module::*;
