//! Runnable modules each bundling the library structures into a tool with a unified configuration

pub mod options;

pub mod client;
pub mod confirms;
pub mod demo;
pub mod server;
