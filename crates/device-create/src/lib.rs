//! Creates and repairs the NVIDIA GPU device nodes under `/dev`.
//!
//! A run checks that the driver is loaded, counts the NVIDIA display
//! controllers bound to a host driver, plans the nodes that should exist and
//! converges the filesystem towards that plan.

pub mod app;
pub mod classifier;
pub mod config;
pub mod kmod;
pub mod node;
pub mod pci;
pub mod plan;
