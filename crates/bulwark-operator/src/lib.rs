//! Bulwark operator: converges the security posture of StorageClusters

#![deny(missing_docs)]

/// Component trait and registry
pub mod component;
/// Built-in components
pub mod components;
/// Operator configuration
pub mod config;
/// StorageCluster controller
pub mod controller;

pub use component::{Component, ComponentRegistry};
pub use config::OperatorConfig;
pub use controller::{error_policy, reconcile, Context};
