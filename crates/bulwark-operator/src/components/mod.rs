//! Built-in components

mod security;

pub use security::{SecurityComponent, SECURITY_COMPONENT_NAME};
