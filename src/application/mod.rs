//! Application services: the render pipeline and its dependency checks.

pub mod dependencies;
pub mod error;
pub mod render;
