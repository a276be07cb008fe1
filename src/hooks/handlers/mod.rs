//! Aspect handler implementations

pub mod builtin;

// Re-export all built-in handlers
pub use self::builtin::*;
