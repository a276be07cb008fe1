//! Aspect-oriented interception for dynamically dispatched members.
//!
//! [`runtime`] provides a small object model with late-bound method dispatch. The
//! [`hooks`] engine attaches before, instead and after handler chains to its members,
//! per class hierarchy or per object, and hands back tokens that detach them again.
//! [`scenario`] replays declarative TOML scenarios against both.

pub mod hooks;
pub mod platform_dirs;
pub mod runtime;
pub mod scenario;

pub use hooks::{AspectError, AspectOptions, AspectToken, Interceptor, Position, Scope};
pub use runtime::{Object, Runtime};
