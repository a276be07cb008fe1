//! Aspect-oriented call interception
//!
//! Handlers run before, instead of, or after dynamically dispatched members, either for
//! every instance of a class hierarchy or for a single object. The [`Interceptor`] owns
//! the registry; [`AspectToken`]s returned by registration remove handlers again.

pub mod config;
pub mod container;
pub mod context;
pub mod errors;
pub mod handler;
pub mod handlers;
pub mod identifier;
pub mod lifecycle;
pub mod manager;
pub mod providers;
pub mod scope;
pub mod tracker;
pub mod traits;
pub mod types;

// Re-export commonly used types
pub use self::config::{AspectsConfig, BuiltInConfig, EngineConfig};
pub use self::container::{AspectList, AspectsContainer, ContainerSnapshot};
pub use self::context::{AspectInfo, Invocation};
pub use self::errors::{AspectError, CallResult, HookResult};
pub use self::handler::{handler_fn, AspectHandler, FnHandler};
pub use self::handlers::{LoggingHandler, MetricsHandler, TransformHandler, ValidationHandler};
pub use self::identifier::{AspectIdentifier, AspectToken};
pub use self::lifecycle::{AspectEvent, AspectLifecycle, AspectPhase, LifecycleObserver, LoggingObserver};
pub use self::manager::{global, Collaborators, Interceptor};
pub use self::providers::{
    ArgumentBoxer, CallInterceptor, RedirectError, RedirectionHandle, Redirector, SignatureProvider,
    TypeHierarchy,
};
pub use self::scope::{Scope, ScopeRef};
pub use self::tracker::{ScopeNode, ScopeTracker};
pub use self::traits::{ChainableHandler, ChainedHandler, ConditionalHandler, ConditionalWrapper};
pub use self::types::{AspectOptions, HandlerSignature, HookStats, Position, Signature, ValueKind};

/// Prelude for convenient imports
pub mod prelude {
    pub use super::{
        handler_fn, AspectError, AspectHandler, AspectInfo, AspectOptions, AspectToken, CallResult,
        ChainableHandler, ConditionalHandler, HandlerSignature, HookResult, Interceptor, Position,
        Scope, ValueKind,
    };
}
