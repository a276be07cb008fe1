//! Built-in aspect handlers

mod logging;
mod metrics;
mod validation;
mod transform;

pub use self::logging::LoggingHandler;
pub use self::metrics::MetricsHandler;
pub use self::validation::ValidationHandler;
pub use self::transform::TransformHandler;

use std::sync::Arc;

use crate::hooks::{AspectError, AspectHandler, BuiltInConfig, HookResult};

/// Names accepted by [`create_builtin`]
pub const BUILTIN_HANDLERS: [&str; 4] = ["logging", "metrics", "transform", "validation"];

/// Instantiate the built-in handler named by `config.handler_name`
pub fn create_builtin(name: impl Into<String>, config: BuiltInConfig) -> HookResult<Arc<dyn AspectHandler>> {
    let name = name.into();
    let handler: Arc<dyn AspectHandler> = match config.handler_name.as_str() {
        "logging" => Arc::new(LoggingHandler::new(name, config)),
        "metrics" => Arc::new(MetricsHandler::new(name, config)),
        "transform" => Arc::new(TransformHandler::new(name, config)?),
        "validation" => Arc::new(ValidationHandler::new(name, config)?),
        other => {
            return Err(AspectError::invalid_config(format!(
                "Unknown built-in handler '{}' (expected one of: {})",
                other,
                BUILTIN_HANDLERS.join(", ")
            )))
        }
    };
    Ok(handler)
}

#[cfg(test)]
pub(crate) mod testing {
    use serde_json::Value;

    use crate::hooks::{AspectInfo, BuiltInConfig, Invocation, Signature, ValueKind};
    use crate::runtime::{Method, Runtime};

    pub fn config_from_json(handler_name: &str, json_config: Value) -> BuiltInConfig {
        let mut config = BuiltInConfig::new(handler_name);
        if let Value::Object(map) = json_config {
            for (k, v) in map {
                config.config.insert(k, v);
            }
        }
        config
    }

    /// Run `body` against a call of `Greeter.greet` carrying `arguments`. The original
    /// implementation returns "hello <first argument>".
    pub fn with_call<R>(arguments: Vec<Value>, body: impl FnOnce(&AspectInfo<'_>) -> R) -> R {
        let runtime = Runtime::new();
        let class = runtime.define_class("Greeter", None).unwrap();
        let method = Method::new(
            Signature::new(vec![ValueKind::String], ValueKind::String),
            |_obj, args| {
                let who = args.first().and_then(|v| v.as_str()).unwrap_or("nobody");
                Ok(Value::String(format!("hello {}", who)))
            },
        );
        runtime.add_method(class, "greet", method.clone()).unwrap();
        let object = runtime.instantiate(class).unwrap();
        let invocation = Invocation::new(object, "greet", arguments, Some(method.implementation()));
        let info = AspectInfo::new(&invocation, &runtime);
        body(&info)
    }
}
