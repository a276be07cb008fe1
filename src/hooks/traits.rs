//! Combinators for aspect handlers

use std::sync::Arc;

use crate::hooks::{AspectHandler, AspectInfo, CallResult, HandlerSignature, ValueKind};

/// Trait for handlers that can be chained
pub trait ChainableHandler: AspectHandler {
    /// Run `next` after this handler, within the same position
    fn chain<H: AspectHandler + 'static>(self, next: H) -> ChainedHandler
    where
        Self: Sized + 'static,
    {
        let name = format!("{}+{}", self.name(), next.name());
        ChainedHandler {
            name,
            first: Arc::new(self),
            second: Arc::new(next),
        }
    }
}

impl<T: AspectHandler> ChainableHandler for T {}

/// A handler that runs two handlers in sequence. The second is skipped when the first fails.
pub struct ChainedHandler {
    name: String,
    first: Arc<dyn AspectHandler>,
    second: Arc<dyn AspectHandler>,
}

impl AspectHandler for ChainedHandler {
    fn execute(&self, info: &AspectInfo<'_>) -> CallResult<()> {
        if self.first.should_run(info) {
            self.first.execute(info)?;
        }
        if self.second.should_run(info) {
            self.second.execute(info)?;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }

    /// The longer parameter list of the two, so both are checked at registration
    fn signature(&self) -> HandlerSignature {
        let first = self.first.signature();
        let second = self.second.signature();
        let mut combined = if first.params.len() >= second.params.len() {
            first.clone()
        } else {
            second.clone()
        };
        if combined.returns == ValueKind::Void {
            combined.returns = if first.returns != ValueKind::Void {
                first.returns
            } else {
                second.returns
            };
        }
        combined
    }

    fn should_run(&self, info: &AspectInfo<'_>) -> bool {
        self.first.should_run(info) || self.second.should_run(info)
    }
}

/// Trait for handlers that can be conditionally executed
pub trait ConditionalHandler: AspectHandler {
    /// Run only for calls matching `condition`
    fn when<F>(self, condition: F) -> ConditionalWrapper<Self>
    where
        Self: Sized,
        F: Fn(&AspectInfo<'_>) -> bool + Send + Sync + 'static,
    {
        ConditionalWrapper {
            handler: self,
            condition: Box::new(condition),
        }
    }
}

impl<T: AspectHandler> ConditionalHandler for T {}

/// Wrapper for conditional execution
pub struct ConditionalWrapper<H: AspectHandler> {
    handler: H,
    condition: Box<dyn Fn(&AspectInfo<'_>) -> bool + Send + Sync>,
}

impl<H: AspectHandler> AspectHandler for ConditionalWrapper<H> {
    fn execute(&self, info: &AspectInfo<'_>) -> CallResult<()> {
        if (self.condition)(info) {
            self.handler.execute(info)
        } else {
            Ok(())
        }
    }

    fn name(&self) -> &str {
        self.handler.name()
    }

    fn signature(&self) -> HandlerSignature {
        self.handler.signature()
    }

    fn should_run(&self, info: &AspectInfo<'_>) -> bool {
        (self.condition)(info) && self.handler.should_run(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::{handler_fn, Invocation};
    use crate::runtime::Runtime;
    use serde_json::json;
    use std::sync::Mutex;

    fn with_info<R>(arguments: Vec<serde_json::Value>, body: impl FnOnce(&AspectInfo<'_>) -> R) -> R {
        let runtime = Runtime::new();
        let class = runtime.define_class("Plain", None).unwrap();
        let object = runtime.instantiate(class).unwrap();
        let invocation = Invocation::new(object, "ping", arguments, None);
        let info = AspectInfo::new(&invocation, &runtime);
        body(&info)
    }

    #[test]
    fn test_chained_handlers() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let first_log = log.clone();
        let second_log = log.clone();

        let chained = handler_fn("first", move |_info| {
            first_log.lock().unwrap().push("first");
            Ok(())
        })
        .chain(handler_fn("second", move |_info| {
            second_log.lock().unwrap().push("second");
            Ok(())
        }));

        assert_eq!(chained.name(), "first+second");
        with_info(Vec::new(), |info| chained.execute(info)).unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn test_chain_stops_on_failure() {
        let ran = Arc::new(Mutex::new(false));
        let flag = ran.clone();

        let chained = handler_fn("failing", |_info| Err(anyhow::anyhow!("nope"))).chain(handler_fn(
            "never",
            move |_info| {
                *flag.lock().unwrap() = true;
                Ok(())
            },
        ));

        let err = with_info(Vec::new(), |info| chained.execute(info)).unwrap_err();
        assert_eq!(err.to_string(), "nope");
        assert!(!*ran.lock().unwrap());
    }

    #[test]
    fn test_chain_signature_takes_longer_params() {
        let chained = handler_fn("a", |_info| Ok(()))
            .with_signature(HandlerSignature::with_params(vec![ValueKind::String]))
            .chain(handler_fn("b", |_info| Ok(())).with_signature(
                HandlerSignature::with_params(vec![ValueKind::String, ValueKind::Number]),
            ));
        assert_eq!(chained.signature().params.len(), 2);
    }

    #[test]
    fn test_conditional_handler() {
        let conditional = handler_fn("conditional", |_info| Err(anyhow::anyhow!("ran")))
            .when(|info| info.argument(0) == Some(&json!("go")));

        let result = with_info(vec![json!("go")], |info| {
            (conditional.should_run(info), conditional.execute(info).is_err())
        });
        assert_eq!(result, (true, true));

        let result = with_info(vec![json!("stop")], |info| {
            (conditional.should_run(info), conditional.execute(info).is_ok())
        });
        assert_eq!(result, (false, true));
    }
}
