//! Aspect lifecycle events and observers

use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::hooks::{AspectIdentifier, Position};

/// Lifecycle phase of a registered aspect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AspectPhase {
    /// Handler registered
    Installed,
    /// Handler about to run for a call
    Executing,
    /// Handler returned successfully
    Completed,
    /// Handler returned an error
    Failed,
    /// Handler deregistered (explicitly or automatically)
    Removed,
}

/// Aspect lifecycle event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AspectEvent {
    /// Token id of the aspect
    pub aspect: Uuid,
    /// Handler name
    pub handler: String,
    /// Hooked member
    pub member: String,
    pub position: Position,
    /// Current phase
    pub phase: AspectPhase,
    /// Event timestamp
    pub timestamp: DateTime<Utc>,
    /// Optional error message
    pub error: Option<String>,
    /// Execution duration (completed and failed phases)
    pub duration: Option<Duration>,
}

impl AspectEvent {
    fn new(aspect: &AspectIdentifier, phase: AspectPhase) -> Self {
        Self {
            aspect: aspect.id(),
            handler: aspect.handler_name().to_string(),
            member: aspect.member().to_string(),
            position: aspect.options().position,
            phase,
            timestamp: Utc::now(),
            error: None,
            duration: None,
        }
    }
}

/// Aspect lifecycle observer trait
pub trait LifecycleObserver: Send + Sync {
    /// Called when a lifecycle event occurs
    fn on_event(&self, event: &AspectEvent);
}

/// Fans lifecycle events out to registered observers
pub struct AspectLifecycle {
    observers: RwLock<Vec<Arc<dyn LifecycleObserver>>>,
}

impl AspectLifecycle {
    /// Create a new lifecycle manager
    pub fn new() -> Self {
        Self {
            observers: RwLock::new(Vec::new()),
        }
    }

    /// Register an observer
    pub fn register_observer(&self, observer: Arc<dyn LifecycleObserver>) {
        if let Ok(mut observers) = self.observers.write() {
            observers.push(observer);
        }
    }

    pub fn observer_count(&self) -> usize {
        self.observers.read().map(|o| o.len()).unwrap_or(0)
    }

    pub fn installed(&self, aspect: &AspectIdentifier) {
        self.notify(&AspectEvent::new(aspect, AspectPhase::Installed));
    }

    pub fn executing(&self, aspect: &AspectIdentifier) {
        self.notify(&AspectEvent::new(aspect, AspectPhase::Executing));
    }

    pub fn completed(&self, aspect: &AspectIdentifier, duration: Duration) {
        let mut event = AspectEvent::new(aspect, AspectPhase::Completed);
        event.duration = Some(duration);
        self.notify(&event);
    }

    pub fn failed(&self, aspect: &AspectIdentifier, duration: Duration, error: String) {
        let mut event = AspectEvent::new(aspect, AspectPhase::Failed);
        event.duration = Some(duration);
        event.error = Some(error);
        self.notify(&event);
    }

    pub fn removed(&self, aspect: &AspectIdentifier) {
        self.notify(&AspectEvent::new(aspect, AspectPhase::Removed));
    }

    fn notify(&self, event: &AspectEvent) {
        // snapshot so observers may register further observers
        let observers: Vec<Arc<dyn LifecycleObserver>> = match self.observers.read() {
            Ok(observers) => observers.clone(),
            Err(_) => return,
        };
        for observer in observers {
            observer.on_event(event);
        }
    }
}

impl Default for AspectLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

/// Simple logging observer
pub struct LoggingObserver {
    log_level: tracing::Level,
}

impl LoggingObserver {
    pub fn new(log_level: tracing::Level) -> Self {
        Self { log_level }
    }
}

impl LifecycleObserver for LoggingObserver {
    fn on_event(&self, event: &AspectEvent) {
        let message = match event.phase {
            AspectPhase::Installed => format!(
                "Aspect '{}' installed {} '{}'",
                event.handler, event.position, event.member
            ),
            AspectPhase::Executing => format!("Aspect '{}' executing", event.handler),
            AspectPhase::Completed => match event.duration {
                Some(duration) => format!("Aspect '{}' completed in {:?}", event.handler, duration),
                None => format!("Aspect '{}' completed", event.handler),
            },
            AspectPhase::Failed => match &event.error {
                Some(error) => format!("Aspect '{}' failed: {}", event.handler, error),
                None => format!("Aspect '{}' failed", event.handler),
            },
            AspectPhase::Removed => format!("Aspect '{}' removed from '{}'", event.handler, event.member),
        };

        match self.log_level {
            tracing::Level::TRACE => tracing::trace!(aspect = %event.aspect, "{}", message),
            tracing::Level::DEBUG => tracing::debug!(aspect = %event.aspect, "{}", message),
            tracing::Level::INFO => tracing::info!(aspect = %event.aspect, "{}", message),
            tracing::Level::WARN => tracing::warn!(aspect = %event.aspect, "{}", message),
            _ => tracing::error!(aspect = %event.aspect, "{}", message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::{handler_fn, AspectOptions, ScopeRef};
    use crate::runtime::ClassId;
    use std::sync::{Mutex, Weak};

    struct TestObserver {
        events: Arc<Mutex<Vec<AspectEvent>>>,
    }

    impl LifecycleObserver for TestObserver {
        fn on_event(&self, event: &AspectEvent) {
            if let Ok(mut events) = self.events.lock() {
                events.push(event.clone());
            }
        }
    }

    fn aspect() -> AspectIdentifier {
        AspectIdentifier::new(
            "greet",
            AspectOptions::before(),
            ScopeRef::Class(ClassId(0)),
            Arc::new(handler_fn("observer_test", |_info| Ok(()))),
            Weak::new(),
            Weak::new(),
        )
    }

    #[test]
    fn test_lifecycle_flow() {
        let lifecycle = AspectLifecycle::new();
        let events = Arc::new(Mutex::new(Vec::new()));
        lifecycle.register_observer(Arc::new(TestObserver { events: events.clone() }));

        let aspect = aspect();
        lifecycle.installed(&aspect);
        lifecycle.executing(&aspect);
        lifecycle.completed(&aspect, Duration::from_millis(3));
        lifecycle.removed(&aspect);

        let collected = events.lock().unwrap();
        let phases: Vec<AspectPhase> = collected.iter().map(|e| e.phase).collect();
        assert_eq!(
            phases,
            vec![AspectPhase::Installed, AspectPhase::Executing, AspectPhase::Completed, AspectPhase::Removed]
        );
        assert_eq!(collected[2].duration, Some(Duration::from_millis(3)));
        assert_eq!(collected[0].position, Position::Before);
        assert_eq!(collected[0].handler, "observer_test");
    }

    #[test]
    fn test_failed_execution() {
        let lifecycle = AspectLifecycle::new();
        let events = Arc::new(Mutex::new(Vec::new()));
        lifecycle.register_observer(Arc::new(TestObserver { events: events.clone() }));

        lifecycle.failed(&aspect(), Duration::from_millis(1), "boom".to_string());

        let collected = events.lock().unwrap();
        assert_eq!(collected.len(), 1);
        assert_eq!(collected[0].phase, AspectPhase::Failed);
        assert_eq!(collected[0].error.as_deref(), Some("boom"));
    }
}
