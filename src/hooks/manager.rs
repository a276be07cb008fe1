//! The interceptor: registers aspects, dispatches redirected calls and removes aspects

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, Weak};
use std::time::Instant;

use dashmap::DashMap;
use serde_json::Value;
use uuid::Uuid;

use crate::hooks::{
    AspectError, AspectHandler, AspectIdentifier, AspectInfo, AspectLifecycle, AspectOptions,
    AspectToken, AspectsContainer, ArgumentBoxer, CallInterceptor, CallResult, ContainerSnapshot,
    EngineConfig, HookResult, HookStats, Invocation, Position, RedirectionHandle, Redirector,
    Scope, ScopeRef, ScopeTracker, SignatureProvider, TypeHierarchy,
};
use crate::runtime::{ClassId, Object, Runtime};

/// External services the interceptor relies on
#[derive(Clone)]
pub struct Collaborators {
    pub redirector: Arc<dyn Redirector>,
    pub signatures: Arc<dyn SignatureProvider>,
    pub boxer: Arc<dyn ArgumentBoxer>,
    pub hierarchy: Arc<dyn TypeHierarchy>,
}

impl Collaborators {
    /// Use the bundled runtime for every collaborator
    pub fn from_runtime(runtime: Arc<Runtime>) -> Self {
        Self {
            redirector: runtime.clone(),
            signatures: runtime.clone(),
            boxer: runtime.clone(),
            hierarchy: runtime,
        }
    }
}

/// Container plus the redirection routing calls into it
struct MemberSlot {
    container: Arc<AspectsContainer>,
    redirection: RedirectionHandle,
}

/// Type-scoped state, guarded by the registry lock
#[derive(Default)]
struct Registry {
    tracker: ScopeTracker,
    classes: HashMap<ClassId, HashMap<String, MemberSlot>>,
}

/// Member slots one engine holds on an object
struct EngineSlots {
    engine: Weak<Interceptor>,
    members: HashMap<String, MemberSlot>,
}

/// Per-object aspect state, kept in the object's extension storage and keyed by engine id
#[derive(Default)]
struct InstanceAspects {
    engines: Mutex<HashMap<Uuid, EngineSlots>>,
}

impl InstanceAspects {
    fn container(&self, engine: Uuid, member: &str) -> Option<Arc<AspectsContainer>> {
        lock(&self.engines)
            .get(&engine)
            .and_then(|slots| slots.members.get(member))
            .map(|slot| slot.container.clone())
    }
}

/// Central aspects engine
pub struct Interceptor {
    id: Uuid,
    me: Weak<Interceptor>,
    redirector: Arc<dyn Redirector>,
    signatures: Arc<dyn SignatureProvider>,
    boxer: Arc<dyn ArgumentBoxer>,
    hierarchy: Arc<dyn TypeHierarchy>,
    config: EngineConfig,
    registry: Mutex<Registry>,
    stats: DashMap<Uuid, HookStats>,
    lifecycle: Arc<AspectLifecycle>,
}

impl Interceptor {
    /// Create an engine with an empty registry
    pub fn new(collaborators: Collaborators, config: EngineConfig) -> Arc<Self> {
        if let Some(teardown) = collaborators.redirector.teardown_member() {
            if teardown != config.teardown_member {
                tracing::warn!(
                    configured = %config.teardown_member,
                    object_model = teardown,
                    "Configured teardown member differs from the object model's; both accept only before handlers"
                );
            }
        }
        Arc::new_cyclic(|me| Self {
            id: Uuid::new_v4(),
            me: me.clone(),
            redirector: collaborators.redirector,
            signatures: collaborators.signatures,
            boxer: collaborators.boxer,
            hierarchy: collaborators.hierarchy,
            config,
            registry: Mutex::new(Registry::default()),
            stats: DashMap::new(),
            lifecycle: Arc::new(AspectLifecycle::new()),
        })
    }

    /// Engine over the bundled runtime with default configuration
    pub fn with_runtime(runtime: Arc<Runtime>) -> Arc<Self> {
        Self::new(Collaborators::from_runtime(runtime), EngineConfig::default())
    }

    /// Register `handler` on `member` within `scope`
    pub fn hook<H: AspectHandler + 'static>(
        &self,
        scope: &Scope,
        member: &str,
        options: AspectOptions,
        handler: H,
    ) -> HookResult<AspectToken> {
        self.hook_shared(scope, member, options, Arc::new(handler))
    }

    /// Register an already shared handler
    pub fn hook_shared(
        &self,
        scope: &Scope,
        member: &str,
        options: AspectOptions,
        handler: Arc<dyn AspectHandler>,
    ) -> HookResult<AspectToken> {
        let result = self.register(scope, member, options, handler);
        if let Err(e) = &result {
            tracing::warn!(member, scope = %scope.downgrade(), error = %e, "Aspect registration rejected");
        }
        result
    }

    /// Hook every instance of `class` and its subclasses
    pub fn hook_class<H: AspectHandler + 'static>(
        &self,
        class: ClassId,
        member: &str,
        options: AspectOptions,
        handler: H,
    ) -> HookResult<AspectToken> {
        self.hook(&Scope::Class(class), member, options, handler)
    }

    /// Hook a single object
    pub fn hook_instance<H: AspectHandler + 'static>(
        &self,
        object: &Arc<Object>,
        member: &str,
        options: AspectOptions,
        handler: H,
    ) -> HookResult<AspectToken> {
        self.hook(&Scope::Instance(object.clone()), member, options, handler)
    }

    /// Execution statistics for a registered aspect
    pub fn stats(&self, token: &AspectToken) -> Option<HookStats> {
        self.stats.get(&token.id()).map(|entry| entry.value().clone())
    }

    pub fn lifecycle(&self) -> &Arc<AspectLifecycle> {
        &self.lifecycle
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Number of aspects registered directly on `member` within `scope`
    pub fn aspect_count(&self, scope: &Scope, member: &str) -> usize {
        match scope {
            Scope::Class(class) => self
                .registry()
                .classes
                .get(class)
                .and_then(|members| members.get(member))
                .map(|slot| slot.container.len())
                .unwrap_or(0),
            Scope::Instance(object) => object
                .extension::<InstanceAspects>()
                .and_then(|aspects| aspects.container(self.id, member))
                .map(|container| container.len())
                .unwrap_or(0),
        }
    }

    /// Whether no type-scoped aspect is registered
    pub fn is_idle(&self) -> bool {
        let registry = self.registry();
        registry.classes.is_empty() && registry.tracker.is_empty()
    }

    pub fn has_descendant_hook(&self, class: ClassId, member: &str) -> bool {
        self.registry().tracker.has_descendant_hook(class, member)
    }

    pub fn has_ancestor_hook(&self, class: ClassId, member: &str) -> bool {
        self.registry()
            .tracker
            .has_ancestor_hook(self.hierarchy.as_ref(), class, member)
    }

    fn register(
        &self,
        scope: &Scope,
        member: &str,
        options: AspectOptions,
        handler: Arc<dyn AspectHandler>,
    ) -> HookResult<AspectToken> {
        self.check_eligible(member, options.position)?;

        let signature = self
            .signatures
            .member_signature(scope, member)
            .ok_or_else(|| AspectError::MemberNotFound {
                scope: self.describe(scope),
                member: member.to_string(),
            })?;
        handler
            .signature()
            .check_compatible(&signature)
            .map_err(|reason| AspectError::incompatible(member, reason))?;

        let identifier = {
            let mut registry = self.registry();
            let container = match scope {
                Scope::Class(class) => self.class_container(&mut registry, scope, *class, member)?,
                Scope::Instance(object) => self.instance_container(scope, object, member)?,
            };

            let identifier = Arc::new(AspectIdentifier::new(
                member,
                options,
                scope.downgrade(),
                handler,
                Arc::downgrade(&container),
                self.me.clone(),
            ));
            container.add(identifier.clone(), options.position);
            identifier
        };

        if self.config.record_stats {
            self.stats.insert(identifier.id(), HookStats::default());
        }
        self.lifecycle.installed(&identifier);
        tracing::debug!(
            aspect = %identifier.id(),
            handler = identifier.handler_name(),
            member,
            position = %options.position,
            once = options.automatic_removal,
            scope = %identifier.scope(),
            "Aspect installed"
        );

        Ok(AspectToken::new(identifier))
    }

    fn check_eligible(&self, member: &str, position: Position) -> HookResult<()> {
        if self.config.is_denied(member) {
            return Err(AspectError::not_eligible(member, "member is on the deny-list"));
        }
        if self.is_teardown(member) && position != Position::Before {
            return Err(AspectError::teardown_position(member, position));
        }
        Ok(())
    }

    fn is_teardown(&self, member: &str) -> bool {
        member == self.config.teardown_member || self.redirector.teardown_member() == Some(member)
    }

    fn class_container(
        &self,
        registry: &mut Registry,
        scope: &Scope,
        class: ClassId,
        member: &str,
    ) -> HookResult<Arc<AspectsContainer>> {
        registry.tracker.check_hook(self.hierarchy.as_ref(), class, member)?;

        if let Some(slot) = registry.classes.get(&class).and_then(|members| members.get(member)) {
            return Ok(slot.container.clone());
        }

        let redirection = self.install(scope, member)?;
        if let Err(e) = registry.tracker.register_hook(self.hierarchy.as_ref(), class, member) {
            self.redirector.uninstall(&redirection);
            return Err(e);
        }

        let container = Arc::new(AspectsContainer::new());
        registry.classes.entry(class).or_default().insert(
            member.to_string(),
            MemberSlot {
                container: container.clone(),
                redirection,
            },
        );
        Ok(container)
    }

    fn instance_container(
        &self,
        scope: &Scope,
        object: &Arc<Object>,
        member: &str,
    ) -> HookResult<Arc<AspectsContainer>> {
        let aspects = object.extension_or_insert_with(InstanceAspects::default);
        let mut engines = lock(&aspects.engines);

        // an object member routes to one engine at a time
        engines.retain(|_, slots| slots.engine.strong_count() > 0);
        if engines
            .iter()
            .any(|(id, slots)| *id != self.id && slots.members.contains_key(member))
        {
            return Err(AspectError::RedirectionInstallFailed {
                member: member.to_string(),
                reason: format!("{} is already redirected by another interceptor", self.describe(scope)),
            });
        }

        let members = &mut engines
            .entry(self.id)
            .or_insert_with(|| EngineSlots {
                engine: self.me.clone(),
                members: HashMap::new(),
            })
            .members;
        if let Some(slot) = members.get(member) {
            return Ok(slot.container.clone());
        }

        let redirection = self.install(scope, member)?;
        let container = Arc::new(AspectsContainer::new());
        members.insert(
            member.to_string(),
            MemberSlot {
                container: container.clone(),
                redirection,
            },
        );
        Ok(container)
    }

    fn install(&self, scope: &Scope, member: &str) -> HookResult<RedirectionHandle> {
        let entry: Weak<dyn CallInterceptor> = self.me.clone();
        self.redirector
            .install(scope, member, entry)
            .map_err(|e| AspectError::RedirectionInstallFailed {
                member: member.to_string(),
                reason: e.to_string(),
            })
    }

    /// Deregister one aspect, tearing down its container once empty
    pub(crate) fn remove_identifier(&self, aspect: &Arc<AspectIdentifier>) -> HookResult<()> {
        let member = aspect.member();
        {
            let mut registry = self.registry();
            match aspect.scope() {
                ScopeRef::Class(class) => {
                    let container = detach(aspect)?;
                    if container.is_empty() {
                        self.release_class_slot(&mut registry, *class, member, &container);
                    }
                }
                ScopeRef::Instance { object, .. } => {
                    let object = object.upgrade().ok_or_else(|| AspectError::OwnerDeallocated {
                        member: member.to_string(),
                    })?;
                    let container = detach(aspect)?;
                    if container.is_empty() {
                        self.release_instance_slot(&object, member, &container);
                    }
                }
            }
        }

        self.stats.remove(&aspect.id());
        self.lifecycle.removed(aspect);
        tracing::debug!(
            aspect = %aspect.id(),
            handler = aspect.handler_name(),
            member,
            scope = %aspect.scope(),
            "Aspect removed"
        );
        Ok(())
    }

    fn release_class_slot(
        &self,
        registry: &mut Registry,
        class: ClassId,
        member: &str,
        container: &Arc<AspectsContainer>,
    ) {
        let Some(members) = registry.classes.get_mut(&class) else {
            return;
        };
        if !owns(members, member, container) {
            return;
        }
        if let Some(slot) = members.remove(member) {
            self.redirector.uninstall(&slot.redirection);
        }
        if members.is_empty() {
            registry.classes.remove(&class);
        }
        registry.tracker.unregister_hook(class, member);
    }

    fn release_instance_slot(&self, object: &Object, member: &str, container: &Arc<AspectsContainer>) {
        let Some(aspects) = object.extension::<InstanceAspects>() else {
            return;
        };
        let mut engines = lock(&aspects.engines);
        let Some(slots) = engines.get_mut(&self.id) else {
            return;
        };
        if owns(&slots.members, member, container) {
            if let Some(slot) = slots.members.remove(member) {
                self.redirector.uninstall(&slot.redirection);
            }
        }
        if slots.members.is_empty() {
            engines.remove(&self.id);
        }
    }

    fn run_phase(
        &self,
        chains: &[ContainerSnapshot],
        position: Position,
        info: &AspectInfo<'_>,
        pending: &mut PendingRemovals<'_>,
    ) -> CallResult<()> {
        for chain in chains {
            for aspect in chain.handlers_for(position).iter() {
                if !aspect.admit(info) {
                    continue;
                }
                if aspect.options().automatic_removal {
                    pending.push(aspect.clone());
                }
                self.execute(aspect, info)?;
            }
        }
        Ok(())
    }

    fn execute(&self, aspect: &AspectIdentifier, info: &AspectInfo<'_>) -> CallResult<()> {
        self.lifecycle.executing(aspect);
        let start = Instant::now();
        let result = aspect.handler().execute(info);
        let duration = start.elapsed();

        match &result {
            Ok(()) => {
                self.record(aspect.id(), |stats| stats.record_success(duration));
                self.lifecycle.completed(aspect, duration);
            }
            Err(e) => {
                self.record(aspect.id(), |stats| stats.record_failure(duration));
                tracing::debug!(
                    handler = aspect.handler_name(),
                    member = aspect.member(),
                    error = %e,
                    "Aspect handler failed"
                );
                self.lifecycle.failed(aspect, duration, e.to_string());
            }
        }
        result
    }

    fn record(&self, id: Uuid, update: impl FnOnce(&mut HookStats)) {
        if !self.config.record_stats {
            return;
        }
        if let Some(mut stats) = self.stats.get_mut(&id) {
            update(&mut stats);
        }
    }

    fn chains_for(&self, invocation: &Invocation) -> Vec<ContainerSnapshot> {
        let target = invocation.target();
        let member = invocation.member();
        let lineage = self.hierarchy.lineage(target.class());

        let class_chain = {
            let registry = self.registry();
            lineage
                .iter()
                .find_map(|class| registry.classes.get(class).and_then(|members| members.get(member)))
                .map(|slot| slot.container.snapshot())
        };
        let instance_chain = target
            .extension::<InstanceAspects>()
            .and_then(|aspects| aspects.container(self.id, member))
            .map(|container| container.snapshot());

        class_chain.into_iter().chain(instance_chain).collect()
    }

    fn describe(&self, scope: &Scope) -> String {
        match scope {
            Scope::Class(class) => format!("class {}", self.hierarchy.type_name(*class)),
            Scope::Instance(object) => format!(
                "object #{} of class {}",
                object.id(),
                self.hierarchy.type_name(object.class())
            ),
        }
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        lock(&self.registry)
    }
}

impl CallInterceptor for Interceptor {
    fn intercept(&self, invocation: &Invocation) -> CallResult<Value> {
        let chains = self.chains_for(invocation);
        tracing::trace!(
            member = invocation.member(),
            object = invocation.target().id(),
            chains = chains.len(),
            "Dispatching intercepted call"
        );

        let info = AspectInfo::new(invocation, self.boxer.as_ref());
        let mut pending = PendingRemovals::new(self);

        self.run_phase(&chains, Position::Before, &info, &mut pending)?;
        if chains.iter().any(|chain| !chain.instead.is_empty()) {
            self.run_phase(&chains, Position::Instead, &info, &mut pending)?;
        } else {
            invocation.invoke()?;
        }
        self.run_phase(&chains, Position::After, &info, &mut pending)?;

        Ok(invocation.take_return_value())
    }
}

/// One-shot aspects fired during a dispatch, removed when the dispatch ends however it ends
struct PendingRemovals<'a> {
    engine: &'a Interceptor,
    fired: Vec<Arc<AspectIdentifier>>,
}

impl<'a> PendingRemovals<'a> {
    fn new(engine: &'a Interceptor) -> Self {
        Self {
            engine,
            fired: Vec::new(),
        }
    }

    fn push(&mut self, aspect: Arc<AspectIdentifier>) {
        self.fired.push(aspect);
    }
}

impl Drop for PendingRemovals<'_> {
    fn drop(&mut self) {
        for aspect in self.fired.drain(..) {
            if let Err(e) = self.engine.remove_identifier(&aspect) {
                if !e.is_removal_noop() {
                    tracing::warn!(
                        handler = aspect.handler_name(),
                        member = aspect.member(),
                        error = %e,
                        "Failed to remove one-shot aspect"
                    );
                }
            }
        }
    }
}

/// Process-wide engine over [`Runtime::global`]
pub fn global() -> &'static Arc<Interceptor> {
    static GLOBAL: OnceLock<Arc<Interceptor>> = OnceLock::new();
    GLOBAL.get_or_init(|| Interceptor::with_runtime(Runtime::global().clone()))
}

fn detach(aspect: &Arc<AspectIdentifier>) -> HookResult<Arc<AspectsContainer>> {
    let already_removed = || AspectError::AlreadyRemoved {
        member: aspect.member().to_string(),
    };
    let container = aspect.container().upgrade().ok_or_else(already_removed)?;
    if !container.remove(aspect) {
        return Err(already_removed());
    }
    Ok(container)
}

fn owns(members: &HashMap<String, MemberSlot>, member: &str, container: &Arc<AspectsContainer>) -> bool {
    members
        .get(member)
        .map(|slot| Arc::ptr_eq(&slot.container, container))
        .unwrap_or(false)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
