//! Scenario files
//!
//! A scenario declares classes with scripted method bodies, objects, aspects (optionally
//! backed by built-in handlers) and a list of steps: calls, hooks, removals and object
//! disposal. Running it against a fresh [`Runtime`] and [`Interceptor`] produces a trace
//! of everything that fired, plus a list of broken expectations.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::hooks::handlers::create_builtin;
use crate::hooks::{
    AspectEvent, AspectHandler, AspectInfo, AspectOptions, AspectPhase, AspectToken,
    BuiltInConfig, CallResult, Collaborators, ConditionalHandler, EngineConfig, HandlerSignature,
    HookStats, Interceptor, LifecycleObserver, LoggingObserver, Position, Scope, Signature, ValueKind,
};
use crate::runtime::{ClassId, Method, Object, Runtime};

/// Scenario played by `aspect-hooks demo`
const DEMO_SCENARIO: &str = include_str!("../demos/animals.toml");

/// A scenario file
#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub name: String,
    /// Engine settings; the caller's configuration applies when absent
    #[serde(default)]
    pub engine: Option<EngineConfig>,
    #[serde(default)]
    pub classes: Vec<ClassDecl>,
    #[serde(default)]
    pub objects: Vec<ObjectDecl>,
    #[serde(default)]
    pub aspects: Vec<AspectDecl>,
    #[serde(default)]
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClassDecl {
    pub name: String,
    #[serde(default)]
    pub superclass: Option<String>,
    #[serde(default)]
    pub methods: Vec<MethodDecl>,
}

/// Method with a scripted body. The first of `fail`, `template`, `echo`, `value` that is
/// set decides what the method does; with none set it returns `null`.
#[derive(Debug, Clone, Deserialize)]
pub struct MethodDecl {
    pub name: String,
    #[serde(default)]
    pub params: Vec<ValueKind>,
    #[serde(default = "void")]
    pub returns: ValueKind,
    /// Fail the call with this message
    pub fail: Option<String>,
    /// Return this text with `{0}`.. `{n}`, `{class}` and `{name}` substituted
    pub template: Option<String>,
    /// Return the argument at this index
    pub echo: Option<usize>,
    /// Return this constant
    pub value: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObjectDecl {
    pub name: String,
    pub class: String,
}

/// An aspect on either a class (`class`) or a single object (`object`)
#[derive(Debug, Clone, Deserialize)]
pub struct AspectDecl {
    pub name: String,
    pub class: Option<String>,
    pub object: Option<String>,
    pub member: String,
    pub position: Position,
    /// Remove automatically after the first call it runs for
    #[serde(default)]
    pub once: bool,
    /// Call the original implementation from within the handler
    #[serde(default)]
    pub invoke_original: bool,
    /// Built-in handler run after the trace entry is recorded
    #[serde(default)]
    pub builtin: Option<BuiltInConfig>,
    /// Only run when the first argument equals this value
    #[serde(default)]
    pub when_argument: Option<Value>,
    /// Argument kinds the handler declares
    #[serde(default)]
    pub params: Vec<ValueKind>,
    /// Register before the first step; otherwise wait for a `hook` step
    #[serde(default = "default_true")]
    pub install: bool,
    #[serde(default)]
    pub expect_rejected: bool,
}

/// One step of a scenario
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Step {
    Call {
        call: String,
        on: String,
        #[serde(default)]
        args: Vec<Value>,
        #[serde(default)]
        expect: Option<Value>,
        #[serde(default)]
        expect_error: bool,
    },
    Hook {
        hook: String,
    },
    Remove {
        remove: String,
    },
    Dispose {
        dispose: String,
    },
}

fn void() -> ValueKind {
    ValueKind::Void
}

fn default_true() -> bool {
    true
}

/// Something that happened while a scenario ran
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TraceEntry {
    Hooked { aspect: String },
    Rejected { aspect: String, error: String },
    Call { object: String, member: String },
    Fired { aspect: String, position: Position },
    Started { aspect: String },
    Finished { aspect: String },
    Original { class: String, member: String },
    Returned { object: String, member: String, value: Value },
    Failed { object: String, member: String, error: String },
    Removed { aspect: String },
    RemoveFailed { aspect: String, error: String },
    Disposed { object: String },
}

impl fmt::Display for TraceEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hooked { aspect } => write!(f, "hooked {}", aspect),
            Self::Rejected { aspect, error } => write!(f, "rejected {}: {}", aspect, error),
            Self::Call { object, member } => write!(f, "call {}.{}", object, member),
            Self::Fired { aspect, position } => write!(f, "  {} {}", position, aspect),
            Self::Started { aspect } => write!(f, "  {} start", aspect),
            Self::Finished { aspect } => write!(f, "  {} end", aspect),
            Self::Original { class, member } => write!(f, "  original {}.{}", class, member),
            Self::Returned { value, .. } => write!(f, "  -> {}", value),
            Self::Failed { error, .. } => write!(f, "  !! {}", error),
            Self::Removed { aspect } => write!(f, "removed {}", aspect),
            Self::RemoveFailed { aspect, error } => write!(f, "remove {} failed: {}", aspect, error),
            Self::Disposed { object } => write!(f, "disposed {}", object),
        }
    }
}

/// Shared, append-only trace
#[derive(Debug, Clone, Default)]
pub struct Trace(Arc<Mutex<Vec<TraceEntry>>>);

impl Trace {
    pub fn push(&self, entry: TraceEntry) {
        self.lock().push(entry);
    }

    pub fn entries(&self) -> Vec<TraceEntry> {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<TraceEntry>> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Records aspect removals (explicit and automatic) into the trace
pub struct TraceObserver {
    trace: Trace,
}

impl TraceObserver {
    pub fn new(trace: Trace) -> Self {
        Self { trace }
    }
}

impl LifecycleObserver for TraceObserver {
    fn on_event(&self, event: &AspectEvent) {
        if event.phase == AspectPhase::Removed {
            self.trace.push(TraceEntry::Removed {
                aspect: event.handler.clone(),
            });
        }
    }
}

/// Handler used for every scenario aspect
struct TraceHandler {
    name: String,
    position: Position,
    invoke_original: bool,
    params: Vec<ValueKind>,
    inner: Option<Arc<dyn AspectHandler>>,
    trace: Trace,
}

impl AspectHandler for TraceHandler {
    fn execute(&self, info: &AspectInfo<'_>) -> CallResult<()> {
        if self.invoke_original {
            self.trace.push(TraceEntry::Started { aspect: self.name.clone() });
            info.invoke_original()?;
        } else {
            self.trace.push(TraceEntry::Fired {
                aspect: self.name.clone(),
                position: self.position,
            });
        }

        if let Some(inner) = &self.inner {
            inner.execute(info)?;
        }

        if self.invoke_original {
            self.trace.push(TraceEntry::Finished { aspect: self.name.clone() });
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn signature(&self) -> HandlerSignature {
        match &self.inner {
            Some(inner) if self.params.is_empty() => inner.signature(),
            _ => HandlerSignature::with_params(self.params.clone()),
        }
    }
}

/// Execution statistics of one aspect still registered when the scenario ended
#[derive(Debug, Clone, Serialize)]
pub struct AspectStats {
    pub aspect: String,
    pub stats: HookStats,
}

/// Outcome of a scenario run
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub name: String,
    pub trace: Vec<TraceEntry>,
    pub failures: Vec<String>,
    pub stats: Vec<AspectStats>,
}

impl ScenarioReport {
    pub fn passed(&self) -> bool {
        self.failures.is_empty()
    }
}

impl Scenario {
    /// Parse a scenario from TOML
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).context("Invalid scenario")
    }

    /// Load a scenario file; the file stem names it when the file does not
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read scenario {}", path.display()))?;
        let mut scenario = Self::from_toml(&content)
            .with_context(|| format!("Failed to parse scenario {}", path.display()))?;
        if scenario.name.is_empty() {
            scenario.name = path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_default();
        }
        Ok(scenario)
    }

    /// The bundled demonstration scenario
    pub fn demo() -> Result<Self> {
        Self::from_toml(DEMO_SCENARIO)
    }

    /// Check that every name the scenario references is declared
    pub fn check(&self) -> Result<()> {
        if let Some(engine) = &self.engine {
            engine.validate()?;
        }

        let mut classes = HashSet::new();
        for class in &self.classes {
            if let Some(superclass) = &class.superclass {
                if !classes.contains(superclass.as_str()) {
                    bail!("Class '{}' extends '{}', which is not declared before it", class.name, superclass);
                }
            }
            if !classes.insert(class.name.as_str()) {
                bail!("Class '{}' declared twice", class.name);
            }
        }

        let mut objects = HashSet::new();
        for object in &self.objects {
            if !classes.contains(object.class.as_str()) {
                bail!("Object '{}' has unknown class '{}'", object.name, object.class);
            }
            if !objects.insert(object.name.as_str()) {
                bail!("Object '{}' declared twice", object.name);
            }
        }

        let mut aspects = HashSet::new();
        for aspect in &self.aspects {
            match (&aspect.class, &aspect.object) {
                (Some(class), None) if classes.contains(class.as_str()) => {}
                (None, Some(object)) if objects.contains(object.as_str()) => {}
                (Some(_), Some(_)) | (None, None) => {
                    bail!("Aspect '{}' needs exactly one of 'class' or 'object'", aspect.name)
                }
                _ => bail!("Aspect '{}' targets an undeclared class or object", aspect.name),
            }
            if let Some(config) = &aspect.builtin {
                create_builtin(aspect.name.clone(), config.clone())?;
            }
            if !aspects.insert(aspect.name.as_str()) {
                bail!("Aspect '{}' declared twice", aspect.name);
            }
        }

        for (index, step) in self.steps.iter().enumerate() {
            let known = match step {
                Step::Call { on, .. } | Step::Dispose { dispose: on } => objects.contains(on.as_str()),
                Step::Hook { hook: name } | Step::Remove { remove: name } => aspects.contains(name.as_str()),
            };
            if !known {
                bail!("Step {} references an undeclared name", index + 1);
            }
        }

        Ok(())
    }

    /// Run the scenario against a fresh runtime and engine with default settings
    pub fn run(&self) -> Result<ScenarioReport> {
        self.run_with(&EngineConfig::default())
    }

    /// Run the scenario, using `engine` unless the scenario declares its own settings
    pub fn run_with(&self, engine: &EngineConfig) -> Result<ScenarioReport> {
        self.check()?;

        let engine = self.engine.clone().unwrap_or_else(|| engine.clone());
        let mut run = Run::new(self, engine)?;
        for aspect in self.aspects.iter().filter(|aspect| aspect.install) {
            run.hook(aspect)?;
        }
        for step in &self.steps {
            run.step(step)?;
        }

        tracing::debug!(scenario = %self.name, failures = run.failures.len(), "Scenario finished");
        Ok(run.finish())
    }
}

/// State of one scenario run
struct Run<'s> {
    scenario: &'s Scenario,
    runtime: Arc<Runtime>,
    engine: Arc<Interceptor>,
    trace: Trace,
    classes: HashMap<String, ClassId>,
    objects: HashMap<String, Arc<Object>>,
    tokens: HashMap<String, AspectToken>,
    failures: Vec<String>,
}

impl<'s> Run<'s> {
    fn new(scenario: &'s Scenario, config: EngineConfig) -> Result<Self> {
        let runtime = Arc::new(Runtime::new());
        let engine = Interceptor::new(Collaborators::from_runtime(runtime.clone()), config);
        let trace = Trace::default();
        engine
            .lifecycle()
            .register_observer(Arc::new(TraceObserver::new(trace.clone())));
        engine
            .lifecycle()
            .register_observer(Arc::new(LoggingObserver::new(tracing::Level::DEBUG)));

        let mut classes = HashMap::new();
        for decl in &scenario.classes {
            let superclass = decl.superclass.as_ref().and_then(|name| classes.get(name).copied());
            let class = runtime.define_class(decl.name.clone(), superclass)?;
            for method in &decl.methods {
                runtime.add_method(class, method.name.clone(), scripted_method(&decl.name, method, trace.clone()))?;
            }
            classes.insert(decl.name.clone(), class);
        }

        let mut objects = HashMap::new();
        for decl in &scenario.objects {
            let class = classes
                .get(&decl.class)
                .copied()
                .ok_or_else(|| anyhow!("unknown class '{}'", decl.class))?;
            let object = runtime.instantiate(class)?;
            object.set_ivar("name", Value::String(decl.name.clone()));
            objects.insert(decl.name.clone(), object);
        }

        Ok(Self {
            scenario,
            runtime,
            engine,
            trace,
            classes,
            objects,
            tokens: HashMap::new(),
            failures: Vec::new(),
        })
    }

    fn hook(&mut self, decl: &AspectDecl) -> Result<()> {
        let scope = match (&decl.class, &decl.object) {
            (Some(class), _) => Scope::Class(
                self.classes
                    .get(class)
                    .copied()
                    .ok_or_else(|| anyhow!("unknown class '{}'", class))?,
            ),
            (None, Some(object)) => match self.objects.get(object) {
                Some(object) => Scope::Instance(object.clone()),
                None => {
                    self.failures
                        .push(format!("aspect '{}' targets disposed object '{}'", decl.name, object));
                    return Ok(());
                }
            },
            (None, None) => bail!("aspect '{}' has no target", decl.name),
        };

        let mut options = AspectOptions::new(decl.position);
        if decl.once {
            options = options.once();
        }

        match self.engine.hook_shared(&scope, &decl.member, options, self.handler_for(decl)?) {
            Ok(token) => {
                self.trace.push(TraceEntry::Hooked { aspect: decl.name.clone() });
                if decl.expect_rejected {
                    self.failures
                        .push(format!("aspect '{}' was expected to be rejected", decl.name));
                }
                self.tokens.insert(decl.name.clone(), token);
            }
            Err(e) => {
                self.trace.push(TraceEntry::Rejected {
                    aspect: decl.name.clone(),
                    error: e.to_string(),
                });
                if !decl.expect_rejected {
                    self.failures.push(format!("aspect '{}' rejected: {}", decl.name, e));
                }
            }
        }
        Ok(())
    }

    fn handler_for(&self, decl: &AspectDecl) -> Result<Arc<dyn AspectHandler>> {
        let inner = decl
            .builtin
            .clone()
            .map(|config| create_builtin(decl.name.clone(), config))
            .transpose()?;

        let handler = TraceHandler {
            name: decl.name.clone(),
            position: decl.position,
            invoke_original: decl.invoke_original,
            params: decl.params.clone(),
            inner,
            trace: self.trace.clone(),
        };

        let handler: Arc<dyn AspectHandler> = match &decl.when_argument {
            Some(expected) => {
                let expected = expected.clone();
                Arc::new(handler.when(move |info| info.argument(0) == Some(&expected)))
            }
            None => Arc::new(handler),
        };
        Ok(handler)
    }

    fn step(&mut self, step: &Step) -> Result<()> {
        match step {
            Step::Call {
                call,
                on,
                args,
                expect,
                expect_error,
            } => self.call(on, call, args, expect.as_ref(), *expect_error),
            Step::Hook { hook } => {
                let scenario = self.scenario;
                let decl = scenario
                    .aspects
                    .iter()
                    .find(|aspect| &aspect.name == hook)
                    .ok_or_else(|| anyhow!("unknown aspect '{}'", hook))?;
                self.hook(decl)?;
            }
            Step::Remove { remove } => match self.tokens.get(remove) {
                Some(token) => {
                    if let Err(e) = token.try_remove() {
                        self.trace.push(TraceEntry::RemoveFailed {
                            aspect: remove.clone(),
                            error: e.to_string(),
                        });
                    }
                }
                None => self.failures.push(format!("aspect '{}' was never hooked", remove)),
            },
            Step::Dispose { dispose } => match self.objects.remove(dispose) {
                Some(object) => {
                    if let Err(e) = self.runtime.dispose(object) {
                        self.failures.push(format!("disposing '{}' failed: {:#}", dispose, e));
                    }
                    self.trace.push(TraceEntry::Disposed { object: dispose.clone() });
                }
                None => self.failures.push(format!("object '{}' already disposed", dispose)),
            },
        }
        Ok(())
    }

    fn call(&mut self, object_name: &str, member: &str, args: &[Value], expect: Option<&Value>, expect_error: bool) {
        let Some(object) = self.objects.get(object_name).cloned() else {
            self.failures
                .push(format!("call {}.{}: object was disposed", object_name, member));
            return;
        };

        self.trace.push(TraceEntry::Call {
            object: object_name.to_string(),
            member: member.to_string(),
        });

        match self.runtime.send(&object, member, args.to_vec()) {
            Ok(value) => {
                self.trace.push(TraceEntry::Returned {
                    object: object_name.to_string(),
                    member: member.to_string(),
                    value: value.clone(),
                });
                if expect_error {
                    self.failures
                        .push(format!("call {}.{}: expected an error, got {}", object_name, member, value));
                } else if let Some(expected) = expect {
                    if *expected != value {
                        self.failures.push(format!(
                            "call {}.{}: expected {}, got {}",
                            object_name, member, expected, value
                        ));
                    }
                }
            }
            Err(e) => {
                let error = format!("{:#}", e);
                self.trace.push(TraceEntry::Failed {
                    object: object_name.to_string(),
                    member: member.to_string(),
                    error: error.clone(),
                });
                if !expect_error {
                    self.failures
                        .push(format!("call {}.{} failed: {}", object_name, member, error));
                }
            }
        }
    }

    fn finish(self) -> ScenarioReport {
        let mut stats: Vec<AspectStats> = self
            .tokens
            .iter()
            .filter_map(|(aspect, token)| {
                self.engine.stats(token).map(|stats| AspectStats {
                    aspect: aspect.clone(),
                    stats,
                })
            })
            .collect();
        stats.sort_by(|a, b| a.aspect.cmp(&b.aspect));

        ScenarioReport {
            name: self.scenario.name.clone(),
            trace: self.trace.entries(),
            failures: self.failures,
            stats,
        }
    }
}

/// Build a method whose body is scripted by `decl`
fn scripted_method(class: &str, decl: &MethodDecl, trace: Trace) -> Method {
    let class = class.to_string();
    let body = decl.clone();

    Method::new(Signature::new(decl.params.clone(), decl.returns), move |object, args| {
        trace.push(TraceEntry::Original {
            class: class.clone(),
            member: body.name.clone(),
        });

        if let Some(message) = &body.fail {
            bail!("{}", render(message, &class, object, args));
        }
        if let Some(template) = &body.template {
            return Ok(Value::String(render(template, &class, object, args)));
        }
        if let Some(index) = body.echo {
            return Ok(args.get(index).cloned().unwrap_or(Value::Null));
        }
        Ok(body.value.clone().unwrap_or(Value::Null))
    })
}

fn render(template: &str, class: &str, object: &Object, args: &[Value]) -> String {
    let mut text = template.replace("{class}", class);
    if let Some(Value::String(name)) = object.get_ivar("name") {
        text = text.replace("{name}", &name);
    }
    for (index, arg) in args.iter().enumerate() {
        let shown = match arg {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        text = text.replace(&format!("{{{}}}", index), &shown);
    }
    text
}
