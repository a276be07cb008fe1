//! Core types for the aspects system

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use chrono::{DateTime, Utc};

/// Where a handler runs relative to the original implementation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Position {
    /// Called after the original implementation (default)
    After,
    /// Replaces the original implementation
    Instead,
    /// Called before the original implementation
    Before,
}

impl Position {
    /// All positions, in dispatch order
    pub fn all() -> [Self; 3] {
        [Self::Before, Self::Instead, Self::After]
    }

    /// Get a human-readable description of the position
    pub fn description(&self) -> &'static str {
        match self {
            Self::After => "Runs after the original implementation",
            Self::Instead => "Replaces the original implementation",
            Self::Before => "Runs before the original implementation",
        }
    }

    /// Parse a position name as used in configuration files
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "after" => Some(Self::After),
            "instead" => Some(Self::Instead),
            "before" => Some(Self::Before),
            _ => None,
        }
    }
}

impl Default for Position {
    fn default() -> Self {
        Self::After
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::After => write!(f, "after"),
            Self::Instead => write!(f, "instead"),
            Self::Before => write!(f, "before"),
        }
    }
}

/// Position plus behavioural flags for one registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AspectOptions {
    pub position: Position,

    /// Deregister the handler right after its first execution
    #[serde(default)]
    pub automatic_removal: bool,
}

impl AspectOptions {
    const POSITION_FILTER: u32 = 0x07;
    const AUTOMATIC_REMOVAL: u32 = 1 << 3;

    pub fn new(position: Position) -> Self {
        Self {
            position,
            automatic_removal: false,
        }
    }

    pub fn before() -> Self {
        Self::new(Position::Before)
    }

    pub fn instead() -> Self {
        Self::new(Position::Instead)
    }

    pub fn after() -> Self {
        Self::new(Position::After)
    }

    /// Mark the handler for removal after it fires once
    pub fn once(mut self) -> Self {
        self.automatic_removal = true;
        self
    }

    /// Decode the packed option word (`0` after, `1` instead, `2` before, bit 3 automatic removal)
    pub fn from_bits(bits: u32) -> Option<Self> {
        let position = match bits & Self::POSITION_FILTER {
            0 => Position::After,
            1 => Position::Instead,
            2 => Position::Before,
            _ => return None,
        };
        Some(Self {
            position,
            automatic_removal: bits & Self::AUTOMATIC_REMOVAL != 0,
        })
    }

    /// Encode into the packed option word
    pub fn bits(&self) -> u32 {
        let position = match self.position {
            Position::After => 0,
            Position::Instead => 1,
            Position::Before => 2,
        };
        if self.automatic_removal {
            position | Self::AUTOMATIC_REMOVAL
        } else {
            position
        }
    }
}

/// Shape of a parameter or return value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    /// Matches every other kind
    Any,
    /// No value (return position only)
    Void,
    Bool,
    Number,
    String,
    Array,
    Object,
}

impl ValueKind {
    /// Kind of a concrete value; `null` maps to `Void`
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => Self::Void,
            Value::Bool(_) => Self::Bool,
            Value::Number(_) => Self::Number,
            Value::String(_) => Self::String,
            Value::Array(_) => Self::Array,
            Value::Object(_) => Self::Object,
        }
    }

    /// Whether a slot of this kind can hold a value of `other` kind
    pub fn accepts(&self, other: ValueKind) -> bool {
        *self == ValueKind::Any || other == ValueKind::Any || *self == other
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "any" => Some(Self::Any),
            "void" | "null" => Some(Self::Void),
            "bool" | "boolean" => Some(Self::Bool),
            "number" => Some(Self::Number),
            "string" => Some(Self::String),
            "array" => Some(Self::Array),
            "object" => Some(Self::Object),
            _ => None,
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Any => "any",
            Self::Void => "void",
            Self::Bool => "bool",
            Self::Number => "number",
            Self::String => "string",
            Self::Array => "array",
            Self::Object => "object",
        };
        f.write_str(name)
    }
}

/// Call signature of a member
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    #[serde(default)]
    pub params: Vec<ValueKind>,

    #[serde(default = "default_returns")]
    pub returns: ValueKind,
}

impl Signature {
    pub fn new(params: Vec<ValueKind>, returns: ValueKind) -> Self {
        Self { params, returns }
    }

    /// Signature with no parameters and no return value
    pub fn unit() -> Self {
        Self::new(Vec::new(), ValueKind::Void)
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }
}

impl Default for Signature {
    fn default() -> Self {
        Self::unit()
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params: Vec<String> = self.params.iter().map(|p| p.to_string()).collect();
        write!(f, "({}) -> {}", params.join(", "), self.returns)
    }
}

/// Signature a handler declares for itself.
///
/// `params` lists the member arguments the handler wants to see, in order, after the
/// call context. A handler may declare fewer parameters than the member has but never
/// more. A `Void` return means the handler does not care about the return value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerSignature {
    #[serde(default)]
    pub params: Vec<ValueKind>,

    #[serde(default = "default_returns")]
    pub returns: ValueKind,
}

impl Default for HandlerSignature {
    fn default() -> Self {
        Self::context_only()
    }
}

impl HandlerSignature {
    /// Handler that only takes the call context
    pub fn context_only() -> Self {
        Self {
            params: Vec::new(),
            returns: ValueKind::Void,
        }
    }

    pub fn with_params(params: Vec<ValueKind>) -> Self {
        Self {
            params,
            returns: ValueKind::Void,
        }
    }

    pub fn returning(mut self, returns: ValueKind) -> Self {
        self.returns = returns;
        self
    }

    /// Check this handler signature against a member signature, returning the reason
    /// for the first incompatibility
    pub fn check_compatible(&self, member: &Signature) -> Result<(), String> {
        if self.params.len() > member.params.len() {
            return Err(format!(
                "handler takes {} arguments but the member only has {}",
                self.params.len(),
                member.params.len()
            ));
        }

        for (index, (declared, actual)) in self.params.iter().zip(&member.params).enumerate() {
            if !declared.accepts(*actual) {
                return Err(format!(
                    "argument {} is declared as {} but the member passes {}",
                    index, declared, actual
                ));
            }
        }

        if self.returns != ValueKind::Void && !self.returns.accepts(member.returns) {
            return Err(format!(
                "handler returns {} but the member returns {}",
                self.returns, member.returns
            ));
        }

        Ok(())
    }
}

fn default_returns() -> ValueKind {
    ValueKind::Void
}

/// Handler execution statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HookStats {
    /// Total number of executions
    pub total_executions: u64,

    /// Number of successful executions
    pub successful_executions: u64,

    /// Number of failed executions
    pub failed_executions: u64,

    /// Average execution time
    pub average_duration: Option<Duration>,

    /// Maximum execution time
    pub max_duration: Option<Duration>,

    /// Last execution time
    pub last_execution: Option<DateTime<Utc>>,
}

impl HookStats {
    /// Record a successful execution
    pub fn record_success(&mut self, duration: Duration) {
        self.total_executions += 1;
        self.successful_executions += 1;
        self.last_execution = Some(Utc::now());
        self.update_duration_stats(duration);
    }

    /// Record a failed execution
    pub fn record_failure(&mut self, duration: Duration) {
        self.total_executions += 1;
        self.failed_executions += 1;
        self.last_execution = Some(Utc::now());
        self.update_duration_stats(duration);
    }

    fn update_duration_stats(&mut self, duration: Duration) {
        if let Some(avg) = self.average_duration {
            let total_nanos = avg.as_nanos() * (self.total_executions - 1) as u128;
            let new_total = total_nanos + duration.as_nanos();
            self.average_duration = Some(Duration::from_nanos(
                (new_total / self.total_executions as u128) as u64
            ));
        } else {
            self.average_duration = Some(duration);
        }

        match self.max_duration {
            Some(max) if duration <= max => {}
            _ => self.max_duration = Some(duration),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_display_and_parse() {
        assert_eq!(Position::Before.to_string(), "before");
        assert_eq!(Position::from_name("Instead"), Some(Position::Instead));
        assert_eq!(Position::from_name("around"), None);
        assert_eq!(Position::default(), Position::After);
    }

    #[test]
    fn test_option_bits() {
        let options = AspectOptions::from_bits(2 | (1 << 3)).unwrap();
        assert_eq!(options.position, Position::Before);
        assert!(options.automatic_removal);
        assert_eq!(options.bits(), 10);

        assert_eq!(AspectOptions::from_bits(0).unwrap(), AspectOptions::after());
        assert!(AspectOptions::from_bits(3).is_none());
    }

    #[test]
    fn test_handler_signature_arity() {
        let member = Signature::new(vec![ValueKind::String], ValueKind::String);

        assert_eq!(HandlerSignature::default(), HandlerSignature::context_only());
        assert!(HandlerSignature::context_only().check_compatible(&member).is_ok());
        assert!(HandlerSignature::with_params(vec![ValueKind::String])
            .check_compatible(&member)
            .is_ok());

        let too_long = HandlerSignature::with_params(vec![ValueKind::String, ValueKind::Number]);
        let err = too_long.check_compatible(&member).unwrap_err();
        assert!(err.contains("takes 2 arguments"));
    }

    #[test]
    fn test_handler_signature_kinds() {
        let member = Signature::new(vec![ValueKind::Number, ValueKind::Any], ValueKind::Bool);

        let wrong = HandlerSignature::with_params(vec![ValueKind::String]);
        assert!(wrong.check_compatible(&member).is_err());

        let any = HandlerSignature::with_params(vec![ValueKind::Any, ValueKind::Object]);
        assert!(any.check_compatible(&member).is_ok());

        let bad_return = HandlerSignature::context_only().returning(ValueKind::String);
        assert!(bad_return.check_compatible(&member).is_err());

        let good_return = HandlerSignature::context_only().returning(ValueKind::Bool);
        assert!(good_return.check_compatible(&member).is_ok());
    }

    #[test]
    fn test_value_kind_of() {
        assert_eq!(ValueKind::of(&serde_json::json!("x")), ValueKind::String);
        assert_eq!(ValueKind::of(&serde_json::json!(null)), ValueKind::Void);
        assert_eq!(ValueKind::from_name("boolean"), Some(ValueKind::Bool));
    }

    #[test]
    fn test_hook_stats() {
        let mut stats = HookStats::default();

        stats.record_success(Duration::from_millis(100));
        assert_eq!(stats.total_executions, 1);
        assert_eq!(stats.successful_executions, 1);
        assert_eq!(stats.average_duration, Some(Duration::from_millis(100)));

        stats.record_failure(Duration::from_millis(200));
        assert_eq!(stats.total_executions, 2);
        assert_eq!(stats.failed_executions, 1);
        assert_eq!(stats.average_duration, Some(Duration::from_millis(150)));
        assert_eq!(stats.max_duration, Some(Duration::from_millis(200)));
    }
}
