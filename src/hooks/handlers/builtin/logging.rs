//! Logging aspect handler

use crate::hooks::{AspectHandler, AspectInfo, BuiltInConfig, CallResult};
use serde_json::{json, Value};
use tracing::{debug, error, info, warn, Level};

/// Built-in logging handler
pub struct LoggingHandler {
    name: String,
    level: Level,
    format: LogFormat,
    include_return: bool,
}

#[derive(Debug, Clone, Copy)]
enum LogFormat {
    Json,
    Pretty,
    Compact,
}

impl LoggingHandler {
    /// Create a new logging handler
    pub fn new(name: impl Into<String>, config: BuiltInConfig) -> Self {
        // Parse log level from config
        let level = config
            .get_str("level")
            .and_then(|s| match s.to_lowercase().as_str() {
                "error" => Some(Level::ERROR),
                "warn" | "warning" => Some(Level::WARN),
                "info" => Some(Level::INFO),
                "debug" => Some(Level::DEBUG),
                "trace" => Some(Level::TRACE),
                _ => None,
            })
            .unwrap_or(Level::INFO);

        let format = config
            .get_str("format")
            .and_then(|s| match s.to_lowercase().as_str() {
                "json" => Some(LogFormat::Json),
                "pretty" => Some(LogFormat::Pretty),
                "compact" => Some(LogFormat::Compact),
                _ => None,
            })
            .unwrap_or(LogFormat::Compact);

        Self {
            name: name.into(),
            level,
            format,
            include_return: config.get_bool("include_return").unwrap_or(false),
        }
    }

    /// Format the log message
    fn format_message(&self, info: &AspectInfo<'_>) -> String {
        let subject = info.subject();
        let return_value = if self.include_return {
            info.return_value()
        } else {
            None
        };

        match self.format {
            LogFormat::Json => {
                let mut entry = json!({
                    "handler": self.name,
                    "member": info.member(),
                    "object": subject.id(),
                    "class": subject.class().to_string(),
                    "arguments": info.arguments(),
                });
                if let (Value::Object(map), Some(value)) = (&mut entry, return_value) {
                    map.insert("return".to_string(), value);
                }
                entry.to_string()
            }
            LogFormat::Pretty => {
                let mut message = format!(
                    "Member: {} | Handler: {} | Object: #{} | Arguments: {}",
                    info.member(),
                    self.name,
                    subject.id(),
                    serde_json::to_string_pretty(info.arguments()).unwrap_or_default()
                );
                if let Some(value) = return_value {
                    message.push_str(&format!(" | Return: {}", value));
                }
                message
            }
            LogFormat::Compact => {
                let mut message = format!(
                    "[{}] {}: {}",
                    info.member(),
                    self.name,
                    serde_json::to_string(info.arguments()).unwrap_or_default()
                );
                if let Some(value) = return_value {
                    message.push_str(&format!(" -> {}", value));
                }
                message
            }
        }
    }
}

impl AspectHandler for LoggingHandler {
    fn execute(&self, info: &AspectInfo<'_>) -> CallResult<()> {
        let message = self.format_message(info);

        // Log at configured level
        match self.level {
            Level::ERROR => error!("{}", message),
            Level::WARN => warn!("{}", message),
            Level::INFO => info!("{}", message),
            Level::DEBUG => debug!("{}", message),
            _ => tracing::trace!("{}", message),
        }

        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
