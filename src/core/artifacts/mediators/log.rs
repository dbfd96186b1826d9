use std::{any::Any, sync::Arc};

use super::{MediationError, Mediator};
use crate::core::{
    artifacts::{ArtifactError, Position, parser::XmlElement},
    message_context::{HTTP_REQUEST_BODY, MessageContext},
};

/// Severity the log line is emitted at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogCategory {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
    Fatal,
}

impl LogCategory {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "TRACE" => Some(Self::Trace),
            "DEBUG" => Some(Self::Debug),
            "INFO" => Some(Self::Info),
            "WARN" | "WARNING" => Some(Self::Warn),
            "ERROR" => Some(Self::Error),
            "FATAL" => Some(Self::Fatal),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "TRACE",
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
            Self::Fatal => "FATAL",
        }
    }
}

/// How much of the message is included.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    #[default]
    Simple,
    Headers,
    Full,
    Custom,
}

impl LogLevel {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "simple" => Some(Self::Simple),
            "headers" => Some(Self::Headers),
            "full" => Some(Self::Full),
            "custom" => Some(Self::Custom),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogMediator {
    pub category: LogCategory,
    pub level: LogLevel,
    pub message: String,
    pub position: Position,
}

impl LogMediator {
    pub fn new(category: LogCategory, message: impl Into<String>, position: Position) -> Self {
        Self {
            category,
            level: LogLevel::Simple,
            message: message.into(),
            position,
        }
    }

    fn render(&self, ctx: &MessageContext) -> String {
        let mut line = format!("[{}] {}", self.category.as_str(), self.message);
        if matches!(self.level, LogLevel::Headers | LogLevel::Full) {
            let mut headers: Vec<_> = ctx
                .headers
                .iter()
                .map(|(k, v)| format!("{k}: {v}"))
                .collect();
            headers.sort();
            line.push_str(&format!(" headers=[{}]", headers.join(", ")));
        }
        if self.level == LogLevel::Full {
            // The captured request body wins over the current payload.
            let payload = ctx
                .property(HTTP_REQUEST_BODY)
                .map(|body| body.to_text())
                .unwrap_or_else(|| String::from_utf8_lossy(ctx.raw_payload()).into_owned());
            line.push_str(&format!(" payload={payload}"));
        }
        line
    }
}

impl Mediator for LogMediator {
    fn kind(&self) -> &'static str {
        "log"
    }

    fn position(&self) -> &Position {
        &self.position
    }

    fn execute(&self, ctx: &mut MessageContext) -> Result<bool, MediationError> {
        let line = self.render(ctx);
        let message_id = ctx.id();

        match self.category {
            LogCategory::Trace => tracing::trace!(%message_id, position = %self.position, "{line}"),
            LogCategory::Debug => tracing::debug!(%message_id, position = %self.position, "{line}"),
            LogCategory::Info => tracing::info!(%message_id, position = %self.position, "{line}"),
            LogCategory::Warn => tracing::warn!(%message_id, position = %self.position, "{line}"),
            LogCategory::Error | LogCategory::Fatal => {
                tracing::error!(%message_id, position = %self.position, "{line}")
            }
        }
        Ok(true)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub(super) fn build(
    element: &XmlElement,
    position: Position,
) -> Result<Arc<dyn Mediator>, ArtifactError> {
    let invalid = |message: String| ArtifactError::InvalidElement {
        position: position.clone(),
        element: element.name.clone(),
        message,
    };

    let category = match element.attribute("category") {
        Some(value) => LogCategory::parse(value)
            .ok_or_else(|| invalid(format!("unknown log category: {value}")))?,
        None => LogCategory::default(),
    };
    let level = match element.attribute("level") {
        Some(value) => {
            LogLevel::parse(value).ok_or_else(|| invalid(format!("unknown log level: {value}")))?
        }
        None => LogLevel::default(),
    };
    let message = element
        .child("message")
        .map(|m| m.text.trim().to_string())
        .unwrap_or_default();

    Ok(Arc::new(LogMediator {
        category,
        level,
        message,
        position,
    }))
}
