use std::collections::BTreeMap;
use std::fmt;

use tracing::{Level, Span};

/// Context information for logging
#[derive(Debug, Clone)]
pub struct LogContext {
    /// Component that is generating the log
    pub component: String,
    /// Operation or action being performed
    pub operation: Option<String>,
    /// Call session the work belongs to
    pub session: Option<String>,
    pub fields: BTreeMap<String, String>,
}

impl LogContext {
    pub fn new<S: Into<String>>(component: S) -> Self {
        LogContext {
            component: component.into(),
            operation: None,
            session: None,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_operation<S: Into<String>, T: Into<String>>(component: S, operation: T) -> Self {
        LogContext {
            operation: Some(operation.into()),
            ..Self::new(component)
        }
    }

    pub fn with_session<S: Into<String>>(mut self, session: S) -> Self {
        self.session = Some(session.into());
        self
    }

    pub fn with_field<S: Into<String>, T: Into<String>>(mut self, key: S, value: T) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Create a span carrying this context
    ///
    /// Extra fields are rendered into a single `fields` value since span
    /// field names are fixed at compile time.
    pub fn span(&self, level: Level) -> Span {
        let component = self.component.as_str();
        let operation = self.operation.as_deref().unwrap_or("");
        let session = self.session.as_deref().unwrap_or("");
        let fields = self.render_fields();

        macro_rules! context_span {
            ($span:ident) => {
                tracing::$span!(
                    "carelink",
                    component = %component,
                    operation = %operation,
                    session = %session,
                    fields = %fields
                )
            };
        }

        if level == Level::TRACE {
            context_span!(trace_span)
        } else if level == Level::DEBUG {
            context_span!(debug_span)
        } else if level == Level::INFO {
            context_span!(info_span)
        } else if level == Level::WARN {
            context_span!(warn_span)
        } else {
            context_span!(error_span)
        }
    }

    fn render_fields(&self) -> String {
        self.fields
            .iter()
            .map(|(key, value)| format!("{}={}", key, value))
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl fmt::Display for LogContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.component)?;

        if let Some(op) = &self.operation {
            write!(f, "[{}]", op)?;
        }
        if let Some(session) = &self.session {
            write!(f, "[session={}]", session)?;
        }
        for (key, value) in &self.fields {
            write!(f, "[{}={}]", key, value)?;
        }

        Ok(())
    }
}

/// Run a closure inside a context span
pub fn with_context<F, R>(context: &LogContext, level: Level, f: F) -> R
where
    F: FnOnce() -> R,
{
    let span = context.span(level);
    let _guard = span.enter();
    f()
}
