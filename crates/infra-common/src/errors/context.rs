use std::fmt;

use crate::errors::types::{Error, Result};

/// Where an error happened
#[derive(Debug, Clone)]
pub struct ErrorContext {
    /// Component where the error occurred
    pub component: String,
    /// Operation that was being performed
    pub operation: String,
    pub details: Option<String>,
}

impl ErrorContext {
    pub fn new<S: Into<String>, T: Into<String>>(component: S, operation: T) -> Self {
        ErrorContext {
            component: component.into(),
            operation: operation.into(),
            details: None,
        }
    }

    pub fn with_details<S: Into<String>>(mut self, details: S) -> Self {
        self.details = Some(details.into());
        self
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.component, self.operation)?;
        if let Some(details) = &self.details {
            write!(f, " ({})", details)?;
        }
        Ok(())
    }
}

/// Attach context to an error
pub trait ErrorExt {
    fn context(self, ctx: ErrorContext) -> Error;

    fn with_context<S: Into<String>, T: Into<String>>(self, component: S, operation: T) -> Error;
}

impl ErrorExt for Error {
    fn context(self, ctx: ErrorContext) -> Error {
        match self {
            // Keep the variant for errors callers match on
            Error::Config(msg) => Error::Config(format!("{} [{}]", msg, ctx)),
            Error::Logging(msg) => Error::Logging(format!("{} [{}]", msg, ctx)),
            other => Error::Custom(format!("{} [{}]", other, ctx)),
        }
    }

    fn with_context<S: Into<String>, T: Into<String>>(self, component: S, operation: T) -> Error {
        self.context(ErrorContext::new(component, operation))
    }
}

/// Attach context to the error side of a result
pub trait ResultExt<T> {
    fn context(self, ctx: ErrorContext) -> Result<T>;

    fn with_context<S: Into<String>, U: Into<String>>(self, component: S, operation: U)
    -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, ctx: ErrorContext) -> Result<T> {
        self.map_err(|e| ErrorExt::context(e, ctx))
    }

    fn with_context<S: Into<String>, U: Into<String>>(
        self,
        component: S,
        operation: U,
    ) -> Result<T> {
        self.map_err(|e| ErrorExt::with_context(e, component, operation))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_keeps_config_variant() {
        let err = Error::Config("missing key".into()).with_context("cli", "load_policy");
        match err {
            Error::Config(msg) => assert_eq!(msg, "missing key [cli::load_policy]"),
            other => panic!("unexpected variant: {:?}", other),
        }
    }

    #[test]
    fn test_context_wraps_other_errors() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "scenario.toml");
        let ctx = ErrorContext::new("cli", "read_scenario").with_details("phase file");
        let err = Error::from(io).context(ctx);
        assert!(matches!(err, Error::Custom(_)));
        assert!(err.to_string().ends_with("[cli::read_scenario (phase file)]"));
    }

    #[test]
    fn test_result_ext_leaves_ok_untouched() {
        let ok: Result<u32> = Ok(7);
        assert_eq!(ok.with_context("cli", "noop").unwrap(), 7);

        let err: Result<u32> = Err(Error::Internal("boom".into()));
        let err = err.with_context("cli", "simulate").unwrap_err();
        assert!(err.to_string().contains("cli::simulate"));
    }
}
