use std::fmt::{Debug, Write};
use std::{borrow::Cow, panic::Location};

use serde::{ser::SerializeStruct, Deserialize, Serialize};
use strum_macros::IntoStaticStr;

use crate::{config::InvalidConfigurationError, storage_graph::error::PlanError};

/// The tool could not run because the environment it runs in is not suitable.
#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionEnvironmentMisconfigurationError {
    #[error(
        "Selected operation cannot be performed due to missing permissions, root privileges required"
    )]
    MissingRequiredPermissions,
    #[error("Required binary '{binary}' was not found in PATH")]
    MissingBinary { binary: String },
}

/// User provided input was invalid.
#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum InvalidInputError {
    #[error("Failed to load configuration file from '{path}'")]
    LoadConfiguration { path: String },
    #[error("Failed to parse configuration file '{path}'")]
    ParseConfiguration { path: String },
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(#[from] InvalidConfigurationError),
    #[error("Invalid resource graph: {0}")]
    InvalidPlan(#[from] PlanError),
}

/// A resource was not in the state required to perform an operation on a
/// resource that depends on it.
#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum PreconditionError {
    #[error("Cannot {operation} {resource}: {dependency} must be {required}, but it is {actual}")]
    DependencyNotReady {
        operation: String,
        resource: String,
        dependency: String,
        required: String,
        actual: String,
    },
    #[error("Cannot {operation} {resource}: backend reports a required resource is missing")]
    BackendNotFound { operation: String, resource: String },
    #[error("Root filesystem is not mounted at '{path}'")]
    RootNotMounted { path: String },
    #[error("Expected directory '{path}' is missing from the staged root")]
    MissingSkeleton { path: String },
}

/// A step of provisioning or teardown failed.
#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum ServicingError {
    #[error("Storage backend failed to {operation} {resource}")]
    Backend { operation: String, resource: String },
    #[error("Failed to inspect the current mount and storage state")]
    InspectState,
    #[error("Failed to write OS configuration into the staged root")]
    ConfigureOs,
    #[error("Failed to erase disk '{device}'")]
    EraseDisk { device: String },
    #[error("Failed to read user confirmation")]
    ReadConfirmation,
    #[error("Failed to execute '{binary}'")]
    CommandCouldNotExecute { binary: String },
    #[error("'{binary}' {explanation}")]
    CommandFailed { binary: String, explanation: String },
}

#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum InternalError {
    #[error("Internal error: {0}")]
    Internal(&'static str),
    #[error("Panic caught: {0}")]
    Panic(String),
    #[error("Failed to serialize error report")]
    SerializeError,
}

/// Each variant of `ErrorKind` corresponds to a different category of error.
/// The categories are meant to tell the operator where to look first.
#[derive(Debug, Eq, thiserror::Error, IntoStaticStr, PartialEq)]
#[strum(serialize_all = "kebab-case")]
pub enum ErrorKind {
    /// The host is not fit to run the requested command.
    #[error(transparent)]
    ExecutionEnvironmentMisconfiguration(#[from] ExecutionEnvironmentMisconfigurationError),

    /// The configuration or the resource graph derived from it is invalid.
    #[error(transparent)]
    InvalidInput(#[from] InvalidInputError),

    /// A resource was not in the state a dependent operation required.
    #[error(transparent)]
    Precondition(#[from] PreconditionError),

    /// A delegated tool reported a failure outside the recognized no-op set.
    #[error(transparent)]
    Servicing(#[from] ServicingError),

    /// A bug was encountered.
    #[error(transparent)]
    Internal(#[from] InternalError),
}

#[derive(Debug)]
struct ZrootErrorInner {
    kind: ErrorKind,
    location: &'static Location<'static>,
    source: Option<anyhow::Error>,
    context: Vec<(Cow<'static, str>, &'static Location<'static>)>,
}

pub struct ZrootError(Box<ZrootErrorInner>);
impl ZrootError {
    #[track_caller]
    pub fn new(kind: impl Into<ErrorKind>) -> Self {
        ZrootError(Box::new(ZrootErrorInner {
            kind: kind.into(),
            location: Location::caller(),
            source: None,
            context: Vec::new(),
        }))
    }

    #[track_caller]
    pub fn with_source(kind: impl Into<ErrorKind>, source: anyhow::Error) -> Self {
        ZrootError(Box::new(ZrootErrorInner {
            kind: kind.into(),
            location: Location::caller(),
            source: Some(source),
            context: Vec::new(),
        }))
    }

    #[track_caller]
    pub fn internal(message: &'static str) -> Self {
        Self::new(InternalError::Internal(message))
    }

    #[track_caller]
    pub fn secondary_error_context(mut self, secondary: ZrootError) -> Self {
        self.0.context.push((format!(
            "While handling the error, an additional error was caught: \n\n{secondary:?}\n\nThe earlier error:"
        ).into(), Location::caller()));
        self
    }

    pub fn unstructured(self, context: impl Into<Cow<'static, str>>) -> anyhow::Error {
        match self.0.source {
            Some(source) => source.context(self.0.kind).context(context.into()),
            None => anyhow::Error::from(self.0.kind).context(context.into()),
        }
    }

    /// Returns a reference to the inner ErrorKind.
    pub fn kind(&self) -> &ErrorKind {
        &self.0.kind
    }
}

pub trait ReportError<T, K> {
    /// Convert this error into a structured ZrootError.
    fn structured(self, kind: K) -> Result<T, ZrootError>;
}

impl<T, K> ReportError<T, K> for Option<T>
where
    K: Into<ErrorKind>,
{
    #[track_caller]
    fn structured(self, kind: K) -> Result<T, ZrootError> {
        match self {
            Some(t) => Ok(t),
            None => Err(ZrootError::new(kind)),
        }
    }
}

impl<T, E, K> ReportError<T, K> for Result<T, E>
where
    E: Into<anyhow::Error>,
    K: Into<ErrorKind>,
{
    #[track_caller]
    fn structured(self, kind: K) -> Result<T, ZrootError> {
        match self {
            Ok(o) => Ok(o),
            Err(e) => Err(ZrootError(Box::new(ZrootErrorInner {
                kind: kind.into(),
                location: Location::caller(),
                source: Some(e.into()),
                context: Vec::new(),
            }))),
        }
    }
}

pub trait ZrootResultExt<T> {
    /// Attach a context message to the error.
    fn message(self, context: impl Into<Cow<'static, str>>) -> Result<T, ZrootError>;

    /// Convert the error into an unstructured error.
    fn unstructured(self, context: impl Into<Cow<'static, str>>) -> Result<T, anyhow::Error>;
}

impl<T> ZrootResultExt<T> for Result<T, ZrootError> {
    #[track_caller]
    fn message(mut self, context: impl Into<Cow<'static, str>>) -> Result<T, ZrootError> {
        if let Err(ref mut e) = self {
            e.0.context.push((context.into(), Location::caller()));
        }
        self
    }

    fn unstructured(self, context: impl Into<Cow<'static, str>>) -> Result<T, anyhow::Error> {
        self.map_err(|e| e.unstructured(context))
    }
}

impl Serialize for ZrootError {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("zroot-error", 5)?;
        state.serialize_field("message", &self.0.kind.to_string())?;
        match self.0.kind {
            ErrorKind::ExecutionEnvironmentMisconfiguration(ref e) => {
                state.serialize_field("error", e)?
            }
            ErrorKind::InvalidInput(ref e) => state.serialize_field("error", e)?,
            ErrorKind::Precondition(ref e) => state.serialize_field("error", e)?,
            ErrorKind::Servicing(ref e) => state.serialize_field("error", e)?,
            ErrorKind::Internal(ref e) => state.serialize_field("error", e)?,
        }
        state.serialize_field("category", <&str>::from(&self.0.kind))?;
        state.serialize_field(
            "location",
            &format!("{}:{}", self.0.location.file(), self.0.location.line()),
        )?;
        match self.0.source {
            Some(ref e) => state.serialize_field("cause", &Some(format!("{:?}", e)))?,
            None => state.serialize_field("cause", &None::<String>)?,
        }
        state.end()
    }
}

impl Debug for ZrootError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} at {}:{}",
            self.0.kind,
            self.0.location.file(),
            self.0.location.line()
        )?;

        if !self.0.context.is_empty() {
            writeln!(f, "\n\nContext:")?;
            for (i, (context, location)) in self.0.context.iter().enumerate() {
                for (j, line) in context.split('\n').enumerate() {
                    if j == 0 {
                        write!(f, "{: >5}: ", i)?;
                    } else {
                        f.write_str("\n       ")?;
                    }
                    f.write_str(line)?;
                }
                writeln!(f, " at {}:{}", location.file(), location.line())?;
            }
        }

        if let Some(ref source) = self.0.source {
            writeln!(f, "\n\nCaused by:")?;
            let mut index = 0;
            let mut source: Option<&dyn std::error::Error> = Some(source.as_ref());
            while let Some(e) = source {
                for (i, line) in e.to_string().split('\n').enumerate() {
                    if i == 0 {
                        write!(f, "{: >5}: ", index)?;
                    } else {
                        f.write_str("\n       ")?;
                    }
                    f.write_str(line)?;
                }
                f.write_char('\n')?;
                source = e.source();
                index += 1;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Context;
    use serde_yaml::Value;

    use super::*;

    #[test]
    fn test_error_serialize() {
        let e = std::fs::read("/non-existant-file")
            .context("failed to read file")
            .structured(ServicingError::Backend {
                operation: "create".into(),
                resource: "dataset:demo/home".into(),
            })
            .unwrap_err();
        match serde_yaml::to_value(e).unwrap() {
            Value::Mapping(m) => {
                assert_eq!(m.len(), 5);
                assert_eq!(m["category"], Value::String("servicing".into()));
                assert!(matches!(m["cause"], Value::String(_)));
                assert_eq!(
                    m["message"],
                    Value::String("Storage backend failed to create dataset:demo/home".into())
                );
                match m["error"] {
                    Value::Mapping(ref inner) => assert!(inner.contains_key("backend")),
                    _ => panic!("error isn't mapping"),
                }
                match m["location"] {
                    Value::String(ref s) => assert!(s.contains("error.rs:")),
                    _ => panic!("location isn't string"),
                }
            }
            _ => panic!("value isn't mapping"),
        }
    }

    #[test]
    fn test_error_debug() {
        let error = Err::<(), _>(anyhow::anyhow!("z"))
            .context("x\ny")
            .structured(InternalError::Internal("w"))
            .unwrap_err();
        assert_eq!(
            format!("{:?}", error),
            format!(
                "Internal error: w at {}:{}\n\nCaused by:\n    0: x\n       y\n    1: z\n",
                error.0.location.file(),
                error.0.location.line(),
            ),
        );
    }

    #[test]
    fn test_message_context() {
        let error = Err::<(), _>(ZrootError::new(
            ExecutionEnvironmentMisconfigurationError::MissingRequiredPermissions,
        ))
        .message("Cannot provision")
        .unwrap_err();

        let rendered = format!("{error:?}");
        assert!(rendered.contains("Context:"), "{rendered}");
        assert!(rendered.contains("0: Cannot provision"), "{rendered}");
        assert_eq!(
            <&str>::from(error.kind()),
            "execution-environment-misconfiguration"
        );
    }

    #[test]
    fn test_option_structured() {
        let error = None::<()>
            .structured(PreconditionError::RootNotMounted {
                path: "/mnt/zroot".into(),
            })
            .unwrap_err();
        assert_eq!(
            error.kind(),
            &ErrorKind::Precondition(PreconditionError::RootNotMounted {
                path: "/mnt/zroot".into()
            })
        );
    }
}
