//! Typed error for the build core.
//!
//! One `BuildError` covers every failure mode. The `ErrorKind` decides how the
//! coordinator reacts:
//! - `Configuration`: unknown phase or lifecycle, bad binding, duplicate phase
//! - `Resolution`: descriptor or fork target not found
//! - `Execution`: a step failed while running
//! - `Precondition`: offline/online or project-context requirement not met

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Boxed source error carried by [`BuildError`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result alias used throughout the crate.
pub type Result<T, E = BuildError> = std::result::Result<T, E>;

/// Failure category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    Resolution,
    Execution,
    Precondition,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Configuration => write!(f, "configuration"),
            ErrorKind::Resolution => write!(f, "resolution"),
            ErrorKind::Execution => write!(f, "execution"),
            ErrorKind::Precondition => write!(f, "precondition"),
        }
    }
}

/// Where an error happened. Every field is optional and filled in as the
/// error travels up through the planner, engine and coordinator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
}

impl ErrorContext {
    pub fn is_empty(&self) -> bool {
        self.unit.is_none() && self.step.is_none() && self.phase.is_none()
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return Ok(());
        }
        let mut parts = Vec::new();
        if let Some(unit) = &self.unit {
            parts.push(format!("unit {}", unit));
        }
        if let Some(step) = &self.step {
            parts.push(format!("step {}", step));
        }
        if let Some(phase) = &self.phase {
            parts.push(format!("phase {}", phase));
        }
        write!(f, " [{}]", parts.join(", "))
    }
}

/// The single error type of the build core.
#[derive(Debug, Error)]
#[error("{kind} error{context}: {message}")]
pub struct BuildError {
    pub kind: ErrorKind,
    pub message: String,
    pub context: ErrorContext,
    #[source]
    pub source: Option<BoxError>,
}

impl BuildError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            context: ErrorContext::default(),
            source: None,
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, message)
    }

    pub fn resolution(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Resolution, message)
    }

    pub fn execution(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Execution, message)
    }

    pub fn precondition(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Precondition, message)
    }

    /// Attach the owning unit unless one is already recorded.
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        if self.context.unit.is_none() {
            self.context.unit = Some(unit.into());
        }
        self
    }

    /// Attach the step identity unless one is already recorded.
    pub fn with_step(mut self, step: impl Into<String>) -> Self {
        if self.context.step.is_none() {
            self.context.step = Some(step.into());
        }
        self
    }

    pub fn with_phase(mut self, phase: impl Into<String>) -> Self {
        if self.context.phase.is_none() {
            self.context.phase = Some(phase.into());
        }
        self
    }

    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn is_configuration(&self) -> bool {
        self.kind == ErrorKind::Configuration
    }

    pub fn is_execution(&self) -> bool {
        self.kind == ErrorKind::Execution
    }
}
