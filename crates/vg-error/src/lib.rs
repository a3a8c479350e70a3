// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! vg-error
//!
//! Unified error taxonomy for the variable-graph runtime (§7 of the design).
//!
//! Every error raised anywhere in the workspace carries a stable
//! [`ErrorCode`], a human-readable message, optional structured context, and
//! an optional boxed cause. The taxonomy mirrors the six failure families
//! named in the design: path walks, write/read permission, refresh, user
//! program (`action`/getter/setter) failures, and malformed blocks.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// ErrorCategory
// ---------------------------------------------------------------------------

/// Broad family an [`ErrorCode`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Path/metadata grammar or traversal failures.
    Path,
    /// Attempted read/write against a var that disallows it.
    Access,
    /// A var's refresh (recompute) raised.
    Refresh,
    /// A user-supplied action/getter/setter callable raised.
    Program,
    /// A block was malformed or violated protocol rules.
    Protocol,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Path => "path",
            Self::Access => "access",
            Self::Refresh => "refresh",
            Self::Program => "program",
            Self::Protocol => "protocol",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// ErrorCode
// ---------------------------------------------------------------------------

/// Machine-readable, stable error code.
///
/// Each variant serialises to a `SCREAMING_SNAKE_CASE` string that will not
/// change across patch releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // -- Path --
    /// Name or path grammar failed to parse.
    PathGrammarInvalid,
    /// A field or index step in a path could not be resolved.
    PathStepUnresolved,
    /// `..` traversal walked past a root with no parent.
    PathTraversalPastRoot,
    /// A value could not be coerced to the declared field type.
    PathConversionFailed,
    /// No applicable arity was found for a callable path element.
    PathNoApplicableArity,

    // -- Access --
    /// Write attempted against a var with `writeable == false`.
    VarNotWriteable,
    /// Read attempted against a var with `readable == false`.
    VarNotReadable,

    // -- Refresh --
    /// Recomputing a var's value raised.
    RefreshFailed,

    // -- Program --
    /// A user-supplied action/getter/setter callable raised.
    ProgramRaised,

    // -- Protocol --
    /// Block `type` is not one of the four known kinds.
    ProtocolUnknownBlockType,
    /// A `monitor` block is missing `root` or `value`.
    ProtocolMonitorIncomplete,
    /// A `delete` block's `value` is not a name, list of names, or `{tagged}`.
    ProtocolIllegalDeleteValue,
    /// A block could not be parsed as JSON at all.
    ProtocolMalformedJson,
}

impl ErrorCode {
    /// Returns the broad [`ErrorCategory`] this code belongs to.
    #[must_use]
    pub fn category(self) -> ErrorCategory {
        match self {
            Self::PathGrammarInvalid
            | Self::PathStepUnresolved
            | Self::PathTraversalPastRoot
            | Self::PathConversionFailed
            | Self::PathNoApplicableArity => ErrorCategory::Path,

            Self::VarNotWriteable | Self::VarNotReadable => ErrorCategory::Access,

            Self::RefreshFailed => ErrorCategory::Refresh,

            Self::ProgramRaised => ErrorCategory::Program,

            Self::ProtocolUnknownBlockType
            | Self::ProtocolMonitorIncomplete
            | Self::ProtocolIllegalDeleteValue
            | Self::ProtocolMalformedJson => ErrorCategory::Protocol,
        }
    }

    /// Stable `&'static str` representation (e.g. `"VAR_NOT_WRITEABLE"`).
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PathGrammarInvalid => "PATH_GRAMMAR_INVALID",
            Self::PathStepUnresolved => "PATH_STEP_UNRESOLVED",
            Self::PathTraversalPastRoot => "PATH_TRAVERSAL_PAST_ROOT",
            Self::PathConversionFailed => "PATH_CONVERSION_FAILED",
            Self::PathNoApplicableArity => "PATH_NO_APPLICABLE_ARITY",
            Self::VarNotWriteable => "VAR_NOT_WRITEABLE",
            Self::VarNotReadable => "VAR_NOT_READABLE",
            Self::RefreshFailed => "REFRESH_FAILED",
            Self::ProgramRaised => "PROGRAM_RAISED",
            Self::ProtocolUnknownBlockType => "PROTOCOL_UNKNOWN_BLOCK_TYPE",
            Self::ProtocolMonitorIncomplete => "PROTOCOL_MONITOR_INCOMPLETE",
            Self::ProtocolIllegalDeleteValue => "PROTOCOL_ILLEGAL_DELETE_VALUE",
            Self::ProtocolMalformedJson => "PROTOCOL_MALFORMED_JSON",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// VgError
// ---------------------------------------------------------------------------

/// Unified variable-graph runtime error.
///
/// Carries a stable [`ErrorCode`], a human-readable message, an optional
/// source error for cause-chaining, and arbitrary structured context (e.g.
/// the var id and full name a path failure occurred on).
///
/// # Examples
///
/// ```
/// use vg_error::{ErrorCode, VgError};
///
/// let err = VgError::new(ErrorCode::PathStepUnresolved, "no field `foo` on object")
///     .with_context("var_id", 7)
///     .with_context("step", "foo");
/// assert_eq!(err.code, ErrorCode::PathStepUnresolved);
/// ```
pub struct VgError {
    /// Machine-readable error code.
    pub code: ErrorCode,
    /// Human-readable description.
    pub message: String,
    /// Optional underlying cause.
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    /// Arbitrary structured context for diagnostics.
    pub context: BTreeMap<String, serde_json::Value>,
}

impl VgError {
    /// Create a new error with the given code and message.
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
            context: BTreeMap::new(),
        }
    }

    /// Attach a key-value pair to the diagnostic context.
    ///
    /// The value is converted via [`serde_json::to_value`]; if serialisation
    /// fails the entry is silently skipped.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    /// Attach an underlying cause.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Shorthand for `self.code.category()`.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        self.code.category()
    }

    /// Convenience constructor for [`ErrorCode::PathStepUnresolved`]-family
    /// failures, pre-populated with the var id and full name (§7 "path").
    #[must_use]
    pub fn path(var_id: u64, full_name: &str, message: impl Into<String>) -> Self {
        Self::new(ErrorCode::PathStepUnresolved, message)
            .with_context("var_id", var_id)
            .with_context("full_name", full_name)
    }

    /// Convenience constructor for [`ErrorCode::VarNotWriteable`].
    #[must_use]
    pub fn writeable_error(var_id: u64, full_name: &str) -> Self {
        Self::new(
            ErrorCode::VarNotWriteable,
            format!("var `{full_name}` is not writeable"),
        )
        .with_context("var_id", var_id)
    }

    /// Convenience constructor for [`ErrorCode::VarNotReadable`].
    #[must_use]
    pub fn readable_error(var_id: u64, full_name: &str) -> Self {
        Self::new(
            ErrorCode::VarNotReadable,
            format!("var `{full_name}` is not readable"),
        )
        .with_context("var_id", var_id)
    }
}

impl fmt::Debug for VgError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("VgError");
        d.field("code", &self.code);
        d.field("message", &self.message);
        if let Some(ref src) = self.source {
            d.field("source", &src.to_string());
        }
        if !self.context.is_empty() {
            d.field("context", &self.context);
        }
        d.finish()
    }
}

impl fmt::Display for VgError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code.as_str(), self.message)?;
        if !self.context.is_empty() {
            // Deterministic output thanks to BTreeMap.
            if let Ok(ctx) = serde_json::to_string(&self.context) {
                write!(f, " {ctx}")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for VgError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

// ---------------------------------------------------------------------------
// Serialisable snapshot
// ---------------------------------------------------------------------------

/// Serialisable snapshot of a [`VgError`] (without the opaque source),
/// suitable for recording into `VarEnv::errors` or sending over a transport.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VgErrorDto {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
    /// Structured context.
    pub context: BTreeMap<String, serde_json::Value>,
    /// String representation of the source error, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_message: Option<String>,
}

impl From<&VgError> for VgErrorDto {
    fn from(err: &VgError) -> Self {
        Self {
            code: err.code,
            message: err.message.clone(),
            context: err.context.clone(),
            source_message: err.source.as_ref().map(|s| s.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    const ALL_CODES: &[ErrorCode] = &[
        ErrorCode::PathGrammarInvalid,
        ErrorCode::PathStepUnresolved,
        ErrorCode::PathTraversalPastRoot,
        ErrorCode::PathConversionFailed,
        ErrorCode::PathNoApplicableArity,
        ErrorCode::VarNotWriteable,
        ErrorCode::VarNotReadable,
        ErrorCode::RefreshFailed,
        ErrorCode::ProgramRaised,
        ErrorCode::ProtocolUnknownBlockType,
        ErrorCode::ProtocolMonitorIncomplete,
        ErrorCode::ProtocolIllegalDeleteValue,
        ErrorCode::ProtocolMalformedJson,
    ];

    #[test]
    fn basic_construction() {
        let err = VgError::new(ErrorCode::RefreshFailed, "boom");
        assert_eq!(err.code, ErrorCode::RefreshFailed);
        assert_eq!(err.message, "boom");
        assert!(err.source.is_none());
        assert!(err.context.is_empty());
    }

    #[test]
    fn display_without_context() {
        let err = VgError::new(ErrorCode::VarNotWriteable, "nope");
        assert_eq!(err.to_string(), "[VAR_NOT_WRITEABLE] nope");
    }

    #[test]
    fn display_with_context() {
        let err =
            VgError::new(ErrorCode::PathTraversalPastRoot, "went past root").with_context("depth", 3);
        let s = err.to_string();
        assert!(s.starts_with("[PATH_TRAVERSAL_PAST_ROOT] went past root"));
        assert!(s.contains("depth"));
    }

    #[test]
    fn debug_with_source() {
        let src = io::Error::new(io::ErrorKind::NotFound, "field missing");
        let err = VgError::new(ErrorCode::PathStepUnresolved, "lookup failed").with_source(src);
        let dbg = format!("{err:?}");
        assert!(dbg.contains("source"));
        assert!(dbg.contains("field missing"));
    }

    #[test]
    fn every_code_round_trips_through_serde() {
        for code in ALL_CODES {
            let json = serde_json::to_string(code).unwrap();
            let back: ErrorCode = serde_json::from_str(&json).unwrap();
            assert_eq!(*code, back);
        }
    }

    #[test]
    fn every_code_has_a_category() {
        for code in ALL_CODES {
            let _ = code.category();
        }
    }

    #[test]
    fn path_helper_sets_context() {
        let err = VgError::path(5, "a.b.c", "no such field");
        assert_eq!(err.code, ErrorCode::PathStepUnresolved);
        assert_eq!(err.context.get("var_id"), Some(&serde_json::json!(5)));
        assert_eq!(
            err.context.get("full_name"),
            Some(&serde_json::json!("a.b.c"))
        );
    }

    #[test]
    fn dto_round_trips_without_source() {
        let err = VgError::new(ErrorCode::ProgramRaised, "callable panicked")
            .with_context("var_id", 42);
        let dto = VgErrorDto::from(&err);
        let json = serde_json::to_string(&dto).unwrap();
        let back: VgErrorDto = serde_json::from_str(&json).unwrap();
        assert_eq!(back, dto);
        assert_eq!(back.code, ErrorCode::ProgramRaised);
    }
}
