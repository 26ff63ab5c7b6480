//! The single error channel shared by every pipeline stage.
//!
//! All compile-time and runtime failures are an [`Error`]: a kind, a
//! message, an optional source snapshot and (for runtime errors) the VM
//! traceback accumulated while the error propagated up the call chain.
//! Warnings reuse the same kind enum but never abort compilation.

use std::fmt;
use std::panic::Location;

use thiserror::Error as ThisError;

use crate::diagnostic::{Pos, SourceInfo};

/// Error and warning kinds, mirroring the scripting language's taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Bug,
    NullPointer,
    OperatorNotSupported,
    NotImplemented,
    ZeroDivision,
    TypeError,
    AttributeError,
    InvalidArgCount,
    InvalidIndex,
    IoError,
    SyntaxError,
    Assertion,
    UnexpectedEof,
    NameError,
    AlreadyDefined,
    // warnings
    VariableShadowing,
    MissedEnumInSwitch,
    NonTerminatingLoop,
    UnreachableCode,
    StandAloneExpression,
    // runtime bookkeeping
    Rethrow,
    StackOverflow,
}

impl ErrorKind {
    pub fn name(&self) -> &'static str {
        match self {
            ErrorKind::Bug => "Bug",
            ErrorKind::NullPointer => "NullPointer",
            ErrorKind::OperatorNotSupported => "OperatorNotSupported",
            ErrorKind::NotImplemented => "NotImplemented",
            ErrorKind::ZeroDivision => "ZeroDivision",
            ErrorKind::TypeError => "TypeError",
            ErrorKind::AttributeError => "AttributeError",
            ErrorKind::InvalidArgCount => "InvalidArgCount",
            ErrorKind::InvalidIndex => "InvalidIndex",
            ErrorKind::IoError => "IoError",
            ErrorKind::SyntaxError => "SyntaxError",
            ErrorKind::Assertion => "Assertion",
            ErrorKind::UnexpectedEof => "UnexpectedEof",
            ErrorKind::NameError => "NameError",
            ErrorKind::AlreadyDefined => "AlreadyDefined",
            ErrorKind::VariableShadowing => "VariableShadowing",
            ErrorKind::MissedEnumInSwitch => "MissedEnumInSwitch",
            ErrorKind::NonTerminatingLoop => "NonTerminatingLoop",
            ErrorKind::UnreachableCode => "UnreachableCode",
            ErrorKind::StandAloneExpression => "StandAloneExpression",
            ErrorKind::Rethrow => "Rethrow",
            ErrorKind::StackOverflow => "StackOverflow",
        }
    }

    pub fn is_warning(&self) -> bool {
        matches!(
            self,
            ErrorKind::VariableShadowing
                | ErrorKind::MissedEnumInSwitch
                | ErrorKind::NonTerminatingLoop
                | ErrorKind::UnreachableCode
                | ErrorKind::StandAloneExpression
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One frame of a VM traceback: which function re-threw, from where.
#[derive(Debug, Clone)]
pub struct TraceFrame {
    pub function: String,
    pub file: String,
    pub pos: Pos,
}

/// A compile-time or runtime failure.
#[derive(Debug, Clone, ThisError)]
#[error("{kind}: {message}")]
pub struct Error {
    pub kind: ErrorKind,
    pub message: String,
    /// Where in the *script* the error happened.
    pub source_info: Option<SourceInfo>,
    /// Which line of the *compiler* raised it (for debugging the compiler).
    pub origin: &'static Location<'static>,
    /// Call frames, innermost first, accumulated while unwinding the VM.
    pub traceback: Vec<TraceFrame>,
}

impl Error {
    #[track_caller]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source_info: None,
            origin: Location::caller(),
            traceback: Vec::new(),
        }
    }

    /// Attach a source snapshot, unless one was already attached deeper down.
    pub fn with_source_info(mut self, info: SourceInfo) -> Self {
        if self.source_info.is_none() {
            self.source_info = Some(info);
        }
        self
    }

    /// Record a call frame while the error unwinds through the VM.
    pub fn add_frame(&mut self, function: impl Into<String>, file: impl Into<String>, pos: Pos) {
        self.traceback.push(TraceFrame {
            function: function.into(),
            file: file.into(),
            pos,
        });
    }

    pub fn pos(&self) -> Pos {
        self.source_info.as_ref().map(|s| s.pos).unwrap_or(Pos::UNSET)
    }

    /// Render the full diagnostic the way the command-line driver prints it.
    pub fn render(&self) -> String {
        let mut out = format!("ERROR({}): {}\n", self.kind, self.message);
        if let Some(info) = &self.source_info {
            out.push_str(&info.to_string());
        }
        for frame in &self.traceback {
            out.push_str(&format!(
                " > {} ({}:{})\n",
                frame.function, frame.file, frame.pos.line
            ));
        }
        out
    }
}

/// A non-fatal finding surfaced to the driver after compilation.
#[derive(Debug, Clone)]
pub struct Warning {
    pub kind: ErrorKind,
    pub message: String,
    pub source_info: Option<SourceInfo>,
}

impl Warning {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        debug_assert!(kind.is_warning());
        Self {
            kind,
            message: message.into(),
            source_info: None,
        }
    }

    pub fn with_source_info(mut self, info: SourceInfo) -> Self {
        self.source_info = Some(info);
        self
    }

    pub fn render(&self) -> String {
        let mut out = format!("WARNING({}): {}\n", self.kind, self.message);
        if let Some(info) = &self.source_info {
            out.push_str(&info.to_string());
        }
        out
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_includes_kind_and_message() {
        let err = Error::new(ErrorKind::ZeroDivision, "division by zero");
        assert!(err.render().starts_with("ERROR(ZeroDivision): division by zero"));
    }

    #[test]
    fn traceback_frames_render_in_order() {
        let mut err = Error::new(ErrorKind::TypeError, "boom");
        err.add_frame("inner", "a.cb", Pos::new(3, 1));
        err.add_frame("outer", "a.cb", Pos::new(9, 1));
        let text = err.render();
        let inner = text.find("> inner").unwrap();
        let outer = text.find("> outer").unwrap();
        assert!(inner < outer);
    }

    #[test]
    fn warning_kinds_are_warnings() {
        assert!(ErrorKind::VariableShadowing.is_warning());
        assert!(!ErrorKind::TypeError.is_warning());
    }
}
