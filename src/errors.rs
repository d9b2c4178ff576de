//! # Errors
//!
//! Every fallible operation in this crate returns [`Result`], with [`DebuggerError`] as the
//! error type. The session decides per error kind whether it can go back to the prompt or has
//! to give up, see [`DebuggerError::is_fatal`].

use std::path::PathBuf;

use thiserror::Error;

use crate::addr::Addr;

/// Shorthand result type used throughout the debugger
pub type Result<T> = std::result::Result<T, DebuggerError>;

#[derive(Error, Debug)]
pub enum DebuggerError {
    #[error("Os error: {0}")]
    Os(#[from] nix::Error),
    #[error("Io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Could not read source file {0}: {1}")]
    SourceUnavailable(PathBuf, std::io::Error),
    #[error("Executable does not exist: {0}")]
    ExecutableDoesNotExist(String),
    #[error("Executable is not a file: {0}")]
    ExecutableIsNotAFile(String),
    #[error("Could not find the executable: {0}")]
    Which(#[from] which::Error),
    #[error("Could not convert to CString: {0}")]
    CStringConv(#[from] std::ffi::NulError),
    #[error("Could not start the debuggee: {0}")]
    Spawn(String),
    #[error("No debuggee is running")]
    NoDebuggee,
    #[error("The debuggee has already exited")]
    ProcessExited,
    #[error("Could not parse the executable: {0}")]
    Object(#[from] object::Error),
    #[error("Could not parse the debug information: {0}")]
    Gimli(#[from] gimli::Error),
    #[error("The executable has no {0} section")]
    MissingSection(&'static str),
    #[error("Could not find an entry function, tried: {0}")]
    EntryNotFound(String),
    #[error("No code for {file}:{line}")]
    LocationNotFound { file: String, line: usize },
    #[error("No source file named {0}")]
    UnknownFile(String),
    #[error("No function named {0}")]
    FunctionNotFound(String),
    #[error("Source file name {name} is ambiguous: {candidates:?}")]
    AmbiguousFile {
        name: String,
        candidates: Vec<PathBuf>,
    },
    #[error("No source line for address {0}")]
    NoLineForAddress(Addr),
    #[error("Address {0} is not at an instruction boundary")]
    NotInstructionBoundary(Addr),
    #[error("{0}")]
    CommandParse(String),
}

impl DebuggerError {
    /// Whether the session has to end because of this error
    ///
    /// Errors about a location, a command or a source file only concern the command that
    /// produced them. Everything that means we lost control over the debuggee, or never had
    /// usable debug information in the first place, is fatal.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Os(_)
            | Self::Io(_)
            | Self::ExecutableDoesNotExist(_)
            | Self::ExecutableIsNotAFile(_)
            | Self::Which(_)
            | Self::CStringConv(_)
            | Self::Spawn(_)
            | Self::Object(_)
            | Self::Gimli(_)
            | Self::MissingSection(_)
            | Self::EntryNotFound(_) => true,
            Self::SourceUnavailable(..)
            | Self::NoDebuggee
            | Self::ProcessExited
            | Self::LocationNotFound { .. }
            | Self::UnknownFile(_)
            | Self::FunctionNotFound(_)
            | Self::AmbiguousFile { .. }
            | Self::NoLineForAddress(_)
            | Self::NotInstructionBoundary(_)
            | Self::CommandParse(_) => false,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_location_errors_are_recoverable() {
        let err = DebuggerError::LocationNotFound {
            file: "main.go".to_string(),
            line: 3,
        };
        assert!(!err.is_fatal());
        assert_eq!(err.to_string(), "No code for main.go:3");
        assert!(!DebuggerError::CommandParse("bad".to_string()).is_fatal());
    }

    #[test]
    fn test_trace_failures_are_fatal() {
        assert!(DebuggerError::Os(nix::Error::ESRCH).is_fatal());
        assert!(DebuggerError::MissingSection(".symtab").is_fatal());
    }
}
