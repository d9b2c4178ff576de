//! # User interfaces
//!
//! The [`Debugger`](crate::debugger::Debugger) does not talk to the operator itself. It hands
//! [`Feedback`] to a [`DebuggerUI`] and gets the next [`Status`], the command to execute, back.
//!
//! This module also has the command language shared by all interfaces, see [`parse_command`].

use crate::errors::{DebuggerError, Result};
use crate::feedback::Feedback;

pub mod cli;

pub const HELP_TEXT: &str = r#"
Set Breakpoint

  b <location>
  break <location>
  breakpoint <location>

  <location> is a line number in the current file, file:line, or the name of a
  function.

Clear Breakpoint

  d <location>
  delete <location>
  clear <location>

List Breakpoints

  info
  breakpoints

Step

  Steps into the next machine instruction.

  s
  step

Next Source Line

  Runs to the next source code line.

  n
  next

Continue

  c
  continue

Listing

  Display source code centered around the current position.

  l <lineno>
  list <lineno>
  listing <lineno>

  <lineno> is optional; when given the display will be centered around the given
  line number.

Help

  ?
  h
  help

Quit

  q
  quit
  exit
"#;

/// A source location as the operator writes it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    /// A line in the file of the current position
    Line(usize),
    FileLine(String, usize),
    /// The first line of a function
    Function(String),
}

impl Location {
    /// Parses `line`, `file:line` or a function name
    ///
    /// Anything starting with a digit has to be a line number.
    pub fn parse(token: &str) -> Result<Self> {
        if token.contains("::") {
            return Ok(Self::Function(token.to_string()));
        }
        if let Some((file, line)) = token.rsplit_once(':') {
            if file.is_empty() {
                return Err(DebuggerError::CommandParse(format!(
                    "missing file name in {token}"
                )));
            }
            return Ok(Self::FileLine(file.to_string(), parse_line_number(line)?));
        }
        if token.starts_with(|c: char| c.is_ascii_digit()) {
            Ok(Self::Line(parse_line_number(token)?))
        } else {
            Ok(Self::Function(token.to_string()))
        }
    }
}

/// A command for the debugger
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Help,
    SetBreakpoint(Location),
    DelBreakpoint(Location),
    Breakpoints,
    /// One machine instruction
    StepSingle,
    /// Run to the next source line
    StepLine,
    Continue,
    /// Show the source, centered on the given line or the current position
    Listing(Option<usize>),
    DebuggerQuit,
}

/// Interface between the debugger and the operator
pub trait DebuggerUI {
    /// Shows `feedback` and returns the next command
    fn process(&mut self, feedback: Feedback) -> Result<Status>;

    /// Shows `feedback` when no further command will be asked for
    fn report(&mut self, feedback: &Feedback) -> Result<()>;
}

pub fn parse_line_number(raw: &str) -> Result<usize> {
    match raw.parse::<usize>() {
        Ok(0) => Err(DebuggerError::CommandParse(
            "line numbers start at 1".to_string(),
        )),
        Ok(n) => Ok(n),
        Err(e) => Err(DebuggerError::CommandParse(format!(
            "not a line number: {raw:?} ({e})"
        ))),
    }
}

/// Parses one line of operator input
///
/// Returns `Ok(None)` for unknown commands and a
/// [`CommandParse`](DebuggerError::CommandParse) error for known commands with bad arguments.
pub fn parse_command(line: &str) -> Result<Option<Status>> {
    let words = shlex::split(line)
        .ok_or_else(|| DebuggerError::CommandParse("unbalanced quotes".to_string()))?;
    let Some((command, args)) = words.split_first() else {
        return Ok(None);
    };

    let status = match (command.as_str(), args) {
        ("help" | "h" | "?", []) => Status::Help,
        ("break" | "b" | "breakpoint", [.., location]) => {
            Status::SetBreakpoint(Location::parse(location)?)
        }
        ("clear" | "delete" | "d", [.., location]) => {
            Status::DelBreakpoint(Location::parse(location)?)
        }
        ("break" | "b" | "breakpoint" | "clear" | "delete" | "d", []) => {
            return Err(DebuggerError::CommandParse(format!(
                "{command} needs a location"
            )))
        }
        ("info" | "breakpoints", []) => Status::Breakpoints,
        ("step" | "s", []) => Status::StepSingle,
        ("next" | "n", []) => Status::StepLine,
        ("continue" | "c", []) => Status::Continue,
        ("listing" | "list" | "l", []) => Status::Listing(None),
        ("listing" | "list" | "l", [line]) => Status::Listing(Some(parse_line_number(line)?)),
        ("listing" | "list" | "l", _) => {
            return Err(DebuggerError::CommandParse(format!(
                "{command} takes at most one line number"
            )))
        }
        ("quit" | "q" | "exit", []) => Status::DebuggerQuit,
        _ => return Ok(None),
    };
    Ok(Some(status))
}
