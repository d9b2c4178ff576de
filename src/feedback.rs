use std::fmt::Display;

use nix::sys::signal::Signal;

use crate::addr::Addr;
use crate::breakpoint::BreakpointSet;
use crate::errors::DebuggerError;
use crate::listing::Listing;
use crate::tracee::StopStatus;

/// What the debugger hands back to the [`DebuggerUI`](crate::ui::DebuggerUI) after a command
#[derive(Debug)]
pub enum Feedback {
    Ok,
    Text(String),
    Listing(Listing),
    /// The debuggee stopped because it received a signal other than a trap
    Signal(Signal, Option<Listing>),
    /// The debuggee stopped somewhere without source information
    NoSource(Addr),
    Breakpoints(BreakpointSet),
    /// The debuggee is gone, with the status it ended with
    Exited(StopStatus),
    Error(DebuggerError),
}

impl Display for Feedback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Feedback::Ok => write!(f, "Ok")?,
            Feedback::Error(e) => write!(f, "Error: {e}")?,
            Feedback::Text(t) => write!(f, "{t}")?,
            Feedback::Listing(l) => write!(f, "{l}")?,
            Feedback::Signal(sig, listing) => {
                write!(f, "debuggee received {sig}")?;
                if let Some(l) = listing {
                    write!(f, "\n{l}")?;
                }
            }
            Feedback::NoSource(pc) => write!(f, "stopped at {pc}, which has no source line")?,
            Feedback::Breakpoints(set) => {
                if set.is_empty() {
                    write!(f, "no breakpoints")?;
                }
                for (idx, (file, lines)) in set.iter().enumerate() {
                    if idx > 0 {
                        writeln!(f)?;
                    }
                    let lines: Vec<String> = lines.iter().map(usize::to_string).collect();
                    write!(f, "{}: {}", file.display(), lines.join(", "))?;
                }
            }
            Feedback::Exited(StopStatus::Exited(code)) => {
                write!(f, "debuggee exited with status {code}")?
            }
            Feedback::Exited(StopStatus::Signaled(sig)) => {
                write!(f, "debuggee was killed by {sig}")?
            }
            Feedback::Exited(StopStatus::Stopped(sig)) => {
                write!(f, "debuggee stopped with {sig}")?
            }
        }

        Ok(())
    }
}

impl From<Result<Feedback, DebuggerError>> for Feedback {
    fn from(value: Result<Feedback, DebuggerError>) -> Self {
        match value {
            Ok(f) => f,
            Err(e) => Feedback::Error(e),
        }
    }
}

#[cfg(test)]
mod test {
    use std::path::Path;

    use super::*;

    #[test]
    fn test_breakpoints_display() {
        let mut set = BreakpointSet::new();
        assert_eq!(Feedback::Breakpoints(set.clone()).to_string(), "no breakpoints");
        set.insert(Path::new("a.go"), 10);
        set.insert(Path::new("a.go"), 20);
        set.insert(Path::new("b.go"), 5);
        assert_eq!(
            Feedback::Breakpoints(set).to_string(),
            "a.go: 10, 20\nb.go: 5"
        );
    }

    #[test]
    fn test_exit_display() {
        assert_eq!(
            Feedback::Exited(StopStatus::Exited(3)).to_string(),
            "debuggee exited with status 3"
        );
        assert_eq!(
            Feedback::Exited(StopStatus::Signaled(Signal::SIGKILL)).to_string(),
            "debuggee was killed by SIGKILL"
        );
    }

    #[test]
    fn test_error_from_result() {
        let fb: Feedback = Err(DebuggerError::CommandParse("bad".to_string())).into();
        assert_eq!(fb.to_string(), "Error: bad");
    }
}
