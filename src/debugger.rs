//! # Debugger
//!
//! The debugging session: it owns the [`Tracee`], the [`SymbolTable`], the operator's
//! breakpoints and the cursor (the source position the debuggee is stopped at), and runs the
//! command loop against a [`DebuggerUI`].
//!
//! Persistent breakpoints stay installed until they are cleared. When the debuggee stops at one,
//! the pc is moved back onto the patched instruction, and the next time the debuggee is
//! resumed the original instruction is stepped over before the `int3` goes back in.

use std::path::{Path, PathBuf};

use tracing::{debug, error, info, warn};

use crate::addr::Addr;
use crate::breakpoint::{run_to_line, PersistentBreakpoints};
use crate::consts::{SI_KERNEL, TRAP_BRKPT, TRAP_PC_ADVANCE};
use crate::errors::{DebuggerError, Result};
use crate::feedback::Feedback;
use crate::listing::Listing;
use crate::symbols::{SourceLocation, SymbolTable};
use crate::tracee::{StopStatus, Tracee};
use crate::ui::{DebuggerUI, Location, Status, HELP_TEXT};

/// Functions tried in this order when no entry function was given
pub const DEFAULT_ENTRY_FUNCTIONS: &[&str] = &["main.main", "main"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Loading symbols, launching and running to the entry function
    Initializing,
    /// The debuggee is stopped and waits for commands
    AtCursor,
    /// The debuggee exited or was killed
    Exited,
    /// The operator quit
    Terminated,
}

pub struct Debugger<UI: DebuggerUI> {
    executable: PathBuf,
    entry: Option<String>,
    ui: UI,
    symbols: Option<SymbolTable>,
    tracee: Option<Tracee>,
    breakpoints: PersistentBreakpoints,
    cursor: Option<SourceLocation>,
    state: SessionState,
}

impl<UI: DebuggerUI> Debugger<UI> {
    pub fn build(executable: impl AsRef<Path>, ui: UI) -> Self {
        Debugger {
            executable: executable.as_ref().to_owned(),
            entry: None,
            ui,
            symbols: None,
            tracee: None,
            breakpoints: PersistentBreakpoints::new(),
            cursor: None,
            state: SessionState::Initializing,
        }
    }

    /// Run to this function instead of the [`DEFAULT_ENTRY_FUNCTIONS`] at startup
    #[must_use]
    pub fn with_entry(mut self, entry: Option<String>) -> Self {
        self.entry = entry;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The source position the debuggee is stopped at
    pub fn cursor(&self) -> Option<&SourceLocation> {
        self.cursor.as_ref()
    }

    pub fn breakpoints(&self) -> &PersistentBreakpoints {
        &self.breakpoints
    }

    /// Ends the session and hands back the interface, killing the debuggee if needed
    pub fn into_ui(self) -> UI {
        self.ui
    }

    /// Loads the symbols, launches the debuggee and runs it to its entry function
    ///
    /// # Errors
    ///
    /// Everything that goes wrong here is fatal: the executable cannot be launched, it has no
    /// usable debug information, or it has no entry function with a source line.
    pub fn launch_debuggee(&mut self) -> Result<Feedback> {
        self.state = SessionState::Initializing;
        let symbols = SymbolTable::load(&self.executable)?;
        let tracee = Tracee::launch(&self.executable)?;

        let symbols = if symbols.is_position_independent() {
            let load_address = tracee.load_address()?;
            let bias = match load_address.offset_from(symbols.image_base()) {
                Some(bias) => bias as u64,
                None => {
                    warn!(
                        "debuggee was loaded at {load_address}, below its image base {}",
                        symbols.image_base()
                    );
                    0
                }
            };
            symbols.rebase(bias)
        } else {
            symbols
        };

        let entry = self.entry_function(&symbols)?;
        let start = symbols
            .pc_to_line(entry)
            .ok_or(DebuggerError::NoLineForAddress(entry))?;
        info!("entry function at {entry}, first line {start}");

        self.symbols = Some(symbols);
        self.tracee = Some(tracee);
        self.run_to(start)
    }

    fn entry_function(&self, symbols: &SymbolTable) -> Result<Addr> {
        let candidates: Vec<&str> = match &self.entry {
            Some(name) => vec![name.as_str()],
            None => DEFAULT_ENTRY_FUNCTIONS.to_vec(),
        };
        for name in &candidates {
            match symbols.function_entry(name) {
                Ok(addr) => return Ok(addr),
                Err(e) => debug!("no entry function {name}: {e}"),
            }
        }
        Err(DebuggerError::EntryNotFound(candidates.join(", ")))
    }

    /// Runs the command loop until the operator quits or the debuggee is gone
    pub fn run_debugger(&mut self) -> Result<()> {
        let mut feedback = self.launch_debuggee()?;

        while self.state == SessionState::AtCursor {
            let status = self.ui.process(feedback)?;
            feedback = match self.dispatch(status) {
                Err(e) if e.is_fatal() => {
                    error!("{e}");
                    return Err(e);
                }
                result => result.into(),
            };
        }

        if self.state == SessionState::Exited {
            self.ui.report(&feedback)?;
        }
        Ok(())
    }

    /// Executes one command
    pub fn dispatch(&mut self, status: Status) -> Result<Feedback> {
        match status {
            Status::Help => Ok(Feedback::Text(HELP_TEXT.to_string())),
            Status::SetBreakpoint(location) => self.set_bp(&location),
            Status::DelBreakpoint(location) => self.del_bp(&location),
            Status::Breakpoints => Ok(Feedback::Breakpoints(self.breakpoints.set().clone())),
            Status::StepSingle => self.step_single(),
            Status::StepLine => self.step_line(),
            Status::Continue => self.cont(),
            Status::Listing(line) => self.list(line),
            Status::DebuggerQuit => self.quit(),
        }
    }

    fn err_if_no_debuggee(&self) -> Result<()> {
        if self.tracee.is_none() || self.symbols.is_none() {
            let err = DebuggerError::NoDebuggee;
            error!("{err}");
            Err(err)
        } else {
            Ok(())
        }
    }

    fn symbols(&self) -> Result<&SymbolTable> {
        self.symbols.as_ref().ok_or(DebuggerError::NoDebuggee)
    }

    fn cursor_or_err(&self) -> Result<&SourceLocation> {
        self.cursor.as_ref().ok_or_else(|| {
            DebuggerError::CommandParse("there is no current source position".to_string())
        })
    }

    /// Turns what the operator wrote into the path the line table uses and a line
    fn resolve_location(&self, location: &Location) -> Result<SourceLocation> {
        let symbols = self.symbols()?;
        match location {
            Location::Line(line) => Ok(SourceLocation::new(
                self.cursor_or_err()?.file.clone(),
                *line,
            )),
            Location::FileLine(file, line) => {
                Ok(SourceLocation::new(symbols.resolve_file(file)?, *line))
            }
            Location::Function(name) => {
                let entry = symbols.function_entry(name)?;
                symbols
                    .pc_to_line(entry)
                    .ok_or(DebuggerError::NoLineForAddress(entry))
            }
        }
    }

    fn listing(&self, file: &Path, center: usize) -> Result<Listing> {
        Listing::read(
            file,
            center,
            self.cursor.as_ref(),
            self.breakpoints.set().lines(file),
        )
    }

    fn listing_at_cursor(&self) -> Result<Feedback> {
        let cursor = self.cursor_or_err()?;
        Ok(Feedback::Listing(self.listing(&cursor.file, cursor.line)?))
    }

    pub fn set_bp(&mut self, location: &Location) -> Result<Feedback> {
        self.err_if_no_debuggee()?;
        let location = self.resolve_location(location)?;
        let (Some(tracee), Some(symbols)) = (self.tracee.as_ref(), self.symbols.as_ref()) else {
            return Err(DebuggerError::NoDebuggee);
        };

        let addr = symbols.line_to_pc(&location.file, location.line)?;
        if !symbols.is_instruction_boundary(addr) {
            return Err(DebuggerError::NotInstructionBoundary(addr));
        }
        if !self
            .breakpoints
            .add(tracee, &location.file, location.line, addr)?
        {
            info!("there already is a breakpoint at {location}");
        }

        Ok(Feedback::Listing(
            self.listing(&location.file, location.line)?,
        ))
    }

    pub fn del_bp(&mut self, location: &Location) -> Result<Feedback> {
        self.err_if_no_debuggee()?;
        let location = self.resolve_location(location)?;
        let Some(tracee) = self.tracee.as_ref() else {
            return Err(DebuggerError::NoDebuggee);
        };

        if !self
            .breakpoints
            .clear(tracee, &location.file, location.line)?
        {
            warn!("removed a breakpoint at {location} that did not exist");
            return Ok(Feedback::Text(format!("no breakpoint at {location}")));
        }
        Ok(Feedback::Listing(
            self.listing(&location.file, location.line)?,
        ))
    }

    /// Single steps one machine instruction
    pub fn step_single(&mut self) -> Result<Feedback> {
        self.err_if_no_debuggee()?;
        let Some(tracee) = self.tracee.as_mut() else {
            return Err(DebuggerError::NoDebuggee);
        };

        let status = match self.breakpoints.step_over(tracee)? {
            Some(status) => status,
            None => tracee.single_step()?,
        };
        self.after_stop(status)
    }

    /// Runs to the next line of the current file that has code
    ///
    /// This does not follow the control flow: if that line is never reached, the debuggee
    /// runs until something else stops it.
    pub fn step_line(&mut self) -> Result<Feedback> {
        self.err_if_no_debuggee()?;
        let cursor = self.cursor_or_err()?.clone();
        let (Some(tracee), Some(symbols)) = (self.tracee.as_mut(), self.symbols.as_ref()) else {
            return Err(DebuggerError::NoDebuggee);
        };
        let target = SourceLocation::new(
            cursor.file.clone(),
            symbols.next_code_line(&cursor.file, cursor.line)?,
        );

        if let Some(status) = self.breakpoints.step_over(tracee)? {
            if status.is_terminal() {
                return self.after_stop(status);
            }
        }
        self.run_to(target)
    }

    /// Continues until the debuggee traps or terminates
    pub fn cont(&mut self) -> Result<Feedback> {
        self.err_if_no_debuggee()?;
        let Some(tracee) = self.tracee.as_mut() else {
            return Err(DebuggerError::NoDebuggee);
        };

        if let Some(status) = self.breakpoints.step_over(tracee)? {
            if status.is_terminal() {
                return self.after_stop(status);
            }
        }
        let status = tracee.cont()?;
        self.after_stop(status)
    }

    /// Shows the source around the cursor, or around `line` in the cursor's file
    pub fn list(&self, line: Option<usize>) -> Result<Feedback> {
        let cursor = self.cursor_or_err()?;
        let center = line.unwrap_or(cursor.line);
        Ok(Feedback::Listing(self.listing(&cursor.file, center)?))
    }

    /// Takes the breakpoints out and kills the debuggee
    pub fn quit(&mut self) -> Result<Feedback> {
        if let Some(tracee) = self.tracee.as_mut() {
            if let Err(e) = self.breakpoints.remove_all(tracee) {
                warn!("could not remove all breakpoints before killing the debuggee: {e}");
            }
            tracee.kill()?;
        }
        self.state = SessionState::Terminated;
        Ok(Feedback::Ok)
    }

    /// Kills the debuggee if it is still around
    pub fn cleanup(&mut self) -> Result<()> {
        if let Some(tracee) = self.tracee.as_mut() {
            tracee.kill()?;
        }
        Ok(())
    }

    fn run_to(&mut self, target: SourceLocation) -> Result<Feedback> {
        let (Some(tracee), Some(symbols)) = (self.tracee.as_mut(), self.symbols.as_ref()) else {
            return Err(DebuggerError::NoDebuggee);
        };

        let run = run_to_line(tracee, symbols, &target.file, target.line)?;
        if !run.reached {
            return self.after_stop(run.status);
        }
        self.cursor = Some(target);
        self.state = SessionState::AtCursor;
        self.listing_at_cursor()
    }

    /// Brings the session up to date after the debuggee stopped
    fn after_stop(&mut self, status: StopStatus) -> Result<Feedback> {
        if status.is_terminal() {
            info!("debuggee terminated: {status:?}");
            self.state = SessionState::Exited;
            return Ok(Feedback::Exited(status));
        }
        self.state = SessionState::AtCursor;

        let (Some(tracee), Some(symbols)) = (self.tracee.as_ref(), self.symbols.as_ref()) else {
            return Err(DebuggerError::NoDebuggee);
        };

        let mut pc = tracee.get_pc()?;
        if status.is_sigtrap() && matches!(tracee.stop_code()?, SI_KERNEL | TRAP_BRKPT) {
            let bp_addr = pc - TRAP_PC_ADVANCE;
            if self.breakpoints.is_installed(bp_addr) {
                debug!("hit breakpoint at {bp_addr}");
                tracee.set_pc(bp_addr)?;
                pc = bp_addr;
            }
        }

        let Some(location) = symbols.pc_to_line(pc) else {
            self.cursor = None;
            return Ok(Feedback::NoSource(pc));
        };
        self.cursor = Some(location);

        match status {
            StopStatus::Stopped(sig) if !status.is_sigtrap() => {
                Ok(Feedback::Signal(sig, self.listing_at_cursor_opt()))
            }
            _ => self.listing_at_cursor(),
        }
    }

    fn listing_at_cursor_opt(&self) -> Option<Listing> {
        let cursor = self.cursor.as_ref()?;
        match self.listing(&cursor.file, cursor.line) {
            Ok(l) => Some(l),
            Err(e) => {
                debug!("no listing: {e}");
                None
            }
        }
    }
}
