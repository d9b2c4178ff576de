//! # Breakpoints
//!
//! Software breakpoints replace the first byte of an instruction with `int3`. When the debuggee
//! executes it, it stops with `SIGTRAP` and its program counter one byte past the patched
//! address.
//!
//! There are two kinds here:
//!
//! - transient breakpoints, which only live for one [`run_to_line`]
//! - persistent breakpoints set by the operator, kept in [`PersistentBreakpoints`] until they
//!   are cleared or the session ends

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, trace, warn};

use crate::addr::Addr;
use crate::consts::{INT3_BYTE, TRAP_PC_ADVANCE};
use crate::errors::{DebuggerError, Result};
use crate::symbols::SymbolTable;
use crate::tracee::{StopStatus, Tracee};

/// An installed software breakpoint
///
/// Holds the byte that the `int3` replaced. [`Breakpoint::remove`] consumes the breakpoint, so
/// the saved byte is written back exactly once.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct Breakpoint {
    addr: Addr,
    saved_data: u8,
}

impl Breakpoint {
    /// Patches an `int3` into the debuggee at `addr`
    ///
    /// `addr` must be the first byte of an instruction. This is not checked here, addresses
    /// come from [`SymbolTable::line_to_pc`] or are verified with
    /// [`SymbolTable::is_instruction_boundary`] before they get here.
    pub fn install(tracee: &Tracee, addr: Addr) -> Result<Self> {
        let saved_data = tracee.read_byte(addr)?;
        tracee.write_byte(addr, INT3_BYTE)?;
        trace!("installed breakpoint at {addr}, saved byte {saved_data:02x}");
        Ok(Self { addr, saved_data })
    }

    /// Restores the original byte
    pub fn remove(self, tracee: &Tracee) -> Result<()> {
        tracee.write_byte(self.addr, self.saved_data)?;
        trace!("removed breakpoint at {}", self.addr);
        Ok(())
    }

    #[inline]
    pub fn addr(&self) -> Addr {
        self.addr
    }

    #[inline]
    pub fn saved_data(&self) -> u8 {
        self.saved_data
    }
}

/// Result of [`run_to_line`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunToLine {
    /// How the debuggee stopped
    pub status: StopStatus,
    /// Where the transient breakpoint was
    pub addr: Addr,
    /// The debuggee stopped at the transient breakpoint and the pc points at `addr` again
    pub reached: bool,
}

/// Continues the debuggee until it reaches `file:line`
///
/// A transient breakpoint is placed at the first instruction of the line. It is removed again
/// before this returns, however the debuggee stopped, unless the debuggee is gone. If the
/// debuggee stopped at it, the pc is set back to the patched instruction, so it is executed
/// properly when the debuggee is resumed.
///
/// # Errors
///
/// Fails with [`LocationNotFound`](DebuggerError::LocationNotFound) if the line has no code,
/// with [`NotInstructionBoundary`](DebuggerError::NotInstructionBoundary) if its address is not
/// the start of an instruction in a known function, or if any of the ptrace operations fail.
pub fn run_to_line(
    tracee: &mut Tracee,
    symbols: &SymbolTable,
    file: &Path,
    line: usize,
) -> Result<RunToLine> {
    let addr = symbols.line_to_pc(file, line)?;
    if !symbols.is_instruction_boundary(addr) {
        return Err(DebuggerError::NotInstructionBoundary(addr));
    }
    debug!("running to {}:{line} at {addr}", file.display());

    let bp = Breakpoint::install(tracee, addr)?;
    let status = match tracee.cont() {
        Ok(status) => status,
        Err(e) => {
            if tracee.is_alive() {
                if let Err(restore_err) = bp.remove(tracee) {
                    warn!("could not remove transient breakpoint at {addr}: {restore_err}");
                }
            }
            return Err(e);
        }
    };

    if status.is_terminal() {
        debug!("debuggee terminated before reaching {addr}: {status:?}");
        return Ok(RunToLine {
            status,
            addr,
            reached: false,
        });
    }

    bp.remove(tracee)?;
    let reached = status.is_sigtrap() && tracee.get_pc()? == addr + TRAP_PC_ADVANCE;
    if reached {
        tracee.set_pc(addr)?;
    }

    Ok(RunToLine {
        status,
        addr,
        reached,
    })
}

/// Source lines with a breakpoint, grouped by file
///
/// Files and the lines of each file keep the order they were added in. A line is never in the
/// set twice.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BreakpointSet {
    files: Vec<(PathBuf, Vec<usize>)>,
}

impl BreakpointSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `file:line`, returns false if it was already there
    pub fn insert(&mut self, file: &Path, line: usize) -> bool {
        match self.files.iter_mut().find(|(f, _)| f == file) {
            Some((_, lines)) if lines.contains(&line) => false,
            Some((_, lines)) => {
                lines.push(line);
                true
            }
            None => {
                self.files.push((file.to_owned(), vec![line]));
                true
            }
        }
    }

    /// Removes `file:line`, returns false if it was not there
    pub fn remove(&mut self, file: &Path, line: usize) -> bool {
        let Some(idx) = self.files.iter().position(|(f, _)| f == file) else {
            return false;
        };
        let lines = &mut self.files[idx].1;
        let Some(pos) = lines.iter().position(|l| *l == line) else {
            return false;
        };
        lines.remove(pos);
        if lines.is_empty() {
            self.files.remove(idx);
        }
        true
    }

    pub fn lines(&self, file: &Path) -> &[usize] {
        self.files
            .iter()
            .find(|(f, _)| f == file)
            .map(|(_, lines)| lines.as_slice())
            .unwrap_or_default()
    }

    pub fn contains(&self, file: &Path, line: usize) -> bool {
        self.lines(file).contains(&line)
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Path, &[usize])> {
        self.files
            .iter()
            .map(|(f, lines)| (f.as_path(), lines.as_slice()))
    }
}

#[derive(Debug)]
struct Installed {
    bp: Breakpoint,
    /// the source lines that resolved to this address
    locations: Vec<(PathBuf, usize)>,
}

/// The operator's breakpoints
///
/// Several source lines can resolve to the same address, the `int3` stays until the last of
/// them is cleared.
#[derive(Debug, Default)]
pub struct PersistentBreakpoints {
    set: BreakpointSet,
    installed: HashMap<Addr, Installed>,
}

impl PersistentBreakpoints {
    pub fn new() -> Self {
        Self::default()
    }

    /// The source lines that have a breakpoint
    pub fn set(&self) -> &BreakpointSet {
        &self.set
    }

    pub fn is_installed(&self, addr: Addr) -> bool {
        self.installed.contains_key(&addr)
    }

    /// Records a breakpoint at `file:line` and installs it at `addr` unless one is already there
    ///
    /// Returns false if `file:line` already had a breakpoint.
    pub fn add(&mut self, tracee: &Tracee, file: &Path, line: usize, addr: Addr) -> Result<bool> {
        if self.set.contains(file, line) {
            return Ok(false);
        }

        if let Some(installed) = self.installed.get_mut(&addr) {
            installed.locations.push((file.to_owned(), line));
        } else {
            let bp = Breakpoint::install(tracee, addr)?;
            self.installed.insert(
                addr,
                Installed {
                    bp,
                    locations: vec![(file.to_owned(), line)],
                },
            );
        }
        self.set.insert(file, line);
        debug!("breakpoint at {}:{line} ({addr})", file.display());
        Ok(true)
    }

    /// Forgets the breakpoint at `file:line`, removing the `int3` if no other line uses it
    ///
    /// Returns false if `file:line` had no breakpoint.
    pub fn clear(&mut self, tracee: &Tracee, file: &Path, line: usize) -> Result<bool> {
        if !self.set.remove(file, line) {
            return Ok(false);
        }

        let Some(addr) = self
            .installed
            .iter()
            .find(|(_, i)| i.locations.iter().any(|(f, l)| f == file && *l == line))
            .map(|(addr, _)| *addr)
        else {
            return Ok(true);
        };

        let now_unused = match self.installed.get_mut(&addr) {
            Some(installed) => {
                installed.locations.retain(|(f, l)| !(f == file && *l == line));
                installed.locations.is_empty()
            }
            None => false,
        };
        if now_unused {
            if let Some(installed) = self.installed.remove(&addr) {
                if tracee.is_alive() {
                    installed.bp.remove(tracee)?;
                }
            }
        }
        Ok(true)
    }

    /// Moves the debuggee off a breakpoint it is sitting on
    ///
    /// If the pc is at an installed breakpoint, the original instruction is put back, executed
    /// with a single step, and the `int3` is installed again. Returns the status of that step,
    /// or `None` if the pc was not at a breakpoint and nothing happened.
    pub fn step_over(&mut self, tracee: &mut Tracee) -> Result<Option<StopStatus>> {
        let pc = tracee.get_pc()?;
        let Some(installed) = self.installed.remove(&pc) else {
            return Ok(None);
        };
        trace!("stepping over breakpoint at {pc}");

        installed.bp.remove(tracee)?;
        let status = tracee.single_step()?;
        if status.is_terminal() {
            return Ok(Some(status));
        }
        let bp = Breakpoint::install(tracee, pc)?;
        self.installed.insert(
            pc,
            Installed {
                bp,
                locations: installed.locations,
            },
        );
        Ok(Some(status))
    }

    /// Restores the original code at every installed breakpoint
    ///
    /// The breakpoint set is kept for display.
    pub fn remove_all(&mut self, tracee: &Tracee) -> Result<()> {
        for (_, installed) in self.installed.drain() {
            if tracee.is_alive() {
                installed.bp.remove(tracee)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_set_accumulates_in_order() {
        let mut set = BreakpointSet::new();
        assert!(set.insert(Path::new("a.go"), 10));
        assert!(set.insert(Path::new("a.go"), 20));
        assert!(set.insert(Path::new("b.go"), 5));
        assert!(!set.insert(Path::new("a.go"), 10));

        assert_eq!(set.lines(Path::new("a.go")), &[10, 20]);
        assert_eq!(set.lines(Path::new("b.go")), &[5]);
        let all: Vec<(&Path, &[usize])> = set.iter().collect();
        assert_eq!(
            all,
            vec![
                (Path::new("a.go"), &[10usize, 20][..]),
                (Path::new("b.go"), &[5usize][..])
            ]
        );
    }

    #[test]
    fn test_set_remove() {
        let mut set = BreakpointSet::new();
        set.insert(Path::new("a.go"), 10);
        set.insert(Path::new("a.go"), 20);
        assert!(set.remove(Path::new("a.go"), 10));
        assert!(!set.remove(Path::new("a.go"), 10));
        assert!(!set.contains(Path::new("a.go"), 10));
        assert!(set.contains(Path::new("a.go"), 20));
        assert!(set.remove(Path::new("a.go"), 20));
        assert!(set.is_empty());
        assert!(set.lines(Path::new("a.go")).is_empty());
    }
}
