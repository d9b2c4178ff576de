//! # srcdbg
//!
//! A line-oriented source debugger for native x86_64 Linux programs.
//!
//! The debugger launches a program under `ptrace`, runs it to the first line of its entry
//! function and then lets the operator set breakpoints by source location, single-step,
//! advance line by line and continue, always showing the source around the current position.
//!
//! The pieces, from the bottom up:
//!
//! - [`symbols`]: the line table and symbol table of the executable
//! - [`tracee`]: the traced child process
//! - [`breakpoint`]: software breakpoints and running to a source line
//! - [`listing`]: the source window shown after every stop
//! - [`debugger`]: the session that ties everything together, driven by a [`ui::DebuggerUI`]

use nix::sys::ptrace;
use nix::unistd::Pid;

use crate::addr::Addr;
use crate::errors::Result;

pub mod addr;
pub mod breakpoint;
pub mod consts;
pub mod debugger;
pub mod disassemble;
pub mod errors;
pub mod feedback;
pub mod listing;
pub mod symbols;
pub mod tracee;
pub mod ui;

/// A machine word as `ptrace` reads and writes it
pub type Word = i64;

pub(crate) fn mem_write_word(pid: Pid, addr: Addr, value: Word) -> Result<()> {
    Ok(ptrace::write(pid, addr.into(), value)?)
}

pub(crate) fn mem_read_word(pid: Pid, addr: Addr) -> Result<Word> {
    Ok(ptrace::read(pid, addr.into())?)
}
