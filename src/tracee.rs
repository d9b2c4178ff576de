//! # Tracee
//!
//! The traced child process and everything we can do to it through
//! [ptrace](nix::sys::ptrace): launching it, stepping and continuing it, and peeking and poking
//! its registers and memory.
//!
//! The tracee never interprets a stop. It hands the raw [`StopStatus`] to the caller, which
//! knows about breakpoints and source lines.

use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use nix::libc;
use nix::sys::personality::{self, Persona};
use nix::sys::ptrace;
use nix::sys::signal::{self, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{execv, fork, ForkResult, Pid};
use tracing::{debug, error, info, trace, warn};

use crate::addr::Addr;
use crate::consts::SPAWN_FAILED_EXIT;
use crate::errors::{DebuggerError, Result};
use crate::{mem_read_word, mem_write_word, Word};

const LOW_BYTE_MASK: Word = 0xff;

/// What `waitpid` told us after the tracee was resumed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopStatus {
    /// The tracee is stopped and can be inspected
    Stopped(Signal),
    /// The tracee exited with this exit code
    Exited(i32),
    /// The tracee was killed by this signal
    Signaled(Signal),
}

impl StopStatus {
    /// The tracee is gone after this stop
    #[inline]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Stopped(_))
    }

    #[inline]
    pub fn is_sigtrap(&self) -> bool {
        matches!(self, Self::Stopped(Signal::SIGTRAP))
    }
}

/// Lifecycle of the tracee
///
/// A debugger that has not launched anything yet simply holds no [`Tracee`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceeState {
    Running,
    Stopped(Signal),
    Exited(i32),
    Signaled(Signal),
}

impl From<StopStatus> for TraceeState {
    fn from(value: StopStatus) -> Self {
        match value {
            StopStatus::Stopped(sig) => Self::Stopped(sig),
            StopStatus::Exited(code) => Self::Exited(code),
            StopStatus::Signaled(sig) => Self::Signaled(sig),
        }
    }
}

/// A child process under trace control
///
/// Dropping a tracee that is still alive kills it, so a debugger that bails out never leaves
/// a stopped child behind.
#[derive(Debug)]
pub struct Tracee {
    pid: Pid,
    state: TraceeState,
    executable: PathBuf,
}

impl Tracee {
    /// Starts `executable` as a traced child
    ///
    /// The child inherits stdout and stderr, gets no arguments besides `argv[0]`, runs with
    /// address space randomization disabled and is stopped right after `execv`.
    ///
    /// # Errors
    ///
    /// Fails if the executable does not exist, is not a file, or the child could not be
    /// forked or did not make it to the first instruction.
    pub fn launch(executable: impl AsRef<Path>) -> Result<Self> {
        let path: &Path = executable.as_ref();
        if !path.exists() {
            let err = DebuggerError::ExecutableDoesNotExist(path.to_string_lossy().to_string());
            error!("{err}");
            return Err(err);
        }
        if !path.is_file() {
            let err = DebuggerError::ExecutableIsNotAFile(path.to_string_lossy().to_string());
            error!("{err}");
            return Err(err);
        }

        // allocate before forking, the child may only do async-signal-safe things
        let cpath = CString::new(path.as_os_str().as_bytes())?;
        let args = [cpath.clone()];

        let fork_res = unsafe { fork() };
        match fork_res {
            Err(e) => {
                error!("could not fork the debuggee: {e}");
                Err(DebuggerError::Spawn(e.to_string()))
            }
            Ok(ForkResult::Child) => {
                let _ = personality::set(Persona::ADDR_NO_RANDOMIZE);
                if ptrace::traceme().is_ok() {
                    let _ = execv(&cpath, &args);
                }
                unsafe { libc::_exit(SPAWN_FAILED_EXIT) }
            }
            Ok(ForkResult::Parent { child }) => {
                let mut tracee = Tracee {
                    pid: child,
                    state: TraceeState::Running,
                    executable: path.to_owned(),
                };
                match tracee.wait()? {
                    StopStatus::Stopped(Signal::SIGTRAP) => {
                        info!("launched debuggee {} with pid {child}", path.display());
                        Ok(tracee)
                    }
                    StopStatus::Stopped(sig) => {
                        warn!("debuggee stopped with {sig} instead of SIGTRAP after exec");
                        Ok(tracee)
                    }
                    StopStatus::Exited(code) => Err(DebuggerError::Spawn(format!(
                        "{} exited with status {code} before it could be traced",
                        path.display()
                    ))),
                    StopStatus::Signaled(sig) => Err(DebuggerError::Spawn(format!(
                        "{} was killed by {sig} before it could be traced",
                        path.display()
                    ))),
                }
            }
        }
    }

    #[inline]
    pub fn pid(&self) -> Pid {
        self.pid
    }

    #[inline]
    pub fn state(&self) -> TraceeState {
        self.state
    }

    /// Whether the process still exists
    #[inline]
    pub fn is_alive(&self) -> bool {
        !matches!(
            self.state,
            TraceeState::Exited(_) | TraceeState::Signaled(_)
        )
    }

    fn err_if_dead(&self) -> Result<()> {
        if self.is_alive() {
            Ok(())
        } else {
            Err(DebuggerError::ProcessExited)
        }
    }

    /// The signal the tracee stopped with, if it should be delivered when resuming
    ///
    /// Traps belong to the debugger and `SIGSTOP` only suspends, everything else was meant for
    /// the debuggee.
    fn pending_signal(&self) -> Option<Signal> {
        match self.state {
            TraceeState::Stopped(Signal::SIGTRAP | Signal::SIGSTOP) => None,
            TraceeState::Stopped(sig) => Some(sig),
            _ => None,
        }
    }

    /// Blocks until the tracee changes state
    pub fn wait(&mut self) -> Result<StopStatus> {
        loop {
            let status = match waitpid(self.pid, Some(WaitPidFlag::__WALL))? {
                WaitStatus::Stopped(_, sig) => StopStatus::Stopped(sig),
                WaitStatus::PtraceEvent(_, sig, _) => StopStatus::Stopped(sig),
                WaitStatus::PtraceSyscall(_) => StopStatus::Stopped(Signal::SIGTRAP),
                WaitStatus::Exited(_, code) => StopStatus::Exited(code),
                WaitStatus::Signaled(_, sig, _) => StopStatus::Signaled(sig),
                other @ (WaitStatus::Continued(_) | WaitStatus::StillAlive) => {
                    trace!("ignoring wait status {other:?}");
                    continue;
                }
            };
            trace!("debuggee {}: {status:?}", self.pid);
            self.state = status.into();
            return Ok(status);
        }
    }

    /// Executes exactly one machine instruction
    pub fn single_step(&mut self) -> Result<StopStatus> {
        self.err_if_dead()?;
        ptrace::step(self.pid, self.pending_signal())?;
        self.state = TraceeState::Running;
        self.wait()
    }

    /// Resumes the tracee until it traps, receives a signal or terminates
    pub fn cont(&mut self) -> Result<StopStatus> {
        self.err_if_dead()?;
        ptrace::cont(self.pid, self.pending_signal())?;
        self.state = TraceeState::Running;
        self.wait()
    }

    pub fn get_pc(&self) -> Result<Addr> {
        self.err_if_dead()?;
        let regs = ptrace::getregs(self.pid)?;
        Ok(regs.rip.into())
    }

    pub fn set_pc(&self, addr: Addr) -> Result<()> {
        self.err_if_dead()?;
        let mut regs = ptrace::getregs(self.pid)?;
        regs.rip = addr.u64();
        ptrace::setregs(self.pid, regs)?;
        Ok(())
    }

    /// Reads the single byte at `addr`
    pub fn read_byte(&self, addr: Addr) -> Result<u8> {
        self.err_if_dead()?;
        let word = mem_read_word(self.pid, addr)?;
        // little endian: the byte at addr is the lowest byte of the word starting there
        Ok((word & LOW_BYTE_MASK) as u8)
    }

    /// Overwrites the single byte at `addr`, leaving its neighbours alone
    pub fn write_byte(&self, addr: Addr, byte: u8) -> Result<()> {
        self.err_if_dead()?;
        let word = mem_read_word(self.pid, addr)?;
        let patched = (word & !LOW_BYTE_MASK) | Word::from(byte);
        trace!("patch {addr}: {word:016x} -> {patched:016x}");
        mem_write_word(self.pid, addr, patched)
    }

    /// The `si_code` of the signal the tracee is currently stopped with
    pub fn stop_code(&self) -> Result<i32> {
        self.err_if_dead()?;
        Ok(ptrace::getsiginfo(self.pid)?.si_code)
    }

    /// Where the executable's first segment was mapped
    ///
    /// Looked up in `/proc/<pid>/maps`. If the executable cannot be identified there, the
    /// lowest mapping is used.
    pub fn load_address(&self) -> Result<Addr> {
        self.err_if_dead()?;
        let maps = proc_maps::get_process_maps(self.pid.into())?;
        let exe = std::fs::canonicalize(&self.executable)?;

        if let Some(map) = maps
            .iter()
            .find(|m| m.offset == 0 && m.filename() == Some(exe.as_path()))
        {
            return Ok(map.start().into());
        }

        warn!(
            "could not find {} in the memory map, using the lowest mapping",
            exe.display()
        );
        match maps.first() {
            Some(map) => Ok(map.start().into()),
            None => Err(DebuggerError::NoDebuggee),
        }
    }

    /// Kills the tracee and reaps it
    pub fn kill(&mut self) -> Result<()> {
        if !self.is_alive() {
            return Ok(());
        }
        match signal::kill(self.pid, Signal::SIGKILL) {
            Ok(()) => (),
            Err(nix::Error::ESRCH) => debug!("debuggee {} was already gone", self.pid),
            Err(e) => return Err(e.into()),
        }
        while !self.wait()?.is_terminal() {}
        info!("killed debuggee {}", self.pid);
        Ok(())
    }
}

impl Drop for Tracee {
    fn drop(&mut self) {
        if let Err(e) = self.kill() {
            warn!("could not kill debuggee {} while dropping: {e}", self.pid);
        }
    }
}
