//! Thanks to the BugStalker debugger, which has written down these constants in a convenient
//! way. They are deeply nested into the libc, and not available from nix or the rust bindings of
//! the libc
//!
//! Source: <https://elixir.bootlin.com/linux/v6.13.1/source/include/uapi/asm-generic/siginfo.h#L227>

/// Sent by the kernel from somewhere, this is what an `int3` on x86_64 reports
pub const SI_KERNEL: i32 = 0x80;

// ---------------- SIGTRAP si_codes ---------------------------------------------------------------

/// Process breakpoint
pub const TRAP_BRKPT: i32 = 0x1;

/// The x86_64 `int3` opcode
pub const INT3_BYTE: u8 = 0xcc;

/// How far the program counter is past the patched byte after an `int3` trapped
pub const TRAP_PC_ADVANCE: usize = 1;

/// Exit code the forked child uses when it could not become a debuggee
pub const SPAWN_FAILED_EXIT: i32 = 127;
