//! Virtual addresses in the debuggee, and the conversions `ptrace` wants for them.

use std::fmt::Display;
use std::ops::{Add, Sub};

pub type RawPointer = *mut std::ffi::c_void;

/// An address in the address space of the debuggee
#[derive(Hash, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Addr(usize);

impl Addr {
    pub fn usize(&self) -> usize {
        self.0
    }
    pub fn u64(&self) -> u64 {
        self.0 as u64
    }

    /// Distance from `base` up to this address, `None` if `base` lies above it
    pub fn offset_from(&self, base: Addr) -> Option<usize> {
        self.0.checked_sub(base.0)
    }
}

impl Display for Addr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

impl std::fmt::Debug for Addr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}

impl Add<usize> for Addr {
    type Output = Self;
    fn add(self, rhs: usize) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl Sub<usize> for Addr {
    type Output = Self;
    fn sub(self, rhs: usize) -> Self::Output {
        Self(self.0 - rhs)
    }
}

impl From<usize> for Addr {
    fn from(value: usize) -> Self {
        Self(value)
    }
}

// addresses from DWARF, the symbol table and the registers are u64, the target is 64 bit
impl From<u64> for Addr {
    fn from(value: u64) -> Self {
        Self(value as usize)
    }
}

impl From<Addr> for RawPointer {
    fn from(value: Addr) -> Self {
        value.0 as RawPointer
    }
}

impl From<Addr> for u64 {
    fn from(value: Addr) -> Self {
        value.0 as u64
    }
}
