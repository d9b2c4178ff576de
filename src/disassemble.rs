//! # Instruction decoding
//!
//! A software breakpoint overwrites the first byte of an instruction. Patching any other byte
//! corrupts the instruction stream, so before an address is used for a breakpoint we decode the
//! surrounding code with iced-x86 and check that an instruction actually starts there.

use iced_x86::{Decoder, DecoderOptions, Instruction};
use tracing::trace;

use crate::addr::Addr;

const CODE_BITNESS: u32 = 64;

/// Whether an instruction starts at `addr`, decoding `code` from `first_addr`
pub fn is_instruction_boundary(code: &[u8], first_addr: Addr, addr: Addr) -> bool {
    if addr < first_addr || addr.usize() >= first_addr.usize() + code.len() {
        return false;
    }

    let mut decoder = Decoder::with_ip(CODE_BITNESS, code, first_addr.u64(), DecoderOptions::NONE);
    let mut instruction = Instruction::default();
    while decoder.can_decode() {
        decoder.decode_out(&mut instruction);
        let ip: Addr = instruction.ip().into();
        if ip == addr {
            return true;
        }
        if ip > addr {
            trace!("{addr} is inside the instruction before {ip}");
            return false;
        }
    }
    false
}

#[cfg(test)]
mod test {
    use super::*;

    const CODE: [u8; 14] = [
        0x48, 0x89, 0xe5, // mov rbp,rsp
        0x48, 0x83, 0xec, 0x20, // sub rsp,0x20
        0x48, 0x8b, 0x05, 0xb8, 0x13, 0x00, 0x00, // mov rax,[rip+0x13b8]
    ];

    #[test]
    fn test_boundaries() {
        let base = Addr::from(0x401000usize);
        assert!(is_instruction_boundary(&CODE, base, base));
        assert!(is_instruction_boundary(&CODE, base, base + 3));
        assert!(is_instruction_boundary(&CODE, base, base + 7));
        assert!(!is_instruction_boundary(&CODE, base, base + 1));
        assert!(!is_instruction_boundary(&CODE, base, base + 9));
        assert!(!is_instruction_boundary(&CODE, base, base + 14));
        assert!(!is_instruction_boundary(&CODE, base, base - 1));
    }
}
