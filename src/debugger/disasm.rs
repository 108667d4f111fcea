//! Z80 disassembler
//!
//! One-instruction disassembly over the current memory map, returning the
//! mnemonic and the instruction length. The debugger's step-over plants
//! its one-shot breakpoint at `address + length`; the host uses the text.
//!
//! Decoding follows the same x-y-z field decomposition the interpreter
//! uses, so every byte sequence decodes to something (undocumented
//! opcodes included) and the length is always defined.

use crate::memory::Memory;

const R8: [&str; 8] = ["b", "c", "d", "e", "h", "l", "(hl)", "a"];
const RP: [&str; 4] = ["bc", "de", "hl", "sp"];
const RP2: [&str; 4] = ["bc", "de", "hl", "af"];
const CC: [&str; 8] = ["nz", "z", "nc", "c", "po", "pe", "p", "m"];
const ALU: [&str; 8] = [
    "add a,", "adc a,", "sub ", "sbc a,", "and ", "xor ", "or ", "cp ",
];
const ROT: [&str; 8] = ["rlc", "rrc", "rl", "rr", "sla", "sra", "sll", "srl"];

struct Reader<'a> {
    memory: &'a Memory,
    addr: u16,
    length: u16,
}

impl Reader<'_> {
    fn byte(&mut self) -> u8 {
        let value = self.memory.read(self.addr.wrapping_add(self.length));
        self.length += 1;
        value
    }

    fn word(&mut self) -> u16 {
        let lo = self.byte() as u16;
        let hi = self.byte() as u16;
        lo | (hi << 8)
    }

    fn displacement(&mut self) -> i8 {
        self.byte() as i8
    }
}

fn index_reg8(idx: &str, z: u8, d: Option<i8>) -> String {
    match z {
        4 => format!("{idx}h"),
        5 => format!("{idx}l"),
        6 => {
            let d = d.unwrap_or(0);
            if d < 0 {
                format!("({idx}-{:#04x})", -(d as i16))
            } else {
                format!("({idx}+{d:#04x})")
            }
        }
        _ => R8[z as usize].into(),
    }
}

/// Disassemble the instruction at `address`; returns (text, length)
pub fn disassemble(memory: &Memory, address: u16) -> (String, u16) {
    let mut r = Reader {
        memory,
        addr: address,
        length: 0,
    };
    let text = instruction(&mut r, None);
    (text, r.length)
}

/// Length alone, for the step-over breakpoint
pub fn instruction_length(memory: &Memory, address: u16) -> u16 {
    disassemble(memory, address).1
}

fn instruction(r: &mut Reader, index: Option<&'static str>) -> String {
    let opcode = r.byte();
    match opcode {
        0xCB => {
            if let Some(idx) = index {
                let d = r.displacement();
                let op = r.byte();
                ddcb(idx, d, op)
            } else {
                cb(r.byte())
            }
        }
        0xED => ed(r),
        0xDD => instruction(r, Some("ix")),
        0xFD => instruction(r, Some("iy")),
        _ => base(r, opcode, index),
    }
}

fn base(r: &mut Reader, opcode: u8, index: Option<&'static str>) -> String {
    let x = opcode >> 6;
    let y = (opcode >> 3) & 7;
    let z = opcode & 7;
    let p = y >> 1;
    let q = y & 1;

    // HL, H and L (and (hl) with displacement) redirect through IX/IY
    let hl: String = index.map_or("hl".into(), |i| i.into());
    let reg = |r: &mut Reader, n: u8| -> String {
        match index {
            Some(idx) if (4..=6).contains(&n) => {
                let d = if n == 6 { Some(r.displacement()) } else { None };
                index_reg8(idx, n, d)
            }
            _ => R8[n as usize].into(),
        }
    };
    let rp = |n: u8| -> String {
        if n == 2 {
            hl.clone()
        } else {
            RP[n as usize].into()
        }
    };

    match x {
        0 => match z {
            0 => match y {
                0 => "nop".into(),
                1 => "ex af,af'".into(),
                2 => format!("djnz {:#06x}", jr_target(r)),
                3 => format!("jr {:#06x}", jr_target(r)),
                _ => format!("jr {},{:#06x}", CC[(y - 4) as usize], jr_target(r)),
            },
            1 => {
                if q == 0 {
                    format!("ld {},{:#06x}", rp(p), r.word())
                } else {
                    format!("add {},{}", hl, rp(p))
                }
            }
            2 => match (q, p) {
                (0, 0) => "ld (bc),a".into(),
                (0, 1) => "ld (de),a".into(),
                (0, 2) => format!("ld ({:#06x}),{}", r.word(), hl),
                (0, _) => format!("ld ({:#06x}),a", r.word()),
                (1, 0) => "ld a,(bc)".into(),
                (1, 1) => "ld a,(de)".into(),
                (1, 2) => format!("ld {},({:#06x})", hl, r.word()),
                _ => format!("ld a,({:#06x})", r.word()),
            },
            3 => {
                if q == 0 {
                    format!("inc {}", rp(p))
                } else {
                    format!("dec {}", rp(p))
                }
            }
            4 => format!("inc {}", reg(r, y)),
            5 => format!("dec {}", reg(r, y)),
            6 => {
                let target = reg(r, y);
                format!("ld {},{:#04x}", target, r.byte())
            }
            _ => match y {
                0 => "rlca".into(),
                1 => "rrca".into(),
                2 => "rla".into(),
                3 => "rra".into(),
                4 => "daa".into(),
                5 => "cpl".into(),
                6 => "scf".into(),
                _ => "ccf".into(),
            },
        },
        1 => {
            if y == 6 && z == 6 {
                "halt".into()
            } else if y == 6 {
                // Memory forms keep the register operand un-renamed
                let dst = reg(r, 6);
                format!("ld {dst},{}", R8[z as usize])
            } else if z == 6 {
                let src = reg(r, 6);
                format!("ld {},{src}", R8[y as usize])
            } else {
                format!("ld {},{}", reg(r, y), reg(r, z))
            }
        }
        2 => format!("{}{}", ALU[y as usize], reg(r, z)),
        _ => match z {
            0 => format!("ret {}", CC[y as usize]),
            1 => match (q, p) {
                (0, _) => format!(
                    "pop {}",
                    if p == 3 { "af".into() } else { rp2(p, &hl) }
                ),
                (1, 0) => "ret".into(),
                (1, 1) => "exx".into(),
                (1, 2) => format!("jp ({hl})"),
                _ => format!("ld sp,{hl}"),
            },
            2 => format!("jp {},{:#06x}", CC[y as usize], r.word()),
            3 => match y {
                0 => format!("jp {:#06x}", r.word()),
                1 => unreachable!("cb prefix handled above"),
                2 => format!("out ({:#04x}),a", r.byte()),
                3 => format!("in a,({:#04x})", r.byte()),
                4 => format!("ex (sp),{hl}"),
                5 => "ex de,hl".into(),
                6 => "di".into(),
                _ => "ei".into(),
            },
            4 => format!("call {},{:#06x}", CC[y as usize], r.word()),
            5 => match (q, p) {
                (0, _) => format!(
                    "push {}",
                    if p == 3 { "af".into() } else { rp2(p, &hl) }
                ),
                (1, 0) => format!("call {:#06x}", r.word()),
                _ => "nop*".into(),
            },
            6 => format!("{}{:#04x}", ALU[y as usize], r.byte()),
            _ => format!("rst {:#04x}", y * 8),
        },
    }
}

fn rp2(p: u8, hl: &str) -> String {
    if p == 2 {
        hl.into()
    } else {
        RP2[p as usize].into()
    }
}

fn jr_target(r: &mut Reader) -> u16 {
    let d = r.displacement() as i16;
    r.addr
        .wrapping_add(r.length)
        .wrapping_add(d as u16)
}

fn cb(opcode: u8) -> String {
    let x = opcode >> 6;
    let y = (opcode >> 3) & 7;
    let z = opcode & 7;
    match x {
        0 => format!("{} {}", ROT[y as usize], R8[z as usize]),
        1 => format!("bit {},{}", y, R8[z as usize]),
        2 => format!("res {},{}", y, R8[z as usize]),
        _ => format!("set {},{}", y, R8[z as usize]),
    }
}

fn ddcb(idx: &str, d: i8, opcode: u8) -> String {
    let x = opcode >> 6;
    let y = (opcode >> 3) & 7;
    let z = opcode & 7;
    let mem = index_reg8(idx, 6, Some(d));
    // Register-naming forms copy the result into the register as well
    let suffix = if z != 6 {
        format!(",{}", R8[z as usize])
    } else {
        String::new()
    };
    match x {
        0 => format!("{} {}{}", ROT[y as usize], mem, suffix),
        1 => format!("bit {},{}", y, mem),
        2 => format!("res {},{}{}", y, mem, suffix),
        _ => format!("set {},{}{}", y, mem, suffix),
    }
}

fn ed(r: &mut Reader) -> String {
    let opcode = r.byte();
    let x = opcode >> 6;
    let y = (opcode >> 3) & 7;
    let z = opcode & 7;
    let p = y >> 1;
    let q = y & 1;

    match x {
        1 => match z {
            0 => {
                if y == 6 {
                    "in (c)".into()
                } else {
                    format!("in {},(c)", R8[y as usize])
                }
            }
            1 => {
                if y == 6 {
                    "out (c),0".into()
                } else {
                    format!("out (c),{}", R8[y as usize])
                }
            }
            2 => {
                if q == 0 {
                    format!("sbc hl,{}", RP[p as usize])
                } else {
                    format!("adc hl,{}", RP[p as usize])
                }
            }
            3 => {
                if q == 0 {
                    format!("ld ({:#06x}),{}", r.word(), RP[p as usize])
                } else {
                    format!("ld {},({:#06x})", RP[p as usize], r.word())
                }
            }
            4 => "neg".into(),
            5 => {
                if y == 1 {
                    "reti".into()
                } else {
                    "retn".into()
                }
            }
            6 => match y & 3 {
                0 | 1 => "im 0".into(),
                2 => "im 1".into(),
                _ => "im 2".into(),
            },
            _ => match y {
                0 => "ld i,a".into(),
                1 => "ld r,a".into(),
                2 => "ld a,i".into(),
                3 => "ld a,r".into(),
                4 => "rrd".into(),
                5 => "rld".into(),
                _ => "nop*".into(),
            },
        },
        2 if z <= 3 && y >= 4 => {
            const BLI: [[&str; 4]; 4] = [
                ["ldi", "cpi", "ini", "outi"],
                ["ldd", "cpd", "ind", "outd"],
                ["ldir", "cpir", "inir", "otir"],
                ["lddr", "cpdr", "indr", "otdr"],
            ];
            BLI[(y - 4) as usize][z as usize].into()
        }
        _ => "nop*".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn disasm_bytes(bytes: &[u8]) -> (String, u16) {
        let mut memory = Memory::new();
        memory.home_ram(6, 0, false);
        for i in 0..8 {
            let view = memory.home[i];
            if i >= 6 {
                memory.set_slot(i, view);
            }
        }
        for (i, &byte) in bytes.iter().enumerate() {
            memory.write(0xC000 + i as u16, byte);
        }
        disassemble(&memory, 0xC000)
    }

    #[test]
    fn test_simple_opcodes() {
        assert_eq!(disasm_bytes(&[0x00]), ("nop".into(), 1));
        assert_eq!(disasm_bytes(&[0x76]), ("halt".into(), 1));
        assert_eq!(disasm_bytes(&[0xC9]), ("ret".into(), 1));
        assert_eq!(disasm_bytes(&[0x47]), ("ld b,a".into(), 1));
    }

    #[test]
    fn test_immediates() {
        assert_eq!(disasm_bytes(&[0x3E, 0x42]), ("ld a,0x42".into(), 2));
        assert_eq!(
            disasm_bytes(&[0x21, 0x34, 0x12]),
            ("ld hl,0x1234".into(), 3)
        );
        assert_eq!(
            disasm_bytes(&[0xCD, 0x00, 0x80]),
            ("call 0x8000".into(), 3)
        );
    }

    #[test]
    fn test_relative_jump_target() {
        // jr to self is -2 from the following instruction
        assert_eq!(disasm_bytes(&[0x18, 0xFE]), ("jr 0xc000".into(), 2));
        assert_eq!(
            disasm_bytes(&[0x20, 0x02]),
            ("jr nz,0xc004".into(), 2)
        );
    }

    #[test]
    fn test_cb_prefix() {
        assert_eq!(disasm_bytes(&[0xCB, 0x00]), ("rlc b".into(), 2));
        assert_eq!(disasm_bytes(&[0xCB, 0x46]), ("bit 0,(hl)".into(), 2));
        assert_eq!(disasm_bytes(&[0xCB, 0xFF]), ("set 7,a".into(), 2));
    }

    #[test]
    fn test_ed_prefix() {
        assert_eq!(disasm_bytes(&[0xED, 0xB0]), ("ldir".into(), 2));
        assert_eq!(disasm_bytes(&[0xED, 0x47]), ("ld i,a".into(), 2));
        assert_eq!(
            disasm_bytes(&[0xED, 0x43, 0x00, 0x60]),
            ("ld (0x6000),bc".into(), 4)
        );
    }

    #[test]
    fn test_index_prefix() {
        assert_eq!(
            disasm_bytes(&[0xDD, 0x21, 0x00, 0x40]),
            ("ld ix,0x4000".into(), 4)
        );
        assert_eq!(
            disasm_bytes(&[0xDD, 0x34, 0x05]),
            ("inc (ix+0x05)".into(), 3)
        );
        assert_eq!(
            disasm_bytes(&[0xFD, 0x7E, 0xFF]),
            ("ld a,(iy-0x01)".into(), 3)
        );
    }

    #[test]
    fn test_ddcb_form() {
        // dd cb d op: four bytes, result copied into the named register
        assert_eq!(
            disasm_bytes(&[0xDD, 0xCB, 0x03, 0x06]),
            ("rlc (ix+0x03)".into(), 4)
        );
        assert_eq!(
            disasm_bytes(&[0xDD, 0xCB, 0x03, 0x00]),
            ("rlc (ix+0x03),b".into(), 4)
        );
        assert_eq!(
            disasm_bytes(&[0xFD, 0xCB, 0x10, 0x4E]),
            ("bit 1,(iy+0x10)".into(), 4)
        );
    }

    #[test]
    fn test_double_prefix_collapses() {
        // The inner prefix wins; the outer costs one byte
        assert_eq!(
            disasm_bytes(&[0xDD, 0xFD, 0x21, 0x00, 0x40]),
            ("ld iy,0x4000".into(), 5)
        );
    }

    #[test]
    fn test_length_for_step_over() {
        let mut memory = Memory::new();
        memory.home_ram(6, 0, false);
        let view = memory.home[6];
        memory.set_slot(6, view);
        let view = memory.home[7];
        memory.set_slot(7, view);
        memory.write(0xC000, 0xCD); // call nn
        assert_eq!(instruction_length(&memory, 0xC000), 3);
    }
}
