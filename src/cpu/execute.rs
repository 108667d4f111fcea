//! Z80 instruction execution
//!
//! - `execute_x0` / `execute_x3`: the unprefixed opcode quadrants around
//!   the loads (x=1) and ALU block (x=2) handled inline by `step`
//! - `execute_cb`: rotates, shifts and bit operations
//! - `execute_ed`: the extended set including the block instructions
//! - `execute_index`: DD/FD prefix resolution; an opcode that does not
//!   reference HL leaves the prefix a 4-tstate NOP and is decoded fresh
//! - `execute_index_cb`: the DDCB/FDCB three-byte form, including the
//!   undocumented copy of the result into the named register
//!
//! Internal machine cycles are charged against the address the chip
//! keeps on the bus while they run (IR for many, the operand pointer for
//! displacement arithmetic), so contention lands where the ULA sees it.

use super::flags::{self, SZ53, SZ53P};
use super::{Cpu, InterruptMode};
use crate::bus::Bus;

/// Extra internal tstates charged one at a time so each can be contended
fn contend_no_mreq(bus: &mut Bus, addr: u16, times: u32) {
    for _ in 0..times {
        bus.contend(addr, 1);
    }
}

impl Cpu {
    // ========== Register selection ==========

    /// 8-bit register by field (0=B 1=C 2=D 3=E 4=H 5=L 6=(HL) 7=A)
    pub(super) fn get_reg8(&mut self, bus: &mut Bus, idx: u8) -> u8 {
        match idx {
            0 => self.b(),
            1 => self.c(),
            2 => self.d(),
            3 => self.e(),
            4 => self.h(),
            5 => self.l(),
            6 => bus.read_byte(self.hl),
            _ => self.a,
        }
    }

    pub(super) fn set_reg8(&mut self, bus: &mut Bus, idx: u8, value: u8) {
        match idx {
            0 => self.set_b(value),
            1 => self.set_c(value),
            2 => self.set_d(value),
            3 => self.set_e(value),
            4 => self.set_h(value),
            5 => self.set_l(value),
            6 => bus.write_byte(self.hl, value),
            _ => self.a = value,
        }
    }

    /// Register pair by field (0=BC 1=DE 2=HL 3=SP)
    pub(super) fn get_rp(&self, idx: u8) -> u16 {
        match idx {
            0 => self.bc,
            1 => self.de,
            2 => self.hl,
            _ => self.sp,
        }
    }

    pub(super) fn set_rp(&mut self, idx: u8, value: u16) {
        match idx {
            0 => self.bc = value,
            1 => self.de = value,
            2 => self.hl = value,
            _ => self.sp = value,
        }
    }

    // ========== x=0 quadrant ==========

    pub(super) fn execute_x0(&mut self, bus: &mut Bus, y: u8, z: u8) {
        match z {
            0 => match y {
                0 => {} // NOP
                1 => self.ex_af(),
                2 => {
                    // DJNZ d
                    contend_no_mreq(bus, self.ir(), 1);
                    let d = self.fetch_byte(bus) as i8;
                    self.set_b(self.b().wrapping_sub(1));
                    if self.b() != 0 {
                        contend_no_mreq(bus, self.pc.wrapping_sub(1), 5);
                        self.pc = self.pc.wrapping_add(d as u16);
                        self.memptr = self.pc;
                    }
                }
                3 => {
                    // JR d
                    let d = self.fetch_byte(bus) as i8;
                    contend_no_mreq(bus, self.pc.wrapping_sub(1), 5);
                    self.pc = self.pc.wrapping_add(d as u16);
                    self.memptr = self.pc;
                }
                _ => {
                    // JR cc,d
                    let d = self.fetch_byte(bus) as i8;
                    if self.check_cc(y - 4) {
                        contend_no_mreq(bus, self.pc.wrapping_sub(1), 5);
                        self.pc = self.pc.wrapping_add(d as u16);
                        self.memptr = self.pc;
                    }
                }
            },
            1 => {
                let p = y >> 1;
                if y & 1 == 0 {
                    // LD rp,nn
                    let nn = self.fetch_word(bus);
                    self.set_rp(p, nn);
                } else {
                    // ADD HL,rp
                    contend_no_mreq(bus, self.ir(), 7);
                    let value = self.get_rp(p);
                    self.hl = self.add16(self.hl, value);
                }
            }
            2 => match y {
                0 => {
                    // LD (BC),A
                    bus.write_byte(self.bc, self.a);
                    self.memptr =
                        (self.bc.wrapping_add(1) & 0x00FF) | ((self.a as u16) << 8);
                }
                1 => {
                    // LD A,(BC)
                    self.a = bus.read_byte(self.bc);
                    self.memptr = self.bc.wrapping_add(1);
                }
                2 => {
                    // LD (DE),A
                    bus.write_byte(self.de, self.a);
                    self.memptr =
                        (self.de.wrapping_add(1) & 0x00FF) | ((self.a as u16) << 8);
                }
                3 => {
                    // LD A,(DE)
                    self.a = bus.read_byte(self.de);
                    self.memptr = self.de.wrapping_add(1);
                }
                4 => {
                    // LD (nn),HL
                    let addr = self.fetch_word(bus);
                    bus.write_byte(addr, self.l());
                    bus.write_byte(addr.wrapping_add(1), self.h());
                    self.memptr = addr.wrapping_add(1);
                }
                5 => {
                    // LD HL,(nn)
                    let addr = self.fetch_word(bus);
                    let lo = bus.read_byte(addr) as u16;
                    let hi = bus.read_byte(addr.wrapping_add(1)) as u16;
                    self.hl = lo | (hi << 8);
                    self.memptr = addr.wrapping_add(1);
                }
                6 => {
                    // LD (nn),A
                    let addr = self.fetch_word(bus);
                    bus.write_byte(addr, self.a);
                    self.memptr =
                        (addr.wrapping_add(1) & 0x00FF) | ((self.a as u16) << 8);
                }
                _ => {
                    // LD A,(nn)
                    let addr = self.fetch_word(bus);
                    self.a = bus.read_byte(addr);
                    self.memptr = addr.wrapping_add(1);
                }
            },
            3 => {
                // INC/DEC rp
                contend_no_mreq(bus, self.ir(), 2);
                let p = y >> 1;
                let value = self.get_rp(p);
                if y & 1 == 0 {
                    self.set_rp(p, value.wrapping_add(1));
                } else {
                    self.set_rp(p, value.wrapping_sub(1));
                }
            }
            4 => {
                // INC r
                if y == 6 {
                    let value = bus.read_byte(self.hl);
                    contend_no_mreq(bus, self.hl, 1);
                    let result = self.alu_inc(value);
                    bus.write_byte(self.hl, result);
                } else {
                    let value = self.get_reg8(bus, y);
                    let result = self.alu_inc(value);
                    self.set_reg8(bus, y, result);
                }
            }
            5 => {
                // DEC r
                if y == 6 {
                    let value = bus.read_byte(self.hl);
                    contend_no_mreq(bus, self.hl, 1);
                    let result = self.alu_dec(value);
                    bus.write_byte(self.hl, result);
                } else {
                    let value = self.get_reg8(bus, y);
                    let result = self.alu_dec(value);
                    self.set_reg8(bus, y, result);
                }
            }
            6 => {
                // LD r,n
                let value = self.fetch_byte(bus);
                self.set_reg8(bus, y, value);
            }
            _ => match y {
                0 => {
                    // RLCA
                    self.a = self.a.rotate_left(1);
                    self.f = (self.f & (flags::PV | flags::Z | flags::S))
                        | (self.a & (flags::C | flags::F3 | flags::F5));
                }
                1 => {
                    // RRCA
                    self.f = (self.f & (flags::PV | flags::Z | flags::S)) | (self.a & flags::C);
                    self.a = self.a.rotate_right(1);
                    self.f |= self.a & (flags::F3 | flags::F5);
                }
                2 => {
                    // RLA
                    let old = self.a;
                    self.a = (self.a << 1) | (self.f & flags::C);
                    self.f = (self.f & (flags::PV | flags::Z | flags::S))
                        | (self.a & (flags::F3 | flags::F5))
                        | (old >> 7);
                }
                3 => {
                    // RRA
                    let old = self.a;
                    self.a = (self.a >> 1) | (self.f << 7);
                    self.f = (self.f & (flags::PV | flags::Z | flags::S))
                        | (self.a & (flags::F3 | flags::F5))
                        | (old & flags::C);
                }
                4 => {
                    // DAA
                    let mut add = 0u8;
                    let mut carry = self.f & flags::C;
                    if self.f & flags::H != 0 || self.a & 0x0F > 9 {
                        add = 6;
                    }
                    if carry != 0 || self.a > 0x99 {
                        add |= 0x60;
                    }
                    if self.a > 0x99 {
                        carry = flags::C;
                    }
                    if self.f & flags::N != 0 {
                        self.alu_sub(add, false);
                    } else {
                        self.alu_add(add, false);
                    }
                    self.f = (self.f & !(flags::C | flags::PV))
                        | carry
                        | Self::parity_flag(self.a);
                }
                5 => {
                    // CPL
                    self.a = !self.a;
                    self.f = (self.f & (flags::C | flags::PV | flags::Z | flags::S))
                        | (self.a & (flags::F3 | flags::F5))
                        | flags::N
                        | flags::H;
                }
                6 => {
                    // SCF
                    self.f = (self.f & (flags::PV | flags::Z | flags::S))
                        | (self.a & (flags::F3 | flags::F5))
                        | flags::C;
                }
                _ => {
                    // CCF
                    self.f = (self.f & (flags::PV | flags::Z | flags::S))
                        | if self.f & flags::C != 0 {
                            flags::H
                        } else {
                            flags::C
                        }
                        | (self.a & (flags::F3 | flags::F5));
                }
            },
        }
    }

    /// ALU operation by field (x=2 and the immediate forms)
    pub(super) fn execute_alu(&mut self, y: u8, value: u8) {
        match y {
            0 => self.alu_add(value, false),
            1 => self.alu_add(value, true),
            2 => self.alu_sub(value, false),
            3 => self.alu_sub(value, true),
            4 => self.alu_and(value),
            5 => self.alu_xor(value),
            6 => self.alu_or(value),
            _ => self.alu_cp(value),
        }
    }

    // ========== x=3 quadrant ==========

    pub(super) fn execute_x3(&mut self, bus: &mut Bus, y: u8, z: u8) {
        match z {
            0 => {
                // RET cc
                contend_no_mreq(bus, self.ir(), 1);
                if self.check_cc(y) {
                    self.pc = self.pop_word(bus);
                    self.memptr = self.pc;
                }
            }
            1 => {
                let p = y >> 1;
                if y & 1 == 0 {
                    // POP rp2
                    let value = self.pop_word(bus);
                    if p == 3 {
                        self.set_af(value);
                    } else {
                        self.set_rp(p, value);
                    }
                } else {
                    match p {
                        0 => {
                            // RET
                            self.pc = self.pop_word(bus);
                            self.memptr = self.pc;
                        }
                        1 => self.exx(),
                        2 => self.pc = self.hl, // JP (HL)
                        _ => {
                            // LD SP,HL
                            contend_no_mreq(bus, self.ir(), 2);
                            self.sp = self.hl;
                        }
                    }
                }
            }
            2 => {
                // JP cc,nn
                let addr = self.fetch_word(bus);
                self.memptr = addr;
                if self.check_cc(y) {
                    self.pc = addr;
                }
            }
            3 => match y {
                0 => {
                    // JP nn
                    self.pc = self.fetch_word(bus);
                    self.memptr = self.pc;
                }
                1 => unreachable!("CB prefix dispatched before the quadrants"),
                2 => {
                    // OUT (n),A
                    let n = self.fetch_byte(bus);
                    let port = ((self.a as u16) << 8) | n as u16;
                    self.memptr =
                        ((self.a as u16) << 8) | (n.wrapping_add(1) as u16);
                    bus.write_port(port, self.a);
                }
                3 => {
                    // IN A,(n)
                    let n = self.fetch_byte(bus);
                    let port = ((self.a as u16) << 8) | n as u16;
                    self.memptr = port.wrapping_add(1);
                    self.a = bus.read_port(port);
                }
                4 => {
                    // EX (SP),HL
                    let lo = bus.read_byte(self.sp);
                    let hi = bus.read_byte(self.sp.wrapping_add(1));
                    contend_no_mreq(bus, self.sp.wrapping_add(1), 1);
                    bus.write_byte(self.sp.wrapping_add(1), self.h());
                    bus.write_byte(self.sp, self.l());
                    contend_no_mreq(bus, self.sp, 2);
                    self.hl = lo as u16 | ((hi as u16) << 8);
                    self.memptr = self.hl;
                }
                5 => self.ex_de_hl(),
                6 => {
                    // DI
                    self.iff1 = false;
                    self.iff2 = false;
                }
                _ => self.enable_interrupts(), // EI
            },
            4 => {
                // CALL cc,nn
                let addr = self.fetch_word(bus);
                self.memptr = addr;
                if self.check_cc(y) {
                    contend_no_mreq(bus, self.pc.wrapping_sub(1), 1);
                    let pc = self.pc;
                    self.push_word(bus, pc);
                    self.pc = addr;
                }
            }
            5 => {
                let p = y >> 1;
                if y & 1 == 0 {
                    // PUSH rp2
                    contend_no_mreq(bus, self.ir(), 1);
                    let value = if p == 3 { self.af() } else { self.get_rp(p) };
                    self.push_word(bus, value);
                } else {
                    // CALL nn (p=0; other p values are prefixes)
                    let addr = self.fetch_word(bus);
                    self.memptr = addr;
                    contend_no_mreq(bus, self.pc.wrapping_sub(1), 1);
                    let pc = self.pc;
                    self.push_word(bus, pc);
                    self.pc = addr;
                }
            }
            6 => {
                // ALU n
                let value = self.fetch_byte(bus);
                self.execute_alu(y, value);
            }
            _ => {
                // RST y*8
                contend_no_mreq(bus, self.ir(), 1);
                let pc = self.pc;
                self.push_word(bus, pc);
                self.pc = (y as u16) * 8;
                self.memptr = self.pc;
            }
        }
    }

    // ========== CB prefix ==========

    pub(super) fn execute_cb(&mut self, bus: &mut Bus) {
        let opcode = bus.fetch_opcode(self.pc);
        self.pc = self.pc.wrapping_add(1);
        self.inc_r();

        let x = opcode >> 6;
        let y = (opcode >> 3) & 0x07;
        let z = opcode & 0x07;

        match x {
            0 => {
                // Rotates and shifts
                if z == 6 {
                    let value = bus.read_byte(self.hl);
                    contend_no_mreq(bus, self.hl, 1);
                    let result = self.rotate_shift(y, value);
                    bus.write_byte(self.hl, result);
                } else {
                    let value = self.get_reg8(bus, z);
                    let result = self.rotate_shift(y, value);
                    self.set_reg8(bus, z, result);
                }
            }
            1 => {
                // BIT y,r
                if z == 6 {
                    let value = bus.read_byte(self.hl);
                    contend_no_mreq(bus, self.hl, 1);
                    self.bit_memptr(y, value);
                } else {
                    let value = self.get_reg8(bus, z);
                    self.bit(y, value);
                }
            }
            2 => {
                // RES y,r
                if z == 6 {
                    let value = bus.read_byte(self.hl);
                    contend_no_mreq(bus, self.hl, 1);
                    bus.write_byte(self.hl, value & !(1 << y));
                } else {
                    let value = self.get_reg8(bus, z);
                    self.set_reg8(bus, z, value & !(1 << y));
                }
            }
            _ => {
                // SET y,r
                if z == 6 {
                    let value = bus.read_byte(self.hl);
                    contend_no_mreq(bus, self.hl, 1);
                    bus.write_byte(self.hl, value | (1 << y));
                } else {
                    let value = self.get_reg8(bus, z);
                    self.set_reg8(bus, z, value | (1 << y));
                }
            }
        }
    }

    // ========== ED prefix ==========

    pub(super) fn execute_ed(&mut self, bus: &mut Bus) {
        let opcode = bus.fetch_opcode(self.pc);
        self.pc = self.pc.wrapping_add(1);
        self.inc_r();

        let x = opcode >> 6;
        let y = (opcode >> 3) & 0x07;
        let z = opcode & 0x07;

        match x {
            1 => match z {
                0 => {
                    // IN r,(C) / IN (C)
                    self.memptr = self.bc.wrapping_add(1);
                    let value = bus.read_port(self.bc);
                    self.in_flags(value);
                    if y != 6 {
                        self.set_reg8(bus, y, value);
                    }
                }
                1 => {
                    // OUT (C),r / OUT (C),0
                    let value = if y == 6 { 0 } else { self.get_reg8(bus, y) };
                    self.memptr = self.bc.wrapping_add(1);
                    bus.write_port(self.bc, value);
                }
                2 => {
                    // SBC/ADC HL,rp
                    contend_no_mreq(bus, self.ir(), 7);
                    let value = self.get_rp(y >> 1);
                    if y & 1 == 0 {
                        self.sbc16(value);
                    } else {
                        self.adc16(value);
                    }
                }
                3 => {
                    // LD (nn),rp / LD rp,(nn)
                    let addr = self.fetch_word(bus);
                    let p = y >> 1;
                    if y & 1 == 0 {
                        let value = self.get_rp(p);
                        bus.write_byte(addr, value as u8);
                        bus.write_byte(addr.wrapping_add(1), (value >> 8) as u8);
                    } else {
                        let lo = bus.read_byte(addr) as u16;
                        let hi = bus.read_byte(addr.wrapping_add(1)) as u16;
                        self.set_rp(p, lo | (hi << 8));
                    }
                    self.memptr = addr.wrapping_add(1);
                }
                4 => {
                    // NEG (all eight encodings)
                    let value = self.a;
                    self.a = 0;
                    self.alu_sub(value, false);
                }
                5 => {
                    // RETN/RETI: both restore IFF1 from IFF2
                    self.iff1 = self.iff2;
                    self.pc = self.pop_word(bus);
                    self.memptr = self.pc;
                }
                6 => {
                    self.im = match y & 3 {
                        0 | 1 => InterruptMode::Mode0,
                        2 => InterruptMode::Mode1,
                        _ => InterruptMode::Mode2,
                    };
                }
                _ => match y {
                    0 => {
                        // LD I,A
                        contend_no_mreq(bus, self.ir(), 1);
                        self.i = self.a;
                    }
                    1 => {
                        // LD R,A: the only way bit 7 of R gets set
                        contend_no_mreq(bus, self.ir(), 1);
                        self.r = self.a;
                    }
                    2 => {
                        // LD A,I
                        contend_no_mreq(bus, self.ir(), 1);
                        self.a = self.i;
                        self.f = (self.f & flags::C)
                            | SZ53[self.a as usize]
                            | if self.iff2 { flags::PV } else { 0 };
                    }
                    3 => {
                        // LD A,R
                        contend_no_mreq(bus, self.ir(), 1);
                        self.a = self.r;
                        self.f = (self.f & flags::C)
                            | SZ53[self.a as usize]
                            | if self.iff2 { flags::PV } else { 0 };
                    }
                    4 => {
                        // RRD
                        let value = bus.read_byte(self.hl);
                        contend_no_mreq(bus, self.hl, 4);
                        bus.write_byte(self.hl, (self.a << 4) | (value >> 4));
                        self.a = (self.a & 0xF0) | (value & 0x0F);
                        self.f = (self.f & flags::C) | SZ53P[self.a as usize];
                        self.memptr = self.hl.wrapping_add(1);
                    }
                    5 => {
                        // RLD
                        let value = bus.read_byte(self.hl);
                        contend_no_mreq(bus, self.hl, 4);
                        bus.write_byte(self.hl, (value << 4) | (self.a & 0x0F));
                        self.a = (self.a & 0xF0) | (value >> 4);
                        self.f = (self.f & flags::C) | SZ53P[self.a as usize];
                        self.memptr = self.hl.wrapping_add(1);
                    }
                    _ => {} // ED NOP
                },
            },
            2 if z <= 3 && y >= 4 => self.execute_block(bus, y, z),
            _ => {} // ED NOP
        }
    }

    // ========== Block instructions ==========

    fn execute_block(&mut self, bus: &mut Bus, y: u8, z: u8) {
        // y: 4=forward 5=backward 6=forward-repeat 7=backward-repeat
        let delta: u16 = if y & 1 == 0 { 1 } else { 0xFFFF };
        let repeat = y >= 6;

        match z {
            0 => {
                // LDI/LDD/LDIR/LDDR
                let value = bus.read_byte(self.hl);
                self.bc = self.bc.wrapping_sub(1);
                bus.write_byte(self.de, value);
                contend_no_mreq(bus, self.de, 2);

                let flag_byte = value.wrapping_add(self.a);
                self.f = (self.f & (flags::C | flags::Z | flags::S))
                    | if self.bc != 0 { flags::PV } else { 0 }
                    | (flag_byte & flags::F3)
                    | if flag_byte & 0x02 != 0 { flags::F5 } else { 0 };

                if repeat && self.bc != 0 {
                    contend_no_mreq(bus, self.de, 5);
                    self.pc = self.pc.wrapping_sub(2);
                    self.memptr = self.pc.wrapping_add(1);
                }
                self.hl = self.hl.wrapping_add(delta);
                self.de = self.de.wrapping_add(delta);
            }
            1 => {
                // CPI/CPD/CPIR/CPDR
                let value = bus.read_byte(self.hl);
                let mut result = self.a.wrapping_sub(value);
                let lookup =
                    ((self.a & 0x08) >> 3) | ((value & 0x08) >> 2) | ((result & 0x08) >> 1);
                contend_no_mreq(bus, self.hl, 5);

                self.bc = self.bc.wrapping_sub(1);
                self.f = (self.f & flags::C)
                    | if self.bc != 0 {
                        flags::PV | flags::N
                    } else {
                        flags::N
                    }
                    | flags::HALFCARRY_SUB[(lookup & 0x07) as usize]
                    | if result == 0 { flags::Z } else { 0 }
                    | (result & flags::S);
                if self.f & flags::H != 0 {
                    result = result.wrapping_sub(1);
                }
                self.f |= (result & flags::F3)
                    | if result & 0x02 != 0 { flags::F5 } else { 0 };

                if repeat && self.f & (flags::PV | flags::Z) == flags::PV {
                    contend_no_mreq(bus, self.hl, 5);
                    self.pc = self.pc.wrapping_sub(2);
                    self.memptr = self.pc.wrapping_add(1);
                } else {
                    self.memptr = self.memptr.wrapping_add(delta);
                }
                self.hl = self.hl.wrapping_add(delta);
            }
            2 => {
                // INI/IND/INIR/INDR
                contend_no_mreq(bus, self.ir(), 1);
                self.memptr = self.bc.wrapping_add(delta);
                let value = bus.read_port(self.bc);
                bus.write_byte(self.hl, value);

                self.set_b(self.b().wrapping_sub(1));
                let flag_byte = value
                    .wrapping_add(self.c().wrapping_add(if y & 1 == 0 { 1 } else { 0xFF }));
                self.f = if value & 0x80 != 0 { flags::N } else { 0 }
                    | if flag_byte < value {
                        flags::H | flags::C
                    } else {
                        0
                    }
                    | if Self::parity_flag((flag_byte & 0x07) ^ self.b()) != 0 {
                        flags::PV
                    } else {
                        0
                    }
                    | SZ53[self.b() as usize];

                if repeat && self.b() != 0 {
                    contend_no_mreq(bus, self.hl, 5);
                    self.pc = self.pc.wrapping_sub(2);
                }
                self.hl = self.hl.wrapping_add(delta);
            }
            _ => {
                // OUTI/OUTD/OTIR/OTDR
                contend_no_mreq(bus, self.ir(), 1);
                let value = bus.read_byte(self.hl);
                // B decrements before it appears on the port address
                self.set_b(self.b().wrapping_sub(1));
                self.memptr = self.bc.wrapping_add(delta);
                bus.write_port(self.bc, value);

                self.hl = self.hl.wrapping_add(delta);
                let flag_byte = value.wrapping_add(self.l());
                self.f = if value & 0x80 != 0 { flags::N } else { 0 }
                    | if flag_byte < value {
                        flags::H | flags::C
                    } else {
                        0
                    }
                    | if Self::parity_flag((flag_byte & 0x07) ^ self.b()) != 0 {
                        flags::PV
                    } else {
                        0
                    }
                    | SZ53[self.b() as usize];

                if repeat && self.b() != 0 {
                    contend_no_mreq(bus, self.bc, 5);
                    self.pc = self.pc.wrapping_sub(2);
                }
            }
        }
    }

    // ========== DD/FD prefixes ==========

    /// Opcodes the DD/FD prefixes redirect: everything referencing HL,
    /// H, L or (HL), except HALT and EX DE,HL
    fn prefix_applies(opcode: u8) -> bool {
        match opcode {
            0x09 | 0x19 | 0x29 | 0x39 => true,
            0x21..=0x26 | 0x2A..=0x2E => true,
            0x34..=0x36 => true,
            0x76 => false,
            0x40..=0x7F => {
                let y = (opcode >> 3) & 0x07;
                let z = opcode & 0x07;
                (4..=6).contains(&y) || (4..=6).contains(&z)
            }
            0x80..=0xBF => (4..=6).contains(&(opcode & 0x07)),
            0xCB => true,
            0xE1 | 0xE3 | 0xE5 | 0xE9 | 0xF9 => true,
            _ => false,
        }
    }

    pub(super) fn execute_index(&mut self, bus: &mut Bus, use_iy: bool) {
        // Peek: a following opcode that never touches HL leaves this
        // prefix a plain 4-tstate NOP, decoded fresh next time around.
        // Chained prefixes therefore collapse to the innermost one.
        let opcode = bus.read_internal(self.pc);
        if !Self::prefix_applies(opcode) {
            return;
        }

        bus.contend(self.pc, 4);
        self.pc = self.pc.wrapping_add(1);
        self.inc_r();

        if opcode == 0xCB {
            self.execute_index_cb(bus, use_iy);
            return;
        }

        let index = if use_iy { self.iy } else { self.ix };
        let x = opcode >> 6;
        let y = (opcode >> 3) & 0x07;
        let z = opcode & 0x07;

        // Effective address for the (IX+d) forms; the five internal
        // tstates of the displacement add run against the operand byte
        let indexed_addr = |cpu: &mut Cpu, bus: &mut Bus| -> u16 {
            let d = cpu.fetch_byte(bus) as i8;
            contend_no_mreq(bus, cpu.pc.wrapping_sub(1), 5);
            let addr = index.wrapping_add(d as u16);
            cpu.memptr = addr;
            addr
        };

        match (x, z) {
            // ADD IX,rp (rp=2 is IX itself)
            (0, 1) if y & 1 == 1 => {
                contend_no_mreq(bus, self.ir(), 7);
                let p = y >> 1;
                let value = if p == 2 { index } else { self.get_rp(p) };
                let result = self.add16(index, value);
                self.set_index(use_iy, result);
            }
            (0, 1) => {
                // LD IX,nn
                let nn = self.fetch_word(bus);
                self.set_index(use_iy, nn);
            }
            (0, 2) => match y {
                4 => {
                    // LD (nn),IX
                    let addr = self.fetch_word(bus);
                    bus.write_byte(addr, index as u8);
                    bus.write_byte(addr.wrapping_add(1), (index >> 8) as u8);
                    self.memptr = addr.wrapping_add(1);
                }
                _ => {
                    // LD IX,(nn)
                    let addr = self.fetch_word(bus);
                    let lo = bus.read_byte(addr) as u16;
                    let hi = bus.read_byte(addr.wrapping_add(1)) as u16;
                    self.set_index(use_iy, lo | (hi << 8));
                    self.memptr = addr.wrapping_add(1);
                }
            },
            (0, 3) => {
                // INC/DEC IX
                contend_no_mreq(bus, self.ir(), 2);
                if y & 1 == 0 {
                    self.set_index(use_iy, index.wrapping_add(1));
                } else {
                    self.set_index(use_iy, index.wrapping_sub(1));
                }
            }
            (0, 4) | (0, 5) => {
                // INC/DEC IXH/IXL/(IX+d)
                let inc = z == 4;
                if y == 6 {
                    let addr = indexed_addr(self, bus);
                    let value = bus.read_byte(addr);
                    contend_no_mreq(bus, addr, 1);
                    let result = if inc {
                        self.alu_inc(value)
                    } else {
                        self.alu_dec(value)
                    };
                    bus.write_byte(addr, result);
                } else {
                    let value = self.get_index_reg8(use_iy, y);
                    let result = if inc {
                        self.alu_inc(value)
                    } else {
                        self.alu_dec(value)
                    };
                    self.set_index_reg8(use_iy, y, result);
                }
            }
            (0, 6) => {
                // LD r,n with IXH/IXL/(IX+d)
                if y == 6 {
                    // LD (IX+d),n: displacement then immediate, two
                    // internal tstates on the immediate pointer
                    let d = self.fetch_byte(bus) as i8;
                    let value = self.fetch_byte(bus);
                    contend_no_mreq(bus, self.pc.wrapping_sub(1), 2);
                    let addr = index.wrapping_add(d as u16);
                    self.memptr = addr;
                    bus.write_byte(addr, value);
                } else {
                    let value = self.fetch_byte(bus);
                    self.set_index_reg8(use_iy, y, value);
                }
            }
            (1, _) => {
                // LD r,r' with index substitution; the memory forms keep
                // the register operand un-renamed
                if y == 6 {
                    let addr = indexed_addr(self, bus);
                    let value = self.get_reg8(bus, z);
                    bus.write_byte(addr, value);
                } else if z == 6 {
                    let addr = indexed_addr(self, bus);
                    let value = bus.read_byte(addr);
                    self.set_reg8(bus, y, value);
                } else {
                    let value = self.get_index_reg8(use_iy, z);
                    self.set_index_reg8(use_iy, y, value);
                }
            }
            (2, _) => {
                // ALU with IXH/IXL/(IX+d)
                let value = if z == 6 {
                    let addr = indexed_addr(self, bus);
                    bus.read_byte(addr)
                } else {
                    self.get_index_reg8(use_iy, z)
                };
                self.execute_alu(y, value);
            }
            (3, 1) if opcode == 0xE1 => {
                // POP IX
                let value = self.pop_word(bus);
                self.set_index(use_iy, value);
            }
            (3, 1) if opcode == 0xE9 => self.pc = index, // JP (IX)
            (3, 1) => {
                // LD SP,IX (0xF9)
                contend_no_mreq(bus, self.ir(), 2);
                self.sp = index;
            }
            (3, 3) => {
                // EX (SP),IX (0xE3)
                let lo = bus.read_byte(self.sp);
                let hi = bus.read_byte(self.sp.wrapping_add(1));
                contend_no_mreq(bus, self.sp.wrapping_add(1), 1);
                bus.write_byte(self.sp.wrapping_add(1), (index >> 8) as u8);
                bus.write_byte(self.sp, index as u8);
                contend_no_mreq(bus, self.sp, 2);
                let swapped = lo as u16 | ((hi as u16) << 8);
                self.set_index(use_iy, swapped);
                self.memptr = swapped;
            }
            (3, 5) => {
                // PUSH IX (0xE5)
                contend_no_mreq(bus, self.ir(), 1);
                self.push_word(bus, index);
            }
            _ => unreachable!("prefix_applies admitted an unhandled opcode"),
        }
    }

    fn set_index(&mut self, use_iy: bool, value: u16) {
        if use_iy {
            self.iy = value;
        } else {
            self.ix = value;
        }
    }

    /// 8-bit register with H/L renamed to the index halves
    fn get_index_reg8(&self, use_iy: bool, idx: u8) -> u8 {
        let index = if use_iy { self.iy } else { self.ix };
        match idx {
            0 => self.b(),
            1 => self.c(),
            2 => self.d(),
            3 => self.e(),
            4 => (index >> 8) as u8,
            5 => index as u8,
            _ => self.a,
        }
    }

    fn set_index_reg8(&mut self, use_iy: bool, idx: u8, value: u8) {
        match idx {
            0 => self.set_b(value),
            1 => self.set_c(value),
            2 => self.set_d(value),
            3 => self.set_e(value),
            4 => {
                if use_iy {
                    self.iy = (self.iy & 0x00FF) | ((value as u16) << 8);
                } else {
                    self.ix = (self.ix & 0x00FF) | ((value as u16) << 8);
                }
            }
            5 => {
                if use_iy {
                    self.iy = (self.iy & 0xFF00) | value as u16;
                } else {
                    self.ix = (self.ix & 0xFF00) | value as u16;
                }
            }
            _ => self.a = value,
        }
    }

    // ========== DDCB/FDCB ==========

    /// `DD CB d op`: the displacement comes before the operation byte,
    /// and the operation byte is a plain read, not an M1 cycle
    fn execute_index_cb(&mut self, bus: &mut Bus, use_iy: bool) {
        let index = if use_iy { self.iy } else { self.ix };

        let d = self.fetch_byte(bus) as i8;
        bus.contend(self.pc, 3);
        let opcode = bus.read_internal(self.pc);
        contend_no_mreq(bus, self.pc, 2);
        self.pc = self.pc.wrapping_add(1);

        let addr = index.wrapping_add(d as u16);
        self.memptr = addr;

        let x = opcode >> 6;
        let y = (opcode >> 3) & 0x07;
        let z = opcode & 0x07;

        let value = bus.read_byte(addr);
        contend_no_mreq(bus, addr, 1);

        match x {
            0 => {
                let result = self.rotate_shift(y, value);
                bus.write_byte(addr, result);
                if z != 6 {
                    // Result also lands in the named register
                    self.set_reg8(bus, z, result);
                }
            }
            1 => self.bit_memptr(y, value),
            2 => {
                let result = value & !(1 << y);
                bus.write_byte(addr, result);
                if z != 6 {
                    self.set_reg8(bus, z, result);
                }
            }
            _ => {
                let result = value | (1 << y);
                bus.write_byte(addr, result);
                if z != 6 {
                    self.set_reg8(bus, z, result);
                }
            }
        }
    }
}
