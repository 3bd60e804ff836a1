use crate::bus::{Bus, BusError};
use crate::csr::{Csr, CsrOp, Mode};
use crate::decoder::{
    decode, expand_compressed, Op, Register, EBREAK, ECALL, MRET, SFENCE_VMA, SRET, WFI,
};
use crate::mmu::{self, MmuFault, PTE_R, PTE_W, PTE_X};
use crate::Trap;

/// ABI register names for trace output.
const REG_NAMES: [&str; 32] = [
    "zero", "ra", "sp", "gp", "tp", "t0", "t1", "t2", "s0", "s1", "a0", "a1", "a2", "a3", "a4",
    "a5", "a6", "a7", "s2", "s3", "s4", "s5", "s6", "s7", "s8", "s9", "s10", "s11", "t3", "t4",
    "t5", "t6",
];

pub struct Cpu {
    pub regs: [u32; 32],
    pub pc: u32,
    pub csr: Csr,
    /// Single-hart LR/SC reservation. Cleared by a successful SC and,
    /// conservatively, by every trap entry.
    load_reserved: bool,
    /// Deterministic per-instruction trace output on stdout.
    pub trace: bool,
}

impl Cpu {
    pub fn new(reset_vector: u32) -> Self {
        Self {
            regs: [0; 32],
            pc: reset_vector,
            csr: Csr::new(),
            load_reserved: false,
            trace: false,
        }
    }

    pub fn read_reg(&self, reg: Register) -> u32 {
        if reg == Register::X0 {
            0
        } else {
            self.regs[reg.to_usize()]
        }
    }

    pub fn write_reg(&mut self, reg: Register, val: u32) {
        if reg != Register::X0 {
            self.regs[reg.to_usize()] = val;
        }
    }

    /// Fetch translation uses the true privilege and X permission.
    fn vmap_fetch(&self, bus: &mut dyn Bus, vaddr: u32) -> Result<u32, Trap> {
        if !self.csr.translation_enabled_fetch() {
            return Ok(vaddr);
        }
        mmu::translate(bus, &self.csr, vaddr, PTE_X).map_err(|fault| match fault {
            MmuFault::PageFault => Trap::InstructionPageFault(vaddr),
            MmuFault::AccessFault => Trap::StoreAccessFault(vaddr),
        })
    }

    /// Load/store translation with the MPRV-adjusted privilege.
    /// `page_fault` selects the load- or store-flavoured fault for the
    /// requesting instruction.
    fn vmap_ls(
        &self,
        bus: &mut dyn Bus,
        vaddr: u32,
        required: u32,
        page_fault: fn(u32) -> Trap,
    ) -> Result<u32, Trap> {
        if !self.csr.translation_enabled_ls() {
            return Ok(vaddr);
        }
        mmu::translate(bus, &self.csr, vaddr, required).map_err(|fault| match fault {
            MmuFault::PageFault => page_fault(vaddr),
            MmuFault::AccessFault => Trap::StoreAccessFault(vaddr),
        })
    }

    fn store_trap(err: BusError, vaddr: u32) -> Trap {
        match err {
            BusError::Fault => Trap::StoreAccessFault(vaddr),
            BusError::Exit(code) => Trap::Exit(code),
        }
    }

    /// Fetch one instruction at `pc`. Returns the (possibly expanded)
    /// 32-bit encoding, the raw fetched bits for syndrome reporting, and
    /// the instruction length in bytes.
    fn fetch(&self, bus: &mut dyn Bus, pc: u32) -> Result<(u32, u32, u32), Trap> {
        let pa0 = self.vmap_fetch(bus, pc)?;
        let lo = u32::from(
            bus.read16(pa0)
                .ok_or(Trap::InstructionAccessFault(pc))?,
        );
        if lo & 0x3 == 0x3 {
            // 32-bit instruction: the second halfword is fetched through
            // its own translation so a fault mid-instruction reports pc+2.
            let pc_hi = pc.wrapping_add(2);
            let pa1 = self.vmap_fetch(bus, pc_hi)?;
            let hi = u32::from(
                bus.read16(pa1)
                    .ok_or(Trap::InstructionAccessFault(pc_hi))?,
            );
            let instr = lo | hi << 16;
            Ok((instr, instr, 4))
        } else {
            Ok((expand_compressed(lo as u16)?, lo, 2))
        }
    }

    /// Execute one instruction. Returns `Ok` only after all architectural
    /// effects (rd, memory, CSRs, PC, IRQ redirect) have been committed;
    /// any `Err` leaves rd and PC untouched so the trap entry in `step`
    /// observes pre-instruction state.
    fn exec(&mut self, bus: &mut dyn Bus, pc: u32) -> Result<(), Trap> {
        let (instr, raw, len) = self.fetch(bus, pc)?;
        let op = decode(instr).map_err(|_| Trap::IllegalInstruction(raw))?;
        let illegal = || Trap::IllegalInstruction(raw);

        let mut rd_write: Option<(Register, u32)> = None;
        let mut pc_wdata: Option<u32> = None;
        let mut csr_trace: Option<(u16, u32)> = None;

        match op {
            Op::Lui { rd, imm } => {
                rd_write = Some((rd, imm));
            }
            Op::Auipc { rd, imm } => {
                rd_write = Some((rd, pc.wrapping_add(imm)));
            }
            Op::Jal { rd, imm } => {
                rd_write = Some((rd, pc.wrapping_add(len)));
                pc_wdata = Some(pc.wrapping_add(imm));
            }
            Op::Jalr { rd, rs1, imm } => {
                let target = self.read_reg(rs1).wrapping_add(imm) & !1;
                rd_write = Some((rd, pc.wrapping_add(len)));
                pc_wdata = Some(target);
            }
            Op::Branch {
                rs1,
                rs2,
                imm,
                funct3,
            } => {
                let a = self.read_reg(rs1);
                let b = self.read_reg(rs2);
                let taken = match funct3 {
                    0b000 => a == b,
                    0b001 => a != b,
                    0b100 => (a as i32) < (b as i32),
                    0b101 => (a as i32) >= (b as i32),
                    0b110 => a < b,
                    0b111 => a >= b,
                    _ => return Err(illegal()),
                };
                if taken {
                    pc_wdata = Some(pc.wrapping_add(imm));
                }
            }
            Op::Load {
                rd,
                rs1,
                imm,
                funct3,
            } => {
                if !matches!(funct3, 0b000 | 0b001 | 0b010 | 0b100 | 0b101) {
                    return Err(illegal());
                }
                let addr = self.read_reg(rs1).wrapping_add(imm);
                let align_mask = (1u32 << (funct3 & 0x3)) - 1;
                if addr & align_mask != 0 {
                    return Err(Trap::LoadAddressMisaligned(addr));
                }
                let pa = self.vmap_ls(bus, addr, PTE_R, Trap::LoadPageFault)?;
                let val = match funct3 {
                    0b000 => bus.read8(pa).map(|v| v as i8 as u32),
                    0b001 => bus.read16(pa).map(|v| v as i16 as u32),
                    0b010 => bus.read32(pa),
                    0b100 => bus.read8(pa).map(u32::from),
                    _ => bus.read16(pa).map(u32::from),
                }
                .ok_or(Trap::LoadAccessFault(addr))?;
                rd_write = Some((rd, val));
            }
            Op::Store {
                rs1,
                rs2,
                imm,
                funct3,
            } => {
                if funct3 > 0b010 {
                    return Err(illegal());
                }
                let addr = self.read_reg(rs1).wrapping_add(imm);
                let align_mask = (1u32 << funct3) - 1;
                if addr & align_mask != 0 {
                    return Err(Trap::StoreAddressMisaligned(addr));
                }
                let pa = self.vmap_ls(bus, addr, PTE_W, Trap::StorePageFault)?;
                let val = self.read_reg(rs2);
                match funct3 {
                    0b000 => bus.write8(pa, val as u8),
                    0b001 => bus.write16(pa, val as u16),
                    _ => bus.write32(pa, val),
                }
                .map_err(|e| Self::store_trap(e, addr))?;
            }
            Op::OpImm {
                rd,
                rs1,
                imm,
                funct3,
                funct7,
            } => {
                let a = self.read_reg(rs1);
                let val = match funct3 {
                    0b000 => a.wrapping_add(imm),
                    0b010 => ((a as i32) < (imm as i32)) as u32,
                    0b011 => (a < imm) as u32,
                    0b100 => a ^ imm,
                    0b110 => a | imm,
                    0b111 => a & imm,
                    0b001 if funct7 == 0b000_0000 => a << (imm & 0x1f),
                    0b101 if funct7 == 0b000_0000 => a >> (imm & 0x1f),
                    0b101 if funct7 == 0b010_0000 => ((a as i32) >> (imm & 0x1f)) as u32,
                    _ => return Err(illegal()),
                };
                rd_write = Some((rd, val));
            }
            Op::Op {
                rd,
                rs1,
                rs2,
                funct3,
                funct7,
            } => {
                let a = self.read_reg(rs1);
                let b = self.read_reg(rs2);
                let val = match (funct3, funct7) {
                    (0b000, 0b000_0000) => a.wrapping_add(b),
                    (0b000, 0b010_0000) => a.wrapping_sub(b),
                    (0b001, 0b000_0000) => a << (b & 0x1f),
                    (0b010, 0b000_0000) => ((a as i32) < (b as i32)) as u32,
                    (0b011, 0b000_0000) => (a < b) as u32,
                    (0b100, 0b000_0000) => a ^ b,
                    (0b101, 0b000_0000) => a >> (b & 0x1f),
                    (0b101, 0b010_0000) => ((a as i32) >> (b & 0x1f)) as u32,
                    (0b110, 0b000_0000) => a | b,
                    (0b111, 0b000_0000) => a & b,
                    // M extension
                    (0b000, 0b000_0001) => a.wrapping_mul(b),
                    (0b001, 0b000_0001) => {
                        ((i64::from(a as i32).wrapping_mul(i64::from(b as i32))) >> 32) as u32
                    }
                    (0b010, 0b000_0001) => {
                        ((i64::from(a as i32).wrapping_mul(i64::from(b))) >> 32) as u32
                    }
                    (0b011, 0b000_0001) => ((u64::from(a).wrapping_mul(u64::from(b))) >> 32) as u32,
                    (0b100, 0b000_0001) => {
                        let (a, b) = (a as i32, b as i32);
                        let q = if b == 0 {
                            -1
                        } else if a == i32::MIN && b == -1 {
                            a
                        } else {
                            a / b
                        };
                        q as u32
                    }
                    (0b101, 0b000_0001) => {
                        if b == 0 {
                            !0
                        } else {
                            a / b
                        }
                    }
                    (0b110, 0b000_0001) => {
                        let (a, b) = (a as i32, b as i32);
                        let r = if b == 0 {
                            a
                        } else if a == i32::MIN && b == -1 {
                            0
                        } else {
                            a % b
                        };
                        r as u32
                    }
                    (0b111, 0b000_0001) => {
                        if b == 0 {
                            a
                        } else {
                            a % b
                        }
                    }
                    _ => return Err(illegal()),
                };
                rd_write = Some((rd, val));
            }
            Op::Amo {
                rd,
                rs1,
                rs2,
                funct3,
                funct5,
            } => {
                if funct3 != 0b010 {
                    return Err(illegal());
                }
                let addr = self.read_reg(rs1);
                match funct5 {
                    // LR.W
                    0b00010 => {
                        if rs2 != Register::X0 {
                            return Err(illegal());
                        }
                        if addr & 0x3 != 0 {
                            return Err(Trap::LoadAddressMisaligned(addr));
                        }
                        let pa = self.vmap_ls(bus, addr, PTE_R, Trap::LoadPageFault)?;
                        let val = bus.read32(pa).ok_or(Trap::LoadAccessFault(addr))?;
                        self.load_reserved = true;
                        rd_write = Some((rd, val));
                    }
                    // SC.W
                    0b00011 => {
                        if addr & 0x3 != 0 {
                            return Err(Trap::StoreAddressMisaligned(addr));
                        }
                        if self.load_reserved {
                            let pa = self.vmap_ls(bus, addr, PTE_W, Trap::StorePageFault)?;
                            self.load_reserved = false;
                            bus.write32(pa, self.read_reg(rs2))
                                .map_err(|e| Self::store_trap(e, addr))?;
                            rd_write = Some((rd, 0));
                        } else {
                            rd_write = Some((rd, 1));
                        }
                    }
                    // AMO read-modify-writes
                    0b00001 | 0b00000 | 0b00100 | 0b01100 | 0b01000 | 0b10000 | 0b10100
                    | 0b11000 | 0b11100 => {
                        if addr & 0x3 != 0 {
                            return Err(Trap::StoreAddressMisaligned(addr));
                        }
                        let pa = self.vmap_ls(bus, addr, PTE_R | PTE_W, Trap::StorePageFault)?;
                        // Read failure is store-flavoured for AMOs.
                        let old = bus.read32(pa).ok_or(Trap::StoreAccessFault(addr))?;
                        let b = self.read_reg(rs2);
                        let new = match funct5 {
                            0b00001 => b,
                            0b00000 => old.wrapping_add(b),
                            0b00100 => old ^ b,
                            0b01100 => old & b,
                            0b01000 => old | b,
                            0b10000 => {
                                if (old as i32) < (b as i32) {
                                    old
                                } else {
                                    b
                                }
                            }
                            0b10100 => {
                                if (old as i32) > (b as i32) {
                                    old
                                } else {
                                    b
                                }
                            }
                            0b11000 => old.min(b),
                            _ => old.max(b),
                        };
                        bus.write32(pa, new).map_err(|e| Self::store_trap(e, addr))?;
                        rd_write = Some((rd, old));
                    }
                    _ => return Err(illegal()),
                }
            }
            Op::System {
                rd,
                rs1,
                funct3,
                imm,
            } => match funct3 {
                0b000 => {
                    if SFENCE_VMA.matches(instr) {
                        // No TLB to flush; privilege-gated nop.
                        if !self.csr.permit_sfence_vma() {
                            return Err(illegal());
                        }
                    } else if ECALL.matches(instr) {
                        return Err(match self.csr.mode() {
                            Mode::User => Trap::EnvironmentCallFromU,
                            Mode::Supervisor => Trap::EnvironmentCallFromS,
                            Mode::Machine => Trap::EnvironmentCallFromM,
                        });
                    } else if EBREAK.matches(instr) {
                        return Err(Trap::Breakpoint);
                    } else if MRET.matches(instr) {
                        if self.csr.mode() != Mode::Machine {
                            return Err(illegal());
                        }
                        pc_wdata = Some(self.csr.trap_mret());
                    } else if SRET.matches(instr) {
                        if self.csr.mode() < Mode::Supervisor {
                            return Err(illegal());
                        }
                        pc_wdata = Some(self.csr.trap_sret().map_err(|()| illegal())?);
                    } else if WFI.matches(instr) {
                        // nop
                    } else {
                        return Err(illegal());
                    }
                }
                0b001 | 0b010 | 0b011 | 0b101 | 0b110 | 0b111 => {
                    let csr_addr = imm as u16;
                    let csr_op = match funct3 & 0x3 {
                        0b01 => CsrOp::Write,
                        0b10 => CsrOp::Set,
                        _ => CsrOp::Clear,
                    };
                    let wdata = if funct3 & 0x4 != 0 {
                        rs1.to_usize() as u32
                    } else {
                        self.read_reg(rs1)
                    };
                    // Read-skip for unconditional writes to x0; write-skip
                    // when rs1 is x0 for the set/clear flavours.
                    let do_read = csr_op != CsrOp::Write || rd != Register::X0;
                    let do_write = csr_op == CsrOp::Write || rs1 != Register::X0;

                    let mut old = 0;
                    if do_read {
                        old = self.csr.read(csr_addr, true).ok_or_else(illegal)?;
                    }
                    if do_write {
                        if !self.csr.write(csr_addr, wdata, csr_op) {
                            return Err(illegal());
                        }
                        if self.trace {
                            csr_trace =
                                Some((csr_addr, self.csr.read(csr_addr, false).unwrap_or(0)));
                        }
                    }
                    if do_read {
                        rd_write = Some((rd, old));
                    }
                }
                _ => return Err(illegal()),
            },
            Op::Fence => {
                // fence / fence.i: no caches to order or flush.
            }
        }

        if self.trace {
            self.print_trace(pc, raw, len, rd_write, pc_wdata, csr_trace);
        }

        // Commit point: nothing above may have returned Err after mutating
        // rd or PC.
        if let Some((rd, val)) = rd_write {
            self.write_reg(rd, val);
        }
        let next_pc = pc_wdata.unwrap_or_else(|| pc.wrapping_add(len));

        // Post-commit IRQ check: the would-be next PC becomes xepc.
        if let Some(irq_pc) = self.csr.trap_check_enter_irq(next_pc) {
            self.load_reserved = false;
            if self.trace {
                println!("^^^ IRQ            :                  : pc <- {:08x}", irq_pc);
            }
            self.pc = irq_pc;
        } else {
            self.pc = next_pc;
        }
        Ok(())
    }

    fn print_trace(
        &self,
        pc: u32,
        raw: u32,
        len: u32,
        rd_write: Option<(Register, u32)>,
        pc_wdata: Option<u32>,
        csr_trace: Option<(u16, u32)>,
    ) {
        let mut line = format!("{:08x}: ", pc);
        if len == 4 {
            line.push_str(&format!("{:08x} : ", raw));
        } else {
            line.push_str(&format!("    {:04x} : ", raw & 0xffff));
        }
        match rd_write {
            Some((rd, val)) if rd != Register::X0 => {
                line.push_str(&format!("{:<4}  <- {:08x} ", REG_NAMES[rd.to_usize()], val));
            }
            _ => line.push_str("                  "),
        }
        match pc_wdata {
            Some(target) => line.push_str(&format!(": pc <- {:08x}", target)),
            None => line.push(':'),
        }
        println!("{}", line);
        if let Some((addr, result)) = csr_trace {
            println!("                   : #{:03x}  <- {:08x} :", addr, result);
        }
    }

    /// Fetch, execute and retire one instruction.
    ///
    /// `Ok(())` for a cleanly retired instruction (a pending IRQ may still
    /// have redirected the PC). `Err(trap)` after an architectural trap has
    /// been entered; the host loop normally keeps stepping. `Err(Trap::Exit)`
    /// when the guest requested a halt through the test harness device; no
    /// trap is entered and the instruction does not retire.
    pub fn step(&mut self, bus: &mut dyn Bus) -> Result<(), Trap> {
        let pc = self.pc;
        debug_assert_eq!(pc & 1, 0);
        match self.exec(bus, pc) {
            Ok(()) => {
                self.csr.step_counters();
                Ok(())
            }
            Err(Trap::Exit(code)) => Err(Trap::Exit(code)),
            Err(trap) => {
                self.load_reserved = false;
                let target = self.csr.trap_enter_exception(trap.cause(), pc);
                self.csr.trap_set_xtval(trap.tval());
                log::debug!(
                    "trap {:?} at pc={:#010x}, vectoring to {:#010x}",
                    trap,
                    pc,
                    target
                );
                if self.trace {
                    println!(
                        "^^^ Trap           : cause <- {:<2}      : pc <- {:08x}",
                        trap.cause(),
                        target
                    );
                }
                self.pc = target;
                self.csr.step_counters();
                Err(trap)
            }
        }
    }
}
