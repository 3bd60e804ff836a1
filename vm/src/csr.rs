use crate::mmu::{PTE_R, PTE_U, PTE_W, PTE_X};

/// Privilege modes. Ordering follows the architectural encoding (U < S < M).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Mode {
    User,
    Supervisor,
    Machine,
}

impl Mode {
    /// Encode into the MPP/SPP field encoding.
    pub fn to_bits(self) -> u32 {
        match self {
            Mode::User => 0b00,
            Mode::Supervisor => 0b01,
            Mode::Machine => 0b11,
        }
    }

    /// Decode an MPP/SPP field. 0b10 is reserved; WARL-coerce it to Machine.
    pub fn from_bits(bits: u32) -> Mode {
        match bits & 0b11 {
            0b00 => Mode::User,
            0b01 => Mode::Supervisor,
            _ => Mode::Machine,
        }
    }
}

// CSR addresses.
pub const CSR_SSTATUS: u16 = 0x100;
pub const CSR_SIE: u16 = 0x104;
pub const CSR_STVEC: u16 = 0x105;
pub const CSR_SCOUNTEREN: u16 = 0x106;
pub const CSR_SSCRATCH: u16 = 0x140;
pub const CSR_SEPC: u16 = 0x141;
pub const CSR_SCAUSE: u16 = 0x142;
pub const CSR_STVAL: u16 = 0x143;
pub const CSR_SIP: u16 = 0x144;
pub const CSR_SATP: u16 = 0x180;

pub const CSR_MSTATUS: u16 = 0x300;
pub const CSR_MISA: u16 = 0x301;
pub const CSR_MEDELEG: u16 = 0x302;
pub const CSR_MIDELEG: u16 = 0x303;
pub const CSR_MIE: u16 = 0x304;
pub const CSR_MTVEC: u16 = 0x305;
pub const CSR_MCOUNTEREN: u16 = 0x306;
pub const CSR_MSCRATCH: u16 = 0x340;
pub const CSR_MEPC: u16 = 0x341;
pub const CSR_MCAUSE: u16 = 0x342;
pub const CSR_MTVAL: u16 = 0x343;
pub const CSR_MIP: u16 = 0x344;

pub const CSR_MCYCLE: u16 = 0xb00;
pub const CSR_MINSTRET: u16 = 0xb02;
pub const CSR_MCYCLEH: u16 = 0xb80;
pub const CSR_MINSTRETH: u16 = 0xb82;

pub const CSR_CYCLE: u16 = 0xc00;
pub const CSR_INSTRET: u16 = 0xc02;
pub const CSR_CYCLEH: u16 = 0xc80;
pub const CSR_INSTRETH: u16 = 0xc82;

pub const CSR_MVENDORID: u16 = 0xf11;
pub const CSR_MARCHID: u16 = 0xf12;
pub const CSR_MIMPID: u16 = 0xf13;
pub const CSR_MHARTID: u16 = 0xf14;

// xstatus bits.
pub const MSTATUS_SIE: u32 = 1 << 1;
pub const MSTATUS_MIE: u32 = 1 << 3;
pub const MSTATUS_SPIE: u32 = 1 << 5;
pub const MSTATUS_MPIE: u32 = 1 << 7;
pub const MSTATUS_SPP: u32 = 1 << 8;
pub const MSTATUS_MPP: u32 = 0b11 << 11;
pub const MSTATUS_MPRV: u32 = 1 << 17;
pub const MSTATUS_SUM: u32 = 1 << 18;
pub const MSTATUS_MXR: u32 = 1 << 19;
pub const MSTATUS_TVM: u32 = 1 << 20;
pub const MSTATUS_TW: u32 = 1 << 21;
pub const MSTATUS_TSR: u32 = 1 << 22;

// xip/xie bits.
pub const MIP_SSIP: u32 = 1 << 1;
pub const MIP_MSIP: u32 = 1 << 3;
pub const MIP_STIP: u32 = 1 << 5;
pub const MIP_MTIP: u32 = 1 << 7;
pub const MIP_SEIP: u32 = 1 << 9;
pub const MIP_MEIP: u32 = 1 << 11;

/// The S-level interrupt bits (the software-writable subset of xip).
const XIP_S_MASK: u32 = MIP_SSIP | MIP_STIP | MIP_SEIP;
/// All implemented interrupt bits.
const XIE_MASK: u32 = XIP_S_MASK | MIP_MSIP | MIP_MTIP | MIP_MEIP;

const SSTATUS_MASK: u32 = MSTATUS_SIE | MSTATUS_SPIE | MSTATUS_SPP | MSTATUS_SUM | MSTATUS_MXR;

const MSTATUS_MASK: u32 = SSTATUS_MASK
    | MSTATUS_MIE
    | MSTATUS_MPIE
    | MSTATUS_MPP
    | MSTATUS_MPRV
    | MSTATUS_TVM
    | MSTATUS_TW
    | MSTATUS_TSR;

// satp fields (Sv32 layout).
pub const SATP_MODE: u32 = 1 << 31;
pub const SATP_ASID: u32 = 0x7fc0_0000;
pub const SATP_PPN: u32 = 0x003f_ffff;

/// RV32IMAC + U + S.
pub const MISA: u32 = 0x4010_1105;

const CAUSE_INTERRUPT: u32 = 1 << 31;

/// CSR write flavour carried by the Zicsr instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsrOp {
    Write,
    Set,
    Clear,
}

/// CSR file, privilege state and trap machinery for one hart.
///
/// `mstatus`/`sstatus` are masked views of the single `xstatus` register, and
/// `sie`/`sip` are masked views of `xie`/`xip`. The M-level bits of the `mip`
/// read value are not stored at all: they are composed from the latched IRQ
/// lines on every read.
pub struct Csr {
    mode: Mode,

    // Latched IRQ signals into the core.
    irq_t: bool,
    irq_s: bool,
    irq_e: bool,

    xstatus: u32,
    xie: u32,
    /// Software-writable S-level pending bits only; see `effective_xip`.
    xip: u32,

    mtvec: u32,
    mtval: u32,
    mscratch: u32,
    mepc: u32,
    mcause: u32,
    medeleg: u32,
    mideleg: u32,

    mcounteren: u32,
    mcycle: u32,
    mcycleh: u32,
    minstret: u32,
    minstreth: u32,

    stvec: u32,
    stval: u32,
    scounteren: u32,
    sscratch: u32,
    sepc: u32,
    scause: u32,
    satp: u32,
}

impl Default for Csr {
    fn default() -> Self {
        Self::new()
    }
}

impl Csr {
    pub fn new() -> Self {
        Self {
            mode: Mode::Machine,
            irq_t: false,
            irq_s: false,
            irq_e: false,
            xstatus: 0,
            xie: 0,
            xip: 0,
            mtvec: 0,
            mtval: 0,
            mscratch: 0,
            mepc: 0,
            mcause: 0,
            medeleg: 0,
            mideleg: 0,
            mcounteren: 0,
            mcycle: 0,
            mcycleh: 0,
            minstret: 0,
            minstreth: 0,
            stvec: 0,
            stval: 0,
            scounteren: 0,
            sscratch: 0,
            sepc: 0,
            scause: 0,
            satp: 0,
        }
    }

    /// Current (true) privilege mode. Also the effective privilege for
    /// instruction fetch: fetch translation is not affected by MPRV.
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// The `mip` value as observed by reads and the interrupt logic: the
    /// software-written S bits OR'd with the latched external lines driving
    /// both the M-level and S-level bits.
    fn effective_xip(&self) -> u32 {
        let mut xip = self.xip;
        if self.irq_s {
            xip |= MIP_MSIP | MIP_SSIP;
        }
        if self.irq_t {
            xip |= MIP_MTIP | MIP_STIP;
        }
        if self.irq_e {
            xip |= MIP_MEIP | MIP_SEIP;
        }
        xip
    }

    /// Read a CSR. `None` means the access is architecturally invalid
    /// (unimplemented register, insufficient privilege, or a failed
    /// TVM/counter-enable gate) and decodes to an illegal instruction.
    pub fn read(&self, addr: u16, _side_effect: bool) -> Option<u32> {
        if addr >= 1 << 12 || u32::from((addr >> 8) & 0x3) > self.mode.to_bits() {
            return None;
        }
        let permit_cycle = (self.mode >= Mode::Machine || self.mcounteren & 0x1 != 0)
            && (self.mode >= Mode::Supervisor || self.scounteren & 0x1 != 0);
        let permit_instret = (self.mode >= Mode::Machine || self.mcounteren & 0x4 != 0)
            && (self.mode >= Mode::Supervisor || self.scounteren & 0x4 != 0);
        let permit_satp = self.mode >= Mode::Machine || self.xstatus & MSTATUS_TVM == 0;

        match addr {
            // Machine ID
            CSR_MISA => Some(MISA),
            CSR_MHARTID | CSR_MARCHID | CSR_MIMPID | CSR_MVENDORID => Some(0),

            // Machine trap handling
            CSR_MSTATUS => Some(self.xstatus & MSTATUS_MASK),
            CSR_MIE => Some(self.xie),
            CSR_MIP => Some(self.effective_xip()),
            CSR_MTVEC => Some(self.mtvec),
            CSR_MSCRATCH => Some(self.mscratch),
            CSR_MEPC => Some(self.mepc),
            CSR_MCAUSE => Some(self.mcause),
            CSR_MTVAL => Some(self.mtval),
            CSR_MEDELEG => Some(self.medeleg),
            CSR_MIDELEG => Some(self.mideleg),

            // Machine counters
            CSR_MCOUNTEREN => Some(self.mcounteren),
            CSR_MCYCLE => Some(self.mcycle),
            CSR_MCYCLEH => Some(self.mcycleh),
            CSR_MINSTRET => Some(self.minstret),
            CSR_MINSTRETH => Some(self.minstreth),

            // Supervisor trap handling
            CSR_SSTATUS => Some(self.xstatus & SSTATUS_MASK),
            CSR_SIE => Some(self.xie & XIP_S_MASK),
            CSR_SIP => Some(self.effective_xip() & XIP_S_MASK),
            CSR_STVEC => Some(self.stvec),
            CSR_SCOUNTEREN => Some(self.scounteren),
            CSR_SSCRATCH => Some(self.sscratch),
            CSR_SEPC => Some(self.sepc),
            CSR_SCAUSE => Some(self.scause),
            CSR_STVAL => Some(self.stval),
            CSR_SATP => {
                if permit_satp {
                    Some(self.satp)
                } else {
                    None
                }
            }

            // Unprivileged counters
            CSR_CYCLE => permit_cycle.then_some(self.mcycle),
            CSR_CYCLEH => permit_cycle.then_some(self.mcycleh),
            CSR_INSTRET => permit_instret.then_some(self.minstret),
            CSR_INSTRETH => permit_instret.then_some(self.minstreth),

            _ => None,
        }
    }

    /// Write a CSR, applying the WARL mask for the register. Returns `false`
    /// on a decode/privilege/read-only failure, which decodes to an illegal
    /// instruction.
    pub fn write(&mut self, addr: u16, data: u32, op: CsrOp) -> bool {
        if addr >= 1 << 12
            || u32::from((addr >> 8) & 0x3) > self.mode.to_bits()
            || (addr >> 10) & 0x3 == 0x3
        {
            return false;
        }

        // Read-modify-write flavours fold the current value in first; a
        // failing read fails the whole write.
        let data = match op {
            CsrOp::Write => data,
            CsrOp::Set | CsrOp::Clear => {
                let Some(rdata) = self.read(addr, false) else {
                    return false;
                };
                match op {
                    CsrOp::Set => rdata | data,
                    _ => rdata & !data,
                }
            }
        };

        let permit_satp = self.mode >= Mode::Machine || self.xstatus & MSTATUS_TVM == 0;

        match addr {
            // Machine ID registers are read-only WARL: writes are ignored.
            CSR_MISA | CSR_MHARTID | CSR_MARCHID | CSR_MIMPID | CSR_MVENDORID => {}

            CSR_MSTATUS => self.xstatus = (data & MSTATUS_MASK) | (self.xstatus & !MSTATUS_MASK),
            CSR_MIE => self.xie = data & XIE_MASK,
            // Only the S-level pending bits are software-writable.
            CSR_MIP => self.xip = (self.xip & !XIP_S_MASK) | (data & XIP_S_MASK),
            CSR_MTVEC => self.mtvec = data & 0xffff_fffd,
            CSR_MSCRATCH => self.mscratch = data,
            CSR_MEPC => self.mepc = data & 0xffff_fffe,
            CSR_MCAUSE => self.mcause = data & 0x8000_00ff,
            CSR_MTVAL => self.mtval = data,
            CSR_MEDELEG => self.medeleg = data,
            CSR_MIDELEG => self.mideleg = data,

            CSR_MCOUNTEREN => self.mcounteren = data & 0x7,
            CSR_MCYCLE => self.mcycle = data,
            CSR_MCYCLEH => self.mcycleh = data,
            CSR_MINSTRET => self.minstret = data,
            CSR_MINSTRETH => self.minstreth = data,

            CSR_SSTATUS => self.xstatus = (data & SSTATUS_MASK) | (self.xstatus & !SSTATUS_MASK),
            CSR_SIE => self.xie = (self.xie & !XIP_S_MASK) | (data & XIP_S_MASK),
            // sip writes reach only the S bits delegated by mideleg.
            CSR_SIP => {
                let mask = XIP_S_MASK & self.mideleg;
                self.xip = (self.xip & !mask) | (data & mask);
            }
            CSR_STVEC => self.stvec = data & 0xffff_fffd,
            CSR_SCOUNTEREN => self.scounteren = data & 0x7,
            CSR_SSCRATCH => self.sscratch = data,
            CSR_SEPC => self.sepc = data & 0xffff_fffe,
            CSR_SCAUSE => self.scause = data & 0x8000_00ff,
            CSR_STVAL => self.stval = data,
            CSR_SATP => {
                if permit_satp {
                    self.satp = data & !SATP_ASID;
                } else {
                    return false;
                }
            }

            _ => return false,
        }
        true
    }

    /// Advance the Zicntr counters by one retired instruction.
    pub fn step_counters(&mut self) {
        let mcycle = (u64::from(self.mcycleh) << 32 | u64::from(self.mcycle)).wrapping_add(1);
        self.mcycle = mcycle as u32;
        self.mcycleh = (mcycle >> 32) as u32;
        let minstret =
            (u64::from(self.minstreth) << 32 | u64::from(self.minstret)).wrapping_add(1);
        self.minstret = minstret as u32;
        self.minstreth = (minstret >> 32) as u32;
    }

    /// Shared trap entry once the target privilege is known. Saves the
    /// previous privilege and interrupt-enable state, switches mode, and
    /// returns the trap target PC per the xtvec mode.
    fn trap_enter_at_priv(&mut self, cause: u32, epc: u32, target: Mode) -> u32 {
        log::trace!(
            "trap enter: cause={:#010x} epc={:#010x} {:?} -> {:?}",
            cause,
            epc,
            self.mode,
            target
        );
        match target {
            Mode::Machine => {
                self.xstatus = (self.xstatus & !MSTATUS_MPP) | (self.mode.to_bits() << 11);
                // MPIE <- MIE, MIE <- 0
                if self.xstatus & MSTATUS_MIE != 0 {
                    self.xstatus |= MSTATUS_MPIE;
                } else {
                    self.xstatus &= !MSTATUS_MPIE;
                }
                self.xstatus &= !MSTATUS_MIE;
                self.mode = Mode::Machine;

                self.mcause = cause;
                self.mepc = epc;
                if self.mtvec & 0x1 != 0 && cause & CAUSE_INTERRUPT != 0 {
                    (self.mtvec & !1).wrapping_add(4 * (cause & !CAUSE_INTERRUPT))
                } else {
                    self.mtvec & !1
                }
            }
            Mode::Supervisor => {
                self.xstatus = (self.xstatus & !MSTATUS_SPP) | ((self.mode.to_bits() & 1) << 8);
                // SPIE <- SIE, SIE <- 0
                if self.xstatus & MSTATUS_SIE != 0 {
                    self.xstatus |= MSTATUS_SPIE;
                } else {
                    self.xstatus &= !MSTATUS_SPIE;
                }
                self.xstatus &= !MSTATUS_SIE;
                self.mode = Mode::Supervisor;

                self.scause = cause;
                self.sepc = epc;
                if self.stvec & 0x1 != 0 && cause & CAUSE_INTERRUPT != 0 {
                    (self.stvec & !1).wrapping_add(4 * (cause & !CAUSE_INTERRUPT))
                } else {
                    self.stvec & !1
                }
            }
            Mode::User => unreachable!("traps never target U-mode"),
        }
    }

    /// Determine the target privilege of an exception per `medeleg`, update
    /// trap state, and return the trap target PC.
    pub fn trap_enter_exception(&mut self, cause: u32, epc: u32) -> u32 {
        debug_assert!(cause < 32);
        let target = if self.mode <= Mode::Supervisor && self.medeleg >> cause & 1 != 0 {
            Mode::Supervisor
        } else {
            Mode::Machine
        };
        self.trap_enter_at_priv(cause, epc, target)
    }

    /// If an unmasked IRQ is pending, enter its trap and return the target
    /// PC; `epc` is the PC the interrupted flow would have executed next.
    pub fn trap_check_enter_irq(&mut self, epc: u32) -> Option<u32> {
        let pending = self.effective_xip() & self.xie;
        let pending_m = pending & !self.mideleg;
        let pending_s = pending & self.mideleg;

        // M-level interrupts dominate, and are taken from M only when MIE is
        // set, from S/U always.
        if pending_m != 0 && (self.xstatus & MSTATUS_MIE != 0 || self.mode < Mode::Machine) {
            let cause = CAUSE_INTERRUPT | pending_m.trailing_zeros();
            return Some(self.trap_enter_at_priv(cause, epc, Mode::Machine));
        }

        // Delegated interrupts target S and are never taken from M.
        if pending_s != 0
            && self.mode <= Mode::Supervisor
            && (self.xstatus & MSTATUS_SIE != 0 || self.mode < Mode::Supervisor)
        {
            let cause = CAUSE_INTERRUPT | pending_s.trailing_zeros();
            return Some(self.trap_enter_at_priv(cause, epc, Mode::Supervisor));
        }

        None
    }

    /// Set the syndrome register of the privilege level the trap was taken
    /// to. Must be called after trap entry.
    pub fn trap_set_xtval(&mut self, xtval: u32) {
        debug_assert!(self.mode >= Mode::Supervisor);
        if self.mode == Mode::Supervisor {
            self.stval = xtval;
        } else {
            self.mtval = xtval;
        }
    }

    /// Return from an M-mode trap. The caller has already checked the
    /// privilege gate. Returns the restored PC (mepc).
    pub fn trap_mret(&mut self) -> u32 {
        let mpp = Mode::from_bits(self.xstatus >> 11);
        if mpp != Mode::Machine {
            self.xstatus &= !MSTATUS_MPRV;
        }
        self.mode = mpp;
        self.xstatus &= !MSTATUS_MPP;
        // MIE <- MPIE, MPIE <- 1
        if self.xstatus & MSTATUS_MPIE != 0 {
            self.xstatus |= MSTATUS_MIE;
        } else {
            self.xstatus &= !MSTATUS_MIE;
        }
        self.xstatus |= MSTATUS_MPIE;
        self.mepc
    }

    /// Return from an S-mode trap, or `Err(())` when `mstatus.TSR` traps the
    /// instruction from S-mode (the caller raises illegal-instruction so the
    /// syndrome carries the instruction bits).
    pub fn trap_sret(&mut self) -> Result<u32, ()> {
        if self.mode == Mode::Supervisor && self.xstatus & MSTATUS_TSR != 0 {
            return Err(());
        }
        let spp = self.xstatus >> 8 & 1;
        self.mode = if spp == 0 { Mode::User } else { Mode::Supervisor };
        self.xstatus &= !MSTATUS_SPP;
        // SIE <- SPIE, SPIE <- 1
        if self.xstatus & MSTATUS_SPIE != 0 {
            self.xstatus |= MSTATUS_SIE;
        } else {
            self.xstatus &= !MSTATUS_SIE;
        }
        self.xstatus |= MSTATUS_SPIE;
        // The target of sret is never M, so MPRV is always cleared.
        self.xstatus &= !MSTATUS_MPRV;
        Ok(self.sepc)
    }

    /// Effective privilege for loads and stores: MPP when executing in M
    /// with MPRV set, the true privilege otherwise.
    pub fn effective_priv_ls(&self) -> Mode {
        if self.mode == Mode::Machine && self.xstatus & MSTATUS_MPRV != 0 {
            Mode::from_bits(self.xstatus >> 11)
        } else {
            self.mode
        }
    }

    pub fn translation_enabled_fetch(&self) -> bool {
        self.mode != Mode::Machine && self.satp & SATP_MODE != 0
    }

    pub fn translation_enabled_ls(&self) -> bool {
        self.effective_priv_ls() != Mode::Machine && self.satp & SATP_MODE != 0
    }

    /// Physical base of the root page table.
    pub fn atp(&self) -> u32 {
        (self.satp & SATP_PPN) << 12
    }

    pub fn permit_sfence_vma(&self) -> bool {
        self.mode == Mode::Machine
            || (self.mode == Mode::Supervisor && self.xstatus & MSTATUS_TVM == 0)
    }

    /// Leaf-PTE permission check for the Sv32 walk, honouring SUM and MXR.
    pub fn pte_permissions_ok(&self, pte: u32, required: u32) -> bool {
        // X requests come from instruction fetch, which uses the true
        // privilege; loads/stores use the MPRV-adjusted one.
        let eff_priv = if required & PTE_X != 0 {
            self.mode
        } else {
            self.effective_priv_ls()
        };
        debug_assert!(eff_priv <= Mode::Supervisor);

        // S access to a U page requires SUM; U access to an S page is never
        // allowed.
        if pte & PTE_U != 0 && eff_priv == Mode::Supervisor && self.xstatus & MSTATUS_SUM == 0 {
            return false;
        }
        if pte & PTE_U == 0 && eff_priv == Mode::User {
            return false;
        }

        let mut permissions = pte & (PTE_R | PTE_W | PTE_X);
        if self.xstatus & MSTATUS_MXR != 0 && permissions & PTE_X != 0 {
            permissions |= PTE_R;
        }
        permissions & required == required
    }

    pub fn set_irq_t(&mut self, irq: bool) {
        self.irq_t = irq;
    }

    pub fn set_irq_s(&mut self, irq: bool) {
        self.irq_s = irq;
    }

    pub fn set_irq_e(&mut self, irq: bool) {
        self.irq_e = irq;
    }
}
