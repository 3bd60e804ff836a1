use crate::Trap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Register {
    X0,
    X1,
    X2,
    X3,
    X4,
    X5,
    X6,
    X7,
    X8,
    X9,
    X10,
    X11,
    X12,
    X13,
    X14,
    X15,
    X16,
    X17,
    X18,
    X19,
    X20,
    X21,
    X22,
    X23,
    X24,
    X25,
    X26,
    X27,
    X28,
    X29,
    X30,
    X31,
}

impl Register {
    pub fn from_u32(v: u32) -> Self {
        match v & 0x1f {
            0 => Register::X0,
            1 => Register::X1,
            2 => Register::X2,
            3 => Register::X3,
            4 => Register::X4,
            5 => Register::X5,
            6 => Register::X6,
            7 => Register::X7,
            8 => Register::X8,
            9 => Register::X9,
            10 => Register::X10,
            11 => Register::X11,
            12 => Register::X12,
            13 => Register::X13,
            14 => Register::X14,
            15 => Register::X15,
            16 => Register::X16,
            17 => Register::X17,
            18 => Register::X18,
            19 => Register::X19,
            20 => Register::X20,
            21 => Register::X21,
            22 => Register::X22,
            23 => Register::X23,
            24 => Register::X24,
            25 => Register::X25,
            26 => Register::X26,
            27 => Register::X27,
            28 => Register::X28,
            29 => Register::X29,
            30 => Register::X30,
            31 => Register::X31,
            _ => unreachable!(),
        }
    }

    pub fn to_usize(self) -> usize {
        self as usize
    }
}

/// Fixed-encoding instruction matcher: `(instr & mask) == bits`.
#[derive(Debug, Clone, Copy)]
pub struct Pattern {
    pub mask: u32,
    pub bits: u32,
}

impl Pattern {
    pub const fn matches(self, instr: u32) -> bool {
        instr & self.mask == self.bits
    }
}

pub const ECALL: Pattern = Pattern { mask: 0xffff_ffff, bits: 0x0000_0073 };
pub const EBREAK: Pattern = Pattern { mask: 0xffff_ffff, bits: 0x0010_0073 };
pub const MRET: Pattern = Pattern { mask: 0xffff_ffff, bits: 0x3020_0073 };
pub const SRET: Pattern = Pattern { mask: 0xffff_ffff, bits: 0x1020_0073 };
pub const WFI: Pattern = Pattern { mask: 0xffff_ffff, bits: 0x1050_0073 };
pub const SFENCE_VMA: Pattern = Pattern { mask: 0xfe00_7fff, bits: 0x1200_0073 };
pub const FENCE: Pattern = Pattern { mask: 0x0000_707f, bits: 0x0000_000f };
pub const FENCE_I: Pattern = Pattern { mask: 0x0000_707f, bits: 0x0000_100f };

#[inline]
fn getbits(x: u32, hi: u32, lo: u32) -> u32 {
    (x >> lo) & ((1 << (hi - lo + 1)) - 1)
}

#[inline]
fn getbit(x: u32, b: u32) -> u32 {
    (x >> b) & 1
}

// Immediate extractors. Each reconstructs the sign-extended value by
// unsigned bit slicing followed by one wrapping subtraction for the sign
// bit.

pub fn imm_i(instr: u32) -> u32 {
    (instr >> 20).wrapping_sub((instr >> 19) & 0x1000)
}

pub fn imm_s(instr: u32) -> u32 {
    (((instr >> 20) & 0xfe0) + ((instr >> 7) & 0x1f)).wrapping_sub((instr >> 19) & 0x1000)
}

pub fn imm_u(instr: u32) -> u32 {
    instr & 0xffff_f000
}

pub fn imm_b(instr: u32) -> u32 {
    (((instr >> 7) & 0x1e) + ((instr >> 20) & 0x7e0) + ((instr << 4) & 0x800))
        .wrapping_sub((instr >> 19) & 0x1000)
}

pub fn imm_j(instr: u32) -> u32 {
    (((instr >> 20) & 0x7fe) + ((instr >> 9) & 0x800) + (instr & 0xff000))
        .wrapping_sub((instr >> 11) & 0x10_0000)
}

pub fn imm_ci(instr: u32) -> u32 {
    getbits(instr, 6, 2).wrapping_sub(getbit(instr, 12) << 5)
}

pub fn imm_cj(instr: u32) -> u32 {
    ((getbit(instr, 11) << 4)
        + (getbits(instr, 10, 9) << 8)
        + (getbit(instr, 8) << 10)
        + (getbit(instr, 7) << 6)
        + (getbit(instr, 6) << 7)
        + (getbits(instr, 5, 3) << 1)
        + (getbit(instr, 2) << 5))
        .wrapping_sub(getbit(instr, 12) << 11)
}

pub fn imm_cb(instr: u32) -> u32 {
    ((getbits(instr, 11, 10) << 3)
        + (getbits(instr, 6, 5) << 6)
        + (getbits(instr, 4, 3) << 1)
        + (getbit(instr, 2) << 5))
        .wrapping_sub(getbit(instr, 12) << 8)
}

// Unsigned scatter-gather layouts for the remaining compressed formats.

fn imm_ciw(instr: u32) -> u32 {
    (getbits(instr, 12, 11) << 4)
        + (getbits(instr, 10, 7) << 6)
        + (getbit(instr, 6) << 2)
        + (getbit(instr, 5) << 3)
}

fn imm_clsw(instr: u32) -> u32 {
    (getbit(instr, 6) << 2) + (getbits(instr, 12, 10) << 3) + (getbit(instr, 5) << 6)
}

fn imm_clwsp(instr: u32) -> u32 {
    (getbit(instr, 12) << 5) + (getbits(instr, 6, 4) << 2) + (getbits(instr, 3, 2) << 6)
}

fn imm_cswsp(instr: u32) -> u32 {
    (getbits(instr, 12, 9) << 2) + (getbits(instr, 8, 7) << 6)
}

fn imm_caddi16sp(instr: u32) -> u32 {
    ((getbit(instr, 6) << 4)
        + (getbit(instr, 5) << 6)
        + (getbits(instr, 4, 3) << 7)
        + (getbit(instr, 2) << 5))
        .wrapping_sub(getbit(instr, 12) << 9)
}

fn imm_clui(instr: u32) -> u32 {
    (getbits(instr, 6, 2) << 12).wrapping_sub(getbit(instr, 12) << 17)
}

// Compressed register fields: x8..x15 for the short forms.

fn c_rs1_s(instr: u32) -> u32 {
    getbits(instr, 9, 7) + 8
}

fn c_rs2_s(instr: u32) -> u32 {
    getbits(instr, 4, 2) + 8
}

fn c_rs1_l(instr: u32) -> u32 {
    getbits(instr, 11, 7)
}

fn c_rs2_l(instr: u32) -> u32 {
    getbits(instr, 6, 2)
}

/// One decoded instruction. Immediates are kept as raw 32-bit words (already
/// sign-extended); arithmetic on them is wrapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Lui {
        rd: Register,
        imm: u32,
    },
    Auipc {
        rd: Register,
        imm: u32,
    },
    Jal {
        rd: Register,
        imm: u32,
    },
    Jalr {
        rd: Register,
        rs1: Register,
        imm: u32,
    },
    Branch {
        rs1: Register,
        rs2: Register,
        imm: u32,
        funct3: u32,
    },
    Load {
        rd: Register,
        rs1: Register,
        imm: u32,
        funct3: u32,
    },
    Store {
        rs1: Register,
        rs2: Register,
        imm: u32,
        funct3: u32,
    },
    OpImm {
        rd: Register,
        rs1: Register,
        imm: u32,
        funct3: u32,
        funct7: u32,
    },
    Op {
        rd: Register,
        rs1: Register,
        rs2: Register,
        funct3: u32,
        funct7: u32,
    },
    Amo {
        rd: Register,
        rs1: Register,
        rs2: Register,
        funct3: u32,
        funct5: u32,
    },
    System {
        rd: Register,
        rs1: Register,
        funct3: u32,
        imm: u32,
    },
    Fence,
}

pub fn decode(instr: u32) -> Result<Op, Trap> {
    let opcode = instr & 0x7f;
    let rd = Register::from_u32((instr >> 7) & 0x1f);
    let funct3 = (instr >> 12) & 0x7;
    let rs1 = Register::from_u32((instr >> 15) & 0x1f);
    let rs2 = Register::from_u32((instr >> 20) & 0x1f);
    let funct7 = (instr >> 25) & 0x7f;

    match opcode {
        0x37 => Ok(Op::Lui { rd, imm: imm_u(instr) }),
        0x17 => Ok(Op::Auipc { rd, imm: imm_u(instr) }),
        0x6f => Ok(Op::Jal { rd, imm: imm_j(instr) }),
        0x67 if funct3 == 0 => Ok(Op::Jalr { rd, rs1, imm: imm_i(instr) }),
        0x63 => Ok(Op::Branch {
            rs1,
            rs2,
            imm: imm_b(instr),
            funct3,
        }),
        0x03 => Ok(Op::Load {
            rd,
            rs1,
            imm: imm_i(instr),
            funct3,
        }),
        0x23 => Ok(Op::Store {
            rs1,
            rs2,
            imm: imm_s(instr),
            funct3,
        }),
        0x13 => Ok(Op::OpImm {
            rd,
            rs1,
            imm: imm_i(instr),
            funct3,
            funct7,
        }),
        0x33 => Ok(Op::Op {
            rd,
            rs1,
            rs2,
            funct3,
            funct7,
        }),
        0x2f => Ok(Op::Amo {
            rd,
            rs1,
            rs2,
            funct3,
            funct5: (instr >> 27) & 0x1f,
        }),
        0x73 => Ok(Op::System {
            rd,
            rs1,
            funct3,
            imm: (instr >> 20) & 0xfff,
        }),
        0x0f if FENCE.matches(instr) || FENCE_I.matches(instr) => Ok(Op::Fence),
        _ => Err(Trap::IllegalInstruction(instr)),
    }
}

// -------- Compressed (C) extension expansion ---------------------------------
//
// 16-bit instructions are expanded into their canonical 32-bit encodings and
// fed through the normal `decode()`. Illegal compressed encodings report the
// original halfword as the syndrome.

fn encode_i(imm: u32, rs1: u32, funct3: u32, rd: u32, opcode: u32) -> u32 {
    ((imm & 0xfff) << 20) | (rs1 << 15) | (funct3 << 12) | (rd << 7) | opcode
}

fn encode_u(imm: u32, rd: u32, opcode: u32) -> u32 {
    (imm & 0xffff_f000) | (rd << 7) | opcode
}

fn encode_r(funct7: u32, rs2: u32, rs1: u32, funct3: u32, rd: u32, opcode: u32) -> u32 {
    (funct7 << 25) | (rs2 << 20) | (rs1 << 15) | (funct3 << 12) | (rd << 7) | opcode
}

fn encode_s(imm: u32, rs2: u32, rs1: u32, funct3: u32, opcode: u32) -> u32 {
    let imm = imm & 0xfff;
    (((imm >> 5) & 0x7f) << 25)
        | (rs2 << 20)
        | (rs1 << 15)
        | (funct3 << 12)
        | ((imm & 0x1f) << 7)
        | opcode
}

fn encode_j(imm: u32, rd: u32) -> u32 {
    (((imm >> 20) & 0x1) << 31)
        | (((imm >> 1) & 0x3ff) << 21)
        | (((imm >> 11) & 0x1) << 20)
        | (((imm >> 12) & 0xff) << 12)
        | (rd << 7)
        | 0x6f
}

fn encode_b(imm: u32, rs2: u32, rs1: u32, funct3: u32) -> u32 {
    (((imm >> 12) & 0x1) << 31)
        | (((imm >> 5) & 0x3f) << 25)
        | (rs2 << 20)
        | (rs1 << 15)
        | (funct3 << 12)
        | (((imm >> 1) & 0xf) << 8)
        | (((imm >> 11) & 0x1) << 7)
        | 0x63
}

pub fn expand_compressed(insn: u16) -> Result<u32, Trap> {
    // The all-zeros halfword is the canonical illegal encoding.
    if insn == 0 {
        return Err(Trap::IllegalInstruction(insn as u32));
    }
    let funct3 = (insn >> 13) & 0x7;
    match insn & 0x3 {
        0b00 => expand_q0(insn as u32, funct3 as u32),
        0b01 => expand_q1(insn as u32, funct3 as u32),
        0b10 => expand_q2(insn as u32, funct3 as u32),
        _ => Err(Trap::IllegalInstruction(insn as u32)),
    }
}

fn expand_q0(insn: u32, funct3: u32) -> Result<u32, Trap> {
    match funct3 {
        // C.ADDI4SPN -> ADDI rd', x2, nzuimm
        0b000 => {
            let nzuimm = imm_ciw(insn);
            if nzuimm == 0 {
                return Err(Trap::IllegalInstruction(insn));
            }
            Ok(encode_i(nzuimm, 2, 0x0, c_rs2_s(insn), 0x13))
        }
        // C.LW -> LW rd', uimm(rs1')
        0b010 => Ok(encode_i(imm_clsw(insn), c_rs1_s(insn), 0x2, c_rs2_s(insn), 0x03)),
        // C.SW -> SW rs2', uimm(rs1')
        0b110 => Ok(encode_s(imm_clsw(insn), c_rs2_s(insn), c_rs1_s(insn), 0x2, 0x23)),
        // FP loads/stores and the reserved slot: no F/D support.
        _ => Err(Trap::IllegalInstruction(insn)),
    }
}

fn expand_q1(insn: u32, funct3: u32) -> Result<u32, Trap> {
    match funct3 {
        // C.NOP / C.ADDI (rd = x0 forms are hints, executed as nops)
        0b000 => {
            let rd = c_rs1_l(insn);
            Ok(encode_i(imm_ci(insn), rd, 0x0, rd, 0x13))
        }
        // C.JAL -> JAL x1, imm
        0b001 => Ok(encode_j(imm_cj(insn), 1)),
        // C.LI -> ADDI rd, x0, imm
        0b010 => Ok(encode_i(imm_ci(insn), 0, 0x0, c_rs1_l(insn), 0x13)),
        // C.ADDI16SP / C.LUI
        0b011 => {
            let rd = c_rs1_l(insn);
            if rd == 2 {
                let imm = imm_caddi16sp(insn);
                if imm == 0 {
                    return Err(Trap::IllegalInstruction(insn));
                }
                Ok(encode_i(imm, 2, 0x0, 2, 0x13))
            } else {
                let imm = imm_clui(insn);
                if imm == 0 {
                    return Err(Trap::IllegalInstruction(insn));
                }
                Ok(encode_u(imm, rd, 0x37))
            }
        }
        // C.SRLI / C.SRAI / C.ANDI / C.SUB / C.XOR / C.OR / C.AND
        0b100 => {
            let rs1 = c_rs1_s(insn);
            match getbits(insn, 11, 10) {
                0b00 | 0b01 => {
                    // Shift amounts with bit 5 set are reserved on RV32.
                    let shamt = getbits(insn, 6, 2);
                    if getbit(insn, 12) != 0 {
                        return Err(Trap::IllegalInstruction(insn));
                    }
                    let funct7 = if getbits(insn, 11, 10) == 0b01 { 0x20 } else { 0x00 };
                    Ok(encode_i((funct7 << 5) | shamt, rs1, 0x5, rs1, 0x13))
                }
                0b10 => Ok(encode_i(imm_ci(insn), rs1, 0x7, rs1, 0x13)),
                0b11 => {
                    if getbit(insn, 12) != 0 {
                        // C.SUBW/C.ADDW slots are RV64-only.
                        return Err(Trap::IllegalInstruction(insn));
                    }
                    let (funct3, funct7) = match getbits(insn, 6, 5) {
                        0b00 => (0x0, 0x20), // SUB
                        0b01 => (0x4, 0x00), // XOR
                        0b10 => (0x6, 0x00), // OR
                        _ => (0x7, 0x00),    // AND
                    };
                    Ok(encode_r(funct7, c_rs2_s(insn), rs1, funct3, rs1, 0x33))
                }
                _ => unreachable!(),
            }
        }
        // C.J -> JAL x0, imm
        0b101 => Ok(encode_j(imm_cj(insn), 0)),
        // C.BEQZ / C.BNEZ -> BEQ/BNE rs1', x0, imm
        0b110 => Ok(encode_b(imm_cb(insn), 0, c_rs1_s(insn), 0x0)),
        0b111 => Ok(encode_b(imm_cb(insn), 0, c_rs1_s(insn), 0x1)),
        _ => Err(Trap::IllegalInstruction(insn)),
    }
}

fn expand_q2(insn: u32, funct3: u32) -> Result<u32, Trap> {
    match funct3 {
        // C.SLLI
        0b000 => {
            let rd = c_rs1_l(insn);
            if getbit(insn, 12) != 0 {
                return Err(Trap::IllegalInstruction(insn));
            }
            Ok(encode_i(getbits(insn, 6, 2), rd, 0x1, rd, 0x13))
        }
        // C.LWSP -> LW rd, uimm(sp)
        0b010 => {
            let rd = c_rs1_l(insn);
            if rd == 0 {
                return Err(Trap::IllegalInstruction(insn));
            }
            Ok(encode_i(imm_clwsp(insn), 2, 0x2, rd, 0x03))
        }
        // C.JR / C.MV / C.EBREAK / C.JALR / C.ADD
        0b100 => {
            let rd = c_rs1_l(insn);
            let rs2 = c_rs2_l(insn);
            match (getbit(insn, 12), rs2, rd) {
                (0, 0, rd) if rd != 0 => Ok(encode_i(0, rd, 0x0, 0, 0x67)), // JALR x0, rd, 0
                (0, rs2, rd) if rs2 != 0 => Ok(encode_r(0x00, rs2, 0, 0x0, rd, 0x33)), // ADD rd, x0, rs2
                (1, 0, 0) => Ok(EBREAK.bits),
                (1, 0, rd) => Ok(encode_i(0, rd, 0x0, 1, 0x67)), // JALR x1, rd, 0
                (1, rs2, rd) => Ok(encode_r(0x00, rs2, rd, 0x0, rd, 0x33)), // ADD rd, rd, rs2
                _ => Err(Trap::IllegalInstruction(insn)),
            }
        }
        // C.SWSP -> SW rs2, uimm(sp)
        0b110 => Ok(encode_s(imm_cswsp(insn), c_rs2_l(insn), 2, 0x2, 0x23)),
        _ => Err(Trap::IllegalInstruction(insn)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn imm_i_sign_extension() {
        // ADDI x1, x0, -1: imm field all-ones
        let insn = 0xfff0_0093;
        assert_eq!(imm_i(insn), 0xffff_ffff);
        // imm = +2047
        let insn = 0x7ff0_0093;
        assert_eq!(imm_i(insn), 2047);
        // imm = -2048 (only the sign bit set)
        let insn = 0x8000_0093;
        assert_eq!(imm_i(insn), (-2048i32) as u32);
        assert_eq!(imm_i(0x0000_0013), 0);
    }

    #[test]
    fn imm_s_sign_extension() {
        // SW x1, -4(x2): imm[11:5]=1111111, imm[4:0]=11100
        let insn = encode_s((-4i32) as u32, 1, 2, 0x2, 0x23);
        assert_eq!(imm_s(insn), (-4i32) as u32);
        let insn = encode_s(2047, 1, 2, 0x2, 0x23);
        assert_eq!(imm_s(insn), 2047);
        let insn = encode_s((-2048i32) as u32, 1, 2, 0x2, 0x23);
        assert_eq!(imm_s(insn), (-2048i32) as u32);
    }

    #[test]
    fn imm_b_sign_extension() {
        for &off in &[4i32, -4, 8, -8, 16, 2046, -2048, 1024, -1024, 2, -2, 0] {
            let insn = encode_b(off as u32, 1, 2, 0x0);
            assert_eq!(imm_b(insn), off as u32, "offset {}", off);
        }
    }

    #[test]
    fn imm_j_sign_extension() {
        for &off in &[8i32, -8, 2, -2, 4096, -4096, 0xffffe, -0x100000, 0] {
            let insn = encode_j(off as u32, 1);
            assert_eq!(imm_j(insn), off as u32, "offset {}", off);
        }
    }

    #[test]
    fn imm_u_top_bits() {
        assert_eq!(imm_u(0x1234_5137), 0x1234_5000);
        assert_eq!(imm_u(0xffff_f0b7), 0xffff_f000);
    }

    #[test]
    fn decode_lui_and_jal() {
        match decode(0x1234_5137).unwrap() {
            Op::Lui { rd, imm } => {
                assert_eq!(rd, Register::X2);
                assert_eq!(imm, 0x1234_5000);
            }
            other => panic!("expected LUI, got {:?}", other),
        }

        // JAL x1, 8
        let jal = encode_j(8, 1);
        match decode(jal).unwrap() {
            Op::Jal { rd, imm } => {
                assert_eq!(rd, Register::X1);
                assert_eq!(imm, 8);
            }
            other => panic!("expected JAL, got {:?}", other),
        }
    }

    #[test]
    fn decode_illegal_opcode() {
        match decode(0x0000_0000) {
            Err(Trap::IllegalInstruction(bits)) => assert_eq!(bits, 0),
            other => panic!("expected IllegalInstruction, got {:?}", other),
        }
    }

    #[test]
    fn fixed_patterns_match() {
        assert!(ECALL.matches(0x0000_0073));
        assert!(EBREAK.matches(0x0010_0073));
        assert!(MRET.matches(0x3020_0073));
        assert!(SRET.matches(0x1020_0073));
        assert!(WFI.matches(0x1050_0073));
        // sfence.vma x1, x2
        assert!(SFENCE_VMA.matches(0x1220_8073));
        assert!(!SFENCE_VMA.matches(0x0000_0073));
        assert!(FENCE.matches(0x0ff0_000f));
        assert!(FENCE_I.matches(0x0000_100f));
    }

    #[test]
    fn expand_all_zeros_is_illegal() {
        match expand_compressed(0x0000) {
            Err(Trap::IllegalInstruction(bits)) => assert_eq!(bits, 0),
            other => panic!("expected IllegalInstruction, got {:?}", other),
        }
    }

    #[test]
    fn expand_basic_integer_ops() {
        // Encodings from assembling with rv32imac:
        //   addi x8, x2, 16          # C.ADDI4SPN
        //   addi x11,x11,1           # C.ADDI
        //   addi x13,x0,-1           # C.LI
        //   addi x2, x2, 32          # C.ADDI16SP
        //   lui  x14,1               # C.LUI
        let c_addi4spn: u16 = 0x0800;
        let c_addi: u16 = 0x0585;
        let c_li: u16 = 0x56fd;
        let c_addi16sp: u16 = 0x6105;
        let c_lui: u16 = 0x6705;

        match decode(expand_compressed(c_addi4spn).unwrap()).unwrap() {
            Op::OpImm { rd, rs1, imm, funct3, .. } => {
                assert_eq!(rd, Register::X8);
                assert_eq!(rs1, Register::X2);
                assert_eq!(imm, 16);
                assert_eq!(funct3, 0);
            }
            other => panic!("expected OpImm from C.ADDI4SPN, got {:?}", other),
        }

        match decode(expand_compressed(c_addi).unwrap()).unwrap() {
            Op::OpImm { rd, rs1, imm, .. } => {
                assert_eq!(rd, Register::X11);
                assert_eq!(rs1, Register::X11);
                assert_eq!(imm, 1);
            }
            other => panic!("expected OpImm from C.ADDI, got {:?}", other),
        }

        match decode(expand_compressed(c_li).unwrap()).unwrap() {
            Op::OpImm { rd, rs1, imm, .. } => {
                assert_eq!(rd, Register::X13);
                assert_eq!(rs1, Register::X0);
                assert_eq!(imm, 0xffff_ffff);
            }
            other => panic!("expected OpImm from C.LI, got {:?}", other),
        }

        match decode(expand_compressed(c_addi16sp).unwrap()).unwrap() {
            Op::OpImm { rd, rs1, imm, .. } => {
                assert_eq!(rd, Register::X2);
                assert_eq!(rs1, Register::X2);
                assert_eq!(imm, 32);
            }
            other => panic!("expected OpImm from C.ADDI16SP, got {:?}", other),
        }

        match decode(expand_compressed(c_lui).unwrap()).unwrap() {
            Op::Lui { rd, imm } => {
                assert_eq!(rd, Register::X14);
                assert_eq!(imm, 0x1000);
            }
            other => panic!("expected Lui from C.LUI, got {:?}", other),
        }
    }

    #[test]
    fn expand_jumps_and_branches() {
        // c.jal 8: imm[3:1] land in bits 5:3
        let c_jal: u16 = 0x2021;
        match decode(expand_compressed(c_jal).unwrap()).unwrap() {
            Op::Jal { rd, imm } => {
                assert_eq!(rd, Register::X1);
                assert_eq!(imm, 8);
            }
            other => panic!("expected JAL from C.JAL, got {:?}", other),
        }

        // c.j -4: offset -4 -> imm[2]=0, bits 5:3 hold imm[3:1]=0b110, sign bit 12 set
        let c_j: u16 = 0xbff5;
        match decode(expand_compressed(c_j).unwrap()).unwrap() {
            Op::Jal { rd, imm } => {
                assert_eq!(rd, Register::X0);
                assert_eq!(imm, (-4i32) as u32);
            }
            other => panic!("expected JAL from C.J, got {:?}", other),
        }

        // c.beqz x8, 8
        let c_beqz: u16 = 0xc401;
        match decode(expand_compressed(c_beqz).unwrap()).unwrap() {
            Op::Branch { rs1, rs2, imm, funct3 } => {
                assert_eq!(rs1, Register::X8);
                assert_eq!(rs2, Register::X0);
                assert_eq!(imm, 8);
                assert_eq!(funct3, 0);
            }
            other => panic!("expected Branch from C.BEQZ, got {:?}", other),
        }
    }

    #[test]
    fn expand_q2_register_forms() {
        // c.mv x10, x11 -> add x10, x0, x11
        let c_mv: u16 = 0x852e;
        match decode(expand_compressed(c_mv).unwrap()).unwrap() {
            Op::Op { rd, rs1, rs2, funct3, funct7 } => {
                assert_eq!(rd, Register::X10);
                assert_eq!(rs1, Register::X0);
                assert_eq!(rs2, Register::X11);
                assert_eq!(funct3, 0);
                assert_eq!(funct7, 0);
            }
            other => panic!("expected Op from C.MV, got {:?}", other),
        }

        // c.add x10, x11 -> add x10, x10, x11
        let c_add: u16 = 0x952e;
        match decode(expand_compressed(c_add).unwrap()).unwrap() {
            Op::Op { rd, rs1, rs2, .. } => {
                assert_eq!(rd, Register::X10);
                assert_eq!(rs1, Register::X10);
                assert_eq!(rs2, Register::X11);
            }
            other => panic!("expected Op from C.ADD, got {:?}", other),
        }

        // c.jr x1 -> jalr x0, x1, 0
        let c_jr: u16 = 0x8082;
        match decode(expand_compressed(c_jr).unwrap()).unwrap() {
            Op::Jalr { rd, rs1, imm } => {
                assert_eq!(rd, Register::X0);
                assert_eq!(rs1, Register::X1);
                assert_eq!(imm, 0);
            }
            other => panic!("expected Jalr from C.JR, got {:?}", other),
        }

        // c.jalr x5 -> jalr x1, x5, 0
        let c_jalr: u16 = 0x9282;
        match decode(expand_compressed(c_jalr).unwrap()).unwrap() {
            Op::Jalr { rd, rs1, imm } => {
                assert_eq!(rd, Register::X1);
                assert_eq!(rs1, Register::X5);
                assert_eq!(imm, 0);
            }
            other => panic!("expected Jalr from C.JALR, got {:?}", other),
        }

        // c.ebreak
        let c_ebreak: u16 = 0x9002;
        assert_eq!(expand_compressed(c_ebreak).unwrap(), 0x0010_0073);

        // c.lwsp a5, 12(sp)
        let c_lwsp: u16 = 0x47b2;
        match decode(expand_compressed(c_lwsp).unwrap()).unwrap() {
            Op::Load { rd, rs1, imm, funct3 } => {
                assert_eq!(rd, Register::X15);
                assert_eq!(rs1, Register::X2);
                assert_eq!(imm, 12);
                assert_eq!(funct3, 2);
            }
            other => panic!("expected Load from C.LWSP, got {:?}", other),
        }

        // c.swsp a5, 12(sp)
        let c_swsp: u16 = 0xc63e;
        match decode(expand_compressed(c_swsp).unwrap()).unwrap() {
            Op::Store { rs1, rs2, imm, funct3 } => {
                assert_eq!(rs1, Register::X2);
                assert_eq!(rs2, Register::X15);
                assert_eq!(imm, 12);
                assert_eq!(funct3, 2);
            }
            other => panic!("expected Store from C.SWSP, got {:?}", other),
        }
    }

    #[test]
    fn expand_rv32_reserved_cases() {
        // c.srli with shamt bit 5 set is reserved on RV32 (0x9001 = srli x8,x8,32)
        assert!(matches!(
            expand_compressed(0x9001),
            Err(Trap::IllegalInstruction(_))
        ));
        // c.slli x1 with bit 12 set
        assert!(matches!(
            expand_compressed(0x10a2),
            Err(Trap::IllegalInstruction(_))
        ));
        // c.lwsp with rd = x0 is reserved
        assert!(matches!(
            expand_compressed(0x4032),
            Err(Trap::IllegalInstruction(_))
        ));
        // c.addi16sp with zero immediate is reserved
        assert!(matches!(
            expand_compressed(0x6101),
            Err(Trap::IllegalInstruction(_))
        ));
        // RV64 C.LD slot (funct3=011, quadrant 0)
        assert!(matches!(
            expand_compressed(0x6000),
            Err(Trap::IllegalInstruction(_))
        ));
    }
}
