/*
Copyright 2025 Connor Nolan

Licensed under the Apache License, Version 2.0 (the "License");
you may not use this file except in compliance with the License.
You may obtain a copy of the License at

    http://www.apache.org/licenses/LICENSE-2.0

Unless required by applicable law or agreed to in writing, software
distributed under the License is distributed on an "AS IS" BASIS,
WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
See the License for the specific language governing permissions and
limitations under the License.
*/

//! Pure-function layer answering semantic questions about a single Z80
//! instruction: which flags it leaves defined, which registers it reads
//! and writes, and how it transfers control.

use crate::asm::{IndirectBody, Instruction, Operand};

pub mod flag {
    pub const S: u8 = 1 << 0;
    pub const Z: u8 = 1 << 1;
    pub const H: u8 = 1 << 2;
    pub const PV: u8 = 1 << 3;
    pub const N: u8 = 1 << 4;
    pub const C: u8 = 1 << 5;
    pub const ALL: u8 = S | Z | H | PV | N | C;
}

/// Flag named in rule files ("s", "z", "h", "pv", "n", "c") to its mask.
pub fn flag_from_name(name: &str) -> Option<u8> {
    match name {
        "s" => Some(flag::S),
        "z" => Some(flag::Z),
        "h" => Some(flag::H),
        "pv" | "p/v" => Some(flag::PV),
        "n" => Some(flag::N),
        "c" => Some(flag::C),
        _ => None,
    }
}

fn condition_flag(cond: &str) -> u8 {
    match cond {
        "z" | "nz" => flag::Z,
        "c" | "nc" => flag::C,
        "pe" | "po" => flag::PV,
        "p" | "m" => flag::S,
        _ => 0,
    }
}

fn is_pair_operand(op: &Operand) -> bool {
    matches!(op, Operand::Pair(_))
}

/// Flags whose value is determined (written) by the instruction.
pub fn defines_flags(i: &Instruction) -> u8 {
    let ops = &i.operands;
    match i.opcode().as_str() {
        "add" | "adc" | "sbc" => {
            // add hl,rr only touches H, N and C; the adc/sbc pair forms
            // and all 8-bit forms define everything.
            if i.opcode() == "add" && ops.first().is_some_and(is_pair_operand) {
                flag::H | flag::N | flag::C
            } else {
                flag::ALL
            }
        }
        "sub" | "cp" | "neg" | "and" | "or" | "xor" => flag::ALL,
        "inc" | "dec" => {
            if ops.first().is_some_and(is_pair_operand) {
                0
            } else {
                flag::ALL & !flag::C
            }
        }
        "ld" => {
            // ld a,i and ld a,r copy IFF2 into P/V and set S/Z/H/N.
            if ops.len() == 2
                && matches!(&ops[0], Operand::Register(r) if r == "a")
                && matches!(&ops[1], Operand::Register(r) if r == "i" || r == "r")
            {
                flag::ALL & !flag::C
            } else {
                0
            }
        }
        "rlca" | "rla" | "rrca" | "rra" | "scf" | "ccf" => flag::H | flag::N | flag::C,
        "rlc" | "rl" | "rrc" | "rr" | "sla" | "sra" | "sll" | "srl" => flag::ALL,
        "bit" => flag::S | flag::Z | flag::H | flag::N,
        "daa" => flag::S | flag::Z | flag::H | flag::PV | flag::C,
        "cpl" => flag::H | flag::N,
        "pop" => {
            if matches!(ops.first(), Some(Operand::Pair(p)) if p == "af") {
                flag::ALL
            } else {
                0
            }
        }
        "ex" => {
            if matches!(ops.first(), Some(Operand::Pair(p)) if p == "af") {
                flag::ALL
            } else {
                0
            }
        }
        "in" => flag::ALL & !flag::C,
        "ldi" | "ldd" | "ldir" | "lddr" => flag::H | flag::PV | flag::N,
        "cpi" | "cpd" | "cpir" | "cpdr" => flag::ALL & !flag::C,
        "rld" | "rrd" => flag::ALL & !flag::C,
        _ => 0,
    }
}

/// Flags the instruction reads.
pub fn uses_flags(i: &Instruction) -> u8 {
    if let Some(cond) = condition_of(i) {
        return condition_flag(&cond);
    }
    match i.opcode().as_str() {
        "adc" | "sbc" | "rla" | "rra" | "rl" | "rr" | "ccf" => flag::C,
        "daa" => flag::H | flag::N | flag::C,
        "push" => {
            if matches!(i.operands.first(), Some(Operand::Pair(p)) if p == "af") {
                flag::ALL
            } else {
                0
            }
        }
        "ex" => {
            if matches!(i.operands.first(), Some(Operand::Pair(p)) if p == "af") {
                flag::ALL
            } else {
                0
            }
        }
        _ => 0,
    }
}

// Expand a register or pair name into the 8-bit atoms it covers. "f" is
// an atom so flag liveness can ride the same scan as registers.
pub fn expand_register(name: &str) -> &'static [&'static str] {
    match name {
        "af" => &["a", "f"],
        "af'" => &["a'", "f'"],
        "bc" => &["b", "c"],
        "de" => &["d", "e"],
        "hl" => &["h", "l"],
        "ix" => &["ixh", "ixl"],
        "iy" => &["iyh", "iyl"],
        "sp" => &["sp"],
        "a" => &["a"],
        "b" => &["b"],
        "c" => &["c"],
        "d" => &["d"],
        "e" => &["e"],
        "h" => &["h"],
        "l" => &["l"],
        "f" => &["f"],
        "i" => &["i"],
        "r" => &["r"],
        "ixh" => &["ixh"],
        "ixl" => &["ixl"],
        "iyh" => &["iyh"],
        "iyl" => &["iyl"],
        _ => &[],
    }
}

fn atoms_of_operand(op: &Operand, reads: bool) -> Vec<&'static str> {
    match op {
        Operand::Register(r) | Operand::Pair(r) => expand_register(r).to_vec(),
        // The address registers of a memory operand are always read, even
        // when the operand is a store destination.
        Operand::Indirect(body) if reads => match body {
            IndirectBody::Reg(r) => expand_register(r).to_vec(),
            IndirectBody::Indexed(r, _, _) => expand_register(r).to_vec(),
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}

fn add_read(out: &mut Vec<&'static str>, op: &Operand) {
    out_extend(out, atoms_of_operand(op, true));
}

/// Registers read by the instruction, as 8-bit atoms.
pub fn reads(i: &Instruction) -> Vec<&'static str> {
    let ops = &i.operands;
    let mut out: Vec<&'static str> = Vec::new();
    match i.opcode().as_str() {
        "ld" => {
            if ops.len() == 2 {
                // Destination contributes only its address registers.
                if let Operand::Indirect(_) = &ops[0] {
                    add_read(&mut out, &ops[0]);
                }
                add_read(&mut out, &ops[1]);
            }
        }
        "add" | "adc" | "sub" | "sbc" | "and" | "or" | "xor" | "cp" => {
            if ops.len() == 2 {
                add_read(&mut out, &ops[0]);
                add_read(&mut out, &ops[1]);
            } else if ops.len() == 1 {
                out_extend(&mut out, vec!["a"]);
                add_read(&mut out, &ops[0]);
            }
        }
        "inc" | "dec" => {
            if let Some(op) = ops.first() {
                add_read(&mut out, op);
            }
        }
        "push" => {
            if let Some(op) = ops.first() {
                add_read(&mut out, op);
            }
            out_extend(&mut out, vec!["sp"]);
        }
        "pop" => out_extend(&mut out, vec!["sp"]),
        "neg" | "cpl" | "daa" | "rlca" | "rla" | "rrca" | "rra" => {
            out_extend(&mut out, vec!["a"])
        }
        "rlc" | "rl" | "rrc" | "rr" | "sla" | "sra" | "sll" | "srl" => {
            if let Some(op) = ops.first() {
                add_read(&mut out, op);
            }
        }
        "bit" | "set" | "res" => {
            if let Some(op) = ops.get(1) {
                add_read(&mut out, op);
            }
        }
        "ex" => {
            for op in ops {
                add_read(&mut out, op);
            }
        }
        "djnz" => out_extend(&mut out, vec!["b"]),
        "jp" | "jr" => {
            // jp (hl) / jp (ix) reads the address register.
            for op in ops {
                if matches!(op, Operand::Indirect(_)) {
                    add_read(&mut out, op);
                }
            }
        }
        "ldi" | "ldd" | "ldir" | "lddr" => {
            out_extend(&mut out, vec!["h", "l", "d", "e", "b", "c"])
        }
        "cpi" | "cpd" | "cpir" | "cpdr" => out_extend(&mut out, vec!["a", "h", "l", "b", "c"]),
        "out" => {
            for op in ops {
                add_read(&mut out, op);
            }
        }
        "in" => {
            if let Some(op) = ops.get(1) {
                add_read(&mut out, op);
            }
        }
        "rld" | "rrd" => out_extend(&mut out, vec!["a", "h", "l"]),
        "rst" | "call" | "ret" | "reti" | "retn" => out_extend(&mut out, vec!["sp"]),
        _ => {}
    }
    out
}

/// Registers written by the instruction, as 8-bit atoms.
pub fn writes(i: &Instruction) -> Vec<&'static str> {
    let ops = &i.operands;
    let mut out: Vec<&'static str> = Vec::new();
    match i.opcode().as_str() {
        "ld" => {
            if let Some(op) = ops.first() {
                out_extend(&mut out, atoms_of_operand(op, false));
            }
        }
        "add" | "adc" | "sbc" => {
            if let Some(op) = ops.first() {
                out_extend(&mut out, atoms_of_operand(op, false));
            }
        }
        "sub" | "and" | "or" | "xor" => out_extend(&mut out, vec!["a"]),
        "cp" | "bit" => {}
        "inc" | "dec" => {
            if let Some(op) = ops.first() {
                out_extend(&mut out, atoms_of_operand(op, false));
            }
        }
        "pop" => {
            if let Some(op) = ops.first() {
                out_extend(&mut out, atoms_of_operand(op, false));
            }
            out_extend(&mut out, vec!["sp"]);
        }
        "push" => out_extend(&mut out, vec!["sp"]),
        "neg" | "cpl" | "daa" | "rlca" | "rla" | "rrca" | "rra" => {
            out_extend(&mut out, vec!["a"])
        }
        "rlc" | "rl" | "rrc" | "rr" | "sla" | "sra" | "sll" | "srl" | "set" | "res" => {
            if let Some(op) = ops.last() {
                out_extend(&mut out, atoms_of_operand(op, false));
            }
        }
        "ex" => {
            for op in ops {
                out_extend(&mut out, atoms_of_operand(op, false));
            }
        }
        "exx" => out_extend(&mut out, vec!["b", "c", "d", "e", "h", "l"]),
        "djnz" => out_extend(&mut out, vec!["b"]),
        "ldi" | "ldd" | "ldir" | "lddr" => {
            out_extend(&mut out, vec!["h", "l", "d", "e", "b", "c"])
        }
        "cpi" | "cpd" | "cpir" | "cpdr" => out_extend(&mut out, vec!["h", "l", "b", "c"]),
        "in" => {
            if let Some(op) = ops.first() {
                out_extend(&mut out, atoms_of_operand(op, false));
            }
        }
        "rld" | "rrd" => out_extend(&mut out, vec!["a"]),
        "call" | "rst" | "ret" | "reti" | "retn" => out_extend(&mut out, vec!["sp"]),
        _ => {}
    }
    out
}

fn out_extend(out: &mut Vec<&'static str>, atoms: Vec<&'static str>) {
    for atom in atoms {
        if !out.contains(&atom) {
            out.push(atom);
        }
    }
}

/// Whether the instruction reads any atom of register `r`.
pub fn uses_register(i: &Instruction, r: &str) -> bool {
    let atoms = expand_register(&r.to_lowercase());
    reads(i).iter().any(|a| atoms.contains(a))
}

/// Whether the instruction writes any atom of register `r`.
pub fn changes_register(i: &Instruction, r: &str) -> bool {
    let atoms = expand_register(&r.to_lowercase());
    writes(i).iter().any(|a| atoms.contains(a))
}

pub fn condition_of(i: &Instruction) -> Option<String> {
    match i.operands.first() {
        Some(Operand::Condition(c)) => Some(c.clone()),
        _ => None,
    }
}

pub fn is_unconditional_jump(i: &Instruction) -> bool {
    matches!(i.opcode().as_str(), "jp" | "jr") && condition_of(i).is_none()
}

pub fn is_conditional_jump(i: &Instruction) -> bool {
    match i.opcode().as_str() {
        "jp" | "jr" => condition_of(i).is_some(),
        "djnz" => true,
        _ => false,
    }
}

pub fn is_call(i: &Instruction) -> bool {
    matches!(i.opcode().as_str(), "call" | "rst")
}

pub fn is_return(i: &Instruction) -> bool {
    matches!(i.opcode().as_str(), "ret" | "reti" | "retn")
}

/// Control leaves the straight-line sequence here (used by the liveness
/// scans to give up conservatively).
pub fn is_control_transfer(i: &Instruction) -> bool {
    is_unconditional_jump(i) || is_conditional_jump(i) || is_call(i) || is_return(i)
}

/// Canonical operand count per mnemonic, for the OP_NARGS builtin.
pub fn operand_count(mnemonic: &str) -> Option<usize> {
    match mnemonic {
        "nop" | "halt" | "di" | "ei" | "exx" | "daa" | "cpl" | "neg" | "scf" | "ccf"
        | "rlca" | "rla" | "rrca" | "rra" | "ldi" | "ldd" | "ldir" | "lddr" | "cpi" | "cpd"
        | "cpir" | "cpdr" | "rld" | "rrd" | "ret" | "reti" | "retn" => Some(0),
        "sub" | "and" | "or" | "xor" | "cp" | "inc" | "dec" | "push" | "pop" | "rlc" | "rl"
        | "rrc" | "rr" | "sla" | "sra" | "sll" | "srl" | "djnz" | "rst" | "im" | "jp" | "jr"
        | "call" => Some(1),
        "ld" | "ex" | "add" | "adc" | "sbc" | "bit" | "set" | "res" | "in" | "out" => Some(2),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser;

    fn instr(src: &str) -> Instruction {
        parser::parse_instruction_line(src, src, 1).unwrap()
    }

    #[test]
    fn test_defines_flags_examples() {
        assert_eq!(defines_flags(&instr("sub 1")), flag::ALL);
        assert_eq!(defines_flags(&instr("ld a, b")), 0);
        assert_eq!(defines_flags(&instr("inc a")), flag::ALL & !flag::C);
        assert_eq!(defines_flags(&instr("or a")), flag::ALL);
        assert_eq!(defines_flags(&instr("inc hl")), 0);
        assert_eq!(defines_flags(&instr("add hl, de")), flag::H | flag::N | flag::C);
        assert_eq!(defines_flags(&instr("sbc hl, de")), flag::ALL);
        assert_eq!(defines_flags(&instr("pop af")), flag::ALL);
        assert_eq!(defines_flags(&instr("pop bc")), 0);
    }

    #[test]
    fn test_uses_flags() {
        assert_eq!(uses_flags(&instr("jp z, L1")), flag::Z);
        assert_eq!(uses_flags(&instr("jp nc, L1")), flag::C);
        assert_eq!(uses_flags(&instr("ret m")), flag::S);
        assert_eq!(uses_flags(&instr("adc a, b")), flag::C);
        assert_eq!(uses_flags(&instr("jp L1")), 0);
        assert_eq!(uses_flags(&instr("push af")), flag::ALL);
    }

    #[test]
    fn test_register_reads_writes() {
        let i = instr("ld a, b");
        assert!(uses_register(&i, "b"));
        assert!(!uses_register(&i, "a"));
        assert!(changes_register(&i, "a"));
        assert!(!changes_register(&i, "b"));

        let i = instr("ld (hl), a");
        assert!(uses_register(&i, "hl"));
        assert!(uses_register(&i, "h"));
        assert!(uses_register(&i, "a"));
        assert!(!changes_register(&i, "hl"));

        let i = instr("pop de");
        assert!(changes_register(&i, "d"));
        assert!(changes_register(&i, "de"));

        let i = instr("inc hl");
        assert!(uses_register(&i, "l"));
        assert!(changes_register(&i, "h"));

        let i = instr("ld a, (ix+3)");
        assert!(uses_register(&i, "ix"));
    }

    #[test]
    fn test_control_flow_kinds() {
        assert!(is_unconditional_jump(&instr("jp L1")));
        assert!(is_unconditional_jump(&instr("jr L1")));
        assert!(!is_unconditional_jump(&instr("jp z, L1")));
        assert!(is_conditional_jump(&instr("jr nz, L1")));
        assert!(is_conditional_jump(&instr("djnz L1")));
        assert!(is_call(&instr("call __EQ16")));
        assert!(is_call(&instr("rst 8")));
        assert!(is_return(&instr("ret")));
        assert!(is_return(&instr("ret z")));
    }

    #[test]
    fn test_condition_of() {
        assert_eq!(condition_of(&instr("jp po, L1")), Some("po".to_string()));
        assert_eq!(condition_of(&instr("jp L1")), None);
    }

    #[test]
    fn test_operand_count() {
        assert_eq!(operand_count("ld"), Some(2));
        assert_eq!(operand_count("sub"), Some(1));
        assert_eq!(operand_count("nop"), Some(0));
        assert_eq!(operand_count("frobnicate"), None);
    }
}
