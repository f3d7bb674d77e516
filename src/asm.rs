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

use std::fmt;

/// Radix an immediate was written in. Preserved so rewrites keep the
/// user-facing spelling of numbers they copy around.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Radix {
    Dec,
    Hex,
    Bin,
    Oct,
}

// Body of a parenthesized memory operand.
#[derive(Debug, Clone, PartialEq)]
pub enum IndirectBody {
    Reg(String),                 // (hl)
    Indexed(String, i64, Radix), // (ix+5) or (iy-3)
    Addr(i64, Radix),            // (0x5C3A)
    Sym(String),                 // (SCREEN)
}

// Represents all possible forms an argument to an instruction can take.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Register(String),  // a, b, c, ... ixh, ixl (stored lower case)
    Pair(String),      // af, bc, de, hl, sp, ix, iy, af'
    Condition(String), // nz, z, nc, c, po, pe, p, m
    Immediate { value: i64, radix: Radix },
    Symbol(String), // label or symbol reference, original spelling kept
    Indirect(IndirectBody),
}

impl Operand {
    /// Canonical rendering, used when a bound token is substituted into a
    /// replacement template.
    pub fn render(&self) -> String {
        match self {
            Operand::Register(r) | Operand::Pair(r) | Operand::Condition(r) => r.clone(),
            Operand::Immediate { value, radix } => render_int(*value, *radix),
            Operand::Symbol(s) => s.clone(),
            Operand::Indirect(body) => match body {
                IndirectBody::Reg(r) => format!("({})", r),
                IndirectBody::Indexed(r, off, radix) => {
                    if *off < 0 {
                        format!("({}-{})", r, render_int(-off, *radix))
                    } else {
                        format!("({}+{})", r, render_int(*off, *radix))
                    }
                }
                IndirectBody::Addr(v, radix) => format!("({})", render_int(*v, *radix)),
                IndirectBody::Sym(s) => format!("({})", s),
            },
        }
    }

    /// Text form used for comparisons in the expression evaluator. Register
    /// names, pairs, conditions and mnemonics all normalize to lower case;
    /// symbol spelling is preserved apart from that rule.
    pub fn canonical_text(&self) -> String {
        match self {
            Operand::Register(r) | Operand::Pair(r) | Operand::Condition(r) => r.to_lowercase(),
            Operand::Symbol(s) => s.to_lowercase(),
            _ => self.render().to_lowercase(),
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render())
    }
}

pub fn render_int(value: i64, radix: Radix) -> String {
    match radix {
        Radix::Dec => format!("{}", value),
        Radix::Hex => {
            if value < 0 {
                format!("-0x{:X}", -value)
            } else {
                format!("0x{:X}", value)
            }
        }
        Radix::Bin => {
            if value < 0 {
                format!("-0b{:b}", -value)
            } else {
                format!("0b{:b}", value)
            }
        }
        Radix::Oct => {
            if value < 0 {
                format!("-{:o}o", -value)
            } else {
                format!("{:o}o", value)
            }
        }
    }
}

// --- Assembly Line Structure ---

// A single executable instruction with its parsed operands. The original
// source text is kept so unmatched lines re-emit byte for byte.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub label: Option<String>,
    pub mnemonic: String, // stored upper-cased, compared lower-cased
    pub operands: Vec<Operand>,
    pub text: String,
}

impl Instruction {
    pub fn opcode(&self) -> String {
        self.mnemonic.to_lowercase()
    }
}

// Lines the optimizer must carry through untouched. The kind matters only
// for window construction (labels split windows) and diagnostics.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OpaqueKind {
    Comment,
    Directive,
    Label,
    Blank,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Line {
    Instr(Instruction),
    Opaque { kind: OpaqueKind, text: String },
}

impl Line {
    pub fn text(&self) -> &str {
        match self {
            Line::Instr(i) => &i.text,
            Line::Opaque { text, .. } => text,
        }
    }

    pub fn as_instr(&self) -> Option<&Instruction> {
        match self {
            Line::Instr(i) => Some(i),
            Line::Opaque { .. } => None,
        }
    }

    /// A window may never extend across a label: either a label-only line
    /// or a label attached to an instruction.
    pub fn is_label_barrier(&self) -> bool {
        match self {
            Line::Instr(i) => i.label.is_some(),
            Line::Opaque { kind, .. } => *kind == OpaqueKind::Label,
        }
    }

    /// The label this line defines, if any.
    pub fn label_name(&self) -> Option<&str> {
        match self {
            Line::Instr(i) => i.label.as_deref(),
            Line::Opaque {
                kind: OpaqueKind::Label,
                text,
            } => {
                let trimmed = text.trim();
                trimmed.find(':').map(|pos| trimmed[..pos].trim())
            }
            Line::Opaque { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_int_radix() {
        assert_eq!(render_int(255, Radix::Dec), "255");
        assert_eq!(render_int(255, Radix::Hex), "0xFF");
        assert_eq!(render_int(5, Radix::Bin), "0b101");
        assert_eq!(render_int(8, Radix::Oct), "10o");
        assert_eq!(render_int(-16, Radix::Hex), "-0x10");
    }

    #[test]
    fn test_operand_render() {
        assert_eq!(Operand::Register("a".to_string()).render(), "a");
        assert_eq!(
            Operand::Indirect(IndirectBody::Reg("hl".to_string())).render(),
            "(hl)"
        );
        assert_eq!(
            Operand::Indirect(IndirectBody::Indexed("ix".to_string(), -3, Radix::Dec)).render(),
            "(ix-3)"
        );
        assert_eq!(
            Operand::Immediate {
                value: 10,
                radix: Radix::Hex
            }
            .render(),
            "0xA"
        );
    }

    #[test]
    fn test_canonical_text_normalizes_case() {
        assert_eq!(Operand::Register("A".to_string()).canonical_text(), "a");
        assert_eq!(Operand::Symbol("Label1".to_string()).canonical_text(), "label1");
    }
}
