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

use crate::asm::{IndirectBody, Instruction, Operand, Radix};
use crate::errors::OptError;
use crate::parser::Rule;
use pest::iterators::{Pair, Pairs};

pub const REG8: &[&str] = &[
    "a", "b", "c", "d", "e", "h", "l", "i", "r", "f", "ixh", "ixl", "iyh", "iyl",
];
pub const PAIRS: &[&str] = &["af", "bc", "de", "hl", "sp", "ix", "iy", "af'"];
pub const CONDITIONS: &[&str] = &["nz", "z", "nc", "c", "po", "pe", "p", "m"];

// Mnemonics whose first operand slot is a condition code when it names one.
const BRANCHES: &[&str] = &["jp", "jr", "call", "ret"];

// Build an Instruction from a parsed asm_line
pub fn build_instruction(
    pairs: Pairs<Rule>,
    raw: &str,
    line_number: usize,
) -> Result<Instruction, OptError> {
    let mut label = None;
    let mut mnemonic = String::new();
    let mut operands = Vec::new();

    for pair in pairs.flatten() {
        match pair.as_rule() {
            Rule::label_def => {
                label = pair.clone().into_inner().next().map(|p| p.as_str().to_string());
            }
            Rule::asm_instr => {
                let mut inner = pair.clone().into_inner();
                let mn = inner.next().ok_or_else(|| OptError::AsmError {
                    line: line_number,
                    reason: "instruction line with no mnemonic".to_string(),
                })?;
                mnemonic = mn.as_str().to_uppercase();
                let mnemonic_lower = mn.as_str().to_lowercase();
                for (position, op_pair) in inner.enumerate() {
                    operands.push(build_operand(op_pair, &mnemonic_lower, position, line_number)?);
                }
            }
            _ => {}
        }
    }

    if mnemonic.is_empty() {
        return Err(OptError::AsmError {
            line: line_number,
            reason: "instruction line with no mnemonic".to_string(),
        });
    }

    Ok(Instruction {
        label,
        mnemonic,
        operands,
        text: raw.to_string(),
    })
}

// Build an Operand from an asm_operand pair
pub fn build_operand(
    pair: Pair<Rule>,
    mnemonic: &str,
    position: usize,
    line_number: usize,
) -> Result<Operand, OptError> {
    let inner = pair
        .into_inner()
        .next()
        .ok_or_else(|| OptError::AsmError {
            line: line_number,
            reason: "expected an inner operand rule".to_string(),
        })?;
    match inner.as_rule() {
        Rule::identifier => Ok(classify_ident(inner.as_str(), mnemonic, position)),
        Rule::asm_signed | Rule::pat_signed => {
            let (value, radix) = build_signed(inner, line_number)?;
            Ok(Operand::Immediate { value, radix })
        }
        Rule::asm_indirect | Rule::pat_indirect => {
            Ok(Operand::Indirect(build_indirect(inner, line_number)?))
        }
        other => Err(OptError::AsmError {
            line: line_number,
            reason: format!("unexpected operand rule: {:?}", other),
        }),
    }
}

/// Decide what a bare identifier denotes given its slot. A condition code
/// is only recognized in the first operand of a branch mnemonic, which is
/// how "c" disambiguates between carry and the register.
pub fn classify_ident(text: &str, mnemonic: &str, position: usize) -> Operand {
    let lower = text.to_lowercase();
    if position == 0 && BRANCHES.contains(&mnemonic) && CONDITIONS.contains(&lower.as_str()) {
        return Operand::Condition(lower);
    }
    if REG8.contains(&lower.as_str()) {
        return Operand::Register(lower);
    }
    if PAIRS.contains(&lower.as_str()) {
        return Operand::Pair(lower);
    }
    Operand::Symbol(text.to_string())
}

pub fn build_indirect(pair: Pair<Rule>, line_number: usize) -> Result<IndirectBody, OptError> {
    let inner = pair
        .into_inner()
        .next()
        .ok_or_else(|| OptError::AsmError {
            line: line_number,
            reason: "expected a body inside an indirect operand".to_string(),
        })?;
    match inner.as_rule() {
        Rule::identifier => {
            let lower = inner.as_str().to_lowercase();
            if REG8.contains(&lower.as_str()) || PAIRS.contains(&lower.as_str()) {
                Ok(IndirectBody::Reg(lower))
            } else {
                Ok(IndirectBody::Sym(inner.as_str().to_string()))
            }
        }
        Rule::asm_signed | Rule::pat_signed => {
            let (value, radix) = build_signed(inner, line_number)?;
            Ok(IndirectBody::Addr(value, radix))
        }
        Rule::asm_index | Rule::pat_index => {
            let mut parts = inner.into_inner();
            let reg = parts.next().ok_or_else(|| OptError::AsmError {
                line: line_number,
                reason: "expected a register in an indexed operand".to_string(),
            })?;
            let sign = parts.next().ok_or_else(|| OptError::AsmError {
                line: line_number,
                reason: "expected a sign in an indexed operand".to_string(),
            })?;
            let num = parts.next().ok_or_else(|| OptError::AsmError {
                line: line_number,
                reason: "expected an offset in an indexed operand".to_string(),
            })?;
            let (value, radix) = build_number(num, line_number)?;
            let offset = if sign.as_str() == "-" { -value } else { value };
            Ok(IndirectBody::Indexed(
                reg.as_str().to_lowercase(),
                offset,
                radix,
            ))
        }
        other => Err(OptError::AsmError {
            line: line_number,
            reason: format!("unexpected indirect body rule: {:?}", other),
        }),
    }
}

// asm_signed / pat_signed -> value with radix
pub fn build_signed(pair: Pair<Rule>, line_number: usize) -> Result<(i64, Radix), OptError> {
    let mut negative = false;
    let mut result = None;
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::minus => negative = true,
            Rule::asm_number | Rule::pat_number => {
                let num = inner.into_inner().next().ok_or_else(|| OptError::AsmError {
                    line: line_number,
                    reason: "expected a numeric literal".to_string(),
                })?;
                result = Some(build_number_literal(num, line_number)?);
            }
            _ => {}
        }
    }
    let (value, radix) = result.ok_or_else(|| OptError::AsmError {
        line: line_number,
        reason: "expected a numeric literal".to_string(),
    })?;
    Ok((if negative { -value } else { value }, radix))
}

// asm_number / pat_number wrapper -> value with radix
pub fn build_number(pair: Pair<Rule>, line_number: usize) -> Result<(i64, Radix), OptError> {
    let inner = pair
        .into_inner()
        .next()
        .ok_or_else(|| OptError::AsmError {
            line: line_number,
            reason: "expected a numeric literal".to_string(),
        })?;
    build_number_literal(inner, line_number)
}

fn build_number_literal(pair: Pair<Rule>, line_number: usize) -> Result<(i64, Radix), OptError> {
    let text = pair.as_str();
    let bad = |t: &str| OptError::AsmError {
        line: line_number,
        reason: format!("invalid numeric literal: {}", t),
    };
    match pair.as_rule() {
        Rule::hex_literal => i64::from_str_radix(&text[2..], 16)
            .map(|v| (v, Radix::Hex))
            .map_err(|_| bad(text)),
        Rule::dollar_hex_literal => i64::from_str_radix(&text[1..], 16)
            .map(|v| (v, Radix::Hex))
            .map_err(|_| bad(text)),
        Rule::bin_literal => i64::from_str_radix(&text[2..], 2)
            .map(|v| (v, Radix::Bin))
            .map_err(|_| bad(text)),
        Rule::oct_literal => i64::from_str_radix(&text[..text.len() - 1], 8)
            .map(|v| (v, Radix::Oct))
            .map_err(|_| bad(text)),
        Rule::dec_literal => text.parse::<i64>().map(|v| (v, Radix::Dec)).map_err(|_| bad(text)),
        other => Err(OptError::AsmError {
            line: line_number,
            reason: format!("unexpected number rule: {:?}", other),
        }),
    }
}
