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

use crate::asm::{IndirectBody, Instruction, Line, Operand};
use crate::expr::{Bindings, Value};
use crate::rules::{MnemonicTerm, OptRule, PatternLine, Term};

#[derive(Debug, Clone)]
pub struct MatchResult {
    pub bindings: Bindings,
    /// Raw index of the first matched line.
    pub span_start: usize,
    /// Raw index one past the last matched line.
    pub span_end: usize,
    /// Raw index of each matched instruction, one per pattern line.
    pub slots: Vec<usize>,
}

/// Try to unify `rule.pattern` against the window starting at raw index
/// `start`, which must hold an executable instruction.
pub fn match_rule(lines: &[Line], start: usize, rule: &OptRule) -> Option<MatchResult> {
    let mut bindings = Bindings::new();
    let mut slots = Vec::with_capacity(rule.pattern.len());
    let mut cursor = start;

    for (slot, pat_line) in rule.pattern.iter().enumerate() {
        // Slide over opaque lines; a label splits the window.
        let instr = loop {
            let line = lines.get(cursor)?;
            match line {
                Line::Instr(i) => break i,
                Line::Opaque { .. } => {
                    if line.is_label_barrier() {
                        return None;
                    }
                    cursor += 1;
                }
            }
        };
        // A labeled instruction may open a window but never continue one.
        if slot > 0 && instr.label.is_some() {
            return None;
        }
        match_line(pat_line, instr, &mut bindings)?;
        slots.push(cursor);
        cursor += 1;
    }

    Some(MatchResult {
        bindings,
        span_start: start,
        span_end: cursor,
        slots,
    })
}

fn match_line(pattern: &PatternLine, instr: &Instruction, bindings: &mut Bindings) -> Option<()> {
    match &pattern.mnemonic {
        MnemonicTerm::Literal(m) => {
            if *m != instr.opcode() {
                return None;
            }
        }
        MnemonicTerm::Variable(n) => {
            bind_or_check(bindings, *n, Operand::Symbol(instr.opcode()))?;
        }
    }

    if pattern.operands.len() != instr.operands.len() {
        return None;
    }
    for (term, actual) in pattern.operands.iter().zip(&instr.operands) {
        match term {
            Term::Literal(expected) => {
                if !operand_eq(expected, actual) {
                    return None;
                }
            }
            Term::Variable(n) => bind_or_check(bindings, *n, actual.clone())?,
        }
    }
    Some(())
}

// First occurrence binds, later occurrences must agree with the first.
fn bind_or_check(bindings: &mut Bindings, var: u32, operand: Operand) -> Option<()> {
    match bindings.get(&var) {
        None => {
            bindings.insert(var, Value::Token(operand));
            Some(())
        }
        Some(Value::Token(existing)) => {
            if operand_eq(existing, &operand) {
                Some(())
            } else {
                None
            }
        }
        Some(_) => None,
    }
}

/// Structural operand equality. Register and condition names were already
/// normalized to lower case at parse time; immediates compare by value so
/// `0x0A` matches `10`. A symbol falls back to a case-insensitive text
/// match against register-like tokens, which covers pattern terms parsed
/// without a mnemonic context.
pub fn operand_eq(a: &Operand, b: &Operand) -> bool {
    match (a, b) {
        (Operand::Register(x), Operand::Register(y))
        | (Operand::Pair(x), Operand::Pair(y))
        | (Operand::Condition(x), Operand::Condition(y)) => x == y,
        (Operand::Immediate { value: x, .. }, Operand::Immediate { value: y, .. }) => x == y,
        (Operand::Symbol(x), Operand::Symbol(y)) => x == y,
        (Operand::Indirect(x), Operand::Indirect(y)) => indirect_eq(x, y),
        (Operand::Symbol(s), other) | (other, Operand::Symbol(s)) => match other {
            Operand::Register(r) | Operand::Pair(r) | Operand::Condition(r) => {
                s.to_lowercase() == *r
            }
            _ => false,
        },
        _ => false,
    }
}

fn indirect_eq(a: &IndirectBody, b: &IndirectBody) -> bool {
    match (a, b) {
        (IndirectBody::Reg(x), IndirectBody::Reg(y)) => x == y,
        (IndirectBody::Indexed(xr, xo, _), IndirectBody::Indexed(yr, yo, _)) => {
            xr == yr && xo == yo
        }
        (IndirectBody::Addr(x, _), IndirectBody::Addr(y, _)) => x == y,
        (IndirectBody::Sym(x), IndirectBody::Sym(y)) => x == y,
        _ => false,
    }
}
