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

//! Substitutes bindings into a replacement template and splices the result
//! into the line sequence. Every rendered line is re-tokenized before the
//! splice, so a rule that produces malformed assembly is caught instead of
//! emitted.

use crate::asm::Line;
use crate::errors::OptError;
use crate::expr::Bindings;
use crate::matcher::MatchResult;
use crate::parser;
use crate::rules::{MnemonicTerm, OptRule, Term};

/// Render the replacement block. `Ok(None)` means a substitution could not
/// be rendered (an undefined or boolean value in a required slot); the
/// candidate fails silently. `Err` means the rule produced text that does
/// not tokenize back into assembly, which is a bug in the rule.
pub fn build_replacement(
    rule: &OptRule,
    bindings: &Bindings,
) -> Result<Option<Vec<Line>>, OptError> {
    let mut out = Vec::with_capacity(rule.replacement.len());
    for template in &rule.replacement {
        let mnemonic = match &template.mnemonic {
            MnemonicTerm::Literal(m) => m.clone(),
            MnemonicTerm::Variable(n) => match bindings.get(n).and_then(|v| v.render()) {
                Some(text) => text,
                None => return Ok(None),
            },
        };
        let mut operands = Vec::with_capacity(template.operands.len());
        for term in &template.operands {
            let text = match term {
                Term::Literal(op) => op.render(),
                Term::Variable(n) => match bindings.get(n).and_then(|v| v.render()) {
                    Some(text) => text,
                    None => return Ok(None),
                },
            };
            operands.push(text);
        }

        let text = if operands.is_empty() {
            format!("    {}", mnemonic)
        } else {
            format!("    {} {}", mnemonic, operands.join(", "))
        };
        let instr = parser::parse_instruction_line(text.trim(), &text, 0).map_err(|e| {
            OptError::BadRewrite {
                flag: rule.flag,
                reason: format!("{:?} -> {}", text, e),
            }
        })?;
        out.push(Line::Instr(instr));
    }
    Ok(Some(out))
}

/// Replace the matched span with the replacement lines, reinserting the
/// opaque lines that were interleaved in the window at their original
/// relative positions.
pub fn splice(lines: &mut Vec<Line>, m: &MatchResult, replacement: Vec<Line>) {
    let repl_len = replacement.len();

    // A window may open at a labeled instruction; the label must survive
    // the rewrite, so it is re-emitted as a label-only line.
    let label = m
        .slots
        .first()
        .and_then(|&idx| lines[idx].as_instr())
        .and_then(|instr| instr.label.clone());

    // Opaque lines in the span, keyed by the replacement index they go in
    // front of: the ordinal of the matched instruction that followed them,
    // clamped when the replacement is shorter than the pattern.
    let mut opaques: Vec<(usize, Line)> = Vec::new();
    let mut ordinal = 0usize;
    for idx in m.span_start..m.span_end {
        if m.slots.contains(&idx) {
            ordinal += 1;
        } else {
            opaques.push((ordinal.min(repl_len), lines[idx].clone()));
        }
    }

    let mut segment = Vec::with_capacity(repl_len + opaques.len() + 1);
    if let Some(name) = label {
        segment.push(Line::Opaque {
            kind: crate::asm::OpaqueKind::Label,
            text: format!("{}:", name),
        });
    }
    let mut pending = opaques.into_iter().peekable();
    for (j, line) in replacement.into_iter().enumerate() {
        while pending.peek().is_some_and(|(target, _)| *target <= j) {
            if let Some((_, opaque)) = pending.next() {
                segment.push(opaque);
            }
        }
        segment.push(line);
    }
    segment.extend(pending.map(|(_, l)| l));

    lines.splice(m.span_start..m.span_end, segment);
}
