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

pub mod line_builder;

use crate::asm::{Line, OpaqueKind};
use crate::errors::OptError;
use pest::Parser;
use pest_derive::Parser;

// Derive the parser from our grammar file. The same grammar serves the
// assembly tokenizer and the rule DSL (entry rules pattern_line,
// define_line, expr_input).
#[derive(Parser)]
#[grammar = "grammar.pest"]
pub struct ZxParser;

// Directive keywords the optimizer treats as opaque pass-through.
const DIRECTIVES: &[&str] = &[
    "org", "defb", "defw", "defs", "defm", "equ", "proc", "local", "end", "endp",
];

/// Parse a full assembly source into lines. Comments, directives, blank
/// lines and label-only lines become opaque tokens; everything else is
/// tokenized into an Instruction.
pub fn parse_source(source: &str) -> Result<Vec<Line>, OptError> {
    let mut lines = Vec::new();
    for (idx, raw) in source.lines().enumerate() {
        lines.push(classify_line(raw, idx + 1)?);
    }
    Ok(lines)
}

fn classify_line(raw: &str, line_number: usize) -> Result<Line, OptError> {
    let trimmed = raw.trim();

    if trimmed.is_empty() {
        return Ok(Line::Opaque {
            kind: OpaqueKind::Blank,
            text: raw.to_string(),
        });
    }
    if trimmed.starts_with(';') {
        return Ok(Line::Opaque {
            kind: OpaqueKind::Comment,
            text: raw.to_string(),
        });
    }
    // Preprocessor-style markers such as #line pass through untouched.
    if trimmed.starts_with('#') {
        return Ok(Line::Opaque {
            kind: OpaqueKind::Directive,
            text: raw.to_string(),
        });
    }

    // Inline comments are not part of the parsed instruction.
    let code = match trimmed.find(';') {
        Some(pos) => trimmed[..pos].trim_end(),
        None => trimmed,
    };
    if code.is_empty() {
        return Ok(Line::Opaque {
            kind: OpaqueKind::Comment,
            text: raw.to_string(),
        });
    }

    // Split off a leading "label:" if present so directive detection sees
    // the first real token.
    let (label, rest) = split_label(code);

    if rest.is_empty() {
        return Ok(Line::Opaque {
            kind: OpaqueKind::Label,
            text: raw.to_string(),
        });
    }

    let mut words = rest.split_whitespace();
    let first = words.next().unwrap_or("").to_lowercase();
    let second = words.next().unwrap_or("").to_lowercase();
    if DIRECTIVES.contains(&first.as_str()) || second == "equ" {
        // A labeled directive still splits windows, so the label kind wins.
        let kind = if label.is_some() {
            OpaqueKind::Label
        } else {
            OpaqueKind::Directive
        };
        return Ok(Line::Opaque {
            kind,
            text: raw.to_string(),
        });
    }

    let instr = parse_instruction_line(code, raw, line_number)?;
    Ok(Line::Instr(instr))
}

// "label: ld a, b" -> (Some("label"), "ld a, b"). Only splits when the
// prefix is a bare identifier; anything else is left for the grammar.
fn split_label(code: &str) -> (Option<&str>, &str) {
    if let Some(pos) = code.find(':') {
        let head = code[..pos].trim();
        if !head.is_empty()
            && head
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
            && !head.chars().next().is_some_and(|c| c.is_ascii_digit())
        {
            return (Some(head), code[pos + 1..].trim());
        }
    }
    (None, code)
}

/// Tokenize one instruction line (with optional label) into an Instruction.
pub fn parse_instruction_line(
    code: &str,
    raw: &str,
    line_number: usize,
) -> Result<crate::asm::Instruction, OptError> {
    let pairs = ZxParser::parse(Rule::asm_line, code).map_err(|e| OptError::AsmError {
        line: line_number,
        reason: format!("unparseable instruction: {}", e),
    })?;
    line_builder::build_instruction(pairs, raw, line_number)
}

// ------------- unit tests -------------
