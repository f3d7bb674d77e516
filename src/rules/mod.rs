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

//! Loader for the rule DSL. One file holds one rule:
//!
//! ```text
//! OLEVEL: 1
//! OFLAG: 18
//! REPLACE {{ ... pattern lines ... }}
//! DEFINE {{ $N = EXPR ... }}       ;; optional
//! IF {{ EXPR }}                    ;; optional, default true
//! WITH {{ ... replacement lines ... }}
//! ```
//!
//! `;;` starts a line comment anywhere. Blocks open with `{{` at end of a
//! header line and close with `}}`.

pub mod expr_builder;

use crate::asm::Operand;
use crate::errors::OptError;
use crate::expr::Expr;
use crate::parser::{Rule as Gram, ZxParser, line_builder};
use pest::Parser;

#[derive(Debug, Clone, PartialEq)]
pub enum MnemonicTerm {
    Literal(String), // lower-cased
    Variable(u32),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    Literal(Operand),
    Variable(u32),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PatternLine {
    pub mnemonic: MnemonicTerm,
    pub operands: Vec<Term>,
}

#[derive(Debug, Clone)]
pub struct OptRule {
    pub level: u8,
    pub flag: u32,
    pub pattern: Vec<PatternLine>,
    pub defines: Vec<(u32, Expr)>,
    pub predicate: Option<Expr>,
    pub replacement: Vec<PatternLine>,
    pub source: String,
}

impl OptRule {
    pub fn first_mnemonic(&self) -> &MnemonicTerm {
        &self.pattern[0].mnemonic
    }
}

fn load_err(path: &str, reason: impl Into<String>) -> OptError {
    OptError::RuleLoadError {
        path: path.to_string(),
        reason: reason.into(),
    }
}

struct Sections {
    olevel: Option<u8>,
    oflag: Option<u32>,
    replace: Option<Vec<String>>,
    define: Option<Vec<String>>,
    predicate: Option<Vec<String>>,
    with: Option<Vec<String>>,
}

/// Parse one rule file into a rule value.
pub fn parse_rule(path: &str, text: &str) -> Result<OptRule, OptError> {
    let sections = scan_sections(path, text)?;

    let level = sections
        .olevel
        .ok_or_else(|| load_err(path, "missing OLEVEL section"))?;
    let flag = sections
        .oflag
        .ok_or_else(|| load_err(path, "missing OFLAG section"))?;
    let pattern_lines = sections
        .replace
        .ok_or_else(|| load_err(path, "missing REPLACE section"))?;
    let with_lines = sections
        .with
        .ok_or_else(|| load_err(path, "missing WITH section"))?;

    let pattern = build_pattern_block(path, &pattern_lines)?;
    if pattern.is_empty() {
        return Err(load_err(path, "REPLACE pattern is empty"));
    }
    let replacement = build_pattern_block(path, &with_lines)?;

    let mut bound = pattern_variables(&pattern);

    let mut defines = Vec::new();
    for line in sections.define.unwrap_or_default() {
        let (target, expr) = parse_define(path, &line)?;
        check_vars_bound(path, &expr, &bound, "DEFINE")?;
        if bound.contains(&target) {
            return Err(load_err(
                path,
                format!("DEFINE rebinds variable ${}", target),
            ));
        }
        bound.push(target);
        defines.push((target, expr));
    }

    let predicate = match sections.predicate {
        Some(lines) => {
            let joined = lines.join(" ");
            let expr = parse_expression(path, &joined)?;
            check_vars_bound(path, &expr, &bound, "IF")?;
            Some(expr)
        }
        None => None,
    };

    for line in &replacement {
        for var in line_variables(line) {
            if !bound.contains(&var) {
                return Err(load_err(
                    path,
                    format!("WITH references unbound variable ${}", var),
                ));
            }
        }
    }

    Ok(OptRule {
        level,
        flag,
        pattern,
        defines,
        predicate,
        replacement,
        source: path.to_string(),
    })
}

fn scan_sections(path: &str, text: &str) -> Result<Sections, OptError> {
    let mut sections = Sections {
        olevel: None,
        oflag: None,
        replace: None,
        define: None,
        predicate: None,
        with: None,
    };

    // Strip ;; comments up front so headers and block bodies see none.
    let lines: Vec<String> = text
        .lines()
        .map(|l| match l.find(";;") {
            Some(pos) => l[..pos].trim_end().to_string(),
            None => l.to_string(),
        })
        .collect();

    let mut idx = 0;
    while idx < lines.len() {
        let line = lines[idx].trim();
        idx += 1;
        if line.is_empty() {
            continue;
        }

        if let Some(rest) = line.strip_prefix("OLEVEL:") {
            let value = rest
                .trim()
                .parse::<u8>()
                .map_err(|_| load_err(path, format!("invalid OLEVEL value: {}", rest.trim())))?;
            if sections.olevel.replace(value).is_some() {
                return Err(load_err(path, "duplicate OLEVEL section"));
            }
            continue;
        }
        if let Some(rest) = line.strip_prefix("OFLAG:") {
            let value = rest
                .trim()
                .parse::<u32>()
                .map_err(|_| load_err(path, format!("invalid OFLAG value: {}", rest.trim())))?;
            if sections.oflag.replace(value).is_some() {
                return Err(load_err(path, "duplicate OFLAG section"));
            }
            continue;
        }

        let (name, rest) = match line.split_once(char::is_whitespace) {
            Some((n, r)) => (n, r.trim()),
            None => (line, ""),
        };
        let slot = match name {
            "REPLACE" => &mut sections.replace,
            "DEFINE" => &mut sections.define,
            "IF" => &mut sections.predicate,
            "WITH" => &mut sections.with,
            other => return Err(load_err(path, format!("unknown section: {}", other))),
        };
        if slot.is_some() {
            return Err(load_err(path, format!("duplicate {} section", name)));
        }
        let body = collect_block(path, name, rest, &lines, &mut idx)?;
        *slot = Some(body);
    }

    Ok(sections)
}

// Collect the body between {{ and }}. The braces may share a line with the
// header and with the body.
fn collect_block(
    path: &str,
    name: &str,
    rest: &str,
    lines: &[String],
    idx: &mut usize,
) -> Result<Vec<String>, OptError> {
    let after_open = rest
        .strip_prefix("{{")
        .ok_or_else(|| load_err(path, format!("{} section must open with {{{{", name)))?
        .trim();

    let mut body = Vec::new();
    if let Some(inline) = after_open.strip_suffix("}}") {
        let inline = inline.trim();
        if !inline.is_empty() {
            body.push(inline.to_string());
        }
        return Ok(body);
    }
    if !after_open.is_empty() {
        body.push(after_open.to_string());
    }

    while *idx < lines.len() {
        let line = lines[*idx].trim();
        *idx += 1;
        if let Some(head) = line.strip_suffix("}}") {
            let head = head.trim();
            if !head.is_empty() {
                body.push(head.to_string());
            }
            return Ok(body);
        }
        if !line.is_empty() {
            body.push(line.to_string());
        }
    }
    Err(load_err(path, format!("unterminated {} block", name)))
}

fn build_pattern_block(path: &str, lines: &[String]) -> Result<Vec<PatternLine>, OptError> {
    let mut out = Vec::new();
    for line in lines {
        if line.trim().is_empty() {
            continue;
        }
        out.push(parse_pattern_line(path, line)?);
    }
    Ok(out)
}

/// Tokenize one pattern or replacement line. Same rules as the instruction
/// tokenizer, with `$N` accepted as a variable term in any slot.
pub fn parse_pattern_line(path: &str, line: &str) -> Result<PatternLine, OptError> {
    let pairs = ZxParser::parse(Gram::pattern_line, line.trim())
        .map_err(|e| load_err(path, format!("malformed pattern line {:?}: {}", line, e)))?;

    let mut mnemonic = None;
    let mut operands = Vec::new();
    let mut mnemonic_lower = String::new();

    for pair in pairs.into_iter().next().into_iter().flat_map(|p| p.into_inner()) {
        match pair.as_rule() {
            Gram::var if mnemonic.is_none() => {
                mnemonic = Some(MnemonicTerm::Variable(var_number(path, pair.as_str())?));
            }
            Gram::identifier if mnemonic.is_none() => {
                mnemonic_lower = pair.as_str().to_lowercase();
                mnemonic = Some(MnemonicTerm::Literal(mnemonic_lower.clone()));
            }
            Gram::pat_operand => {
                let position = operands.len();
                let inner = pair
                    .into_inner()
                    .next()
                    .ok_or_else(|| load_err(path, "empty operand term"))?;
                match inner.as_rule() {
                    Gram::var => {
                        operands.push(Term::Variable(var_number(path, inner.as_str())?));
                    }
                    _ => {
                        let op = build_literal_operand(path, inner, &mnemonic_lower, position)?;
                        operands.push(Term::Literal(op));
                    }
                }
            }
            _ => {}
        }
    }

    let mnemonic = mnemonic.ok_or_else(|| load_err(path, "pattern line with no mnemonic"))?;
    Ok(PatternLine { mnemonic, operands })
}

fn build_literal_operand(
    path: &str,
    inner: pest::iterators::Pair<Gram>,
    mnemonic: &str,
    position: usize,
) -> Result<Operand, OptError> {
    match inner.as_rule() {
        Gram::identifier => Ok(line_builder::classify_ident(inner.as_str(), mnemonic, position)),
        Gram::pat_signed => {
            let (value, radix) =
                line_builder::build_signed(inner, 0).map_err(|e| load_err(path, e.to_string()))?;
            Ok(Operand::Immediate { value, radix })
        }
        Gram::pat_indirect => {
            let body = line_builder::build_indirect(inner, 0)
                .map_err(|e| load_err(path, e.to_string()))?;
            Ok(Operand::Indirect(body))
        }
        other => Err(load_err(path, format!("unexpected operand rule: {:?}", other))),
    }
}

fn parse_define(path: &str, line: &str) -> Result<(u32, Expr), OptError> {
    let pairs = ZxParser::parse(Gram::define_line, line.trim())
        .map_err(|e| load_err(path, format!("malformed DEFINE line {:?}: {}", line, e)))?;
    let mut target = None;
    let mut expr = None;
    for pair in pairs.into_iter().next().into_iter().flat_map(|p| p.into_inner()) {
        match pair.as_rule() {
            Gram::var => target = Some(var_number(path, pair.as_str())?),
            Gram::expression => expr = Some(expr_builder::build_expression(path, pair)?),
            _ => {}
        }
    }
    match (target, expr) {
        (Some(t), Some(e)) => Ok((t, e)),
        _ => Err(load_err(path, format!("malformed DEFINE line {:?}", line))),
    }
}

fn parse_expression(path: &str, text: &str) -> Result<Expr, OptError> {
    let pairs = ZxParser::parse(Gram::expr_input, text.trim())
        .map_err(|e| load_err(path, format!("malformed expression {:?}: {}", text, e)))?;
    for pair in pairs.into_iter().next().into_iter().flat_map(|p| p.into_inner()) {
        if pair.as_rule() == Gram::expression {
            return expr_builder::build_expression(path, pair);
        }
    }
    Err(load_err(path, format!("malformed expression {:?}", text)))
}

pub fn var_number(path: &str, text: &str) -> Result<u32, OptError> {
    text[1..]
        .parse::<u32>()
        .map_err(|_| load_err(path, format!("invalid variable reference: {}", text)))
}

fn line_variables(line: &PatternLine) -> Vec<u32> {
    let mut out = Vec::new();
    if let MnemonicTerm::Variable(n) = line.mnemonic {
        out.push(n);
    }
    for term in &line.operands {
        if let Term::Variable(n) = term {
            out.push(*n);
        }
    }
    out
}

fn pattern_variables(pattern: &[PatternLine]) -> Vec<u32> {
    let mut out = Vec::new();
    for line in pattern {
        for var in line_variables(line) {
            if !out.contains(&var) {
                out.push(var);
            }
        }
    }
    out
}

fn check_vars_bound(
    path: &str,
    expr: &Expr,
    bound: &[u32],
    section: &str,
) -> Result<(), OptError> {
    let mut vars = Vec::new();
    expr.variables(&mut vars);
    for var in vars {
        if !bound.contains(&var) {
            return Err(load_err(
                path,
                format!("{} references unbound variable ${}", section, var),
            ));
        }
    }
    Ok(())
}
