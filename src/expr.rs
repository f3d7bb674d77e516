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

//! Tagged values and the evaluator for rule predicates and DEFINE
//! assignments. Boolean `&&`/`||` carry truthiness semantics: `&&` yields
//! its right operand when the left is truthy, `||` yields the first truthy
//! operand. This lets rules compute token values from comparisons, e.g.
//! `$4 = (($2 == nz) && z) || nz`.

use crate::asm::{Line, Operand};
use crate::oracle;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Bool(bool),
    Str(String),
    Token(Operand),
    Undefined,
}

impl Value {
    pub fn truthy(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Str(s) => !s.is_empty(),
            Value::Token(_) => true,
            Value::Undefined => false,
        }
    }

    /// Rendering used by the rewriter when the value is substituted into a
    /// replacement template. None means the substitution cannot be
    /// rendered and the candidate must be dropped.
    pub fn render(&self) -> Option<String> {
        match self {
            Value::Int(n) => Some(format!("{}", n)),
            Value::Str(s) => Some(s.clone()),
            Value::Token(op) => Some(op.render()),
            Value::Bool(_) | Value::Undefined => None,
        }
    }

    fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            Value::Token(Operand::Immediate { value, .. }) => Some(*value),
            _ => None,
        }
    }

    fn as_text(&self) -> Option<String> {
        match self {
            Value::Str(s) => Some(s.clone()),
            Value::Token(op) => Some(op.canonical_text()),
            _ => None,
        }
    }
}

/// Equality across tags: immediates and ints compare numerically, tokens
/// and strings compare by normalized text, bools by value. Anything else
/// is incomparable and yields false for both `==` and `!=`.
fn value_eq(a: &Value, b: &Value) -> Option<bool> {
    if let (Some(x), Some(y)) = (a.as_int(), b.as_int()) {
        return Some(x == y);
    }
    if let (Value::Bool(x), Value::Bool(y)) = (a, b) {
        return Some(x == y);
    }
    if matches!(a, Value::Undefined) || matches!(b, Value::Undefined) {
        return None;
    }
    if let (Some(x), Some(y)) = (a.as_text(), b.as_text()) {
        return Some(x == y);
    }
    None
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Builtin {
    IsRegister,
    IsIndir,
    IsLabel,
    IsNumeric,
    IsInt,
    IsRequired,
    IsFlagUnusedBefore,
    OpFlagsUnusedAt,
    OpNargs,
    Lower,
    Upper,
    Concat,
}

impl Builtin {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "IS_REGISTER" => Some(Builtin::IsRegister),
            "IS_INDIR" => Some(Builtin::IsIndir),
            "IS_LABEL" => Some(Builtin::IsLabel),
            "IS_NUMERIC" => Some(Builtin::IsNumeric),
            "IS_INT" => Some(Builtin::IsInt),
            "IS_REQUIRED" => Some(Builtin::IsRequired),
            "IS_FLAG_UNUSED_BEFORE" => Some(Builtin::IsFlagUnusedBefore),
            "OP_FLAGS_UNUSED_AT" => Some(Builtin::OpFlagsUnusedAt),
            "OP_NARGS" => Some(Builtin::OpNargs),
            "LOWER" => Some(Builtin::Lower),
            "UPPER" => Some(Builtin::Upper),
            "CONCAT" => Some(Builtin::Concat),
            _ => None,
        }
    }

    pub fn arity(self) -> usize {
        match self {
            Builtin::Concat => 2,
            _ => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Int(i64),
    Str(String),
    Token(Operand),
    Var(u32),
    Not(Box<Expr>),
    Eq(Box<Expr>, Box<Expr>),
    Ne(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Call(Builtin, Vec<Expr>),
}

impl Expr {
    /// Variables referenced anywhere in the expression, for load-time
    /// binding checks.
    pub fn variables(&self, out: &mut Vec<u32>) {
        match self {
            Expr::Var(n) => out.push(*n),
            Expr::Not(e) => e.variables(out),
            Expr::Eq(a, b) | Expr::Ne(a, b) | Expr::And(a, b) | Expr::Or(a, b) => {
                a.variables(out);
                b.variables(out);
            }
            Expr::Call(_, args) => {
                for a in args {
                    a.variables(out);
                }
            }
            _ => {}
        }
    }
}

pub type Bindings = BTreeMap<u32, Value>;

/// Everything a predicate can see: the bindings from the match plus the
/// instruction stream after the matched window, for the liveness builtins.
pub struct EvalCtx<'a> {
    pub bindings: &'a Bindings,
    pub lines: &'a [Line],
    /// Raw index of the first line after the matched window.
    pub resume: usize,
}

pub fn eval(expr: &Expr, ctx: &EvalCtx) -> Value {
    match expr {
        Expr::Int(n) => Value::Int(*n),
        Expr::Str(s) => Value::Str(s.clone()),
        Expr::Token(op) => Value::Token(op.clone()),
        Expr::Var(n) => ctx.bindings.get(n).cloned().unwrap_or(Value::Undefined),
        Expr::Not(e) => Value::Bool(!eval(e, ctx).truthy()),
        Expr::Eq(a, b) => Value::Bool(value_eq(&eval(a, ctx), &eval(b, ctx)) == Some(true)),
        Expr::Ne(a, b) => Value::Bool(value_eq(&eval(a, ctx), &eval(b, ctx)) == Some(false)),
        Expr::And(a, b) => {
            let left = eval(a, ctx);
            if left.truthy() {
                eval(b, ctx)
            } else {
                Value::Bool(false)
            }
        }
        Expr::Or(a, b) => {
            let left = eval(a, ctx);
            if left.truthy() { left } else { eval(b, ctx) }
        }
        Expr::Call(builtin, args) => {
            let values: Vec<Value> = args.iter().map(|a| eval(a, ctx)).collect();
            call_builtin(*builtin, &values, ctx)
        }
    }
}

fn call_builtin(builtin: Builtin, args: &[Value], ctx: &EvalCtx) -> Value {
    match builtin {
        Builtin::IsRegister => Value::Bool(matches!(
            args.first(),
            Some(Value::Token(Operand::Register(_))) | Some(Value::Token(Operand::Pair(_)))
        )),
        Builtin::IsIndir => Value::Bool(matches!(
            args.first(),
            Some(Value::Token(Operand::Indirect(_)))
        )),
        Builtin::IsLabel => Value::Bool(matches!(
            args.first(),
            Some(Value::Token(Operand::Symbol(_)))
        )),
        Builtin::IsNumeric => Value::Bool(matches!(
            args.first(),
            Some(Value::Token(Operand::Immediate { .. })) | Some(Value::Int(_))
        )),
        Builtin::IsInt => Value::Bool(matches!(
            args.first(),
            Some(Value::Int(_)) | Some(Value::Token(Operand::Immediate { .. }))
        )),
        Builtin::IsRequired => match args.first() {
            Some(Value::Token(Operand::Register(r))) | Some(Value::Token(Operand::Pair(r))) => {
                Value::Bool(is_required(ctx, r))
            }
            _ => Value::Bool(false),
        },
        Builtin::IsFlagUnusedBefore => match args.first().and_then(Value::as_text) {
            Some(name) => match oracle::flag_from_name(&name) {
                Some(mask) => Value::Bool(flag_unused_from(ctx.lines, ctx.resume, mask)),
                None => Value::Bool(false),
            },
            None => Value::Bool(false),
        },
        Builtin::OpFlagsUnusedAt => match args.first() {
            Some(Value::Token(Operand::Symbol(name))) => {
                Value::Bool(flags_unused_at_label(ctx.lines, name))
            }
            _ => Value::Bool(false),
        },
        Builtin::OpNargs => match args.first().and_then(Value::as_text) {
            Some(name) => match oracle::operand_count(&name) {
                Some(n) => Value::Int(n as i64),
                None => Value::Undefined,
            },
            None => Value::Undefined,
        },
        Builtin::Lower => match args.first().and_then(Value::as_text) {
            Some(s) => Value::Str(s.to_lowercase()),
            None => Value::Undefined,
        },
        Builtin::Upper => match args.first().and_then(Value::as_text) {
            Some(s) => Value::Str(s.to_uppercase()),
            None => Value::Undefined,
        },
        Builtin::Concat => {
            match (
                args.first().and_then(Value::as_text),
                args.get(1).and_then(Value::as_text),
            ) {
                (Some(a), Some(b)) => Value::Str(format!("{}{}", a, b)),
                _ => Value::Undefined,
            }
        }
    }
}

// --- liveness scans ---
//
// All three scans walk executable lines forward and give up conservatively
// at labels, control transfers, and the end of the unit.

/// Is register (or the flags register "f") conservatively live after the
/// matched window?
fn is_required(ctx: &EvalCtx, name: &str) -> bool {
    let atoms = oracle::expand_register(&name.to_lowercase());
    if atoms.is_empty() {
        return true;
    }
    let mut pending: Vec<&str> = atoms.iter().filter(|a| **a != "f").copied().collect();
    let mut flags_pending = atoms.contains(&"f");
    for line in &ctx.lines[ctx.resume.min(ctx.lines.len())..] {
        let instr = match line {
            Line::Instr(i) => i,
            Line::Opaque { .. } => {
                if line.is_label_barrier() {
                    return true;
                }
                continue;
            }
        };
        if instr.label.is_some() {
            return true;
        }
        let reads = oracle::reads(instr);
        if reads.iter().any(|r| pending.contains(r)) {
            return true;
        }
        if flags_pending && oracle::uses_flags(instr) != 0 {
            return true;
        }
        if oracle::is_control_transfer(instr) {
            return true;
        }
        let writes = oracle::writes(instr);
        pending.retain(|a| !writes.contains(a));
        if flags_pending && oracle::defines_flags(instr) == crate::oracle::flag::ALL {
            flags_pending = false;
        }
        if pending.is_empty() && !flags_pending {
            return false;
        }
    }
    true
}

/// True when every flag in `mask` is redefined before any instruction
/// reads it.
fn flag_unused_from(lines: &[Line], start: usize, mask: u8) -> bool {
    let mut pending = mask;
    for line in &lines[start.min(lines.len())..] {
        let instr = match line {
            Line::Instr(i) => i,
            Line::Opaque { .. } => {
                if line.is_label_barrier() {
                    return false;
                }
                continue;
            }
        };
        if instr.label.is_some() {
            return false;
        }
        if oracle::uses_flags(instr) & pending != 0 {
            return false;
        }
        pending &= !oracle::defines_flags(instr);
        if pending == 0 {
            return true;
        }
        if oracle::is_control_transfer(instr) {
            return false;
        }
    }
    false
}

/// Locate `label` in the unit and check that no flag is consumed from
/// there before being redefined. An absent (external) label answers false.
fn flags_unused_at_label(lines: &[Line], label: &str) -> bool {
    for (idx, line) in lines.iter().enumerate() {
        let start = match line {
            Line::Instr(i) if i.label.as_deref() == Some(label) => idx,
            Line::Opaque { .. } if line.label_name() == Some(label) => idx + 1,
            _ => continue,
        };
        return flag_unused_from(lines, start, crate::oracle::flag::ALL);
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::Radix;
    use crate::parser;

    fn ctx_empty<'a>(bindings: &'a Bindings, lines: &'a [Line]) -> EvalCtx<'a> {
        EvalCtx {
            bindings,
            lines,
            resume: lines.len(),
        }
    }

    fn token(text: &str) -> Value {
        Value::Token(crate::parser::line_builder::classify_ident(text, "", 1))
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::Bool(false).truthy());
        assert!(!Value::Int(0).truthy());
        assert!(!Value::Undefined.truthy());
        assert!(!Value::Str(String::new()).truthy());
        assert!(Value::Int(3).truthy());
        assert!(token("nz").truthy());
    }

    #[test]
    fn test_condition_negation_define() {
        // $4 = (($2 == nz) && z) || nz
        let expr = Expr::Or(
            Box::new(Expr::And(
                Box::new(Expr::Eq(
                    Box::new(Expr::Var(2)),
                    Box::new(Expr::Token(Operand::Symbol("nz".to_string()))),
                )),
                Box::new(Expr::Token(Operand::Symbol("z".to_string()))),
            )),
            Box::new(Expr::Token(Operand::Symbol("nz".to_string()))),
        );

        let mut bindings = Bindings::new();
        bindings.insert(2, Value::Token(Operand::Condition("nz".to_string())));
        let lines: Vec<Line> = Vec::new();
        let v = eval(&expr, &ctx_empty(&bindings, &lines));
        assert_eq!(v, Value::Token(Operand::Symbol("z".to_string())));

        let mut bindings = Bindings::new();
        bindings.insert(2, Value::Token(Operand::Condition("z".to_string())));
        let v = eval(&expr, &ctx_empty(&bindings, &lines));
        assert_eq!(v, Value::Token(Operand::Symbol("nz".to_string())));
    }

    #[test]
    fn test_eq_across_tags_is_false_both_ways() {
        let lines: Vec<Line> = Vec::new();
        let bindings = Bindings::new();
        let ctx = ctx_empty(&bindings, &lines);
        let eq = Expr::Eq(Box::new(Expr::Int(1)), Box::new(Expr::Str("x".to_string())));
        let ne = Expr::Ne(Box::new(Expr::Int(1)), Box::new(Expr::Str("x".to_string())));
        assert_eq!(eval(&eq, &ctx), Value::Bool(false));
        assert_eq!(eval(&ne, &ctx), Value::Bool(false));
    }

    #[test]
    fn test_numeric_eq_ignores_radix() {
        let a = Value::Token(Operand::Immediate {
            value: 10,
            radix: Radix::Hex,
        });
        let b = Value::Int(10);
        assert_eq!(value_eq(&a, &b), Some(true));
    }

    #[test]
    fn test_token_eq_normalizes_case() {
        let a = Value::Token(Operand::Register("a".to_string()));
        let b = Value::Token(Operand::Symbol("A".to_string()));
        assert_eq!(value_eq(&a, &b), Some(true));
    }

    #[test]
    fn test_kind_probes() {
        let lines: Vec<Line> = Vec::new();
        let mut bindings = Bindings::new();
        bindings.insert(1, token("hl"));
        bindings.insert(2, Value::Token(Operand::Symbol("__LABEL0".to_string())));
        bindings.insert(
            3,
            Value::Token(Operand::Immediate {
                value: 5,
                radix: Radix::Dec,
            }),
        );
        let ctx = ctx_empty(&bindings, &lines);

        let call = |b: Builtin, var: u32| {
            eval(&Expr::Call(b, vec![Expr::Var(var)]), &ctx)
        };
        assert_eq!(call(Builtin::IsRegister, 1), Value::Bool(true));
        assert_eq!(call(Builtin::IsRegister, 2), Value::Bool(false));
        assert_eq!(call(Builtin::IsLabel, 2), Value::Bool(true));
        assert_eq!(call(Builtin::IsNumeric, 3), Value::Bool(true));
        assert_eq!(call(Builtin::IsNumeric, 1), Value::Bool(false));
        // Probing an unbound variable is silent, never an error.
        assert_eq!(call(Builtin::IsRegister, 9), Value::Bool(false));
    }

    #[test]
    fn test_string_builtins() {
        let lines: Vec<Line> = Vec::new();
        let bindings = Bindings::new();
        let ctx = ctx_empty(&bindings, &lines);
        let lower = Expr::Call(Builtin::Lower, vec![Expr::Str("ABC".to_string())]);
        assert_eq!(eval(&lower, &ctx), Value::Str("abc".to_string()));
        let concat = Expr::Call(
            Builtin::Concat,
            vec![Expr::Str("ab".to_string()), Expr::Str("cd".to_string())],
        );
        assert_eq!(eval(&concat, &ctx), Value::Str("abcd".to_string()));
    }

    #[test]
    fn test_is_required_register() {
        let lines = parser::parse_source("ld b, a\nld a, 1\n").unwrap();
        let mut bindings = Bindings::new();
        bindings.insert(1, token("a"));
        // "a" is read by the first following instruction.
        let ctx = EvalCtx {
            bindings: &bindings,
            lines: &lines,
            resume: 0,
        };
        assert_eq!(
            eval(&Expr::Call(Builtin::IsRequired, vec![Expr::Var(1)]), &ctx),
            Value::Bool(true)
        );
        // From after "ld b, a", the register is overwritten before any read.
        let ctx = EvalCtx {
            bindings: &bindings,
            lines: &lines,
            resume: 1,
        };
        assert_eq!(
            eval(&Expr::Call(Builtin::IsRequired, vec![Expr::Var(1)]), &ctx),
            Value::Bool(false)
        );
    }

    #[test]
    fn test_is_required_flags() {
        let mut bindings = Bindings::new();
        bindings.insert(1, token("f"));
        let probe = Expr::Call(Builtin::IsRequired, vec![Expr::Var(1)]);

        // A conditional jump consumes the flags.
        let lines = parser::parse_source("jp z, L1\n").unwrap();
        let ctx = EvalCtx {
            bindings: &bindings,
            lines: &lines,
            resume: 0,
        };
        assert_eq!(eval(&probe, &ctx), Value::Bool(true));

        // A full redefinition kills them.
        let lines = parser::parse_source("or a\nld a, b\n").unwrap();
        let ctx = EvalCtx {
            bindings: &bindings,
            lines: &lines,
            resume: 0,
        };
        assert_eq!(eval(&probe, &ctx), Value::Bool(false));

        // End of unit is conservative.
        let lines = parser::parse_source("ld a, b\n").unwrap();
        let ctx = EvalCtx {
            bindings: &bindings,
            lines: &lines,
            resume: 0,
        };
        assert_eq!(eval(&probe, &ctx), Value::Bool(true));
    }

    #[test]
    fn test_flag_unused_before() {
        let mut bindings = Bindings::new();
        bindings.insert(1, token("z"));
        let probe = Expr::Call(Builtin::IsFlagUnusedBefore, vec![Expr::Var(1)]);

        let lines = parser::parse_source("or a\nret\n").unwrap();
        let ctx = EvalCtx {
            bindings: &bindings,
            lines: &lines,
            resume: 0,
        };
        assert_eq!(eval(&probe, &ctx), Value::Bool(true));

        let lines = parser::parse_source("jp z, L1\n").unwrap();
        let ctx = EvalCtx {
            bindings: &bindings,
            lines: &lines,
            resume: 0,
        };
        assert_eq!(eval(&probe, &ctx), Value::Bool(false));
    }

    #[test]
    fn test_flags_unused_at_label() {
        let mut bindings = Bindings::new();
        bindings.insert(1, Value::Token(Operand::Symbol("L1".to_string())));
        let probe = Expr::Call(Builtin::OpFlagsUnusedAt, vec![Expr::Var(1)]);

        let lines = parser::parse_source("jp L1\nL1:\nxor a\nret\n").unwrap();
        let ctx = EvalCtx {
            bindings: &bindings,
            lines: &lines,
            resume: 0,
        };
        assert_eq!(eval(&probe, &ctx), Value::Bool(true));

        let lines = parser::parse_source("jp L1\nL1:\nret z\n").unwrap();
        let ctx = EvalCtx {
            bindings: &bindings,
            lines: &lines,
            resume: 0,
        };
        assert_eq!(eval(&probe, &ctx), Value::Bool(false));

        // External label: conservative.
        let lines = parser::parse_source("ret\n").unwrap();
        let ctx = EvalCtx {
            bindings: &bindings,
            lines: &lines,
            resume: 0,
        };
        assert_eq!(eval(&probe, &ctx), Value::Bool(false));
    }
}
