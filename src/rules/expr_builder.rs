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

use crate::asm::Operand;
use crate::errors::OptError;
use crate::expr::{Builtin, Expr};
use crate::parser::{Rule as Gram, line_builder};
use pest::iterators::Pair;

fn load_err(path: &str, reason: impl Into<String>) -> OptError {
    OptError::RuleLoadError {
        path: path.to_string(),
        reason: reason.into(),
    }
}

// Build an Expr from an expression pair
pub fn build_expression(path: &str, pair: Pair<Gram>) -> Result<Expr, OptError> {
    match pair.as_rule() {
        Gram::expression => {
            let inner = pair
                .into_inner()
                .next()
                .ok_or_else(|| load_err(path, "empty expression"))?;
            build_expression(path, inner)
        }
        Gram::or_expr => build_binary_chain(path, pair),
        Gram::and_expr => build_binary_chain(path, pair),
        Gram::eq_expr => build_binary_chain(path, pair),
        Gram::unary_expr => build_unary(path, pair),
        Gram::primary => build_primary(path, pair),
        other => Err(load_err(path, format!("unexpected expression rule: {:?}", other))),
    }
}

// or_expr, and_expr and eq_expr share the shape "operand (op operand)*",
// folded left-associatively.
fn build_binary_chain(path: &str, pair: Pair<Gram>) -> Result<Expr, OptError> {
    let mut inner = pair.into_inner();
    let first = inner
        .next()
        .ok_or_else(|| load_err(path, "empty expression"))?;
    let mut expr = build_expression(path, first)?;

    while let Some(op) = inner.next() {
        let rhs_pair = inner
            .next()
            .ok_or_else(|| load_err(path, "operator with no right operand"))?;
        let rhs = build_expression(path, rhs_pair)?;
        expr = match (op.as_rule(), op.as_str()) {
            (Gram::or_op, _) => Expr::Or(Box::new(expr), Box::new(rhs)),
            (Gram::and_op, _) => Expr::And(Box::new(expr), Box::new(rhs)),
            (Gram::eq_op, "==") => Expr::Eq(Box::new(expr), Box::new(rhs)),
            (Gram::eq_op, _) => Expr::Ne(Box::new(expr), Box::new(rhs)),
            (other, _) => {
                return Err(load_err(path, format!("unexpected operator rule: {:?}", other)));
            }
        };
    }
    Ok(expr)
}

fn build_unary(path: &str, pair: Pair<Gram>) -> Result<Expr, OptError> {
    let mut inner = pair.into_inner();
    let first = inner
        .next()
        .ok_or_else(|| load_err(path, "empty expression"))?;
    if first.as_rule() == Gram::not_op {
        let operand = inner
            .next()
            .ok_or_else(|| load_err(path, "! with no operand"))?;
        Ok(Expr::Not(Box::new(build_expression(path, operand)?)))
    } else {
        build_expression(path, first)
    }
}

fn build_primary(path: &str, pair: Pair<Gram>) -> Result<Expr, OptError> {
    let inner = pair
        .into_inner()
        .next()
        .ok_or_else(|| load_err(path, "empty expression"))?;
    match inner.as_rule() {
        Gram::func_call => build_call(path, inner),
        Gram::var => Ok(Expr::Var(super::var_number(path, inner.as_str())?)),
        Gram::pat_signed => {
            let (value, _) =
                line_builder::build_signed(inner, 0).map_err(|e| load_err(path, e.to_string()))?;
            Ok(Expr::Int(value))
        }
        Gram::string_lit => {
            let text = inner
                .into_inner()
                .next()
                .map(|p| p.as_str().to_string())
                .unwrap_or_default();
            Ok(Expr::Str(text))
        }
        Gram::pat_indirect => {
            let body = line_builder::build_indirect(inner, 0)
                .map_err(|e| load_err(path, e.to_string()))?;
            Ok(Expr::Token(Operand::Indirect(body)))
        }
        Gram::paren_expr => {
            let e = inner
                .into_inner()
                .next()
                .ok_or_else(|| load_err(path, "empty parenthesized expression"))?;
            build_expression(path, e)
        }
        // A bare word is a token literal: register, pair, or symbol.
        Gram::identifier => Ok(Expr::Token(line_builder::classify_ident(
            inner.as_str(),
            "",
            1,
        ))),
        other => Err(load_err(path, format!("unexpected primary rule: {:?}", other))),
    }
}

fn build_call(path: &str, pair: Pair<Gram>) -> Result<Expr, OptError> {
    let mut inner = pair.into_inner();
    let name_pair = inner
        .next()
        .ok_or_else(|| load_err(path, "function call with no name"))?;
    let name = name_pair.as_str();
    let builtin = Builtin::from_name(name)
        .ok_or_else(|| load_err(path, format!("unknown function: {}", name)))?;

    let mut args = Vec::new();
    for arg in inner {
        args.push(build_expression(path, arg)?);
    }
    if args.len() != builtin.arity() {
        return Err(load_err(
            path,
            format!(
                "{} expects {} argument(s), got {}",
                name,
                builtin.arity(),
                args.len()
            ),
        ));
    }
    Ok(Expr::Call(builtin, args))
}
