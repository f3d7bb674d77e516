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

//! The fixed-point engine. Walks the instruction sequence left to right,
//! fires the first candidate rule whose pattern and predicate hold, steps
//! back over the freshly synthesized prefix, and repeats until a full pass
//! makes no rewrite. Pass and rewrite caps bound pathological rule sets.

use crate::asm::Line;
use crate::errors::OptError;
use crate::expr::{self, EvalCtx};
use crate::matcher;
use crate::registry::Registry;
use crate::rewriter;
use log::{debug, warn};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone)]
pub struct Options {
    pub optimization_level: u8,
    pub disabled_flags: HashSet<u32>,
    pub max_passes: usize,
    pub max_rewrites: usize,
    pub trace: bool,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            optimization_level: 1,
            disabled_flags: HashSet::new(),
            max_passes: 32,
            max_rewrites: 2000,
            trace: false,
        }
    }
}

/// One rewrite, as reported when tracing is on.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceRecord {
    pub rule_flag: u32,
    pub position: usize,
    pub before_lines: Vec<String>,
    pub after_lines: Vec<String>,
}

#[derive(Debug, Default, Clone)]
pub struct OptimizeReport {
    pub passes: usize,
    pub rewrites: usize,
    pub applications: BTreeMap<u32, usize>,
    pub traces: Vec<TraceRecord>,
    /// Set when a cap fired before the unit converged.
    pub truncated: bool,
}

impl OptimizeReport {
    pub fn most_applied(&self) -> Option<(u32, usize)> {
        self.applications
            .iter()
            .max_by_key(|&(flag, count)| (*count, std::cmp::Reverse(*flag)))
            .map(|(flag, count)| (*flag, *count))
    }
}

/// Cooperative cancellation, checked between passes only so a cancelled
/// unit is always left in a consistent state.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Apply the enabled rules to the line sequence until fixed point.
pub fn run(
    lines: &mut Vec<Line>,
    registry: &Registry,
    options: &Options,
    cancel: &CancelToken,
) -> Result<OptimizeReport, OptError> {
    let enabled = registry.enabled(options);
    let mut report = OptimizeReport::default();
    if enabled.is_empty() {
        return Ok(report);
    }
    let backscan = enabled.max_pattern_len().saturating_sub(1);

    let mut converged = false;
    'passes: while report.passes < options.max_passes {
        if cancel.is_cancelled() {
            break;
        }
        report.passes += 1;
        let mut changed = false;

        // Position in executable-instruction coordinates; raw indices
        // shift under rewrites, ordinals stay stable enough to back-scan.
        let mut k = 0usize;
        loop {
            let exec = executable_indices(lines);
            if k >= exec.len() {
                break;
            }
            let raw = exec[k];
            let opcode = match lines[raw].as_instr() {
                Some(i) => i.opcode(),
                None => {
                    k += 1;
                    continue;
                }
            };

            let mut fired = false;
            for rule in enabled.candidates(&opcode) {
                let Some(m) = matcher::match_rule(lines, raw, rule) else {
                    continue;
                };

                let mut bindings = m.bindings.clone();
                for (target, def) in &rule.defines {
                    let value = {
                        let ctx = EvalCtx {
                            bindings: &bindings,
                            lines,
                            resume: m.span_end,
                        };
                        expr::eval(def, &ctx)
                    };
                    bindings.insert(*target, value);
                }
                if let Some(predicate) = &rule.predicate {
                    let ctx = EvalCtx {
                        bindings: &bindings,
                        lines,
                        resume: m.span_end,
                    };
                    if !expr::eval(predicate, &ctx).truthy() {
                        continue;
                    }
                }

                let Some(replacement) = rewriter::build_replacement(rule, &bindings)? else {
                    continue;
                };

                let before: Vec<String> = lines[m.span_start..m.span_end]
                    .iter()
                    .map(|l| l.text().to_string())
                    .collect();
                let after: Vec<String> = replacement
                    .iter()
                    .map(|l| l.text().to_string())
                    .collect();

                rewriter::splice(lines, &m, replacement);

                report.rewrites += 1;
                *report.applications.entry(rule.flag).or_insert(0) += 1;
                if options.trace {
                    let record = TraceRecord {
                        rule_flag: rule.flag,
                        position: m.span_start,
                        before_lines: before,
                        after_lines: after,
                    };
                    if let Ok(json) = serde_json::to_string(&record) {
                        debug!("rewrite {}", json);
                    }
                    report.traces.push(record);
                }

                if report.rewrites >= options.max_rewrites {
                    break 'passes;
                }

                changed = true;
                fired = true;
                k = k.saturating_sub(backscan);
                break;
            }
            if !fired {
                k += 1;
            }
        }

        if !changed {
            converged = true;
            break;
        }
    }

    if !converged && !cancel.is_cancelled() {
        report.truncated = true;
        match report.most_applied() {
            Some((flag, count)) => warn!(
                "peephole optimization stopped before convergence after {} rewrites; most-applied rule: OFLAG {} ({} applications)",
                report.rewrites, flag, count
            ),
            None => warn!("peephole optimization stopped before convergence"),
        }
    }

    Ok(report)
}

fn executable_indices(lines: &[Line]) -> Vec<usize> {
    lines
        .iter()
        .enumerate()
        .filter(|(_, l)| matches!(l, Line::Instr(_)))
        .map(|(i, _)| i)
        .collect()
}
