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

pub mod asm;
pub mod driver;
pub mod errors;
pub mod expr;
pub mod file_reader;
pub mod matcher;
pub mod oracle;
pub mod parser;
pub mod registry;
pub mod rewriter;
pub mod rules;

use anyhow::{Context, Result};
use driver::{CancelToken, Options, OptimizeReport};
use registry::Registry;

extern crate pest;
extern crate pest_derive;

pub struct OptimizeOutput {
    pub lines: Vec<String>,
    pub report: OptimizeReport,
}

/// Run the peephole optimizer over one compilation unit of assembly text.
pub fn optimize_source(
    source: &str,
    registry: &Registry,
    options: &Options,
) -> Result<OptimizeOutput> {
    optimize_source_with_cancel(source, registry, options, &CancelToken::default())
}

pub fn optimize_source_with_cancel(
    source: &str,
    registry: &Registry,
    options: &Options,
    cancel: &CancelToken,
) -> Result<OptimizeOutput> {
    let mut lines =
        parser::parse_source(source).context("Failed during assembly tokenization")?;

    let report = driver::run(&mut lines, registry, options, cancel)
        .context("Failed during peephole rewriting")?;

    let rendered = lines.iter().map(|l| l.text().to_string()).collect();
    Ok(OptimizeOutput {
        lines: rendered,
        report,
    })
}
