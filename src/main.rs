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

use anyhow::{Context, Result};
use clap::Parser as clap_parser;
use log::info;
use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use zxopt::driver::Options;
use zxopt::file_reader::DiskFileReader;
use zxopt::optimize_source;
use zxopt::registry::Registry;

#[derive(clap_parser)]
#[clap(version = "0.1.0", author = "Connor Nolan")]
struct Opts {
    #[clap(short, long)]
    input: PathBuf,
    #[clap(short, long)]
    output: PathBuf,
    /// Directory of *.opt rule files; defaults to the embedded rule set.
    #[clap(short, long)]
    rules: Option<PathBuf>,
    #[clap(short = 'O', long = "level", default_value_t = 1)]
    level: u8,
    /// Rule flags to disable; may be given multiple times.
    #[clap(long = "disable")]
    disable: Vec<u32>,
    #[clap(long, default_value_t = 32)]
    max_passes: usize,
    #[clap(long, default_value_t = 2000)]
    max_rewrites: usize,
    /// Emit one JSON trace record per rewrite at debug level.
    #[clap(long)]
    trace: bool,
}

fn main() -> Result<()> {
    flexi_logger::Logger::try_with_env_or_str("info")?.start()?;
    let opts: Opts = Opts::parse();

    let reader = DiskFileReader;
    let registry = match &opts.rules {
        Some(dir) => Registry::load_dir(dir, &reader)?,
        None => Registry::builtin().context("Failed to load the embedded rule set")?,
    };

    let source = fs::read_to_string(&opts.input)
        .with_context(|| format!("Failed to read input file: {}", opts.input.display()))?;

    let options = Options {
        optimization_level: opts.level,
        disabled_flags: opts.disable.iter().copied().collect::<HashSet<u32>>(),
        max_passes: opts.max_passes,
        max_rewrites: opts.max_rewrites,
        trace: opts.trace,
    };

    let result = optimize_source(&source, &registry, &options)?;

    let mut text = result.lines.join("\n");
    text.push('\n');
    fs::write(&opts.output, text)
        .with_context(|| format!("Failed to write output file: {}", opts.output.display()))?;

    info!(
        "optimized {} -> {}: {} rewrites in {} passes",
        opts.input.display(),
        opts.output.display(),
        result.report.rewrites,
        result.report.passes
    );
    for (flag, count) in &result.report.applications {
        info!("  rule OFLAG {}: {} applications", flag, count);
    }

    Ok(())
}
