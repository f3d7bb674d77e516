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

use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum OptError {
    #[error("Syntax Error: {0}")]
    PestError(#[from] pest::error::Error<crate::parser::Rule>),

    #[error("Assembly Error on line {line}: {reason}")]
    AsmError { line: usize, reason: String },

    #[error("Rule Load Error in {path}: {reason}")]
    RuleLoadError { path: String, reason: String },

    #[error("Duplicate rule flag {flag}: declared in both {first} and {second}")]
    DuplicateFlag {
        flag: u32,
        first: String,
        second: String,
    },

    #[error("Rule {flag} produced malformed assembly: {reason}")]
    BadRewrite { flag: u32, reason: String },
}
