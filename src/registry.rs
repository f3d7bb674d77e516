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

use crate::driver::Options;
use crate::errors::OptError;
use crate::file_reader::FileReader;
use crate::rules::{self, MnemonicTerm, OptRule};
use anyhow::{Context, Result};
use std::cmp::Reverse;
use std::collections::HashMap;
use std::path::Path;

// The rule set shipped with the compiler.
const BUILTIN_RULES: &[(&str, &str)] = &[
    ("builtin:pushpop.opt", include_str!("../rules/pushpop.opt")),
    ("builtin:ldrr.opt", include_str!("../rules/ldrr.opt")),
    ("builtin:xora.opt", include_str!("../rules/xora.opt")),
    ("builtin:dead_ld_a.opt", include_str!("../rules/dead_ld_a.opt")),
    ("builtin:eq16.opt", include_str!("../rules/eq16.opt")),
    ("builtin:sub1.opt", include_str!("../rules/sub1.opt")),
];

#[derive(Debug)]
pub struct Registry {
    rules: Vec<OptRule>,
}

impl Registry {
    /// Parse a set of (path, text) rule sources, enforcing OFLAG
    /// uniqueness across the whole set.
    pub fn from_sources(sources: &[(String, String)]) -> Result<Self, OptError> {
        let mut rules = Vec::with_capacity(sources.len());
        let mut seen: HashMap<u32, String> = HashMap::new();
        for (path, text) in sources {
            let rule = rules::parse_rule(path, text)?;
            if let Some(first) = seen.get(&rule.flag) {
                return Err(OptError::DuplicateFlag {
                    flag: rule.flag,
                    first: first.clone(),
                    second: path.clone(),
                });
            }
            seen.insert(rule.flag, path.clone());
            rules.push(rule);
        }
        Ok(Registry { rules })
    }

    /// Read every *.opt file from a rule directory.
    pub fn load_dir<F: FileReader>(dir: &Path, reader: &F) -> Result<Self> {
        let mut sources = Vec::new();
        let paths = reader
            .list_dir(dir)
            .with_context(|| format!("Failed to list rule directory {}", dir.display()))?;
        for path in paths {
            if path.extension().and_then(|e| e.to_str()) != Some("opt") {
                continue;
            }
            let text = reader
                .read_to_string(&path)
                .with_context(|| format!("Failed to read rule file {}", path.display()))?;
            sources.push((path.display().to_string(), text));
        }
        let registry = Self::from_sources(&sources)
            .with_context(|| format!("Failed to load rules from {}", dir.display()))?;
        Ok(registry)
    }

    /// The rule set embedded in the binary.
    pub fn builtin() -> Result<Self, OptError> {
        let sources: Vec<(String, String)> = BUILTIN_RULES
            .iter()
            .map(|(p, t)| (p.to_string(), t.to_string()))
            .collect();
        Self::from_sources(&sources)
    }

    pub fn rules(&self) -> &[OptRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Index the rules enabled at the session's optimization level for
    /// candidate lookup by opcode. Candidate order is descending OLEVEL
    /// then ascending OFLAG, so selection is deterministic.
    pub fn enabled(&self, options: &Options) -> EnabledRules<'_> {
        let active: Vec<&OptRule> = self
            .rules
            .iter()
            .filter(|r| r.level <= options.optimization_level)
            .filter(|r| !options.disabled_flags.contains(&r.flag))
            .collect();

        let mut wildcard: Vec<&OptRule> = active
            .iter()
            .copied()
            .filter(|r| matches!(r.first_mnemonic(), MnemonicTerm::Variable(_)))
            .collect();
        sort_candidates(&mut wildcard);

        let mut buckets: HashMap<String, Vec<&OptRule>> = HashMap::new();
        for rule in active.iter().copied() {
            if let MnemonicTerm::Literal(m) = rule.first_mnemonic() {
                buckets.entry(m.clone()).or_default().push(rule);
            }
        }
        for bucket in buckets.values_mut() {
            bucket.extend(wildcard.iter().copied());
            sort_candidates(bucket);
        }

        let max_pattern_len = active.iter().map(|r| r.pattern.len()).max().unwrap_or(0);
        EnabledRules {
            buckets,
            wildcard,
            max_pattern_len,
        }
    }
}

fn sort_candidates(rules: &mut [&OptRule]) {
    rules.sort_by_key(|r| (Reverse(r.level), r.flag));
}

pub struct EnabledRules<'a> {
    buckets: HashMap<String, Vec<&'a OptRule>>,
    wildcard: Vec<&'a OptRule>,
    max_pattern_len: usize,
}

impl<'a> EnabledRules<'a> {
    pub fn candidates(&self, opcode: &str) -> &[&'a OptRule] {
        match self.buckets.get(opcode) {
            Some(bucket) => bucket,
            None => &self.wildcard,
        }
    }

    pub fn max_pattern_len(&self) -> usize {
        self.max_pattern_len
    }

    pub fn is_empty(&self) -> bool {
        self.max_pattern_len == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_reader::MockFileReader;

    fn simple_rule(flag: u32, level: u8, first: &str) -> (String, String) {
        (
            format!("r{}.opt", flag),
            format!(
                "OLEVEL: {}\nOFLAG: {}\nREPLACE {{{{ {} a }}}}\nWITH {{{{ {} a }}}}\n",
                level, flag, first, first
            ),
        )
    }

    #[test]
    fn test_duplicate_flag_names_both_paths() {
        let sources = vec![simple_rule(18, 1, "or"), {
            let (_, text) = simple_rule(18, 1, "and");
            ("other.opt".to_string(), text)
        }];
        let err = Registry::from_sources(&sources).unwrap_err();
        match err {
            OptError::DuplicateFlag { flag, first, second } => {
                assert_eq!(flag, 18);
                assert_eq!(first, "r18.opt");
                assert_eq!(second, "other.opt");
            }
            other => panic!("expected DuplicateFlag, got {:?}", other),
        }
    }

    #[test]
    fn test_level_filter() {
        let sources = vec![simple_rule(1, 1, "or"), simple_rule(2, 2, "or")];
        let registry = Registry::from_sources(&sources).unwrap();

        let options = Options {
            optimization_level: 1,
            ..Options::default()
        };
        let enabled = registry.enabled(&options);
        assert_eq!(enabled.candidates("or").len(), 1);

        let options = Options {
            optimization_level: 2,
            ..Options::default()
        };
        let enabled = registry.enabled(&options);
        assert_eq!(enabled.candidates("or").len(), 2);
    }

    #[test]
    fn test_disabled_flags_filter() {
        let sources = vec![simple_rule(1, 1, "or"), simple_rule(2, 1, "or")];
        let registry = Registry::from_sources(&sources).unwrap();
        let mut options = Options::default();
        options.disabled_flags.insert(2);
        let enabled = registry.enabled(&options);
        let flags: Vec<u32> = enabled.candidates("or").iter().map(|r| r.flag).collect();
        assert_eq!(flags, vec![1]);
    }

    #[test]
    fn test_candidate_order_level_desc_then_flag_asc() {
        let sources = vec![
            simple_rule(9, 1, "or"),
            simple_rule(3, 2, "or"),
            simple_rule(5, 1, "or"),
        ];
        let registry = Registry::from_sources(&sources).unwrap();
        let options = Options {
            optimization_level: 2,
            ..Options::default()
        };
        let enabled = registry.enabled(&options);
        let flags: Vec<u32> = enabled.candidates("or").iter().map(|r| r.flag).collect();
        assert_eq!(flags, vec![3, 5, 9]);
    }

    #[test]
    fn test_wildcard_rules_reach_every_opcode() {
        let sources = vec![(
            "w.opt".to_string(),
            "OLEVEL: 1\nOFLAG: 4\nREPLACE {{ $1 a }}\nIF {{ $1 == or }}\nWITH {{ $1 a }}\n"
                .to_string(),
        )];
        let registry = Registry::from_sources(&sources).unwrap();
        let enabled = registry.enabled(&Options::default());
        assert_eq!(enabled.candidates("or").len(), 1);
        assert_eq!(enabled.candidates("xor").len(), 1);
    }

    #[test]
    fn test_load_dir_skips_foreign_files() {
        let mut reader = MockFileReader::default();
        let (_, rule) = simple_rule(1, 1, "or");
        reader.add_file("rules/a.opt", &rule);
        reader.add_file("rules/readme.txt", "not a rule");
        let registry = Registry::load_dir(Path::new("rules"), &reader).unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_builtin_set_loads() {
        let registry = Registry::builtin().unwrap();
        assert!(registry.len() >= 6);
        assert!(registry.rules().iter().any(|r| r.flag == 18));
        assert!(registry.rules().iter().any(|r| r.flag == 19));
    }
}
