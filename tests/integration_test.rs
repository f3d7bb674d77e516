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

use std::collections::HashSet;
use std::path::Path;
use zxopt::driver::Options;
use zxopt::errors::OptError;
use zxopt::file_reader::{DiskFileReader, MockFileReader};
use zxopt::optimize_source;
use zxopt::registry::Registry;

fn run(src: &str, options: &Options) -> Vec<String> {
    let registry = Registry::builtin().unwrap();
    optimize_source(src, &registry, options).unwrap().lines
}

fn run_default(src: &str) -> Vec<String> {
    run(src, &Options::default())
}

#[test]
fn test_eq16_lowering() {
    let out = run_default("call __EQ16\nor a\njp nz, L\n");
    assert_eq!(out, vec!["    or a", "    sbc hl, de", "    jp z, L"]);
}

#[test]
fn test_cp1_lowering() {
    let out = run_default("sub 1\njp nc, L\n");
    assert_eq!(out, vec!["    or a", "    jp z, L"]);

    let out = run_default("sub 1\njp c, L\n");
    assert_eq!(out, vec!["    or a", "    jp nz, L"]);
}

#[test]
fn test_predicate_rejection() {
    let src = "call __EQ16\nxor a\njp nz, L\n";
    let out = run_default(src);
    assert_eq!(out, vec!["call __EQ16", "xor a", "jp nz, L"]);
}

#[test]
fn test_label_barrier() {
    let src = "sub 1\nL1:\njp nc, L2\n";
    let out = run_default(src);
    assert_eq!(out, vec!["sub 1", "L1:", "jp nc, L2"]);
}

#[test]
fn test_fixed_point_chaining_and_idempotence() {
    let src = "call __EQ16\nsub 1\njp nc, L\n";
    let registry = Registry::builtin().unwrap();
    let options = Options::default();

    let first = optimize_source(src, &registry, &options).unwrap();
    assert_eq!(
        first.lines,
        vec!["    or a", "    sbc hl, de", "    jp nz, L"]
    );
    assert!(first.report.passes <= 2);

    let again = first.lines.join("\n") + "\n";
    let second = optimize_source(&again, &registry, &options).unwrap();
    assert_eq!(second.lines, first.lines);
    assert_eq!(second.report.rewrites, 0);
}

#[test]
fn test_duplicate_flag_rejection_names_both_paths() {
    let mut reader = MockFileReader::default();
    let rule = "OLEVEL: 1\nOFLAG: 18\nREPLACE {{ or a }}\nWITH {{ or a }}\n";
    reader.add_file("rules/a.opt", rule);
    reader.add_file("rules/b.opt", rule);

    let err = Registry::load_dir(Path::new("rules"), &reader).unwrap_err();
    let root = err.downcast::<OptError>().unwrap();
    match root {
        OptError::DuplicateFlag { flag, first, second } => {
            assert_eq!(flag, 18);
            assert!(first.ends_with("a.opt"));
            assert!(second.ends_with("b.opt"));
        }
        other => panic!("expected DuplicateFlag, got {:?}", other),
    }
}

#[test]
fn test_push_pop_elimination() {
    let out = run_default("push hl\npop hl\nret\n");
    assert_eq!(out, vec!["ret"]);

    // Different registers must survive.
    let out = run_default("push hl\npop de\nret\n");
    assert_eq!(out, vec!["push hl", "pop de", "ret"]);
}

#[test]
fn test_ld_rr_elimination() {
    let out = run_default("ld a, a\nret\n");
    assert_eq!(out, vec!["ret"]);
}

#[test]
fn test_xor_a_needs_level_two_and_dead_flags() {
    let src = "ld a, 0\nld b, a\nsub 1\n";
    let out = run_default(src);
    assert_eq!(out[0], "ld a, 0");

    let options = Options {
        optimization_level: 2,
        ..Options::default()
    };
    let out = run(src, &options);
    assert_eq!(out[0], "    xor a");

    // Flags feeding a conditional jump block the rewrite.
    let blocked = "ld a, 0\njp z, L\n";
    let out = run(blocked, &options);
    assert_eq!(out[0], "ld a, 0");
}

#[test]
fn test_dead_double_load() {
    let options = Options {
        optimization_level: 2,
        ..Options::default()
    };
    let out = run("ld a, 5\nld a, b\nret\n", &options);
    assert_eq!(out, vec!["    ld a, b", "ret"]);

    // Indirect first source is kept.
    let out = run("ld a, (hl)\nld a, b\nret\n", &options);
    assert_eq!(out, vec!["ld a, (hl)", "ld a, b", "ret"]);
}

#[test]
fn test_directive_multiset_preserved() {
    let src = "\
ORG 32768
#line 1
SCREEN EQU 0x4000
sub 1
jp nc, L
DEFB 1, 2, 3
END
";
    let out = run_default(src);
    for directive in ["ORG 32768", "#line 1", "SCREEN EQU 0x4000", "DEFB 1, 2, 3", "END"] {
        assert_eq!(
            out.iter().filter(|l| l.as_str() == directive).count(),
            1,
            "directive {:?} lost or duplicated",
            directive
        );
    }
    assert!(out.contains(&"    or a".to_string()));
}

#[test]
fn test_labels_preserved() {
    let src = "start:\nsub 1\njp nc, start\nloop: djnz loop\n";
    let out = run_default(src);
    assert!(out.iter().any(|l| l.trim() == "start:"));
    assert!(out.iter().any(|l| l.contains("loop:")));
}

#[test]
fn test_label_on_window_start_survives_rewrite() {
    let out = run_default("L1: sub 1\njp nc, X\n");
    assert_eq!(out, vec!["L1:", "    or a", "    jp z, X"]);
}

#[test]
fn test_determinism_is_byte_identical() {
    let src = "call __EQ16\nor a\njp nz, L\npush bc\npop bc\nsub 1\njp c, M\n";
    let a = run_default(src);
    let b = run_default(src);
    assert_eq!(a, b);
}

#[test]
fn test_rule_isolation() {
    // Optimizing with rule 18 disabled and then re-running with it enabled
    // matches optimizing with everything enabled twice.
    let src = "call __EQ16\nsub 1\njp nc, L\n";
    let registry = Registry::builtin().unwrap();

    let mut without_18 = Options::default();
    without_18.disabled_flags = HashSet::from([18]);
    let stage1 = optimize_source(src, &registry, &without_18).unwrap();
    let stage1_text = stage1.lines.join("\n") + "\n";
    let staged = optimize_source(&stage1_text, &registry, &Options::default()).unwrap();

    let direct = optimize_source(src, &registry, &Options::default()).unwrap();
    let direct_text = direct.lines.join("\n") + "\n";
    let direct_again = optimize_source(&direct_text, &registry, &Options::default()).unwrap();

    assert_eq!(staged.lines, direct_again.lines);
}

#[test]
fn test_load_rules_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let rule_path = dir.path().join("sub1.opt");
    std::fs::write(
        &rule_path,
        "OLEVEL: 1\nOFLAG: 19\nREPLACE {{\nsub 1\njp $2, $3\n}}\nDEFINE {{ $4 = (($2 == nc) && z) || nz }}\nIF {{ ($2 == nc) || ($2 == c) }}\nWITH {{\nor a\njp $4, $3\n}}\n",
    )
    .unwrap();

    let registry = Registry::load_dir(dir.path(), &DiskFileReader).unwrap();
    assert_eq!(registry.len(), 1);

    let out = optimize_source("sub 1\njp nc, L\n", &registry, &Options::default())
        .unwrap()
        .lines;
    assert_eq!(out, vec!["    or a", "    jp z, L"]);
}

#[test]
fn test_untouched_lines_reemit_verbatim() {
    let src = "   LD   A , 5   ; odd spacing\nRET\n";
    let out = run_default(src);
    assert_eq!(out, vec!["   LD   A , 5   ; odd spacing", "RET"]);
}

#[test]
fn test_trace_output_records_rewrites() {
    let registry = Registry::builtin().unwrap();
    let options = Options {
        trace: true,
        ..Options::default()
    };
    let result = optimize_source("sub 1\njp nc, L\n", &registry, &options).unwrap();
    assert_eq!(result.report.traces.len(), 1);
    let record = &result.report.traces[0];
    assert_eq!(record.rule_flag, 19);
    assert_eq!(record.before_lines, vec!["sub 1", "jp nc, L"]);
    assert_eq!(record.after_lines, vec!["    or a", "    jp z, L"]);
    // Trace records serialize for the diagnostics stream.
    let json = serde_json::to_string(record).unwrap();
    assert!(json.contains("\"rule_flag\":19"));
}
