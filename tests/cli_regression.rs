// Regression tests for the CLI surface: a full script-driven reduction and
// miette-rendered diagnostics on bad input.

use std::fs;
use std::path::PathBuf;

use assert_cmd::Command;
use predicates::{prelude::PredicateBooleanExt, str::contains};

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("whittle-cli-{}-{}", name, std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

const INI: &str = "\
ini     : line* ;
line    : entry | comment ;
entry   : NAME \"=\" VALUE NL ;
comment : COMMENT NL ;
NAME    : /[A-Za-z_][A-Za-z0-9_]*/ ;
VALUE   : /[^\\n]+/ ;
COMMENT : /;[^\\n]*/ ;
NL      : \"\\n\" ;
";

#[cfg(unix)]
#[test]
fn reduce_subcommand_drives_a_script_oracle() {
    use std::os::unix::fs::PermissionsExt;

    let dir = scratch_dir("reduce");
    let grammar = dir.join("ini.wg");
    fs::write(&grammar, INI).unwrap();
    let input = dir.join("conf.ini");
    fs::write(&input, "k=v\n; bye\n").unwrap();

    let script = dir.join("oracle.sh");
    fs::write(&script, "#!/bin/sh\ngrep -q 'k=v' \"$1\"\n").unwrap();
    let mut perms = fs::metadata(&script).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&script, perms).unwrap();

    let out_dir = dir.join("out");
    let mut cmd = Command::cargo_bin("whittle").unwrap();
    cmd.arg("reduce")
        .arg("--grammar")
        .arg(&grammar)
        .arg("--start-rule")
        .arg("ini")
        .arg("--test")
        .arg(&script)
        .arg("--out")
        .arg(&out_dir)
        .arg(&input);
    cmd.assert().success();

    let reduced = fs::read_to_string(out_dir.join("conf.ini")).unwrap();
    assert!(reduced.contains("k=v"));
    assert!(!reduced.contains("bye"));

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn broken_grammar_renders_a_diagnostic() {
    let dir = scratch_dir("diag");
    let grammar = dir.join("bad.wg");
    fs::write(&grammar, "rule : ;;; ???").unwrap();
    let input = dir.join("in.txt");
    fs::write(&input, "x").unwrap();

    let mut cmd = Command::cargo_bin("whittle").unwrap();
    cmd.arg("tree")
        .arg("--grammar")
        .arg(&grammar)
        .arg("--start-rule")
        .arg("rule")
        .arg(&input);
    cmd.assert().failure().stderr(contains("whittle::grammar"));

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn replacements_subcommand_prints_the_table() {
    let dir = scratch_dir("reps");
    let grammar = dir.join("ini.wg");
    fs::write(&grammar, INI).unwrap();

    let mut cmd = Command::cargo_bin("whittle").unwrap();
    cmd.arg("replacements").arg("--grammar").arg(&grammar);
    cmd.assert()
        .success()
        .stdout(contains("ini:NAME").and(contains("ini:ini")));

    let _ = fs::remove_dir_all(&dir);
}
