//! Exercises the `match-engine-demo` binary as a subprocess, the way
//! the pack's `assert_cmd`-based CLI tests do it.

use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn demo_runs_one_job_and_prints_ranked_matches() {
    let mut cmd = Command::cargo_bin("match-engine-demo").unwrap();
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("--- events ---"))
        .stdout(predicate::str::contains("--- matches ---"))
        .stdout(predicate::str::contains("rank=1"));
}
