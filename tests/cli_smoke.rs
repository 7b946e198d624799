use assert_cmd::Command;
use predicates::str::contains;

#[test]
fn drift_help_works() {
    Command::cargo_bin("drift")
        .expect("binary")
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("drift detection"));
}

#[test]
fn subcommand_help_works() {
    let subcommands = [
        "init", "track", "task", "history", "check", "timeline", "trends", "sync", "export",
        "stats", "reset",
    ];

    for cmd in subcommands {
        Command::cargo_bin("drift")
            .expect("binary")
            .arg(cmd)
            .arg("--help")
            .assert()
            .success();
    }
}

#[test]
fn task_subcommand_help_works() {
    for cmd in ["start", "complete", "branch", "merge", "rename"] {
        Command::cargo_bin("drift")
            .expect("binary")
            .args(["task", cmd, "--help"])
            .assert()
            .success();
    }
}
