//! Test CLI commands
#[cfg(test)]
use serial_test::serial;

#[cfg(test)]
#[serial]
mod test_cli {
    use std::process::{Command, Output};

    fn run_cpa(args: &[&str]) -> Output {
        Command::new("cargo")
            .arg("run")
            .arg("--")
            .args(args)
            .output()
            .unwrap_or_else(|err| panic!("Failed to execute: {err}"))
    }

    fn assert_success(output: &Output) -> String {
        let stdout = String::from_utf8(output.stdout.clone()).unwrap();
        assert!(
            output.status.success(),
            "Failed to execute command: stdout: {}; stderr: {}",
            stdout,
            String::from_utf8(output.stderr.clone()).unwrap()
        );
        stdout
    }

    #[test]
    fn test_help() {
        let output = run_cpa(&["--help"]);
        assert_success(&output);
    }

    #[test]
    fn test_cli_safe_program() {
        let output = run_cpa(&["check", "./tests/resources/safe.json"]);

        let stdout = assert_success(&output);
        assert!(stdout.contains("Verification result: SAFE"), "{stdout}");
    }

    #[test]
    fn test_cli_unsafe_program() {
        let output = run_cpa(&["check", "./tests/resources/unsafe.json"]);

        let stdout = assert_success(&output);
        assert!(stdout.contains("Verification result: UNSAFE"), "{stdout}");
        assert!(stdout.contains("unreach-call"), "{stdout}");
    }

    #[test]
    fn test_cli_two_branches() {
        let output = run_cpa(&[
            "check",
            "./tests/resources/two_branches.json",
            "--domains",
            "value,interval",
            "--interpolation",
            "edge",
        ]);

        let stdout = assert_success(&output);
        assert!(stdout.contains("Verification result: SAFE"), "{stdout}");
    }

    #[test]
    fn test_cli_config_file() {
        let output = run_cpa(&[
            "check",
            "./tests/resources/safe.json",
            "--config-file",
            "./tests/resources/config.toml",
        ]);

        let stdout = assert_success(&output);
        assert!(stdout.contains("Verification result: SAFE"), "{stdout}");
        assert!(
            stdout.contains("Invariant generation proved the program safe"),
            "{stdout}"
        );
    }

    #[test]
    fn test_cli_asynchronous_invariants() {
        let output = run_cpa(&["check", "./tests/resources/safe.json", "--invariants"]);

        let stdout = assert_success(&output);
        assert!(stdout.contains("Verification result: SAFE"), "{stdout}");
    }

    #[test]
    fn test_cli_refinement_limit_from_environment() {
        let output = Command::new("cargo")
            .arg("run")
            .arg("--")
            .arg("check")
            .arg("./tests/resources/two_branches.json")
            .env("CPA_CEGAR__MAX_REFINEMENTS", "0")
            .output()
            .unwrap_or_else(|err| panic!("Failed to execute: {err}"));

        let stdout = assert_success(&output);
        assert!(stdout.contains("Verification result: UNKNOWN"), "{stdout}");
    }

    #[test]
    fn test_cli_refinement_limit_from_cli() {
        let output = run_cpa(&[
            "check",
            "./tests/resources/two_branches.json",
            "--max-refinements",
            "1",
        ]);

        let stdout = assert_success(&output);
        assert!(stdout.contains("Verification result: UNKNOWN"), "{stdout}");
    }

    #[test]
    fn test_cli_debug() {
        let output = run_cpa(&["--debug", "check", "./tests/resources/safe.json"]);
        assert_success(&output);
    }

    #[test]
    fn test_cli_log_config() {
        let output = run_cpa(&[
            "--logger-config-file",
            "./tests/resources/log_config.yaml",
            "check",
            "./tests/resources/safe.json",
        ]);

        assert_success(&output);
        assert!(std::fs::remove_file("./target/cpa-cli-test.log").is_ok());
    }

    #[test]
    fn test_cli_show() {
        let output = run_cpa(&["show", "./tests/resources/two_branches.json"]);

        let stdout = assert_success(&output);
        assert!(stdout.contains("function main"), "{stdout}");
    }

    #[test]
    fn test_cli_invalid_program() {
        let output = run_cpa(&["check", "./tests/resources/invalid.json"]);
        assert!(!output.status.success());
    }

    #[test]
    fn test_cli_missing_program() {
        let output = run_cpa(&["check", "./tests/resources/does_not_exist.json"]);
        assert!(!output.status.success());
    }

    #[test]
    fn test_cli_missing_config_file() {
        let output = run_cpa(&[
            "check",
            "./tests/resources/safe.json",
            "--config-file",
            "./tests/resources/does_not_exist.toml",
        ]);
        assert!(!output.status.success());
    }
}
