//! Integration tests for the mender CLI.
//!
//! None of these reach a language-model endpoint: they cover argument
//! handling, configuration commands and the failure paths of `run`.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// Helper to create a mender Command with no inherited MENDER_* overrides
fn mender() -> Command {
    let mut cmd = cargo_bin_cmd!("mender");
    for var in [
        "MENDER_MAX_ITERATIONS",
        "MENDER_STAGE_TIMEOUT_SECS",
        "MENDER_STAGE_RETRIES",
        "MENDER_CHECKPOINT_RETENTION",
        "MENDER_ENDPOINT",
        "MENDER_MODEL",
        "MENDER_HOST",
        "MENDER_PORT",
    ] {
        cmd.env_remove(var);
    }
    cmd
}

fn create_temp_project() -> TempDir {
    TempDir::new().unwrap()
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_mender_help() {
        mender()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("serve"))
            .stdout(predicate::str::contains("run"))
            .stdout(predicate::str::contains("config"));
    }

    #[test]
    fn test_mender_version() {
        mender()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
    }

    #[test]
    fn test_unknown_subcommand_fails() {
        mender().arg("frobnicate").assert().failure();
    }

    #[test]
    fn test_invalid_log_format_fails() {
        let dir = create_temp_project();
        mender()
            .current_dir(dir.path())
            .args(["--log-format", "xml", "config", "show"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid log format"));
    }
}

// =============================================================================
// Configuration Commands
// =============================================================================

mod config_commands {
    use super::*;

    #[test]
    fn test_config_show_defaults() {
        let dir = create_temp_project();
        mender()
            .current_dir(dir.path())
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No mender.toml found"))
            .stdout(predicate::str::contains("max_iterations = 3"))
            .stdout(predicate::str::contains("port = 8000"));
    }

    #[test]
    fn test_config_init_creates_file() {
        let dir = create_temp_project();
        mender()
            .current_dir(dir.path())
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Created mender.toml"));

        let path = dir.path().join(".mender/mender.toml");
        assert!(path.exists());
        let content = fs::read_to_string(path).unwrap();
        assert!(content.contains("[pipeline]"));
        assert!(content.contains("[collaborator]"));
    }

    #[test]
    fn test_config_init_does_not_overwrite() {
        let dir = create_temp_project();
        fs::create_dir_all(dir.path().join(".mender")).unwrap();
        fs::write(
            dir.path().join(".mender/mender.toml"),
            "[pipeline]\nmax_iterations = 7\n",
        )
        .unwrap();

        mender()
            .current_dir(dir.path())
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("already exists"));

        let content = fs::read_to_string(dir.path().join(".mender/mender.toml")).unwrap();
        assert!(content.contains("max_iterations = 7"));
    }

    #[test]
    fn test_config_show_reads_file_and_env() {
        let dir = create_temp_project();
        fs::create_dir_all(dir.path().join(".mender")).unwrap();
        fs::write(
            dir.path().join(".mender/mender.toml"),
            "[pipeline]\nmax_iterations = 5\n\n[server]\nport = 9100\n",
        )
        .unwrap();

        mender()
            .current_dir(dir.path())
            .env("MENDER_PORT", "9200")
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("max_iterations = 5"))
            .stdout(predicate::str::contains("port = 9200"));
    }

    #[test]
    fn test_config_validate_reports_warnings() {
        let dir = create_temp_project();
        fs::create_dir_all(dir.path().join(".mender")).unwrap();
        fs::write(
            dir.path().join(".mender/mender.toml"),
            "[pipeline]\nmax_iterations = 20\nmax_iterations_ceiling = 10\n",
        )
        .unwrap();

        mender()
            .current_dir(dir.path())
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Configuration warnings"));
    }

    #[test]
    fn test_config_validate_without_file() {
        let dir = create_temp_project();
        mender()
            .current_dir(dir.path())
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Using defaults (valid)"));
    }

    #[test]
    fn test_invalid_toml_fails() {
        let dir = create_temp_project();
        fs::create_dir_all(dir.path().join(".mender")).unwrap();
        fs::write(dir.path().join(".mender/mender.toml"), "[pipeline\n").unwrap();

        mender()
            .current_dir(dir.path())
            .args(["config", "show"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Failed to parse mender.toml"));
    }

    #[test]
    fn test_project_dir_flag() {
        let dir = create_temp_project();
        mender()
            .args(["--project-dir", dir.path().to_str().unwrap(), "config", "init"])
            .assert()
            .success();
        assert!(dir.path().join(".mender/mender.toml").exists());
    }
}

// =============================================================================
// Run Command Failure Paths
// =============================================================================

mod run_command {
    use super::*;

    #[test]
    fn test_run_missing_file_fails() {
        let dir = create_temp_project();
        mender()
            .current_dir(dir.path())
            .args(["run", "does_not_exist.py"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Failed to read"));
    }

    #[test]
    fn test_run_without_api_key_fails() {
        let dir = create_temp_project();
        fs::write(dir.path().join("broken.py"), "def f(:\n    pass\n").unwrap();
        mender()
            .current_dir(dir.path())
            .env_remove("GROQ_API_KEY")
            .args(["run", "broken.py"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("GROQ_API_KEY"));
    }

    #[test]
    fn test_run_empty_file_fails() {
        let dir = create_temp_project();
        fs::write(dir.path().join("empty.py"), "   \n").unwrap();
        mender()
            .current_dir(dir.path())
            .env("GROQ_API_KEY", "test-key")
            .env("MENDER_ENDPOINT", "http://127.0.0.1:9")
            .args(["run", "empty.py"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("code must not be empty"));
    }

    #[test]
    fn test_run_unsupported_language_fails() {
        let dir = create_temp_project();
        fs::write(dir.path().join("main.rb"), "puts 'hi'\n").unwrap();
        mender()
            .current_dir(dir.path())
            .env("GROQ_API_KEY", "test-key")
            .env("MENDER_ENDPOINT", "http://127.0.0.1:9")
            .args(["run", "main.rb", "--language", "ruby"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Unsupported language"));
    }
}
