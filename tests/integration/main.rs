//! Integration tests for kiln
//!
//! These drive the real binary, so the cache is exercised across genuine
//! process boundaries with real OS file locks.

mod cli_tests {
    use assert_cmd::Command;
    use predicates::prelude::*;
    use tempfile::TempDir;

    fn kiln() -> Command {
        Command::cargo_bin("kiln").unwrap()
    }

    #[test]
    fn help_displays() {
        kiln()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("cache the artifact"));
    }

    #[test]
    fn version_displays() {
        kiln()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("kiln"));
    }

    #[test]
    fn exec_requires_a_command() {
        kiln().args(["exec"]).assert().failure();
    }

    #[test]
    fn info_shows_location() {
        let dir = TempDir::new().unwrap();
        kiln()
            .args(["info", "--cache-dir"])
            .arg(dir.path().join("cache"))
            .assert()
            .success()
            .stdout(predicate::str::contains("Location:"));
    }

    #[test]
    fn info_json_is_parsable() {
        let dir = TempDir::new().unwrap();
        let out = kiln()
            .args(["info", "--format", "json", "--cache-dir"])
            .arg(dir.path().join("cache"))
            .assert()
            .success()
            .get_output()
            .stdout
            .clone();
        let v: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(v["count"], 0);
    }

    #[test]
    fn trim_reports_stats() {
        let dir = TempDir::new().unwrap();
        kiln()
            .args(["trim", "--cache-dir"])
            .arg(dir.path().join("cache"))
            .assert()
            .success()
            .stdout(predicate::str::contains("files in"));
    }

    #[test]
    fn rejects_too_small_max_age() {
        let dir = TempDir::new().unwrap();
        kiln()
            .args(["exec", "--max-age", "5s", "--cache-dir"])
            .arg(dir.path().join("cache"))
            .args(["--", "true"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("maxAge"));
    }
}

#[cfg(unix)]
mod process_tests {
    use assert_cmd::cargo::cargo_bin;
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::process::Command;
    use tempfile::TempDir;
    use walkdir::WalkDir;

    fn kiln_exec(cache: &Path, input: &str, script: &str) -> Command {
        let mut cmd = Command::new(cargo_bin("kiln"));
        cmd.arg("exec")
            .arg("--cache-dir")
            .arg(cache)
            .args(["--max-age", "30s", "--input", input, "--", "sh", "-c", script]);
        cmd
    }

    fn stdout_path(out: std::process::Output) -> PathBuf {
        assert!(
            out.status.success(),
            "kiln failed: {}",
            String::from_utf8_lossy(&out.stderr)
        );
        PathBuf::from(String::from_utf8(out.stdout).unwrap().trim())
    }

    fn count_files_named(root: &Path, name: &str) -> usize {
        WalkDir::new(root)
            .follow_links(false)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file() && e.file_name() == name)
            .count()
    }

    #[test]
    fn exec_miss_then_hit_across_processes() {
        let dir = TempDir::new().unwrap();
        let cache = dir.path().join("cache");

        let first = stdout_path(
            kiln_exec(&cache, "bb", "echo abc > artifact").output().unwrap(),
        );
        assert!(first.is_absolute());
        assert!(first.join("artifact").is_file());

        // second process must reuse the directory without running anything
        let second = stdout_path(
            kiln_exec(&cache, "bb", "echo second > artifact").output().unwrap(),
        );
        assert_eq!(first, second);
        assert_eq!(
            fs::read_to_string(first.join("artifact")).unwrap().trim(),
            "abc"
        );

        // a distinct input produces a distinct directory
        let third = stdout_path(
            kiln_exec(&cache, "b2", "echo abc > artifact").output().unwrap(),
        );
        assert_ne!(first, third);
        assert_eq!(count_files_named(&cache, "artifact"), 2);
    }

    #[test]
    fn failing_command_surfaces_and_next_run_recovers() {
        let dir = TempDir::new().unwrap();
        let cache = dir.path().join("cache");

        let out = kiln_exec(&cache, "bb", "echo partial > junk; exit 3")
            .output()
            .unwrap();
        assert!(!out.status.success());
        assert!(String::from_utf8_lossy(&out.stderr).contains("producer"));

        // the failed attempt left no committed entry; a retry produces
        let objdir = stdout_path(
            kiln_exec(&cache, "bb", "echo done > artifact").output().unwrap(),
        );
        assert!(objdir.join("artifact").is_file());
        // the partial directory is still on disk for inspection
        assert_eq!(count_files_named(&cache, "junk"), 1);
    }

    #[test]
    fn cold_race_runs_the_producer_once() {
        let dir = TempDir::new().unwrap();
        let cache = dir.path().join("cache");

        let children: Vec<_> = (0..33)
            .map(|_| {
                kiln_exec(&cache, "same-input", "sleep 0.05; echo x > marker")
                    .stdout(std::process::Stdio::piped())
                    .stderr(std::process::Stdio::piped())
                    .spawn()
                    .unwrap()
            })
            .collect();

        let mut dirs = Vec::new();
        for child in children {
            dirs.push(stdout_path(child.wait_with_output().unwrap()));
        }

        // every process got the same committed directory
        assert!(dirs.windows(2).all(|w| w[0] == w[1]), "dirs diverged");
        // and exactly one producer ran
        assert_eq!(count_files_named(&cache, "marker"), 1);
    }
}
