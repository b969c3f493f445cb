//! Integration tests for Larder

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    /// Isolated config and cache root per test
    struct Sandbox {
        dir: TempDir,
    }

    impl Sandbox {
        fn new() -> Self {
            Self {
                dir: TempDir::new().unwrap(),
            }
        }

        fn root(&self) -> PathBuf {
            self.dir.path().join("cache")
        }

        fn config_path(&self) -> PathBuf {
            self.dir.path().join("config.toml")
        }

        fn larder(&self) -> Command {
            let mut cmd = cargo_bin_cmd!("larder");
            cmd.env_remove("LARDER_ROOT")
                .arg("--config")
                .arg(self.config_path())
                .arg("--root")
                .arg(self.root());
            cmd
        }

        fn file(&self, name: &str, content: &[u8]) -> PathBuf {
            let path = self.dir.path().join(name);
            std::fs::write(&path, content).unwrap();
            path
        }

        fn import(&self, name: &str, file: &Path) {
            self.larder()
                .arg("import")
                .arg(name)
                .arg(file)
                .assert()
                .success();
        }
    }

    #[test]
    fn help_displays() {
        cargo_bin_cmd!("larder")
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("disk-resident artifact cache"));
    }

    #[test]
    fn version_displays() {
        cargo_bin_cmd!("larder")
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("larder"));
    }

    #[test]
    fn import_then_cat() {
        let sandbox = Sandbox::new();
        let file = sandbox.file("a.txt", b"xyz");

        sandbox
            .larder()
            .args(["import", "dataset-A"])
            .arg(&file)
            .assert()
            .success()
            .stdout(predicate::str::contains("Stored dataset-A"));

        sandbox
            .larder()
            .args(["cat", "dataset-A"])
            .assert()
            .success()
            .stdout("xyz");
    }

    #[test]
    fn second_import_is_a_hit() {
        let sandbox = Sandbox::new();
        sandbox.import("dataset-A", &sandbox.file("a.txt", b"xyz"));
        let other = sandbox.file("b.txt", b"abc");

        sandbox
            .larder()
            .args(["import", "dataset-A"])
            .arg(&other)
            .assert()
            .success()
            .stdout(predicate::str::contains("Already cached"));
        sandbox
            .larder()
            .args(["cat", "dataset-A"])
            .assert()
            .stdout("xyz");

        sandbox
            .larder()
            .args(["import", "dataset-A", "--force"])
            .arg(&other)
            .assert()
            .success()
            .stdout(predicate::str::contains("Replaced dataset-A"));
        sandbox
            .larder()
            .args(["cat", "dataset-A"])
            .assert()
            .stdout("abc");
    }

    #[test]
    fn invalidate_then_refetch() {
        let sandbox = Sandbox::new();
        sandbox.import("dataset-A", &sandbox.file("a.txt", b"xyz"));

        sandbox
            .larder()
            .args(["invalidate", "dataset-A"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Removed dataset-A"));
        // Idempotent
        sandbox
            .larder()
            .args(["invalidate", "dataset-A"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No entry"));

        sandbox.import("dataset-A", &sandbox.file("b.txt", b"abc"));
        sandbox
            .larder()
            .args(["cat", "dataset-A"])
            .assert()
            .stdout("abc");
    }

    #[test]
    fn cat_missing_entry_fails() {
        let sandbox = Sandbox::new();

        sandbox
            .larder()
            .args(["cat", "absent"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("not found"))
            .stderr(predicate::str::contains("Hint:"));
    }

    #[test]
    fn cat_respects_version_tag() {
        let sandbox = Sandbox::new();
        let file = sandbox.file("a.txt", b"xyz");
        sandbox
            .larder()
            .args(["import", "dataset-A", "--version-tag", "r1"])
            .arg(&file)
            .assert()
            .success();

        sandbox
            .larder()
            .args(["cat", "dataset-A", "--version-tag", "r1"])
            .assert()
            .success()
            .stdout("xyz");
        sandbox
            .larder()
            .args(["cat", "dataset-A", "--version-tag", "r2"])
            .assert()
            .failure();
    }

    #[test]
    fn import_missing_file_fails() {
        let sandbox = Sandbox::new();

        sandbox
            .larder()
            .args(["import", "dataset-A", "/nonexistent/file"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Fetch failed"));

        sandbox
            .larder()
            .args(["list", "--format", "json"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[]"));
    }

    #[test]
    fn key_is_order_independent() {
        let sandbox = Sandbox::new();

        let first = sandbox
            .larder()
            .args(["key", "ensembl", "-p", "species=human", "-p", "release=111"])
            .assert()
            .success()
            .get_output()
            .stdout
            .clone();
        let second = sandbox
            .larder()
            .args(["key", "ensembl", "-p", "release=111", "-p", "species=human"])
            .assert()
            .success()
            .get_output()
            .stdout
            .clone();

        assert_eq!(first, second);
        let line = String::from_utf8(first).unwrap();
        let fp = line.split_whitespace().next().unwrap();
        assert_eq!(fp.len(), 64);
        assert!(line.contains("ensembl[release=111,species=human]"));
    }

    #[test]
    fn params_select_distinct_entries() {
        let sandbox = Sandbox::new();
        let human = sandbox.file("human.gtf", b"human");
        let mouse = sandbox.file("mouse.gtf", b"mouse");

        sandbox
            .larder()
            .args(["import", "ensembl", "-p", "species=human"])
            .arg(&human)
            .assert()
            .success();
        sandbox
            .larder()
            .args(["import", "ensembl", "-p", "species=mouse"])
            .arg(&mouse)
            .assert()
            .success();

        sandbox
            .larder()
            .args(["cat", "ensembl", "-p", "species=mouse"])
            .assert()
            .stdout("mouse");
        sandbox
            .larder()
            .args(["list", "--format", "plain"])
            .assert()
            .success()
            .stdout(predicate::str::contains("ensembl[species=human]"))
            .stdout(predicate::str::contains("ensembl[species=mouse]"));
    }

    #[test]
    fn list_formats() {
        let sandbox = Sandbox::new();

        sandbox
            .larder()
            .args(["list"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No cached entries"));

        sandbox.import("dataset-A", &sandbox.file("a.txt", b"xyz"));

        sandbox
            .larder()
            .args(["list"])
            .assert()
            .success()
            .stdout(predicate::str::contains("FINGERPRINT"))
            .stdout(predicate::str::contains("dataset-A"));

        sandbox
            .larder()
            .args(["list", "--format", "json"])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"label\": \"dataset-A\""))
            .stdout(predicate::str::contains("\"size_bytes\": 3"));
    }

    #[test]
    fn stats_counts_entries() {
        let sandbox = Sandbox::new();
        sandbox.import("a", &sandbox.file("a.txt", b"xyz"));
        sandbox.import("b", &sandbox.file("b.txt", b"abcd"));

        sandbox
            .larder()
            .arg("stats")
            .assert()
            .success()
            .stdout(predicate::str::contains("entries:").and(predicate::str::contains("2")))
            .stdout(predicate::str::contains("7 B"));
    }

    #[test]
    fn prune_without_limits_does_nothing() {
        let sandbox = Sandbox::new();
        sandbox.import("a", &sandbox.file("a.txt", b"xyz"));

        sandbox
            .larder()
            .arg("prune")
            .assert()
            .success()
            .stdout(predicate::str::contains("No limits configured"));
    }

    #[test]
    fn prune_by_total_size() {
        let sandbox = Sandbox::new();
        let chunk = vec![b'x'; 600 * 1024];
        sandbox.import("older", &sandbox.file("older.bin", &chunk));
        sandbox.import("newer", &sandbox.file("newer.bin", &chunk));

        sandbox
            .larder()
            .args(["prune", "--max-total-mb", "1", "--dry-run"])
            .assert()
            .success()
            .stdout(predicate::str::contains("older"))
            .stdout(predicate::str::contains("Dry run"));
        sandbox
            .larder()
            .args(["cat", "older"])
            .assert()
            .success();

        sandbox
            .larder()
            .args(["prune", "--max-total-mb", "1"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Removed 1 entry"));

        sandbox.larder().args(["cat", "older"]).assert().failure();
        sandbox.larder().args(["cat", "newer"]).assert().success();
    }

    #[test]
    fn clean_removes_leftovers() {
        let sandbox = Sandbox::new();
        sandbox.import("dataset-A", &sandbox.file("a.txt", b"xyz"));

        let key_line = sandbox
            .larder()
            .args(["key", "dataset-A"])
            .assert()
            .success()
            .get_output()
            .stdout
            .clone();
        let key_line = String::from_utf8(key_line).unwrap();
        let fp = key_line.split_whitespace().next().unwrap();
        let leftover = sandbox
            .root()
            .join("entries")
            .join(format!(".tmp-{}-0123abcd", fp));
        std::fs::write(&leftover, b"partial").unwrap();

        sandbox
            .larder()
            .arg("clean")
            .assert()
            .success()
            .stdout(predicate::str::contains("Removed 1 orphaned file"));

        assert!(!leftover.exists());
        sandbox
            .larder()
            .args(["cat", "dataset-A"])
            .assert()
            .stdout("xyz");
    }

    #[test]
    fn journal_records_mutations() {
        let sandbox = Sandbox::new();
        sandbox.import("dataset-A", &sandbox.file("a.txt", b"xyz"));
        sandbox
            .larder()
            .args(["invalidate", "dataset-A"])
            .assert()
            .success();

        let journal = std::fs::read_to_string(sandbox.root().join("journal.log")).unwrap();
        assert!(journal.contains("\"event\":\"entry.stored\""));
        assert!(journal.contains("\"event\":\"entry.invalidated\""));
    }

    #[test]
    fn config_path() {
        let sandbox = Sandbox::new();

        sandbox
            .larder()
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("config.toml"));
    }

    #[test]
    fn config_init_and_show() {
        let sandbox = Sandbox::new();

        sandbox
            .larder()
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Configuration initialized"));
        assert!(sandbox.config_path().exists());

        sandbox
            .larder()
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("already exists"));

        sandbox
            .larder()
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[general]"))
            .stdout(predicate::str::contains("[cache]"));
    }

    #[test]
    fn invalid_config_is_reported() {
        let sandbox = Sandbox::new();
        std::fs::write(sandbox.config_path(), "[general]\nlog_format = \"xml\"\n").unwrap();

        sandbox
            .larder()
            .arg("stats")
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid configuration"));
    }

    #[test]
    fn default_ttl_from_config() {
        let sandbox = Sandbox::new();
        std::fs::write(sandbox.config_path(), "[cache]\ndefault_ttl_secs = 3600\n").unwrap();
        sandbox.import("dataset-A", &sandbox.file("a.txt", b"xyz"));

        sandbox
            .larder()
            .args(["list", "--format", "json"])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"ttl_secs\": 3600"));
    }
}
