//! Common test utilities for running the forkupdate binary in isolation

use assert_fs::fixture::PathChild;
use assert_fs::TempDir;
use std::path::PathBuf;
use std::process::{Command, Output};

/// Isolated config directory and scratch space for one test
pub struct TestEnvironment {
    pub temp_dir: TempDir,
}

impl TestEnvironment {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        std::fs::create_dir_all(temp_dir.child("work").path()).expect("Failed to create work dir");
        Self { temp_dir }
    }

    /// Write a config file pointing the API at `api_url`
    pub fn write_config(&self, api_url: &str) -> PathBuf {
        let config_path = self.temp_dir.child("config.yml");
        let content = format!(
            "github:\n  api_url: \"{}\"\nsync:\n  work_dir: \"{}\"\n",
            api_url,
            self.temp_dir.child("work").path().display()
        );
        std::fs::write(config_path.path(), content).expect("Failed to write test config");
        config_path.path().to_path_buf()
    }

    /// The binary, with credentials and user config stripped from its environment
    pub fn command(&self) -> Command {
        let mut command = Command::new(env!("CARGO_BIN_EXE_forkupdate"));
        command
            .env_remove("GITHUB_USERNAME")
            .env_remove("GITHUB_TOKEN")
            .env_remove("RUST_LOG")
            .env("XDG_CONFIG_HOME", self.temp_dir.path())
            .env("HOME", self.temp_dir.path());
        command
    }
}

pub fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

pub fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}
