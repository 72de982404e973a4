//! Offline preflight checks for the `doctor` command

use crate::config::{Config, Credentials};
use std::path::Path;

/// Result of system health checks
#[derive(Debug, Clone)]
pub struct HealthCheck {
    /// Git installation status
    pub git: CheckResult,
    /// Username and token presence
    pub credentials: CheckResult,
    /// Working copy root status
    pub work_dir: CheckResult,
    /// SSH configuration status (warning only; forks are cloned over SSH)
    pub ssh: CheckResult,
}

/// Result of an individual health check
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub passed: bool,
    pub message: String,
    pub details: Option<String>,
    pub is_warning: bool,
}

impl CheckResult {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
            details: None,
            is_warning: false,
        }
    }

    fn ok_with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            details: Some(details.into()),
            ..Self::ok(message)
        }
    }

    fn error_with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            passed: false,
            message: message.into(),
            details: Some(details.into()),
            is_warning: false,
        }
    }

    fn warning_with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
            details: Some(details.into()),
            is_warning: true,
        }
    }
}

impl HealthCheck {
    /// Run all health checks. Nothing here touches the network.
    pub fn run(config: &Config, credentials: &anyhow::Result<Credentials>) -> Self {
        Self {
            git: Self::check_git(&config.sync.git_binary),
            credentials: Self::check_credentials(credentials),
            work_dir: Self::check_work_dir(&config.work_root()),
            ssh: Self::check_ssh(),
        }
    }

    /// Check if all required checks passed (excludes warnings)
    pub fn all_passed(&self) -> bool {
        self.git.passed && self.credentials.passed && self.work_dir.passed
    }

    /// Get list of warnings
    pub fn warnings(&self) -> Vec<&CheckResult> {
        [&self.git, &self.credentials, &self.work_dir, &self.ssh]
            .into_iter()
            .filter(|r| r.is_warning)
            .collect()
    }

    fn check_git(binary: &str) -> CheckResult {
        match std::process::Command::new(binary).arg("--version").output() {
            Ok(output) if output.status.success() => {
                let version = String::from_utf8_lossy(&output.stdout);
                CheckResult::ok_with_details("Git installed", version.trim().to_string())
            }
            Ok(output) => CheckResult::error_with_details(
                "Git command failed",
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ),
            Err(_) => CheckResult::error_with_details(
                format!("{} not found in PATH", binary),
                "Install git: https://git-scm.com/downloads",
            ),
        }
    }

    fn check_credentials(credentials: &anyhow::Result<Credentials>) -> CheckResult {
        match credentials {
            Ok(creds) => CheckResult::ok_with_details(
                "Credentials found",
                format!("Username: {}", creds.username()),
            ),
            Err(e) => CheckResult::error_with_details(
                format!("Credentials incomplete: {}", e),
                "Set GITHUB_USERNAME and GITHUB_TOKEN, or pass --username and --token",
            ),
        }
    }

    fn check_work_dir(root: &Path) -> CheckResult {
        if root.is_dir() {
            CheckResult::ok_with_details("Work directory exists", root.display().to_string())
        } else {
            CheckResult::error_with_details(
                "Work directory does not exist",
                format!("Run: mkdir -p {}", root.display()),
            )
        }
    }

    /// Check SSH configuration (warning only)
    fn check_ssh() -> CheckResult {
        let ssh_dir = dirs::home_dir().unwrap_or_default().join(".ssh");
        if !ssh_dir.exists() {
            return CheckResult::warning_with_details(
                "~/.ssh directory not found",
                "Cloning forks over SSH may not work. Run: ssh-keygen -t ed25519",
            );
        }

        let ssh_keys = ["id_rsa", "id_ed25519", "id_ecdsa"];
        let found_keys: Vec<_> = ssh_keys
            .iter()
            .filter(|key| ssh_dir.join(key).exists())
            .copied()
            .collect();

        if found_keys.is_empty() {
            CheckResult::warning_with_details(
                "No SSH keys found",
                "Cloning forks over SSH may not work. Run: ssh-keygen -t ed25519",
            )
        } else {
            CheckResult::ok_with_details("SSH keys found", found_keys.join(", "))
        }
    }

    /// Get all checks for iteration
    pub fn all_checks(&self) -> [(&'static str, &CheckResult); 4] {
        [
            ("Git Installation", &self.git),
            ("GitHub Credentials", &self.credentials),
            ("Work Directory", &self.work_dir),
            ("SSH Configuration", &self.ssh),
        ]
    }
}
