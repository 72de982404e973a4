use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::process::Command as AsyncCommand;
use tracing::debug;

/// Name of the remote pointing at the parent repository
pub const UPSTREAM_REMOTE: &str = "upstream";

/// Executes git invocations. Every call names its working directory
/// explicitly; the process working directory is never changed.
#[async_trait]
pub trait GitRunner: Send + Sync {
    async fn run(&self, dir: &Path, args: &[String]) -> Result<()>;
}

/// Runs the system git binary as a subprocess
pub struct GitCommand {
    binary: String,
}

impl GitCommand {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl GitRunner for GitCommand {
    async fn run(&self, dir: &Path, args: &[String]) -> Result<()> {
        debug!("{} {} (in {})", self.binary, args.join(" "), dir.display());

        let output = AsyncCommand::new(&self.binary)
            .args(args)
            .current_dir(dir)
            .env("GIT_TERMINAL_PROMPT", "0")
            .output()
            .await
            .with_context(|| format!("Failed to execute {}", self.binary))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!(
                "git {} exited with {}: {}",
                args.first().map(String::as_str).unwrap_or_default(),
                output.status,
                stderr.trim()
            ));
        }

        Ok(())
    }
}

/// The git commands issued for one fork, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitStep {
    Clone,
    AddRemote,
    Fetch,
    Reset,
    Push,
}

impl fmt::Display for GitStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GitStep::Clone => "clone",
            GitStep::AddRemote => "remote add",
            GitStep::Fetch => "fetch",
            GitStep::Reset => "reset",
            GitStep::Push => "push",
        };
        f.write_str(name)
    }
}

/// One git invocation: what it is, where it runs, and its argv
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub step: GitStep,
    pub dir: PathBuf,
    pub args: Vec<String>,
}

/// Fully resolved parameters for synchronizing one fork
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForkPlan {
    pub fork: String,
    pub parent: String,
    /// Branch fetched from the parent
    pub upstream_branch: String,
    /// Branch overwritten on the fork
    pub fork_branch: String,
    pub clone_url: String,
    pub upstream_url: String,
    pub clone_depth: u32,
}

impl ForkPlan {
    /// Build a plan from the fork's and parent's names and branches
    pub fn new(
        host: &str,
        fork: &str,
        fork_branch: &str,
        parent: &str,
        upstream_branch: &str,
        clone_depth: u32,
    ) -> Self {
        Self {
            fork: fork.to_string(),
            parent: parent.to_string(),
            upstream_branch: upstream_branch.to_string(),
            fork_branch: fork_branch.to_string(),
            clone_url: ssh_url(host, fork),
            upstream_url: https_url(host, parent),
            clone_depth: clone_depth.max(1),
        }
    }

    /// The git invocations that bring `checkout` in line with the parent.
    ///
    /// The clone runs in the checkout's parent directory; every later step
    /// runs inside the checkout.
    pub fn invocations(&self, checkout: &Path) -> Vec<Invocation> {
        let root = checkout
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let inside = checkout.to_path_buf();

        vec![
            Invocation {
                step: GitStep::Clone,
                dir: root,
                args: argv(&[
                    "clone",
                    "--depth",
                    &self.clone_depth.to_string(),
                    &self.clone_url,
                    &checkout.to_string_lossy(),
                ]),
            },
            Invocation {
                step: GitStep::AddRemote,
                dir: inside.clone(),
                args: argv(&["remote", "add", UPSTREAM_REMOTE, &self.upstream_url]),
            },
            Invocation {
                step: GitStep::Fetch,
                dir: inside.clone(),
                args: argv(&["fetch", UPSTREAM_REMOTE, &self.upstream_branch]),
            },
            Invocation {
                step: GitStep::Reset,
                dir: inside.clone(),
                args: argv(&[
                    "reset",
                    "--hard",
                    &format!("{}/{}", UPSTREAM_REMOTE, self.upstream_branch),
                ]),
            },
            Invocation {
                step: GitStep::Push,
                dir: inside,
                args: argv(&["push", "--force", "origin", &self.fork_branch]),
            },
        ]
    }
}

/// Authenticated (SSH) remote for a repository
pub fn ssh_url(host: &str, full_name: &str) -> String {
    format!("git@{}:{}.git", host, full_name)
}

/// Anonymous (HTTPS) remote for a repository
pub fn https_url(host: &str, full_name: &str) -> String {
    format!("https://{}/{}.git", host, full_name)
}

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|part| part.to_string()).collect()
}
