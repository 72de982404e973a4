//! forkupdate - Keep GitHub forks in sync with their upstream repositories
//!
//! forkupdate lists a user's repositories, and for every fork clones it into a
//! scratch directory, fetches the parent's default branch, hard-resets onto it
//! and force-pushes the result back to the fork.
//!
//! ## Modules
//!
//! - [`config`]: Configuration file and credential resolution
//! - [`github`]: GitHub API integration
//! - [`git`]: Git subprocess invocation and per-fork command plans
//! - [`sync`]: The fork update loop
//! - [`health`]: Offline preflight checks

pub mod config;
pub mod git;
pub mod github;
pub mod health;
pub mod sync;
pub mod workdir;

pub use config::{Config, Credentials};
pub use github::GitHubClient;
pub use git::{ForkPlan, GitCommand, GitRunner};
pub use health::HealthCheck;
pub use sync::{SyncEngine, SyncResult, SyncSummary};
