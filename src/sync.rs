//! Sync Engine - Brings each fork in line with its upstream parent
//!
//! Repositories are processed one at a time. For every fork the engine
//! fetches its metadata, clones it into a scratch working copy, points an
//! `upstream` remote at the parent, hard-resets onto the parent's default
//! branch and force-pushes the result back to the fork. A failure stops that
//! fork's sequence and the engine moves on to the next repository.

use crate::config::{Config, Credentials};
use crate::git::{ForkPlan, GitCommand, GitRunner, GitStep};
use crate::github::{GitHubClient, RepoService, Repository};
use crate::workdir::WorkingCopy;
use anyhow::{anyhow, Context, Result};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// How far a fork's synchronization got
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStage {
    Start,
    MetadataFetched,
    Cloned,
    RemoteAdded,
    Fetched,
    Reset,
    Pushed,
    Done,
}

impl SyncStage {
    /// Stage reached once `step` has succeeded
    pub fn after(step: GitStep) -> Self {
        match step {
            GitStep::Clone => SyncStage::Cloned,
            GitStep::AddRemote => SyncStage::RemoteAdded,
            GitStep::Fetch => SyncStage::Fetched,
            GitStep::Reset => SyncStage::Reset,
            GitStep::Push => SyncStage::Pushed,
        }
    }
}

/// Result of processing one repository
#[derive(Debug)]
pub enum SyncResult {
    /// Fork now matches its parent's default branch
    Updated { repo: String, parent: String },
    /// Repository was not touched
    Skipped { repo: String, reason: String },
    /// A step failed; `stage` is the last stage reached
    Failed {
        repo: String,
        stage: SyncStage,
        error: String,
    },
}

/// Error returned when a single fork cannot be synchronized
#[derive(Debug)]
pub struct SyncFailure {
    pub stage: SyncStage,
    pub error: anyhow::Error,
}

impl fmt::Display for SyncFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#} (after stage {:?})", self.error, self.stage)
    }
}

impl std::error::Error for SyncFailure {}

/// Results from a complete sync operation
#[derive(Debug)]
pub struct SyncSummary {
    pub total_repositories: usize,
    pub forks: usize,
    pub updated: usize,
    pub failed: usize,
    pub skipped: usize,
    pub duration: Duration,
    pub results: Vec<SyncResult>,
}

impl SyncSummary {
    fn compile(total_repositories: usize, results: Vec<SyncResult>, duration: Duration) -> Self {
        let mut updated = 0;
        let mut failed = 0;
        let mut skipped = 0;

        for result in &results {
            match result {
                SyncResult::Updated { .. } => updated += 1,
                SyncResult::Failed { .. } => failed += 1,
                SyncResult::Skipped { .. } => skipped += 1,
            }
        }

        Self {
            total_repositories,
            forks: updated + failed,
            updated,
            failed,
            skipped,
            duration,
            results,
        }
    }
}

/// A fork and the plan a sync would execute for it
#[derive(Debug)]
pub struct PlannedFork {
    pub repo: String,
    pub plan: Result<ForkPlan>,
}

/// The main sync engine that orchestrates fork synchronization
pub struct SyncEngine {
    config: Config,
    username: String,
    repos: Box<dyn RepoService>,
    git: Box<dyn GitRunner>,
    work_root: PathBuf,
}

impl SyncEngine {
    /// Create a sync engine from explicit collaborators
    pub fn new(
        config: Config,
        username: impl Into<String>,
        repos: Box<dyn RepoService>,
        git: Box<dyn GitRunner>,
    ) -> Self {
        let work_root = config.work_root();
        Self {
            config,
            username: username.into(),
            repos,
            git,
            work_root,
        }
    }

    /// Create a sync engine backed by the GitHub API and the git binary
    pub fn connect(config: Config, credentials: &Credentials) -> Result<Self> {
        let client = GitHubClient::new(&config, credentials)?;
        let git = GitCommand::new(config.sync.git_binary.clone());

        Ok(Self::new(
            config,
            credentials.username(),
            Box::new(client),
            Box::new(git),
        ))
    }

    /// List the user's repositories and synchronize every fork
    pub async fn run(&self) -> Result<SyncSummary> {
        let start_time = Instant::now();

        info!("Starting fork synchronization for {}", self.username);

        let repositories = self
            .repos
            .list_user_repos(&self.username)
            .await
            .context("Failed to list repositories")?;

        let mut results = Vec::with_capacity(repositories.len());

        for repo in &repositories {
            if let Some(reason) = self.skip_reason(repo) {
                debug!("Skipping {}: {}", repo.full_name, reason);
                results.push(SyncResult::Skipped {
                    repo: repo.full_name.clone(),
                    reason: reason.to_string(),
                });
                continue;
            }

            match self.update_fork(repo).await {
                Ok(plan) => results.push(SyncResult::Updated {
                    repo: plan.fork,
                    parent: plan.parent,
                }),
                Err(failure) => {
                    error!("Failed to update {}: {}", repo.full_name, failure);
                    results.push(SyncResult::Failed {
                        repo: repo.full_name.clone(),
                        stage: failure.stage,
                        error: format!("{:#}", failure.error),
                    });
                }
            }
        }

        let summary = SyncSummary::compile(repositories.len(), results, start_time.elapsed());

        info!(
            "Sync completed in {:.2}s: {} updated, {} failed, {} skipped",
            summary.duration.as_secs_f64(),
            summary.updated,
            summary.failed,
            summary.skipped
        );

        Ok(summary)
    }

    /// Forks that a sync would process, without fetching their metadata
    pub async fn list_forks(&self) -> Result<Vec<Repository>> {
        let repositories = self
            .repos
            .list_user_repos(&self.username)
            .await
            .context("Failed to list repositories")?;

        Ok(repositories
            .into_iter()
            .filter(|repo| self.skip_reason(repo).is_none())
            .collect())
    }

    /// Resolve every fork's plan without running git
    pub async fn dry_run(&self) -> Result<Vec<PlannedFork>> {
        info!("Running dry-run fork analysis");

        let mut planned = Vec::new();
        for repo in self.list_forks().await? {
            let plan = self.plan_fork(&repo).await;
            planned.push(PlannedFork {
                repo: repo.full_name,
                plan,
            });
        }

        Ok(planned)
    }

    /// Synchronize one fork with its parent.
    ///
    /// The working copy is removed on every exit path.
    pub async fn update_fork(&self, repo: &Repository) -> Result<ForkPlan, SyncFailure> {
        let mut stage = SyncStage::Start;

        let plan = self
            .plan_fork(repo)
            .await
            .map_err(|error| SyncFailure { stage, error })?;
        stage = SyncStage::MetadataFetched;

        info!("Updating {} ({})...", plan.fork, plan.parent);

        let checkout = WorkingCopy::prepare(&self.work_root, &repo.name).await;
        let outcome = self.run_steps(&plan, checkout.path(), &mut stage).await;
        checkout.cleanup().await;
        outcome.map_err(|error| SyncFailure { stage, error })?;

        stage = SyncStage::Done;
        info!("Done: {} ({:?})", plan.fork, stage);

        Ok(plan)
    }

    /// Run the git sequence in order, advancing `stage` after each success
    async fn run_steps(
        &self,
        plan: &ForkPlan,
        checkout: &Path,
        stage: &mut SyncStage,
    ) -> Result<()> {
        for invocation in plan.invocations(checkout) {
            self.git
                .run(&invocation.dir, &invocation.args)
                .await
                .with_context(|| format!("git {} failed for {}", invocation.step, plan.fork))?;

            *stage = SyncStage::after(invocation.step);
            debug!("{}: reached {:?}", plan.fork, stage);
        }
        Ok(())
    }

    /// Fetch a fork's metadata and resolve remotes and branches
    async fn plan_fork(&self, repo: &Repository) -> Result<ForkPlan> {
        let owner = repo.owner().unwrap_or(&self.username);

        let metadata = self
            .repos
            .get_repo(owner, &repo.name)
            .await
            .with_context(|| format!("Failed to fetch metadata for {}", repo.full_name))?;

        let parent = metadata
            .parent
            .as_ref()
            .ok_or_else(|| anyhow!("{} has no parent repository", repo.full_name))?;

        let fork_branch = metadata
            .default_branch
            .clone()
            .or_else(|| repo.default_branch.clone())
            .ok_or_else(|| anyhow!("{} has no default branch", repo.full_name))?;

        let upstream_branch = parent
            .default_branch
            .clone()
            .unwrap_or_else(|| fork_branch.clone());

        Ok(ForkPlan::new(
            &self.config.github.host,
            &repo.full_name,
            &fork_branch,
            &parent.full_name,
            &upstream_branch,
            self.config.sync.clone_depth,
        ))
    }

    fn skip_reason(&self, repo: &Repository) -> Option<&'static str> {
        if !repo.fork {
            Some("not a fork")
        } else if self.config.is_excluded(&repo.name) {
            Some("excluded by pattern")
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::github::{MockRepoService, ParentRepo};
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    /// What the fake git saw for one invocation
    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Call {
        dir: PathBuf,
        args: Vec<String>,
        /// Whether the checkout existed when a non-clone step ran
        checkout_present: bool,
    }

    type FailWhen = Box<dyn Fn(&[String]) -> bool + Send + Sync>;

    /// Records invocations; `clone` creates the target directory like git would
    struct FakeGit {
        calls: Arc<Mutex<Vec<Call>>>,
        fail_when: FailWhen,
    }

    impl FakeGit {
        fn new(fail_when: FailWhen) -> (Self, Arc<Mutex<Vec<Call>>>) {
            let calls = Arc::new(Mutex::new(Vec::new()));
            (
                Self {
                    calls: calls.clone(),
                    fail_when,
                },
                calls,
            )
        }

        fn succeeding() -> (Self, Arc<Mutex<Vec<Call>>>) {
            Self::new(Box::new(|_: &[String]| false))
        }
    }

    #[async_trait]
    impl GitRunner for FakeGit {
        async fn run(&self, dir: &Path, args: &[String]) -> Result<()> {
            let is_clone = args[0] == "clone";
            self.calls.lock().unwrap().push(Call {
                dir: dir.to_path_buf(),
                args: args.to_vec(),
                checkout_present: is_clone || dir.exists(),
            });

            if (self.fail_when)(args) {
                return Err(anyhow!("fatal: simulated {} failure", args[0]));
            }
            if is_clone {
                let target = args.last().expect("clone target");
                std::fs::create_dir_all(Path::new(target).join(".git"))?;
            }
            Ok(())
        }
    }

    fn repo(name: &str, fork: bool) -> Repository {
        Repository {
            name: name.to_string(),
            full_name: format!("alice/{}", name),
            fork,
            default_branch: Some("main".to_string()),
            parent: None,
        }
    }

    fn with_parent(name: &str, parent: &str, parent_branch: Option<&str>) -> Repository {
        Repository {
            parent: Some(ParentRepo {
                full_name: parent.to_string(),
                default_branch: parent_branch.map(str::to_string),
            }),
            ..repo(name, true)
        }
    }

    fn service(listing: Vec<Repository>, metadata: Vec<Repository>) -> MockRepoService {
        let mut mock = MockRepoService::new();
        mock.expect_list_user_repos()
            .withf(|username| username == "alice")
            .returning(move |_| Ok(listing.clone()));
        for meta in metadata {
            let name = meta.name.clone();
            mock.expect_get_repo()
                .withf(move |owner, repo| owner == "alice" && repo == name)
                .returning(move |_, _| Ok(meta.clone()));
        }
        mock
    }

    fn engine(root: &TempDir, repos: MockRepoService, git: FakeGit) -> SyncEngine {
        let mut config = Config::default();
        config.sync.work_dir = Some(root.path().to_string_lossy().into_owned());
        SyncEngine::new(config, "alice", Box::new(repos), Box::new(git))
    }

    fn args(call: &Call) -> Vec<&str> {
        call.args.iter().map(String::as_str).collect()
    }

    #[tokio::test]
    async fn test_only_forks_are_synchronized() {
        let root = TempDir::new().unwrap();
        let listing = vec![repo("a", false), repo("b", true)];
        // Only `b` has a metadata expectation; a lookup of `a` would panic
        let repos = service(listing, vec![with_parent("b", "upstream/b", Some("main"))]);
        let (git, calls) = FakeGit::succeeding();

        let summary = engine(&root, repos, git).run().await.unwrap();

        assert_eq!(summary.total_repositories, 2);
        assert_eq!(summary.forks, 1);
        assert_eq!(summary.updated, 1);
        assert_eq!(summary.skipped, 1);
        assert_matches!(&summary.results[0], SyncResult::Skipped { repo, .. } if repo == "alice/a");
        assert_matches!(
            &summary.results[1],
            SyncResult::Updated { repo, parent } if repo == "alice/b" && parent == "upstream/b"
        );

        let calls = calls.lock().unwrap();
        let checkout = root.path().join("forkupdate-b");
        assert_eq!(calls.len(), 5);
        assert_eq!(
            args(&calls[0]),
            vec![
                "clone",
                "--depth",
                "1",
                "git@github.com:alice/b.git",
                checkout.to_str().unwrap()
            ]
        );
        assert_eq!(calls[0].dir, root.path());
        assert_eq!(
            args(&calls[1]),
            vec!["remote", "add", "upstream", "https://github.com/upstream/b.git"]
        );
        assert_eq!(args(&calls[2]), vec!["fetch", "upstream", "main"]);
        assert_eq!(args(&calls[3]), vec!["reset", "--hard", "upstream/main"]);
        assert_eq!(args(&calls[4]), vec!["push", "--force", "origin", "main"]);
        assert!(calls.iter().all(|call| call.checkout_present));
        assert!(calls[1..].iter().all(|call| call.dir == checkout));

        assert!(!checkout.exists());
    }

    #[tokio::test]
    async fn test_clone_failure_moves_on_to_next_fork() {
        let root = TempDir::new().unwrap();
        let cwd_before = std::env::current_dir().unwrap();
        let repos = service(
            vec![repo("b", true), repo("c", true)],
            vec![
                with_parent("b", "upstream/b", Some("main")),
                with_parent("c", "upstream/c", Some("main")),
            ],
        );
        let (git, calls) = FakeGit::new(Box::new(|args: &[String]| {
            args[0] == "clone" && args.iter().any(|a| a.ends_with("alice/b.git"))
        }));

        let summary = engine(&root, repos, git).run().await.unwrap();

        assert_eq!(summary.updated, 1);
        assert_eq!(summary.failed, 1);
        assert_matches!(
            &summary.results[0],
            SyncResult::Failed { repo, stage: SyncStage::MetadataFetched, error }
                if repo == "alice/b" && error.contains("git clone failed for alice/b")
        );
        assert_matches!(&summary.results[1], SyncResult::Updated { repo, .. } if repo == "alice/c");

        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 1 + 5);
        assert!(!root.path().join("forkupdate-b").exists());
        assert!(!root.path().join("forkupdate-c").exists());
        assert_eq!(std::env::current_dir().unwrap(), cwd_before);
    }

    #[tokio::test]
    async fn test_failing_step_stops_the_sequence() {
        let cases = [
            ("clone", 1, SyncStage::MetadataFetched),
            ("remote", 2, SyncStage::Cloned),
            ("fetch", 3, SyncStage::RemoteAdded),
            ("reset", 4, SyncStage::Fetched),
            ("push", 5, SyncStage::Reset),
        ];

        for (failing, expected_calls, expected_stage) in cases {
            let root = TempDir::new().unwrap();
            let repos = service(
                vec![repo("b", true)],
                vec![with_parent("b", "upstream/b", Some("main"))],
            );
            let (git, calls) = FakeGit::new(Box::new(move |args: &[String]| args[0] == failing));

            let summary = engine(&root, repos, git).run().await.unwrap();

            assert_eq!(calls.lock().unwrap().len(), expected_calls, "failing {}", failing);
            assert_matches!(
                &summary.results[0],
                SyncResult::Failed { stage, .. } if *stage == expected_stage
            );
            assert!(!root.path().join("forkupdate-b").exists(), "failing {}", failing);
        }
    }

    #[tokio::test]
    async fn test_metadata_failure_skips_git() {
        let root = TempDir::new().unwrap();
        let mut repos = MockRepoService::new();
        repos
            .expect_list_user_repos()
            .returning(|_| Ok(vec![repo("b", true)]));
        repos
            .expect_get_repo()
            .returning(|_, _| Err(anyhow!("404 Not Found")));
        let (git, calls) = FakeGit::succeeding();

        let summary = engine(&root, repos, git).run().await.unwrap();

        assert!(calls.lock().unwrap().is_empty());
        assert_matches!(
            &summary.results[0],
            SyncResult::Failed { stage: SyncStage::Start, error, .. }
                if error.contains("Failed to fetch metadata for alice/b")
        );
    }

    #[tokio::test]
    async fn test_fork_without_parent_fails_before_clone() {
        let root = TempDir::new().unwrap();
        let repos = service(vec![repo("b", true)], vec![repo("b", true)]);
        let (git, calls) = FakeGit::succeeding();

        let summary = engine(&root, repos, git).run().await.unwrap();

        assert!(calls.lock().unwrap().is_empty());
        assert_matches!(
            &summary.results[0],
            SyncResult::Failed { error, .. } if error.contains("has no parent repository")
        );
    }

    #[tokio::test]
    async fn test_listing_failure_is_fatal() {
        let root = TempDir::new().unwrap();
        let mut repos = MockRepoService::new();
        repos
            .expect_list_user_repos()
            .returning(|_| Err(anyhow!("401 Bad credentials")));
        let (git, calls) = FakeGit::succeeding();

        let err = engine(&root, repos, git).run().await.unwrap_err();

        assert!(err.to_string().contains("Failed to list repositories"));
        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_parent_default_branch_is_fetched() {
        let root = TempDir::new().unwrap();
        let repos = service(
            vec![repo("b", true)],
            vec![with_parent("b", "upstream/b", Some("master"))],
        );
        let (git, calls) = FakeGit::succeeding();

        engine(&root, repos, git).run().await.unwrap();

        let calls = calls.lock().unwrap();
        assert_eq!(args(&calls[2]), vec!["fetch", "upstream", "master"]);
        assert_eq!(args(&calls[3]), vec!["reset", "--hard", "upstream/master"]);
        assert_eq!(args(&calls[4]), vec!["push", "--force", "origin", "main"]);
    }

    #[tokio::test]
    async fn test_stale_working_copy_is_replaced() {
        let root = TempDir::new().unwrap();
        let stale = root.path().join("forkupdate-b");
        std::fs::create_dir_all(&stale).unwrap();
        std::fs::write(stale.join("leftover"), "from a crashed run").unwrap();

        let repos = service(
            vec![repo("b", true)],
            vec![with_parent("b", "upstream/b", Some("main"))],
        );
        let (git, _calls) = FakeGit::new(Box::new(|args: &[String]| {
            // Clone must see a clean slate
            args[0] == "clone" && Path::new(args.last().unwrap()).join("leftover").exists()
        }));

        let summary = engine(&root, repos, git).run().await.unwrap();

        assert_eq!(summary.updated, 1);
        assert!(!stale.exists());
    }

    #[tokio::test]
    async fn test_repeated_runs_issue_identical_commands() {
        let root = TempDir::new().unwrap();
        let repos = service(
            vec![repo("b", true)],
            vec![with_parent("b", "upstream/b", Some("main"))],
        );
        let (git, calls) = FakeGit::succeeding();
        let engine = engine(&root, repos, git);

        engine.run().await.unwrap();
        let first: Vec<Call> = calls.lock().unwrap().drain(..).collect();
        engine.run().await.unwrap();
        let second: Vec<Call> = calls.lock().unwrap().clone();

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_excluded_forks_are_skipped() {
        let root = TempDir::new().unwrap();
        let repos = service(vec![repo("archived-b", true)], vec![]);
        let (git, calls) = FakeGit::succeeding();
        let mut engine = engine(&root, repos, git);
        engine.config.github.exclude_patterns = vec!["archived-*".to_string()];

        let summary = engine.run().await.unwrap();

        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.forks, 0);
        assert_matches!(
            &summary.results[0],
            SyncResult::Skipped { reason, .. } if reason == "excluded by pattern"
        );
        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dry_run_does_not_invoke_git() {
        let root = TempDir::new().unwrap();
        let repos = service(
            vec![repo("a", false), repo("b", true)],
            vec![with_parent("b", "upstream/b", None)],
        );
        let (git, calls) = FakeGit::succeeding();

        let planned = engine(&root, repos, git).dry_run().await.unwrap();

        assert_eq!(planned.len(), 1);
        assert_eq!(planned[0].repo, "alice/b");
        let plan = planned[0].plan.as_ref().unwrap();
        assert_eq!(plan.clone_url, "git@github.com:alice/b.git");
        assert_eq!(plan.upstream_url, "https://github.com/upstream/b.git");
        // Parent without a default branch falls back to the fork's
        assert_eq!(plan.upstream_branch, "main");
        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_forks_skips_metadata() {
        let root = TempDir::new().unwrap();
        let repos = service(vec![repo("a", false), repo("b", true), repo("c", true)], vec![]);
        let (git, _calls) = FakeGit::succeeding();

        let forks = engine(&root, repos, git).list_forks().await.unwrap();

        let names: Vec<&str> = forks.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["b", "c"]);
    }

    #[test]
    fn test_stage_after_step() {
        assert_eq!(SyncStage::after(GitStep::Clone), SyncStage::Cloned);
        assert_eq!(SyncStage::after(GitStep::AddRemote), SyncStage::RemoteAdded);
        assert_eq!(SyncStage::after(GitStep::Fetch), SyncStage::Fetched);
        assert_eq!(SyncStage::after(GitStep::Reset), SyncStage::Reset);
        assert_eq!(SyncStage::after(GitStep::Push), SyncStage::Pushed);
    }

    #[test]
    fn test_summary_counts() {
        let results = vec![
            SyncResult::Updated {
                repo: "alice/b".to_string(),
                parent: "upstream/b".to_string(),
            },
            SyncResult::Failed {
                repo: "alice/c".to_string(),
                stage: SyncStage::Cloned,
                error: "network error".to_string(),
            },
            SyncResult::Skipped {
                repo: "alice/a".to_string(),
                reason: "not a fork".to_string(),
            },
        ];

        let summary = SyncSummary::compile(3, results, Duration::from_secs(2));

        assert_eq!(summary.total_repositories, 3);
        assert_eq!(summary.forks, 2);
        assert_eq!(summary.updated, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.duration, Duration::from_secs(2));
    }
}
