use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use octocrab::{models, Octocrab, Page};
use serde::Serialize;
use tracing::{debug, info};

use crate::config::{Config, Credentials};

/// A GitHub repository as seen by the fork updater
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repository {
    /// Short name (e.g., "ripgrep")
    pub name: String,
    /// Owner-qualified name (e.g., "alice/ripgrep")
    pub full_name: String,
    pub fork: bool,
    pub default_branch: Option<String>,
    /// Only populated when the repository is fetched individually
    pub parent: Option<ParentRepo>,
}

/// The upstream a fork was created from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentRepo {
    pub full_name: String,
    pub default_branch: Option<String>,
}

impl Repository {
    /// Owner part of the full name
    pub fn owner(&self) -> Option<&str> {
        self.full_name
            .split_once('/')
            .map(|(owner, _)| owner)
            .filter(|owner| !owner.is_empty())
    }
}

impl From<models::Repository> for Repository {
    fn from(repo: models::Repository) -> Self {
        let full_name = qualified_name(&repo);
        let parent = repo.parent.as_deref().map(|parent| ParentRepo {
            full_name: qualified_name(parent),
            default_branch: parent.default_branch.clone(),
        });

        Self {
            name: repo.name,
            full_name,
            fork: repo.fork.unwrap_or(false),
            default_branch: repo.default_branch,
            parent,
        }
    }
}

fn qualified_name(repo: &models::Repository) -> String {
    if let Some(full_name) = &repo.full_name {
        return full_name.clone();
    }
    match &repo.owner {
        Some(owner) => format!("{}/{}", owner.login, repo.name),
        None => repo.name.clone(),
    }
}

/// Repository metadata source used by the fork updater
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RepoService: Send + Sync {
    /// List every repository owned by `username`
    async fn list_user_repos(&self, username: &str) -> Result<Vec<Repository>>;

    /// Fetch a single repository, including its parent
    async fn get_repo(&self, owner: &str, name: &str) -> Result<Repository>;
}

#[derive(Serialize)]
struct ListReposParams {
    #[serde(rename = "type")]
    kind: &'static str,
    per_page: u8,
}

/// GitHub client wrapper bound to one set of credentials
pub struct GitHubClient {
    client: Octocrab,
}

impl GitHubClient {
    /// Build an authenticated client. Does not contact the network.
    pub fn new(config: &Config, credentials: &Credentials) -> Result<Self> {
        let client = Octocrab::builder()
            .base_uri(config.github.api_url.as_str())
            .with_context(|| format!("Invalid GitHub API URL: {}", config.github.api_url))?
            .personal_token(credentials.token().to_string())
            .build()
            .context("Failed to create GitHub client")?;

        debug!("GitHub client bound to {}", config.github.api_url);

        Ok(Self { client })
    }
}

#[async_trait]
impl RepoService for GitHubClient {
    async fn list_user_repos(&self, username: &str) -> Result<Vec<Repository>> {
        debug!("Fetching repositories for: {}", username);

        let params = ListReposParams {
            kind: "owner",
            per_page: 100,
        };
        let first_page: Page<models::Repository> = self
            .client
            .get(format!("/users/{}/repos", username), Some(&params))
            .await
            .with_context(|| format!("Failed to list repositories for {}", username))?;

        let repositories = self
            .client
            .all_pages(first_page)
            .await
            .with_context(|| format!("Failed to page through repositories for {}", username))?;

        info!("Found {} repositories for {}", repositories.len(), username);
        Ok(repositories.into_iter().map(Repository::from).collect())
    }

    async fn get_repo(&self, owner: &str, name: &str) -> Result<Repository> {
        debug!("Fetching repository metadata: {}/{}", owner, name);

        let repo = self
            .client
            .repos(owner, name)
            .get()
            .await
            .with_context(|| format!("Failed to fetch repository {}/{}", owner, name))?;

        let repo = Repository::from(repo);
        if repo.fork && repo.parent.is_none() {
            return Err(anyhow!(
                "{} is a fork but GitHub returned no parent",
                repo.full_name
            ));
        }
        Ok(repo)
    }
}
