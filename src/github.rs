//! Finding Python repositories of a GitHub owner and cloning them for crawling.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::process::Command;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub const GITHUB_API: &str = "https://api.github.com";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoInfo {
    pub name: String,
    pub url: String,
    /// Size in KB as reported by GitHub.
    pub size: u64,
}

#[derive(Deserialize)]
struct ApiRepo {
    name: String,
    clone_url: String,
    size: u64,
    language: Option<String>,
}

/// Pages through `GET /users/{owner}/repos`.
pub struct RepoLister {
    http: reqwest::blocking::Client,
    api_base: String,
    per_page: usize,
    /// Pause before each page request, to stay under the API rate limit.
    delay: Duration,
}

impl RepoLister {
    pub fn new(api_base: impl Into<String>, per_page: usize, delay: Duration) -> anyhow::Result<Self> {
        anyhow::ensure!(per_page > 0, "per_page must be positive");
        let http = reqwest::blocking::Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("building HTTP client")?;
        Ok(Self {
            http,
            api_base: api_base.into(),
            per_page,
            delay,
        })
    }

    /// Up to `max_repos` repositories of `owner` whose main language is Python,
    /// in the order the API lists them.
    pub fn python_repos(&self, owner: &str, max_repos: usize) -> anyhow::Result<Vec<RepoInfo>> {
        let url = format!("{}/users/{owner}/repos", self.api_base.trim_end_matches('/'));
        let mut repos = Vec::new();
        let mut page = 1usize;

        while repos.len() < max_repos {
            std::thread::sleep(self.delay);
            let batch: Vec<ApiRepo> = self
                .http
                .get(&url)
                .query(&[("page", page), ("per_page", self.per_page)])
                .send()
                .with_context(|| format!("GET {url} page {page}"))?
                .error_for_status()?
                .json()
                .with_context(|| format!("decoding {url} page {page}"))?;
            if batch.is_empty() {
                info!(owner, page, "no more repositories");
                break;
            }

            for repo in batch {
                if repo.language.as_deref() != Some("Python") {
                    continue;
                }
                info!(owner, name = %repo.name, found = repos.len() + 1, "python repository found");
                repos.push(RepoInfo {
                    name: repo.name,
                    url: repo.clone_url,
                    size: repo.size,
                });
                if repos.len() >= max_repos {
                    break;
                }
            }
            page += 1;
        }
        Ok(repos)
    }
}

/// One `Name: .., URL: .., Size: .. KB` line per repository.
pub fn write_repo_list(path: &Path, repos: &[RepoInfo]) -> anyhow::Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    for repo in repos {
        writeln!(writer, "Name: {}, URL: {}, Size: {} KB", repo.name, repo.url, repo.size)?;
    }
    writer.flush()?;
    info!(path = %path.display(), repos = repos.len(), "repository list written");
    Ok(())
}

/// Runs `git clone` for every repository not already present under
/// `clone_dir`. Failed clones are logged; returns how many succeeded.
pub fn clone_repos(repos: &[RepoInfo], clone_dir: &Path) -> anyhow::Result<usize> {
    fs::create_dir_all(clone_dir).with_context(|| format!("creating {}", clone_dir.display()))?;
    let mut cloned = 0;
    for repo in repos {
        let target = clone_dir.join(&repo.name);
        if target.exists() {
            info!(name = %repo.name, "already cloned, skipping");
            continue;
        }
        info!(name = %repo.name, url = %repo.url, target = %target.display(), "cloning");
        match Command::new("git").arg("clone").arg(&repo.url).arg(&target).status() {
            Ok(status) if status.success() => cloned += 1,
            Ok(status) => warn!(name = %repo.name, %status, "git clone failed"),
            Err(e) => warn!(name = %repo.name, error = %e, "could not run git"),
        }
    }
    Ok(cloned)
}
