mod common;

use std::collections::HashMap;
use std::fs;
use std::time::Duration;

use anyhow::Result;
use axum::extract::{Path, Query};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use twenty_percent::github::{clone_repos, write_repo_list, RepoInfo, RepoLister};

async fn repos(Path(owner): Path<String>, Query(params): Query<HashMap<String, String>>) -> Json<Value> {
    if owner != "acme" {
        return Json(json!([]));
    }
    let repo = |name: &str, language: Option<&str>| {
        json!({
            "name": name,
            "clone_url": format!("https://example.com/acme/{name}.git"),
            "size": 12,
            "language": language,
        })
    };
    let page = params.get("page").map(String::as_str).unwrap_or("1");
    Json(match page {
        "1" => json!([repo("alpha", Some("Python")), repo("beta", Some("Rust")), repo("gamma", Some("Python"))]),
        "2" => json!([repo("delta", None), repo("epsilon", Some("Python"))]),
        _ => json!([]),
    })
}

fn lister() -> Result<RepoLister> {
    let base = common::serve(Router::new().route("/users/:owner/repos", get(repos)));
    RepoLister::new(base, 3, Duration::ZERO)
}

#[test]
fn test_lists_python_repositories_across_pages() -> Result<()> {
    let found = lister()?.python_repos("acme", 10)?;
    let names: Vec<&str> = found.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["alpha", "gamma", "epsilon"]);
    assert_eq!(found[0].url, "https://example.com/acme/alpha.git");
    assert_eq!(found[0].size, 12);
    Ok(())
}

#[test]
fn test_stops_at_max_repos() -> Result<()> {
    let found = lister()?.python_repos("acme", 2)?;
    assert_eq!(found.len(), 2);
    assert_eq!(found[1].name, "gamma");
    Ok(())
}

#[test]
fn test_repo_list_file_and_existing_clones() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let repos = vec![RepoInfo {
        name: "alpha".to_string(),
        url: "https://example.com/acme/alpha.git".to_string(),
        size: 12,
    }];

    let list = dir.path().join("repos.txt");
    write_repo_list(&list, &repos)?;
    assert_eq!(
        fs::read_to_string(&list)?,
        "Name: alpha, URL: https://example.com/acme/alpha.git, Size: 12 KB\n"
    );

    let clone_dir = dir.path().join("clones");
    fs::create_dir_all(clone_dir.join("alpha"))?;
    assert_eq!(clone_repos(&repos, &clone_dir)?, 0);
    Ok(())
}
