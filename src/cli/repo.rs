//! `autopilot list` / `add` / `remove`

use autopilot_core::model::{format_relative_time, PrStatus};
use autopilot_core::storage::settings::{load_settings, save_settings, settings_path};

use super::local_app;

fn pr_label(pr: &PrStatus) -> String {
    let state = if pr.merged {
        "merged"
    } else if pr.draft {
        "draft"
    } else {
        pr.state.as_str()
    };
    match &pr.checks_status {
        Some(checks) => format!("#{} {} ({})", pr.number, state, checks),
        None => format!("#{} {}", pr.number, state),
    }
}

pub async fn list(prs: bool) {
    let app = local_app();
    app.registry().load_persisted().await;

    let state = app.store().snapshot();
    if state.repositories.is_empty() {
        println!("No repositories registered. Add one with: autopilot add <path>");
    }

    if prs && !state.repositories.is_empty() {
        if app.remote().detect_cli().await {
            app.remote().refresh().await;
        } else {
            eprintln!("gh is not available, PR status skipped.");
        }
    }

    for repo in &state.repositories {
        println!("{}  {}", repo.name, repo.repo_path);
        for ws in &repo.worktrees {
            let mut line = format!("  {:<24} {:<28}", ws.name, ws.branch_label());
            if let Some(stats) = &ws.diff_stats {
                line.push_str(&format!(" {:<12}", stats.display()));
            }
            if let Some(modified) = ws.last_modified {
                line.push_str(&format!(" {}", format_relative_time(modified)));
            }
            if let Some(pr) = ws
                .branch
                .as_deref()
                .and_then(|b| app.remote().status_for(&repo.repo_path, b))
            {
                line.push_str(&format!("  {}", pr_label(&pr)));
            }
            println!("{}", line.trim_end());
        }
    }

    // persisted paths that no longer resolve to a repository
    let settings = load_settings(&settings_path());
    for path in &settings.repository_paths {
        if state.repository(path).is_none() {
            println!("{}  (unavailable)", path);
        }
    }
}

pub async fn add(path: String) {
    let app = local_app();
    app.registry().load_persisted().await;

    match app.add_repository(&path).await {
        Ok(repo) => println!(
            "Added {} ({}) with {} worktree(s)",
            repo.name,
            repo.repo_path,
            repo.worktrees.len()
        ),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

pub async fn remove(path: String) {
    let app = local_app();
    app.registry().load_persisted().await;

    let canonical = std::fs::canonicalize(&path)
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|_| path.clone());

    if app.remove_repository(&path) || app.remove_repository(&canonical) {
        println!("Removed {}", path);
        return;
    }

    // not loadable any more, but still persisted
    let file = settings_path();
    let mut settings = load_settings(&file);
    let before = settings.repository_paths.len();
    settings
        .repository_paths
        .retain(|p| p != &path && p != &canonical);
    if settings.repository_paths.len() == before {
        eprintln!("Error: {} is not registered", path);
        std::process::exit(1);
    }
    if let Err(e) = save_settings(&file, &settings) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
    println!("Removed {}", path);
}
