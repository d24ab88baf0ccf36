//! 环境检查

use std::process::Command;

pub struct CheckResult {
    pub ok: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// git is required; the GitHub CLI only enables PR status.
pub fn check_environment() -> CheckResult {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if !check_git() {
        errors.push("git is not installed. Please install git first.".to_string());
    }

    match check_gh() {
        GhCheck::Ok => {}
        GhCheck::NotInstalled => warnings
            .push("gh is not installed. PR status will not be shown.".to_string()),
        GhCheck::NotAuthenticated => warnings.push(
            "gh is not authenticated. Run `gh auth login` to enable PR status.".to_string(),
        ),
    }

    CheckResult {
        ok: errors.is_empty(),
        errors,
        warnings,
    }
}

fn check_git() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

enum GhCheck {
    Ok,
    NotInstalled,
    NotAuthenticated,
}

fn check_gh() -> GhCheck {
    // 测试模式：通过环境变量模拟 gh 不存在
    if std::env::var("AUTOPILOT_TEST_NO_GH").is_ok() {
        return GhCheck::NotInstalled;
    }

    let installed = Command::new("gh")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false);
    if !installed {
        return GhCheck::NotInstalled;
    }

    let authed = Command::new("gh")
        .args(["auth", "status"])
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false);
    if authed {
        GhCheck::Ok
    } else {
        GhCheck::NotAuthenticated
    }
}
