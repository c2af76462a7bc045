use crate::{NotifyConfig, RepoConfig};

/// Finds the handler config for a repository by name.
/// Returns None if the repository is not announced.
pub fn find_repo_config<'a>(config: &'a NotifyConfig, repo_name: &str) -> Option<&'a RepoConfig> {
    config.repo.iter().find(|repo| repo.name == repo_name)
}

/// Shortens text for log lines, keeping whole characters.
pub fn truncate_for_log(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}... (truncated)", &text[..idx]),
        None => text.to_string(),
    }
}
