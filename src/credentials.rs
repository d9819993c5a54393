use std::path::Path;

use tracing::warn;

pub const TOKEN_VAR: &str = "ENVATO_API_TOKEN";

/// Bearer token from the environment, else from a KEY=VALUE file. `None` when neither has one.
pub fn resolve_token(var: &str, env_file: &Path) -> Option<String> {
    if let Ok(token) = std::env::var(var) {
        let token = token.trim().to_string();
        if !token.is_empty() {
            return Some(token);
        }
    }
    from_env_file(var, env_file)
}

fn from_env_file(var: &str, env_file: &Path) -> Option<String> {
    if !env_file.exists() {
        return None;
    }
    let items = match dotenvy::from_path_iter(env_file) {
        Ok(items) => items,
        Err(e) => {
            warn!("Could not read {}: {}", env_file.display(), e);
            return None;
        }
    };

    for item in items {
        match item {
            Ok((key, value)) if key == var => {
                let value = value.trim().to_string();
                return (!value.is_empty()).then_some(value);
            }
            Ok(_) => {}
            Err(e) => warn!("Skipping bad line in {}: {}", env_file.display(), e),
        }
    }
    None
}

// ── Tests ──
