use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::api::client::HttpEntityApi;
use crate::api::EntityApi;
use crate::store::EntityStore;
use crate::types::Config;

/// Environment variable that overrides `apiToken` from config.json
pub const API_TOKEN_ENV: &str = "OBJECTDESK_API_TOKEN";

/// Application state shared by every command
pub struct AppState {
    pub config: Mutex<Option<Config>>,
    pub store: Arc<EntityStore>,
}

impl AppState {
    /// Load config from disk (falling back to defaults) and connect the store
    /// to the configured API.
    pub fn new() -> Result<Self, String> {
        let config = match load_config() {
            Ok(config) => Some(config),
            Err(e) => {
                log::warn!("{e}. Using default settings.");
                None
            }
        };
        Self::with_config(config)
    }

    pub fn with_config(config: Option<Config>) -> Result<Self, String> {
        let effective = with_token_override(
            config.clone().unwrap_or_default(),
            std::env::var(API_TOKEN_ENV).ok(),
        );
        let api = HttpEntityApi::from_config(&effective)
            .map_err(|e| format!("Invalid API settings: {}", e))?;
        Ok(Self::with_api(config, Arc::new(api)))
    }

    pub fn with_api(config: Option<Config>, api: Arc<dyn EntityApi>) -> Self {
        Self {
            config: Mutex::new(config),
            store: Arc::new(EntityStore::new(api)),
        }
    }

    /// Current config, or defaults when none was loaded
    pub fn current_config(&self) -> Config {
        self.config
            .lock()
            .map(|guard| guard.clone().unwrap_or_default())
            .unwrap_or_default()
    }
}

/// Apply a non-empty token from the environment over the file value.
pub fn with_token_override(mut config: Config, token: Option<String>) -> Config {
    if let Some(token) = token.filter(|t| !t.trim().is_empty()) {
        config.api_token = Some(token);
    }
    config
}

/// Get the canonical config file path (~/.objectdesk/config.json)
pub fn config_path() -> Result<PathBuf, String> {
    let home = dirs::home_dir().ok_or("Could not find home directory")?;
    Ok(home.join(".objectdesk").join("config.json"))
}

/// Load configuration from ~/.objectdesk/config.json
pub fn load_config() -> Result<Config, String> {
    load_config_from(&config_path()?)
}

pub fn load_config_from(path: &Path) -> Result<Config, String> {
    if !path.exists() {
        return Err(format!(
            "Config file not found at {}. Create it with: objectdesk config set --workspace <slug> --project <id>",
            path.display()
        ));
    }

    let content =
        fs::read_to_string(path).map_err(|e| format!("Failed to read config: {}", e))?;
    let config: Config =
        serde_json::from_str(&content).map_err(|e| format!("Failed to parse config: {}", e))?;

    url::Url::parse(&config.api_base_url)
        .map_err(|e| format!("Invalid apiBaseUrl {}: {}", config.api_base_url, e))?;

    Ok(config)
}

/// Create or update config.json.
///
/// Starts from the in-memory config (or defaults on first run), applies the
/// mutator, writes the file and replaces the in-memory copy.
pub fn create_or_update_config(
    state: &AppState,
    mutator: impl FnOnce(&mut Config),
) -> Result<Config, String> {
    create_or_update_config_at(state, &config_path()?, mutator)
}

pub fn create_or_update_config_at(
    state: &AppState,
    path: &Path,
    mutator: impl FnOnce(&mut Config),
) -> Result<Config, String> {
    let mut guard = state.config.lock().map_err(|_| "Lock poisoned")?;

    let mut config = guard.clone().unwrap_or_default();
    mutator(&mut config);

    if let Some(parent) = path.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create config dir: {}", e))?;
        }
    }

    let content = serde_json::to_string_pretty(&config)
        .map_err(|e| format!("Failed to serialize config: {}", e))?;
    fs::write(path, content).map_err(|e| format!("Failed to write config: {}", e))?;

    *guard = Some(config.clone());
    log::info!("Saved config to {}", path.display());

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::fake::FakeApi;

    fn state() -> AppState {
        AppState::with_api(None, Arc::new(FakeApi::new()))
    }

    #[test]
    fn test_missing_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config_from(&dir.path().join("config.json")).unwrap_err();
        assert!(err.contains("Config file not found"));
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "workspaceSlug": "acme" }"#).unwrap();

        let config = load_config_from(&path).unwrap();

        assert_eq!(config.workspace_slug.as_deref(), Some("acme"));
        assert_eq!(config.api_base_url, "http://localhost:8000");
        assert_eq!(config.request_timeout_secs, 30);
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "apiBaseUrl": "not a url" }"#).unwrap();

        assert!(load_config_from(&path).unwrap_err().contains("apiBaseUrl"));
    }

    #[test]
    fn test_create_or_update_writes_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let state = state();

        create_or_update_config_at(&state, &path, |c| {
            c.workspace_slug = Some("acme".into());
        })
        .unwrap();
        let config = create_or_update_config_at(&state, &path, |c| {
            c.project_id = Some("P1".into());
        })
        .unwrap();

        assert_eq!(config.workspace_slug.as_deref(), Some("acme"));
        let reloaded = load_config_from(&path).unwrap();
        assert_eq!(reloaded.project_id.as_deref(), Some("P1"));
        assert_eq!(state.current_config().project_id.as_deref(), Some("P1"));
    }

    #[test]
    fn test_token_override() {
        let config = Config {
            api_token: Some("from-file".into()),
            ..Default::default()
        };

        let kept = with_token_override(config.clone(), Some("  ".into()));
        assert_eq!(kept.api_token.as_deref(), Some("from-file"));

        let replaced = with_token_override(config, Some("from-env".into()));
        assert_eq!(replaced.api_token.as_deref(), Some("from-env"));
    }
}
