//! Settings parser for .tapkey/config.toml

use super::types::Settings;
use std::path::Path;
use tapkey_core::prelude::*;

const CONFIG_FILENAME: &str = "config.toml";
const TAPKEY_DIR: &str = ".tapkey";

/// Overrides `[session] user_id`
pub const USER_ID_ENV_VAR: &str = "TAPKEY_USER_ID";

/// Load settings from `.tapkey/config.toml` under `project_path`.
///
/// Missing or unreadable files yield defaults.
pub fn load_settings(project_path: &Path) -> Settings {
    let config_path = project_path.join(TAPKEY_DIR).join(CONFIG_FILENAME);

    let mut settings = if !config_path.exists() {
        debug!("No config file at {:?}, using defaults", config_path);
        Settings::default()
    } else {
        match std::fs::read_to_string(&config_path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(settings) => {
                    debug!("Loaded settings from {:?}", config_path);
                    settings
                }
                Err(e) => {
                    warn!("Failed to parse {:?}: {}", config_path, e);
                    Settings::default()
                }
            },
            Err(e) => {
                warn!("Failed to read {:?}: {}", config_path, e);
                Settings::default()
            }
        }
    };

    if let Ok(user_id) = std::env::var(USER_ID_ENV_VAR) {
        if !user_id.trim().is_empty() {
            debug!("user id overridden by {}", USER_ID_ENV_VAR);
            settings.session.user_id = user_id.trim().to_string();
        }
    }

    settings
}

/// Write settings back to `.tapkey/config.toml`
pub fn save_settings(project_path: &Path, settings: &Settings) -> Result<()> {
    let dir = project_path.join(TAPKEY_DIR);
    std::fs::create_dir_all(&dir)
        .map_err(|e| Error::config(format!("Failed to create .tapkey dir: {}", e)))?;

    let content = toml::to_string_pretty(settings)
        .map_err(|e| Error::config(format!("Failed to serialize settings: {}", e)))?;
    std::fs::write(dir.join(CONFIG_FILENAME), content)?;
    Ok(())
}

/// Create a commented default config in the .tapkey/ directory
pub fn init_config_dir(project_path: &Path) -> Result<()> {
    let tapkey_dir = project_path.join(TAPKEY_DIR);

    if !tapkey_dir.exists() {
        std::fs::create_dir_all(&tapkey_dir)
            .map_err(|e| Error::config(format!("Failed to create .tapkey dir: {}", e)))?;
    }

    let config_path = tapkey_dir.join(CONFIG_FILENAME);
    if !config_path.exists() {
        let default_content = r#"# tapkey configuration

[nfc]
pairing_timeout_secs = 30   # Pairing fails if no tag is seen in time
emulation_delay_ms = 2000   # Latency of simulated card emulation
emulation_timeout_secs = 10 # Emulation fails after this long
simulate = true             # false: report NFC as unavailable

[storage]
# data_dir = "/path/to/data"  # Defaults to the platform data dir

[session]
user_id = "local-user"

[notifications]
refresh_on_load = true      # Reconcile read state on first load
"#;
        std::fs::write(&config_path, default_content)?;
        info!("Created default config at {:?}", config_path);
    }

    Ok(())
}
