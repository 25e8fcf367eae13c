use std::env;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde::Serialize;

use crate::client::Endpoints;
use crate::record::EntityKind;

#[derive(Debug, Default, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct EndpointOverride {
    pub list: Option<String>,
    pub delete: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct EndpointsConfig {
    #[serde(alias = "health-data")]
    pub health_data: Option<EndpointOverride>,
    #[serde(alias = "assessment")]
    pub assessments: Option<EndpointOverride>,
    #[serde(alias = "medication")]
    pub medications: Option<EndpointOverride>,
}

impl EndpointsConfig {
    pub fn apply(&self, endpoints: &mut Endpoints) {
        let pairs = [
            (EntityKind::HealthData, &self.health_data),
            (EntityKind::Assessment, &self.assessments),
            (EntityKind::Medication, &self.medications),
        ];
        for (kind, entry) in pairs {
            if let Some(o) = entry {
                endpoints.set(kind, o.list.clone(), o.delete.clone());
            }
        }
    }
}

#[derive(Debug, Default, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct ConfigFile {
    #[serde(alias = "api_base_url")]
    pub base_url: Option<String>,
    pub user_id: Option<i64>,
    pub page_size: Option<usize>,
    pub timeout: Option<u64>,
    pub proxy: Option<String>,
    pub export_dir: Option<String>,
    pub csv_bom: Option<bool>,
    pub print_surface: Option<String>,
    pub no_color: Option<bool>,
    pub session_file: Option<String>,
    pub endpoints: Option<EndpointsConfig>,
}

fn home_dir() -> Option<PathBuf> {
    env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(|| env::var_os("USERPROFILE").map(PathBuf::from))
        .or_else(|| {
            let drive = env::var_os("HOMEDRIVE")?;
            let path = env::var_os("HOMEPATH")?;
            Some(PathBuf::from(drive).join(path))
        })
}

fn app_dir() -> Option<PathBuf> {
    Some(home_dir()?.join(".healthmate"))
}

pub fn default_config_path() -> Option<PathBuf> {
    Some(app_dir()?.join("config.yml"))
}

pub fn default_session_path() -> Option<PathBuf> {
    Some(app_dir()?.join("session.json"))
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/").or_else(|| path.strip_prefix("~\\")) {
        if let Some(home) = home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

pub fn load_config(path: &Path, allow_missing: bool) -> Result<ConfigFile, String> {
    match std::fs::read_to_string(path) {
        Ok(contents) if contents.trim().is_empty() => Ok(ConfigFile::default()),
        Ok(contents) => serde_yaml::from_str::<ConfigFile>(&contents)
            .map_err(|e| format!("failed to parse config '{}': {e}", path.display())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound && allow_missing => {
            Ok(ConfigFile::default())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(format!("config file not found '{}'", path.display()))
        }
        Err(e) => Err(format!("failed to read config '{}': {e}", path.display())),
    }
}

fn default_config_yaml() -> String {
    r#"# HealthMate CLI config
#
# Location (default):
#   ~/.healthmate/config.yml

# Backend
base_url: http://localhost:8080
timeout: 10
# proxy: http://127.0.0.1:8888

# Signed-in user. Normally taken from the session file written by
# `healthmate session set`; set here to pin a user.
# user_id: 1
# session_file: ~/.healthmate/session.json

# Views
page_size: 10

# Exports
export_dir: .
csv_bom: true
# browser | none
print_surface: browser

# Output styling
no_color: false

# Endpoint templates ({owner} and {id} are substituted)
# endpoints:
#   health_data:
#     list: /api/health-data/user/{owner}
#     delete: /api/health-data/{id}
#   assessments:
#     list: /api/health-assessments/user/{owner}
#     delete: /api/health-assessments/{id}
#   medications:
#     list: /api/medication-guidance/user/{owner}
#     delete: /api/medication-guidance/{id}
"#
    .to_string()
}

/// Writes the commented default config unless a file already exists.
/// Returns whether a file was written.
pub fn ensure_default_config_file(path: &Path) -> Result<bool, String> {
    if path.exists() {
        return Ok(false);
    }
    let parent = path
        .parent()
        .ok_or_else(|| format!("invalid config path '{}'", path.display()))?;
    if !parent.as_os_str().is_empty() {
        std::fs::create_dir_all(parent).map_err(|e| {
            format!(
                "failed to create config directory '{}': {e}",
                parent.display()
            )
        })?;
    }
    std::fs::write(path, default_config_yaml())
        .map_err(|e| format!("failed to write config file '{}': {e}", path.display()))?;
    Ok(true)
}
