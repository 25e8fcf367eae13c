use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::record::OwnerId;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthUser {
    #[serde(alias = "id")]
    pub user_id: OwnerId,
    #[serde(default)]
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

impl AuthUser {
    pub fn display_name(&self) -> &str {
        self.full_name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or(&self.username)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("failed to read session file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("session file {path} is not valid: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to write session file {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no session file location available")]
    NoLocation,
}

/// Who is signed in. Loaded once at start and handed to the views that need
/// an owner.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionContext {
    path: Option<PathBuf>,
    user: Option<AuthUser>,
}

impl SessionContext {
    /// Reads the session file at `path`. A missing file is a signed-out session.
    pub fn load(path: &Path) -> Result<Self, SessionError> {
        let user = match std::fs::read_to_string(path) {
            Ok(contents) if contents.trim().is_empty() => None,
            Ok(contents) => Some(serde_json::from_str::<AuthUser>(&contents).map_err(|e| {
                SessionError::Parse {
                    path: path.display().to_string(),
                    source: e,
                }
            })?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                return Err(SessionError::Read {
                    path: path.display().to_string(),
                    source: e,
                })
            }
        };
        debug!(path = %path.display(), signed_in = user.is_some(), "session loaded");
        Ok(Self {
            path: Some(path.to_path_buf()),
            user,
        })
    }

    /// In-memory session that is never persisted.
    pub fn with_user(user: AuthUser) -> Self {
        Self {
            path: None,
            user: Some(user),
        }
    }

    pub fn signed_out() -> Self {
        Self::default()
    }

    pub fn user(&self) -> Option<&AuthUser> {
        self.user.as_ref()
    }

    pub fn owner(&self) -> Option<OwnerId> {
        self.user.as_ref().map(|u| u.user_id)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Replaces the signed-in user and persists it.
    pub fn save(&mut self, user: AuthUser) -> Result<(), SessionError> {
        let path = self.path.clone().ok_or(SessionError::NoLocation)?;
        let write_err = |e| SessionError::Write {
            path: path.display().to_string(),
            source: e,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        let body = serde_json::to_string_pretty(&user).map_err(|e| SessionError::Parse {
            path: path.display().to_string(),
            source: e,
        })?;
        std::fs::write(&path, body).map_err(write_err)?;
        info!(user_id = user.user_id, "session saved");
        self.user = Some(user);
        Ok(())
    }

    /// Signs out. Returns whether a user was signed in.
    pub fn clear(&mut self) -> Result<bool, SessionError> {
        let was_signed_in = self.user.take().is_some();
        if let Some(path) = &self.path {
            match std::fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(SessionError::Write {
                        path: path.display().to_string(),
                        source: e,
                    })
                }
            }
        }
        if was_signed_in {
            info!("session cleared");
        }
        Ok(was_signed_in)
    }
}
