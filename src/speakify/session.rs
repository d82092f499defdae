use super::store::{read_json, remove_if_exists, write_json_atomic, StoreError};
use super::types::User;

use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const SESSION_FILE: &str = "speakify_user.json";

/// Simulated sign-in: there is no account backend, `login` stores a fixed user.
pub fn mock_user() -> User {
    User {
        uid: "user-12345".to_string(),
        display_name: Some("Alex Rivers".to_string()),
        email: Some("alex.rivers@example.com".to_string()),
        photo_url: Some("https://picsum.photos/100/100".to_string()),
    }
}

#[derive(Debug, Default)]
pub struct SessionStore {
    path: Option<PathBuf>,
    user: Option<User>,
}

impl SessionStore {
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn open(data_dir: &Path) -> Result<Self, StoreError> {
        let path = data_dir.join(SESSION_FILE);
        let user = match read_json::<User>(&path) {
            Ok(user) => user,
            Err(StoreError::Json(e)) => {
                warn!(error = %e, "stored session is unreadable, signing out");
                None
            }
            Err(e) => return Err(e),
        };
        Ok(Self {
            path: Some(path),
            user,
        })
    }

    pub fn current(&self) -> Option<&User> {
        self.user.as_ref()
    }

    /// History is only shown to a signed-in user.
    pub fn can_view_history(&self) -> bool {
        self.user.is_some()
    }

    pub fn login(&mut self) -> Result<User, StoreError> {
        let user = mock_user();
        if let Some(path) = &self.path {
            write_json_atomic(path, &user)?;
        }
        info!(uid = %user.uid, "signed in");
        self.user = Some(user.clone());
        Ok(user)
    }

    pub fn logout(&mut self) -> Result<(), StoreError> {
        if let Some(path) = &self.path {
            remove_if_exists(path)?;
        }
        if let Some(user) = self.user.take() {
            info!(uid = %user.uid, "signed out");
        }
        Ok(())
    }
}
