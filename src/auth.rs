//! Bearer-token persistence and login state.
//!
//! The token lives in a single file named by [`TOKEN_KEY`] under the data
//! directory. It is attached to every request through the [`ApiClient`] the
//! session owns.

use std::path::{Path, PathBuf};

use crate::api::{ApiClient, ApiError};
use crate::model::User;

/// Fixed storage key (file name) of the cached token.
pub const TOKEN_KEY: &str = "auth_token";

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("failed to access token store {}: {source}", path.display())]
    Store {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Api(#[from] ApiError),
}

/// File-backed cache for one bearer token.
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    /// Store the token under `dir`.
    pub fn new(dir: &Path) -> Self {
        Self {
            path: dir.join(TOKEN_KEY),
        }
    }

    /// Store under `<data dir>/svcpulse`.
    pub fn default_location() -> Self {
        let dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("svcpulse");
        Self::new(&dir)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the cached token. A missing or blank file yields `None`.
    pub fn load(&self) -> Result<Option<String>, AuthError> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => {
                check_token_permissions(&self.path);
                let token = contents.trim();
                Ok((!token.is_empty()).then(|| token.to_string()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(self.store_error(e)),
        }
    }

    pub fn save(&self, token: &str) -> Result<(), AuthError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| self.store_error(e))?;
        }
        std::fs::write(&self.path, token).map_err(|e| self.store_error(e))?;
        restrict_permissions(&self.path).map_err(|e| self.store_error(e))?;
        Ok(())
    }

    /// Remove the cached token. Clearing an empty store is not an error.
    pub fn clear(&self) -> Result<(), AuthError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.store_error(e)),
        }
    }

    fn store_error(&self, source: std::io::Error) -> AuthError {
        AuthError::Store {
            path: self.path.clone(),
            source,
        }
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

/// Warn if the token file is world-readable.
#[cfg(unix)]
fn check_token_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;

    let Ok(metadata) = std::fs::metadata(path) else {
        return;
    };
    let mode = metadata.permissions().mode();
    if mode & 0o004 != 0 {
        tracing::warn!(
            "Token file {} is world-readable (mode {:o}). \
             Consider restricting permissions to 600.",
            path.display(),
            mode & 0o7777,
        );
    }
}

#[cfg(not(unix))]
fn check_token_permissions(_path: &Path) {}

/// Login state: the API client carrying the current credential plus the
/// authenticated user, if any.
pub struct AuthSession {
    client: ApiClient,
    store: TokenStore,
    user: Option<User>,
}

impl AuthSession {
    /// Restore a previous login from the token store.
    ///
    /// If the stored token is rejected (or `me` fails for any reason) the
    /// token is cleared and the session starts unauthenticated.
    pub async fn rehydrate(mut client: ApiClient, store: TokenStore) -> Result<Self, AuthError> {
        let Some(token) = store.load()? else {
            client.set_token(None);
            return Ok(Self {
                client,
                store,
                user: None,
            });
        };

        client.set_token(Some(token));
        match client.me().await {
            Ok(user) => {
                tracing::debug!(user = %user.email, "restored login");
                Ok(Self {
                    client,
                    store,
                    user: Some(user),
                })
            }
            Err(e) => {
                tracing::info!(error = %e, "stored token rejected, clearing it");
                store.clear()?;
                client.set_token(None);
                Ok(Self {
                    client,
                    store,
                    user: None,
                })
            }
        }
    }

    pub async fn login(&mut self, email: &str, password: &str) -> Result<&User, AuthError> {
        let token = self.client.login(email, password).await?;
        self.store.save(&token.access_token)?;
        self.client.set_token(Some(token.access_token));
        let user = self.client.me().await?;
        tracing::info!(user = %user.email, "logged in");
        Ok(&*self.user.insert(user))
    }

    /// Create an account, then log into it.
    pub async fn register(
        &mut self,
        email: &str,
        password: &str,
        full_name: Option<&str>,
    ) -> Result<&User, AuthError> {
        self.client.register(email, password, full_name).await?;
        self.login(email, password).await
    }

    pub fn logout(&mut self) -> Result<(), AuthError> {
        self.store.clear()?;
        self.client.set_token(None);
        self.user = None;
        Ok(())
    }

    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }

    /// The client carrying the current credential.
    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    pub fn into_client(self) -> ApiClient {
        self.client
    }
}
