//! Process-wide credential holder.

use crate::{
    Credential, MemoryStorage, Profile, SecureStorage, StorageKeys, StorageResult, StorageWrite,
};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEndReason {
    /// The user logged out.
    Logout,
    /// The renewal endpoint refused the refresh token.
    RenewalFailed,
    /// A request sent with a freshly renewed token was still refused.
    Rejected,
}

impl fmt::Display for SessionEndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Logout => "logout",
            Self::RenewalFailed => "renewal failed",
            Self::Rejected => "rejected",
        };
        f.write_str(text)
    }
}

/// Session lifecycle notification.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Established { user: Profile },
    Renewed { expires_at_hint: Option<DateTime<Utc>> },
    Ended { reason: SessionEndReason },
}

/// Callback type for session notifications.
///
/// Called after the store's own locks are released, so the callback may read
/// the store again.
pub type SessionListener = Box<dyn Fn(&SessionEvent) + Send + Sync>;

/// Holds the current credential and persists it through a storage backend.
///
/// Reads are served from memory. Writes go to the backend first and become
/// visible to [`CredentialStore::get`] only once the whole batch is stored.
pub struct CredentialStore {
    storage: Box<dyn SecureStorage>,
    current: RwLock<Option<Credential>>,
    listener: Mutex<Option<Arc<dyn Fn(&SessionEvent) + Send + Sync>>>,
}

impl CredentialStore {
    /// Create a store over `storage`, restoring any persisted credential.
    pub fn new(storage: Box<dyn SecureStorage>) -> StorageResult<Self> {
        let current = hydrate(storage.as_ref())?;
        if let Some(credential) = &current {
            info!(user_id = %credential.user.id, "Restored persisted session");
        }

        Ok(Self {
            storage,
            current: RwLock::new(current),
            listener: Mutex::new(None),
        })
    }

    /// A store that forgets everything when the process exits.
    pub fn in_memory() -> Self {
        Self {
            storage: Box::new(MemoryStorage::new()),
            current: RwLock::new(None),
            listener: Mutex::new(None),
        }
    }

    /// Set a callback to be notified of session changes.
    pub fn set_session_listener(&self, listener: SessionListener) {
        *self.listener.lock() = Some(Arc::from(listener));
    }

    pub fn get(&self) -> Option<Credential> {
        self.current.read().clone()
    }

    pub fn access_token(&self) -> Option<String> {
        self.current.read().as_ref().map(|c| c.access_token.clone())
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.current.read().as_ref().map(|c| c.refresh_token.clone())
    }

    pub fn is_authenticated(&self) -> bool {
        self.current.read().is_some()
    }

    /// Store a new session credential.
    pub fn set(&self, credential: Credential) -> StorageResult<()> {
        let user = credential.user.clone();
        {
            let mut current = self.current.write();
            self.persist(&credential)?;
            *current = Some(credential);
        }

        info!(user_id = %user.id, "Session established");
        self.notify(&SessionEvent::Established { user });
        Ok(())
    }

    /// Swap in renewed tokens for the current session.
    ///
    /// Returns `None` without storing anything when the session was cleared
    /// in the meantime.
    pub fn replace_tokens(
        &self,
        access_token: String,
        refresh_token: Option<String>,
    ) -> StorageResult<Option<Credential>> {
        self.swap_tokens(None, access_token, refresh_token)
    }

    /// Swap in tokens renewed with `issued_for`.
    ///
    /// Returns `None` without storing anything when the session was cleared,
    /// or replaced by one with a different refresh token, in the meantime.
    pub fn renew_session(
        &self,
        issued_for: &str,
        access_token: String,
        refresh_token: Option<String>,
    ) -> StorageResult<Option<Credential>> {
        self.swap_tokens(Some(issued_for), access_token, refresh_token)
    }

    fn swap_tokens(
        &self,
        issued_for: Option<&str>,
        access_token: String,
        refresh_token: Option<String>,
    ) -> StorageResult<Option<Credential>> {
        let renewed = {
            let mut current = self.current.write();
            let Some(existing) = current.as_ref() else {
                debug!("Session cleared before renewed tokens arrived, discarding them");
                return Ok(None);
            };
            if issued_for.is_some_and(|token| token != existing.refresh_token) {
                debug!("Session replaced before renewed tokens arrived, discarding them");
                return Ok(None);
            }
            let renewed = existing.renewed(access_token, refresh_token);
            self.persist(&renewed)?;
            *current = Some(renewed.clone());
            renewed
        };

        debug!(expires_at = ?renewed.expires_at_hint, "Session tokens renewed");
        self.notify(&SessionEvent::Renewed {
            expires_at_hint: renewed.expires_at_hint,
        });
        Ok(Some(renewed))
    }

    /// Remove all credential state.
    ///
    /// Returns whether a credential was present. The session-ended
    /// notification fires only in that case, so repeated clears notify once.
    /// The in-memory credential is dropped even if the backend fails.
    pub fn clear(&self, reason: SessionEndReason) -> StorageResult<bool> {
        self.clear_matching(None, reason)
    }

    /// Like [`clear`](Self::clear), but leaves a session whose refresh token
    /// is not `refresh_token` in place.
    pub fn clear_session(&self, refresh_token: &str, reason: SessionEndReason) -> StorageResult<bool> {
        self.clear_matching(Some(refresh_token), reason)
    }

    fn clear_matching(&self, refresh_token: Option<&str>, reason: SessionEndReason) -> StorageResult<bool> {
        let (removed, stored) = {
            let mut current = self.current.write();
            if let (Some(existing), Some(token)) = (current.as_ref(), refresh_token) {
                if existing.refresh_token != token {
                    debug!(reason = %reason, "Session replaced, not clearing it");
                    return Ok(false);
                }
            }
            let removed = current.take().is_some();
            (removed, self.storage.write_batch(&delete_all()))
        };

        if let Err(err) = &stored {
            warn!(error = %err, "Failed to remove persisted credential");
        }

        if removed {
            info!(reason = %reason, "Session ended");
            self.notify(&SessionEvent::Ended { reason });
        }

        stored.map(|_| removed)
    }

    fn persist(&self, credential: &Credential) -> StorageResult<()> {
        let profile = serde_json::to_string(&credential.user)?;
        let expires = credential.expires_at_hint.map(|exp| exp.to_rfc3339());
        self.storage.write_batch(&[
            (StorageKeys::ACCESS_TOKEN, Some(credential.access_token.as_str())),
            (StorageKeys::REFRESH_TOKEN, Some(credential.refresh_token.as_str())),
            (StorageKeys::USER_PROFILE, Some(profile.as_str())),
            (StorageKeys::EXPIRES_AT_HINT, expires.as_deref()),
        ])
    }

    fn notify(&self, event: &SessionEvent) {
        let listener = self.listener.lock().clone();
        if let Some(listener) = listener {
            listener(event);
        }
    }
}

fn delete_all() -> Vec<StorageWrite<'static>> {
    StorageKeys::ALL.iter().map(|key| (*key, None)).collect()
}

/// Read a persisted credential, discarding incomplete state.
fn hydrate(storage: &dyn SecureStorage) -> StorageResult<Option<Credential>> {
    let access = storage.get(StorageKeys::ACCESS_TOKEN)?;
    let refresh = storage.get(StorageKeys::REFRESH_TOKEN)?;
    let profile = storage.get(StorageKeys::USER_PROFILE)?;

    if access.is_none() && refresh.is_none() && profile.is_none() {
        return Ok(None);
    }

    let user = profile
        .as_deref()
        .and_then(|raw| serde_json::from_str::<Profile>(raw).ok());

    match (access, refresh, user) {
        (Some(access_token), Some(refresh_token), Some(user)) => {
            let expires_at_hint = storage
                .get(StorageKeys::EXPIRES_AT_HINT)?
                .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
                .map(|exp| exp.with_timezone(&Utc));
            let mut credential = Credential::new(access_token, refresh_token, user);
            if expires_at_hint.is_some() {
                credential.expires_at_hint = expires_at_hint;
            }
            Ok(Some(credential))
        }
        _ => {
            info!("Stored credential is incomplete, clearing it");
            storage.write_batch(&delete_all())?;
            Ok(None)
        }
    }
}
