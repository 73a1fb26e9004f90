//! Vault session management.
//!
//! A [`VaultSession`] owns the lock state machine for one user. The session
//! key and the decrypted credential set live only inside the session while it
//! is unlocked and are zeroized when it locks or is dropped. Callers only ever
//! receive copies of entries or secret-free summaries.
//!
//! Every operation is serialized through one async mutex, so two overlapping
//! mutations cannot both read the same credential set and lose an update.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::config::{VaultConfig, MASTER_PASSWORD_MIN_LENGTH, SCHEMA_VERSION};
use crate::entry::{decode_entries, encode_entries, CredentialEntry, EntryInput, EntrySummary};
use crate::envelope::{EncryptedVaultRecord, VaultEnvelope};
use crate::identity::IdentityProvider;
use crate::storage::VaultStorage;
use crate::watchdog::InactivityWatchdog;
use passbox_common::{Error, Result, SensitiveBytes, UserId};
use passbox_crypto::{CipherCore, SessionKey};

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    /// Constructed, nothing loaded yet.
    Uninitialized,
    /// No envelope exists for the current user.
    NotConfigured,
    /// Envelope exists, no key held.
    Locked,
    /// Session key and decrypted entries held in memory.
    Unlocked,
}

/// Why the session last locked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LockReason {
    /// Locked on request.
    Manual,
    /// Locked by the inactivity watchdog.
    Timeout,
}

impl fmt::Display for LockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Manual => f.write_str("manual"),
            Self::Timeout => f.write_str("timeout"),
        }
    }
}

/// Observable snapshot of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub state: SessionState,
    /// Set by the most recent lock, cleared by unlock.
    pub lock_reason: Option<LockReason>,
}

struct UnlockedVault {
    key: SessionKey,
    entries: Vec<CredentialEntry>,
}

enum Phase {
    Uninitialized,
    NotConfigured,
    Locked,
    Unlocked(UnlockedVault),
}

impl Phase {
    fn state(&self) -> SessionState {
        match self {
            Self::Uninitialized => SessionState::Uninitialized,
            Self::NotConfigured => SessionState::NotConfigured,
            Self::Locked => SessionState::Locked,
            Self::Unlocked(_) => SessionState::Unlocked,
        }
    }
}

struct SessionInner {
    phase: Phase,
    /// User the loaded envelope belongs to.
    user: Option<UserId>,
    envelope: Option<VaultEnvelope>,
    config: VaultConfig,
    lock_reason: Option<LockReason>,
    watchdog: InactivityWatchdog,
}

struct Shared {
    cipher: CipherCore,
    storage: Arc<dyn VaultStorage>,
    identity: Arc<dyn IdentityProvider>,
    inner: Mutex<SessionInner>,
    status: watch::Sender<SessionStatus>,
}

/// Session manager for one user's vault.
///
/// Cloning yields another handle to the same session. The inactivity
/// watchdog holds only a weak reference, so dropping the last handle stops
/// it and zeroizes the key.
#[derive(Clone)]
pub struct VaultSession {
    shared: Arc<Shared>,
}

impl VaultSession {
    /// Create a session with the default cipher parameters.
    pub fn new(storage: Arc<dyn VaultStorage>, identity: Arc<dyn IdentityProvider>) -> Self {
        Self::with_cipher(CipherCore::new(), storage, identity)
    }

    /// Create a session with explicit cipher parameters.
    pub fn with_cipher(
        cipher: CipherCore,
        storage: Arc<dyn VaultStorage>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        let initial = SessionStatus {
            state: SessionState::Uninitialized,
            lock_reason: None,
        };
        let (status, _) = watch::channel(initial);

        Self {
            shared: Arc::new(Shared {
                cipher,
                storage,
                identity,
                inner: Mutex::new(SessionInner {
                    phase: Phase::Uninitialized,
                    user: None,
                    envelope: None,
                    config: VaultConfig::default(),
                    lock_reason: None,
                    watchdog: InactivityWatchdog::new(),
                }),
                status,
            }),
        }
    }

    /// Load the current user's envelope and settle in `NotConfigured` or
    /// `Locked`.
    ///
    /// Any unlocked state is discarded first.
    ///
    /// # Errors
    /// - No current user
    /// - Storage failure or unreadable envelope
    pub async fn initialize(&self) -> Result<SessionState> {
        let mut inner = self.shared.inner.lock().await;
        self.load_envelope(&mut inner).await?;
        Ok(inner.phase.state())
    }

    /// Set up the master password.
    ///
    /// Calling it on a configured vault overwrites the stored envelope: the
    /// previous master record and credential set are replaced. This is not a
    /// password change; the old entries are not carried over.
    ///
    /// # Preconditions
    /// - Password has at least [`MASTER_PASSWORD_MIN_LENGTH`] characters
    ///
    /// # Postconditions
    /// - Any unlocked state is discarded first
    /// - An envelope with no vault record and the current config is persisted
    /// - Session is `Unlocked` with an empty credential set
    ///
    /// # Errors
    /// - Password too short
    /// - Identity or storage failure
    pub async fn setup_master_password(&self, password: &str) -> Result<()> {
        if password.chars().count() < MASTER_PASSWORD_MIN_LENGTH {
            return Err(Error::InvalidInput(format!(
                "Master password must be at least {} characters",
                MASTER_PASSWORD_MIN_LENGTH
            )));
        }

        let mut inner = self.shared.inner.lock().await;
        if matches!(inner.phase, Phase::Uninitialized) {
            self.load_envelope(&mut inner).await?;
        }
        let user = self.resolve_user(&inner)?;
        if self.lock_inner(&mut inner, LockReason::Manual) {
            debug!(user = %user, "Discarded unlocked state before setup");
        }

        let cipher = self.shared.cipher;
        let password = Zeroizing::new(password.as_bytes().to_vec());
        let (master, key) = run_blocking(move || {
            let master = cipher.create_master_password_record(&password)?;
            let key = cipher
                .verify_master_password(&password, &master)
                .ok_or_else(|| Error::Crypto("Fresh master record failed to verify".to_string()))?;
            Ok((master, key))
        })
        .await?;

        let envelope = VaultEnvelope::new(master, inner.config);
        self.shared.storage.save(&user, &envelope).await?;
        inner.envelope = Some(envelope);

        info!(user = %user, iterations = cipher.iterations(), "Master password set up");
        self.enter_unlocked(&mut inner, key, Vec::new());
        Ok(())
    }

    /// Unlock with the master password.
    ///
    /// Returns `Ok(false)` for a wrong password or when no vault is
    /// configured; the state is unchanged in both cases.
    ///
    /// # Errors
    /// - Session already unlocked
    /// - Vault record has an unsupported version or a foreign owner
    /// - Vault payload fails authentication ([`Error::Integrity`])
    /// - Identity or storage failure
    pub async fn unlock(&self, password: &str) -> Result<bool> {
        let mut inner = self.shared.inner.lock().await;
        if matches!(inner.phase, Phase::Uninitialized) {
            self.load_envelope(&mut inner).await?;
        }
        match inner.phase {
            Phase::Locked => {}
            Phase::Unlocked(_) => {
                return Err(Error::InvalidState("Session is already unlocked".to_string()))
            }
            Phase::Uninitialized | Phase::NotConfigured => {
                debug!("Unlock requested without a configured vault");
                return Ok(false);
            }
        }
        let user = self.resolve_user(&inner)?;
        let master = match &inner.envelope {
            Some(envelope) => envelope.master.clone(),
            None => return Err(Error::InvalidState("No envelope loaded".to_string())),
        };

        let cipher = self.shared.cipher;
        let password = Zeroizing::new(password.as_bytes().to_vec());
        let verified = run_blocking(move || Ok(cipher.verify_master_password(&password, &master))).await?;
        let Some(key) = verified else {
            warn!(user = %user, "Unlock rejected");
            return Ok(false);
        };

        let entries = match inner.envelope.as_ref().and_then(|e| e.vault.as_ref()) {
            Some(record) => self.open_record(record, &key, &user)?,
            None => Vec::new(),
        };

        info!(user = %user, entries = entries.len(), "Vault unlocked");
        self.enter_unlocked(&mut inner, key, entries);
        Ok(true)
    }

    /// Lock the session, dropping the key and the decrypted entries.
    ///
    /// Returns `false` if the session was not unlocked.
    pub async fn lock(&self, reason: LockReason) -> bool {
        let mut inner = self.shared.inner.lock().await;
        self.lock_inner(&mut inner, reason)
    }

    /// Add a new entry at the front of the credential set.
    ///
    /// # Errors
    /// - [`Error::SessionLocked`] unless unlocked
    /// - Blank title
    /// - Storage failure (the credential set is left unchanged)
    pub async fn create_entry(&self, input: EntryInput) -> Result<CredentialEntry> {
        self.persist(move |entries| {
            input.validate()?;
            let entry = CredentialEntry::create(&input, Utc::now());
            entries.insert(0, entry.clone());
            Ok(entry)
        })
        .await
    }

    /// Replace the editable fields of entry `id`.
    ///
    /// # Errors
    /// - [`Error::SessionLocked`] unless unlocked
    /// - [`Error::NotFound`] for an unknown id
    /// - Blank title or storage failure
    pub async fn update_entry(&self, id: Uuid, input: EntryInput) -> Result<CredentialEntry> {
        self.persist(move |entries| {
            input.validate()?;
            let entry = entries
                .iter_mut()
                .find(|entry| entry.id == id)
                .ok_or_else(|| Error::NotFound(format!("Entry {}", id)))?;
            entry.apply(&input, Utc::now());
            Ok(entry.clone())
        })
        .await
    }

    /// Remove entry `id`.
    ///
    /// # Errors
    /// - [`Error::SessionLocked`] unless unlocked
    /// - [`Error::NotFound`] for an unknown id
    /// - Storage failure
    pub async fn delete_entry(&self, id: Uuid) -> Result<()> {
        self.persist(move |entries| {
            let position = entries
                .iter()
                .position(|entry| entry.id == id)
                .ok_or_else(|| Error::NotFound(format!("Entry {}", id)))?;
            entries.remove(position);
            Ok(())
        })
        .await
    }

    /// Change the inactivity timeout.
    ///
    /// Persists the envelope if one exists, even while locked, and
    /// reschedules the watchdog when unlocked.
    ///
    /// # Errors
    /// - `ms` is zero
    /// - Identity or storage failure (config unchanged)
    pub async fn set_inactivity_timeout_ms(&self, ms: u64) -> Result<()> {
        let config = VaultConfig::new(ms)?;

        let mut inner = self.shared.inner.lock().await;
        if matches!(inner.phase, Phase::Uninitialized) {
            self.load_envelope(&mut inner).await?;
        }
        if let Some(envelope) = &inner.envelope {
            let user = self.resolve_user(&inner)?;
            let mut next = envelope.clone();
            next.config = config;
            self.shared.storage.save(&user, &next).await?;
            inner.envelope = Some(next);
        }
        inner.config = config;

        if matches!(inner.phase, Phase::Unlocked(_)) {
            self.arm_watchdog(&mut inner);
        }
        info!(timeout_ms = ms, "Inactivity timeout updated");
        Ok(())
    }

    /// Report user activity. Reschedules the watchdog when unlocked.
    ///
    /// Returns whether the session was unlocked.
    pub async fn record_activity(&self) -> bool {
        let mut inner = self.shared.inner.lock().await;
        if !matches!(inner.phase, Phase::Unlocked(_)) {
            return false;
        }
        self.arm_watchdog(&mut inner);
        true
    }

    /// Erase the stored envelope and all in-memory state.
    ///
    /// # Errors
    /// - No current user, or a different user than the one the session was
    ///   loaded for (nothing is erased)
    /// - Storage failure (in-memory state unchanged)
    pub async fn clear_all_data(&self) -> Result<()> {
        let mut inner = self.shared.inner.lock().await;
        let user = self.resolve_user(&inner)?;
        self.shared.storage.clear(&user).await?;

        inner.watchdog.cancel();
        inner.phase = Phase::NotConfigured;
        inner.envelope = None;
        inner.config = VaultConfig::default();
        inner.lock_reason = None;
        inner.user = Some(user.clone());
        self.publish(&inner);

        info!(user = %user, "Vault data cleared");
        Ok(())
    }

    /// Current state and lock reason.
    pub fn status(&self) -> SessionStatus {
        *self.shared.status.borrow()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.status().state
    }

    /// Reason of the most recent lock, cleared by unlock.
    pub fn lock_reason(&self) -> Option<LockReason> {
        self.status().lock_reason
    }

    /// Whether the session key is held.
    pub fn is_unlocked(&self) -> bool {
        self.state() == SessionState::Unlocked
    }

    /// Whether a master password has been set up for the current user.
    pub fn is_configured(&self) -> bool {
        matches!(self.state(), SessionState::Locked | SessionState::Unlocked)
    }

    /// Receiver notified on every state or lock-reason change.
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.shared.status.subscribe()
    }

    /// Configuration in effect, persisted or pending setup.
    pub async fn config(&self) -> VaultConfig {
        self.shared.inner.lock().await.config
    }

    /// Copies of all entries, newest first. Empty unless unlocked.
    pub async fn entries(&self) -> Vec<CredentialEntry> {
        let inner = self.shared.inner.lock().await;
        match &inner.phase {
            Phase::Unlocked(vault) => vault.entries.clone(),
            _ => Vec::new(),
        }
    }

    /// Copy of entry `id`, if unlocked and present.
    pub async fn entry(&self, id: Uuid) -> Option<CredentialEntry> {
        let inner = self.shared.inner.lock().await;
        match &inner.phase {
            Phase::Unlocked(vault) => vault.entries.iter().find(|e| e.id == id).cloned(),
            _ => None,
        }
    }

    /// Secret-free views of all entries. Empty unless unlocked.
    pub async fn summaries(&self) -> Vec<EntrySummary> {
        self.search("").await
    }

    /// Summaries of entries whose title, username or url contains `query`.
    pub async fn search(&self, query: &str) -> Vec<EntrySummary> {
        let inner = self.shared.inner.lock().await;
        match &inner.phase {
            Phase::Unlocked(vault) => vault
                .entries
                .iter()
                .filter(|entry| entry.matches(query))
                .map(CredentialEntry::summary)
                .collect(),
            _ => Vec::new(),
        }
    }

    async fn load_envelope(&self, inner: &mut SessionInner) -> Result<()> {
        let user = self.shared.identity.current_user()?;
        let envelope = self.shared.storage.load(&user).await?;

        inner.watchdog.cancel();
        inner.phase = if envelope.is_some() {
            Phase::Locked
        } else {
            Phase::NotConfigured
        };
        inner.config = envelope.as_ref().map(|e| e.config).unwrap_or_default();
        inner.envelope = envelope;
        inner.lock_reason = None;
        inner.user = Some(user.clone());
        self.publish(inner);

        debug!(user = %user, state = ?inner.phase.state(), "Session initialized");
        Ok(())
    }

    /// The current user, which must match the user the envelope was loaded for.
    fn resolve_user(&self, inner: &SessionInner) -> Result<UserId> {
        let user = self.shared.identity.current_user()?;
        match &inner.user {
            Some(bound) if bound != &user => Err(Error::Identity(
                "Current user differs from the session owner".to_string(),
            )),
            _ => Ok(user),
        }
    }

    fn open_record(
        &self,
        record: &EncryptedVaultRecord,
        key: &SessionKey,
        user: &UserId,
    ) -> Result<Vec<CredentialEntry>> {
        record.ensure_readable_by(user)?;
        let plaintext = self
            .shared
            .cipher
            .decrypt_payload(&record.payload, key)
            .map(SensitiveBytes::new)
            .map_err(|_| Error::Integrity("Vault payload failed authentication".to_string()))?;
        decode_entries(plaintext.as_bytes())
    }

    fn seal(
        &self,
        key: &SessionKey,
        entries: &[CredentialEntry],
        user: &UserId,
        previous: Option<DateTime<Utc>>,
    ) -> Result<EncryptedVaultRecord> {
        let plaintext = encode_entries(entries)?;
        let payload = self.shared.cipher.encrypt_payload(plaintext.as_bytes(), key)?;
        Ok(EncryptedVaultRecord {
            payload,
            version: SCHEMA_VERSION,
            owner_id: user.clone(),
            updated_at: next_timestamp(previous),
        })
    }

    /// Run `mutate` against a copy of the credential set, then re-encrypt
    /// and save the whole set. Memory is only updated after the save.
    async fn persist<R, F>(&self, mutate: F) -> Result<R>
    where
        F: FnOnce(&mut Vec<CredentialEntry>) -> Result<R> + Send,
    {
        let mut inner = self.shared.inner.lock().await;
        let Phase::Unlocked(vault) = &inner.phase else {
            return Err(Error::SessionLocked);
        };

        let mut entries = vault.entries.clone();
        let result = mutate(&mut entries)?;

        let user = self.resolve_user(&inner)?;
        let envelope = inner
            .envelope
            .as_ref()
            .ok_or_else(|| Error::InvalidState("No envelope loaded".to_string()))?;
        let record = self.seal(
            &vault.key,
            &entries,
            &user,
            envelope.vault.as_ref().map(|r| r.updated_at),
        )?;
        let mut next = envelope.clone();
        next.vault = Some(record);

        self.shared.storage.save(&user, &next).await?;

        debug!(user = %user, entries = entries.len(), "Vault persisted");
        inner.envelope = Some(next);
        if let Phase::Unlocked(vault) = &mut inner.phase {
            vault.entries = entries;
        }
        self.arm_watchdog(&mut inner);
        Ok(result)
    }

    fn enter_unlocked(&self, inner: &mut SessionInner, key: SessionKey, entries: Vec<CredentialEntry>) {
        inner.phase = Phase::Unlocked(UnlockedVault { key, entries });
        inner.lock_reason = None;
        self.arm_watchdog(inner);
        self.publish(inner);
    }

    fn lock_inner(&self, inner: &mut SessionInner, reason: LockReason) -> bool {
        if !matches!(inner.phase, Phase::Unlocked(_)) {
            return false;
        }
        inner.watchdog.cancel();
        inner.phase = Phase::Locked;
        inner.lock_reason = Some(reason);
        self.publish(inner);

        info!(reason = %reason, "Vault locked");
        true
    }

    fn arm_watchdog(&self, inner: &mut SessionInner) {
        let session = Arc::downgrade(&self.shared);
        let timeout = inner.config.inactivity_timeout();
        inner.watchdog.schedule(timeout, move |generation| async move {
            if let Some(shared) = session.upgrade() {
                VaultSession { shared }.lock_on_timeout(generation).await;
            }
        });
    }

    async fn lock_on_timeout(&self, generation: u64) {
        let mut inner = self.shared.inner.lock().await;
        if !inner.watchdog.claim(generation) {
            debug!(generation, "Ignoring stale inactivity timer");
            return;
        }
        self.lock_inner(&mut inner, LockReason::Timeout);
    }

    fn publish(&self, inner: &SessionInner) {
        let next = SessionStatus {
            state: inner.phase.state(),
            lock_reason: inner.lock_reason,
        };
        self.shared.status.send_if_modified(|status| {
            if *status == next {
                return false;
            }
            *status = next;
            true
        });
    }
}

impl fmt::Debug for VaultSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaultSession")
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

/// Strictly increasing record timestamp.
fn next_timestamp(previous: Option<DateTime<Utc>>) -> DateTime<Utc> {
    let now = Utc::now();
    match previous {
        Some(previous) if now <= previous => previous + chrono::Duration::milliseconds(1),
        _ => now,
    }
}

async fn run_blocking<T, F>(task: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| Error::Crypto(format!("Key derivation task failed: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::LocalIdentity;
    use crate::storage::BlobVaultStorage;
    use async_trait::async_trait;
    use passbox_crypto::MIN_ITERATIONS;
    use passbox_storage::{BlobStore, MemoryBlobStore};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tokio::time::sleep;

    const PASSWORD: &str = "Correct-Horse-1";

    type MemoryStorage = BlobVaultStorage<MemoryBlobStore>;

    fn user() -> UserId {
        UserId::new("local-user-1").unwrap()
    }

    fn cipher() -> CipherCore {
        CipherCore::with_iterations(MIN_ITERATIONS).unwrap()
    }

    fn session_over(storage: Arc<MemoryStorage>) -> (VaultSession, Arc<LocalIdentity>) {
        let identity = Arc::new(LocalIdentity::new(user()));
        let session = VaultSession::with_cipher(cipher(), storage, identity.clone());
        (session, identity)
    }

    fn new_session() -> (VaultSession, Arc<MemoryStorage>) {
        let storage = Arc::new(BlobVaultStorage::in_memory());
        let (session, _) = session_over(storage.clone());
        (session, storage)
    }

    fn gmail() -> EntryInput {
        EntryInput::new("Gmail", "user@gmail.com", "hunter2-secret")
            .with_url("https://mail.google.com")
            .with_notes("Recovery codes in the safe")
    }

    async fn stored(storage: &MemoryStorage) -> VaultEnvelope {
        storage.load(&user()).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_initialize_without_envelope() {
        let (session, _) = new_session();
        assert_eq!(session.state(), SessionState::Uninitialized);

        assert_eq!(session.initialize().await.unwrap(), SessionState::NotConfigured);
        assert!(!session.is_configured());
        assert!(!session.unlock(PASSWORD).await.unwrap());
    }

    #[tokio::test]
    async fn test_setup_unlocks_and_persists_empty_vault() {
        let (session, storage) = new_session();
        session.setup_master_password(PASSWORD).await.unwrap();

        assert!(session.is_unlocked());
        assert!(session.is_configured());
        assert!(session.entries().await.is_empty());

        let envelope = stored(&storage).await;
        assert!(envelope.vault.is_none());
        assert_eq!(envelope.config, VaultConfig::default());
        assert_eq!(envelope.master.kdf().iterations(), MIN_ITERATIONS);
    }

    #[tokio::test]
    async fn test_setup_rejects_short_password() {
        let (session, storage) = new_session();
        let result = session.setup_master_password("short").await;

        assert!(matches!(result, Err(Error::InvalidInput(_))));
        assert!(storage.load(&user()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_setup_on_configured_vault_overwrites() {
        let (session, storage) = new_session();
        session.setup_master_password(PASSWORD).await.unwrap();
        session.create_entry(gmail()).await.unwrap();
        let before = stored(&storage).await;

        session.setup_master_password("Another-Password-2").await.unwrap();
        assert!(session.is_unlocked());
        assert!(session.entries().await.is_empty());

        let after = stored(&storage).await;
        assert_ne!(after.master, before.master);
        assert!(after.vault.is_none());

        session.lock(LockReason::Manual).await;
        assert!(!session.unlock(PASSWORD).await.unwrap());
        assert!(session.unlock("Another-Password-2").await.unwrap());
        assert!(session.entries().await.is_empty());
    }

    #[tokio::test]
    async fn test_setup_overwrites_from_locked() {
        let storage = configured_with_entry().await;
        let (session, _) = session_over(storage.clone());
        assert_eq!(session.initialize().await.unwrap(), SessionState::Locked);

        session.setup_master_password("Another-Password-2").await.unwrap();
        assert!(session.is_unlocked());
        assert!(stored(&storage).await.vault.is_none());
    }

    #[tokio::test]
    async fn test_lock_unlock_scenario() {
        let (session, _) = new_session();
        session.setup_master_password(PASSWORD).await.unwrap();
        let created = session.create_entry(gmail()).await.unwrap();

        assert!(session.lock(LockReason::Manual).await);
        assert_eq!(session.state(), SessionState::Locked);
        assert_eq!(session.lock_reason(), Some(LockReason::Manual));
        assert!(session.entries().await.is_empty());
        assert!(session.entry(created.id).await.is_none());

        assert!(!session.unlock("wrong").await.unwrap());
        assert_eq!(session.state(), SessionState::Locked);
        assert!(session.entries().await.is_empty());

        assert!(session.unlock(PASSWORD).await.unwrap());
        assert_eq!(session.lock_reason(), None);
        let entries = session.entries().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0], created);
        assert_eq!(entries[0].secret, "hunter2-secret");
        assert_eq!(entries[0].notes.as_deref(), Some("Recovery codes in the safe"));
    }

    #[tokio::test]
    async fn test_fresh_session_reads_persisted_vault() {
        let storage = Arc::new(BlobVaultStorage::in_memory());
        let (first, _) = session_over(storage.clone());
        first.setup_master_password(PASSWORD).await.unwrap();
        let created = first.create_entry(gmail()).await.unwrap();
        drop(first);

        let (second, _) = session_over(storage);
        assert_eq!(second.initialize().await.unwrap(), SessionState::Locked);
        assert!(second.unlock(PASSWORD).await.unwrap());
        assert_eq!(second.entry(created.id).await, Some(created));
    }

    #[tokio::test]
    async fn test_unlock_initializes_and_rejects_double_unlock() {
        let storage = Arc::new(BlobVaultStorage::in_memory());
        let (first, _) = session_over(storage.clone());
        first.setup_master_password(PASSWORD).await.unwrap();

        let (second, _) = session_over(storage);
        assert!(second.unlock(PASSWORD).await.unwrap());
        assert!(matches!(
            second.unlock(PASSWORD).await,
            Err(Error::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_mutations_require_unlock() {
        let (session, _) = new_session();
        assert!(matches!(
            session.create_entry(gmail()).await,
            Err(Error::SessionLocked)
        ));

        session.setup_master_password(PASSWORD).await.unwrap();
        let entry = session.create_entry(gmail()).await.unwrap();
        session.lock(LockReason::Manual).await;

        assert!(matches!(
            session.create_entry(gmail()).await,
            Err(Error::SessionLocked)
        ));
        assert!(matches!(
            session.update_entry(entry.id, gmail()).await,
            Err(Error::SessionLocked)
        ));
        assert!(matches!(
            session.delete_entry(entry.id).await,
            Err(Error::SessionLocked)
        ));
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let (session, _) = new_session();
        session.setup_master_password(PASSWORD).await.unwrap();
        let created = session.create_entry(gmail()).await.unwrap();

        let updated = session
            .update_entry(created.id, EntryInput::new("Gmail (work)", "me@corp.example", "pw-2"))
            .await
            .unwrap();
        assert_eq!(updated.id, created.id);
        assert_eq!(updated.created_at, created.created_at);
        assert!(updated.updated_at >= created.updated_at);
        assert_eq!(updated.url, None);
        assert_eq!(session.entry(created.id).await, Some(updated));

        session.delete_entry(created.id).await.unwrap();
        assert!(session.entries().await.is_empty());

        let missing = Uuid::new_v4();
        assert!(matches!(
            session.update_entry(missing, gmail()).await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(session.delete_entry(missing).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_invalid_input_leaves_vault_untouched() {
        let (session, storage) = new_session();
        session.setup_master_password(PASSWORD).await.unwrap();
        session.create_entry(gmail()).await.unwrap();
        let before = stored(&storage).await;

        let result = session.create_entry(EntryInput::new(" ", "u", "s")).await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
        assert_eq!(session.entries().await.len(), 1);
        assert_eq!(stored(&storage).await, before);
    }

    #[tokio::test]
    async fn test_new_entries_prepended() {
        let (session, _) = new_session();
        session.setup_master_password(PASSWORD).await.unwrap();
        session.create_entry(EntryInput::new("First", "a", "1")).await.unwrap();
        session.create_entry(EntryInput::new("Second", "b", "2")).await.unwrap();

        let titles: Vec<_> = session
            .summaries()
            .await
            .into_iter()
            .map(|s| s.title)
            .collect();
        assert_eq!(titles, vec!["Second", "First"]);
    }

    #[tokio::test]
    async fn test_search_matches_visible_fields_only() {
        let (session, _) = new_session();
        session.setup_master_password(PASSWORD).await.unwrap();
        session.create_entry(gmail()).await.unwrap();
        session
            .create_entry(EntryInput::new("Bank", "acct-991", "pin-4242").with_url("https://bank.example"))
            .await
            .unwrap();

        assert_eq!(session.search("GOOGLE").await.len(), 1);
        assert_eq!(session.search("example").await[0].title, "Bank");
        assert!(session.search("pin-4242").await.is_empty());
        assert_eq!(session.search("").await.len(), 2);

        session.lock(LockReason::Manual).await;
        assert!(session.search("").await.is_empty());
    }

    #[tokio::test]
    async fn test_stored_envelope_hides_plaintext() {
        let (session, storage) = new_session();
        session.setup_master_password(PASSWORD).await.unwrap();
        session.create_entry(gmail()).await.unwrap();

        let raw = storage.blobs().read(&user()).await.unwrap().unwrap();
        let raw = String::from_utf8(raw).unwrap();
        assert!(!raw.contains("hunter2-secret"));
        assert!(!raw.contains("Gmail"));
        assert!(!raw.contains(PASSWORD));

        let record = stored(&storage).await.vault.unwrap();
        assert_eq!(record.version, SCHEMA_VERSION);
        assert_eq!(record.owner_id, user());
    }

    #[tokio::test]
    async fn test_each_persist_reencrypts_with_fresh_nonce() {
        let (session, storage) = new_session();
        session.setup_master_password(PASSWORD).await.unwrap();

        session.create_entry(gmail()).await.unwrap();
        let first = stored(&storage).await.vault.unwrap();
        session.create_entry(EntryInput::new("Bank", "acct", "1")).await.unwrap();
        let second = stored(&storage).await.vault.unwrap();

        assert_ne!(first.payload.nonce, second.payload.nonce);
        assert!(second.updated_at > first.updated_at);
    }

    #[test]
    fn test_next_timestamp_strictly_increases() {
        let future = Utc::now() + chrono::Duration::hours(1);
        assert_eq!(
            next_timestamp(Some(future)),
            future + chrono::Duration::milliseconds(1)
        );

        let past = Utc::now() - chrono::Duration::hours(1);
        assert!(next_timestamp(Some(past)) > past);
        assert!(next_timestamp(None) <= Utc::now());
    }

    async fn reopen_with(
        storage: Arc<MemoryStorage>,
        tamper: impl FnOnce(&mut EncryptedVaultRecord),
    ) -> (VaultSession, Result<bool>) {
        let mut envelope = stored(&storage).await;
        tamper(envelope.vault.as_mut().unwrap());
        storage.save(&user(), &envelope).await.unwrap();

        let (session, _) = session_over(storage);
        session.initialize().await.unwrap();
        let result = session.unlock(PASSWORD).await;
        (session, result)
    }

    async fn configured_with_entry() -> Arc<MemoryStorage> {
        let storage = Arc::new(BlobVaultStorage::in_memory());
        let (session, _) = session_over(storage.clone());
        session.setup_master_password(PASSWORD).await.unwrap();
        session.create_entry(gmail()).await.unwrap();
        storage
    }

    #[tokio::test]
    async fn test_tampered_payload_is_integrity_error() {
        let storage = configured_with_entry().await;
        let (session, result) = reopen_with(storage, |record| record.payload.ciphertext[0] ^= 0x01).await;

        assert!(matches!(result, Err(Error::Integrity(_))));
        assert_eq!(session.state(), SessionState::Locked);
        assert!(session.entries().await.is_empty());
    }

    #[tokio::test]
    async fn test_future_version_fails_closed() {
        let storage = configured_with_entry().await;
        let (session, result) = reopen_with(storage, |record| record.version = SCHEMA_VERSION + 1).await;

        assert!(matches!(result, Err(Error::UnsupportedVersion(2))));
        assert_eq!(session.state(), SessionState::Locked);
    }

    #[tokio::test]
    async fn test_foreign_owner_rejected() {
        let storage = configured_with_entry().await;
        let (session, result) = reopen_with(storage, |record| {
            record.owner_id = UserId::new("someone-else").unwrap()
        })
        .await;

        assert!(matches!(result, Err(Error::Integrity(_))));
        assert_eq!(session.state(), SessionState::Locked);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inactivity_timeout_locks() {
        let (session, _) = new_session();
        session.setup_master_password(PASSWORD).await.unwrap();
        session.create_entry(gmail()).await.unwrap();
        session.set_inactivity_timeout_ms(20).await.unwrap();

        sleep(Duration::from_millis(40)).await;

        assert_eq!(session.state(), SessionState::Locked);
        assert_eq!(session.lock_reason(), Some(LockReason::Timeout));
        assert!(session.entries().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_activity_reschedules_watchdog() {
        let (session, _) = new_session();
        session.setup_master_password(PASSWORD).await.unwrap();
        session.set_inactivity_timeout_ms(20).await.unwrap();

        sleep(Duration::from_millis(15)).await;
        assert!(session.record_activity().await);

        sleep(Duration::from_millis(5)).await;
        assert!(session.is_unlocked());

        sleep(Duration::from_millis(10)).await;
        assert!(session.is_unlocked());

        sleep(Duration::from_millis(10)).await;
        assert_eq!(session.state(), SessionState::Locked);
        assert_eq!(session.lock_reason(), Some(LockReason::Timeout));
    }

    #[tokio::test(start_paused = true)]
    async fn test_mutation_counts_as_activity() {
        let (session, _) = new_session();
        session.setup_master_password(PASSWORD).await.unwrap();
        session.set_inactivity_timeout_ms(20).await.unwrap();

        sleep(Duration::from_millis(15)).await;
        session.create_entry(gmail()).await.unwrap();

        sleep(Duration::from_millis(10)).await;
        assert!(session.is_unlocked());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_timer_does_not_relock() {
        let (session, _) = new_session();
        session.setup_master_password(PASSWORD).await.unwrap();
        session.set_inactivity_timeout_ms(20).await.unwrap();

        sleep(Duration::from_millis(10)).await;
        assert!(session.lock(LockReason::Manual).await);
        assert!(session.unlock(PASSWORD).await.unwrap());

        sleep(Duration::from_millis(15)).await;
        assert!(session.is_unlocked());
        assert_eq!(session.lock_reason(), None);

        sleep(Duration::from_millis(10)).await;
        assert_eq!(session.lock_reason(), Some(LockReason::Timeout));
    }

    #[tokio::test(start_paused = true)]
    async fn test_locked_session_has_no_watchdog() {
        let (session, _) = new_session();
        session.setup_master_password(PASSWORD).await.unwrap();
        session.set_inactivity_timeout_ms(20).await.unwrap();
        session.lock(LockReason::Manual).await;

        assert!(!session.record_activity().await);
        sleep(Duration::from_millis(50)).await;
        assert_eq!(session.lock_reason(), Some(LockReason::Manual));
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribers_observe_timeout() {
        let (session, _) = new_session();
        let mut status = session.subscribe();
        session.setup_master_password(PASSWORD).await.unwrap();
        session.set_inactivity_timeout_ms(20).await.unwrap();

        let locked = status
            .wait_for(|s| s.state == SessionState::Locked)
            .await
            .unwrap()
            .lock_reason;
        assert_eq!(locked, Some(LockReason::Timeout));
    }

    #[tokio::test]
    async fn test_lock_when_not_unlocked_is_noop() {
        let (session, _) = new_session();
        assert!(!session.lock(LockReason::Manual).await);

        session.setup_master_password(PASSWORD).await.unwrap();
        assert!(session.lock(LockReason::Timeout).await);
        assert!(!session.lock(LockReason::Manual).await);
        assert_eq!(session.lock_reason(), Some(LockReason::Timeout));
    }

    #[tokio::test]
    async fn test_timeout_change_persists_while_locked() {
        let storage = Arc::new(BlobVaultStorage::in_memory());
        let (session, _) = session_over(storage.clone());
        session.setup_master_password(PASSWORD).await.unwrap();
        session.lock(LockReason::Manual).await;

        session.set_inactivity_timeout_ms(60_000).await.unwrap();
        assert_eq!(stored(&storage).await.config.inactivity_timeout_ms(), 60_000);

        let (reopened, _) = session_over(storage);
        reopened.initialize().await.unwrap();
        assert_eq!(reopened.config().await.inactivity_timeout_ms(), 60_000);
    }

    #[tokio::test]
    async fn test_zero_timeout_rejected() {
        let (session, _) = new_session();
        session.setup_master_password(PASSWORD).await.unwrap();

        assert!(matches!(
            session.set_inactivity_timeout_ms(0).await,
            Err(Error::InvalidInput(_))
        ));
        assert_eq!(session.config().await, VaultConfig::default());
    }

    #[tokio::test]
    async fn test_clear_all_data() {
        let (session, storage) = new_session();
        session.setup_master_password(PASSWORD).await.unwrap();
        session.create_entry(gmail()).await.unwrap();
        session.set_inactivity_timeout_ms(1_000).await.unwrap();

        session.clear_all_data().await.unwrap();

        assert_eq!(session.state(), SessionState::NotConfigured);
        assert!(session.entries().await.is_empty());
        assert_eq!(session.config().await, VaultConfig::default());
        assert!(storage.load(&user()).await.unwrap().is_none());

        session.setup_master_password("Fresh-Start-Password").await.unwrap();
        assert!(session.is_unlocked());
    }

    #[tokio::test]
    async fn test_identity_required() {
        let storage = Arc::new(BlobVaultStorage::in_memory());
        let identity = Arc::new(LocalIdentity::signed_out());
        let session = VaultSession::with_cipher(cipher(), storage, identity);

        assert!(matches!(session.initialize().await, Err(Error::Identity(_))));
        assert_eq!(session.state(), SessionState::Uninitialized);
    }

    #[tokio::test]
    async fn test_user_switch_blocks_mutations() {
        let storage = Arc::new(BlobVaultStorage::in_memory());
        let (session, identity) = session_over(storage.clone());
        session.setup_master_password(PASSWORD).await.unwrap();

        identity.sign_in(UserId::new("intruder").unwrap());
        assert!(matches!(
            session.create_entry(gmail()).await,
            Err(Error::Identity(_))
        ));

        identity.sign_out();
        assert!(matches!(
            session.create_entry(gmail()).await,
            Err(Error::Identity(_))
        ));
        assert!(stored(&storage).await.vault.is_none());
    }

    #[tokio::test]
    async fn test_clear_refuses_other_user() {
        let storage = Arc::new(BlobVaultStorage::in_memory());
        let intruder = UserId::new("intruder").unwrap();
        let (other, _) = session_over(storage.clone());
        other.setup_master_password(PASSWORD).await.unwrap();
        let foreign = stored(&storage).await;
        storage.save(&intruder, &foreign).await.unwrap();

        let (session, identity) = session_over(storage.clone());
        session.setup_master_password(PASSWORD).await.unwrap();
        session.create_entry(gmail()).await.unwrap();

        identity.sign_in(intruder.clone());
        assert!(matches!(session.clear_all_data().await, Err(Error::Identity(_))));

        assert_eq!(storage.load(&intruder).await.unwrap(), Some(foreign));
        assert!(stored(&storage).await.vault.is_some());
        assert!(session.is_unlocked());
        assert_eq!(session.entries().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_initialize_discards_unlocked_state() {
        let (session, _) = new_session();
        session.setup_master_password(PASSWORD).await.unwrap();
        session.create_entry(gmail()).await.unwrap();
        session.set_inactivity_timeout_ms(20).await.unwrap();

        assert_eq!(session.initialize().await.unwrap(), SessionState::Locked);
        assert!(session.entries().await.is_empty());
        assert!(session.search("").await.is_empty());

        sleep(Duration::from_millis(40)).await;
        assert_eq!(session.state(), SessionState::Locked);
        assert_eq!(session.lock_reason(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_stops_watchdog() {
        let (session, _) = new_session();
        session.setup_master_password(PASSWORD).await.unwrap();
        session.set_inactivity_timeout_ms(20).await.unwrap();

        session.clear_all_data().await.unwrap();
        sleep(Duration::from_millis(40)).await;

        assert_eq!(session.state(), SessionState::NotConfigured);
        assert_eq!(session.lock_reason(), None);
    }

    #[tokio::test]
    async fn test_timeout_before_setup_is_kept_in_memory() {
        let (session, storage) = new_session();
        assert_eq!(session.initialize().await.unwrap(), SessionState::NotConfigured);

        session.set_inactivity_timeout_ms(20_000).await.unwrap();
        assert!(storage.load(&user()).await.unwrap().is_none());
        assert_eq!(session.config().await.inactivity_timeout_ms(), 20_000);

        session.setup_master_password(PASSWORD).await.unwrap();
        assert_eq!(stored(&storage).await.config.inactivity_timeout_ms(), 20_000);
    }

    struct FlakyStorage {
        inner: MemoryStorage,
        fail: AtomicBool,
    }

    #[async_trait]
    impl VaultStorage for FlakyStorage {
        async fn load(&self, user: &UserId) -> Result<Option<VaultEnvelope>> {
            self.inner.load(user).await
        }

        async fn save(&self, user: &UserId, envelope: &VaultEnvelope) -> Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(Error::Storage("disk full".to_string()));
            }
            self.inner.save(user, envelope).await
        }

        async fn clear(&self, user: &UserId) -> Result<()> {
            self.inner.clear(user).await
        }
    }

    #[tokio::test]
    async fn test_failed_save_keeps_last_good_state() {
        let storage = Arc::new(FlakyStorage {
            inner: BlobVaultStorage::in_memory(),
            fail: AtomicBool::new(false),
        });
        let identity = Arc::new(LocalIdentity::new(user()));
        let session = VaultSession::with_cipher(cipher(), storage.clone(), identity);
        session.setup_master_password(PASSWORD).await.unwrap();
        let kept = session.create_entry(gmail()).await.unwrap();
        let before = storage.load(&user()).await.unwrap();

        storage.fail.store(true, Ordering::SeqCst);
        assert!(matches!(
            session.create_entry(EntryInput::new("Bank", "acct", "1")).await,
            Err(Error::Storage(_))
        ));
        assert!(matches!(
            session.delete_entry(kept.id).await,
            Err(Error::Storage(_))
        ));
        assert!(session.set_inactivity_timeout_ms(1_000).await.is_err());

        assert_eq!(session.entries().await, vec![kept]);
        assert_eq!(session.config().await, VaultConfig::default());
        assert_eq!(storage.load(&user()).await.unwrap(), before);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_creates_are_serialized() {
        let storage = Arc::new(BlobVaultStorage::in_memory());
        let (session, _) = session_over(storage.clone());
        session.setup_master_password(PASSWORD).await.unwrap();

        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..16 {
            let session = session.clone();
            tasks.spawn(async move {
                session
                    .create_entry(EntryInput::new(format!("Entry {}", i), "user", "secret"))
                    .await
            });
        }
        while let Some(result) = tasks.join_next().await {
            result.unwrap().unwrap();
        }
        assert_eq!(session.entries().await.len(), 16);

        let (reopened, _) = session_over(storage);
        assert!(reopened.unlock(PASSWORD).await.unwrap());
        assert_eq!(reopened.entries().await.len(), 16);
    }

    #[test]
    fn test_status_serialization() {
        let status = SessionStatus {
            state: SessionState::NotConfigured,
            lock_reason: Some(LockReason::Timeout),
        };
        assert_eq!(
            serde_json::to_string(&status).unwrap(),
            r#"{"state":"notConfigured","lockReason":"timeout"}"#
        );
    }
}
