//! Credential entries and the plaintext credential set.
//!
//! Entries only exist in plaintext inside an unlocked session. They are
//! persisted exclusively as part of the whole serialized set, which the
//! session encrypts in one piece.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop};

use passbox_common::{Error, Result, SensitiveBytes};

/// A stored credential.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase")]
pub struct CredentialEntry {
    #[zeroize(skip)]
    pub id: Uuid,
    pub title: String,
    pub username: String,
    pub secret: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[zeroize(skip)]
    pub created_at: DateTime<Utc>,
    #[zeroize(skip)]
    pub updated_at: DateTime<Utc>,
}

impl CredentialEntry {
    /// Build a new entry with a fresh id.
    pub(crate) fn create(input: &EntryInput, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: input.title.trim().to_string(),
            username: input.username.clone(),
            secret: input.secret.clone(),
            url: input.url.clone(),
            notes: input.notes.clone(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Replace the editable fields, keeping id and creation time.
    pub(crate) fn apply(&mut self, input: &EntryInput, now: DateTime<Utc>) {
        self.title = input.title.trim().to_string();
        self.username.clone_from(&input.username);
        self.secret.clone_from(&input.secret);
        self.url.clone_from(&input.url);
        self.notes.clone_from(&input.notes);
        self.updated_at = now;
    }

    /// Case-insensitive match of `query` against title, username and url.
    ///
    /// An empty query matches everything. The secret and notes are never
    /// searched.
    pub fn matches(&self, query: &str) -> bool {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return true;
        }

        [Some(&self.title), Some(&self.username), self.url.as_ref()]
            .into_iter()
            .flatten()
            .any(|field| field.to_lowercase().contains(&query))
    }

    /// Secret-free view of this entry.
    pub fn summary(&self) -> EntrySummary {
        EntrySummary {
            id: self.id,
            title: self.title.clone(),
            username: self.username.clone(),
            url: self.url.clone(),
            updated_at: self.updated_at,
        }
    }
}

impl fmt::Debug for CredentialEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialEntry")
            .field("id", &self.id)
            .field("title", &self.title)
            .field("username", &self.username)
            .field("secret", &"[REDACTED]")
            .field("url", &self.url)
            .field("notes", &self.notes.as_ref().map(|_| "[REDACTED]"))
            .field("created_at", &self.created_at)
            .field("updated_at", &self.updated_at)
            .finish()
    }
}

/// Listing view of an entry without the secret or notes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntrySummary {
    pub id: Uuid,
    pub title: String,
    pub username: String,
    pub url: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Caller-supplied fields for creating or updating an entry.
#[derive(Clone, Default, Zeroize, ZeroizeOnDrop)]
pub struct EntryInput {
    pub title: String,
    pub username: String,
    pub secret: String,
    pub url: Option<String>,
    pub notes: Option<String>,
}

impl EntryInput {
    pub fn new(
        title: impl Into<String>,
        username: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            username: username.into(),
            secret: secret.into(),
            url: None,
            notes: None,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = non_blank(url.into());
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = non_blank(notes.into());
        self
    }

    /// Check the input before it touches the credential set.
    ///
    /// # Errors
    /// - Title is blank
    pub fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(Error::InvalidInput("Entry title cannot be empty".to_string()));
        }
        Ok(())
    }
}

impl fmt::Debug for EntryInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryInput")
            .field("title", &self.title)
            .field("username", &self.username)
            .field("secret", &"[REDACTED]")
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

fn non_blank(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

#[derive(Serialize)]
struct PayloadRef<'a> {
    entries: &'a [CredentialEntry],
}

#[derive(Deserialize)]
struct PayloadOwned {
    entries: Vec<CredentialEntry>,
}

/// Serialize the whole credential set to the plaintext payload format.
pub(crate) fn encode_entries(entries: &[CredentialEntry]) -> Result<SensitiveBytes> {
    serde_json::to_vec(&PayloadRef { entries })
        .map(SensitiveBytes::new)
        .map_err(|e| Error::Serialization(e.to_string()))
}

/// Parse a decrypted plaintext payload back into the credential set.
pub(crate) fn decode_entries(plaintext: &[u8]) -> Result<Vec<CredentialEntry>> {
    serde_json::from_slice::<PayloadOwned>(plaintext)
        .map(|payload| payload.entries)
        .map_err(|e| Error::Serialization(format!("Invalid credential payload: {}", e)))
}
