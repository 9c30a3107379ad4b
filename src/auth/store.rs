// In-memory credential store
// Holds the short-lived access credential and broadcasts every replacement

use chrono::{DateTime, Utc};
use std::fmt;
use tokio::sync::watch;

/// Opaque short-lived access credential
///
/// `Debug` and `Display` only show a short prefix so the value can go into logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short, log-safe prefix of the token
    pub fn redacted(&self) -> String {
        let prefix: String = self.0.chars().take(8).collect();
        format!("{}...", prefix)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Credential").field(&self.redacted()).finish()
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}

/// Session state derived from the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Session {
    /// A credential is present; authenticated views apply
    Authenticated,
    /// No credential; the login view applies
    Anonymous,
}

/// One immutable version of the store contents
#[derive(Debug, Clone)]
pub struct CredentialSnapshot {
    pub credential: Option<Credential>,
    /// Bumped on every `set`, starting at 0
    pub generation: u64,
    pub updated_at: DateTime<Utc>,
}

impl CredentialSnapshot {
    pub fn session(&self) -> Session {
        match self.credential {
            Some(_) => Session::Authenticated,
            None => Session::Anonymous,
        }
    }
}

/// Shared holder of the current credential
///
/// Readers always see a whole snapshot; writers replace it wholesale.
/// Passed explicitly (usually as `Arc<CredentialStore>`) to everything that issues requests.
pub struct CredentialStore {
    tx: watch::Sender<CredentialSnapshot>,
}

impl CredentialStore {
    /// Create an empty store (no credential, generation 0)
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(CredentialSnapshot {
            credential: None,
            generation: 0,
            updated_at: Utc::now(),
        });
        Self { tx }
    }

    /// Current credential, if any
    pub fn get(&self) -> Option<Credential> {
        self.tx.borrow().credential.clone()
    }

    /// Current snapshot (credential + generation)
    pub fn snapshot(&self) -> CredentialSnapshot {
        self.tx.borrow().clone()
    }

    /// Replace the credential; `None` means logged out
    ///
    /// Returns the new generation.
    pub fn set(&self, credential: Option<Credential>) -> u64 {
        let redacted = credential.as_ref().map(Credential::redacted);
        let mut generation = 0;
        self.tx.send_modify(|snapshot| {
            snapshot.credential = credential;
            snapshot.generation += 1;
            snapshot.updated_at = Utc::now();
            generation = snapshot.generation;
        });

        match redacted {
            Some(credential) => tracing::debug!(generation, %credential, "Credential replaced"),
            None => tracing::debug!(generation, "Credential cleared"),
        }

        generation
    }

    /// Clear the credential
    pub fn clear(&self) -> u64 {
        self.set(None)
    }

    /// Derived session state
    pub fn session(&self) -> Session {
        self.tx.borrow().session()
    }

    /// Subscribe to replacements; the receiver starts at the current snapshot
    pub fn subscribe(&self) -> watch::Receiver<CredentialSnapshot> {
        self.tx.subscribe()
    }
}

impl Default for CredentialStore {
    fn default() -> Self {
        Self::new()
    }
}
