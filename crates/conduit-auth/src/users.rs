//! The static API-key to user table.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::UserDbError;

/// One entry of the user table, keyed by username.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub api_key: String,
    pub full_name: String,
    pub role: String,
}

/// The identity attached to an authenticated request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthenticatedUser {
    pub username: String,
    pub full_name: String,
    pub role: String,
}

/// Users indexed by API key.
#[derive(Debug, Clone, Default)]
pub struct UserDb {
    users: BTreeMap<String, UserRecord>,
    by_key: HashMap<String, String>,
}

impl UserDb {
    /// Build the table, rejecting empty and shared keys.
    pub fn from_users(users: BTreeMap<String, UserRecord>) -> Result<Self, UserDbError> {
        let mut by_key = HashMap::with_capacity(users.len());
        for (username, record) in &users {
            if record.api_key.is_empty() {
                return Err(UserDbError::EmptyKey(username.clone()));
            }
            if let Some(first) = by_key.insert(record.api_key.clone(), username.clone()) {
                return Err(UserDbError::DuplicateKey {
                    first,
                    second: username.clone(),
                });
            }
        }
        Ok(Self { users, by_key })
    }

    /// Parse `{"username": {"api_key": .., "full_name": .., "role": ..}}`.
    pub fn from_json(raw: &str) -> Result<Self, UserDbError> {
        Self::from_users(serde_json::from_str(raw)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, UserDbError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| UserDbError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw)
    }

    /// The user owning `api_key`, if any.
    pub fn lookup(&self, api_key: &str) -> Option<AuthenticatedUser> {
        let username = self.by_key.get(api_key)?;
        let record = self.users.get(username)?;
        Some(AuthenticatedUser {
            username: username.clone(),
            full_name: record.full_name.clone(),
            role: record.role.clone(),
        })
    }

    pub fn validate(&self, api_key: &str) -> bool {
        self.by_key.contains_key(api_key)
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[cfg(test)]
pub(crate) const SAMPLE_USERS: &str = r#"{
    "felix": {"api_key": "password123", "full_name": "Felix Kewa", "role": "admin"},
    "alice": {"api_key": "alicepass456", "full_name": "Alice Johnson", "role": "developer"},
    "bob": {"api_key": "bobsecret789", "full_name": "Bob Smith", "role": "viewer"}
}"#;
