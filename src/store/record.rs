//! Per-user connection record and its document field names.

use crate::cipher::Ciphertext;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

/// Raw persisted document: field name to JSON value.
pub type Document = Map<String, Value>;

/// Field names as persisted in the `users` collection.
pub mod fields {
    pub const GITHUB_CONNECTED: &str = "githubConnected";
    pub const GITHUB_LOGIN: &str = "githubLogin";
    pub const GITHUB_ID: &str = "githubId";
    pub const GITHUB_ACCESS_TOKEN_CIPHERTEXT: &str = "githubAccessTokenCiphertext";
    pub const LAST_UPDATED: &str = "lastUpdated";

    /// Fields tombstoned on disconnect
    pub const CONNECTION_FIELDS: [&str; 3] =
        [GITHUB_ACCESS_TOKEN_CIPHERTEXT, GITHUB_LOGIN, GITHUB_ID];
}

/// Typed view of a user's GitHub connection.
///
/// `github_connected` is true iff login, id and ciphertext are all present
/// and non-empty. The plaintext token is never part of this record.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserConnectionRecord {
    /// Document key; not stored inside the document
    #[serde(skip)]
    pub user_id: String,

    pub github_connected: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub github_login: Option<String>,

    /// Provider account id as a decimal string
    #[serde(skip_serializing_if = "Option::is_none")]
    pub github_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub github_access_token_ciphertext: Option<Ciphertext>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,

    /// A connection key is present in the document, whatever its value
    #[serde(skip)]
    pub has_connection_keys: bool,
}

impl UserConnectionRecord {
    /// Project the connection fields out of a user document.
    ///
    /// The document is shared with other features, so this never fails: a
    /// field with an unexpected type is read as absent. Fields owned by other
    /// features are ignored.
    pub fn from_document(user_id: &str, document: &Document) -> Self {
        let string = |name: &str| {
            document
                .get(name)
                .and_then(Value::as_str)
                .map(str::to_string)
        };

        let github_id = match document.get(fields::GITHUB_ID) {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        };

        let last_updated = document
            .get(fields::LAST_UPDATED)
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        Self {
            user_id: user_id.to_string(),
            github_connected: document
                .get(fields::GITHUB_CONNECTED)
                .and_then(Value::as_bool)
                .unwrap_or(false),
            github_login: string(fields::GITHUB_LOGIN),
            github_id,
            github_access_token_ciphertext: string(fields::GITHUB_ACCESS_TOKEN_CIPHERTEXT)
                .map(Ciphertext::new),
            last_updated,
            has_connection_keys: fields::CONNECTION_FIELDS
                .iter()
                .any(|key| document.contains_key(*key)),
        }
    }

    /// Connected and consistent: flag set and every connection field present.
    pub fn is_connected(&self) -> bool {
        self.github_connected
            && non_empty(&self.github_login)
            && non_empty(&self.github_id)
            && self
                .github_access_token_ciphertext
                .as_ref()
                .is_some_and(|c| !c.is_empty())
    }

    /// Anything left to clear: the flag or any leftover connection key,
    /// including ones whose value has an unexpected type.
    pub fn has_connection_data(&self) -> bool {
        self.github_connected
            || self.has_connection_keys
            || self.github_login.is_some()
            || self.github_id.is_some()
            || self.github_access_token_ciphertext.is_some()
    }
}

fn non_empty(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|s| !s.is_empty())
}
