// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! User model for storage and API.

use serde::{Deserialize, Serialize};

/// User profile stored in Firestore (`users/{id}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// Auth provider uid (also used as document ID)
    pub id: String,
    /// Display name chosen by the user
    #[serde(default)]
    pub display_name: Option<String>,
    /// Email address (may be None if not shared)
    #[serde(default)]
    pub email: Option<String>,
    /// Avatar image URL in the object store
    #[serde(default, rename = "avatarURL")]
    pub avatar_url: Option<String>,
    /// Current push delivery token. Rotates; written only by the owner's
    /// client session.
    #[serde(default)]
    pub push_token: Option<String>,
    /// When the user registered (RFC3339)
    #[serde(default)]
    pub created_at: String,
}

impl User {
    /// Name shown to other users: display name, else email.
    pub fn public_name(&self) -> Option<&str> {
        self.display_name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .or_else(|| self.email.as_deref().filter(|e| !e.trim().is_empty()))
    }

    /// Push token, if one is registered and non-empty.
    pub fn push_token(&self) -> Option<&str> {
        self.push_token.as_deref().filter(|t| !t.is_empty())
    }
}

/// Profile fields written by a profile edit. `None` keeps the stored value.
///
/// The push token is deliberately absent: it has its own single-writer path.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, rename = "avatarURL", skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    /// Set only when the profile is being created.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

impl ProfileUpdate {
    /// Stored field names this update writes, for a field-masked update.
    pub fn field_paths(&self) -> Vec<&'static str> {
        [
            ("displayName", self.display_name.is_some()),
            ("email", self.email.is_some()),
            ("avatarURL", self.avatar_url.is_some()),
            ("createdAt", self.created_at.is_some()),
        ]
        .into_iter()
        .filter_map(|(path, set)| set.then_some(path))
        .collect()
    }

    /// Apply the set fields to `user`.
    pub fn apply_to(&self, user: &mut User) {
        if let Some(name) = &self.display_name {
            user.display_name = Some(name.clone());
        }
        if let Some(email) = &self.email {
            user.email = Some(email.clone());
        }
        if let Some(avatar_url) = &self.avatar_url {
            user.avatar_url = Some(avatar_url.clone());
        }
        if let Some(created_at) = &self.created_at {
            user.created_at = created_at.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(display_name: Option<&str>, email: Option<&str>) -> User {
        User {
            id: "u1".to_string(),
            display_name: display_name.map(String::from),
            email: email.map(String::from),
            avatar_url: None,
            push_token: None,
            created_at: String::new(),
        }
    }

    #[test]
    fn public_name_prefers_display_name() {
        assert_eq!(
            user(Some("Anna"), Some("anna@example.com")).public_name(),
            Some("Anna")
        );
    }

    #[test]
    fn public_name_falls_back_to_email() {
        assert_eq!(
            user(Some("  "), Some("anna@example.com")).public_name(),
            Some("anna@example.com")
        );
        assert_eq!(user(None, None).public_name(), None);
    }

    #[test]
    fn deserializes_firestore_field_names() {
        let json = r#"{"id":"u1","displayName":"Anna","avatarURL":"https://x/a.png","pushToken":"t1"}"#;
        let parsed: User = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.avatar_url.as_deref(), Some("https://x/a.png"));
        assert_eq!(parsed.push_token(), Some("t1"));
        assert_eq!(parsed.email, None);
    }

    #[test]
    fn profile_update_masks_only_set_fields() {
        let update = ProfileUpdate {
            display_name: Some("Anna".to_string()),
            avatar_url: Some("https://example.com/a.png".to_string()),
            ..Default::default()
        };
        assert_eq!(update.field_paths(), vec!["displayName", "avatarURL"]);

        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json["avatarURL"], "https://example.com/a.png");
        assert!(json.get("email").is_none());
        assert!(json.get("pushToken").is_none());

        let mut stored = user(Some("Old"), Some("a@example.com"));
        stored.push_token = Some("t1".to_string());
        update.apply_to(&mut stored);
        assert_eq!(stored.display_name.as_deref(), Some("Anna"));
        assert_eq!(stored.email.as_deref(), Some("a@example.com"));
        assert_eq!(stored.push_token.as_deref(), Some("t1"));
    }
}
