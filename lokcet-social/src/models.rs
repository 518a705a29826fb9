use chrono::serde::{ts_milliseconds, ts_milliseconds_option};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// --- User ---

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

impl Location {
    /// `(0, 0)` marks a user who never shared a location.
    pub fn is_unset(&self) -> bool {
        self.latitude == 0.0 && self.longitude == 0.0
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct User {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub profile_picture: String,
    pub location: Location,
    pub friends: Vec<String>,
    /// Outgoing requests waiting on the other user.
    pub friend_wait_list: Vec<String>,
    /// Incoming requests to accept or reject.
    pub friend_requests: Vec<String>,
    pub upload_image_list: Vec<String>,
    pub is_deleted: bool,
    #[serde(with = "ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name).trim().to_string()
    }
}

/// What other users see of a user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub profile_picture: String,
}

impl From<&User> for UserSummary {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            profile_picture: user.profile_picture.clone(),
        }
    }
}

/// Relationship between two users, seen from the first one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FriendRelation {
    None,
    /// I sent a request that is still pending.
    Requested,
    /// They sent me a request that is still pending.
    Incoming,
    Friends,
}

impl FriendRelation {
    /// Both documents are consulted so a half-written pair still counts.
    pub fn between(me: &User, other: &User) -> Self {
        if me.friends.contains(&other.id) || other.friends.contains(&me.id) {
            Self::Friends
        } else if me.friend_wait_list.contains(&other.id) || other.friend_requests.contains(&me.id) {
            Self::Requested
        } else if me.friend_requests.contains(&other.id) || other.friend_wait_list.contains(&me.id) {
            Self::Incoming
        } else {
            Self::None
        }
    }
}

// --- Credential ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    pub user_id: String,
    pub email: String,
    pub password_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reset_code_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "ts_milliseconds_option")]
    pub reset_expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reset_attempts: u32,
}

// --- Feedback ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Problem {
    pub id: String,
    pub user_id: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(with = "ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Suggestion {
    pub id: String,
    pub user_id: String,
    pub content: String,
    #[serde(with = "ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn user(id: &str) -> User {
        User {
            id: id.into(),
            ..User::default()
        }
    }

    #[test]
    fn sparse_user_documents_decode() {
        let user: User = serde_json::from_value(json!({"id": "u1", "firstName": "Lan"})).unwrap();
        assert_eq!(user.display_name(), "Lan");
        assert!(user.friends.is_empty());
        assert!(user.location.is_unset());
        assert!(!user.is_deleted);
    }

    #[test]
    fn relation_checks_both_directions() {
        let mut a = user("a");
        let mut b = user("b");
        assert_eq!(FriendRelation::between(&a, &b), FriendRelation::None);

        b.friend_requests.push("a".into());
        assert_eq!(FriendRelation::between(&a, &b), FriendRelation::Requested);
        assert_eq!(FriendRelation::between(&b, &a), FriendRelation::Incoming);

        b.friend_requests.clear();
        a.friends.push("b".into());
        assert_eq!(FriendRelation::between(&b, &a), FriendRelation::Friends);
    }

    #[test]
    fn credential_reset_fields_are_optional() {
        let cred: Credential = serde_json::from_value(json!({
            "userId": "u1",
            "email": "a@b.c",
            "passwordHash": "h",
        }))
        .unwrap();
        assert!(cred.reset_expires_at.is_none());
        let back = serde_json::to_value(&cred).unwrap();
        assert!(back.get("resetExpiresAt").is_none());
    }
}
