//! Local user records.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How a user proved who they are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityKind {
    /// Local-only record created before sign-up.
    Guest,
    Email,
    /// Third-party sign-in (Apple, Google, ...).
    Provider,
}

impl IdentityKind {
    pub fn is_guest(&self) -> bool {
        matches!(self, IdentityKind::Guest)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preferences {
    /// Daily target in number of drinks.
    #[serde(default = "default_daily_goal")]
    pub daily_goal: u32,
    #[serde(default)]
    pub reminders_enabled: bool,
}

fn default_daily_goal() -> u32 {
    8
}

impl Default for Preferences {
    fn default() -> Self {
        Preferences {
            daily_goal: default_daily_goal(),
            reminders_enabled: false,
        }
    }
}

/// A user record as stored locally and mirrored to the backend profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub kind: IdentityKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default)]
    pub preferences: Preferences,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn guest() -> Self {
        let now = Utc::now();
        User {
            id: Uuid::new_v4(),
            kind: IdentityKind::Guest,
            display_name: None,
            email: None,
            preferences: Preferences::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Baseline profile for a freshly authenticated account with no remote profile.
    pub fn authenticated(id: Uuid, kind: IdentityKind, email: Option<String>) -> Self {
        let now = Utc::now();
        User {
            id,
            kind,
            display_name: None,
            email,
            preferences: Preferences::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_guest(&self) -> bool {
        self.kind.is_guest()
    }

    /// Carry the guest's profile and preferences over to an account identity.
    pub fn adopted_by(&self, account_id: Uuid, kind: IdentityKind, email: Option<String>) -> User {
        User {
            id: account_id,
            kind,
            display_name: self.display_name.clone(),
            email: email.or_else(|| self.email.clone()),
            preferences: self.preferences.clone(),
            created_at: self.created_at,
            updated_at: Utc::now(),
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match (&self.email, &self.display_name) {
            (Some(email), _) => write!(f, "{email}"),
            (None, Some(name)) => write!(f, "{name}"),
            (None, None) if self.is_guest() => write!(f, "guest"),
            (None, None) => write!(f, "{}", self.id),
        }
    }
}

/// Pick the authoritative local user: the most recently updated one.
pub fn most_recent(users: impl IntoIterator<Item = User>) -> Option<User> {
    users.into_iter().max_by_key(|u| u.updated_at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_most_recent_uses_updated_at() {
        let mut older = User::guest();
        older.updated_at = Utc::now() - Duration::hours(2);
        let newer = User::authenticated(Uuid::new_v4(), IdentityKind::Email, None);

        let picked = most_recent(vec![newer.clone(), older]).unwrap();
        assert_eq!(picked.id, newer.id);
        assert!(most_recent(Vec::new()).is_none());
    }

    #[test]
    fn test_adopted_by_keeps_preferences() {
        let mut guest = User::guest();
        guest.preferences.daily_goal = 12;
        guest.display_name = Some("Sam".into());

        let account_id = Uuid::new_v4();
        let adopted =
            guest.adopted_by(account_id, IdentityKind::Email, Some("sam@example.com".into()));

        assert_eq!(adopted.id, account_id);
        assert_eq!(adopted.kind, IdentityKind::Email);
        assert_eq!(adopted.preferences.daily_goal, 12);
        assert_eq!(adopted.display_name.as_deref(), Some("Sam"));
        assert_eq!(adopted.created_at, guest.created_at);
    }
}
