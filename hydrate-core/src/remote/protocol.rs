//! Wire types exchanged with the backend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::event::Event;
use crate::period::{Period, PeriodRange};
use crate::user::IdentityKind;

/// Body of every aggregate section request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateRequest {
    pub period: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
}

impl From<&PeriodRange> for AggregateRequest {
    fn from(range: &PeriodRange) -> Self {
        let range = range.normalized();
        AggregateRequest {
            period: range.label().to_string(),
            start_date: range.start_string(),
            end_date: range.end_string(),
            time_zone: Some(range.time_zone.clone()),
        }
    }
}

impl AggregateRequest {
    /// Server-side view of the request. Unparseable dates are dropped.
    pub fn to_range(&self) -> PeriodRange {
        let parse = |s: &Option<String>| {
            s.as_deref()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|d| d.with_timezone(&Utc))
        };
        PeriodRange {
            period: Period::from_name(&self.period),
            start: parse(&self.start_date),
            end: parse(&self.end_date),
            time_zone: self.time_zone.clone().unwrap_or_else(|| "UTC".to_string()),
        }
        .normalized()
    }
}

/// How a user signs in.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Credentials {
    Email {
        email: String,
        password: String,
    },
    Provider {
        provider: String,
        #[serde(rename = "idToken")]
        id_token: String,
    },
}

impl Credentials {
    pub fn identity_kind(&self) -> IdentityKind {
        match self {
            Credentials::Email { .. } => IdentityKind::Email,
            Credentials::Provider { .. } => IdentityKind::Provider,
        }
    }

    pub fn email(&self) -> Option<&str> {
        match self {
            Credentials::Email { email, .. } => Some(email),
            Credentials::Provider { .. } => None,
        }
    }
}

/// An authenticated backend session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteSession {
    pub user_id: Uuid,
    pub kind: IdentityKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl RemoteSession {
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| at <= Utc::now())
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BatchUpsert {
    pub events: Vec<Event>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
