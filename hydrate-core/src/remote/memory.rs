//! In-process backend.
//!
//! Behaves like the real service (accounts, sessions, per-user collections,
//! aggregates computed from the stored events) and can be told to fail: go
//! offline, fail a section, or add latency. Tests drive the whole core
//! against it.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::error::{HydrateError, HydrateResult};
use crate::event::Event;
use crate::remote::RemoteBackend;
use crate::remote::protocol::{AggregateRequest, Credentials, RemoteSession};
use crate::section::Section;
use crate::stats::{
    HourlyHistogram, Insights, Overview, QualityDistribution, QualityTrend, SectionData,
    WeeklyRollup,
};
use crate::user::User;

/// Failure to inject into subsequent calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    Offline,
    Unauthorized,
    RateLimited,
    ServerError,
    /// Respond with JSON that does not decode into the section payload.
    Garbage,
}

impl Failure {
    fn to_error(self) -> HydrateError {
        match self {
            Failure::Offline => HydrateError::Connectivity("simulated offline".into()),
            Failure::Unauthorized => HydrateError::Auth("simulated unauthorized".into()),
            Failure::RateLimited => HydrateError::RateLimited,
            Failure::ServerError => HydrateError::Backend("simulated server error".into()),
            Failure::Garbage => HydrateError::Decode("simulated garbage".into()),
        }
    }
}

#[derive(Default)]
struct MemoryState {
    accounts: HashMap<String, (String, Uuid)>,
    session: Option<RemoteSession>,
    profiles: HashMap<Uuid, User>,
    events: HashMap<Uuid, BTreeMap<Uuid, Event>>,
    failure: Option<Failure>,
    session_failure: Option<Failure>,
    section_failures: HashMap<Section, Failure>,
    latency: Option<Duration>,
    upserted: Vec<Uuid>,
    deleted: Vec<Uuid>,
    section_calls: HashMap<Section, u32>,
}

#[derive(Default)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut MemoryState) -> R) -> R {
        let mut guard = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    // Failure injection

    /// Fail every call with `failure` until cleared with `None`.
    pub fn set_failure(&self, failure: Option<Failure>) {
        self.with_state(|s| s.failure = failure);
    }

    pub fn set_offline(&self, offline: bool) {
        self.set_failure(offline.then_some(Failure::Offline));
    }

    /// Fail only session checks.
    pub fn fail_session_checks(&self, failure: Option<Failure>) {
        self.with_state(|s| s.session_failure = failure);
    }

    pub fn fail_section(&self, section: Section, failure: Option<Failure>) {
        self.with_state(|s| match failure {
            Some(f) => {
                s.section_failures.insert(section, f);
            }
            None => {
                s.section_failures.remove(&section);
            }
        });
    }

    pub fn set_latency(&self, latency: Option<Duration>) {
        self.with_state(|s| s.latency = latency);
    }

    // Seeding and inspection

    /// Create an account and return its user id.
    pub fn register(&self, email: &str, password: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.with_state(|s| {
            s.accounts
                .insert(email.to_string(), (password.to_string(), id));
        });
        id
    }

    pub fn seed_events(&self, user_id: Uuid, events: impl IntoIterator<Item = Event>) {
        self.with_state(|s| {
            let bucket = s.events.entry(user_id).or_default();
            for event in events {
                bucket.insert(event.id, event);
            }
        });
    }

    pub fn seed_profile(&self, user: User) {
        self.with_state(|s| {
            s.profiles.insert(user.id, user);
        });
    }

    pub fn events_of(&self, user_id: Uuid) -> Vec<Event> {
        self.with_state(|s| {
            s.events
                .get(&user_id)
                .map(|b| b.values().cloned().collect())
                .unwrap_or_default()
        })
    }

    pub fn profile_of(&self, user_id: Uuid) -> Option<User> {
        self.with_state(|s| s.profiles.get(&user_id).cloned())
    }

    /// Ids of every event upsert received, in arrival order.
    pub fn upserted_ids(&self) -> Vec<Uuid> {
        self.with_state(|s| s.upserted.clone())
    }

    pub fn deleted_ids(&self) -> Vec<Uuid> {
        self.with_state(|s| s.deleted.clone())
    }

    pub fn section_calls(&self, section: Section) -> u32 {
        self.with_state(|s| s.section_calls.get(&section).copied().unwrap_or(0))
    }

    pub fn active_session(&self) -> Option<RemoteSession> {
        self.with_state(|s| s.session.clone())
    }

    async fn enter(&self) -> HydrateResult<()> {
        let (latency, failure) = self.with_state(|s| (s.latency, s.failure));
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        match failure {
            Some(f) => Err(f.to_error()),
            None => Ok(()),
        }
    }

    fn require_session(&self, user_id: Uuid) -> HydrateResult<()> {
        self.with_state(|s| match &s.session {
            Some(session) if session.user_id == user_id => Ok(()),
            Some(_) => Err(HydrateError::Auth("session belongs to another user".into())),
            None => Err(HydrateError::Auth("not signed in".into())),
        })
    }

    fn open_session(&self, user_id: Uuid, credentials: &Credentials) -> RemoteSession {
        let session = RemoteSession {
            user_id,
            kind: credentials.identity_kind(),
            email: credentials.email().map(str::to_string),
            access_token: Uuid::new_v4().to_string(),
            expires_at: None,
        };
        self.with_state(|s| s.session = Some(session.clone()));
        session
    }
}

fn derive_section(
    section: Section,
    events: &[Event],
    request: &AggregateRequest,
) -> HydrateResult<serde_json::Value> {
    let range = request.to_range();
    let now = Utc::now();
    let value = match section {
        Section::Overview => serde_json::to_value(Overview::derive(events, &range, now)),
        Section::QualityTrend => serde_json::to_value(QualityTrend::derive(events, &range, now)),
        Section::HourlyHistogram => {
            serde_json::to_value(HourlyHistogram::derive(events, &range, now))
        }
        Section::QualityDistribution => {
            serde_json::to_value(QualityDistribution::derive(events, &range, now))
        }
        Section::WeeklyRollup => serde_json::to_value(WeeklyRollup::derive(events, &range, now)),
        Section::Insights => serde_json::to_value(Insights::derive(events, &range, now)),
    };
    Ok(value?)
}

#[async_trait]
impl RemoteBackend for MemoryBackend {
    async fn current_session(&self) -> HydrateResult<Option<RemoteSession>> {
        self.enter().await?;
        self.with_state(|s| match s.session_failure {
            Some(f) => Err(f.to_error()),
            None => Ok(s.session.clone()),
        })
    }

    async fn sign_up(&self, credentials: &Credentials) -> HydrateResult<RemoteSession> {
        self.enter().await?;
        let user_id = match credentials {
            Credentials::Email { email, password } => {
                let exists = self.with_state(|s| s.accounts.contains_key(email));
                if exists {
                    return Err(HydrateError::Auth(format!("account {email} already exists")));
                }
                self.register(email, password)
            }
            Credentials::Provider { provider, id_token } => {
                self.register(&format!("{provider}:{id_token}"), "")
            }
        };
        Ok(self.open_session(user_id, credentials))
    }

    async fn sign_in(&self, credentials: &Credentials) -> HydrateResult<RemoteSession> {
        self.enter().await?;
        let user_id = match credentials {
            Credentials::Email { email, password } => self
                .with_state(|s| {
                    s.accounts
                        .get(email)
                        .filter(|(expected, _)| expected == password)
                        .map(|(_, id)| *id)
                })
                .ok_or_else(|| HydrateError::Auth("invalid email or password".into()))?,
            Credentials::Provider { provider, id_token } => {
                let key = format!("{provider}:{id_token}");
                match self.with_state(|s| s.accounts.get(&key).map(|(_, id)| *id)) {
                    Some(id) => id,
                    None => self.register(&key, ""),
                }
            }
        };
        Ok(self.open_session(user_id, credentials))
    }

    async fn sign_out(&self) -> HydrateResult<()> {
        self.enter().await?;
        self.with_state(|s| s.session = None);
        Ok(())
    }

    async fn fetch_profile(&self, user_id: Uuid) -> HydrateResult<Option<User>> {
        self.enter().await?;
        self.require_session(user_id)?;
        Ok(self.profile_of(user_id))
    }

    async fn put_profile(&self, user: &User) -> HydrateResult<()> {
        self.enter().await?;
        self.require_session(user.id)?;
        self.seed_profile(user.clone());
        Ok(())
    }

    async fn fetch_events(&self, user_id: Uuid) -> HydrateResult<Vec<Event>> {
        self.enter().await?;
        self.require_session(user_id)?;
        Ok(self.events_of(user_id))
    }

    async fn upsert_event(&self, user_id: Uuid, event: &Event) -> HydrateResult<()> {
        self.enter().await?;
        self.require_session(user_id)?;
        self.with_state(|s| {
            s.upserted.push(event.id);
            s.events
                .entry(user_id)
                .or_default()
                .insert(event.id, event.clone());
        });
        Ok(())
    }

    async fn delete_event(&self, user_id: Uuid, event_id: Uuid) -> HydrateResult<()> {
        self.enter().await?;
        self.require_session(user_id)?;
        self.with_state(|s| {
            s.deleted.push(event_id);
            if let Some(bucket) = s.events.get_mut(&user_id) {
                bucket.remove(&event_id);
            }
        });
        Ok(())
    }

    async fn batch_upsert_events(&self, user_id: Uuid, events: &[Event]) -> HydrateResult<()> {
        self.enter().await?;
        self.require_session(user_id)?;
        self.with_state(|s| {
            let bucket = s.events.entry(user_id).or_default();
            for event in events {
                s.upserted.push(event.id);
                bucket.insert(event.id, event.clone());
            }
        });
        Ok(())
    }

    async fn query_section(
        &self,
        section: Section,
        request: &AggregateRequest,
    ) -> HydrateResult<serde_json::Value> {
        self.with_state(|s| *s.section_calls.entry(section).or_insert(0) += 1);
        self.enter().await?;

        let (failure, session) =
            self.with_state(|s| (s.section_failures.get(&section).copied(), s.session.clone()));
        match failure {
            Some(Failure::Garbage) => return Ok(serde_json::json!({ "unexpected": true })),
            Some(f) => return Err(f.to_error()),
            None => {}
        }

        let session = session.ok_or_else(|| HydrateError::Auth("not signed in".into()))?;
        let events = self.events_of(session.user_id);
        derive_section(section, &events, request)
    }

    async fn health(&self) -> HydrateResult<()> {
        self.enter().await
    }
}
