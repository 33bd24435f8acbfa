//! Cloud backend: auth service, per-user document store and aggregate queries.
//!
//! [`RemoteBackend`] is the transport seam. [`Remote`] wraps a backend and puts
//! a hard deadline on every call, so callers never wait on the network longer
//! than the configured request timeout.

pub mod http;
pub mod memory;
pub mod protocol;
pub mod session;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::{HydrateError, HydrateResult};
use crate::event::Event;
use crate::remote::protocol::{AggregateRequest, Credentials, RemoteSession};
use crate::section::Section;
use crate::user::User;

#[async_trait]
pub trait RemoteBackend: Send + Sync {
    /// The session the backend currently considers active, if any.
    async fn current_session(&self) -> HydrateResult<Option<RemoteSession>>;

    async fn sign_up(&self, credentials: &Credentials) -> HydrateResult<RemoteSession>;

    async fn sign_in(&self, credentials: &Credentials) -> HydrateResult<RemoteSession>;

    async fn sign_out(&self) -> HydrateResult<()>;

    async fn fetch_profile(&self, user_id: Uuid) -> HydrateResult<Option<User>>;

    async fn put_profile(&self, user: &User) -> HydrateResult<()>;

    async fn fetch_events(&self, user_id: Uuid) -> HydrateResult<Vec<Event>>;

    async fn upsert_event(&self, user_id: Uuid, event: &Event) -> HydrateResult<()>;

    async fn delete_event(&self, user_id: Uuid, event_id: Uuid) -> HydrateResult<()>;

    /// Upsert many events in one atomic batch, keyed by event id.
    async fn batch_upsert_events(&self, user_id: Uuid, events: &[Event]) -> HydrateResult<()>;

    /// Raw section JSON; decoding into a typed payload is the caller's job.
    async fn query_section(
        &self,
        section: Section,
        request: &AggregateRequest,
    ) -> HydrateResult<serde_json::Value>;

    async fn health(&self) -> HydrateResult<()>;
}

/// Race `operation` against a timer. Whichever finishes first wins and the
/// other is dropped.
pub async fn with_deadline<T>(
    limit: Duration,
    operation: impl Future<Output = HydrateResult<T>>,
) -> HydrateResult<T> {
    tokio::time::timeout(limit, operation)
        .await
        .map_err(|_| HydrateError::Timeout(limit.as_millis() as u64))?
}

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Deadline-bounded handle to the backend, shared by every component.
#[derive(Clone)]
pub struct Remote {
    backend: Arc<dyn RemoteBackend>,
    timeout: Duration,
}

impl Remote {
    pub fn new(backend: Arc<dyn RemoteBackend>) -> Self {
        Remote {
            backend,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn current_session(&self) -> HydrateResult<Option<RemoteSession>> {
        with_deadline(self.timeout, self.backend.current_session()).await
    }

    pub async fn sign_up(&self, credentials: &Credentials) -> HydrateResult<RemoteSession> {
        with_deadline(self.timeout, self.backend.sign_up(credentials)).await
    }

    pub async fn sign_in(&self, credentials: &Credentials) -> HydrateResult<RemoteSession> {
        with_deadline(self.timeout, self.backend.sign_in(credentials)).await
    }

    pub async fn sign_out(&self) -> HydrateResult<()> {
        with_deadline(self.timeout, self.backend.sign_out()).await
    }

    pub async fn fetch_profile(&self, user_id: Uuid) -> HydrateResult<Option<User>> {
        with_deadline(self.timeout, self.backend.fetch_profile(user_id)).await
    }

    pub async fn put_profile(&self, user: &User) -> HydrateResult<()> {
        with_deadline(self.timeout, self.backend.put_profile(user)).await
    }

    pub async fn fetch_events(&self, user_id: Uuid) -> HydrateResult<Vec<Event>> {
        with_deadline(self.timeout, self.backend.fetch_events(user_id)).await
    }

    pub async fn upsert_event(&self, user_id: Uuid, event: &Event) -> HydrateResult<()> {
        with_deadline(self.timeout, self.backend.upsert_event(user_id, event)).await
    }

    pub async fn delete_event(&self, user_id: Uuid, event_id: Uuid) -> HydrateResult<()> {
        with_deadline(self.timeout, self.backend.delete_event(user_id, event_id)).await
    }

    pub async fn batch_upsert_events(&self, user_id: Uuid, events: &[Event]) -> HydrateResult<()> {
        with_deadline(self.timeout, self.backend.batch_upsert_events(user_id, events)).await
    }

    pub async fn query_section(
        &self,
        section: Section,
        request: &AggregateRequest,
    ) -> HydrateResult<serde_json::Value> {
        with_deadline(self.timeout, self.backend.query_section(section, request)).await
    }

    pub async fn health(&self) -> HydrateResult<()> {
        with_deadline(self.timeout, self.backend.health()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_deadline_wins_over_slow_operation() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, HydrateError>(42)
        };
        let result = with_deadline(Duration::from_millis(500), slow).await;
        assert!(matches!(result, Err(HydrateError::Timeout(500))));
    }

    #[tokio::test]
    async fn test_operation_wins_over_deadline() {
        let fast = async { Ok::<_, HydrateError>(7) };
        assert_eq!(with_deadline(Duration::from_secs(1), fast).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_operation_error_passes_through() {
        let failing = async { Err::<(), _>(HydrateError::RateLimited) };
        let result = with_deadline(Duration::from_secs(1), failing).await;
        assert!(matches!(result, Err(HydrateError::RateLimited)));
    }
}
