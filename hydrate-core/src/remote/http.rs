//! HTTP client for the hydrate backend.

use std::sync::RwLock;

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;
use uuid::Uuid;

use crate::error::{HydrateError, HydrateResult};
use crate::event::Event;
use crate::remote::RemoteBackend;
use crate::remote::protocol::{
    AggregateRequest, BatchUpsert, Credentials, ErrorResponse, RemoteSession,
};
use crate::remote::session::SessionFile;
use crate::section::Section;
use crate::user::User;

/// REST client. The bearer session is kept in memory and mirrored to a
/// session file so it survives restarts.
pub struct HttpBackend {
    http: reqwest::Client,
    base_url: String,
    session_file: SessionFile,
    session: RwLock<Option<RemoteSession>>,
}

impl HttpBackend {
    pub fn new(base_url: &str, session_file: SessionFile) -> HydrateResult<Self> {
        let session = session_file.load().unwrap_or_else(|e| {
            debug!(error = %e, "discarding unreadable session file");
            None
        });

        let http = reqwest::Client::builder()
            .user_agent(concat!("hydrate/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| HydrateError::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(HttpBackend {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            session_file,
            session: RwLock::new(session),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn stored_session(&self) -> Option<RemoteSession> {
        self.session.read().ok().and_then(|s| s.clone())
    }

    fn store_session(&self, session: Option<&RemoteSession>) -> HydrateResult<()> {
        if let Ok(mut slot) = self.session.write() {
            *slot = session.cloned();
        }
        match session {
            Some(s) => self.session_file.save(s),
            None => self.session_file.clear(),
        }
    }

    fn authorized(&self, request: RequestBuilder) -> HydrateResult<RequestBuilder> {
        let session = self.stored_session().ok_or(HydrateError::NoSession)?;
        Ok(request.bearer_auth(session.access_token))
    }

    async fn send(&self, request: RequestBuilder) -> HydrateResult<Response> {
        let resp = request.send().await.map_err(transport_error)?;
        check_status(resp).await
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> HydrateResult<T> {
        let resp = self.send(request).await?;
        resp.json()
            .await
            .map_err(|e| HydrateError::Decode(e.to_string()))
    }

    async fn authenticate(
        &self,
        path: &str,
        credentials: &Credentials,
    ) -> HydrateResult<RemoteSession> {
        let request = self.http.post(self.url(path)).json(credentials);
        let session: RemoteSession = self.send_json(request).await?;
        self.store_session(Some(&session))?;
        Ok(session)
    }
}

fn transport_error(e: reqwest::Error) -> HydrateError {
    if e.is_decode() {
        HydrateError::Decode(e.to_string())
    } else {
        HydrateError::Connectivity(e.to_string())
    }
}

async fn check_status(resp: Response) -> HydrateResult<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let message = match resp.json::<ErrorResponse>().await {
        Ok(body) => body.error,
        Err(_) => status.to_string(),
    };

    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => HydrateError::Auth(message),
        StatusCode::NOT_FOUND => HydrateError::NotFound(message),
        StatusCode::TOO_MANY_REQUESTS => HydrateError::RateLimited,
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT => {
            HydrateError::Connectivity(message)
        }
        _ => HydrateError::Backend(message),
    })
}

#[async_trait]
impl RemoteBackend for HttpBackend {
    /// GET /auth/session
    async fn current_session(&self) -> HydrateResult<Option<RemoteSession>> {
        let Some(session) = self.stored_session() else {
            return Ok(None);
        };
        if session.is_expired() {
            self.store_session(None)?;
            return Ok(None);
        }

        let request = self
            .http
            .get(self.url("/auth/session"))
            .bearer_auth(&session.access_token);

        match self.send_json::<RemoteSession>(request).await {
            Ok(current) => Ok(Some(current)),
            Err(HydrateError::Auth(_)) => {
                self.store_session(None)?;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// POST /auth/signup
    async fn sign_up(&self, credentials: &Credentials) -> HydrateResult<RemoteSession> {
        self.authenticate("/auth/signup", credentials).await
    }

    /// POST /auth/signin
    async fn sign_in(&self, credentials: &Credentials) -> HydrateResult<RemoteSession> {
        self.authenticate("/auth/signin", credentials).await
    }

    /// POST /auth/signout
    async fn sign_out(&self) -> HydrateResult<()> {
        let result = match self.stored_session() {
            Some(session) => {
                let request = self
                    .http
                    .post(self.url("/auth/signout"))
                    .bearer_auth(&session.access_token);
                self.send(request).await.map(|_| ())
            }
            None => Ok(()),
        };
        // The local token is dropped even if the server could not be told.
        self.store_session(None)?;
        result
    }

    /// GET /users/:id/profile
    async fn fetch_profile(&self, user_id: Uuid) -> HydrateResult<Option<User>> {
        let url = self.url(&format!("/users/{user_id}/profile"));
        let request = self.authorized(self.http.get(url))?;
        match self.send_json(request).await {
            Ok(user) => Ok(Some(user)),
            Err(HydrateError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// PUT /users/:id/profile
    async fn put_profile(&self, user: &User) -> HydrateResult<()> {
        let request = self
            .authorized(self.http.put(self.url(&format!("/users/{}/profile", user.id))))?
            .json(user);
        self.send(request).await.map(|_| ())
    }

    /// GET /users/:id/events
    async fn fetch_events(&self, user_id: Uuid) -> HydrateResult<Vec<Event>> {
        let url = self.url(&format!("/users/{user_id}/events"));
        let request = self.authorized(self.http.get(url))?;
        self.send_json(request).await
    }

    /// PUT /users/:id/events/:event_id
    async fn upsert_event(&self, user_id: Uuid, event: &Event) -> HydrateResult<()> {
        let path = format!("/users/{user_id}/events/{}", event.id);
        let request = self.authorized(self.http.put(self.url(&path)))?.json(event);
        self.send(request).await.map(|_| ())
    }

    /// DELETE /users/:id/events/:event_id
    async fn delete_event(&self, user_id: Uuid, event_id: Uuid) -> HydrateResult<()> {
        let path = format!("/users/{user_id}/events/{event_id}");
        let request = self.authorized(self.http.delete(self.url(&path)))?;
        match self.send(request).await {
            Ok(_) | Err(HydrateError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// POST /users/:id/events/batch
    async fn batch_upsert_events(&self, user_id: Uuid, events: &[Event]) -> HydrateResult<()> {
        if events.is_empty() {
            return Ok(());
        }
        let body = BatchUpsert {
            events: events.to_vec(),
        };
        let path = format!("/users/{user_id}/events/batch");
        let request = self.authorized(self.http.post(self.url(&path)))?.json(&body);
        self.send(request).await.map(|_| ())
    }

    /// POST /stats/:section
    async fn query_section(
        &self,
        section: Section,
        request: &AggregateRequest,
    ) -> HydrateResult<serde_json::Value> {
        let builder = self
            .authorized(self.http.post(self.url(&section.endpoint())))?
            .json(request);
        self.send_json(builder).await
    }

    /// GET /health
    async fn health(&self) -> HydrateResult<()> {
        self.send(self.http.get(self.url("/health"))).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_base_url_is_trimmed() {
        let dir = TempDir::new().unwrap();
        let backend =
            HttpBackend::new("http://localhost:8787/", SessionFile::new(dir.path().join("s.toml")))
                .unwrap();
        assert_eq!(backend.url("/health"), "http://localhost:8787/health");
    }

    #[tokio::test]
    async fn test_no_session_without_stored_token() {
        let dir = TempDir::new().unwrap();
        let backend =
            HttpBackend::new("http://localhost:1", SessionFile::new(dir.path().join("s.toml")))
                .unwrap();

        assert_eq!(backend.current_session().await.unwrap(), None);
        assert!(matches!(
            backend.fetch_events(Uuid::new_v4()).await,
            Err(HydrateError::NoSession)
        ));
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_connectivity_error() {
        let dir = TempDir::new().unwrap();
        let backend =
            HttpBackend::new("http://127.0.0.1:1", SessionFile::new(dir.path().join("s.toml")))
                .unwrap();

        let err = backend.health().await.unwrap_err();
        assert!(err.is_connectivity());
    }
}
