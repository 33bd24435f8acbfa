//! End-to-end reconciliation scenarios.
//!
//! Every test wires a full `Hydrate` over a `FileStore` in a temp dir and an
//! in-memory backend with failure injection.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{Duration, Utc};
use hydrate_core::cache::{CacheNamespace, DiskCache};
use hydrate_core::config::HydrateConfig;
use hydrate_core::identity::{AuthState, SignInOutcome};
use hydrate_core::linking::LinkDecision;
use hydrate_core::remote::memory::{Failure, MemoryBackend};
use hydrate_core::remote::protocol::Credentials;
use hydrate_core::signal::Signal;
use hydrate_core::stats::{Insights, Overview, QualityTrend, SectionData};
use hydrate_core::{
    Event, Hydrate, HydrateError, Period, PeriodRange, Quality, Section, Source, User,
};
use tempfile::TempDir;
use tokio::sync::broadcast;
use uuid::Uuid;

struct World {
    _dir: TempDir,
    backend: Arc<MemoryBackend>,
    app: Hydrate,
}

fn world() -> World {
    let dir = TempDir::new().unwrap();
    let backend = Arc::new(MemoryBackend::new());
    let config = HydrateConfig {
        data_dir: dir.path().to_path_buf(),
        prewarm: false,
        ..HydrateConfig::default()
    };
    let app = Hydrate::with_backend(config, backend.clone()).unwrap();
    World {
        _dir: dir,
        backend,
        app,
    }
}

fn credentials() -> Credentials {
    Credentials::Email {
        email: "river@example.com".into(),
        password: "correct horse".into(),
    }
}

async fn sign_up(w: &World) -> User {
    match w.app.identity.sign_up(&credentials()).await.unwrap() {
        SignInOutcome::Authenticated(user) => user,
        SignInOutcome::NeedsLink(_) => panic!("unexpected link"),
    }
}

async fn log_guest_events(w: &World, count: usize) -> (User, BTreeSet<Uuid>) {
    let guest = w.app.identity.continue_as_guest().await.unwrap();
    let mut ids = BTreeSet::new();
    for i in 0..count {
        let event = Event::new(Utc::now() - Duration::hours(i as i64), Quality::Good)
            .with_note(format!("glass {i}"));
        ids.insert(event.id);
        w.app
            .sync
            .add_event(Some(&guest), event)
            .await
            .unwrap()
            .wait()
            .await;
    }
    (guest, ids)
}

fn drain(rx: &mut broadcast::Receiver<Signal>) -> Vec<Signal> {
    let mut seen = Vec::new();
    while let Ok(signal) = rx.try_recv() {
        seen.push(signal);
    }
    seen
}

// =============================================================================
// Fallback chain
// =============================================================================

#[tokio::test]
async fn test_provenance_follows_the_tier_that_answered() {
    let w = world();
    let user = sign_up(&w).await;
    let ns = CacheNamespace::User(user.id);
    let range = PeriodRange::preset(Period::Month, "UTC");

    let remote = w.app.fetcher.fetch::<QualityTrend>(&ns, &range).await.unwrap();
    assert_eq!(remote.source, Source::Remote);

    w.backend.fail_section(Section::QualityTrend, Some(Failure::Unauthorized));
    let cached = w.app.fetcher.fetch::<QualityTrend>(&ns, &range).await.unwrap();
    assert_eq!(cached.source, Source::Cache);
    assert_eq!(
        serde_json::to_vec(&cached.data).unwrap(),
        serde_json::to_vec(&remote.data).unwrap()
    );

    let other = PeriodRange::preset(Period::Week, "UTC");
    w.backend.fail_section(Section::QualityTrend, Some(Failure::Offline));
    assert!(w.app.fetcher.fetch::<QualityTrend>(&ns, &other).await.is_err());
    let derived = w
        .app
        .fetcher
        .fetch_or_derive::<QualityTrend>(&ns, &other)
        .await
        .unwrap();
    assert_eq!(derived.source, Source::LocalDerived);
}

#[tokio::test]
async fn test_cached_overview_survives_server_error() {
    let w = world();
    let user = sign_up(&w).await;
    let now = Utc::now();
    w.backend.seed_events(
        user.id,
        (0..6).map(|i| Event::new(now - Duration::hours(i * 20), Quality::Great).owned_by(user.id)),
    );
    let ns = w.app.namespace();
    let week = PeriodRange::from_args(Some("week"), None, None, "UTC").unwrap();

    let first = w.app.fetcher.fetch::<Overview>(&ns, &week).await.unwrap();
    assert_eq!(first.source, Source::Remote);
    assert_eq!(first.data.total_events, 6);

    w.backend.fail_section(Section::Overview, Some(Failure::ServerError));
    let second = w.app.fetcher.fetch::<Overview>(&ns, &week).await.unwrap();

    assert_eq!(second.source, Source::Cache);
    assert_eq!(second.data.total_events, first.data.total_events);
    assert_eq!(second.data.days_logged, first.data.days_logged);
    assert_eq!(second.data.daily_average, first.data.daily_average);
    assert_eq!(second.data.current_streak, first.data.current_streak);
    assert_eq!(second.data.longest_streak, first.data.longest_streak);
    assert_eq!(second.data.average_quality, first.data.average_quality);
}

#[tokio::test]
async fn test_unknown_period_alias_shares_default_bucket() {
    let w = world();
    let user = sign_up(&w).await;
    let ns = CacheNamespace::User(user.id);

    let default = PeriodRange::preset(Period::DEFAULT, "UTC");
    w.app.fetcher.fetch::<Insights>(&ns, &default).await.unwrap();

    w.backend.set_offline(true);
    let odd = PeriodRange::from_args(Some("fortnight-ish"), None, None, "UTC").unwrap();
    assert_eq!(odd.cache_key(), default.cache_key());
    let cached = w.app.fetcher.fetch::<Insights>(&ns, &odd).await.unwrap();
    assert_eq!(cached.source, Source::Cache);
}

#[test]
fn test_cache_round_trip_and_corrupt_entry() {
    let dir = TempDir::new().unwrap();
    let cache = DiskCache::new(dir.path());
    let ns = CacheNamespace::Guest(Uuid::new_v4());
    let range = PeriodRange::preset(Period::Week, "America/New_York");
    let value = Overview::derive(
        &[Event::new(Utc::now(), Quality::Fair)],
        &range,
        Utc::now(),
    );

    cache.save(&ns, Section::Overview, &range, &value).unwrap();
    assert_eq!(cache.load::<Overview>(&ns, Section::Overview, &range), Some(value));

    std::fs::write(cache.path_for(&ns, Section::Overview, &range), b"{\"saved_at\":").unwrap();
    assert_eq!(cache.load::<Overview>(&ns, Section::Overview, &range), None);
}

#[test]
fn test_guest_and_anonymous_buckets_never_merge() {
    let dir = TempDir::new().unwrap();
    let cache = DiskCache::new(dir.path());
    let range = PeriodRange::preset(Period::Week, "UTC");
    let guest = CacheNamespace::Guest(Uuid::new_v4());
    let value = Overview::derive(&[], &range, Utc::now());

    cache.save(&guest, Section::Overview, &range, &value).unwrap();
    let anonymous = cache.load::<Overview>(&CacheNamespace::Anonymous, Section::Overview, &range);
    assert!(anonymous.is_none());
}

// =============================================================================
// Identity
// =============================================================================

#[tokio::test]
async fn test_offline_session_check_keeps_user() {
    let w = world();
    let user = sign_up(&w).await;

    w.backend.fail_session_checks(Some(Failure::Offline));
    assert_eq!(w.app.identity.check_session().await, AuthState::Authenticated(user.clone()));
    assert_eq!(w.app.identity.state(), AuthState::Authenticated(user));
}

#[tokio::test]
async fn test_spurious_session_signal_after_sign_out() {
    let w = world();
    sign_up(&w).await;
    let still_signed_in = w.app.identity.observe_session().await.unwrap();
    assert!(still_signed_in.session.is_some());

    w.app.identity.sign_out().await.unwrap();

    assert!(!w.app.identity.deliver(still_signed_in).await);
    assert_eq!(w.app.identity.state(), AuthState::Unauthenticated);
    assert_eq!(w.app.identity.restore().await, AuthState::Unauthenticated);
}

#[tokio::test]
async fn test_sign_out_cleanup_failure_still_signs_out() {
    let w = world();
    let user = sign_up(&w).await;
    w.backend.set_offline(true);

    // Flush and remote sign-out fail; local cleanup still runs.
    w.app.identity.sign_out().await.unwrap();
    assert_eq!(w.app.identity.state(), AuthState::Unauthenticated);
    assert!(w.app.store.users().await.unwrap().iter().all(|u| u.id != user.id));
}

// =============================================================================
// Account linking
// =============================================================================

#[tokio::test]
async fn test_guest_merge_end_to_end() {
    let w = world();
    let (_guest, ids) = log_guest_events(&w, 5).await;
    assert!(w.backend.upserted_ids().is_empty());

    let outcome = w.app.identity.sign_up(&credentials()).await.unwrap();
    let SignInOutcome::NeedsLink(link) = outcome else {
        panic!("guest with events must link");
    };
    assert_eq!(link.guest_events, 5);

    let mut rx = w.app.signals.subscribe();
    let user = w
        .app
        .identity
        .resolve_link(&link, LinkDecision::Merge)
        .await
        .unwrap();

    let upserted = w.backend.upserted_ids();
    assert_eq!(upserted.len(), 5);
    assert_eq!(upserted.into_iter().collect::<BTreeSet<_>>(), ids);

    let local = w.app.store.events(|_| true).await.unwrap();
    assert_eq!(local.len(), 5);
    assert_eq!(local.iter().map(|e| e.id).collect::<BTreeSet<_>>(), ids);
    assert!(local.iter().all(|e| e.owner_id == Some(user.id)));

    assert_eq!(
        drain(&mut rx),
        vec![Signal::StoreWillReset, Signal::StoreDidReset, Signal::DataSynced]
    );
    assert_eq!(w.app.identity.state(), AuthState::Authenticated(user));
}

#[tokio::test]
async fn test_merge_twice_matches_merge_once() {
    let w = world();
    let (guest, _ids) = log_guest_events(&w, 3).await;
    let outcome = w.app.identity.sign_up(&credentials()).await.unwrap();
    let SignInOutcome::NeedsLink(link) = outcome else {
        panic!("guest with events must link");
    };

    w.app.identity.resolve_link(&link, LinkDecision::Merge).await.unwrap();
    let once = w.app.store.events(|_| true).await.unwrap();

    let session = w.backend.active_session().unwrap();
    let again = w.app.identity.linker().begin(guest, session).await.unwrap();
    w.app.identity.linker().resolve(&again, LinkDecision::Merge).await.unwrap();
    let twice = w.app.store.events(|_| true).await.unwrap();

    assert_eq!(once, twice);
    assert_eq!(w.backend.events_of(link.account_id()).len(), 3);
}

#[tokio::test]
async fn test_skip_adopts_cloud_only() {
    let w = world();
    let account = w.backend.register("river@example.com", "correct horse");
    let cloud = Event::new(Utc::now(), Quality::Great).owned_by(account);
    w.backend.seed_events(account, [cloud.clone()]);
    let (_guest, _ids) = log_guest_events(&w, 2).await;

    let outcome = w.app.identity.sign_in(&credentials()).await.unwrap();
    let SignInOutcome::NeedsLink(link) = outcome else {
        panic!("guest with events must link");
    };
    w.app.identity.resolve_link(&link, LinkDecision::Skip).await.unwrap();

    let local = w.app.store.events(|_| true).await.unwrap();
    assert_eq!(local, vec![cloud]);
    assert!(w.backend.upserted_ids().is_empty());
}

#[tokio::test]
async fn test_failed_link_stays_pending() {
    let w = world();
    log_guest_events(&w, 2).await;
    let outcome = w.app.identity.sign_up(&credentials()).await.unwrap();
    let SignInOutcome::NeedsLink(link) = outcome else {
        panic!("guest with events must link");
    };
    let before = w.app.store.events(|_| true).await.unwrap();

    w.backend.set_failure(Some(Failure::RateLimited));
    let result = w.app.identity.resolve_link(&link, LinkDecision::Merge).await;
    assert!(matches!(result, Err(HydrateError::RateLimited)));
    assert_eq!(w.app.identity.state(), AuthState::Authenticating);
    assert_eq!(w.app.store.events(|_| true).await.unwrap(), before);

    w.backend.set_failure(None);
    w.app.identity.resolve_link(&link, LinkDecision::Merge).await.unwrap();
    assert!(w.app.identity.state().is_authenticated());
}

// =============================================================================
// Event sync
// =============================================================================

#[tokio::test]
async fn test_offline_mutations_reconcile_on_resync() {
    let w = world();
    let user = sign_up(&w).await;
    w.backend.set_offline(true);

    let event = Event::new(Utc::now(), Quality::Poor);
    w.app
        .sync
        .add_event(Some(&user), event.clone())
        .await
        .unwrap()
        .wait()
        .await;
    assert!(w.app.store.event(event.id).await.unwrap().is_some());
    assert!(w.backend.events_of(user.id).is_empty());

    w.backend.set_offline(false);
    w.app.sync.full_resync(&user).await.unwrap();
    assert_eq!(w.backend.events_of(user.id).len(), 1);
}
