//! Remote -> cache -> local fallback chain for aggregate sections.
//!
//! Every section runs its own chain. A failure in one never blocks or taints
//! another, and every result carries the tier that produced it.
//!
//! In-flight remote calls are tracked per cache namespace. Starting a fetch
//! for a key that already has one in flight cancels the older call, which then
//! degrades to the cache tier. Only the newest call for a key may write the
//! cache.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::cache::{CacheNamespace, DiskCache};
use crate::error::{HydrateError, HydrateResult};
use crate::period::PeriodRange;
use crate::remote::Remote;
use crate::remote::protocol::AggregateRequest;
use crate::section::Section;
use crate::sourced::Sourced;
use crate::stats::{
    HourlyHistogram, Insights, Overview, QualityDistribution, QualityTrend, SectionData,
    WeeklyRollup,
};
use crate::store::Store;

type FlightKey = (Section, String);

struct Flight {
    generation: u64,
    cancel: Arc<Notify>,
}

#[derive(Default)]
struct Flights {
    next_generation: u64,
    by_namespace: HashMap<CacheNamespace, HashMap<FlightKey, Flight>>,
}

/// Every section of the dashboard, each resolved independently.
pub struct Dashboard {
    pub overview: HydrateResult<Sourced<Overview>>,
    pub quality_trend: HydrateResult<Sourced<QualityTrend>>,
    pub hourly: HydrateResult<Sourced<HourlyHistogram>>,
    pub distribution: HydrateResult<Sourced<QualityDistribution>>,
    pub weekly: HydrateResult<Sourced<WeeklyRollup>>,
    pub insights: HydrateResult<Sourced<Insights>>,
}

#[derive(Clone)]
pub struct Fetcher {
    remote: Remote,
    cache: DiskCache,
    store: Store,
    flights: Arc<Mutex<Flights>>,
    prewarm: bool,
}

impl Fetcher {
    pub fn new(remote: Remote, cache: DiskCache, store: Store) -> Self {
        Fetcher {
            remote,
            cache,
            store,
            flights: Arc::new(Mutex::new(Flights::default())),
            prewarm: true,
        }
    }

    pub fn with_prewarm(mut self, enabled: bool) -> Self {
        self.prewarm = enabled;
        self
    }

    pub fn cache(&self) -> &DiskCache {
        &self.cache
    }

    fn with_flights<R>(&self, f: impl FnOnce(&mut Flights) -> R) -> R {
        let mut guard = match self.flights.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    /// Register a new flight for `key`, cancelling any older one.
    fn begin_flight(&self, ns: &CacheNamespace, key: FlightKey) -> (u64, Arc<Notify>) {
        self.with_flights(|flights| {
            flights.next_generation += 1;
            let generation = flights.next_generation;
            let cancel = Arc::new(Notify::new());

            let previous = flights.by_namespace.entry(ns.clone()).or_default().insert(
                key,
                Flight {
                    generation,
                    cancel: cancel.clone(),
                },
            );
            if let Some(previous) = previous {
                previous.cancel.notify_one();
            }
            (generation, cancel)
        })
    }

    /// Remove the flight if it is still the newest one for its key.
    /// Returns whether it was.
    fn end_flight(&self, ns: &CacheNamespace, key: &FlightKey, generation: u64) -> bool {
        self.with_flights(|flights| {
            let Some(keys) = flights.by_namespace.get_mut(ns) else {
                return false;
            };
            let current = keys.get(key).is_some_and(|f| f.generation == generation);
            if current {
                keys.remove(key);
                if keys.is_empty() {
                    flights.by_namespace.remove(ns);
                }
            }
            current
        })
    }

    /// Cancel every in-flight fetch of a namespace. Their results will not
    /// reach the cache.
    pub fn invalidate(&self, ns: &CacheNamespace) {
        let dropped = self.with_flights(|flights| flights.by_namespace.remove(ns));
        if let Some(keys) = dropped {
            debug!(namespace = ?ns, count = keys.len(), "invalidating in-flight fetches");
            for flight in keys.into_values() {
                flight.cancel.notify_one();
            }
        }
    }

    /// Remote, then cache. Errors only when both tiers fail, with the remote
    /// error.
    pub async fn fetch<T: SectionData>(
        &self,
        ns: &CacheNamespace,
        range: &PeriodRange,
    ) -> HydrateResult<Sourced<T>> {
        let range = range.normalized();
        let section = T::SECTION;
        let key = (section, range.cache_key());
        let request = AggregateRequest::from(&range);

        let (generation, cancel) = self.begin_flight(ns, key.clone());
        let outcome = tokio::select! {
            result = self.remote.query_section(section, &request) => result,
            _ = cancel.notified() => Err(HydrateError::Superseded),
        };
        let decoded = outcome.and_then(|value| {
            serde_json::from_value::<T>(value).map_err(|e| HydrateError::Decode(e.to_string()))
        });
        let current = self.end_flight(ns, &key, generation);

        match decoded {
            Ok(data) => {
                if current {
                    if let Err(e) = self.cache.save(ns, section, &range, &data) {
                        warn!(%section, error = %e, "failed to write cache entry");
                    }
                } else {
                    debug!(%section, "superseded result not cached");
                }
                Ok(Sourced::remote(data))
            }
            Err(e) => {
                debug!(%section, error = %e, "remote fetch failed, trying cache");
                match self.cache.load::<T>(ns, section, &range) {
                    Some(data) => Ok(Sourced::cache(data)),
                    None => Err(e),
                }
            }
        }
    }

    /// [`Fetcher::fetch`], falling back to deriving the section from the
    /// namespace owner's local events.
    pub async fn fetch_or_derive<T: SectionData>(
        &self,
        ns: &CacheNamespace,
        range: &PeriodRange,
    ) -> HydrateResult<Sourced<T>> {
        match self.fetch::<T>(ns, range).await {
            Ok(sourced) => Ok(sourced),
            Err(e) => {
                debug!(section = %T::SECTION, error = %e, "deriving section locally");
                let owner = ns.owner_id();
                let events = self
                    .store
                    .events(|event| owner.is_none_or(|id| event.is_visible_to(id)))
                    .await?;
                let range = range.normalized();
                Ok(Sourced::local(T::derive(&events, &range, Utc::now())))
            }
        }
    }

    /// All six sections concurrently. Prewarms the previous window afterwards
    /// when enabled.
    pub async fn fetch_dashboard(&self, ns: &CacheNamespace, range: &PeriodRange) -> Dashboard {
        let (overview, quality_trend, hourly, distribution, weekly, insights) = tokio::join!(
            self.fetch_or_derive::<Overview>(ns, range),
            self.fetch_or_derive::<QualityTrend>(ns, range),
            self.fetch_or_derive::<HourlyHistogram>(ns, range),
            self.fetch_or_derive::<QualityDistribution>(ns, range),
            self.fetch_or_derive::<WeeklyRollup>(ns, range),
            self.fetch_or_derive::<Insights>(ns, range),
        );

        if self.prewarm {
            self.prewarm(ns, range);
        }

        Dashboard {
            overview,
            quality_trend,
            hourly,
            distribution,
            weekly,
            insights,
        }
    }

    /// Fill the cache for the window before `range` in the background.
    /// Results and errors are discarded.
    pub fn prewarm(
        &self,
        ns: &CacheNamespace,
        range: &PeriodRange,
    ) -> Option<tokio::task::JoinHandle<()>> {
        let previous = range.previous(Utc::now())?;
        let this = self.clone();
        let ns = ns.clone();

        Some(tokio::spawn(async move {
            let (a, b, c, d, e, f) = tokio::join!(
                this.fetch::<Overview>(&ns, &previous),
                this.fetch::<QualityTrend>(&ns, &previous),
                this.fetch::<HourlyHistogram>(&ns, &previous),
                this.fetch::<QualityDistribution>(&ns, &previous),
                this.fetch::<WeeklyRollup>(&ns, &previous),
                this.fetch::<Insights>(&ns, &previous),
            );
            let failed = [a.is_err(), b.is_err(), c.is_err(), d.is_err(), e.is_err(), f.is_err()]
                .into_iter()
                .filter(|failed| *failed)
                .count();
            debug!(namespace = ?ns, failed, "prewarm finished");
        }))
    }
}
