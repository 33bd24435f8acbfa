//! Offline-first reconciliation core for hydrate.
//!
//! - `fetcher` resolves aggregate sections through remote, cache and local tiers
//! - `identity` owns the current-user state machine
//! - `linking` runs the one-time guest to account merge/skip
//! - `sync` pushes local event mutations to the backend
//!
//! `app::Hydrate` wires them together over one local store and one backend.

pub mod app;
pub mod cache;
pub mod config;
pub mod error;
pub mod event;
pub mod fetcher;
pub mod identity;
pub mod intake;
pub mod linking;
pub mod period;
pub mod reachability;
pub mod remote;
pub mod section;
pub mod signal;
pub mod sourced;
pub mod stats;
pub mod store;
pub mod sync;
pub mod user;

pub use app::Hydrate;
pub use error::{HydrateError, HydrateResult};
pub use event::{Event, GeoPoint, Quality};
pub use period::{Period, PeriodRange};
pub use section::Section;
pub use sourced::{Source, Sourced};
pub use user::{IdentityKind, User};
