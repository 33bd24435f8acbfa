pub mod auth;
pub mod events;
pub mod intake;
pub mod stats;
pub mod status;
pub mod sync;
