use anyhow::Result;
use chrono::Utc;
use hydrate_core::config::HydrateConfig;
use hydrate_core::intake::{IntakeQueue, QuickAdd};
use hydrate_core::{Hydrate, Quality};
use owo_colors::OwoColorize;

/// Queue a quick add. Never touches the store, so it is safe to call while
/// another process holds it.
pub fn add(config: &HydrateConfig, quality: &str, note: Option<String>) -> Result<()> {
    let queue = IntakeQueue::new(config.intake_path());
    let mut item = QuickAdd::new(Utc::now(), Quality::from_name(quality));
    item.note = note;

    queue.enqueue(&item)?;
    println!("{} queued {}", "+".green(), item.quality);
    Ok(())
}

pub async fn drain(app: &Hydrate) -> Result<()> {
    // `start` already ingests once; anything queued since is picked up here.
    let user = app.identity.current_user();
    let count = app.sync.ingest_intake(&app.intake, user.as_ref()).await?;

    if count == 0 {
        println!("{}", "Nothing queued".dimmed());
    } else {
        println!("Ingested {} quick adds", count.green());
    }
    Ok(())
}
