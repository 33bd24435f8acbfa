use anyhow::Result;
use hydrate_core::Hydrate;
use owo_colors::OwoColorize;

use crate::render::Render;

pub async fn run(app: &Hydrate) -> Result<()> {
    let state = app.identity.state();
    println!("{}", state.render());

    let online = if app.reachability.is_online() {
        "online".green().to_string()
    } else {
        "offline".red().to_string()
    };
    println!("   backend {} ({})", app.config.backend_url.dimmed(), online);

    let events = match state.user() {
        Some(user) => {
            let id = user.id;
            app.store.events(move |e| e.is_visible_to(id)).await?
        }
        None => app.store.events(|_| true).await?,
    };
    let unowned = events.iter().filter(|e| e.owner_id.is_none()).count();
    println!("   {} events stored locally", events.len());
    if unowned > 0 && state.is_authenticated() {
        println!(
            "   {}",
            format!("{unowned} not yet synced, run `hydrate sync`").yellow()
        );
    }

    println!("   data in {}", app.config.data_path().display().dimmed());
    Ok(())
}
