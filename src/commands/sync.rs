use anyhow::Result;
use hydrate_core::Hydrate;
use owo_colors::OwoColorize;

use crate::utils::tui::create_spinner;

pub async fn run(app: &Hydrate) -> Result<()> {
    let state = app.identity.state();
    let Some(user) = state.user().filter(|_| state.is_authenticated()) else {
        anyhow::bail!("Sync needs an account. Run `hydrate signup` or `hydrate login` first.");
    };

    let spinner = create_spinner(format!("Syncing {}...", user));
    let result = app.sync.full_resync(user).await;
    spinner.finish_and_clear();

    let report = result?;
    println!("{}", "Synced".green());
    if report.adopted > 0 {
        println!("   {} local events assigned to {}", report.adopted, user);
    }
    println!("   {} pushed, {} pulled", report.pushed, report.pulled);
    Ok(())
}
