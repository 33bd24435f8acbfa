use anyhow::{Context, Result};
use dialoguer::{Confirm, Select};
use hydrate_core::Hydrate;
use hydrate_core::identity::SignInOutcome;
use hydrate_core::linking::{LinkDecision, PendingLink};
use hydrate_core::remote::protocol::Credentials;
use owo_colors::OwoColorize;

use crate::utils::tui::create_spinner;

pub async fn guest(app: &Hydrate) -> Result<()> {
    if app.identity.state().is_authenticated() {
        anyhow::bail!("Already signed in. Run `hydrate logout` first to continue as a guest.");
    }
    let guest = app.identity.continue_as_guest().await?;
    println!("Using hydrate as a guest {}", guest.id.to_string().dimmed());
    println!("Your events stay on this device until you sign up.");
    Ok(())
}

pub async fn signup(app: &Hydrate, email: String) -> Result<()> {
    let password = prompt_password("Choose a password")?;
    let confirm = prompt_password("Repeat password")?;
    if password != confirm {
        anyhow::bail!("Passwords do not match");
    }

    let spinner = create_spinner("Creating account...");
    let outcome = app.identity.sign_up(&Credentials::Email { email, password }).await;
    spinner.finish_and_clear();

    finish_sign_in(app, outcome?).await
}

pub async fn login(app: &Hydrate, email: String) -> Result<()> {
    let password = prompt_password("Password")?;

    let spinner = create_spinner("Signing in...");
    let outcome = app.identity.sign_in(&Credentials::Email { email, password }).await;
    spinner.finish_and_clear();

    finish_sign_in(app, outcome?).await
}

pub async fn logout(app: &Hydrate) -> Result<()> {
    if app.identity.pending_link().is_some() {
        app.identity.sign_out().await?;
        println!("Cancelled the pending account link. Guest events were kept.");
        return Ok(());
    }

    let Some(user) = app.identity.current_user() else {
        println!("Not signed in.");
        return Ok(());
    };

    if user.is_guest() {
        let confirmed = Confirm::new()
            .with_prompt("Signing out a guest deletes its local events. Continue?")
            .default(false)
            .interact()?;
        if !confirmed {
            return Ok(());
        }
    }

    let spinner = create_spinner("Signing out...");
    let result = app.identity.sign_out().await;
    spinner.finish_and_clear();

    println!("Signed out of {}", user.green());
    if let Err(e) = result {
        println!(
            "   {}",
            format!("Some local data could not be removed: {e}").yellow()
        );
    }
    Ok(())
}

async fn finish_sign_in(app: &Hydrate, outcome: SignInOutcome) -> Result<()> {
    match outcome {
        SignInOutcome::Authenticated(user) => {
            println!("Signed in as {}", user.green());
            Ok(())
        }
        SignInOutcome::NeedsLink(link) => decide_link(app, &link).await,
    }
}

/// Ask what happens to the guest's events and run the decision. Also used at
/// start-up for a link left pending by an earlier run.
pub async fn decide_link(app: &Hydrate, link: &PendingLink) -> Result<()> {
    let count = link.guest_events;
    let plural = if count == 1 { "event" } else { "events" };
    println!("You have {count} guest {plural} on this device.");

    let choices = [
        "Merge them into the account".to_string(),
        format!("Use only the account's data (discard the {count} guest {plural})"),
        "Cancel (stay a guest)".to_string(),
    ];

    loop {
        let selection = Select::new()
            .with_prompt("What should happen to them?")
            .items(&choices)
            .default(0)
            .interact()?;

        let decision = match selection {
            0 => LinkDecision::Merge,
            1 => LinkDecision::Skip,
            _ => {
                app.identity.abandon_link(link).await?;
                println!("Still a guest. Nothing was uploaded.");
                return Ok(());
            }
        };

        let spinner = create_spinner(format!("Linking account ({decision})..."));
        let result = app.identity.resolve_link(link, decision).await;
        spinner.finish_and_clear();

        match result {
            Ok(user) => {
                println!("Signed in as {}", user.green());
                return Ok(());
            }
            Err(e) => {
                println!("{}", format!("Linking failed: {e}").red());
                let retry = Confirm::new()
                    .with_prompt("Try again?")
                    .default(true)
                    .interact()?;
                if !retry {
                    app.identity.abandon_link(link).await?;
                    println!("Still a guest. Local events were left untouched.");
                    return Ok(());
                }
            }
        }
    }
}

/// Prompt the user for password input (hidden).
fn prompt_password(label: &str) -> Result<String> {
    let prompt = format!("{}: ", label);
    rpassword::prompt_password(&prompt).context("Failed to read password")
}
