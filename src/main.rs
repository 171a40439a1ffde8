use anyhow::{Context, bail};
use sl_auth::{AuthEvent, AuthOrchestrator, AuthSettings, SessionStore};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,hyper=warn,reqwest=warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    let settings = AuthSettings::load().context("Failed to load authorization settings")?;
    let store = SessionStore::new();
    let orchestrator = AuthOrchestrator::new(settings, store.clone());

    let (tx, mut rx) = mpsc::unbounded_channel();
    let subscription = orchestrator.subscribe(move |event| {
        let outcome = match event {
            AuthEvent::Authenticated => Ok(()),
            AuthEvent::Failed(e) => Err(format!("{} ({})", e, e.kind())),
        };
        let _ = tx.send(outcome);
    });

    let accepted = orchestrator.start_authorization().await?;
    info!("Waiting for the browser sign-in to complete");
    println!("If no browser opened, visit:\n  {}", accepted.authorization_url);

    let outcome = tokio::select! {
        outcome = rx.recv() => outcome,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, abandoning sign-in");
            orchestrator.cancel().await;
            None
        }
    };
    subscription.unsubscribe();

    match outcome {
        Some(Ok(())) => {
            let expires_at = store.tokens().and_then(|tokens| tokens.expires_at());
            info!(?expires_at, "Signed in");
            Ok(())
        }
        Some(Err(reason)) => bail!("Sign-in failed: {reason}"),
        None => bail!("Sign-in did not complete"),
    }
}
