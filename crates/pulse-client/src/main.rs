//! # pulse-client
//!
//! Pulse inbox sync client binary — wires together all crates and runs the
//! realtime loop until interrupted.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::{info, warn};

use pulse_core::IdentityContext;
use pulse_realtime::{
    AudioAlert, ConnectionSupervisor, Credentials, DispatcherConfig, EventDispatcher, HttpApi,
    LoggingSessionGate, NullPlayback, SupervisorConfig, WsTransport,
};
use pulse_realtime::api::ConversationsApi;
use pulse_settings::{PulseSettings, apply_env_overrides, load_settings_from_path, settings_path};
use pulse_store::{
    ConnectionConfig, ConversationProjection, IdentityStore, LedgerConfig, NotificationLedger,
};

/// Pulse inbox sync client.
#[derive(Parser, Debug)]
#[command(name = "pulse", about = "Pulse inbox sync client")]
struct Cli {
    /// Session token (falls back to PULSE_TOKEN).
    #[arg(long)]
    token: Option<String>,

    /// Business identifier (falls back to PULSE_BUSINESS_ID).
    #[arg(long)]
    business_id: Option<String>,

    /// User key for the identity partition.
    #[arg(long, default_value = "default")]
    user_id: String,

    /// Path to the `SQLite` database (overrides settings).
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Path to the settings file (defaults to `~/.pulse/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Disable the audio alert for this run.
    #[arg(long)]
    muted: bool,
}

fn resolve(flag: Option<String>, env_key: &str) -> Option<String> {
    flag.or_else(|| std::env::var(env_key).ok()).filter(|v| !v.is_empty())
}

fn ensure_parent_dir(path: &std::path::Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    Ok(())
}

/// Default database location (`~/.pulse/<db file>`).
fn default_db_path(settings: &PulseSettings) -> PathBuf {
    let configured = PathBuf::from(&settings.store.db_path);
    if configured.is_absolute() {
        return configured;
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".pulse").join(configured)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    // Load settings early (needed for log level before logging init).
    let path = args.config.clone().unwrap_or_else(settings_path);
    let mut settings = load_settings_from_path(&path).unwrap_or_default();
    apply_env_overrides(&mut settings);
    let _ = pulse_settings::init_settings(settings.clone());
    pulse_core::logging::init_subscriber(settings.effective_log_level());

    let Some(token) = resolve(args.token.clone(), "PULSE_TOKEN") else {
        bail!("no session token: pass --token or set PULSE_TOKEN");
    };
    let Some(business_id) = resolve(args.business_id.clone(), "PULSE_BUSINESS_ID") else {
        bail!("no business id: pass --business-id or set PULSE_BUSINESS_ID");
    };

    // Identity-scoped persistence.
    let db_path = args.db_path.clone().unwrap_or_else(|| default_db_path(&settings));
    ensure_parent_dir(&db_path)?;
    let store = Arc::new(
        IdentityStore::open_file(
            &db_path.to_string_lossy(),
            &ConnectionConfig {
                pool_size: settings.store.pool_size,
                ..ConnectionConfig::default()
            },
        )
        .context("Failed to open database")?,
    );
    if args.muted {
        store.set_sound_enabled(false);
    }

    let identity = IdentityContext {
        user_key: args.user_id.clone(),
        business_key: business_id.clone(),
    };
    info!(%identity, db = %db_path.display(), "starting pulse client");

    let projection = Arc::new(ConversationProjection::new(Arc::clone(&store), identity.clone()));
    let ledger = Arc::new(NotificationLedger::new(
        Arc::clone(&store),
        identity,
        LedgerConfig {
            cap: settings.notifications.ledger_cap,
            dedup_window_ms: settings.notifications.dedup_window_ms,
        },
    ));

    let api = Arc::new(
        HttpApi::new(&settings.api.base_url, &token, settings.api.request_timeout_ms)
            .context("Failed to build API client")?,
    );

    // Seed the projection; the restored snapshot stands if the fetch fails.
    match api.fetch_conversations(&business_id).await {
        Ok(conversations) => {
            info!(count = conversations.len(), "seeded conversation list");
            projection.seed(conversations);
        }
        Err(e) => warn!(error = %e, "conversation seed failed, using restored snapshot"),
    }

    let alert = AudioAlert::new(
        Arc::clone(&store),
        &settings.notifications.sound_url,
        Arc::new(NullPlayback),
    );
    let dispatcher = Arc::new(EventDispatcher::new(
        Arc::clone(&projection),
        Arc::clone(&ledger),
        Arc::clone(&api) as _,
        Arc::new(alert),
        DispatcherConfig {
            refetch_debounce_ms: settings.realtime.refetch_debounce_ms,
        },
    ));

    let supervisor = ConnectionSupervisor::new(
        Arc::new(WsTransport),
        dispatcher,
        Arc::new(LoggingSessionGate),
        SupervisorConfig {
            ws_url: settings.realtime.ws_url.clone(),
            connect_timeout_ms: settings.realtime.connect_timeout_ms,
            base_delay_ms: settings.realtime.base_delay_ms,
            max_delay_ms: settings.realtime.max_delay_ms,
            max_attempts: settings.realtime.max_attempts,
        },
    );

    let mut status_rx = supervisor.subscribe();
    let status_task = tokio::spawn(async move {
        while status_rx.changed().await.is_ok() {
            let status = *status_rx.borrow();
            info!(?status, "connection status");
        }
    });

    supervisor.connect(Credentials { token, business_id });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    info!("Shutting down...");
    supervisor.teardown();
    ledger.flush();
    status_task.abort();

    info!("Shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_defaults() {
        let cli = Cli::parse_from(["pulse"]);
        assert_eq!(cli.user_id, "default");
        assert!(cli.token.is_none());
        assert!(cli.db_path.is_none());
        assert!(!cli.muted);
    }

    #[test]
    fn cli_accepts_overrides() {
        let cli = Cli::parse_from([
            "pulse",
            "--token",
            "tok",
            "--business-id",
            "biz",
            "--db-path",
            "/tmp/pulse.db",
            "--muted",
        ]);
        assert_eq!(cli.token.as_deref(), Some("tok"));
        assert_eq!(cli.business_id.as_deref(), Some("biz"));
        assert_eq!(cli.db_path, Some(PathBuf::from("/tmp/pulse.db")));
        assert!(cli.muted);
    }

    #[test]
    fn resolve_prefers_the_flag() {
        assert_eq!(
            resolve(Some("flag".to_string()), "PULSE_TEST_UNSET"),
            Some("flag".to_string())
        );
        assert_eq!(resolve(Some(String::new()), "PULSE_TEST_UNSET"), None);
        assert_eq!(resolve(None, "PULSE_TEST_UNSET"), None);
    }

    #[test]
    fn relative_db_path_lands_under_home() {
        let settings = PulseSettings::default();
        let path = default_db_path(&settings);
        assert!(path.to_string_lossy().contains(".pulse"));
    }
}
