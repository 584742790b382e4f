//! Core library for the outlinetv VPN client
//!
//! This crate provides the VPN session coordinator, the permission gate and
//! broadcast bridge it depends on, persisted preferences and the self-update
//! pipeline.

pub mod error;
pub mod types;

pub mod config;
pub mod permission;
pub mod prefs;
pub mod screen;
pub mod session;
pub mod update;
pub mod vpn;

/// Initialize logging infrastructure
///
/// Sets up tracing with systemd journal logging when running under systemd.
/// Otherwise logs to stderr with pretty formatting. `RUST_LOG` overrides the
/// default `info` level.
pub fn init_logging() -> Result<(), Box<dyn std::error::Error>> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    #[cfg(target_os = "linux")]
    {
        if std::env::var("JOURNAL_STREAM").is_ok() {
            let journal_layer = tracing_journald::layer()?;
            tracing_subscriber::registry()
                .with(journal_layer)
                .with(filter)
                .try_init()?;
            return Ok(());
        }
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().pretty().with_writer(std::io::stderr))
        .with(filter)
        .try_init()?;

    Ok(())
}
