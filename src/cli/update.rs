//! Self-update command

use colored::Colorize;
use outlinetv_core::{
    config::toml_config,
    error::{AppError, UpdateError},
    update::{UpdatePipeline, UpdateStage},
};
use std::io::{self, Write};
use tokio_util::sync::CancellationToken;

const CURRENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Run the update command
pub async fn run_update(check_only: bool) -> Result<(), AppError> {
    let config = toml_config::load_config()?;
    let pipeline = UpdatePipeline::from_config(CURRENT_VERSION, &config.update)?;

    println!("Checking for updates (current version {})...", CURRENT_VERSION);
    if !pipeline.check_for_update(CURRENT_VERSION).await {
        let state = pipeline.state();
        if state.stage == UpdateStage::Failed {
            let reason = state
                .last_error
                .unwrap_or_else(|| UpdateError::CheckFailed("unknown error".to_string()));
            return Err(reason.into());
        }
        println!("✅ outlinetv is up to date");
        return Ok(());
    }

    let latest = pipeline.state().latest_version.unwrap_or_default();
    println!("{} Version {} is available", "⬆".green(), latest.bold());
    if check_only {
        return Ok(());
    }

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let result = pipeline
        .download_and_install(
            |percent| {
                print!("\r  Downloading... {:>3}%", percent);
                let _ = io::stdout().flush();
            },
            cancel,
        )
        .await;
    interrupt.abort();
    println!();

    let artifact = result?;
    println!("✅ Installer started for {}", artifact.display());
    Ok(())
}
