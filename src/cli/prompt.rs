//! Terminal prompts
//!
//! The VPN permission dialog is a y/N question on the terminal.

use colored::Colorize;
use outlinetv_core::{
    error::{AppError, PermissionError},
    permission::{PermissionPrompt, PermissionResponder},
};
use std::io::{self, IsTerminal, Write};
use tracing::debug;

/// Asks for VPN permission on stdin
pub struct TerminalPermissionPrompt;

impl PermissionPrompt for TerminalPermissionPrompt {
    fn launch(&self, responder: PermissionResponder) {
        if !io::stdin().is_terminal() {
            let error = PermissionError::LaunchFailed {
                reason: "stdin is not a terminal".to_string(),
            };
            responder.fail(error.to_string());
            return;
        }

        debug!(token = %responder.token(), "Asking for VPN permission on the terminal");
        tokio::task::spawn_blocking(move || {
            println!();
            println!("{}", "outlinetv wants to route your traffic through a VPN tunnel.".bold());
            match prompt_yes_no("Allow the VPN connection?", false) {
                Ok(granted) => responder.respond(granted),
                Err(e) => {
                    let error = PermissionError::LaunchFailed {
                        reason: e.to_string(),
                    };
                    responder.fail(error.to_string());
                }
            }
        });
    }
}

/// Prompt for yes/no with default
pub fn prompt_yes_no(prompt: &str, default_yes: bool) -> Result<bool, AppError> {
    let default_indicator = if default_yes { "[Y/n]" } else { "[y/N]" };
    let prompt_text = format!("{} {}: ", prompt, default_indicator);

    loop {
        let input = prompt_input(&prompt_text)?.to_lowercase();

        match input.as_str() {
            "y" | "yes" => return Ok(true),
            "n" | "no" => return Ok(false),
            "" => return Ok(default_yes),
            _ => {
                println!("Please enter 'y' for yes or 'n' for no.");
                continue;
            }
        }
    }
}

fn prompt_input(prompt: &str) -> Result<String, AppError> {
    print!("{}", prompt);
    io::stdout().flush()?;

    let mut input = String::new();
    if io::stdin().read_line(&mut input)? == 0 {
        return Err(AppError::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "stdin closed",
        )));
    }

    Ok(input.trim_end().to_string())
}
