//! Terminal interaction for sync runs.
//!
//! - [`InteractivePrompt`]: hidden password input via dialoguer, used by the
//!   resolver for hosts without a configured password
//! - [`format_report`]: colored per-location summary printed after a run
//!
//! The prompt blocks until the user answers; there is no timeout.

use std::io::IsTerminal;

use colored::Colorize;
use dialoguer::{Password, theme::ColorfulTheme};

use super::resolve::{CredentialError, CredentialProvider, CredentialRequest};
use super::sync::{LocationReport, SyncReport, TransferOutcome};

// =============================================================================
// Password Prompt
// =============================================================================

/// Asks for missing passwords on the terminal.
pub struct InteractivePrompt {
    theme: ColorfulTheme,
}

impl InteractivePrompt {
    pub fn new() -> Self {
        Self {
            theme: ColorfulTheme::default(),
        }
    }

    fn prompt_text(request: &CredentialRequest<'_>) -> String {
        format!(
            "Enter your password for {}@{} ({})",
            request.username, request.location, request.host_name
        )
    }
}

impl Default for InteractivePrompt {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialProvider for InteractivePrompt {
    fn password(&mut self, request: &CredentialRequest<'_>) -> Result<String, CredentialError> {
        if !std::io::stdin().is_terminal() {
            return Err(CredentialError::Io(
                "stdin is not a terminal; set the password in the config file".into(),
            ));
        }

        tracing::debug!(host = request.host_name, "prompting for password");
        Password::with_theme(&self.theme)
            .with_prompt(Self::prompt_text(request))
            .interact()
            .map_err(prompt_error)
    }
}

/// Ctrl-C while the terminal is in raw mode surfaces as `Interrupted`.
fn prompt_error(err: dialoguer::Error) -> CredentialError {
    let dialoguer::Error::IO(e) = err;
    if e.kind() == std::io::ErrorKind::Interrupted {
        CredentialError::Cancelled
    } else {
        CredentialError::Io(e.to_string())
    }
}

// =============================================================================
// Summary
// =============================================================================

fn format_location(report: &LocationReport) -> String {
    let status = match &report.outcome {
        TransferOutcome::Fetched { files, bytes } => {
            format!("{} {} files, {} bytes", "✓".green(), files, bytes)
        }
        TransferOutcome::Skipped => format!("{} skipped", "-".dimmed()),
        TransferOutcome::Failed { error } => format!("{} {}", "✗".red(), error.red()),
    };
    format!(
        "  {} [{}] {} ({} ms)",
        report.location.bold(),
        report.strategy.to_string().cyan(),
        status,
        report.duration_ms
    )
}

/// Render a human-readable summary of a sync run.
pub fn format_report(report: &SyncReport) -> String {
    let mut lines = Vec::with_capacity(report.locations.len() + 2);

    let header = if report.decision.should_refresh {
        format!("Refreshed data ({})", report.decision.reason)
    } else {
        format!("Using local data files ({})", report.decision.reason)
    };
    lines.push(header.bold().underline().to_string());

    for location in &report.locations {
        lines.push(format_location(location));
    }

    match report.record_written {
        Some(epoch) => lines.push(format!("  last update recorded at {epoch}").dimmed().to_string()),
        None => lines.push("  last update record unchanged".dimmed().to_string()),
    }

    lines.join("\n")
}

// =============================================================================
// Tests
// =============================================================================
