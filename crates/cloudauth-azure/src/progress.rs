//! Device code prompt and progress reporting
//!
//! The device code provider talks to the user only through [`ProgressSink`],
//! so the flow runs unchanged under tests with [`NoopProgress`].

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

use crate::types::is_ci;

/// What the user needs to complete a device code login
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevicePrompt {
    pub user_code: String,
    pub verification_uri: String,
    pub message: String,
}

impl DevicePrompt {
    /// Verification URL with the code pre-filled (`?otc=`)
    pub fn prefilled_url(&self) -> String {
        format!("{}?otc={}", self.verification_uri, self.user_code)
    }
}

/// Receiver of device code UI events
pub trait ProgressSink: Send + Sync {
    /// Show the user code and verification URL
    fn prompt(&self, prompt: &DevicePrompt);

    /// Begin waiting for the user
    fn start(&self, message: &str);

    /// Advance the wait indicator
    fn tick(&self);

    /// Stop the wait indicator
    fn finish(&self, success: bool);
}

/// Sink that discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn prompt(&self, prompt: &DevicePrompt) {
        debug!(
            "Device code prompt: code {} at {}",
            prompt.user_code, prompt.verification_uri
        );
    }

    fn start(&self, _message: &str) {}

    fn tick(&self) {}

    fn finish(&self, _success: bool) {}
}

/// Terminal sink: styled prompt on stderr, browser launch and a spinner
#[derive(Default)]
pub struct TerminalProgress {
    spinner: Mutex<Option<ProgressBar>>,
}

impl TerminalProgress {
    pub fn new() -> Self {
        Self::default()
    }

    fn spinner_style() -> ProgressStyle {
        ProgressStyle::default_spinner()
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"])
            .template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
    }
}

impl ProgressSink for TerminalProgress {
    fn prompt(&self, prompt: &DevicePrompt) {
        eprintln!();
        eprintln!("{}", style("Azure device code authentication").bold());
        eprintln!(
            "  Open {} and enter the code {}",
            style(&prompt.verification_uri).cyan().underlined(),
            style(&prompt.user_code).yellow().bold()
        );
        eprintln!();

        if is_ci() {
            return;
        }
        let url = prompt.prefilled_url();
        match webbrowser::open(&url) {
            Ok(()) => debug!("Opened browser at {}", url),
            Err(e) => debug!("Failed to open browser automatically: {}", e),
        }
    }

    fn start(&self, message: &str) {
        let pb = ProgressBar::new_spinner();
        pb.set_style(Self::spinner_style());
        pb.set_message(message.to_string());
        if let Ok(mut slot) = self.spinner.lock() {
            *slot = Some(pb);
        }
    }

    fn tick(&self) {
        if let Ok(slot) = self.spinner.lock() {
            if let Some(pb) = slot.as_ref() {
                pb.tick();
            }
        }
    }

    fn finish(&self, success: bool) {
        let Ok(mut slot) = self.spinner.lock() else {
            return;
        };
        if let Some(pb) = slot.take() {
            if success {
                pb.finish_with_message(format!("{} Authenticated", style("✓").green()));
            } else {
                pb.abandon_with_message(format!("{} Authentication failed", style("✗").red()));
            }
        }
    }
}

/// Interval at which the foreground task advances the spinner
pub const TICK_INTERVAL: Duration = Duration::from_millis(100);

/// Whether stderr is attached to a terminal
pub fn is_interactive() -> bool {
    console::Term::stderr().is_term()
}
