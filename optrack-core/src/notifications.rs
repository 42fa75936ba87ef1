//! Notification gate
//!
//! Decides whether a tracker mutation should surface as a user-facing
//! notification (desktop popup and/or sound). The gate is configuration
//! only: it never looks at the tracker, and progress throttling works from
//! the timestamp the caller last notified at.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Phase of an operation a notification would describe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationEvent {
    Start,
    Progress,
    Complete,
    Error,
}

impl NotificationEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationEvent::Start => "start",
            NotificationEvent::Progress => "progress",
            NotificationEvent::Complete => "complete",
            NotificationEvent::Error => "error",
        }
    }
}

impl std::fmt::Display for NotificationEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// `[notifications]` config section
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct NotificationConfig {
    /// Master switch
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub on_start: bool,
    #[serde(default)]
    pub on_progress: bool,
    #[serde(default = "default_true")]
    pub on_complete: bool,
    #[serde(default = "default_true")]
    pub on_error: bool,
    /// Play a sound
    #[serde(default)]
    pub sound: bool,
    /// Show a desktop notification
    #[serde(default = "default_true")]
    pub desktop: bool,
    /// Minimum seconds between two progress notifications
    #[serde(default = "default_progress_interval")]
    pub progress_interval: u64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            on_start: true,
            on_progress: false,
            on_complete: true,
            on_error: true,
            sound: false,
            desktop: true,
            progress_interval: default_progress_interval(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_progress_interval() -> u64 {
    10
}

/// Partial change to a [`NotificationConfig`]; `None` keeps the current value
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct NotificationConfigUpdate {
    pub enabled: Option<bool>,
    pub on_start: Option<bool>,
    pub on_progress: Option<bool>,
    pub on_complete: Option<bool>,
    pub on_error: Option<bool>,
    pub sound: Option<bool>,
    pub desktop: Option<bool>,
    pub progress_interval: Option<u64>,
}

/// How a notification should be delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub sound: bool,
    pub desktop: bool,
}

/// Reads [`NotificationConfig`] to decide which mutations notify the user
#[derive(Debug, Clone, Default)]
pub struct NotificationGate {
    config: NotificationConfig,
}

impl NotificationGate {
    pub fn new(config: NotificationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &NotificationConfig {
        &self.config
    }

    /// Merge `update` into the current configuration
    pub fn update_config(&mut self, update: NotificationConfigUpdate) {
        let c = &mut self.config;
        if let Some(v) = update.enabled {
            c.enabled = v;
        }
        if let Some(v) = update.on_start {
            c.on_start = v;
        }
        if let Some(v) = update.on_progress {
            c.on_progress = v;
        }
        if let Some(v) = update.on_complete {
            c.on_complete = v;
        }
        if let Some(v) = update.on_error {
            c.on_error = v;
        }
        if let Some(v) = update.sound {
            c.sound = v;
        }
        if let Some(v) = update.desktop {
            c.desktop = v;
        }
        if let Some(v) = update.progress_interval {
            c.progress_interval = v;
        }
        tracing::debug!(config = ?self.config, "Notification config updated");
    }

    /// Whether `event` is switched on, ignoring throttling
    pub fn allows(&self, event: NotificationEvent) -> bool {
        let c = &self.config;
        c.enabled
            && match event {
                NotificationEvent::Start => c.on_start,
                NotificationEvent::Progress => c.on_progress,
                NotificationEvent::Complete => c.on_complete,
                NotificationEvent::Error => c.on_error,
            }
    }

    /// Whether `event` should notify now.
    ///
    /// Progress events are additionally throttled: at least
    /// `progress_interval` seconds must separate `now` from
    /// `last_progress_at`, the caller's previous progress notification for
    /// the same operation.
    pub fn should_notify(
        &self,
        event: NotificationEvent,
        last_progress_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> bool {
        if !self.allows(event) {
            return false;
        }
        if event != NotificationEvent::Progress {
            return true;
        }
        match last_progress_at {
            None => true,
            Some(last) => {
                let interval = i64::try_from(self.config.progress_interval).unwrap_or(i64::MAX);
                (now - last).num_seconds() >= interval
            }
        }
    }

    /// Delivery channels for an allowed event, or `None` when no channel is on
    pub fn delivery(&self) -> Option<Delivery> {
        let delivery = Delivery {
            sound: self.config.sound,
            desktop: self.config.desktop,
        };
        (delivery.sound || delivery.desktop).then_some(delivery)
    }
}
