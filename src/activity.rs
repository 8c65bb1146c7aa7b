//! Activity log and alerts
//!
//! A bounded, timestamped activity log plus short-lived notifications for the
//! operator.

use std::collections::VecDeque;

use chrono::{DateTime, Local};
use serde::Serialize;
use uuid::Uuid;

use crate::types::model::Artifact;

/// Alerts disappear on their own after this many seconds.
pub const ALERT_TTL_SECS: i64 = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Local>,
    pub message: String,
}

impl LogEntry {
    /// `HH:MM:SS message`
    pub fn line(&self) -> String {
        format!("{} {}", self.timestamp.format("%H:%M:%S"), self.message)
    }
}

/// Ring buffer of activity entries, oldest first
#[derive(Debug, Clone)]
pub struct ActivityLog {
    entries: VecDeque<LogEntry>,
    capacity: usize,
}

impl ActivityLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn push(&mut self, message: impl Into<String>) {
        self.push_at(Local::now(), message);
    }

    pub fn push_at(&mut self, timestamp: DateTime<Local>, message: impl Into<String>) {
        let message = message.into();
        tracing::info!("{}", message);
        self.entries.push_back(LogEntry { timestamp, message });
        self.truncate();
    }

    /// Change the bound, dropping the oldest entries if it shrank.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        self.truncate();
    }

    fn truncate(&mut self) {
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn lines(&self) -> Vec<String> {
        self.entries.iter().map(LogEntry::line).collect()
    }

    /// Drop everything and record that it happened.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.push("Logs cleared by user");
    }

    /// Plain-text export named `llama-swap-logs-YYYYmmdd-HHMMSS.txt`
    pub fn export(&self) -> Artifact {
        self.export_at(Local::now())
    }

    pub fn export_at(&self, now: DateTime<Local>) -> Artifact {
        Artifact::text(
            format!("llama-swap-logs-{}.txt", now.format("%Y%m%d-%H%M%S")),
            self.lines().join("\n"),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Success,
    Warning,
    Danger,
    Info,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Alert {
    pub id: Uuid,
    pub level: AlertLevel,
    pub message: String,
    pub created_at: DateTime<Local>,
}

impl Alert {
    pub fn is_expired(&self, now: DateTime<Local>) -> bool {
        now - self.created_at >= chrono::Duration::seconds(ALERT_TTL_SECS)
    }
}

/// Transient notifications. Never persisted.
#[derive(Debug, Clone, Default)]
pub struct AlertCenter {
    alerts: Vec<Alert>,
}

impl AlertCenter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify(&mut self, level: AlertLevel, message: impl Into<String>) -> Uuid {
        self.notify_at(Local::now(), level, message)
    }

    pub fn notify_at(&mut self, now: DateTime<Local>, level: AlertLevel, message: impl Into<String>) -> Uuid {
        let alert = Alert {
            id: Uuid::new_v4(),
            level,
            message: message.into(),
            created_at: now,
        };
        let id = alert.id;
        self.alerts.push(alert);
        id
    }

    pub fn dismiss(&mut self, id: Uuid) -> bool {
        let before = self.alerts.len();
        self.alerts.retain(|alert| alert.id != id);
        self.alerts.len() != before
    }

    /// Alerts still on screen at `now`; expired ones are discarded.
    pub fn active(&mut self, now: DateTime<Local>) -> Vec<Alert> {
        self.alerts.retain(|alert| !alert.is_expired(now));
        self.alerts.clone()
    }
}
