//! Container maintenance hints
//!
//! Shell snippets for operating the `llama-swap` container. They are shown to
//! the operator, never executed here.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub const CONTAINER_NAME: &str = "llama-swap";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaintenanceKind {
    Logs,
    Restart,
    Cache,
}

impl MaintenanceKind {
    pub const ALL: [MaintenanceKind; 3] = [MaintenanceKind::Logs, MaintenanceKind::Restart, MaintenanceKind::Cache];

    pub fn as_str(&self) -> &'static str {
        match self {
            MaintenanceKind::Logs => "logs",
            MaintenanceKind::Restart => "restart",
            MaintenanceKind::Cache => "cache",
        }
    }
}

impl fmt::Display for MaintenanceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MaintenanceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "logs" => Ok(MaintenanceKind::Logs),
            "restart" => Ok(MaintenanceKind::Restart),
            "cache" => Ok(MaintenanceKind::Cache),
            other => Err(format!("Unknown command type: {}", other)),
        }
    }
}

const LOGS: &[&str] = &[
    "# Follow container logs:",
    "docker logs llama-swap -f",
    "",
    "# Last 100 lines:",
    "docker logs llama-swap --tail 100",
    "",
    "# Save logs to a file:",
    "docker logs llama-swap > llama-swap-logs.txt",
];

const RESTART: &[&str] = &[
    "# Restart the container:",
    "docker restart llama-swap",
    "",
    "# With docker-compose:",
    "docker-compose restart llama-swap",
    "",
    "# Full stop/start:",
    "docker stop llama-swap && docker start llama-swap",
];

const CACHE: &[&str] = &[
    "# Prune the Docker system cache:",
    "docker system prune -f",
    "",
    "# Drop the model cache on a mounted volume:",
    "docker exec llama-swap rm -rf /tmp/llama-cache/*",
    "",
    "# Restart to release memory:",
    "docker restart llama-swap",
];

pub fn maintenance_commands(kind: MaintenanceKind) -> &'static [&'static str] {
    match kind {
        MaintenanceKind::Logs => LOGS,
        MaintenanceKind::Restart => RESTART,
        MaintenanceKind::Cache => CACHE,
    }
}

/// Snippet block ready to paste into a terminal
pub fn maintenance_script(kind: MaintenanceKind) -> String {
    maintenance_commands(kind).join("\n")
}
