//! Formatting helpers and server metadata shared by tools and resources

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value};

/// Renders a number the way a calculator would show it: `5` rather than `5.0`.
pub fn format_number(value: f64) -> String {
    if value == 0.0 {
        // avoid "-0"
        return "0".to_string();
    }
    value.to_string()
}

#[derive(Debug, Clone, Copy)]
pub struct ServerInfo {
    started_at: DateTime<Utc>,
}

impl Default for ServerInfo {
    fn default() -> Self {
        Self::started_at(Utc::now())
    }
}

impl ServerInfo {
    pub fn started_at(started_at: DateTime<Utc>) -> Self {
        Self { started_at }
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> Value {
        let uptime = (now - self.started_at).num_seconds().max(0);
        json!({
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "started_at": self.started_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            "uptime_seconds": uptime,
        })
    }
}
