//! Application state for API handlers

use std::sync::Arc;
use virt_admission::{AdmissionDispatcher, InMemoryLookup};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Routes reviews to admitters
    pub dispatcher: Arc<AdmissionDispatcher>,

    /// Resource store backing the admitters' lookups
    pub lookup: Arc<InMemoryLookup>,

    /// Daemon version
    pub version: String,

    /// Daemon start time
    pub started_at: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    /// Create new application state
    pub fn new(dispatcher: Arc<AdmissionDispatcher>, lookup: Arc<InMemoryLookup>) -> Self {
        Self {
            dispatcher,
            lookup,
            version: env!("CARGO_PKG_VERSION").to_string(),
            started_at: chrono::Utc::now(),
        }
    }

    /// Get uptime as a human-readable string
    pub fn uptime(&self) -> String {
        let duration = chrono::Utc::now() - self.started_at;
        let secs = duration.num_seconds();

        if secs < 60 {
            format!("{}s", secs)
        } else if secs < 3600 {
            format!("{}m {}s", secs / 60, secs % 60)
        } else if secs < 86400 {
            format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
        } else {
            format!("{}d {}h", secs / 86400, (secs % 86400) / 3600)
        }
    }
}
