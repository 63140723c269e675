use std::error::Error as StdError;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Spawned,
    Stopped,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Spawned => "spawned",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handle of one running instance of a supervised service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(String);

impl InstanceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for InstanceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// A spawn or stop transition reported by the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleEvent {
    pub kind: EventKind,
    pub instance: InstanceId,
    pub label: String,
    /// Why the service stopped. Always `None` for spawns and clean stops.
    pub failure: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl LifecycleEvent {
    pub fn spawned(instance: InstanceId, label: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Spawned,
            instance,
            label: label.into(),
            failure: None,
            timestamp: Utc::now(),
        }
    }

    pub fn stopped(
        instance: InstanceId,
        label: impl Into<String>,
        failure: Option<&(dyn StdError + Send + Sync)>,
    ) -> Self {
        Self {
            kind: EventKind::Stopped,
            instance,
            label: label.into(),
            failure: failure.map(|e| e.to_string()),
            timestamp: Utc::now(),
        }
    }
}
