use serde::Serialize;

use crate::models::browser::{GroupId, TabId, WindowId};

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Tab {0} no longer exists")]
    TabNotFound(TabId),

    #[error("Window {0} no longer exists")]
    WindowNotFound(WindowId),

    #[error("Tab group {0} no longer exists")]
    GroupNotFound(GroupId),

    #[error("Host error: {0}")]
    Host(String),

    #[error("Classifier error: {0}")]
    Classifier(String),

    #[error("Invalid group: {0}")]
    InvalidGroup(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("An organize run is already in progress")]
    AlreadyRunning,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("{0}")]
    General(String),
}

impl AppError {
    /// The tab, window or group was closed underneath us. Expected while the
    /// user keeps browsing during a run; callers skip rather than count.
    pub fn is_vanished(&self) -> bool {
        matches!(
            self,
            Self::TabNotFound(_) | Self::WindowNotFound(_) | Self::GroupNotFound(_)
        )
    }

    /// Host failures carry tab and window ids in their text, so only
    /// classifier messages are inspected for permanent causes.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Host(_) => true,
            Self::Classifier(message) => is_retryable_message(message),
            _ => false,
        }
    }
}

fn is_retryable_message(message: &str) -> bool {
    let lower = message.to_lowercase();

    if lower.contains("unauthorized")
        || lower.contains("bad request")
        || lower.contains("no api key")
        || lower.contains("invalid api key")
        || lower.contains("permission")
    {
        return false;
    }

    if let Some(status) = extract_http_status_code(&lower) {
        if (400..500).contains(&status) && !matches!(status, 408 | 409 | 429) {
            return false;
        }
    }

    true
}

fn extract_http_status_code(message: &str) -> Option<u16> {
    for token in message.split(|c: char| !c.is_ascii_digit()) {
        if token.len() != 3 {
            continue;
        }
        let Ok(status) = token.parse::<u16>() else {
            continue;
        };
        if (100..600).contains(&status) {
            return Some(status);
        }
    }
    None
}

impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
