use serde::{Deserialize, Serialize};

pub type TabId = i64;
pub type WindowId = i64;
pub type GroupId = i64;

/// Group id carried by tabs that are not in any native group.
pub const TAB_GROUP_ID_NONE: GroupId = -1;

/// Move target index meaning "append at the end of the window".
pub const APPEND_INDEX: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowType {
    #[default]
    Normal,
    Popup,
    Panel,
    App,
    Devtools,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Window {
    pub id: WindowId,
    #[serde(default)]
    pub focused: bool,
    #[serde(default, rename = "type")]
    pub window_type: WindowType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tab {
    pub id: TabId,
    pub window_id: WindowId,
    #[serde(default)]
    pub index: usize,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default = "ungrouped")]
    pub group_id: GroupId,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default)]
    pub discarded: bool,
}

fn ungrouped() -> GroupId {
    TAB_GROUP_ID_NONE
}

impl Tab {
    pub fn is_grouped(&self) -> bool {
        self.group_id != TAB_GROUP_ID_NONE
    }

    pub fn is_web_page(&self) -> bool {
        let lower = self.url.to_ascii_lowercase();
        lower.starts_with("http://") || lower.starts_with("https://")
    }

    /// Blank and new-tab pages that hosts open on their own.
    pub fn is_placeholder(&self) -> bool {
        is_placeholder_url(&self.url)
    }
}

pub fn is_placeholder_url(url: &str) -> bool {
    let trimmed = url.trim().trim_end_matches('/').to_ascii_lowercase();
    matches!(
        trimmed.as_str(),
        "" | "about:blank"
            | "about:newtab"
            | "about:home"
            | "chrome://newtab"
            | "edge://newtab"
            | "brave://newtab"
            | "chrome://new-tab-page"
    )
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabGroup {
    pub id: GroupId,
    pub window_id: WindowId,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub color: GroupColor,
    #[serde(default)]
    pub collapsed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupColor {
    #[default]
    Grey,
    Blue,
    Red,
    Yellow,
    Green,
    Pink,
    Purple,
    Cyan,
    Orange,
}

impl GroupColor {
    /// Assignment order for freshly created slots.
    pub const PALETTE: [GroupColor; 9] = [
        Self::Blue,
        Self::Red,
        Self::Yellow,
        Self::Green,
        Self::Pink,
        Self::Purple,
        Self::Cyan,
        Self::Orange,
        Self::Grey,
    ];
}

impl std::fmt::Display for GroupColor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Grey => write!(f, "grey"),
            Self::Blue => write!(f, "blue"),
            Self::Red => write!(f, "red"),
            Self::Yellow => write!(f, "yellow"),
            Self::Green => write!(f, "green"),
            Self::Pink => write!(f, "pink"),
            Self::Purple => write!(f, "purple"),
            Self::Cyan => write!(f, "cyan"),
            Self::Orange => write!(f, "orange"),
        }
    }
}

impl std::str::FromStr for GroupColor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "grey" | "gray" => Ok(Self::Grey),
            "blue" => Ok(Self::Blue),
            "red" => Ok(Self::Red),
            "yellow" => Ok(Self::Yellow),
            "green" => Ok(Self::Green),
            "pink" => Ok(Self::Pink),
            "purple" => Ok(Self::Purple),
            "cyan" => Ok(Self::Cyan),
            "orange" => Ok(Self::Orange),
            _ => Err(format!("unknown group color: {s}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tab_defaults_to_ungrouped_when_field_missing() {
        let tab: Tab =
            serde_json::from_str(r#"{"id": 1, "windowId": 2, "url": "https://a.com"}"#).unwrap();
        assert_eq!(tab.group_id, TAB_GROUP_ID_NONE);
        assert!(!tab.is_grouped());
        assert!(tab.is_web_page());
    }

    #[test]
    fn placeholder_urls_are_recognized() {
        assert!(is_placeholder_url("chrome://newtab/"));
        assert!(is_placeholder_url("about:blank"));
        assert!(is_placeholder_url(""));
        assert!(!is_placeholder_url("https://example.com/"));
    }

    #[test]
    fn group_color_parses_loosely() {
        assert_eq!(" Gray ".parse::<GroupColor>(), Ok(GroupColor::Grey));
        assert_eq!("PURPLE".parse::<GroupColor>(), Ok(GroupColor::Purple));
        assert!("magenta".parse::<GroupColor>().is_err());
    }
}
