//! User and channel roster types.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A user listed in the robot's roster.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct UserInfo {
    pub user_name: String,
    #[serde(rename = "UserID")]
    pub user_id: String,
    pub email: String,
    pub full_name: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: String,
    /// Set for bots/programs that should never match ambient messages.
    pub bot_user: bool,
}

/// A channel listed in the robot's roster.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ChannelInfo {
    pub channel_name: String,
    #[serde(rename = "ChannelID")]
    pub channel_id: String,
}

/// Lookup tables from user/channel names to roster entries.
///
/// Built once per configuration load; runs keep the snapshot that was
/// current when they started.
#[derive(Debug, Clone, Default)]
pub struct UserChanMaps {
    pub users: HashMap<String, UserInfo>,
    pub user_ids: HashMap<String, UserInfo>,
    pub channels: HashMap<String, ChannelInfo>,
    pub channel_ids: HashMap<String, ChannelInfo>,
}

impl UserChanMaps {
    /// Build the maps from roster lists; later duplicates replace earlier ones.
    pub fn from_rosters(users: &[UserInfo], channels: &[ChannelInfo]) -> Self {
        let mut maps = Self::default();
        for u in users {
            maps.users.insert(u.user_name.clone(), u.clone());
            if !u.user_id.is_empty() {
                maps.user_ids.insert(u.user_id.clone(), u.clone());
            }
        }
        for c in channels {
            maps.channels.insert(c.channel_name.clone(), c.clone());
            if !c.channel_id.is_empty() {
                maps.channel_ids.insert(c.channel_id.clone(), c.clone());
            }
        }
        maps
    }

    /// Look up a user by name.
    pub fn user(&self, name: &str) -> Option<&UserInfo> {
        self.users.get(name)
    }

    /// Look up a channel by name.
    pub fn channel(&self, name: &str) -> Option<&ChannelInfo> {
        self.channels.get(name)
    }
}

/// Wrap a protocol ID in angle brackets.
pub fn bracket(id: &str) -> String {
    format!("<{}>", id)
}

/// If `s` looks like `<id>`, return the inner ID.
pub fn extract_id(s: &str) -> Option<&str> {
    s.strip_prefix('<')?.strip_suffix('>')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_rosters() {
        let users = vec![UserInfo {
            user_name: "alice".into(),
            user_id: "U123".into(),
            ..Default::default()
        }];
        let channels = vec![ChannelInfo {
            channel_name: "ops".into(),
            channel_id: "C9".into(),
        }];
        let maps = UserChanMaps::from_rosters(&users, &channels);
        assert_eq!(maps.user("alice").map(|u| u.user_id.as_str()), Some("U123"));
        assert_eq!(maps.user_ids["U123"].user_name, "alice");
        assert_eq!(maps.channel("ops").map(|c| c.channel_id.as_str()), Some("C9"));
    }

    #[test]
    fn test_extract_id() {
        assert_eq!(extract_id("<U123>"), Some("U123"));
        assert_eq!(extract_id("alice"), None);
        assert_eq!(bracket("U1"), "<U1>");
    }
}
