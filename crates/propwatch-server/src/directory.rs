use crate::config::{RecipientEntry, TargetEntry};
use propwatch_common::types::ChannelType;
use std::collections::HashMap;

/// Who gets notified for a target on a channel.
#[derive(Debug, Default)]
pub struct RecipientDirectory {
    entries: HashMap<(String, ChannelType), Vec<String>>,
}

impl RecipientDirectory {
    pub fn from_entries(entries: &[RecipientEntry]) -> Self {
        let mut directory = Self::default();
        for entry in entries {
            let addresses = directory
                .entries
                .entry((entry.target_id.clone(), entry.channel_type))
                .or_default();
            if !addresses.contains(&entry.address) {
                addresses.push(entry.address.clone());
            }
        }
        directory
    }

    pub fn recipients(&self, target_id: &str, channel: ChannelType) -> &[String] {
        self.entries
            .get(&(target_id.to_string(), channel))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Display names for targets; unknown ids label themselves.
#[derive(Debug, Default)]
pub struct TargetDirectory {
    names: HashMap<String, String>,
}

impl TargetDirectory {
    pub fn from_entries(entries: &[TargetEntry]) -> Self {
        Self {
            names: entries
                .iter()
                .map(|t| (t.id.clone(), t.name.clone()))
                .collect(),
        }
    }

    pub fn label<'a>(&'a self, target_id: &'a str) -> &'a str {
        self.names
            .get(target_id)
            .map(String::as_str)
            .unwrap_or(target_id)
    }
}
