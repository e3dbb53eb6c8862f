use std::collections::HashSet;

use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    Host,
    CoHost,
    Participant,
    #[serde(untagged)]
    Other(String),
}

impl Role {
    pub fn as_str(&self) -> &str {
        match self {
            Role::Host => "host",
            Role::CoHost => "co-host",
            Role::Participant => "participant",
            Role::Other(raw) => raw,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(deserialize_with = "string_or_number")]
    pub user_id: String,
    #[serde(rename = "full_name")]
    pub display_name: String,
    #[serde(default)]
    pub role: Option<Role>,
}

/// Backends disagree on whether ids are strings or integers; keep them opaque.
pub(crate) fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(i64),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Text(s) => s,
        Id::Number(n) => n.to_string(),
    })
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RosterDiff {
    pub joined: Vec<Participant>,
    pub left: Vec<Participant>,
}

impl RosterDiff {
    pub fn is_empty(&self) -> bool {
        self.joined.is_empty() && self.left.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TileBinding {
    LocalVideo,
    Remote { participant_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tile {
    pub participant_id: String,
    pub display_name: String,
    pub binding: TileBinding,
    pub presenting: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Presenter {
    pub user_id: String,
    pub full_name: String,
}

/// Participants of one meeting as last reported by the backend. The self
/// entry is the first one whose `user_id` matches the signed-in user.
#[derive(Debug, Clone)]
pub struct Roster {
    self_user_id: String,
    entries: Vec<Participant>,
    presenter: Option<Presenter>,
}

impl Roster {
    pub fn new(self_user_id: impl Into<String>) -> Self {
        Self {
            self_user_id: self_user_id.into(),
            entries: Vec::new(),
            presenter: None,
        }
    }

    pub fn self_user_id(&self) -> &str {
        &self.self_user_id
    }

    pub fn entries(&self) -> &[Participant] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn self_entry(&self) -> Option<&Participant> {
        self.entries.iter().find(|p| p.user_id == self.self_user_id)
    }

    pub fn remote_entries(&self) -> impl Iterator<Item = &Participant> {
        let self_id = self.self_entry().map(|p| p.id.clone());
        self.entries
            .iter()
            .filter(move |p| Some(&p.id) != self_id.as_ref())
    }

    pub fn has_remote(&self) -> bool {
        self.remote_entries().next().is_some()
    }

    /// Replaces the roster with a fresh poll and reports who came and went.
    pub fn update(&mut self, snapshot: Vec<Participant>) -> RosterDiff {
        let before: HashSet<&str> = self.entries.iter().map(|p| p.id.as_str()).collect();
        let after: HashSet<&str> = snapshot.iter().map(|p| p.id.as_str()).collect();

        let diff = RosterDiff {
            joined: snapshot
                .iter()
                .filter(|p| !before.contains(p.id.as_str()))
                .cloned()
                .collect(),
            left: self
                .entries
                .iter()
                .filter(|p| !after.contains(p.id.as_str()))
                .cloned()
                .collect(),
        };

        if let Some(presenter) = &self.presenter {
            if !snapshot.iter().any(|p| p.user_id == presenter.user_id) {
                self.presenter = None;
            }
        }
        self.entries = snapshot;
        if !diff.is_empty() {
            debug!(joined = diff.joined.len(), left = diff.left.len(), total = self.entries.len(), "roster changed");
        }
        diff
    }

    /// Drops every entry of `user_id` ahead of the next poll.
    pub fn remove_user(&mut self, user_id: &str) -> Vec<Participant> {
        let (gone, kept) = std::mem::take(&mut self.entries)
            .into_iter()
            .partition(|p| p.user_id == user_id);
        self.entries = kept;
        if self.presenter.as_ref().is_some_and(|p| p.user_id == user_id) {
            self.presenter = None;
        }
        gone
    }

    pub fn presenter(&self) -> Option<&Presenter> {
        self.presenter.as_ref()
    }

    pub fn set_presenter(&mut self, user_id: &str, full_name: &str) {
        self.presenter = Some(Presenter {
            user_id: user_id.into(),
            full_name: full_name.into(),
        });
    }

    pub fn clear_presenter(&mut self, user_id: &str) {
        if self.presenter.as_ref().is_some_and(|p| p.user_id == user_id) {
            self.presenter = None;
        }
    }

    /// One tile per roster entry, in roster order.
    pub fn tiles(&self) -> Vec<Tile> {
        let self_id = self.self_entry().map(|p| p.id.as_str());
        let presenter = self.presenter.as_ref().map(|p| p.user_id.as_str());
        self.entries
            .iter()
            .map(|p| Tile {
                participant_id: p.id.clone(),
                display_name: p.display_name.clone(),
                binding: if Some(p.id.as_str()) == self_id {
                    TileBinding::LocalVideo
                } else {
                    TileBinding::Remote {
                        participant_id: p.id.clone(),
                    }
                },
                presenting: Some(p.user_id.as_str()) == presenter,
            })
            .collect()
    }
}
