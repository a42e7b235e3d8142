use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

use crate::entity::{Item, ItemType};

/// Profile identifier.
pub type ProfileId = String;

/// A visitor profile as stored by the document store.
///
/// `segments`, `scores` and `systemProperties.pastEvents` are owned by the
/// segmentation engine; other writers get overwritten on the next pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: ProfileId,
    #[serde(default)]
    pub properties: Map<String, Value>,
    #[serde(default)]
    pub system_properties: SystemProperties,
    #[serde(default)]
    pub segments: BTreeSet<String>,
    #[serde(default)]
    pub scores: BTreeMap<String, i64>,
}

/// Engine-maintained bookkeeping stored alongside a profile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemProperties {
    /// Materialized past-event counts keyed by synthetic rule key.
    #[serde(default)]
    pub past_events: BTreeMap<String, i64>,
    /// Manual score overrides keyed by scoring plan id.
    #[serde(default)]
    pub score_modifiers: BTreeMap<String, i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
    /// Anything else other components keep here; carried through untouched.
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl Profile {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Builder-style property setter.
    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    pub fn past_event_count(&self, key: &str) -> i64 {
        self.system_properties
            .past_events
            .get(key)
            .copied()
            .unwrap_or(0)
    }
}

impl Item for Profile {
    const ITEM_TYPE: ItemType = ItemType::Profile;

    fn item_id(&self) -> &str {
        &self.id
    }
}

/// A tracked visitor event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: String,
    pub event_type: String,
    pub profile_id: ProfileId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl Event {
    pub fn new(
        id: impl Into<String>,
        event_type: impl Into<String>,
        profile_id: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            event_type: event_type.into(),
            profile_id: profile_id.into(),
            session_id: None,
            timestamp,
            properties: Map::new(),
        }
    }
}

impl Item for Event {
    const ITEM_TYPE: ItemType = ItemType::Event;

    fn item_id(&self) -> &str {
        &self.id
    }
}

/// A visit session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub profile_id: ProfileId,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl Item for Session {
    const ITEM_TYPE: ItemType = ItemType::Session;

    fn item_id(&self) -> &str {
        &self.id
    }
}
