use serde::{Deserialize, Serialize};

/// Collections the persistence collaborator stores. Doubles as the class hint
/// passed to partial updates and removals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ItemType {
    Profile,
    Event,
    Session,
    Segment,
    Scoring,
    Rule,
}

impl ItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemType::Profile => "profile",
            ItemType::Event => "event",
            ItemType::Session => "session",
            ItemType::Segment => "segment",
            ItemType::Scoring => "scoring",
            ItemType::Rule => "rule",
        }
    }
}

impl std::fmt::Display for ItemType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A storable item: knows its collection and its id.
pub trait Item: Serialize + for<'de> Deserialize<'de> + Send + Sync {
    const ITEM_TYPE: ItemType;

    fn item_id(&self) -> &str;
}
