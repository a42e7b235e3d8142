//! Interface to the document store.
//!
//! The segmentation engine never talks to a concrete backend. Everything it
//! needs (condition matching, paged and scrolled queries, aggregations, partial
//! updates, scripted bulk updates, removal) goes through [`PersistenceService`].

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use cohort_core::{Item, ItemType, Result};
use cohort_rules::schema::Condition;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Bucket under which a cardinality aggregate reports its estimate.
pub const CARDINALITY_BUCKET: &str = "_cardinality";

/// Levels the engine may add around a stored condition when it queries a
/// backend (membership diff passes, event windows, type expansion).
pub const QUERY_NESTING_HEADROOM: usize = 4;

/// One page of query results.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartialList {
    pub items: Vec<Value>,
    /// Total number of matches, independent of paging.
    pub total_size: u64,
    /// Present while a scroll has more pages to give.
    pub scroll_id: Option<String>,
}

impl PartialList {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortSpec {
    /// Dotted property path.
    pub field: String,
    pub descending: bool,
}

impl SortSpec {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: false,
        }
    }
}

/// Hash partition of a terms aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    pub index: u32,
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AggregateSpec {
    /// Estimated number of distinct values, reported under [`CARDINALITY_BUCKET`].
    Cardinality { field: String },
    /// Document count per distinct value, optionally restricted to one partition.
    Terms {
        field: String,
        partition: Option<Partition>,
    },
}

/// Scripts understood by [`PersistenceService::bulk_script_update`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "script", rename_all = "camelCase")]
pub enum UpdateScript {
    /// Set `scores[planId]` back to `systemProperties.scoreModifiers[planId]`,
    /// or drop it when there is no modifier.
    #[serde(rename_all = "camelCase")]
    ResetScore { plan_id: String },
    /// Add `value` to `scores[planId]`, starting from zero.
    #[serde(rename_all = "camelCase")]
    IncrementScore { plan_id: String, value: i64 },
}

/// The document store as seen by the segmentation engine.
///
/// Backend unavailability surfaces as [`cohort_core::CohortError::Storage`];
/// callers treat it as fatal to the current operation.
#[async_trait]
pub trait PersistenceService: Send + Sync {
    /// Evaluate `condition` against one document in memory.
    fn test_match(&self, condition: &Condition, item: &Value) -> Result<bool>;

    async fn query(
        &self,
        condition: &Condition,
        item_type: ItemType,
        sort: Option<&SortSpec>,
        offset: usize,
        limit: usize,
    ) -> Result<PartialList>;

    /// Open a scroll cursor and return its first page.
    async fn scroll_query(
        &self,
        condition: &Condition,
        item_type: ItemType,
        sort: Option<&SortSpec>,
        batch_size: usize,
        validity: Duration,
    ) -> Result<PartialList>;

    /// Next page of an open scroll. An expired cursor is
    /// [`cohort_core::CohortError::ScrollExpired`].
    async fn continue_scroll(&self, scroll_id: &str, validity: Duration) -> Result<PartialList>;

    async fn aggregate(
        &self,
        condition: &Condition,
        spec: &AggregateSpec,
        item_type: ItemType,
    ) -> Result<BTreeMap<String, u64>>;

    async fn load(&self, id: &str, item_type: ItemType) -> Result<Option<Value>>;

    /// Insert or replace a whole document.
    async fn save(&self, id: &str, item_type: ItemType, document: Value) -> Result<()>;

    /// Set the given fields without touching the rest of the document. Keys
    /// are dotted paths. Returns `false` if the document does not exist.
    async fn update_fields(
        &self,
        id: &str,
        item_type: ItemType,
        fields: Map<String, Value>,
    ) -> Result<bool>;

    /// Apply `scripts[i]` to every document matching `conditions[i]`, in
    /// order. Returns the number of documents touched.
    async fn bulk_script_update(
        &self,
        conditions: &[Condition],
        scripts: &[UpdateScript],
        item_type: ItemType,
    ) -> Result<u64>;

    async fn remove(&self, id: &str, item_type: ItemType) -> Result<bool>;

    async fn remove_by_query(&self, condition: &Condition, item_type: ItemType) -> Result<bool>;
}

// ── Typed helpers ───────────────────────────────────────────────────

pub async fn load_item<T: Item>(persistence: &dyn PersistenceService, id: &str) -> Result<Option<T>> {
    match persistence.load(id, T::ITEM_TYPE).await? {
        Some(doc) => Ok(Some(serde_json::from_value(doc)?)),
        None => Ok(None),
    }
}

pub async fn save_item<T: Item>(persistence: &dyn PersistenceService, item: &T) -> Result<()> {
    let doc = serde_json::to_value(item)?;
    persistence.save(item.item_id(), T::ITEM_TYPE, doc).await
}

/// Every stored item of type `T`, paging through the collection.
pub async fn load_all<T: Item>(persistence: &dyn PersistenceService, page_size: usize) -> Result<Vec<T>> {
    let page_size = page_size.max(1);
    let all = Condition::match_all();
    let sort = SortSpec::asc("id");
    let mut items = Vec::new();
    let mut offset = 0;
    loop {
        let page = persistence
            .query(&all, T::ITEM_TYPE, Some(&sort), offset, page_size)
            .await?;
        let fetched = page.items.len();
        for doc in page.items {
            items.push(serde_json::from_value(doc)?);
        }
        offset += fetched;
        if fetched < page_size {
            break;
        }
    }
    Ok(items)
}

/// String id of a stored document.
pub fn document_id(document: &Value) -> Option<&str> {
    document.get("id").and_then(Value::as_str)
}
