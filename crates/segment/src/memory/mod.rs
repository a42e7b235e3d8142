//! In-memory [`PersistenceService`] used by tests and the standalone worker.
//!
//! Collections are ordered by id, scroll cursors snapshot the matching ids and
//! expire after their validity window, and terms aggregations hash-partition
//! their keys with SHA-256.

mod matcher;


use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cohort_core::{CohortError, Item, ItemType, Result};
use cohort_rules::registry::DEFAULT_MAX_DEPTH;
use cohort_rules::schema::Condition;
use cohort_rules::ConditionTypeRegistry;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::persistence::{
    AggregateSpec, PartialList, PersistenceService, SortSpec, UpdateScript, CARDINALITY_BUCKET,
    QUERY_NESTING_HEADROOM,
};

use self::matcher::{get_path, set_path, sort_order, Matcher};

/// Hash partition a terms key falls into.
pub fn partition_of(key: &str, count: u32) -> u32 {
    let digest = Sha256::digest(key.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(prefix) % u64::from(count.max(1))) as u32
}

struct Scroll {
    item_type: ItemType,
    remaining: VecDeque<String>,
    batch_size: usize,
    expires_at: Instant,
}

#[derive(Default)]
struct MemoryState {
    collections: HashMap<ItemType, BTreeMap<String, Value>>,
    scrolls: HashMap<String, Scroll>,
    next_scroll_id: u64,
    failing_updates: HashSet<String>,
    unavailable: bool,
}

impl MemoryState {
    fn check_available(&self) -> Result<()> {
        if self.unavailable {
            Err(CohortError::Storage("backend unavailable".to_string()))
        } else {
            Ok(())
        }
    }

    fn collection(&self, item_type: ItemType) -> Option<&BTreeMap<String, Value>> {
        self.collections.get(&item_type)
    }

    fn collection_mut(&mut self, item_type: ItemType) -> &mut BTreeMap<String, Value> {
        self.collections.entry(item_type).or_default()
    }

    fn matching_ids(
        &self,
        matcher: &Matcher<'_>,
        condition: &Condition,
        item_type: ItemType,
        sort: Option<&SortSpec>,
    ) -> Result<Vec<String>> {
        let Some(collection) = self.collection(item_type) else {
            return Ok(Vec::new());
        };
        let mut hits = Vec::new();
        for (id, doc) in collection {
            if matcher.matches(condition, doc)? {
                hits.push((id, doc));
            }
        }
        if let Some(sort) = sort {
            hits.sort_by(|(_, a), (_, b)| {
                let o = sort_order(get_path(a, &sort.field), get_path(b, &sort.field));
                if sort.descending {
                    o.reverse()
                } else {
                    o
                }
            });
        }
        Ok(hits.into_iter().map(|(id, _)| id.clone()).collect())
    }

    fn documents(&self, item_type: ItemType, ids: &[String]) -> Vec<Value> {
        let Some(collection) = self.collection(item_type) else {
            return Vec::new();
        };
        ids.iter().filter_map(|id| collection.get(id).cloned()).collect()
    }
}

/// Thread-safe in-memory document store.
///
/// Evaluates the built-in condition types directly and any other registered
/// type through its parent condition.
pub struct MemoryPersistence {
    state: RwLock<MemoryState>,
    condition_types: ConditionTypeRegistry,
    max_depth: usize,
}

impl Default for MemoryPersistence {
    fn default() -> Self {
        Self {
            state: RwLock::default(),
            condition_types: ConditionTypeRegistry::builtin(),
            max_depth: DEFAULT_MAX_DEPTH + QUERY_NESTING_HEADROOM,
        }
    }
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluate with `types`, allowing trees as deep as the registry accepts
    /// plus the nesting the engine adds around them.
    pub fn with_condition_types(mut self, types: ConditionTypeRegistry) -> Self {
        self.max_depth = types.max_depth() + QUERY_NESTING_HEADROOM;
        self.condition_types = types;
        self
    }

    fn matcher<'a>(&'a self, state: &'a MemoryState) -> Matcher<'a> {
        Matcher::new(state.collection(ItemType::Event))
            .with_types(&self.condition_types)
            .with_max_depth(self.max_depth)
    }

    fn read(&self) -> RwLockReadGuard<'_, MemoryState> {
        self.state.read().expect("memory store lock poisoned")
    }

    fn write(&self) -> RwLockWriteGuard<'_, MemoryState> {
        self.state.write().expect("memory store lock poisoned")
    }

    /// Store a typed item directly.
    pub fn insert<T: Item>(&self, item: &T) -> Result<()> {
        let doc = serde_json::to_value(item)?;
        self.write()
            .collection_mut(T::ITEM_TYPE)
            .insert(item.item_id().to_string(), doc);
        Ok(())
    }

    /// Read a typed item directly.
    pub fn get<T: Item>(&self, id: &str) -> Result<Option<T>> {
        let doc = self
            .read()
            .collection(T::ITEM_TYPE)
            .and_then(|c| c.get(id).cloned());
        match doc {
            Some(doc) => Ok(Some(serde_json::from_value(doc)?)),
            None => Ok(None),
        }
    }

    pub fn count(&self, item_type: ItemType) -> usize {
        self.read().collection(item_type).map(BTreeMap::len).unwrap_or(0)
    }

    pub fn open_scrolls(&self) -> usize {
        self.read().scrolls.len()
    }

    /// Make every later partial update of `id` fail.
    pub fn fail_updates_for(&self, id: impl Into<String>) {
        self.write().failing_updates.insert(id.into());
    }

    /// Simulate the backend going away (or coming back).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.write().unavailable = unavailable;
    }
}

fn object_field<'v>(doc: &'v mut Value, key: &str) -> Option<&'v mut Map<String, Value>> {
    let entry = doc
        .as_object_mut()?
        .entry(key.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if !entry.is_object() {
        *entry = Value::Object(Map::new());
    }
    entry.as_object_mut()
}

fn apply_script(doc: &mut Value, script: &UpdateScript) {
    match script {
        UpdateScript::ResetScore { plan_id } => {
            let modifier = doc
                .get("systemProperties")
                .and_then(|s| s.get("scoreModifiers"))
                .and_then(|m| m.get(plan_id))
                .cloned();
            if let Some(scores) = object_field(doc, "scores") {
                match modifier {
                    Some(m) => {
                        scores.insert(plan_id.clone(), m);
                    }
                    None => {
                        scores.remove(plan_id);
                    }
                }
            }
        }
        UpdateScript::IncrementScore { plan_id, value } => {
            if let Some(scores) = object_field(doc, "scores") {
                let current = scores.get(plan_id).and_then(Value::as_i64).unwrap_or(0);
                scores.insert(plan_id.clone(), Value::from(current.saturating_add(*value)));
            }
        }
    }
}

fn value_key(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

#[async_trait]
impl PersistenceService for MemoryPersistence {
    fn test_match(&self, condition: &Condition, item: &Value) -> Result<bool> {
        let state = self.read();
        self.matcher(&state).matches(condition, item)
    }

    async fn query(
        &self,
        condition: &Condition,
        item_type: ItemType,
        sort: Option<&SortSpec>,
        offset: usize,
        limit: usize,
    ) -> Result<PartialList> {
        let state = self.read();
        state.check_available()?;
        let ids = state.matching_ids(&self.matcher(&state), condition, item_type, sort)?;
        let page: Vec<String> = ids.iter().skip(offset).take(limit).cloned().collect();
        Ok(PartialList {
            items: state.documents(item_type, &page),
            total_size: ids.len() as u64,
            scroll_id: None,
        })
    }

    async fn scroll_query(
        &self,
        condition: &Condition,
        item_type: ItemType,
        sort: Option<&SortSpec>,
        batch_size: usize,
        validity: Duration,
    ) -> Result<PartialList> {
        let mut state = self.write();
        state.check_available()?;
        let batch_size = batch_size.max(1);
        let ids = state.matching_ids(&self.matcher(&state), condition, item_type, sort)?;
        let total_size = ids.len() as u64;
        let mut remaining: VecDeque<String> = ids.into();
        let first: Vec<String> = remaining
            .drain(..batch_size.min(remaining.len()))
            .collect();
        let items = state.documents(item_type, &first);

        let scroll_id = if remaining.is_empty() {
            None
        } else {
            state.next_scroll_id += 1;
            let id = format!("scroll-{}", state.next_scroll_id);
            state.scrolls.insert(
                id.clone(),
                Scroll {
                    item_type,
                    remaining,
                    batch_size,
                    expires_at: Instant::now() + validity,
                },
            );
            debug!(scroll_id = %id, total_size, "opened scroll");
            Some(id)
        };

        Ok(PartialList {
            items,
            total_size,
            scroll_id,
        })
    }

    async fn continue_scroll(&self, scroll_id: &str, validity: Duration) -> Result<PartialList> {
        let mut state = self.write();
        state.check_available()?;
        let now = Instant::now();
        let Some(mut scroll) = state.scrolls.remove(scroll_id) else {
            return Err(CohortError::ScrollExpired(scroll_id.to_string()));
        };
        if now >= scroll.expires_at {
            debug!(scroll_id = %scroll_id, "scroll expired");
            return Err(CohortError::ScrollExpired(scroll_id.to_string()));
        }

        // Skip ids whose documents were removed since the scroll opened.
        let mut items = Vec::new();
        while items.is_empty() && !scroll.remaining.is_empty() {
            let take = scroll.batch_size.min(scroll.remaining.len());
            let batch: Vec<String> = scroll.remaining.drain(..take).collect();
            items = state.documents(scroll.item_type, &batch);
        }

        let scroll_id = if scroll.remaining.is_empty() {
            None
        } else {
            scroll.expires_at = now + validity;
            state.scrolls.insert(scroll_id.to_string(), scroll);
            Some(scroll_id.to_string())
        };
        Ok(PartialList {
            items,
            total_size: 0,
            scroll_id,
        })
    }

    async fn aggregate(
        &self,
        condition: &Condition,
        spec: &AggregateSpec,
        item_type: ItemType,
    ) -> Result<BTreeMap<String, u64>> {
        let state = self.read();
        state.check_available()?;
        let ids = state.matching_ids(&self.matcher(&state), condition, item_type, None)?;
        let docs = state.documents(item_type, &ids);

        let mut buckets = BTreeMap::new();
        match spec {
            AggregateSpec::Cardinality { field } => {
                let distinct: HashSet<String> = docs
                    .iter()
                    .filter_map(|d| get_path(d, field).and_then(value_key))
                    .collect();
                buckets.insert(CARDINALITY_BUCKET.to_string(), distinct.len() as u64);
            }
            AggregateSpec::Terms { field, partition } => {
                for doc in &docs {
                    let Some(key) = get_path(doc, field).and_then(value_key) else {
                        continue;
                    };
                    if let Some(p) = partition {
                        if partition_of(&key, p.count) != p.index {
                            continue;
                        }
                    }
                    *buckets.entry(key).or_insert(0) += 1;
                }
            }
        }
        Ok(buckets)
    }

    async fn load(&self, id: &str, item_type: ItemType) -> Result<Option<Value>> {
        let state = self.read();
        state.check_available()?;
        Ok(state.collection(item_type).and_then(|c| c.get(id).cloned()))
    }

    async fn save(&self, id: &str, item_type: ItemType, document: Value) -> Result<()> {
        let mut state = self.write();
        state.check_available()?;
        state.collection_mut(item_type).insert(id.to_string(), document);
        Ok(())
    }

    async fn update_fields(
        &self,
        id: &str,
        item_type: ItemType,
        fields: Map<String, Value>,
    ) -> Result<bool> {
        let mut state = self.write();
        state.check_available()?;
        if state.failing_updates.contains(id) {
            return Err(CohortError::Storage(format!("update of {item_type} {id} rejected")));
        }
        let Some(doc) = state.collection_mut(item_type).get_mut(id) else {
            return Ok(false);
        };
        for (path, value) in fields {
            set_path(doc, &path, value);
        }
        Ok(true)
    }

    async fn bulk_script_update(
        &self,
        conditions: &[Condition],
        scripts: &[UpdateScript],
        item_type: ItemType,
    ) -> Result<u64> {
        if conditions.len() != scripts.len() {
            return Err(CohortError::Other(format!(
                "{} conditions for {} scripts",
                conditions.len(),
                scripts.len()
            )));
        }
        let mut state = self.write();
        state.check_available()?;
        let mut touched = 0;
        for (condition, script) in conditions.iter().zip(scripts) {
            let ids = state.matching_ids(&self.matcher(&state), condition, item_type, None)?;
            let collection = state.collection_mut(item_type);
            for id in &ids {
                if let Some(doc) = collection.get_mut(id) {
                    apply_script(doc, script);
                    touched += 1;
                }
            }
        }
        Ok(touched)
    }

    async fn remove(&self, id: &str, item_type: ItemType) -> Result<bool> {
        let mut state = self.write();
        state.check_available()?;
        Ok(state.collection_mut(item_type).remove(id).is_some())
    }

    async fn remove_by_query(&self, condition: &Condition, item_type: ItemType) -> Result<bool> {
        let mut state = self.write();
        state.check_available()?;
        let ids = state.matching_ids(&self.matcher(&state), condition, item_type, None)?;
        let collection = state.collection_mut(item_type);
        for id in &ids {
            collection.remove(id);
        }
        Ok(true)
    }
}
