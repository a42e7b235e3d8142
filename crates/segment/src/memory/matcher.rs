//! In-memory evaluation of condition trees against JSON documents.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use cohort_core::{CohortError, Result};
use cohort_rules::registry::DEFAULT_MAX_DEPTH;
use cohort_rules::schema::{params, ComparisonOperator, Condition};
use cohort_rules::ConditionTypeRegistry;
use serde_json::{Map, Value};

// ── Dotted paths ────────────────────────────────────────────────────

pub(crate) fn get_path<'v>(doc: &'v Value, path: &str) -> Option<&'v Value> {
    path.split('.').try_fold(doc, |v, segment| v.get(segment))
}

/// Set `path`, creating intermediate objects. Non-object intermediates are replaced.
pub(crate) fn set_path(doc: &mut Value, path: &str, value: Value) {
    let segments: Vec<&str> = path.split('.').collect();
    let Some((last, parents)) = segments.split_last() else {
        return;
    };
    let mut current = doc;
    for segment in parents {
        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        current = match current {
            Value::Object(map) => map
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new())),
            _ => return,
        };
    }
    if !current.is_object() {
        *current = Value::Object(Map::new());
    }
    if let Value::Object(map) = current {
        map.insert(last.to_string(), value);
    }
}

// ── Matcher ─────────────────────────────────────────────────────────

/// Evaluates conditions against one document. `events` lets past-event
/// conditions without a materialized counter fall back to a live count.
/// Types the matcher has no rule for are expanded through `types`.
pub(crate) struct Matcher<'a> {
    pub events: Option<&'a BTreeMap<String, Value>>,
    pub types: Option<&'a ConditionTypeRegistry>,
    pub max_depth: usize,
    pub now: DateTime<Utc>,
}

impl<'a> Matcher<'a> {
    pub fn new(events: Option<&'a BTreeMap<String, Value>>) -> Self {
        Self {
            events,
            types: None,
            max_depth: DEFAULT_MAX_DEPTH,
            now: Utc::now(),
        }
    }

    pub fn with_types(mut self, types: &'a ConditionTypeRegistry) -> Self {
        self.types = Some(types);
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn matches(&self, condition: &Condition, doc: &Value) -> Result<bool> {
        self.matches_at(condition, doc, 0)
    }

    fn matches_at(&self, condition: &Condition, doc: &Value, depth: usize) -> Result<bool> {
        if depth > self.max_depth {
            return Err(CohortError::Other(format!(
                "condition nesting exceeds {} levels",
                self.max_depth
            )));
        }
        match condition.type_id.as_str() {
            "booleanCondition" => {
                let subs = condition.param_conditions(params::SUB_CONDITIONS).unwrap_or(&[]);
                match condition.param_str(params::OPERATOR).unwrap_or("and") {
                    "and" => {
                        for sub in subs {
                            if !self.matches_at(sub, doc, depth + 1)? {
                                return Ok(false);
                            }
                        }
                        Ok(true)
                    }
                    "or" => {
                        for sub in subs {
                            if self.matches_at(sub, doc, depth + 1)? {
                                return Ok(true);
                            }
                        }
                        Ok(false)
                    }
                    other => Err(invalid(condition, format!("unknown boolean operator '{other}'"))),
                }
            }
            "notCondition" => {
                let sub = condition
                    .param_condition(params::SUB_CONDITION)
                    .ok_or_else(|| invalid(condition, "missing subCondition"))?;
                Ok(!self.matches_at(sub, doc, depth + 1)?)
            }
            "matchAllCondition" => Ok(true),
            "profilePropertyCondition" | "sessionPropertyCondition" | "eventPropertyCondition" => {
                self.match_property(condition, doc)
            }
            "eventTypeCondition" => {
                let expected = condition
                    .param_str("eventTypeId")
                    .ok_or_else(|| invalid(condition, "missing eventTypeId"))?;
                Ok(doc.get("eventType").and_then(Value::as_str) == Some(expected))
            }
            "pastEventCondition" => self.match_past_event(condition, doc, depth),
            "profileSegmentCondition" => {
                let wanted = condition.param_strings(params::SEGMENTS).unwrap_or_default();
                let member = |id: &String| {
                    doc.get("segments")
                        .and_then(Value::as_array)
                        .map(|segs| segs.iter().any(|s| s.as_str() == Some(id.as_str())))
                        .unwrap_or(false)
                };
                match condition.param_str("matchType").unwrap_or("in") {
                    "in" => Ok(wanted.iter().any(member)),
                    "notIn" => Ok(!wanted.iter().any(member)),
                    "all" => Ok(wanted.iter().all(member)),
                    other => Err(invalid(condition, format!("unknown matchType '{other}'"))),
                }
            }
            "scoringCondition" => {
                let plan = condition
                    .param_str(params::SCORING_PLAN_ID)
                    .ok_or_else(|| invalid(condition, "missing scoringPlanId"))?;
                let score = doc
                    .get("scores")
                    .and_then(|s| s.get(plan))
                    .and_then(Value::as_i64)
                    .unwrap_or(0);
                let op = operator(condition, ComparisonOperator::GreaterThanOrEqualTo)?;
                let expected = Expected::One(Value::from(condition.param_i64("scoreValue").unwrap_or(0)));
                compare(op, Some(&Value::from(score)), &expected)
                    .ok_or_else(|| invalid(condition, format!("operator '{op}' needs a value")))
            }
            other => match self.types.and_then(|types| types.expand(condition)) {
                Some(expanded) => self.matches_at(&expanded, doc, depth + 1),
                None => Err(CohortError::Other(format!("no matcher for condition type '{other}'"))),
            },
        }
    }

    fn match_property(&self, condition: &Condition, doc: &Value) -> Result<bool> {
        let path = condition
            .param_str("propertyName")
            .ok_or_else(|| invalid(condition, "missing propertyName"))?;
        let op = operator(condition, ComparisonOperator::Equals)?;
        let expected = expected_value(condition);
        compare(op, get_path(doc, path), &expected)
            .ok_or_else(|| invalid(condition, format!("operator '{op}' needs a comparison value")))
    }

    fn match_past_event(&self, condition: &Condition, doc: &Value, depth: usize) -> Result<bool> {
        let minimum = condition.param_i64("minimumEventCount").unwrap_or(1);
        let maximum = condition.param_i64("maximumEventCount");

        let count = match condition.param_str(params::GENERATED_PROPERTY_KEY) {
            Some(key) => doc
                .get("systemProperties")
                .and_then(|s| s.get("pastEvents"))
                .and_then(|p| p.get(key))
                .and_then(Value::as_i64)
                .unwrap_or(0),
            None => self.live_count(condition, doc, depth)?,
        };
        Ok(count >= minimum && maximum.map_or(true, |max| count <= max))
    }

    fn live_count(&self, condition: &Condition, doc: &Value, depth: usize) -> Result<i64> {
        let (Some(events), Some(profile_id)) = (self.events, doc.get("id").and_then(Value::as_str)) else {
            return Ok(0);
        };
        let event_condition = condition
            .param_condition(params::EVENT_CONDITION)
            .ok_or_else(|| invalid(condition, "missing eventCondition"))?;
        let since = condition
            .param_i64(params::NUMBER_OF_DAYS)
            .map(|days| self.now - Duration::days(days));

        let mut count = 0;
        for event in events.values() {
            if event.get("profileId").and_then(Value::as_str) != Some(profile_id) {
                continue;
            }
            if let Some(since) = since {
                let in_window = event
                    .get("timestamp")
                    .and_then(Value::as_str)
                    .and_then(parse_date)
                    .map(|ts| ts >= since)
                    .unwrap_or(false);
                if !in_window {
                    continue;
                }
            }
            if self.matches_at(event_condition, event, depth + 1)? {
                count += 1;
            }
        }
        Ok(count)
    }
}

fn invalid(condition: &Condition, reason: impl std::fmt::Display) -> CohortError {
    CohortError::Other(format!("invalid {}: {reason}", condition.type_id))
}

fn operator(condition: &Condition, default: ComparisonOperator) -> Result<ComparisonOperator> {
    match condition.param_str("comparisonOperator") {
        None => Ok(default),
        Some(op) => ComparisonOperator::parse(op)
            .ok_or_else(|| invalid(condition, format!("unknown comparison operator '{op}'"))),
    }
}

// ── Comparison ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expected {
    Nothing,
    One(Value),
    Many(Vec<Value>),
}

impl Expected {
    fn as_list(&self) -> Vec<&Value> {
        match self {
            Expected::Nothing => Vec::new(),
            Expected::One(Value::Array(items)) => items.iter().collect(),
            Expected::One(v) => vec![v],
            Expected::Many(items) => items.iter().collect(),
        }
    }

    fn single(&self) -> Option<&Value> {
        match self {
            Expected::One(v) => Some(v),
            Expected::Many(items) if items.len() == 1 => items.first(),
            _ => None,
        }
    }
}

fn expected_value(condition: &Condition) -> Expected {
    for name in ["propertyValueInteger", "propertyValueDate", "propertyValue"] {
        if let Some(v) = condition.parameter(name).and_then(|p| p.as_scalar()) {
            if !v.is_null() {
                return Expected::One(v.clone());
            }
        }
    }
    match condition.parameter("propertyValues").and_then(|p| p.as_scalar()) {
        Some(Value::Array(items)) => Expected::Many(items.clone()),
        Some(v) if !v.is_null() => Expected::One(v.clone()),
        _ => Expected::Nothing,
    }
}

fn parse_date(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

/// Values a field holds: array elements, the scalar itself, or nothing.
fn values_of(actual: Option<&Value>) -> Vec<&Value> {
    match actual {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items.iter().filter(|v| !v.is_null()).collect(),
        Some(v) => vec![v],
    }
}

fn order(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::Number(x), Value::String(y)) => x.as_f64()?.partial_cmp(&y.parse::<f64>().ok()?),
        (Value::String(x), Value::Number(y)) => x.parse::<f64>().ok()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => match (parse_date(x), parse_date(y)) {
            (Some(dx), Some(dy)) => Some(dx.cmp(&dy)),
            _ => Some(x.cmp(y)),
        },
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Ordering used for sorted queries. Missing values sort first.
pub(crate) fn sort_order(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(x), Some(y)) => order(x, y).unwrap_or(Ordering::Equal),
    }
}

fn equal(a: &Value, b: &Value) -> bool {
    order(a, b) == Some(Ordering::Equal) || a == b
}

/// Apply `op`. `None` means the operator needed a value that is missing.
pub(crate) fn compare(op: ComparisonOperator, actual: Option<&Value>, expected: &Expected) -> Option<bool> {
    use ComparisonOperator::*;

    let values = values_of(actual);
    let result = match op {
        Exists => !values.is_empty(),
        Missing => values.is_empty(),
        Equals => {
            let e = expected.single()?;
            values.iter().any(|v| equal(v, e))
        }
        NotEquals => {
            let e = expected.single()?;
            !values.iter().any(|v| equal(v, e))
        }
        GreaterThan | GreaterThanOrEqualTo | LessThan | LessThanOrEqualTo => {
            let e = expected.single()?;
            values.iter().any(|v| match order(v, e) {
                Some(o) => match op {
                    GreaterThan => o == Ordering::Greater,
                    GreaterThanOrEqualTo => o != Ordering::Less,
                    LessThan => o == Ordering::Less,
                    _ => o != Ordering::Greater,
                },
                None => false,
            })
        }
        Between => {
            let bounds = expected.as_list();
            let [low, high] = bounds.as_slice() else {
                return None;
            };
            values.iter().any(|v| {
                matches!(order(v, low), Some(Ordering::Greater | Ordering::Equal))
                    && matches!(order(v, high), Some(Ordering::Less | Ordering::Equal))
            })
        }
        Contains | NotContains => {
            let e = expected.single()?;
            let found = values.iter().any(|v| match (v, e) {
                (Value::String(s), Value::String(sub)) => s.contains(sub.as_str()),
                _ => equal(v, e),
            });
            if op == Contains {
                found
            } else {
                !found
            }
        }
        StartsWith | EndsWith => {
            let e = expected.single()?.as_str()?;
            values.iter().any(|v| match v.as_str() {
                Some(s) if op == StartsWith => s.starts_with(e),
                Some(s) => s.ends_with(e),
                None => false,
            })
        }
        In | NotIn => {
            let list = expected.as_list();
            if list.is_empty() {
                return None;
            }
            let found = values.iter().any(|v| list.iter().any(|e| equal(v, e)));
            if op == In {
                found
            } else {
                !found
            }
        }
        All => {
            let list = expected.as_list();
            if list.is_empty() {
                return None;
            }
            list.iter().all(|e| values.iter().any(|v| equal(v, e)))
        }
    };
    Some(result)
}
