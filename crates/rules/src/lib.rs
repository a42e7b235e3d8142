//! Condition trees and the definitions built on them.
//!
//! This crate provides:
//! - the condition data model, condition type catalogue and tree resolution
//! - synthetic counter derivation for past-event conditions
//! - dependency analysis and cascading rewrites for segment/scoring references
//! - validation with structured errors and suggestions
//! - cron scheduling for periodic maintenance tasks

pub mod analyzer;
pub mod deriver;
pub mod error;
pub mod registry;
pub mod scheduler;
pub mod schema;
pub mod validation;

pub use analyzer::{DependencyAnalyzer, ReferenceKind};
pub use deriver::{counter_key, derive_counters, DerivedCounter, RuleLinkPlan};
pub use error::{ConditionError, Result};
pub use registry::ConditionTypeRegistry;
