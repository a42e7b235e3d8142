/// Integration tests for the segmentation service over the in-memory backend:
/// definition round trips, membership reconciliation, shared past-event
/// counters, dependency-safe removal, scoring, failure handling and the
/// background loops.

mod background;
mod counters;
mod definitions;
mod failures;
mod helpers;
mod membership;
mod removal;
mod scoring;
mod writes;
