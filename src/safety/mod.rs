//! Compatibility checking for prescriptions.
//!
//! # Architecture
//!
//! - [`dataset`]: reference data loading and the bidirectional index
//! - [`matcher`]: alias-aware name matching
//! - [`evaluator`]: pairwise evaluation producing a [`SafetyVerdict`]
//!
//! Everything here is pure in-memory computation and never suspends, so it
//! can run inline on the per-edit path.

pub mod dataset;
pub mod evaluator;
pub mod matcher;

pub use dataset::{DatasetStatistics, InteractionDataset, InteractionRecord, RelationshipRecord};
pub use evaluator::{BeneficialPairing, NamedSubstance, SafetyDetail, SafetyEvaluator, SafetyVerdict};
pub use matcher::NameMatcher;
