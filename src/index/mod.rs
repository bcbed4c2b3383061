//! Element index
//!
//! A cache of "interesting" elements keyed by [`ElementIdentity`], kept
//! eventually fresh by budgeted scans so it never walks the whole tree in
//! one go.

pub mod budget;
pub mod entry;
pub mod extract;
pub mod identity;
pub mod monitor;
pub mod store;

pub use budget::{BudgetOutcome, Budgeter, ScanBudget};
pub use entry::{
    Accessibility, EntryError, EntryFilter, IndexEntry, MediaData, MediaKind, PlaybackState, ScrollData,
    ScrollDirection, SelectorCandidate, SelectorKind,
};
pub use extract::{DomExtractor, ElementExtractor};
pub use identity::ElementIdentity;
pub use monitor::IndexMonitor;
pub use store::{
    DetectorKind, ElementIndex, IndexStats, IntentMatch, IntentOptions, ScanReport, SharedIndex,
};
