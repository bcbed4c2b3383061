//! Detector plug-ins
//!
//! Each detector watches one class of elements, keeps its own records
//! keyed by [`ElementIdentity`](crate::index::ElementIdentity) and writes a
//! plain-data sub-record into the shared index. Lifecycle is
//! `Idle -> Detecting -> Idle`; every listener a detector registers is a
//! [`Subscription`](crate::dom::Subscription) held until `stop_detecting`.

pub mod media;
pub mod scroll;

use serde::Serialize;

pub use media::{MediaCommand, MediaDetector, MediaRecord};
pub use scroll::{ScrollDetector, ScrollRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectorState {
    Idle,
    Detecting,
}
