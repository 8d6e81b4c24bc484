//! Serializable event types for consumers outside the detector.
//!
//! Everything here derives `serde::Serialize` + `serde::Deserialize` with
//! camelCase field names, so events can be logged or forwarded as JSON.

pub mod events;

pub use events::{BroadcastObserver, DetectorStateEvent, KeywordEvent};
