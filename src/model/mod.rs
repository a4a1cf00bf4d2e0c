//! Core data model shared by every subsystem.
//!
//! # Types
//! - [`ConfigKey`]: identity of one configuration document
//! - [`KeyPattern`]: selector over keys, used by refresh events
//! - [`ConfigDocument`]: resolved, immutable property set at one revision
//! - [`RefreshEvent`]: broadcast notification that some keys changed
//!
//! Documents and events are immutable once built. Subsystems share them via
//! `Arc` and replace them wholesale; nothing is mutated in place.

pub mod document;
pub mod event;
pub mod key;

pub use document::{ConfigDocument, Properties, PropertyValue};
pub use event::{EventOrigin, RefreshEvent};
pub use key::{ConfigKey, KeyPattern, PatternError, Segment};
