//! Raw telemetry input schema
//!
//! This module defines the loosely-typed records produced by the browser
//! tracker and stored by the collection layer, before normalization.

mod adapter;
mod raw_event;

pub use adapter::*;
pub use raw_event::*;
