//! Ring membership notifications.

pub mod events;

pub use events::{RingEvent, RingEventListener};
