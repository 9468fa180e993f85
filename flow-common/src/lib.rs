//! # Flow Common Library
//!
//! Shared code for the flow player core and its front ends:
//! - Event types (FlowEvent enum) and the EventBus
//! - Track identity and cue/annotation types exchanged with collaborators
//! - Configuration file resolution
//! - Utility functions

pub mod config;
pub mod error;
pub mod events;
pub mod time;
pub mod track_id;

pub use error::{Error, Result};
pub use track_id::TrackId;
