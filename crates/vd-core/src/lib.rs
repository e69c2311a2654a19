pub mod action;
pub mod config;
pub mod decode;
pub mod engine;
pub mod error;
pub mod id;
pub mod layout;
pub mod model;
pub mod serialize;
pub mod snapshot;

pub use action::{Action, ActionType, BatchReport, Rejection, apply, apply_batch};
pub use config::LayoutConfig;
pub use decode::{DecodedBatch, decode_actions};
pub use engine::{LayeredEngine, LayoutEngine};
pub use error::{ConfigError, DecodeError, EncodeError, LayoutError};
pub use id::{EdgeId, NodeId};
pub use layout::{Bounds, LayoutCoordinator, LayoutResult, PlacedNode, StaleIds};
pub use model::*;
pub use serialize::{SyncMessage, deserialize, serialize};
pub use snapshot::{extract, extract_str};
