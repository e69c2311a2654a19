pub mod session;
pub mod sync;

pub use session::{Session, SessionError, SessionRegistry, TurnOutcome};
pub use sync::{SurfaceConnector, SurfaceEnumeration, SurfaceShape, SyncReport, apply_manual_edits};
