pub mod command;
pub mod diff;
pub mod errors;
pub mod events;
pub mod ids;
pub mod snapshot;
pub mod update;

pub use command::{ActionRequest, CommandEnvelope};
pub use diff::{FieldChange, ScalarChange, SemanticEvent, SemanticEventType, StateDiff};
pub use errors::ParseError;
pub use events::ConsumerEvent;
pub use ids::{CommandId, SessionId, UpdateId};
pub use snapshot::{Bounds, ElementDescriptor, StateSnapshot, StateSummary};
pub use update::{ActionResult, StateUpdateEnvelope};
