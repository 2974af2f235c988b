//! Core domain models and session logic for schema design

pub mod codec;
pub mod config;
pub mod dirty;
mod error;
pub mod history;
pub mod model;
pub mod persistence;
pub mod positions;
mod schema;
pub mod session;
#[cfg(test)]
mod tests;
pub mod validation;

pub use codec::{Decoded, MetadataCodec};
pub use config::SessionConfig;
pub use error::*;
pub use history::{History, Snapshot};
pub use model::{DeletePolicy, EntityModel, ModelRules, TableChanges};
pub use positions::{PositionMap, PositionStore, Viewport};
pub use schema::*;
pub use session::{
    MutationOutcome, NavigationChoice, NavigationDecision, NavigationGuard, Operation,
    SaveOutcome, SelectOutcome, SelectTicket, SessionEngine, SessionState,
};
pub use validation::ValidationLevel;
