//! # vigil-core
//!
//! Shared vocabulary for the submission-event relay: connection ids,
//! identities, classification labels and the access predicate, submission
//! events, the publish/subscribe seam, and the relay error taxonomy.

pub mod bus;
pub mod classification;
pub mod errors;
pub mod events;
pub mod identity;
pub mod ids;

pub use bus::{BroadcastBus, BusError, EventBus, Subscription};
pub use classification::{authorize, AccessPolicy, ClassificationLabel, LevelPolicy};
pub use errors::RelayError;
pub use events::{SubmissionEvent, SUBMISSIONS_TOPIC};
pub use identity::{ConnectionIdentity, UNAUTHENTICATED_USER};
pub use ids::{ConnectionId, SessionToken};
