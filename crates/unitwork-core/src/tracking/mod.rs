//! Entity change tracking.
//!
//! The persistence layer reports entity lifecycle events through the narrow
//! [`EntityObserver`] interface. A [`ChangeCollector`] owned by the running
//! transaction accumulates them and, at pre-commit, builds the net
//! [`ChangeSet`](unitwork_proto::ChangeSet).

mod collector;
mod event;
mod policy;

pub use collector::{collect, ChangeCollector};
pub use event::{EntityEvent, EntityObserver, Observed, ReadFault};
pub use policy::TrackingPolicy;
