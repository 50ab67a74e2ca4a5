//! Change set publication.
//!
//! A [`ListenerRegistry`] is assembled once at startup and handed to a
//! [`ChangePublisher`], which delivers each committing transaction's change
//! set to the listeners before the commit is finalised.

mod listener;
mod publisher;
mod registry;
mod scope;

pub use listener::ChangeListener;
pub use publisher::ChangePublisher;
pub use registry::ListenerRegistry;
pub use scope::CommitScope;
