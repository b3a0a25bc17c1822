//! Project views for Tessera.
//!
//! A view is a secondary [`DataStore`](tessera_store::DataStore) attached to
//! a project for read access. This crate resolves locators to stores and
//! keeps them identity-stable while attached, and tells interested parties
//! when visible views come and go.
//!
//! # Modules
//!
//! - [`error`] -- Error types for view operations
//! - [`provider`] -- The [`ConnectionProvider`] trait and its implementations
//! - [`registry`] -- [`ViewRegistry`], one store per locator
//! - [`listener`] -- [`ListenerHub`] fan-out of view added/removed events

pub mod error;
pub mod listener;
pub mod provider;
pub mod registry;

pub use error::{ViewError, ViewResult};
pub use listener::{
    ChannelListener, DeliveryReport, ListenerError, ListenerFailure, ListenerHub, SubscriptionId,
    ViewEvent, ViewListener,
};
pub use provider::{ConnectionProvider, LocalProvider, StaticProvider};
pub use registry::{LocatorLease, Resolved, ViewEntry, ViewRegistry};
