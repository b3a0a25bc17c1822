//! Project coordinator for Tessera.
//!
//! A [`Project`] is the entry point for applications: it owns the primary
//! [`DataStore`](tessera_store::DataStore), attaches views into other
//! stores, releases consumers across all of them, and persists its view list
//! and keyed tool state.
//!
//! # Modules
//!
//! - [`project`] -- The [`Project`] coordinator and its reports
//! - [`state`] -- [`KeyedStateStore`], [`SaveState`], [`ToolTemplate`]
//! - [`metadata`] -- [`ProjectMetadata`] and the [`MetadataStore`] trait
//! - [`config`] -- [`ProjectConfig`], loadable from TOML
//! - [`logging`] -- Subscriber setup for embedding applications
//! - [`error`] -- Error types for project operations

pub mod config;
pub mod error;
pub mod logging;
pub mod metadata;
pub mod project;
pub mod state;

pub use config::ProjectConfig;
pub use error::{ProjectError, ProjectResult};
pub use logging::{init_logging, init_logging_at};
pub use metadata::{
    FileMetadataStore, InMemoryMetadataStore, MetadataStore, ProjectMetadata, SavedView,
};
pub use project::{CloseReport, OpenFile, Project, RestoreFailure, RestoreReport, ViewCloseFailure};
pub use state::{KeyedStateStore, SaveState, StateMap, TemplateMap, ToolTemplate};

// Re-export the types callers need to drive a project.
pub use tessera_store::{Closeable, DataStore, EnumerateFiles, LoadedObject};
pub use tessera_types::{ConsumerId, FileId, Locator};
pub use tessera_views::{
    ChannelListener, ConnectionProvider, LocalProvider, StaticProvider, SubscriptionId, ViewEvent,
    ViewListener,
};
