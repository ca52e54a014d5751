//! # bdc-core
//!
//! Client library for deploying objects to a SAP Datasphere space.
//!
//! This crate provides:
//! - An OAuth session engine: browser login, a per-host token cache, silent
//!   refresh, and CSRF handling with a single retry on 403
//! - A reconciliation engine: create/read/update/delete/exists/upsert for
//!   views, local tables and replication flows, with replication flow
//!   targets upserted before the flow itself
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use bdc_core::{BdcClient, ClientConfig, SchemaDocument};
//!
//! async fn deploy(config: ClientConfig, csn: &str) -> Result<(), bdc_core::BdcError> {
//!     let client = BdcClient::new(config)?;
//!     client.login().await?;
//!
//!     let document = SchemaDocument::from_json_str(csn)?;
//!     let (outcome, _) = client
//!         .upsert_replication_flow(&document, "RF_SALES", true)
//!         .await?;
//!     println!("replication flow {}", outcome.action);
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod csrf;
pub mod document;
pub mod error;
pub mod oauth;
pub mod pipeline;
pub mod reconcile;
pub mod resource;
pub mod session;
pub mod store;
pub mod token;

// Re-export commonly used types at crate root
pub use client::BdcClient;

pub use config::{
    ClientConfig,
    ConfigError,
    OAuthConfig,
    OAuthSource,
};

pub use document::{
    SchemaDocument,
    DocumentError,
};

pub use error::{BdcError, Result};

pub use pipeline::{
    ApiRequest,
    Requestor,
};

pub use reconcile::{
    Existence,
    Objects,
    Reconciler,
    RunOutcome,
    UnknownExistencePolicy,
    UpsertAction,
    UpsertOutcome,
};

pub use resource::ResourceKind;

pub use session::Session;

pub use store::{
    Secret,
    TokenStore,
    StoreError,
    FileTokenStore,
    MemoryTokenStore,
};

pub use token::{OAuthTokenSet, RefreshedToken};
