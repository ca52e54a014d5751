//! High-level client tying configuration, session and reconciliation together.

use reqwest::Response;
use std::sync::Arc;
use tracing::info;

use crate::config::ClientConfig;
use crate::document::SchemaDocument;
use crate::error::Result;
use crate::pipeline::{ApiRequest, Requestor};
use crate::reconcile::{
    Objects, Reconciler, RunOutcome, UnknownExistencePolicy, UpsertOutcome,
};
use crate::resource::ResourceKind;
use crate::session::Session;
use crate::store::{FileTokenStore, TokenStore};
use crate::token::OAuthTokenSet;

/// Client for one host and space.
///
/// # Example
///
/// ```rust,no_run
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// use bdc_core::{BdcClient, ClientConfig, SchemaDocument};
///
/// let config = ClientConfig::new("https://tenant.eu10.hcs.cloud.sap", "MY_SPACE");
/// let client = BdcClient::new(config)?;
/// client.login().await?;
///
/// let document = SchemaDocument::from_json_str(&std::fs::read_to_string("table.json")?)?;
/// let outcome = client.local_tables().upsert(&document, "ZTEST_001").await?;
/// println!("{}", outcome.action);
/// # Ok(())
/// # }
/// ```
pub struct BdcClient {
    config: ClientConfig,
    session: Arc<Session>,
    reconciler: Reconciler<Arc<Session>>,
}

impl BdcClient {
    /// Create a client using the file token cache.
    ///
    /// The cache lives at `config.token_cache`, or `~/.catalyst-bdc/tokens.json`.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let store = match &config.token_cache {
            Some(path) => FileTokenStore::new(path),
            None => FileTokenStore::with_default_path()?,
        };
        Self::with_store(config, Arc::new(store))
    }

    /// Create a client with an explicit token store.
    pub fn with_store(config: ClientConfig, store: Arc<dyn TokenStore>) -> Result<Self> {
        config.validate()?;

        let mut session = Session::new(config.host.clone(), store);
        if let Some(oauth) = &config.oauth {
            session = session.with_oauth(oauth.clone());
        }
        if let Some(tokens) = &config.tokens {
            session = session.with_tokens(tokens.clone());
        }
        if let Some(port) = config.callback_port {
            session = session.with_callback_port(port);
        }

        let session = Arc::new(session);
        let reconciler = Reconciler::new(Arc::clone(&session), config.space.clone());

        Ok(Self {
            config,
            session,
            reconciler,
        })
    }

    /// Set the policy for inconclusive existence probes during upsert.
    pub fn with_unknown_policy(self, policy: UnknownExistencePolicy) -> Self {
        Self {
            reconciler: self.reconciler.with_unknown_policy(policy),
            ..self
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Log in, reusing or refreshing cached tokens when possible.
    pub async fn login(&self) -> Result<OAuthTokenSet> {
        self.session.login().await
    }

    /// Operations on objects of `kind`.
    pub fn objects(&self, kind: ResourceKind) -> Objects<'_, Arc<Session>> {
        self.reconciler.objects(kind)
    }

    pub fn views(&self) -> Objects<'_, Arc<Session>> {
        self.objects(ResourceKind::View)
    }

    pub fn local_tables(&self) -> Objects<'_, Arc<Session>> {
        self.objects(ResourceKind::LocalTable)
    }

    pub fn replication_flows(&self) -> Objects<'_, Arc<Session>> {
        self.objects(ResourceKind::ReplicationFlow)
    }

    /// Upsert a replication flow (and its target tables), then optionally run it.
    pub async fn upsert_replication_flow(
        &self,
        document: &SchemaDocument,
        name: &str,
        run_after: bool,
    ) -> Result<(UpsertOutcome, Option<RunOutcome>)> {
        let outcome = self.replication_flows().upsert(document, name).await?;
        if !run_after {
            return Ok((outcome, None));
        }

        info!("Running replication flow {} after upsert", name);
        let run = self.reconciler.run_replication_flow(name).await?;
        Ok((outcome, Some(run)))
    }

    /// Start a replication flow run.
    pub async fn run_replication_flow(&self, name: &str) -> Result<RunOutcome> {
        self.reconciler.run_replication_flow(name).await
    }

    /// Send an arbitrary request through the authenticated pipeline.
    pub async fn raw_request(&self, request: ApiRequest) -> Result<Response> {
        self.session.request(request).await
    }
}

impl std::fmt::Debug for BdcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BdcClient")
            .field("host", &self.config.host)
            .field("space", &self.config.space)
            .finish_non_exhaustive()
    }
}
