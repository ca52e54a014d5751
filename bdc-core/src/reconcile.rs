//! Object reconciliation.
//!
//! [`Reconciler`] maps create/read/update/delete/exists/upsert for each
//! [`ResourceKind`] onto the object API, and runs replication flows.
//! `upsert` is the only operation that looks at remote state before acting:
//! it probes existence and then either updates or creates. For replication
//! flows the target local tables are upserted first, in document order, and
//! any failure there stops before the flow is sent.

use serde::Serialize;
use std::fmt;
use tracing::{debug, info};

use crate::document::SchemaDocument;
use crate::error::{BdcError, Result};
use crate::pipeline::{check_response, encode_segment, ApiRequest, Requestor};
use crate::resource::ResourceKind;

/// Prefix of the per-space object API.
pub const OBJECTS_API: &str = "/dwaas-core/api/v1/spaces";

/// Prefix of the replication flow runtime API.
pub const REPLICATION_FLOW_API: &str = "/dwaas-core/replicationflow/space";

const SAVE_FLAGS: [&str; 3] = ["saveAnyway", "allowMissingDependencies", "deploy"];

/// Result of an existence probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Existence {
    /// The object was read successfully.
    Present,
    /// The service reported the object as missing (404 or 400).
    Absent,
    /// The probe failed for another reason; the object may or may not exist.
    Unknown { reason: String },
}

impl Existence {
    pub fn is_present(&self) -> bool {
        matches!(self, Self::Present)
    }
}

impl fmt::Display for Existence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Present => f.write_str("present"),
            Self::Absent => f.write_str("absent"),
            Self::Unknown { reason } => write!(f, "unknown ({})", reason),
        }
    }
}

/// What `upsert` does when the existence probe is inconclusive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UnknownExistencePolicy {
    /// Abort the upsert with [`BdcError::ExistenceUnknown`].
    #[default]
    Fail,
    /// Treat the object as absent and create it.
    AssumeAbsent,
}

/// Which branch an upsert took.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UpsertAction {
    Created,
    Updated,
}

impl fmt::Display for UpsertAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => f.write_str("created"),
            Self::Updated => f.write_str("updated"),
        }
    }
}

/// An upserted pre-dependency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependencyOutcome {
    pub kind: ResourceKind,
    pub name: String,
    pub action: UpsertAction,
}

/// Result of an upsert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpsertOutcome {
    pub action: UpsertAction,
    /// Response body of the create or update call.
    pub output: String,
    /// Dependencies upserted before the object itself, in order.
    pub dependencies: Vec<DependencyOutcome>,
}

/// Result of starting a replication flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The run was accepted; `run_status` is the service's `runStatus`.
    Started { status: u16, run_status: String },
    /// The service answered 409: a run is already in progress.
    AlreadyRunning,
}

/// Reconciles schema documents against one space.
pub struct Reconciler<R> {
    requestor: R,
    space: String,
    unknown_policy: UnknownExistencePolicy,
}

impl<R: Requestor> Reconciler<R> {
    pub fn new(requestor: R, space: impl Into<String>) -> Self {
        Self {
            requestor,
            space: space.into(),
            unknown_policy: UnknownExistencePolicy::default(),
        }
    }

    /// Set the policy for inconclusive existence probes during upsert.
    pub fn with_unknown_policy(mut self, policy: UnknownExistencePolicy) -> Self {
        self.unknown_policy = policy;
        self
    }

    pub fn space(&self) -> &str {
        &self.space
    }

    pub fn requestor(&self) -> &R {
        &self.requestor
    }

    /// Operations on objects of one kind.
    pub fn objects(&self, kind: ResourceKind) -> Objects<'_, R> {
        Objects {
            reconciler: self,
            kind,
        }
    }

    /// Start a replication flow run.
    ///
    /// 409 is reported as [`RunOutcome::AlreadyRunning`], 401 as
    /// [`BdcError::SessionExpired`].
    pub async fn run_replication_flow(&self, name: &str) -> Result<RunOutcome> {
        let operation = format!("Run replication flow \"{}\"", name);
        let request = ApiRequest::post(format!(
            "{}/{}/flows/{}/run",
            REPLICATION_FLOW_API,
            encode_segment(&self.space),
            encode_segment(name)
        ))
        .json_body(r#"{"isDirect":true}"#);

        let response = self.requestor.request(request).await?;
        let status = response.status().as_u16();
        match status {
            409 => {
                info!("Replication flow {} is already running", name);
                return Ok(RunOutcome::AlreadyRunning);
            }
            401 => return Err(BdcError::SessionExpired),
            _ => {}
        }

        let body = check_response(response, &operation).await?;
        let run_status = parse_run_status(&body).map_err(|message| BdcError::InvalidResponse {
            operation: operation.clone(),
            message,
        })?;

        info!(
            "Replication flow {} started (status {}, run status {})",
            name, status, run_status
        );
        Ok(RunOutcome::Started { status, run_status })
    }

    fn collection_path(&self, kind: ResourceKind) -> String {
        format!(
            "{}/{}/{}",
            OBJECTS_API,
            encode_segment(&self.space),
            kind.endpoint()
        )
    }

    fn object_path(&self, kind: ResourceKind, name: &str) -> String {
        format!("{}/{}", self.collection_path(kind), encode_segment(name))
    }
}

/// Operations on one [`ResourceKind`] in one space.
pub struct Objects<'a, R> {
    reconciler: &'a Reconciler<R>,
    kind: ResourceKind,
}

impl<R: Requestor> Objects<'_, R> {
    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    fn operation(&self, verb: &str, name: &str) -> String {
        format!("{} {} \"{}\"", verb, self.kind.label(), name)
    }

    fn payload(&self, document: &SchemaDocument, name: &str) -> Result<String> {
        let single = document.extract(self.kind.document_key(), name)?;
        Ok(single.to_json_string()?)
    }

    /// Send the named object from `document` as a new object.
    pub async fn create(&self, document: &SchemaDocument, name: &str) -> Result<String> {
        let body = self.payload(document, name)?;
        let request = with_save_flags(ApiRequest::post(
            self.reconciler.collection_path(self.kind),
        ))
        .json_body(body);

        debug!("Creating {} {}", self.kind.label(), name);
        let response = self.reconciler.requestor.request(request).await?;
        check_response(response, &self.operation("Create", name)).await
    }

    /// Fetch an object's current definition.
    pub async fn read(&self, name: &str) -> Result<String> {
        let request = ApiRequest::get(self.reconciler.object_path(self.kind, name));
        let response = self.reconciler.requestor.request(request).await?;
        check_response(response, &self.operation("Read", name)).await
    }

    /// Replace an existing object with the named object from `document`.
    pub async fn update(&self, document: &SchemaDocument, name: &str) -> Result<String> {
        let body = self.payload(document, name)?;
        let request = with_save_flags(ApiRequest::put(
            self.reconciler.object_path(self.kind, name),
        ))
        .json_body(body);

        debug!("Updating {} {}", self.kind.label(), name);
        let response = self.reconciler.requestor.request(request).await?;
        check_response(response, &self.operation("Update", name)).await
    }

    /// Delete an object, even if other objects depend on it.
    pub async fn delete(&self, name: &str) -> Result<String> {
        let request = ApiRequest::delete(self.reconciler.object_path(self.kind, name))
            .param("deleteAnyway", "true");

        debug!("Deleting {} {}", self.kind.label(), name);
        let response = self.reconciler.requestor.request(request).await?;
        check_response(response, &self.operation("Delete", name)).await
    }

    /// Probe whether an object exists. Never fails.
    pub async fn exists(&self, name: &str) -> Existence {
        let request = ApiRequest::get(self.reconciler.object_path(self.kind, name));
        let existence = match self.reconciler.requestor.request(request).await {
            Ok(response) => match response.status().as_u16() {
                200..=299 => Existence::Present,
                400 | 404 => Existence::Absent,
                status => Existence::Unknown {
                    reason: format!("HTTP {}", status),
                },
            },
            Err(e) => Existence::Unknown {
                reason: e.to_string(),
            },
        };

        debug!("{} {} is {}", self.kind.label(), name, existence);
        existence
    }

    /// Create or update the named object, upserting its pre-dependencies first.
    pub async fn upsert(&self, document: &SchemaDocument, name: &str) -> Result<UpsertOutcome> {
        let mut dependencies = Vec::new();

        if let Some(dependency_kind) = self.kind.pre_dependency() {
            let names = self.kind.resolve_dependencies(document, name);
            if !names.is_empty() {
                info!(
                    "Upserting {} {} dependencies of {} {}",
                    names.len(),
                    dependency_kind.label(),
                    self.kind.label(),
                    name
                );
            }

            let objects = self.reconciler.objects(dependency_kind);
            for dependency in names {
                let (action, _) = objects.upsert_single(document, &dependency).await?;
                dependencies.push(DependencyOutcome {
                    kind: dependency_kind,
                    name: dependency,
                    action,
                });
            }
        }

        let (action, output) = self.upsert_single(document, name).await?;
        Ok(UpsertOutcome {
            action,
            output,
            dependencies,
        })
    }

    async fn upsert_single(
        &self,
        document: &SchemaDocument,
        name: &str,
    ) -> Result<(UpsertAction, String)> {
        // fail on a bad document before probing the service
        self.payload(document, name)?;

        let present = match self.exists(name).await {
            Existence::Present => true,
            Existence::Absent => false,
            Existence::Unknown { reason } => match self.reconciler.unknown_policy {
                UnknownExistencePolicy::Fail => {
                    return Err(BdcError::ExistenceUnknown {
                        operation: self.operation("Upsert", name),
                        reason,
                    });
                }
                UnknownExistencePolicy::AssumeAbsent => false,
            },
        };

        let outcome = if present {
            (UpsertAction::Updated, self.update(document, name).await?)
        } else {
            (UpsertAction::Created, self.create(document, name).await?)
        };
        info!("{} {} {}", self.kind.label(), name, outcome.0);
        Ok(outcome)
    }
}

/// Pull the string `runStatus` out of a run response body.
fn parse_run_status(body: &str) -> std::result::Result<String, String> {
    let value: serde_json::Value = serde_json::from_str(body).map_err(|e| e.to_string())?;
    value
        .get("runStatus")
        .and_then(|s| s.as_str())
        .map(str::to_string)
        .ok_or_else(|| "missing string \"runStatus\"".to_string())
}

fn with_save_flags(request: ApiRequest) -> ApiRequest {
    SAVE_FLAGS
        .iter()
        .fold(request, |request, flag| request.param(*flag, "true"))
}
