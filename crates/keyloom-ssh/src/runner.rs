// ABOUTME: Executes provisioning sessions against their hosts through a Transport.
// ABOUTME: Steps run strictly in order per host; separate hosts run concurrently.

use crate::error::{ProvisionError, Result};
use crate::generate::KeygenSettings;
use crate::paths::Identity;
use crate::publish::{record_public_key, RecordOutcome};
use crate::script::Script;
use crate::session::{Operation, Session};
use crate::store::ParamStore;
use crate::transport::Transport;
use futures::future::join_all;
use tracing::Instrument;

/// What one operation did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Scripts ran to completion; the host now matches the request.
    Applied { scripts: usize },
    /// A public key was written to the parameter store.
    Published { path: String, key: String },
    /// Nothing to do, e.g. the source key was blank.
    Skipped { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationReport {
    pub operation: &'static str,
    pub outcome: Outcome,
}

/// Per-operation outcomes of one session, in execution order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub identity: Identity,
    pub operations: Vec<OperationReport>,
}

impl RunReport {
    /// Keys published during the run.
    pub fn published_keys(&self) -> impl Iterator<Item = &str> {
        self.operations.iter().filter_map(|op| match &op.outcome {
            Outcome::Published { key, .. } => Some(key.as_str()),
            _ => None,
        })
    }
}

/// Runs sessions with a transport and a shared parameter store.
pub struct Runner<T, S> {
    transport: T,
    store: S,
    keygen: KeygenSettings,
}

impl<T: Transport, S: ParamStore> Runner<T, S> {
    pub fn new(transport: T, store: S) -> Self {
        Self {
            transport,
            store,
            keygen: KeygenSettings::default(),
        }
    }

    pub fn with_keygen(mut self, keygen: KeygenSettings) -> Self {
        self.keygen = keygen;
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Run every operation of `session` in order, stopping at the first error.
    pub async fn run(&self, session: &Session) -> Result<RunReport> {
        let span = tracing::info_span!("provision", identity = %session.identity());
        self.run_session(session).instrument(span).await
    }

    /// Run several sessions concurrently, one result per session in input order.
    ///
    /// A failure in one session does not stop the others.
    pub async fn run_all(&self, sessions: &[Session]) -> Vec<Result<RunReport>> {
        join_all(sessions.iter().map(|session| self.run(session))).await
    }

    async fn run_session(&self, session: &Session) -> Result<RunReport> {
        let identity = session.identity();
        let mut operations = Vec::with_capacity(session.operations().len());
        for operation in session.operations() {
            let outcome = self.run_operation(identity, operation).await?;
            tracing::info!(operation = operation.name(), outcome = ?outcome, "Operation complete");
            operations.push(OperationReport {
                operation: operation.name(),
                outcome,
            });
        }
        Ok(RunReport {
            identity: identity.clone(),
            operations,
        })
    }

    async fn run_operation(&self, identity: &Identity, operation: &Operation) -> Result<Outcome> {
        match operation {
            Operation::Authorize(req) => self.apply(identity, req.plan(identity)?).await,
            Operation::Install(req) => self.apply(identity, req.plan(identity)?).await,
            Operation::Generate(req) => {
                self.apply(identity, req.plan(identity, &self.keygen)?).await
            }
            Operation::AuthorizeLocal(req) => {
                let source = req.source_path(identity)?;
                let content = self
                    .transport
                    .read_file(&identity.host, &source)
                    .await?
                    .unwrap_or_default();
                let plan = req.plan_with_key(identity, &content)?;
                if plan.is_empty() {
                    tracing::warn!(source = %source, "Public key is blank, nothing to authorize");
                    return Ok(Outcome::Skipped {
                        reason: format!("public key {source} is blank"),
                    });
                }
                self.apply(identity, plan).await
            }
            Operation::Record(req) => {
                match record_public_key(&self.transport, &self.store, identity, req).await? {
                    RecordOutcome::Published { path, key } => Ok(Outcome::Published { path, key }),
                    RecordOutcome::Blank { source } => Ok(Outcome::Skipped {
                        reason: format!("public key {source} is blank"),
                    }),
                }
            }
        }
    }

    async fn apply(&self, identity: &Identity, plan: Vec<Script>) -> Result<Outcome> {
        let scripts = plan.len();
        for script in &plan {
            let output = self.transport.execute(&identity.host, script).await?;
            if !output.success() {
                return Err(ProvisionError::RemoteExecution {
                    host: identity.host.clone(),
                    step: script.label.clone(),
                    status: output.status,
                    stderr: output.stderr.trim().to_string(),
                });
            }
            tracing::debug!(step = %script.label, "Step converged");
        }
        Ok(Outcome::Applied { scripts })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authorize::AuthorizeRequest;
    use crate::generate::GenerateRequest;
    use crate::paths::KeyType;
    use crate::publish::RecordRequest;
    use crate::store::MemoryStore;
    use crate::testutil::FakeFleet;

    fn runner(fleet: &FakeFleet) -> Runner<FakeFleet, MemoryStore> {
        Runner::new(fleet.clone(), MemoryStore::new())
    }

    #[tokio::test]
    async fn test_failing_step_aborts_remaining_operations() {
        let fleet = FakeFleet::new();
        fleet.fail_keygen("web1");
        let session = Session::new(Identity::new("alice", "web1"))
            .generate_key(GenerateRequest::new(KeyType::Rsa))
            .unwrap()
            .authorize_key(AuthorizeRequest::new("ssh-rsa AAAA x"))
            .unwrap();

        let err = runner(&fleet).run(&session).await.unwrap_err();
        match err {
            ProvisionError::RemoteExecution { host, step, status, .. } => {
                assert_eq!(host, "web1");
                assert_eq!(step, "generate rsa key /home/alice/.ssh/id_rsa");
                assert_eq!(status, 1);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(fleet.node("web1", "/home/alice/.ssh/authorized_keys"), None);
    }

    #[tokio::test]
    async fn test_report_lists_outcomes_in_order() {
        let fleet = FakeFleet::new();
        let session = Session::new(Identity::new("alice", "web1"))
            .generate_key(GenerateRequest::new(KeyType::Rsa))
            .unwrap()
            .record_public_key(RecordRequest::new(KeyType::Rsa))
            .unwrap();

        let report = runner(&fleet).run(&session).await.unwrap();
        assert_eq!(report.operations.len(), 2);
        assert_eq!(report.operations[0].outcome, Outcome::Applied { scripts: 3 });
        assert!(matches!(
            report.operations[1].outcome,
            Outcome::Published { .. }
        ));
        assert_eq!(report.published_keys().count(), 1);
    }

    #[tokio::test]
    async fn test_run_all_isolates_host_failures() {
        let fleet = FakeFleet::new();
        fleet.fail_script("bad", "ensure directory");
        let sessions: Vec<_> = ["good", "bad"]
            .iter()
            .map(|host| {
                Session::new(Identity::new("alice", *host))
                    .authorize_key(AuthorizeRequest::new("ssh-rsa AAAA x"))
                    .unwrap()
            })
            .collect();

        let results = runner(&fleet).run_all(&sessions).await;
        assert!(results[0].is_ok());
        assert!(matches!(
            results[1],
            Err(ProvisionError::RemoteExecution { .. })
        ));
        assert_eq!(
            fleet.content("good", "/home/alice/.ssh/authorized_keys").as_deref(),
            Some("ssh-rsa AAAA x\n")
        );
    }
}
