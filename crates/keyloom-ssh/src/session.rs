// ABOUTME: Provisioning session: an identity plus an ordered list of pending operations.
// ABOUTME: Every operation is validated when added, before anything touches a host.

use crate::authorize::{AuthorizeLocalRequest, AuthorizeRequest};
use crate::error::Result;
use crate::generate::GenerateRequest;
use crate::install::InstallRequest;
use crate::paths::Identity;
use crate::publish::RecordRequest;

/// One provisioning operation queued on a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Authorize(AuthorizeRequest),
    AuthorizeLocal(AuthorizeLocalRequest),
    Install(InstallRequest),
    Generate(GenerateRequest),
    Record(RecordRequest),
}

impl Operation {
    /// Short name used in logs and reports.
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Authorize(_) => "authorize key",
            Operation::AuthorizeLocal(_) => "authorize key for localhost",
            Operation::Install(_) => "install key",
            Operation::Generate(_) => "generate key",
            Operation::Record(_) => "record public key",
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Operation::Authorize(req) => req.validate(),
            Operation::AuthorizeLocal(req) => req.validate(),
            Operation::Install(req) => req.validate(),
            Operation::Generate(req) => req.validate(),
            Operation::Record(req) => req.validate(),
        }
    }
}

/// Builder-style accumulator of operations against one identity.
///
/// ```
/// use keyloom_ssh::{GenerateRequest, Identity, KeyType, RecordRequest, Session};
///
/// let session = Session::new(Identity::new("alice", "web1"))
///     .generate_key(GenerateRequest::new(KeyType::Rsa))?
///     .record_public_key(RecordRequest::new(KeyType::Rsa).parameter_path("ssh/ring"))?;
/// assert_eq!(session.operations().len(), 2);
/// # Ok::<(), keyloom_ssh::ProvisionError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    identity: Identity,
    operations: Vec<Operation>,
}

impl Session {
    pub fn new(identity: Identity) -> Self {
        Self {
            identity,
            operations: Vec::new(),
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Validate and queue an operation.
    pub fn push(mut self, operation: Operation) -> Result<Self> {
        operation.validate()?;
        self.operations.push(operation);
        Ok(self)
    }

    pub fn authorize_key(self, request: AuthorizeRequest) -> Result<Self> {
        self.push(Operation::Authorize(request))
    }

    pub fn authorize_key_for_localhost(self, request: AuthorizeLocalRequest) -> Result<Self> {
        self.push(Operation::AuthorizeLocal(request))
    }

    pub fn install_key(self, request: InstallRequest) -> Result<Self> {
        self.push(Operation::Install(request))
    }

    pub fn generate_key(self, request: GenerateRequest) -> Result<Self> {
        self.push(Operation::Generate(request))
    }

    pub fn record_public_key(self, request: RecordRequest) -> Result<Self> {
        self.push(Operation::Record(request))
    }
}
