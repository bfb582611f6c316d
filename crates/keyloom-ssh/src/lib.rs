// ABOUTME: Idempotent SSH key provisioning for managed hosts.
// ABOUTME: Plans key operations as typed scripts and runs them over a pluggable transport.

//! # keyloom-ssh
//!
//! Converges SSH key material on target hosts: authorization lists, key
//! pairs, and published public keys. Re-running any operation leaves the
//! host as it was after the first run.
//!
//! ## Features
//!
//! - **Authorize**: append a public key to an authorization list once,
//!   optionally for another account or restricted by origin
//! - **Install**: place a known key pair with private/public permissions
//! - **Generate**: run `ssh-keygen` only when the key file is absent
//! - **Publish**: read a public key back and record it in a shared store,
//!   with set-union semantics for shared paths
//!
//! ## Example
//!
//! ```no_run
//! use keyloom_ssh::{
//!     AuthorizeLocalRequest, GenerateRequest, Identity, KeyType, MemoryStore, RecordRequest,
//!     Runner, Session, ShellTransport,
//! };
//!
//! # async fn demo() -> keyloom_ssh::Result<()> {
//! let session = Session::new(Identity::new("deploy", "web1.example.com"))
//!     .generate_key(GenerateRequest::new(KeyType::Ed25519))?
//!     .authorize_key_for_localhost(AuthorizeLocalRequest {
//!         key_type: KeyType::Ed25519,
//!         ..Default::default()
//!     })?
//!     .record_public_key(RecordRequest::new(KeyType::Ed25519).parameter_path("ssh/deployers"))?;
//!
//! let runner = Runner::new(ShellTransport::new(), MemoryStore::new());
//! let report = runner.run(&session).await?;
//! for key in report.published_keys() {
//!     println!("published {key}");
//! }
//! # Ok(())
//! # }
//! ```

mod authorize;
mod error;
mod fingerprint;
mod generate;
mod install;
mod paths;
mod predicate;
mod publish;
mod runner;
pub mod script;
mod session;
mod store;
pub mod testutil;
mod transport;

pub use authorize::{from_hosts, AuthorizeLocalRequest, AuthorizeRequest, LOCALHOST_RESTRICTION};
pub use error::{ProvisionError, Result};
pub use fingerprint::fingerprint;
pub use generate::{GenerateRequest, KeygenSettings, DEFAULT_KEYGEN_BINARY, DEFAULT_KEY_COMMENT};
pub use install::InstallRequest;
pub use paths::{
    key_file_name, parent_dir, public_key_path, Identity, KeyType, AUTHORIZED_KEYS_FILE,
    DEFAULT_HOME_ROOT, PUBLIC_KEY_SUFFIX, SSH_DIR_NAME,
};
pub use predicate::{key_fragment, key_material, key_present};
pub use publish::{record_public_key, slot_path, RecordOutcome, RecordRequest, SLOT_PREFIX};
pub use runner::{OperationReport, Outcome, RunReport, Runner};
pub use session::{Operation, Session};
pub use store::{FileStore, MemoryStore, ParamStore, ParamValue};
pub use transport::{is_local_host, ExecOutput, ShellTransport, Transport};
