// ABOUTME: Plans creating a key pair with the external generation tool when none exists.
// ABOUTME: Presence-only idempotency: an existing key file is never regenerated.

use crate::error::{ProvisionError, Result};
use crate::paths::{key_file_name, parent_dir, public_key_path, Identity, KeyType};
use crate::script::{
    Attrs, Check, KeygenInvocation, Script, Step, MODE_DIR, MODE_PRIVATE, MODE_PUBLIC,
};

/// Tool used when none is configured.
pub const DEFAULT_KEYGEN_BINARY: &str = "ssh-keygen";

/// Comment stamped on generated keys when the caller gives none.
pub const DEFAULT_KEY_COMMENT: &str = "generated by keyloom";

/// How the generation tool is invoked on targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeygenSettings {
    pub binary: String,
    pub default_comment: String,
}

impl Default for KeygenSettings {
    fn default() -> Self {
        Self {
            binary: DEFAULT_KEYGEN_BINARY.to_string(),
            default_comment: DEFAULT_KEY_COMMENT.to_string(),
        }
    }
}

/// Generate a key pair at a path unless one is already there.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct GenerateRequest {
    pub key_type: KeyType,
    /// Key file, relative to the SSH directory unless absolute. Defaults to
    /// the type's conventional name.
    pub file: Option<String>,
    /// Empty means no passphrase.
    pub passphrase: String,
    /// Skip creating the containing directory.
    pub no_dir: bool,
    pub comment: Option<String>,
}

impl std::fmt::Debug for GenerateRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerateRequest")
            .field("key_type", &self.key_type)
            .field("file", &self.file)
            .field("passphrase", &if self.passphrase.is_empty() { "" } else { "<redacted>" })
            .field("no_dir", &self.no_dir)
            .field("comment", &self.comment)
            .finish()
    }
}

impl GenerateRequest {
    pub fn new(key_type: KeyType) -> Self {
        Self {
            key_type,
            ..Default::default()
        }
    }

    pub fn file(mut self, file: impl Into<String>) -> Self {
        self.file = Some(file.into());
        self
    }

    pub fn passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.passphrase = passphrase.into();
        self
    }

    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn no_dir(mut self, no_dir: bool) -> Self {
        self.no_dir = no_dir;
        self
    }

    pub fn validate(&self) -> Result<()> {
        key_file_name(&self.key_type, self.file.as_deref())?;
        if self.passphrase.contains(['\n', '\r']) {
            return Err(ProvisionError::config("passphrase must not contain newlines"));
        }
        Ok(())
    }

    /// Absolute path of the private key this request targets.
    pub fn target_path(&self, identity: &Identity) -> Result<String> {
        let name = key_file_name(&self.key_type, self.file.as_deref())?;
        Ok(identity.key_path(&name))
    }

    pub fn plan(&self, identity: &Identity, settings: &KeygenSettings) -> Result<Vec<Script>> {
        self.validate()?;
        let path = self.target_path(identity)?;
        let public_path = public_key_path(&path);
        let comment = self
            .comment
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or(&settings.default_comment)
            .to_string();

        let mut plan = Vec::with_capacity(3);
        if !self.no_dir {
            let dir = parent_dir(&path);
            plan.push(Script::single(
                format!("ensure directory {dir}"),
                Step::EnsureDir {
                    path: dir.to_string(),
                    attrs: Attrs::new(&identity.user, MODE_DIR),
                },
            ));
        }
        plan.push(Script::single(
            format!("generate {} key {path}", self.key_type),
            Step::Unless {
                check: Check::PathExists(path.clone()),
                then: vec![Step::GenerateKey(KeygenInvocation {
                    binary: settings.binary.clone(),
                    path: path.clone(),
                    key_type: self.key_type.clone(),
                    passphrase: self.passphrase.clone(),
                    comment,
                })],
            },
        ));
        plan.push(Script::new(
            format!("secure key pair {path}"),
            vec![
                Step::SetAttributes {
                    path: path.clone(),
                    attrs: Attrs::new(&identity.user, MODE_PRIVATE),
                },
                // A private key copied in alone has no public half.
                Step::When {
                    check: Check::PathExists(public_path.clone()),
                    then: vec![Step::SetAttributes {
                        path: public_path,
                        attrs: Attrs::new(&identity.user, MODE_PUBLIC),
                    }],
                },
            ],
        ));
        Ok(plan)
    }
}
