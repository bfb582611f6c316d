// ABOUTME: Plans writing a supplied key pair into a user's SSH directory.
// ABOUTME: Always overwrites; the supplied content is the desired state.

use crate::error::{ProvisionError, Result};
use crate::paths::{public_key_path, Identity};
use crate::script::{Attrs, Script, Step, MODE_DIR, MODE_PRIVATE, MODE_PUBLIC};

/// Install a known private/public key pair.
#[derive(Clone, PartialEq, Eq)]
pub struct InstallRequest {
    /// File name inside the SSH directory; the public half gets `.pub`.
    pub key_name: String,
    pub private_key: String,
    pub public_key: String,
}

// Keeps private key material out of logs.
impl std::fmt::Debug for InstallRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstallRequest")
            .field("key_name", &self.key_name)
            .field("private_key", &"<redacted>")
            .field("public_key", &self.public_key)
            .finish()
    }
}

impl InstallRequest {
    pub fn new(
        key_name: impl Into<String>,
        private_key: impl Into<String>,
        public_key: impl Into<String>,
    ) -> Self {
        Self {
            key_name: key_name.into(),
            private_key: private_key.into(),
            public_key: public_key.into(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let name = self.key_name.trim();
        if name.is_empty() || name.contains('/') || name == "." || name == ".." {
            return Err(ProvisionError::config(format!(
                "invalid key name '{}'",
                self.key_name
            )));
        }
        if self.private_key.trim().is_empty() {
            return Err(ProvisionError::config("private key content is empty"));
        }
        if self.public_key.trim().is_empty() {
            return Err(ProvisionError::config("public key content is empty"));
        }
        Ok(())
    }

    pub fn plan(&self, identity: &Identity) -> Result<Vec<Script>> {
        self.validate()?;
        let ssh_dir = identity.ssh_dir();
        let private_path = format!("{ssh_dir}{}", self.key_name.trim());
        let public_path = public_key_path(&private_path);

        Ok(vec![
            Script::single(
                format!("ensure directory {ssh_dir}"),
                Step::EnsureDir {
                    path: ssh_dir.clone(),
                    attrs: Attrs::new(&identity.user, MODE_DIR),
                },
            ),
            Script::single(
                format!("install private key {private_path}"),
                Step::WriteFile {
                    path: private_path,
                    attrs: Attrs::new(&identity.user, MODE_PRIVATE),
                    content: with_trailing_newline(&self.private_key),
                },
            ),
            Script::single(
                format!("install public key {public_path}"),
                Step::WriteFile {
                    path: public_path,
                    attrs: Attrs::new(&identity.user, MODE_PUBLIC),
                    content: with_trailing_newline(self.public_key.trim()),
                },
            ),
        ])
    }
}

fn with_trailing_newline(content: &str) -> String {
    if content.ends_with('\n') {
        content.to_string()
    } else {
        format!("{content}\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_writes_both_halves_with_modes() {
        let id = Identity::new("bob", "db1");
        let plan = InstallRequest::new("deploy", "PRIVATE", "ssh-ed25519 AAAA bob@db1")
            .plan(&id)
            .unwrap();

        assert_eq!(plan.len(), 3);
        assert_eq!(
            plan[1].steps[0],
            Step::WriteFile {
                path: "/home/bob/.ssh/deploy".to_string(),
                attrs: Attrs::new("bob", MODE_PRIVATE),
                content: "PRIVATE\n".to_string(),
            }
        );
        assert_eq!(
            plan[2].steps[0],
            Step::WriteFile {
                path: "/home/bob/.ssh/deploy.pub".to_string(),
                attrs: Attrs::new("bob", MODE_PUBLIC),
                content: "ssh-ed25519 AAAA bob@db1\n".to_string(),
            }
        );
    }

    #[test]
    fn test_key_name_with_slash_rejected() {
        let err = InstallRequest::new("../id_rsa", "p", "q").validate().unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_empty_material_rejected() {
        assert!(InstallRequest::new("id", "", "q").validate().is_err());
        assert!(InstallRequest::new("id", "p", "  ").validate().is_err());
    }

    #[test]
    fn test_debug_redacts_private_key() {
        let req = InstallRequest::new("id", "TOP-SECRET", "ssh-rsa AAAA");
        let debug = format!("{req:?}");
        assert!(!debug.contains("TOP-SECRET"));
        assert!(debug.contains("<redacted>"));
    }
}
