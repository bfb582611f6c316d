// ABOUTME: Plans appending a public key to an authorization list exactly once.
// ABOUTME: Supports granting access to another user's account and origin restrictions.

use crate::error::{ProvisionError, Result};
use crate::paths::{key_file_name, public_key_path, Identity, KeyType, AUTHORIZED_KEYS_FILE};
use crate::predicate::{key_fragment, key_present};
use crate::script::{Attrs, Script, Step, MODE_DIR, MODE_PUBLIC};

/// Restriction applied to keys authorized for loopback use only.
pub const LOCALHOST_RESTRICTION: &str = "from=\"127.0.0.1,::1,localhost\"";

/// Build a `from="..."` restriction clause for the given origins.
pub fn from_hosts<S: AsRef<str>>(hosts: &[S]) -> String {
    let joined = hosts
        .iter()
        .map(|h| h.as_ref().trim())
        .filter(|h| !h.is_empty())
        .collect::<Vec<_>>()
        .join(",");
    format!("from=\"{joined}\"")
}

/// Append a supplied public key to an authorization list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizeRequest {
    /// Public key line to authorize.
    pub key: String,
    /// Authorization list, relative to the target user's SSH directory
    /// unless absolute.
    pub auth_file: String,
    /// Grant access to this user's account instead of the identity's own.
    pub for_user: Option<String>,
    /// Options clause placed before the key, e.g. `from="10.0.0.1"`.
    pub restriction: Option<String>,
}

impl AuthorizeRequest {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            auth_file: AUTHORIZED_KEYS_FILE.to_string(),
            for_user: None,
            restriction: None,
        }
    }

    pub fn auth_file(mut self, file: impl Into<String>) -> Self {
        self.auth_file = file.into();
        self
    }

    pub fn for_user(mut self, user: impl Into<String>) -> Self {
        self.for_user = Some(user.into());
        self
    }

    pub fn restriction(mut self, clause: impl Into<String>) -> Self {
        self.restriction = Some(clause.into());
        self
    }

    /// Check parameters without building a plan.
    pub fn validate(&self) -> Result<()> {
        let fragment = key_fragment(&self.key)?;
        if fragment.is_none() {
            return Err(ProvisionError::config("cannot authorize an empty public key"));
        }
        validate_common(&self.auth_file, self.for_user.as_deref())?;
        normalized_restriction(self.restriction.as_deref())?;
        Ok(())
    }

    /// Build the steps that converge the authorization list.
    pub fn plan(&self, identity: &Identity) -> Result<Vec<Script>> {
        self.validate()?;
        let fragment = key_fragment(&self.key)?
            .ok_or_else(|| ProvisionError::config("cannot authorize an empty public key"))?;
        let restriction = normalized_restriction(self.restriction.as_deref())?;
        Ok(plan_append(
            identity,
            self.for_user.as_deref(),
            &self.auth_file,
            &fragment,
            restriction.as_deref(),
        ))
    }
}

/// Authorize a public key that already exists on the target for loopback use.
///
/// The key content is read from the host first; see
/// [`AuthorizeLocalRequest::plan_with_key`] for the second stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizeLocalRequest {
    pub key_type: KeyType,
    /// Private key file name whose `.pub` half is authorized; defaults to the
    /// type's conventional name.
    pub file: Option<String>,
    pub auth_file: String,
    pub for_user: Option<String>,
}

impl Default for AuthorizeLocalRequest {
    fn default() -> Self {
        Self {
            key_type: KeyType::default(),
            file: None,
            auth_file: AUTHORIZED_KEYS_FILE.to_string(),
            for_user: None,
        }
    }
}

impl AuthorizeLocalRequest {
    pub fn validate(&self) -> Result<()> {
        key_file_name(&self.key_type, self.file.as_deref())?;
        validate_common(&self.auth_file, self.for_user.as_deref())
    }

    /// Path of the public key to read, on the identity's own account.
    pub fn source_path(&self, identity: &Identity) -> Result<String> {
        let name = key_file_name(&self.key_type, self.file.as_deref())?;
        Ok(public_key_path(&identity.key_path(&name)))
    }

    /// Second stage: plan the append once the key content has been read.
    ///
    /// Returns an empty plan for blank content.
    pub fn plan_with_key(&self, identity: &Identity, content: &str) -> Result<Vec<Script>> {
        self.validate()?;
        match key_fragment(content)? {
            Some(fragment) => Ok(plan_append(
                identity,
                self.for_user.as_deref(),
                &self.auth_file,
                &fragment,
                Some(LOCALHOST_RESTRICTION),
            )),
            None => Ok(Vec::new()),
        }
    }
}

fn validate_common(auth_file: &str, for_user: Option<&str>) -> Result<()> {
    if auth_file.trim().is_empty() {
        return Err(ProvisionError::config("authorization file name is empty"));
    }
    if let Some(user) = for_user {
        if user.trim().is_empty() || user.contains('/') {
            return Err(ProvisionError::config(format!(
                "invalid target user '{user}'"
            )));
        }
    }
    Ok(())
}

fn normalized_restriction(restriction: Option<&str>) -> Result<Option<String>> {
    match restriction.map(str::trim) {
        None | Some("") => Ok(None),
        Some(clause) if clause.contains(['\n', '\r']) => Err(ProvisionError::config(
            "restriction clause must be a single line",
        )),
        Some(clause) => Ok(Some(clause.to_string())),
    }
}

fn plan_append(
    identity: &Identity,
    for_user: Option<&str>,
    auth_file: &str,
    fragment: &str,
    restriction: Option<&str>,
) -> Vec<Script> {
    let target_user = for_user.unwrap_or(&identity.user);
    let ssh_dir = identity.ssh_dir_of(target_user);
    let auth_path = if auth_file.starts_with('/') {
        auth_file.to_string()
    } else {
        format!("{ssh_dir}{auth_file}")
    };
    let line = match restriction {
        Some(clause) => format!("{clause} {fragment}"),
        None => fragment.to_string(),
    };

    vec![
        Script::single(
            format!("ensure directory {ssh_dir}"),
            Step::EnsureDir {
                path: ssh_dir.clone(),
                attrs: Attrs::new(target_user, MODE_DIR),
            },
        ),
        Script::single(
            format!("ensure file {auth_path}"),
            Step::EnsureFile {
                path: auth_path.clone(),
                attrs: Attrs::new(target_user, MODE_PUBLIC),
            },
        ),
        Script::single(
            format!("authorize key in {auth_path}"),
            Step::Unless {
                check: key_present(&auth_path, fragment),
                then: vec![Step::AppendLine {
                    path: auth_path.clone(),
                    line,
                }],
            },
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::Check;

    const KEY: &str = "ssh-rsa AAAAB3NzaC1yc2E alice@laptop";
    const MATERIAL: &str = "ssh-rsa AAAAB3NzaC1yc2E";

    #[test]
    fn test_plan_for_own_account() {
        let id = Identity::new("alice", "web1");
        let plan = AuthorizeRequest::new(format!("  {KEY}\n")).plan(&id).unwrap();
        assert_eq!(plan.len(), 3);
        assert_eq!(
            plan[0].steps[0],
            Step::EnsureDir {
                path: "/home/alice/.ssh/".to_string(),
                attrs: Attrs::new("alice", MODE_DIR),
            }
        );
        assert_eq!(
            plan[1].steps[0],
            Step::EnsureFile {
                path: "/home/alice/.ssh/authorized_keys".to_string(),
                attrs: Attrs::new("alice", MODE_PUBLIC),
            }
        );
        assert_eq!(
            plan[2].steps[0],
            Step::Unless {
                check: Check::FileContains {
                    path: "/home/alice/.ssh/authorized_keys".to_string(),
                    fragment: MATERIAL.to_string(),
                },
                then: vec![Step::AppendLine {
                    path: "/home/alice/.ssh/authorized_keys".to_string(),
                    line: KEY.to_string(),
                }],
            }
        );
    }

    #[test]
    fn test_plan_for_other_user_with_restriction() {
        let id = Identity::new("alice", "web1");
        let plan = AuthorizeRequest::new(KEY)
            .for_user("deploy")
            .restriction(from_hosts(&["10.0.0.5"]))
            .plan(&id)
            .unwrap();

        match &plan[2].steps[0] {
            Step::Unless { check, then } => {
                assert_eq!(
                    check,
                    &Check::FileContains {
                        path: "/home/deploy/.ssh/authorized_keys".to_string(),
                        fragment: MATERIAL.to_string(),
                    }
                );
                assert_eq!(
                    then[0],
                    Step::AppendLine {
                        path: "/home/deploy/.ssh/authorized_keys".to_string(),
                        line: format!("from=\"10.0.0.5\" {KEY}"),
                    }
                );
            }
            other => panic!("expected conditional append, got {other:?}"),
        }
        assert!(matches!(
            &plan[0].steps[0],
            Step::EnsureDir { attrs, .. } if attrs.owner == "deploy"
        ));
    }

    #[test]
    fn test_absolute_auth_file() {
        let id = Identity::new("git", "forge");
        let plan = AuthorizeRequest::new(KEY)
            .auth_file("/etc/ssh/keys/git")
            .plan(&id)
            .unwrap();
        assert_eq!(plan[1].label, "ensure file /etc/ssh/keys/git");
    }

    #[test]
    fn test_empty_key_rejected() {
        let err = AuthorizeRequest::new("   ").validate().unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_bad_target_user_rejected() {
        let err = AuthorizeRequest::new(KEY).for_user("../etc").validate().unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_multiline_restriction_rejected() {
        let err = AuthorizeRequest::new(KEY)
            .restriction("from=\"a\"\ncommand=\"sh\"")
            .validate()
            .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_from_hosts() {
        assert_eq!(from_hosts(&["a", " b ", ""]), "from=\"a,b\"");
    }

    #[test]
    fn test_local_source_path_and_plan() {
        let id = Identity::new("bob", "db1");
        let req = AuthorizeLocalRequest::default();
        assert_eq!(req.source_path(&id).unwrap(), "/home/bob/.ssh/id_rsa.pub");

        let plan = req.plan_with_key(&id, "ssh-rsa BBBB bob@db1\n").unwrap();
        match &plan[2].steps[0] {
            Step::Unless { then, .. } => assert_eq!(
                then[0],
                Step::AppendLine {
                    path: "/home/bob/.ssh/authorized_keys".to_string(),
                    line: format!("{LOCALHOST_RESTRICTION} ssh-rsa BBBB bob@db1"),
                }
            ),
            other => panic!("unexpected step {other:?}"),
        }
    }

    #[test]
    fn test_local_plan_blank_key_is_empty() {
        let id = Identity::new("bob", "db1");
        let plan = AuthorizeLocalRequest::default().plan_with_key(&id, "\n").unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn test_local_unknown_type_requires_file() {
        let req = AuthorizeLocalRequest {
            key_type: KeyType::Other("xmss".to_string()),
            ..Default::default()
        };
        assert!(req.validate().unwrap_err().is_configuration());
    }
}
