// ABOUTME: Canonical SSH paths for managed accounts and default key file names.
// ABOUTME: Pure functions only; nothing here touches a host.

use crate::error::{ProvisionError, Result};
use std::fmt;
use std::str::FromStr;

/// Name of the per-user SSH directory under the home directory.
pub const SSH_DIR_NAME: &str = ".ssh";

/// File name of the authorization list inside the SSH directory.
pub const AUTHORIZED_KEYS_FILE: &str = "authorized_keys";

/// Suffix appended to a private key path to find its public half.
pub const PUBLIC_KEY_SUFFIX: &str = ".pub";

/// Parent of non-root home directories unless configured otherwise.
pub const DEFAULT_HOME_ROOT: &str = "/home";

/// The account whose SSH material is being managed: a user on a host.
///
/// Home directories are derived, not looked up on the target: `root` lives in
/// `/root` and everyone else in `<home_root>/<user>`. Accounts whose home is
/// elsewhere (service users under `/var/lib`, for instance) need
/// [`Identity::with_home`], otherwise keys land in a directory sshd never reads.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity {
    pub user: String,
    pub host: String,
    home_root: String,
    home: Option<String>,
}

impl Identity {
    pub fn new(user: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            host: host.into(),
            home_root: DEFAULT_HOME_ROOT.to_string(),
            home: None,
        }
    }

    /// Use a different parent directory for non-root homes on this host.
    pub fn with_home_root(mut self, home_root: impl Into<String>) -> Self {
        let root: String = home_root.into();
        self.home_root = root.trim_end_matches('/').to_string();
        self
    }

    /// Pin the home directory of this identity's own user.
    ///
    /// Other accounts named by a request still use the derived location.
    pub fn with_home(mut self, home: impl Into<String>) -> Self {
        let home: String = home.into();
        self.home = Some(home.trim_end_matches('/').to_string());
        self
    }

    /// Home directory of `user` on this identity's host.
    pub fn home_of(&self, user: &str) -> String {
        if let Some(home) = self.home.as_deref().filter(|_| user == self.user) {
            home.to_string()
        } else if user == "root" {
            "/root".to_string()
        } else {
            format!("{}/{}", self.home_root, user)
        }
    }

    /// SSH directory of `user` on this identity's host, ending in `/`.
    pub fn ssh_dir_of(&self, user: &str) -> String {
        format!("{}/{}/", self.home_of(user), SSH_DIR_NAME)
    }

    /// SSH directory of this identity's own user, ending in `/`.
    pub fn ssh_dir(&self) -> String {
        self.ssh_dir_of(&self.user)
    }

    /// Resolve a key file name against this identity's SSH directory.
    ///
    /// Absolute paths are returned unchanged.
    pub fn key_path(&self, file: &str) -> String {
        if file.starts_with('/') {
            file.to_string()
        } else {
            format!("{}{}", self.ssh_dir(), file)
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.user, self.host)
    }
}

/// SSH key algorithms understood by the generator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum KeyType {
    Rsa1,
    #[default]
    Rsa,
    Dsa,
    Ecdsa,
    Ed25519,
    /// Passed through to the generation tool verbatim; has no default file.
    Other(String),
}

impl KeyType {
    /// Name passed to the generation tool's `-t` flag.
    pub fn as_str(&self) -> &str {
        match self {
            KeyType::Rsa1 => "rsa1",
            KeyType::Rsa => "rsa",
            KeyType::Dsa => "dsa",
            KeyType::Ecdsa => "ecdsa",
            KeyType::Ed25519 => "ed25519",
            KeyType::Other(name) => name,
        }
    }

    /// The conventional private key file name for this type, if any.
    pub fn default_file_name(&self) -> Option<&'static str> {
        match self {
            KeyType::Rsa1 => Some("identity"),
            KeyType::Rsa => Some("id_rsa"),
            KeyType::Dsa => Some("id_dsa"),
            KeyType::Ecdsa => Some("id_ecdsa"),
            KeyType::Ed25519 => Some("id_ed25519"),
            KeyType::Other(_) => None,
        }
    }
}

impl FromStr for KeyType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "rsa1" => KeyType::Rsa1,
            "rsa" => KeyType::Rsa,
            "dsa" => KeyType::Dsa,
            "ecdsa" => KeyType::Ecdsa,
            "ed25519" => KeyType::Ed25519,
            _ => KeyType::Other(s.trim().to_string()),
        })
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pick the key file name: an explicit one wins, otherwise the type's default.
///
/// # Errors
/// Returns `ProvisionError::Configuration` when the type has no default and
/// no explicit file was given.
pub fn key_file_name(key_type: &KeyType, file: Option<&str>) -> Result<String> {
    match file.map(str::trim).filter(|f| !f.is_empty()) {
        Some(file) => Ok(file.to_string()),
        None => key_type.default_file_name().map(str::to_string).ok_or_else(|| {
            ProvisionError::config(format!(
                "key type '{key_type}' has no default file name; pass an explicit file"
            ))
        }),
    }
}

/// Public half of a private key path.
pub fn public_key_path(private_path: &str) -> String {
    format!("{private_path}{PUBLIC_KEY_SUFFIX}")
}

/// Directory containing `path`, without a trailing separator.
pub fn parent_dir(path: &str) -> &str {
    match path.trim_end_matches('/').rsplit_once('/') {
        Some(("", _)) => "/",
        Some((parent, _)) => parent,
        None => ".",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ssh_dir_for_regular_user() {
        let id = Identity::new("alice", "web1");
        assert_eq!(id.ssh_dir(), "/home/alice/.ssh/");
        assert!(id.ssh_dir().ends_with('/'));
    }

    #[test]
    fn test_ssh_dir_for_root() {
        let id = Identity::new("root", "web1");
        assert_eq!(id.ssh_dir(), "/root/.ssh/");
    }

    #[test]
    fn test_custom_home_root() {
        let id = Identity::new("carol", "mac1").with_home_root("/Users/");
        assert_eq!(id.ssh_dir(), "/Users/carol/.ssh/");
        assert_eq!(id.ssh_dir_of("dave"), "/Users/dave/.ssh/");
    }

    #[test]
    fn test_explicit_home_for_service_account() {
        let id = Identity::new("git", "forge1").with_home("/var/lib/git/");
        assert_eq!(id.home_of("git"), "/var/lib/git");
        assert_eq!(id.ssh_dir(), "/var/lib/git/.ssh/");
        assert_eq!(id.key_path("id_ed25519"), "/var/lib/git/.ssh/id_ed25519");
        // Other accounts keep the derived layout.
        assert_eq!(id.ssh_dir_of("alice"), "/home/alice/.ssh/");
        assert_eq!(id.ssh_dir_of("root"), "/root/.ssh/");
    }

    #[test]
    fn test_explicit_home_overrides_root_default() {
        let id = Identity::new("root", "web1").with_home("/srv/admin");
        assert_eq!(id.ssh_dir(), "/srv/admin/.ssh/");
    }

    #[test]
    fn test_key_path_relative_and_absolute() {
        let id = Identity::new("bob", "db1");
        assert_eq!(id.key_path("id_dsa"), "/home/bob/.ssh/id_dsa");
        assert_eq!(id.key_path("/srv/keys/deploy"), "/srv/keys/deploy");
    }

    #[test]
    fn test_default_file_names() {
        assert_eq!(KeyType::Rsa1.default_file_name(), Some("identity"));
        assert_eq!(KeyType::Rsa.default_file_name(), Some("id_rsa"));
        assert_eq!(KeyType::Dsa.default_file_name(), Some("id_dsa"));
        assert_eq!(KeyType::Other("xmss".into()).default_file_name(), None);
    }

    #[test]
    fn test_key_type_parse() {
        assert_eq!("RSA".parse::<KeyType>().unwrap(), KeyType::Rsa);
        assert_eq!("dsa".parse::<KeyType>().unwrap(), KeyType::Dsa);
        assert_eq!(
            "xmss".parse::<KeyType>().unwrap(),
            KeyType::Other("xmss".to_string())
        );
        assert_eq!(KeyType::default(), KeyType::Rsa);
    }

    #[test]
    fn test_key_file_name_prefers_explicit() {
        let name = key_file_name(&KeyType::Rsa, Some("deploy_key")).unwrap();
        assert_eq!(name, "deploy_key");
    }

    #[test]
    fn test_key_file_name_unknown_type_without_file_fails() {
        let err = key_file_name(&KeyType::Other("xmss".into()), None).unwrap_err();
        assert!(err.is_configuration());

        let err = key_file_name(&KeyType::Other("xmss".into()), Some("  ")).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_public_key_path() {
        assert_eq!(public_key_path("/home/a/.ssh/id_rsa"), "/home/a/.ssh/id_rsa.pub");
    }

    #[test]
    fn test_parent_dir() {
        assert_eq!(parent_dir("/home/a/.ssh/id_rsa"), "/home/a/.ssh");
        assert_eq!(parent_dir("/home/a/.ssh/"), "/home/a");
        assert_eq!(parent_dir("/id_rsa"), "/");
        assert_eq!(parent_dir("id_rsa"), ".");
    }
}
