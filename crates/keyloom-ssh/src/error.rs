// ABOUTME: Error types for provisioning operations using thiserror.
// ABOUTME: Separates configuration, remote execution, transfer, and state store failures.

use thiserror::Error;

/// Errors that can occur while planning or running provisioning operations.
#[derive(Error, Debug)]
pub enum ProvisionError {
    /// Caller supplied insufficient or contradictory parameters.
    ///
    /// Raised before anything touches the target host.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A step failed on the target host.
    #[error("step '{step}' failed on {host} (status {status}): {stderr}")]
    RemoteExecution {
        host: String,
        step: String,
        status: i32,
        stderr: String,
    },

    /// The command transport could not be started or talked to.
    #[error("failed to run step '{step}' on {host}: {source}")]
    Spawn {
        host: String,
        step: String,
        #[source]
        source: std::io::Error,
    },

    /// Reading or writing file content on the target failed.
    #[error("failed to transfer {path} on {host}: {message}")]
    Transfer {
        host: String,
        path: String,
        message: String,
    },

    /// The shared state store rejected a read or write.
    #[error("state store update of {path} failed: {message}")]
    StateStore { path: String, message: String },
}

impl ProvisionError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Whether this error was detected before any remote interaction.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}

/// Result type alias using ProvisionError.
pub type Result<T> = std::result::Result<T, ProvisionError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_configuration_error_display() {
        let err = ProvisionError::config("key type 'xmss' has no default file name");
        let display = err.to_string();
        assert!(display.contains("configuration error"));
        assert!(display.contains("xmss"));
        assert!(err.is_configuration());
    }

    #[test]
    fn test_remote_execution_error_display() {
        let err = ProvisionError::RemoteExecution {
            host: "web1".to_string(),
            step: "generate id_rsa".to_string(),
            status: 127,
            stderr: "ssh-keygen: not found".to_string(),
        };
        let display = err.to_string();
        assert!(display.contains("generate id_rsa"));
        assert!(display.contains("web1"));
        assert!(display.contains("127"));
        assert!(display.contains("ssh-keygen: not found"));
        assert!(!err.is_configuration());
    }

    #[test]
    fn test_transfer_error_display() {
        let err = ProvisionError::Transfer {
            host: "db1".to_string(),
            path: "/home/bob/.ssh/id_rsa.pub".to_string(),
            message: "permission denied".to_string(),
        };
        let display = err.to_string();
        assert!(display.contains("failed to transfer"));
        assert!(display.contains("/home/bob/.ssh/id_rsa.pub"));
    }

    #[test]
    fn test_state_store_error_display() {
        let err = ProvisionError::StateStore {
            path: "ssh/authorized".to_string(),
            message: "disk full".to_string(),
        };
        let display = err.to_string();
        assert!(display.contains("ssh/authorized"));
        assert!(display.contains("disk full"));
    }

    #[test]
    fn test_error_source_spawn() {
        use std::error::Error;

        let err = ProvisionError::Spawn {
            host: "web1".to_string(),
            step: "ensure dir".to_string(),
            source: io::Error::new(io::ErrorKind::NotFound, "ssh not found"),
        };
        assert!(err.source().is_some());
    }

    #[test]
    fn test_error_no_source_configuration() {
        use std::error::Error;

        let err = ProvisionError::config("missing file");
        assert!(err.source().is_none());
    }
}
