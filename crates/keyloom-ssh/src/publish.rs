// ABOUTME: Reads a public key off a target and records it in the shared parameter store.
// ABOUTME: Named paths accumulate a set of keys; per-identity slots hold the latest key.

use crate::error::{ProvisionError, Result};
use crate::fingerprint::fingerprint;
use crate::paths::{key_file_name, public_key_path, Identity, KeyType};
use crate::store::{ParamStore, ParamValue};
use crate::transport::Transport;
use std::collections::BTreeSet;

/// Prefix of per-identity slots in the parameter store.
pub const SLOT_PREFIX: &str = "ssh";

/// Record a host's public key for other provisioning runs to consume.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordRequest {
    pub key_type: KeyType,
    /// Private key file name; `.pub` is appended. Defaults to the type's
    /// conventional name.
    pub file: Option<String>,
    /// Union the key into the set at this store path instead of the
    /// identity's own slot.
    pub parameter_path: Option<String>,
}

impl RecordRequest {
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

    pub fn parameter_path(mut self, path: impl Into<String>) -> Self {
        self.parameter_path = Some(path.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        key_file_name(&self.key_type, self.file.as_deref())?;
        if let Some(path) = &self.parameter_path {
            if path.trim().is_empty() {
                return Err(ProvisionError::config("parameter path is empty"));
            }
        }
        Ok(())
    }

    /// Public key path read on the target.
    pub fn source_path(&self, identity: &Identity) -> Result<String> {
        let name = key_file_name(&self.key_type, self.file.as_deref())?;
        Ok(public_key_path(&identity.key_path(&name)))
    }

    /// Store path the key will be written to.
    pub fn destination(&self, identity: &Identity) -> Result<String> {
        match self.parameter_path.as_deref().map(str::trim) {
            Some(path) if !path.is_empty() => Ok(path.to_string()),
            _ => {
                let name = key_file_name(&self.key_type, self.file.as_deref())?;
                Ok(slot_path(identity, &name))
            }
        }
    }
}

/// Per-identity store slot for a key file.
pub fn slot_path(identity: &Identity, file_name: &str) -> String {
    let file = file_name.rsplit('/').next().unwrap_or(file_name);
    format!("{SLOT_PREFIX}/{}/{}/{}", identity.host, identity.user, file)
}

/// What a publish attempt did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    Published { path: String, key: String },
    /// The public key file was missing or blank.
    Blank { source: String },
}

/// Read the public key from the target and record it.
///
/// Blank or missing content is a successful no-op. Store failures are
/// reported even though nothing on the target needs undoing.
pub async fn record_public_key<T, S>(
    transport: &T,
    store: &S,
    identity: &Identity,
    request: &RecordRequest,
) -> Result<RecordOutcome>
where
    T: Transport + ?Sized,
    S: ParamStore + ?Sized,
{
    request.validate()?;
    let source = request.source_path(identity)?;
    let content = transport.read_file(&identity.host, &source).await?;
    let key = match content.as_deref().map(str::trim) {
        Some(key) if !key.is_empty() => key.to_string(),
        _ => {
            tracing::warn!(
                identity = %identity,
                source = %source,
                "Public key is blank, nothing to record"
            );
            return Ok(RecordOutcome::Blank { source });
        }
    };

    let destination = request.destination(identity)?;
    if request.parameter_path.is_some() {
        let merged = store
            .merge_union(&destination, BTreeSet::from([key.clone()]))
            .await?;
        tracing::info!(
            identity = %identity,
            path = %destination,
            fingerprint = fingerprint(&key).as_deref().unwrap_or("unknown"),
            keys = merged.len(),
            "Recorded public key into shared set"
        );
    } else {
        store
            .set(&destination, ParamValue::Text(key.clone()))
            .await?;
        tracing::info!(
            identity = %identity,
            path = %destination,
            fingerprint = fingerprint(&key).as_deref().unwrap_or("unknown"),
            "Recorded public key"
        );
    }

    Ok(RecordOutcome::Published {
        path: destination,
        key,
    })
}
