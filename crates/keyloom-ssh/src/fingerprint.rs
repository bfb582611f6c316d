// ABOUTME: SSH public key fingerprint computation from authorized_keys-style lines.
// ABOUTME: Produces OpenSSH's SHA256:<base64> form without interpreting key parameters.

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::Engine;
use sha2::{Digest, Sha256};

/// Compute the OpenSSH SHA256 fingerprint of a public key line.
///
/// Accepts `type blob [comment]`, optionally preceded by an options clause
/// such as `from="10.0.0.1"`. The blob is hashed as-is:
///
/// - Locate the key type field (the one whose value is embedded at the
///   start of the decoded blob as an SSH string)
/// - SHA256 the decoded blob
/// - Encode as unpadded base64 with a `SHA256:` prefix
///
/// Returns `None` when no field decodes to a blob naming its own key type;
/// that covers legacy rsa1 lines and garbage alike.
pub fn fingerprint(public_key_line: &str) -> Option<String> {
    let fields: Vec<&str> = public_key_line.split_whitespace().collect();
    fields.windows(2).find_map(|pair| {
        let (key_type, blob_b64) = (pair[0], pair[1]);
        let blob = STANDARD.decode(blob_b64).ok()?;
        if embedded_type(&blob)? != key_type.as_bytes() {
            return None;
        }
        let hash = Sha256::digest(&blob);
        Some(format!("SHA256:{}", STANDARD_NO_PAD.encode(hash)))
    })
}

/// The leading SSH string (4-byte big-endian length + bytes) of a key blob.
fn embedded_type(blob: &[u8]) -> Option<&[u8]> {
    let len_bytes: [u8; 4] = blob.get(..4)?.try_into().ok()?;
    let len = u32::from_be_bytes(len_bytes) as usize;
    blob.get(4..4usize.checked_add(len)?)
}
