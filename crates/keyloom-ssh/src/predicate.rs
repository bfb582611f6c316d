// ABOUTME: Builds the "is this key already in this file" check used before mutating steps.
// ABOUTME: Trims key material and rejects fragments that cannot be matched as one literal line.

use crate::error::{ProvisionError, Result};
use crate::script::Check;

/// Normalize public key content into the fragment used for duplicate detection.
///
/// Returns `Ok(None)` for blank content.
///
/// # Errors
/// Returns `ProvisionError::Configuration` when the content spans several
/// lines, since a line-oriented literal match could then report a key as
/// present when only one of its lines is.
pub fn key_fragment(content: &str) -> Result<Option<String>> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    if trimmed.contains(['\n', '\r']) {
        return Err(ProvisionError::config(
            "public key content must be a single line",
        ));
    }
    Ok(Some(trimmed.to_string()))
}

/// The `type material` span of a public key line, ignoring any options
/// clause before it and the comment after it.
///
/// Falls back to the whole trimmed line when no field looks like a key type.
pub fn key_material(key: &str) -> &str {
    let trimmed = key.trim();
    let spans = field_spans(trimmed);
    spans
        .windows(2)
        .find(|pair| is_key_type(&trimmed[pair[0].0..pair[0].1]))
        .map(|pair| &trimmed[pair[0].0..pair[1].1])
        .unwrap_or(trimmed)
}

fn is_key_type(field: &str) -> bool {
    ["ssh-", "ecdsa-", "sk-"]
        .iter()
        .any(|prefix| field.starts_with(prefix))
}

/// Byte ranges of the whitespace-separated fields of `line`.
fn field_spans(line: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut pos = 0;
    for field in line.split_whitespace() {
        if let Some(found) = line[pos..].find(field) {
            let start = pos + found;
            pos = start + field.len();
            spans.push((start, pos));
        }
    }
    spans
}

/// Check that holds when `path` already holds the key's material.
///
/// The match is a literal substring test, so restriction prefixes and
/// comments around an existing entry do not prevent a match.
pub fn key_present(path: &str, key: &str) -> Check {
    Check::FileContains {
        path: path.to_string(),
        fragment: key_material(key).to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fragment_is_trimmed() {
        let frag = key_fragment("  ssh-rsa AAAAB3 alice@host\n").unwrap();
        assert_eq!(frag.as_deref(), Some("ssh-rsa AAAAB3 alice@host"));
    }

    #[test]
    fn test_blank_fragment_is_none() {
        assert_eq!(key_fragment("").unwrap(), None);
        assert_eq!(key_fragment(" \n\t ").unwrap(), None);
    }

    #[test]
    fn test_multiline_fragment_rejected() {
        let err = key_fragment("ssh-rsa AAAA a@h\nssh-rsa BBBB b@h").unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_material_drops_comment_and_options() {
        assert_eq!(key_material("ssh-rsa AAAAB3 alice@host"), "ssh-rsa AAAAB3");
        assert_eq!(
            key_material("from=\"10.0.0.1\" ssh-ed25519 AAAAC3 ops team"),
            "ssh-ed25519 AAAAC3"
        );
        assert_eq!(
            key_material("ecdsa-sha2-nistp256 AAAAE2"),
            "ecdsa-sha2-nistp256 AAAAE2"
        );
    }

    #[test]
    fn test_material_falls_back_to_whole_line() {
        assert_eq!(key_material(" 1024 35 12345 legacy@rsa1 "), "1024 35 12345 legacy@rsa1");
        assert_eq!(key_material("opaque"), "opaque");
    }

    #[test]
    fn test_key_present_builds_literal_check() {
        let check = key_present("/home/a/.ssh/authorized_keys", " ssh-ed25519 AAAA.* ");
        assert_eq!(
            check,
            Check::FileContains {
                path: "/home/a/.ssh/authorized_keys".to_string(),
                fragment: "ssh-ed25519 AAAA.*".to_string(),
            }
        );
    }
}
