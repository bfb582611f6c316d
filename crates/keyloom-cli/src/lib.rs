// ABOUTME: CLI library components for the keyloom binary.
// ABOUTME: Configuration loading shared by keyloom subcommands.

//! # keyloom-cli
//!
//! Command-line interface for idempotent SSH key provisioning.
//!
//! ```text
//! keyloom [--host HOST]... [--user USER]
//! ├── init                          # Write default config
//! ├── authorize                     # Append a public key to authorized_keys
//! ├── authorize-localhost           # Authorize a host's own key for loopback logins
//! ├── install                       # Place a known key pair
//! ├── generate [--publish]          # Generate a key pair unless present
//! ├── record                        # Publish a public key to the state store
//! └── show <path>                   # Print a published record
//! ```
//!
//! ## Usage
//!
//! ```bash
//! # Give every web host a deploy key and collect them in one set
//! keyloom --host web1 --host web2 --user deploy \
//!     generate --type ed25519 --publish --parameter-path ssh/deployers
//!
//! keyloom show ssh/deployers
//! ```

pub mod config;

/// Version of the keyloom CLI
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
