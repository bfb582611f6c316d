// ABOUTME: In-memory simulated hosts that interpret the command AST directly.
// ABOUTME: Lets tests check convergence, permissions, and failure handling without a shell.

use crate::error::{ProvisionError, Result};
use crate::paths::parent_dir;
use crate::script::{Attrs, Check, KeygenInvocation, Script, Step};
use crate::transport::{ExecOutput, Transport};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};

/// A filesystem object on a simulated host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Dir {
        owner: String,
        mode: u32,
    },
    File {
        owner: String,
        mode: u32,
        content: String,
    },
}

impl Node {
    pub fn owner(&self) -> &str {
        match self {
            Node::Dir { owner, .. } | Node::File { owner, .. } => owner,
        }
    }

    pub fn mode(&self) -> u32 {
        match self {
            Node::Dir { mode, .. } | Node::File { mode, .. } => *mode,
        }
    }

    fn set_attrs(&mut self, attrs: &Attrs) {
        match self {
            Node::Dir { owner, mode } | Node::File { owner, mode, .. } => {
                *owner = attrs.owner.clone();
                *mode = attrs.mode;
            }
        }
    }
}

#[derive(Debug, Default)]
struct FleetState {
    nodes: BTreeMap<(String, String), Node>,
    keygen_calls: Vec<(String, KeygenInvocation)>,
    executed: Vec<(String, String)>,
    failing_keygen: BTreeSet<String>,
    failing_reads: BTreeSet<(String, String)>,
    failing_scripts: Vec<(String, String)>,
}

/// Any number of simulated hosts sharing one state. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct FakeFleet {
    state: Arc<Mutex<FleetState>>,
}

fn normalize(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

fn key(host: &str, path: &str) -> (String, String) {
    (host.to_string(), normalize(path))
}

impl FakeFleet {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, FleetState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Place a file, creating its ancestors as root-owned directories.
    pub fn put_file(&self, host: &str, path: &str, content: &str, owner: &str, mode: u32) {
        let mut state = self.state();
        ensure_ancestors(&mut state, host, path);
        state.nodes.insert(
            key(host, path),
            Node::File {
                owner: owner.to_string(),
                mode,
                content: content.to_string(),
            },
        );
    }

    pub fn node(&self, host: &str, path: &str) -> Option<Node> {
        self.state().nodes.get(&key(host, path)).cloned()
    }

    pub fn content(&self, host: &str, path: &str) -> Option<String> {
        match self.node(host, path)? {
            Node::File { content, .. } => Some(content),
            Node::Dir { .. } => None,
        }
    }

    pub fn mode(&self, host: &str, path: &str) -> Option<u32> {
        self.node(host, path).map(|n| n.mode())
    }

    pub fn owner(&self, host: &str, path: &str) -> Option<String> {
        self.node(host, path).map(|n| n.owner().to_string())
    }

    /// Key generation runs on `host`, in order.
    pub fn keygen_invocations(&self, host: &str) -> Vec<KeygenInvocation> {
        self.state()
            .keygen_calls
            .iter()
            .filter(|(h, _)| h == host)
            .map(|(_, inv)| inv.clone())
            .collect()
    }

    /// Labels of scripts executed on `host`, in order.
    pub fn executed(&self, host: &str) -> Vec<String> {
        self.state()
            .executed
            .iter()
            .filter(|(h, _)| h == host)
            .map(|(_, label)| label.clone())
            .collect()
    }

    /// Make the generation tool exit non-zero on `host`.
    pub fn fail_keygen(&self, host: &str) {
        self.state().failing_keygen.insert(host.to_string());
    }

    /// Make reads of `path` on `host` fail with a transfer error.
    pub fn fail_reads_of(&self, host: &str, path: &str) {
        self.state().failing_reads.insert(key(host, path));
    }

    /// Make scripts whose label contains `label_part` fail on `host`.
    pub fn fail_script(&self, host: &str, label_part: &str) {
        self.state()
            .failing_scripts
            .push((host.to_string(), label_part.to_string()));
    }
}

fn ensure_ancestors(state: &mut FleetState, host: &str, path: &str) {
    let mut dir = parent_dir(&normalize(path)).to_string();
    let mut missing = Vec::new();
    while dir != "/" && dir != "." && !state.nodes.contains_key(&key(host, &dir)) {
        missing.push(dir.clone());
        dir = parent_dir(&dir).to_string();
    }
    for dir in missing {
        state.nodes.insert(
            key(host, &dir),
            Node::Dir {
                owner: "root".to_string(),
                mode: 0o755,
            },
        );
    }
}

fn require_parent_dir(
    state: &FleetState,
    host: &str,
    path: &str,
) -> std::result::Result<(), String> {
    let parent = parent_dir(&normalize(path)).to_string();
    if parent == "/" {
        return Ok(());
    }
    match state.nodes.get(&key(host, &parent)) {
        Some(Node::Dir { .. }) => Ok(()),
        Some(Node::File { .. }) => Err(format!("{parent}: Not a directory")),
        None => Err(format!("{path}: No such file or directory")),
    }
}

fn check_holds(state: &FleetState, host: &str, check: &Check) -> bool {
    match check {
        Check::PathExists(path) => state.nodes.contains_key(&key(host, path)),
        Check::FileContains { path, fragment } => match state.nodes.get(&key(host, path)) {
            Some(Node::File { content, .. }) => {
                content.lines().any(|line| line.contains(fragment.as_str()))
            }
            _ => false,
        },
    }
}

fn apply_step(state: &mut FleetState, host: &str, step: &Step) -> std::result::Result<(), String> {
    match step {
        Step::EnsureDir { path, attrs } => {
            if let Some(Node::File { .. }) = state.nodes.get(&key(host, path)) {
                return Err(format!("{path}: File exists"));
            }
            ensure_ancestors(state, host, path);
            state
                .nodes
                .entry(key(host, path))
                .or_insert_with(|| Node::Dir {
                    owner: "root".to_string(),
                    mode: attrs.mode,
                })
                .set_attrs(attrs);
            Ok(())
        }
        Step::EnsureFile { path, attrs } => {
            require_parent_dir(state, host, path)?;
            state
                .nodes
                .entry(key(host, path))
                .or_insert_with(|| Node::File {
                    owner: "root".to_string(),
                    mode: 0o600,
                    content: String::new(),
                })
                .set_attrs(attrs);
            Ok(())
        }
        Step::WriteFile {
            path,
            attrs,
            content,
        } => {
            require_parent_dir(state, host, path)?;
            state.nodes.insert(
                key(host, path),
                Node::File {
                    owner: attrs.owner.clone(),
                    mode: attrs.mode,
                    content: content.clone(),
                },
            );
            Ok(())
        }
        Step::AppendLine { path, line } => {
            require_parent_dir(state, host, path)?;
            let node = state
                .nodes
                .entry(key(host, path))
                .or_insert_with(|| Node::File {
                    owner: "root".to_string(),
                    mode: 0o644,
                    content: String::new(),
                });
            match node {
                Node::File { content, .. } => {
                    if !content.is_empty() && !content.ends_with('\n') {
                        content.push('\n');
                    }
                    content.push_str(line);
                    content.push('\n');
                    Ok(())
                }
                Node::Dir { .. } => Err(format!("{path}: Is a directory")),
            }
        }
        Step::GenerateKey(inv) => {
            if state.failing_keygen.contains(host) {
                return Err(format!("{}: key generation failed", inv.binary));
            }
            require_parent_dir(state, host, &inv.path)?;
            let serial = state.keygen_calls.len() + 1;
            state.nodes.insert(
                key(host, &inv.path),
                Node::File {
                    owner: "root".to_string(),
                    mode: 0o600,
                    content: format!("PRIVATE {} {serial}\n", inv.key_type),
                },
            );
            state.nodes.insert(
                key(host, &format!("{}.pub", inv.path)),
                Node::File {
                    owner: "root".to_string(),
                    mode: 0o644,
                    content: format!("ssh-{} AAAAFAKE{serial} {}\n", inv.key_type, inv.comment),
                },
            );
            state.keygen_calls.push((host.to_string(), inv.clone()));
            Ok(())
        }
        Step::SetAttributes { path, attrs } => match state.nodes.get_mut(&key(host, path)) {
            Some(node) => {
                node.set_attrs(attrs);
                Ok(())
            }
            None => Err(format!("{path}: No such file or directory")),
        },
        Step::Unless { check, then } => {
            if check_holds(state, host, check) {
                return Ok(());
            }
            apply_all(state, host, then)
        }
        Step::When { check, then } => {
            if !check_holds(state, host, check) {
                return Ok(());
            }
            apply_all(state, host, then)
        }
    }
}

fn apply_all(
    state: &mut FleetState,
    host: &str,
    steps: &[Step],
) -> std::result::Result<(), String> {
    for step in steps {
        apply_step(state, host, step)?;
    }
    Ok(())
}

#[async_trait]
impl Transport for FakeFleet {
    async fn execute(&self, host: &str, script: &Script) -> Result<ExecOutput> {
        let mut state = self.state();
        state.executed.push((host.to_string(), script.label.clone()));

        let injected = state
            .failing_scripts
            .iter()
            .any(|(h, part)| h == host && script.label.contains(part.as_str()));
        if injected {
            return Ok(ExecOutput {
                status: 1,
                stdout: String::new(),
                stderr: format!("injected failure for '{}'", script.label),
            });
        }

        for step in &script.steps {
            if let Err(stderr) = apply_step(&mut state, host, step) {
                return Ok(ExecOutput {
                    status: 1,
                    stdout: String::new(),
                    stderr,
                });
            }
        }
        Ok(ExecOutput::default())
    }

    async fn read_file(&self, host: &str, path: &str) -> Result<Option<String>> {
        let state = self.state();
        if state.failing_reads.contains(&key(host, path)) {
            return Err(ProvisionError::Transfer {
                host: host.to_string(),
                path: path.to_string(),
                message: "Permission denied".to_string(),
            });
        }
        match state.nodes.get(&key(host, path)) {
            Some(Node::File { content, .. }) => Ok(Some(content.clone())),
            Some(Node::Dir { .. }) => Err(ProvisionError::Transfer {
                host: host.to_string(),
                path: path.to_string(),
                message: "Is a directory".to_string(),
            }),
            None => Ok(None),
        }
    }
}
