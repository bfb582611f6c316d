// ABOUTME: Typed command AST for remote provisioning steps and its POSIX sh rendering.
// ABOUTME: All quoting lives here so planners never build shell strings by hand.

use crate::paths::{parent_dir, KeyType};
use std::borrow::Cow;

/// Mode for SSH directories.
pub const MODE_DIR: u32 = 0o755;
/// Mode for private key files.
pub const MODE_PRIVATE: u32 = 0o600;
/// Mode for public key files and authorization lists.
pub const MODE_PUBLIC: u32 = 0o644;

/// Exit status the read script uses to report a missing file.
pub const READ_ABSENT_STATUS: i32 = 100;

/// Ownership and permission bits applied to a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attrs {
    pub owner: String,
    pub mode: u32,
}

impl Attrs {
    pub fn new(owner: impl Into<String>, mode: u32) -> Self {
        Self {
            owner: owner.into(),
            mode,
        }
    }
}

/// A test evaluated on the target host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Check {
    /// Anything exists at the path.
    PathExists(String),
    /// The file contains `fragment` as a literal substring of some line.
    /// A missing file counts as not containing it.
    FileContains { path: String, fragment: String },
}

/// Parameters for one run of the key generation tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeygenInvocation {
    pub binary: String,
    pub path: String,
    pub key_type: KeyType,
    pub passphrase: String,
    pub comment: String,
}

/// One idempotent or convergent action on the target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Create the directory (and parents) if missing, then apply attributes.
    EnsureDir { path: String, attrs: Attrs },
    /// Create an empty file if missing, then apply attributes.
    EnsureFile { path: String, attrs: Attrs },
    /// Replace the file with `content`. Attributes are applied before the
    /// file appears at `path`.
    WriteFile {
        path: String,
        attrs: Attrs,
        content: String,
    },
    /// Append `line` plus a newline, keeping any previous last line intact.
    AppendLine { path: String, line: String },
    /// Run the key generation tool.
    GenerateKey(KeygenInvocation),
    /// Apply attributes to an existing path.
    SetAttributes { path: String, attrs: Attrs },
    /// Run `then` only when `check` does not hold.
    Unless { check: Check, then: Vec<Step> },
    /// Run `then` only when `check` holds.
    When { check: Check, then: Vec<Step> },
}

/// An ordered group of steps executed as one unit on a host.
///
/// The label names the unit in logs and errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Script {
    pub label: String,
    pub steps: Vec<Step>,
}

impl Script {
    pub fn new(label: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            label: label.into(),
            steps,
        }
    }

    /// A script consisting of a single step.
    pub fn single(label: impl Into<String>, step: Step) -> Self {
        Self::new(label, vec![step])
    }
}

/// Quote a value for POSIX sh.
pub fn quote(value: &str) -> String {
    shell_escape::unix::escape(Cow::Borrowed(value)).into_owned()
}

fn mode_str(mode: u32) -> String {
    format!("{mode:o}")
}

fn render_attrs(target: &str, attrs: &Attrs) -> String {
    format!(
        "chown {owner} {target}\nchmod {mode} {target}",
        owner = quote(&attrs.owner),
        mode = mode_str(attrs.mode),
    )
}

/// Render a check as a shell condition.
pub fn render_check(check: &Check) -> String {
    match check {
        Check::PathExists(path) => format!("[ -e {} ]", quote(path)),
        Check::FileContains { path, fragment } => {
            format!("grep -qsF -- {} {}", quote(fragment), quote(path))
        }
    }
}

/// Render a single step as shell lines (no trailing newline).
pub fn render_step(step: &Step) -> String {
    match step {
        Step::EnsureDir { path, attrs } => {
            let p = quote(path);
            format!(
                "mkdir -p -m {mode} {p}\n{attrs}",
                mode = mode_str(attrs.mode),
                attrs = render_attrs(&p, attrs),
            )
        }
        Step::EnsureFile { path, attrs } => {
            let p = quote(path);
            // Created owner-only, then widened to the requested mode.
            format!(
                "if [ ! -e {p} ]; then (umask 077 && : > {p}); fi\n{attrs}",
                attrs = render_attrs(&p, attrs),
            )
        }
        Step::WriteFile {
            path,
            attrs,
            content,
        } => {
            let template = quote(&format!("{}/.keyloom.XXXXXX", parent_dir(path)));
            format!(
                "(\n\
                 tmp=$(mktemp {template})\n\
                 trap 'rm -f \"$tmp\"' EXIT\n\
                 printf '%s' {content} > \"$tmp\"\n\
                 {attrs}\n\
                 mv -f \"$tmp\" {p}\n\
                 )",
                content = quote(content),
                attrs = render_attrs("\"$tmp\"", attrs),
                p = quote(path),
            )
        }
        Step::AppendLine { path, line } => {
            let p = quote(path);
            format!(
                "if [ -s {p} ] && [ -n \"$(tail -c 1 {p})\" ]; then printf '\\n' >> {p}; fi\n\
                 printf '%s\\n' {line} >> {p}",
                line = quote(line),
            )
        }
        Step::GenerateKey(inv) => format!(
            "{binary} -q -t {key_type} -f {path} -N {pass} -C {comment} < /dev/null",
            binary = quote(&inv.binary),
            key_type = quote(inv.key_type.as_str()),
            path = quote(&inv.path),
            pass = quote(&inv.passphrase),
            comment = quote(&inv.comment),
        ),
        Step::SetAttributes { path, attrs } => render_attrs(&quote(path), attrs),
        Step::Unless { check, then } => {
            format!("if ! {}; then\n{}\nfi", render_check(check), render_body(then))
        }
        Step::When { check, then } => {
            format!("if {}; then\n{}\nfi", render_check(check), render_body(then))
        }
    }
}

fn render_body(steps: &[Step]) -> String {
    if steps.is_empty() {
        ":".to_string()
    } else {
        steps.iter().map(render_step).collect::<Vec<_>>().join("\n")
    }
}

/// Render a whole script. Execution stops at the first failing command.
pub fn render_script(script: &Script) -> String {
    let mut out = String::from("set -e\n");
    for step in &script.steps {
        out.push_str(&render_step(step));
        out.push('\n');
    }
    out
}

/// Script that prints a file, exiting with [`READ_ABSENT_STATUS`] if it is missing.
pub fn render_read(path: &str) -> String {
    let p = quote(path);
    format!("if [ ! -e {p} ]; then exit {READ_ABSENT_STATUS}; fi\ncat -- {p}\n")
}
