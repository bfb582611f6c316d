// ABOUTME: CLI entry point for keyloom SSH key provisioning.
// ABOUTME: Builds one session per host from the subcommand and runs them concurrently.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use keyloom_cli::config::Config;
use keyloom_ssh::{
    from_hosts, AuthorizeLocalRequest, AuthorizeRequest, FileStore, GenerateRequest, Identity,
    InstallRequest, KeyType, Operation, Outcome, ParamStore, ParamValue, RecordRequest, RunReport,
    Runner, Session,
};
use std::path::{Path, PathBuf};

const DEFAULT_HOST: &str = "localhost";

#[derive(Parser)]
#[command(name = "keyloom")]
#[command(about = "Idempotent SSH key provisioning for managed hosts")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(long, global = true, env = "KEYLOOM_CONFIG")]
    config: Option<PathBuf>,

    /// Target host; repeat to provision several hosts concurrently
    #[arg(long = "host", global = true)]
    hosts: Vec<String>,

    /// Account whose SSH material is managed (defaults to $USER).
    ///
    /// Its home is assumed to be /root for root and <home_root>/<user> otherwise;
    /// the target's passwd database is not consulted. Use --home for accounts
    /// living elsewhere.
    #[arg(long, short = 'u', global = true, env = "KEYLOOM_USER")]
    user: Option<String>,

    /// Home directory of --user on every target host
    #[arg(long, global = true, env = "KEYLOOM_HOME")]
    home: Option<String>,

    /// Log rendered scripts
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct KeyFileArgs {
    /// Key algorithm: rsa1, rsa, dsa, ecdsa, ed25519
    #[arg(long = "type", short = 't', default_value = "rsa")]
    key_type: KeyType,

    /// Private key file name or absolute path (defaults to the type's conventional name)
    #[arg(long, short = 'f')]
    file: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the default configuration file (at --config when given)
    Init,

    /// Append a public key to an authorization list
    Authorize {
        /// Public key line
        #[arg(long, conflicts_with = "key_file", required_unless_present = "key_file")]
        key: Option<String>,

        /// Read the public key line from a local file
        #[arg(long)]
        key_file: Option<PathBuf>,

        /// Authorization list name or absolute path
        #[arg(long, default_value = keyloom_ssh::AUTHORIZED_KEYS_FILE)]
        auth_file: String,

        /// Grant access to this account instead of --user
        #[arg(long)]
        for_user: Option<String>,

        /// Only accept logins from these origins (comma separated)
        #[arg(long, value_delimiter = ',')]
        from: Vec<String>,
    },

    /// Authorize a host's own public key for loopback logins
    AuthorizeLocalhost {
        #[command(flatten)]
        key: KeyFileArgs,

        /// Authorization list name or absolute path
        #[arg(long, default_value = keyloom_ssh::AUTHORIZED_KEYS_FILE)]
        auth_file: String,

        /// Grant access to this account instead of --user
        #[arg(long)]
        for_user: Option<String>,
    },

    /// Install a known key pair, replacing any existing files
    Install {
        /// Key file name inside the SSH directory
        #[arg(long, short = 'n')]
        name: String,

        /// Local file holding the private key
        #[arg(long)]
        private_key: PathBuf,

        /// Local file holding the public key
        #[arg(long)]
        public_key: PathBuf,
    },

    /// Generate a key pair unless one already exists
    Generate {
        #[command(flatten)]
        key: KeyFileArgs,

        /// Passphrase for the private key
        #[arg(long, env = "KEYLOOM_PASSPHRASE", default_value = "", hide_env_values = true)]
        passphrase: String,

        /// Comment embedded in the public key
        #[arg(long, short = 'C')]
        comment: Option<String>,

        /// Do not create the key's parent directory
        #[arg(long)]
        no_dir: bool,

        /// Record the public key after generating it
        #[arg(long)]
        publish: bool,

        /// Shared store path to union the published key into
        #[arg(long, requires = "publish")]
        parameter_path: Option<String>,
    },

    /// Record a host's public key in the state store
    Record {
        #[command(flatten)]
        key: KeyFileArgs,

        /// Shared store path to union the key into
        #[arg(long)]
        parameter_path: Option<String>,
    },

    /// Print a published record from the state store
    Show {
        /// Store path, e.g. ssh/web1/alice/id_rsa
        path: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    if cli.verbose {
        keyloom_log::init_verbose();
    } else {
        keyloom_log::init();
    }

    if let Commands::Init = cli.command {
        return run_init(cli.config.as_deref());
    }

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    tracing::debug!(state = %config.state_path().display(), "Loaded configuration");

    if let Commands::Show { path } = &cli.command {
        return run_show(&config, path).await;
    }

    let operations = build_operations(&cli.command)?;
    let sessions = build_sessions(&cli, &config, &operations)?;
    let runner = Runner::new(config.shell_transport(), FileStore::new(config.state_path()))
        .with_keygen(config.keygen_settings());

    let results = runner.run_all(&sessions).await;
    let mut failures = 0;
    for (session, result) in sessions.iter().zip(results) {
        match result {
            Ok(report) => print_report(&report),
            Err(e) => {
                failures += 1;
                eprintln!("{}: {}", session.identity(), e);
            }
        }
    }

    if failures > 0 {
        bail!("{} of {} host(s) failed", failures, sessions.len());
    }
    Ok(())
}

fn run_init(path: Option<&Path>) -> Result<()> {
    let path = path.map_or_else(Config::config_path, Path::to_path_buf);
    if Config::init_at(&path)? {
        println!("Created {}", path.display());
    } else {
        println!("Config already exists: {}", path.display());
    }
    Ok(())
}

async fn run_show(config: &Config, path: &str) -> Result<()> {
    let store = FileStore::new(config.state_path());
    let value = store
        .get(path)
        .await
        .with_context(|| format!("Failed to read {} from state", path))?;

    match value {
        Some(ParamValue::Text(key)) => println!("{key}"),
        Some(ParamValue::Set(keys)) => {
            for key in keys {
                println!("{key}");
            }
        }
        None => bail!("No record at '{}'", path),
    }
    Ok(())
}

/// Translate a subcommand into the operations queued on every host's session.
fn build_operations(command: &Commands) -> Result<Vec<Operation>> {
    let operations = match command {
        Commands::Init | Commands::Show { .. } => Vec::new(),
        Commands::Authorize {
            key,
            key_file,
            auth_file,
            for_user,
            from,
        } => {
            let key = match (key, key_file) {
                (Some(key), _) => key.clone(),
                (None, Some(path)) => read_local(path)?,
                (None, None) => bail!("Either --key or --key-file is required"),
            };
            let mut request = AuthorizeRequest::new(key).auth_file(auth_file);
            if let Some(user) = for_user {
                request = request.for_user(user);
            }
            if !from.is_empty() {
                request = request.restriction(from_hosts(from));
            }
            vec![Operation::Authorize(request)]
        }
        Commands::AuthorizeLocalhost {
            key,
            auth_file,
            for_user,
        } => vec![Operation::AuthorizeLocal(AuthorizeLocalRequest {
            key_type: key.key_type.clone(),
            file: key.file.clone(),
            auth_file: auth_file.clone(),
            for_user: for_user.clone(),
        })],
        Commands::Install {
            name,
            private_key,
            public_key,
        } => vec![Operation::Install(InstallRequest::new(
            name,
            read_local(private_key)?,
            read_local(public_key)?,
        ))],
        Commands::Generate {
            key,
            passphrase,
            comment,
            no_dir,
            publish,
            parameter_path,
        } => {
            let mut request = GenerateRequest::new(key.key_type.clone())
                .passphrase(passphrase)
                .no_dir(*no_dir);
            if let Some(file) = &key.file {
                request = request.file(file);
            }
            if let Some(comment) = comment {
                request = request.comment(comment);
            }
            let mut operations = vec![Operation::Generate(request)];
            if *publish {
                operations.push(Operation::Record(record_request(key, parameter_path)));
            }
            operations
        }
        Commands::Record {
            key,
            parameter_path,
        } => vec![Operation::Record(record_request(key, parameter_path))],
    };
    Ok(operations)
}

fn record_request(key: &KeyFileArgs, parameter_path: &Option<String>) -> RecordRequest {
    let mut request = RecordRequest::new(key.key_type.clone());
    if let Some(file) = &key.file {
        request = request.file(file);
    }
    if let Some(path) = parameter_path {
        request = request.parameter_path(path);
    }
    request
}

fn build_sessions(cli: &Cli, config: &Config, operations: &[Operation]) -> Result<Vec<Session>> {
    let user = cli
        .user
        .clone()
        .or_else(|| std::env::var("USER").ok())
        .unwrap_or_else(|| "root".to_string());
    let hosts = if cli.hosts.is_empty() {
        vec![DEFAULT_HOST.to_string()]
    } else {
        cli.hosts.clone()
    };

    hosts
        .into_iter()
        .map(|host| {
            let mut identity =
                Identity::new(user.as_str(), host).with_home_root(&config.paths.home_root);
            if let Some(home) = &cli.home {
                identity = identity.with_home(home);
            }
            operations
                .iter()
                .cloned()
                .try_fold(Session::new(identity), Session::push)
                .context("Invalid provisioning parameters")
        })
        .collect()
}

fn read_local(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn print_report(report: &RunReport) {
    for op in &report.operations {
        let detail = match &op.outcome {
            Outcome::Applied { scripts } => format!("converged ({scripts} steps)"),
            Outcome::Published { path, key } => {
                let fingerprint =
                    keyloom_ssh::fingerprint(key).unwrap_or_else(|| "unknown".to_string());
                format!("published {fingerprint} to {path}")
            }
            Outcome::Skipped { reason } => format!("skipped: {reason}"),
        };
        println!("{}: {}: {}", report.identity, op.operation, detail);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli_structure() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_generate_with_publish_queues_record() {
        let cli = Cli::try_parse_from([
            "keyloom",
            "generate",
            "--type",
            "ed25519",
            "--publish",
            "--parameter-path",
            "ssh/cluster",
        ])
        .expect("should parse");

        let operations = build_operations(&cli.command).expect("should build");
        assert_eq!(operations.len(), 2);
        assert!(matches!(operations[0], Operation::Generate(_)));
        match &operations[1] {
            Operation::Record(request) => {
                assert_eq!(request.key_type, KeyType::Ed25519);
                assert_eq!(request.parameter_path.as_deref(), Some("ssh/cluster"));
            }
            _ => panic!("expected record operation"),
        }
    }

    #[test]
    fn test_authorize_from_hosts_becomes_restriction() {
        let cli = Cli::try_parse_from([
            "keyloom",
            "authorize",
            "--key",
            "ssh-rsa AAAA ops@bastion",
            "--from",
            "10.0.0.1,bastion",
        ])
        .expect("should parse");

        let operations = build_operations(&cli.command).expect("should build");
        match &operations[0] {
            Operation::Authorize(request) => {
                assert_eq!(
                    request.restriction.as_deref(),
                    Some("from=\"10.0.0.1,bastion\"")
                );
            }
            _ => panic!("expected authorize operation"),
        }
    }

    #[test]
    fn test_one_session_per_host() {
        let cli = Cli::try_parse_from([
            "keyloom", "--host", "web1", "--host", "web2", "--user", "deploy", "record",
        ])
        .expect("should parse");

        let operations = build_operations(&cli.command).expect("should build");
        let sessions =
            build_sessions(&cli, &Config::default(), &operations).expect("should build sessions");
        let identities: Vec<_> = sessions.iter().map(|s| s.identity().to_string()).collect();
        assert_eq!(identities, vec!["deploy@web1", "deploy@web2"]);
    }

    #[test]
    fn test_home_flag_pins_user_home() {
        let cli = Cli::try_parse_from([
            "keyloom", "--user", "git", "--home", "/var/lib/git", "authorize", "--key",
            "ssh-ed25519 AAAA ops@bastion",
        ])
        .expect("should parse");

        let operations = build_operations(&cli.command).expect("should build");
        let sessions =
            build_sessions(&cli, &Config::default(), &operations).expect("should build sessions");
        assert_eq!(sessions[0].identity().ssh_dir(), "/var/lib/git/.ssh/");
    }

    #[test]
    fn test_invalid_parameters_fail_before_running() {
        let cli =
            Cli::try_parse_from(["keyloom", "authorize", "--key", "   "]).expect("should parse");
        let operations = build_operations(&cli.command).expect("should build");
        assert!(build_sessions(&cli, &Config::default(), &operations).is_err());
    }
}
