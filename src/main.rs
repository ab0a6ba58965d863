//! # gitvault CLI (`gv`)
//!
//! The `gv` binary drives a tenant's coordinator from the command line and
//! starts the HTTP API.
//!
//! ## Usage
//!
//! ```bash
//! gv --config ./config/gv.toml --tenant <tenant> <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `gv init` | Create the tenant database and initialize its counters |
//! | `gv submit` | Record a write task (optionally process it right away) |
//! | `gv process <id>` | Process a recorded task and wait for the result |
//! | `gv retry-pending` | Re-drive every task still in the ledger |
//! | `gv articles` | List cached articles, newest first |
//! | `gv status` | Show counters and capacities |
//! | `gv lookup "<title>"` | Resolve a title to its remote article path |
//! | `gv flush` | Push buffered title-index lines now |
//! | `gv reset --yes` | Clear the tenant's local index |
//! | `gv debug` | Compare maintained counters with actual row counts |
//! | `gv serve` | Start the HTTP API |
//! | `gv completions <shell>` | Print shell completions |
//!
//! ## Examples
//!
//! ```bash
//! # Push a note into acme/notes and wait for it
//! GV_TOKEN=ghs_xxx gv --tenant acme submit \
//!     --owner acme --repo notes --installation-id 42 \
//!     --vault-name team --title "Release plan" --file plan.md --process
//!
//! # Find where it landed
//! gv --tenant acme lookup "Release plan"
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use gitvault::config::{self, Config};
use gitvault::remote::github::GitHubFactory;
use gitvault::tenants::TenantRegistry;
use gitvault::{articles, server, status, tasks};
use gitvault_core::models::{Credentials, RepoCoordinates, TaskParams};

/// gitvault: shard articles into a git-backed content store and keep a
/// bounded local index per tenant.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/gv.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "gv",
    about = "gitvault: a per-tenant write coordinator for git-backed content stores",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/gv.toml`. When the file does not exist the
    /// built-in defaults are used.
    #[arg(long, global = true, default_value = "./config/gv.toml")]
    config: PathBuf,

    /// Tenant key. Each tenant has its own database and coordinator.
    #[arg(long, global = true, env = "GV_TENANT", default_value = "default")]
    tenant: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the tenant database and initialize its shard counters.
    ///
    /// Idempotent: existing counters are left untouched.
    Init,

    /// Record a write task in the tenant's ledger.
    Submit {
        #[command(flatten)]
        task: SubmitArgs,

        /// Process the task immediately and wait for the push.
        #[arg(long)]
        process: bool,
    },

    /// Process a recorded task and wait for its outcome.
    Process {
        /// Task id returned by `submit`.
        task_id: String,
    },

    /// Re-drive every task still held in the ledger, oldest first.
    RetryPending,

    /// List cached articles, newest first.
    Articles {
        #[arg(long, default_value_t = 1)]
        page: i64,

        #[arg(long, default_value_t = 20)]
        page_size: i64,
    },

    /// Show shard counters, table sizes and capacities.
    Status,

    /// Resolve a title to its remote article path.
    Lookup {
        title: String,
    },

    /// Push buffered title-index lines now, regardless of the threshold.
    Flush,

    /// Delete every local row for the tenant and restart its counters.
    ///
    /// Remote files are not touched.
    Reset {
        /// Confirm the reset.
        #[arg(long)]
        yes: bool,
    },

    /// Compare maintained counters with actual row counts.
    Debug,

    /// Start the HTTP API on `[server].bind`.
    Serve,

    /// Print shell completions to stdout.
    Completions {
        shell: Shell,
    },
}

#[derive(clap::Args)]
struct SubmitArgs {
    /// Repository owner (user or organization).
    #[arg(long)]
    owner: String,

    /// Repository name.
    #[arg(long)]
    repo: String,

    #[arg(long, default_value = "main")]
    branch: String,

    /// Installation the token was issued for.
    #[arg(long)]
    installation_id: String,

    /// Bearer token for the contents API.
    #[arg(long, env = "GV_TOKEN", hide_env_values = true)]
    token: String,

    /// Token expiry as unix seconds.
    #[arg(long)]
    expires_at: Option<i64>,

    /// Directory inside the repository that holds vaults.
    #[arg(long, default_value = "")]
    vault_path: String,

    #[arg(long)]
    vault_name: String,

    /// Article title. Untitled articles skip the title index.
    #[arg(long, default_value = "")]
    title: String,

    /// Commit message for the article push.
    #[arg(long, short = 'm', default_value = "Add article")]
    message: String,

    /// Article body.
    #[arg(long, conflicts_with = "file", required_unless_present = "file")]
    content: Option<String>,

    /// Read the article body from a file.
    #[arg(long)]
    file: Option<PathBuf>,
}

impl SubmitArgs {
    fn into_params(self) -> anyhow::Result<TaskParams> {
        let content = match (self.content, self.file) {
            (Some(content), _) => content,
            (None, Some(path)) => std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?,
            (None, None) => anyhow::bail!("either --content or --file is required"),
        };
        Ok(TaskParams {
            commit_message: self.message,
            credentials: Credentials {
                installation_id: self.installation_id,
                token: self.token,
                expires_at: self.expires_at,
            },
            repo: RepoCoordinates {
                owner: self.owner,
                repo: self.repo,
                branch: self.branch,
            },
            vault_path: self.vault_path,
            vault_name: self.vault_name,
            title: self.title,
            content,
        })
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// A missing config file means defaults; a broken one is an error.
fn resolve_config(path: &std::path::Path) -> anyhow::Result<Config> {
    if path.exists() {
        config::load_config(path)
    } else {
        Ok(Config::minimal())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Completions { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "gv", &mut std::io::stdout());
        return Ok(());
    }

    init_tracing();
    let cfg = resolve_config(&cli.config)?;

    if let Commands::Serve = cli.command {
        return server::run_server(&cfg).await;
    }

    let remote = Arc::new(GitHubFactory::new(&cfg.remote)?);
    let registry = TenantRegistry::new(cfg.clone(), remote);
    let handle = registry.get(&cli.tenant).await?;

    match cli.command {
        Commands::Init => {
            println!(
                "Tenant {} initialized at {}",
                handle.tenant(),
                cfg.tenant_db_path(handle.tenant()).display()
            );
        }
        Commands::Submit { task, process } => {
            tasks::run_submit(&handle, task.into_params()?, process).await?;
        }
        Commands::Process { task_id } => {
            tasks::run_process(&handle, &task_id).await?;
        }
        Commands::RetryPending => {
            tasks::run_retry_pending(&handle).await?;
        }
        Commands::Articles { page, page_size } => {
            articles::run_articles(&handle, page, page_size).await?;
        }
        Commands::Status => {
            status::run_status(&cfg, &handle).await?;
        }
        Commands::Lookup { title } => {
            articles::run_lookup(&handle, &title).await?;
        }
        Commands::Flush => {
            tasks::run_flush(&handle).await?;
        }
        Commands::Reset { yes } => {
            if !yes {
                anyhow::bail!("reset deletes all local rows for '{}'; pass --yes to confirm", cli.tenant);
            }
            tasks::run_reset(&handle).await?;
        }
        Commands::Debug => {
            status::run_debug(&handle).await?;
        }
        Commands::Serve | Commands::Completions { .. } => {}
    }

    Ok(())
}
