//! workq CLI: one coordinator operation per invocation, one JSON object on
//! stdout, exit code 0 on success and 1 on failure.

use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use serde_json::{Map, Value, json};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use workq::config::Config;
use workq::engine::{
    ClaimRequest, CompleteRequest, Coordinator, HeartbeatRequest, StatusRequest,
};
use workq::error::{Error, Result};
use workq::telemetry::{TelemetryConfig, init_telemetry};

#[derive(Parser)]
#[command(
    name = "workq",
    about = "Claim/lease coordination over a shared backlog",
    disable_help_subcommand = true
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Args)]
struct GlobalArgs {
    /// State document path [env: WORKQ_STATE] [default: ./.workq/state.json]
    #[arg(long, global = true)]
    state: Option<PathBuf>,
    /// Directory holding per-item lock files [env: WORKQ_LOCK_DIR] [default: ./.locks]
    #[arg(long, global = true)]
    lock_dir: Option<PathBuf>,
    /// TOML config file [env: WORKQ_CONFIG]
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Give up acquiring the state lock after this many ms
    #[arg(long, global = true)]
    state_lock_wait_ms: Option<u64>,
    /// Treat a state lock older than this many ms as abandoned
    #[arg(long, global = true)]
    state_lock_stale_ms: Option<u64>,
    /// Poll interval while waiting for the state lock
    #[arg(long, global = true)]
    state_lock_poll_ms: Option<u64>,
}

#[derive(Subcommand)]
enum Command {
    /// Parse the backlog document and replace the stored snapshot
    SyncBacklog {
        /// Backlog markdown file
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Claim the next eligible item of a queue
    Claim {
        /// Queue tag [default: configured queue]
        #[arg(long)]
        queue: Option<String>,
        /// Worker session key [default: workq-<pid>-<ms>]
        #[arg(long)]
        session: Option<String>,
        /// Lease in ms
        #[arg(long, allow_negative_numbers = true)]
        lease_ms: Option<i64>,
        /// Human-readable label for the claim
        #[arg(long)]
        label: Option<String>,
    },
    /// Refresh the lease of an owned claim
    Heartbeat {
        #[arg(long)]
        item: Option<String>,
        #[arg(long)]
        session: Option<String>,
        /// Replace the claim's lease
        #[arg(long, allow_negative_numbers = true)]
        lease_ms: Option<i64>,
    },
    /// Mark an item done or pr_opened
    Complete {
        #[arg(long)]
        item: Option<String>,
        /// Explicit status (e.g. done, pr_opened)
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        branch: Option<String>,
        /// Pull request number
        #[arg(long)]
        pr: Option<String>,
        /// Pull request URL
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        session: Option<String>,
        /// Label when the claim has to be synthesized
        #[arg(long)]
        label: Option<String>,
    },
    /// Show claims and lock files with staleness
    #[command(alias = "list")]
    Status {
        /// Only stale entries
        #[arg(long)]
        stale: bool,
        /// Lease applied to every entry for the staleness check
        #[arg(long)]
        ttl_ms: Option<i64>,
    },
    /// Print usage as JSON
    Help,
}

/// Success envelope: `{"ok": true, "command": ..., ...report}`.
#[derive(Serialize)]
struct Envelope<T: Serialize> {
    ok: bool,
    command: &'static str,
    #[serde(flatten)]
    body: T,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if e.kind() == clap::error::ErrorKind::DisplayHelp => {
            return emit(&Envelope { ok: true, command: "help", body: help() });
        }
        Err(e) => return fail(&Error::usage_with(e.to_string().trim().to_string(), help())),
    };
    let Some(command) = cli.command else {
        return fail(&Error::usage_with("missing command", help()));
    };
    if matches!(command, Command::Help) {
        return emit(&Envelope { ok: true, command: "help", body: help() });
    }

    let config = match load_config(&cli.global) {
        Ok(config) => config,
        Err(e) => return fail(&e),
    };

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "workq".to_string(),
        log_level: config.log_level.clone(),
    })
    .map_err(|e| eprintln!("telemetry disabled: {e}"))
    .ok();

    match run(command, &config).await {
        Ok(out) => {
            println!("{out}");
            ExitCode::SUCCESS
        }
        Err(e) => fail(&e),
    }
}

fn load_config(global: &GlobalArgs) -> Result<Config> {
    let defaults = Config::new(".workq/state.json", ".locks");
    let mut config = Config::load(defaults, global.config.as_deref())?;

    if let Some(p) = &global.state {
        config.state_path = p.clone();
    }
    if let Some(p) = &global.lock_dir {
        config.lock_dir = p.clone();
    }
    if let Some(ms) = global.state_lock_wait_ms {
        config.gate.wait = Duration::from_millis(ms);
    }
    if let Some(ms) = global.state_lock_stale_ms {
        config.gate.stale = Duration::from_millis(ms);
    }
    if let Some(ms) = global.state_lock_poll_ms {
        config.gate.poll = Duration::from_millis(ms);
    }

    config.state_path = std::path::absolute(&config.state_path)?;
    config.lock_dir = std::path::absolute(&config.lock_dir)?;
    Ok(config)
}

async fn run(command: Command, config: &Config) -> Result<String> {
    let coordinator = Coordinator::new(config);

    match command {
        Command::SyncBacklog { file } => {
            let file = file.ok_or_else(|| {
                Error::usage("sync-backlog requires --file <WORK_ITEMS_GLOBAL.md>")
            })?;
            let report = coordinator.sync_backlog(&file).await?;
            render("sync-backlog", report)
        }
        Command::Claim {
            queue,
            session,
            lease_ms,
            label,
        } => {
            let mut req = ClaimRequest::new();
            if let Some(q) = queue {
                req = req.queue(q);
            }
            if let Some(s) = session {
                req = req.session(s);
            }
            if let Some(ms) = lease_ms {
                req = req.lease_ms(ms);
            }
            if let Some(l) = label {
                req = req.label(l);
            }
            render("claim", coordinator.claim(req).await?)
        }
        Command::Heartbeat {
            item,
            session,
            lease_ms,
        } => {
            let (Some(item), Some(session)) = (item, session) else {
                return Err(Error::usage(
                    "heartbeat requires --item <id> --session <sessionKey>",
                ));
            };
            let mut req = HeartbeatRequest::new(item, session);
            if let Some(ms) = lease_ms {
                req = req.lease_ms(ms);
            }
            render("heartbeat", coordinator.heartbeat(req).await?)
        }
        Command::Complete {
            item,
            status,
            branch,
            pr,
            url,
            session,
            label,
        } => {
            let item = item.ok_or_else(|| Error::usage("complete requires --item <id>"))?;
            let mut req = CompleteRequest::new(item);
            if let Some(raw) = pr {
                let number = raw.trim().parse::<u64>().map_err(|_| {
                    Error::usage_with("--pr must be a number", json!({ "got": raw }))
                })?;
                req = req.pr_number(number);
            }
            if let Some(s) = status {
                req = req.status(s.as_str());
            }
            if let Some(b) = branch {
                req = req.branch(b);
            }
            if let Some(u) = url {
                req = req.pr_url(u);
            }
            if let Some(s) = session {
                req = req.session(s);
            }
            if let Some(l) = label {
                req = req.label(l);
            }
            render("complete", coordinator.complete(req).await?)
        }
        Command::Status { stale, ttl_ms } => {
            let report = coordinator
                .status(StatusRequest {
                    stale_only: stale,
                    ttl_ms,
                })
                .await?;
            render("status", report)
        }
        Command::Help => render("help", help()),
    }
}

fn render<T: Serialize>(command: &'static str, body: T) -> Result<String> {
    Ok(serde_json::to_string(&Envelope {
        ok: true,
        command,
        body,
    })?)
}

fn emit<T: Serialize>(envelope: &Envelope<T>) -> ExitCode {
    match serde_json::to_string(envelope) {
        Ok(out) => {
            println!("{out}");
            ExitCode::SUCCESS
        }
        Err(e) => fail(&Error::from(e)),
    }
}

/// Failure envelope: `{"ok": false, "error": <code>, "message": ..., ...details}`.
fn fail(error: &Error) -> ExitCode {
    let mut out = Map::new();
    out.insert("ok".to_string(), Value::Bool(false));
    out.insert("error".to_string(), Value::from(error.code()));
    out.insert("message".to_string(), Value::from(error.to_string()));
    for (k, v) in error.details() {
        out.entry(k).or_insert(v);
    }
    println!("{}", Value::Object(out));
    ExitCode::FAILURE
}

fn help() -> Value {
    json!({
        "usage": [
            "workq <command> [options]",
            "",
            "Commands:",
            "  sync-backlog --file <WORK_ITEMS_GLOBAL.md> [--state <state.json>]",
            "  claim [--queue zsc] [--session <sessionKey>] [--lease-ms <ms>] [--label <label>]",
            "  heartbeat --item <id> --session <sessionKey> [--lease-ms <ms>]",
            "  complete --item <id> [--status <done|pr_opened>] [--branch <name>] [--pr <number>] [--url <prUrl>] [--session <sessionKey>]",
            "  status [--stale] [--ttl-ms <ms>]",
            "  list [--stale] [--ttl-ms <ms>]",
            "  help",
            "",
            "Global options: --state <path> --lock-dir <dir> --config <toml>",
            "  --state-lock-wait-ms <ms> --state-lock-stale-ms <ms> --state-lock-poll-ms <ms>",
            "",
            "Notes:",
            "  - Output is one JSON object on stdout for every command.",
            "  - Default state: ./.workq/state.json; default lock dir: ./.locks.",
        ]
    })
}
