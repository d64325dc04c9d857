mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::client::{BridgeClient, Taken};
use mtb_config::BridgeConfig;

const DEFAULT_BASE_URL: &str = "http://127.0.0.1:15556/v1";

#[derive(Parser)]
#[command(name = "mtb")]
#[command(about = "MetaTrader bridge CLI", long_about = None)]
struct Cli {
    /// Daemon API root, including the base path
    #[arg(long, global = true, env = "MTB_BASE_URL", default_value = DEFAULT_BASE_URL)]
    base_url: String,

    /// Auth token presented to the polling surface
    #[arg(long, global = true, env = "MTB_AUTH_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute layered config hash, validate, print canonical JSON
    ConfigHash {
        /// Paths in merge order (base -> site -> local...)
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Daemon status snapshot
    Status,

    /// Queue a command and wait for the polling client's response
    Send {
        /// Command name (e.g. order.buy)
        name: String,

        /// Inline payload
        #[arg(conflicts_with = "payload_file")]
        payload: Option<String>,

        /// Read the payload from a file
        #[arg(long = "payload-file", conflicts_with = "payload")]
        payload_file: Option<String>,
    },

    /// Is a command waiting?
    Pending {
        /// Long-poll up to this many milliseconds
        #[arg(long)]
        wait_ms: Option<u64>,
    },

    /// Take the oldest pending command
    Take {
        /// Print as a caret line instead of JSON
        #[arg(long, default_value_t = false)]
        text: bool,
    },

    /// Answer a taken command by id (or by name: binds the oldest)
    Respond { command: String, response: String },

    /// Register the event callback (empty URL clears it)
    SetCallback {
        url: String,

        /// json | form | text
        #[arg(long, default_value = "json")]
        format: String,
    },

    /// Push an event to the registered callback
    RaiseEvent { payload: String },

    /// Replace the daemon's auth token (empty string clears it)
    SetToken { new_token: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env.local if present; silent otherwise.
    let _ = dotenvy::from_filename(".env.local");
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let client = BridgeClient::new(&cli.base_url, cli.token.clone());

    match cli.cmd {
        Commands::ConfigHash { paths } => {
            let path_refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
            let (_cfg, loaded) = BridgeConfig::load(&path_refs)?;
            println!("config_hash={}", loaded.config_hash);
            println!("{}", loaded.canonical_json);
        }

        Commands::Status => {
            let s = client.status().await?;
            println!("{}", serde_json::to_string_pretty(&s)?);
        }

        Commands::Send {
            name,
            payload,
            payload_file,
        } => {
            let payload = commands::load_payload(payload, payload_file)?;
            tracing::debug!(name = %name, "sending command");
            let response = client.send_command(&name, &payload).await?;
            println!("{response}");
        }

        Commands::Pending { wait_ms } => {
            let p = client.pending(wait_ms).await?;
            println!("pending={} pending_count={}", p.pending, p.pending_count);
        }

        Commands::Take { text } => match client.take(text).await? {
            Taken::Empty => println!("empty=true"),
            Taken::Line(line) => println!("{line}"),
            Taken::Json(env) => {
                println!("id={}", env.id);
                println!("name={}", env.name);
                println!("created_at_utc={}", env.created_at_utc.to_rfc3339());
                println!("payload={}", env.payload);
            }
        },

        Commands::Respond { command, response } => {
            let r = client.respond(&command, &response).await?;
            match r.command_id {
                Some(id) => println!("resolved=true command_id={id}"),
                None => println!("resolved=false"),
            }
        }

        Commands::SetCallback { url, format } => {
            let r = client.set_callback(&url, &format).await?;
            println!(
                "registered={} url={} format={}",
                r["registered"],
                r["url"].as_str().unwrap_or("-"),
                r["format"].as_str().unwrap_or("-")
            );
        }

        Commands::RaiseEvent { payload } => {
            let r = client.raise_event(&payload).await?;
            println!("dispatched={}", r["dispatched"]);
        }

        Commands::SetToken { new_token } => {
            let r = client.set_token(&new_token).await?;
            println!("ok={} token_configured={}", r.ok, !new_token.trim().is_empty());
        }
    }

    Ok(())
}
