//! keyledger server and management CLI.
//!
//! `serve` runs the HTTP API. `generate-key` and `seed-platforms` are
//! offline helpers for operators.

use std::net::SocketAddr;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use keyledger_core::{
    keygen::{generate_key, parse_pattern, validate_platform, DEFAULT_PATTERN},
    repo::PlatformsRepository,
    store::{FirebaseStore, MemoryStore},
    CasPolicy, Db, Platform,
};
use keyledger_telemetry::{log_startup, LogFormat, Telemetry, TelemetryConfig};

mod api;
mod auth;
mod client_ip;
mod error;
mod server;

#[derive(Parser, Debug)]
#[command(name = "keyledger-control", about = "keyledger API key and credit ledger", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

/// Where the realtime-database tree lives.
#[derive(Args, Debug)]
struct StoreArgs {
    /// Firebase Realtime Database URL (e.g. https://project.firebaseio.com).
    #[arg(long, env = "FIREBASE_DATABASE_URL", required_unless_present = "in_memory")]
    database_url: Option<String>,

    /// Database secret or ID token sent as the `auth` query parameter.
    #[arg(long, env = "FIREBASE_AUTH", hide_env_values = true)]
    database_auth: Option<String>,

    /// Keep all data in process memory (development and demos). Takes
    /// precedence over `--database-url`.
    #[arg(long)]
    in_memory: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP server.
    Serve {
        /// Listen address.
        #[arg(long, env = "KEYLEDGER_LISTEN", default_value = "127.0.0.1:8080")]
        listen: SocketAddr,

        #[command(flatten)]
        store: StoreArgs,

        /// Admin password used until one is set through the API.
        #[arg(
            long,
            env = "KEYLEDGER_ADMIN_PASSWORD",
            default_value = "admin",
            hide_env_values = true
        )]
        admin_password: String,

        /// Session lifetime in seconds.
        #[arg(long, default_value_t = 86_400)]
        session_ttl_secs: u64,

        /// Interval of the expired agent and session sweep, in seconds.
        #[arg(long, default_value_t = 60)]
        sweep_interval_secs: u64,

        /// Retries of a conditional write that lost against a concurrent one.
        #[arg(long, default_value_t = 5)]
        cas_retries: u32,

        /// Log level used when RUST_LOG is not set.
        #[arg(long, env = "KEYLEDGER_LOG_LEVEL", default_value = "info")]
        log_level: String,

        /// Log output format: json or pretty.
        #[arg(long, env = "KEYLEDGER_LOG_FORMAT", default_value = "json", value_parser = parse_log_format)]
        log_format: LogFormat,
    },

    /// Print freshly generated keys.
    GenerateKey {
        /// Key prefix, e.g. NFX.
        #[arg(long)]
        prefix: String,

        /// Segment lengths separated by '-'.
        #[arg(long, default_value = "4-4-4-4")]
        pattern: String,

        /// How many keys to print.
        #[arg(long, default_value_t = 1)]
        count: usize,
    },

    /// Load platform definitions from a TOML file.
    SeedPlatforms {
        /// Path to the platforms file.
        #[arg(long, default_value = "platforms.toml")]
        file: String,

        #[command(flatten)]
        store: StoreArgs,

        /// Overwrite platforms that already exist.
        #[arg(long)]
        force: bool,

        /// Show detailed output.
        #[arg(long)]
        verbose: bool,
    },
}

fn parse_log_format(s: &str) -> Result<LogFormat, String> {
    LogFormat::parse(s).ok_or_else(|| format!("unknown log format '{}': use json or pretty", s))
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            listen,
            store,
            admin_password,
            session_ttl_secs,
            sweep_interval_secs,
            cas_retries,
            log_level,
            log_format,
        } => {
            let telemetry_config = TelemetryConfig::new()
                .with_log_level(log_level)
                .with_log_format(log_format);
            let telemetry = match Telemetry::init(telemetry_config) {
                Ok(t) => t,
                Err(e) => {
                    eprintln!("error: {}", e);
                    return ExitCode::from(1);
                }
            };

            let settings = ServeSettings {
                listen,
                admin_password,
                session_ttl_secs,
                sweep_interval_secs,
                cas_retries,
            };

            // Run async server
            let rt = tokio::runtime::Runtime::new().expect("Failed to create runtime");
            rt.block_on(async {
                match run_server(&store, settings, &telemetry).await {
                    Ok(()) => ExitCode::SUCCESS,
                    Err(e) => {
                        tracing::error!(error = %e, "server failed");
                        eprintln!("error: {}", e);
                        ExitCode::from(1)
                    }
                }
            })
        }

        Command::GenerateKey {
            prefix,
            pattern,
            count,
        } => {
            let prefix = prefix.trim().to_uppercase();
            if prefix.is_empty() {
                eprintln!("error: prefix is required");
                return ExitCode::from(1);
            }
            let pattern = match parse_pattern(&pattern) {
                Ok(p) => p,
                Err(e) => {
                    eprintln!("error: {}", e);
                    return ExitCode::from(1);
                }
            };
            for _ in 0..count {
                println!("{}", generate_key(&prefix, &pattern));
            }
            ExitCode::SUCCESS
        }

        Command::SeedPlatforms {
            file,
            store,
            force,
            verbose,
        } => {
            let rt = tokio::runtime::Runtime::new().expect("Failed to create runtime");
            rt.block_on(async {
                match seed_platforms(&file, &store, force, verbose).await {
                    Ok(count) => {
                        println!("Seeded {} platform(s).", count);
                        ExitCode::SUCCESS
                    }
                    Err(e) => {
                        eprintln!("error: {}", e);
                        ExitCode::from(1)
                    }
                }
            })
        }
    }
}

struct ServeSettings {
    listen: SocketAddr,
    admin_password: String,
    session_ttl_secs: u64,
    sweep_interval_secs: u64,
    cas_retries: u32,
}

fn open_store(args: &StoreArgs) -> anyhow::Result<Db> {
    if args.in_memory {
        tracing::warn!("using the in-memory store: data is lost on exit");
        return Ok(MemoryStore::shared());
    }
    let url = args
        .database_url
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("--database-url or --in-memory is required"))?;
    Ok(Arc::new(FirebaseStore::new(url, args.database_auth.clone())?))
}

async fn run_server(
    store: &StoreArgs,
    settings: ServeSettings,
    telemetry: &Telemetry,
) -> anyhow::Result<()> {
    let db = open_store(store)?;
    let session_ttl = i64::try_from(settings.session_ttl_secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .ok_or_else(|| anyhow::anyhow!("--session-ttl-secs is too large"))?;
    if settings.sweep_interval_secs == 0 {
        anyhow::bail!("--sweep-interval-secs must be greater than zero");
    }

    let backend = if store.in_memory { "memory" } else { "firebase" };
    log_startup!(
        service = %telemetry.config().service_name,
        version = env!("CARGO_PKG_VERSION"),
        store = backend,
        "keyledger starting"
    );

    // Fail early on a wrong URL or credentials
    if let Err(e) = db.ping().await {
        tracing::warn!(error = %e, "store is not reachable yet");
    }

    server::run(server::ServerConfig {
        listen_addr: settings.listen,
        db,
        api: api::ApiConfig {
            cas_policy: CasPolicy {
                retries: settings.cas_retries,
            },
            admin_password: settings.admin_password,
            session_ttl,
        },
        sweep_interval: std::time::Duration::from_secs(settings.sweep_interval_secs),
        metrics: telemetry.metrics_clone(),
    })
    .await
}

/// Platforms file (`[[platform]]` tables).
#[derive(Debug, serde::Deserialize)]
struct PlatformsManifest {
    #[serde(default, rename = "platform")]
    platforms: Vec<PlatformEntry>,
}

#[derive(Debug, serde::Deserialize)]
struct PlatformEntry {
    id: String,
    title: String,
    prefix: String,
    #[serde(default)]
    pattern: Option<String>,
    #[serde(default)]
    api_enabled: Option<bool>,
}

impl PlatformEntry {
    fn into_platform(self) -> anyhow::Result<(String, Platform)> {
        let pattern = match self.pattern.as_deref() {
            Some(p) => parse_pattern(p)?,
            None => DEFAULT_PATTERN.to_vec(),
        };
        let id = self.id.trim().to_string();
        let mut platform = Platform {
            title: self.title,
            prefix: self.prefix,
            pattern,
            api_enabled: self.api_enabled,
        };
        validate_platform(&id, &mut platform)
            .map_err(|e| anyhow::anyhow!("platform '{}': {}", id, e))?;
        Ok((id, platform))
    }
}

async fn seed_platforms(
    file: &str,
    store: &StoreArgs,
    force: bool,
    verbose: bool,
) -> anyhow::Result<usize> {
    let path = Path::new(file);
    if !path.exists() {
        anyhow::bail!("Platforms file not found: {}", file);
    }
    let content = std::fs::read_to_string(path)?;
    let manifest: PlatformsManifest = toml::from_str(&content)
        .map_err(|e| anyhow::anyhow!("Failed to parse {}: {}", file, e))?;

    let repo = PlatformsRepository::new(open_store(store)?);
    seed_into(&repo, manifest, force, verbose).await
}

async fn seed_into(
    repo: &PlatformsRepository,
    manifest: PlatformsManifest,
    force: bool,
    verbose: bool,
) -> anyhow::Result<usize> {
    let mut seeded_count = 0;
    for entry in manifest.platforms {
        let (id, platform) = entry.into_platform()?;

        let already_exists = repo.get(&id).await?.is_some();
        if already_exists && !force {
            if verbose {
                eprintln!("  Skipping {} - already exists (use --force to update)", id);
            }
            continue;
        }

        repo.put(&id, &platform).await?;
        if verbose {
            eprintln!(
                "  {} {} ({}, {})",
                if already_exists { "Updated" } else { "Registered" },
                id,
                platform.title,
                platform.prefix
            );
        }
        seeded_count += 1;
    }
    Ok(seeded_count)
}
