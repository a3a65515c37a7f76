//! svcpulse - service health from the command line
//!
//! Talks to a service-health monitoring backend over its REST API and
//! follows live status changes over its push channel.

use anyhow::Context;
use clap::{Parser as ClapParser, Subcommand};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use svcpulse::{
    api::ApiClient,
    auth::{AuthSession, TokenStore},
    cache::StatusCache,
    config::{default_config_path, Config},
    model::{EnvironmentType, HealthStatus, Service},
    sync::StatusSync,
};

/// svcpulse - service health from the command line
///
/// Lists monitored services, runs health checks on demand and watches live
/// status changes.
#[derive(ClapParser, Debug)]
#[command(name = "svcpulse", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Base URL of the monitoring server (overrides the config file)
    #[arg(long, global = true, env = "SVCPULSE_SERVER")]
    server: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Log in and store the access token
    Login {
        #[arg(long)]
        email: String,

        #[arg(long, env = "SVCPULSE_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Create an account and log into it
    Register {
        #[arg(long)]
        email: String,

        #[arg(long, env = "SVCPULSE_PASSWORD", hide_env_values = true)]
        password: String,

        /// Display name
        #[arg(long)]
        name: Option<String>,
    },

    /// Forget the stored access token
    Logout,

    /// Show the logged-in user
    Whoami,

    /// List teams
    Teams,

    /// List services with the status of each environment
    Services {
        /// Only show services of this team
        #[arg(long)]
        team: Option<String>,
    },

    /// Show one service with recent check history
    Service {
        /// Service id
        id: String,
    },

    /// Run a health check on an environment now
    Check {
        /// Environment id
        environment: String,
    },

    /// Add or remove environments
    #[command(subcommand)]
    Env(EnvCommand),

    /// Follow live status changes until interrupted
    Watch {
        /// Only load services of this team
        #[arg(long)]
        team: Option<String>,

        /// Service ids to follow. Defaults to every loaded service.
        #[arg(long = "service")]
        services: Vec<String>,
    },
}

#[derive(Subcommand, Debug)]
enum EnvCommand {
    /// Add an environment to a service
    Add {
        /// Service id
        service: String,

        /// development, staging or production
        name: EnvironmentType,

        /// Health endpoint URL
        url: String,
    },

    /// Remove an environment from a service
    Rm {
        /// Service id
        service: String,

        /// Environment id
        environment: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let mut config = Config::load_or_default(&config_path)?;
    if let Some(server) = cli.server {
        config.server = server;
    }

    let client = ApiClient::new(&config.server)?;
    let mut session = AuthSession::rehydrate(client, TokenStore::default_location()).await?;

    match cli.command {
        Commands::Login { email, password } => {
            let user = session.login(&email, &password).await?;
            println!("Logged in as {}", user.email);
        }
        Commands::Register {
            email,
            password,
            name,
        } => {
            let user = session.register(&email, &password, name.as_deref()).await?;
            println!("Registered and logged in as {}", user.email);
        }
        Commands::Logout => {
            session.logout()?;
            println!("Logged out");
        }
        Commands::Whoami => match session.user() {
            Some(user) => {
                let name = user.full_name.as_deref().unwrap_or("-");
                println!("{} ({}, {:?})", user.email, name, user.role);
            }
            None => println!("Not logged in"),
        },
        Commands::Teams => {
            let teams = require_login(&session)?.teams().await?;
            if teams.is_empty() {
                println!("No teams");
            }
            for team in teams {
                println!("{}  {}", team.id, team.name);
            }
        }
        Commands::Services { team } => {
            let list = require_login(&session)?.services(team.as_deref()).await?;
            if list.services.is_empty() {
                println!("No services");
            }
            for service in &list.services {
                print_service(service);
            }
        }
        Commands::Service { id } => {
            let sync = offline_sync(&session, &config)?;
            let service = sync.load_service(&id).await?;
            print_service(&service);
            for env in &service.environments {
                println!("  history for {}:", env.name);
                for check in sync.cache().history(&env.id) {
                    let ms = check
                        .response_time_ms
                        .map(|ms| format!("{}ms", ms))
                        .unwrap_or_else(|| "-".to_string());
                    println!("    {}  {:<9}  {}", check.checked_at, check.status, ms);
                }
            }
        }
        Commands::Check { environment } => {
            let check = require_login(&session)?
                .trigger_health_check(&environment)
                .await?;
            match check.error_message {
                Some(err) => println!("{}  {}", check.status, err),
                None => println!(
                    "{}  {}ms  HTTP {}",
                    check.status,
                    check.response_time_ms.unwrap_or(0),
                    check
                        .status_code
                        .map(|c| c.to_string())
                        .unwrap_or_else(|| "-".to_string())
                ),
            }
        }
        Commands::Env(EnvCommand::Add { service, name, url }) => {
            let env = require_login(&session)?
                .create_environment(&service, name, &url)
                .await?;
            println!("Added {} environment {}", env.name, env.id);
        }
        Commands::Env(EnvCommand::Rm {
            service,
            environment,
        }) => {
            let sync = offline_sync(&session, &config)?;
            sync.remove_environment(&service, &environment).await?;
            println!("Removed environment {}", environment);
        }
        Commands::Watch { team, services } => {
            require_login(&session)?;
            watch(session.into_client(), &config, team, services).await?;
        }
    }

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "svcpulse=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn require_login(session: &AuthSession) -> anyhow::Result<&ApiClient> {
    if !session.is_authenticated() {
        anyhow::bail!("not logged in; run `svcpulse login` first");
    }
    Ok(session.client())
}

/// A sync for one-shot commands. Its live channel is never started.
fn offline_sync(session: &AuthSession, config: &Config) -> anyhow::Result<StatusSync> {
    let client = require_login(session)?.clone();
    let (sync, channel, _updates) = StatusSync::start(client, config, None);
    channel.shutdown();
    Ok(sync)
}

fn print_service(service: &Service) {
    println!("{}  {}", service.id, service.name);
    if service.environments.is_empty() {
        println!("  (no environments)");
    }
    for env in &service.environments {
        println!(
            "  {:<11}  {:<9}  {}  {}",
            env.name,
            env.status(),
            env.last_check.as_deref().unwrap_or("never"),
            env.id
        );
    }
}

// ── Watch mode ─────────────────────────────────────────────────────

async fn watch(
    client: ApiClient,
    config: &Config,
    team: Option<String>,
    services: Vec<String>,
) -> anyhow::Result<()> {
    let (sync, channel, updates) = StatusSync::start(client, config, team);
    let sync = if services.is_empty() {
        sync.following_loaded_services()
    } else {
        sync
    };
    sync.refresh()
        .await
        .context("failed to load services")?;

    let followed = if services.is_empty() {
        sync.watch_loaded_services()
    } else {
        for id in &services {
            sync.watch_service(id);
        }
        services.len()
    };
    tracing::info!(services = followed, server = %config.server, "watching");

    for service in sync.cache().snapshot() {
        print_service(&service);
    }

    let cancel = CancellationToken::new();
    let printer = tokio::spawn(print_transitions(sync.cache().clone(), cancel.clone()));
    let runner = {
        let sync = sync.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            sync.run(updates, cancel.clone()).await;
            cancel.cancel();
        })
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for Ctrl-C")?;
            tracing::debug!("interrupted");
        }
        _ = cancel.cancelled() => {}
    }

    cancel.cancel();
    channel.shutdown();
    let _ = runner.await;
    let _ = printer.await;
    channel.join().await;
    Ok(())
}

/// Print a line for every environment whose status changes.
async fn print_transitions(cache: StatusCache, cancel: CancellationToken) {
    let mut revisions = cache.subscribe();
    let mut last = statuses(&cache);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = revisions.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }

        let current = statuses(&cache);
        let mut rows: Vec<_> = current.iter().collect();
        rows.sort_by(|a, b| (&a.1 .0, a.0).cmp(&(&b.1 .0, b.0)));
        for (env_id, (label, status)) in rows {
            let before = last.get(env_id).map(|(_, s)| *s);
            if before != Some(*status) {
                let before = before
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "new".to_string());
                println!(
                    "{}  {}: {} -> {}",
                    svcpulse::protocol::now_timestamp(),
                    label,
                    before,
                    status
                );
            }
        }
        last = current;
    }
}

/// Status of every loaded environment, keyed by id, with a display label.
fn statuses(cache: &StatusCache) -> HashMap<String, (String, HealthStatus)> {
    cache
        .snapshot()
        .into_iter()
        .flat_map(|service| {
            service.environments.into_iter().map(move |env| {
                let label = format!("{}/{}", service.name, env.name);
                (env.id.clone(), (label, env.status()))
            })
        })
        .collect()
}
