mod cli;
mod commands;

use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use rawuh_attendance::AttendanceConfig;
use rawuh_sdk::{GatewayClient, GatewayConfig, SessionGateway};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use crate::cli::{Cli, Commands};
use crate::commands::Output;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.global.verbose)?;
    run(cli).await
}

fn init_tracing(verbose: bool) -> Result<()> {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    match fmt().with_env_filter(filter).with_writer(std::io::stderr).try_init() {
        Ok(()) => Ok(()),
        Err(err) => Err(anyhow!(err)),
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = GatewayConfig::from_env();
    if let Some(url) = &cli.global.api_url {
        config = config.with_base_url(url.clone());
    }
    let client = GatewayClient::new(&config).context("failed to build gateway client")?;

    let identifier = cli
        .global
        .identifier
        .as_deref()
        .context("missing --identifier (or RAWUH_IDENTIFIER)")?;
    let password = cli
        .global
        .password
        .as_deref()
        .context("missing --password (or RAWUH_PASSWORD)")?;
    let auth = client
        .login(identifier, password)
        .await
        .context("login failed")?;
    info!(user_id = auth.user().id, base_url = client.base_url(), "signed in");

    if !auth.is_lecturer() {
        let email = auth.user().email.clone();
        let role = auth.role();
        if let Err(err) = client.logout(auth).await {
            warn!(error = %err, "logout failed");
        }
        bail!("{email} is signed in as {role:?}; attendance sessions need a lecturer account");
    }

    let gateway: Arc<dyn SessionGateway> = Arc::new(client.clone());
    let attendance = AttendanceConfig::from_env();
    let out = Output::new(cli.global.json);

    let outcome = match cli.command {
        Commands::Start {
            class_id,
            week,
            mode,
        } => commands::start(gateway, attendance, class_id, week, &mode, out).await,
        Commands::Close { class_id, yes } => {
            commands::close(gateway, attendance, class_id, yes, out).await
        }
        Commands::Sessions { filter } => commands::sessions(gateway, &filter, out).await,
        Commands::Roster {
            session_id,
            class_id,
        } => commands::roster(gateway, attendance, &session_id, class_id, out).await,
        Commands::Mark {
            session_id,
            student_id,
            status,
            class_id,
        } => {
            commands::mark(gateway, attendance, &session_id, student_id, &status, class_id, out)
                .await
        }
        Commands::Active { class_id } => {
            commands::active(gateway, attendance, class_id, out).await
        }
    };

    if let Err(err) = client.logout(auth).await {
        warn!(error = %err, "logout failed");
    }
    outcome
}
