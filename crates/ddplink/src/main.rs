mod cli;
mod commands;
mod error;

use clap::Parser;
use secrecy::ExposeSecret;
use tracing_subscriber::EnvFilter;

use ddplink_config::{Config, Credentials, Profile};
use ddplink_core::{Client, ClientOptions};

use crate::cli::{Cli, GlobalOpts};
use crate::error::CliError;

/// Connect bound used when neither the profile nor the flags set one.
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 15_000;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_tracing(cli.global.verbose);

    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

fn init_tracing(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    // stdout carries command output.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let (options, credentials, profile_name) = resolve(&cli.global)?;
    let endpoint = options.endpoint.to_string();

    let client = Client::new(options);
    client
        .connect()
        .await
        .map_err(|source| CliError::ConnectionFailed { url: endpoint, source })?;

    if let Some(credentials) = credentials {
        login(&client, credentials, &profile_name).await?;
    }

    tracing::debug!(command = ?cli.command, "dispatching command");
    let outcome = commands::dispatch(cli.command, &client).await;

    if let Err(err) = client.disconnect().await {
        tracing::debug!(error = %err, "Disconnect did not complete");
    }
    outcome
}

/// Build `ClientOptions` from the config file, profile and CLI overrides.
///
/// Credentials come from the profile only; an endpoint given without a
/// matching profile connects anonymously.
fn resolve(global: &GlobalOpts) -> Result<(ClientOptions, Option<Credentials>, String), CliError> {
    let cfg = match &global.config {
        Some(path) => ddplink_config::load_config_from(path)?,
        None => ddplink_config::load_config()?,
    };

    let (mut options, credentials, name) = match (cfg.profile(global.profile.as_deref()), &global.endpoint) {
        (Ok((name, profile)), _) => {
            let options = ddplink_config::profile_to_client_options(profile, &cfg.defaults)?;
            let credentials = ddplink_config::resolve_credentials(profile, name)?;
            (options, credentials, name.to_owned())
        }
        (Err(_), Some(endpoint)) if global.profile.is_none() => {
            let adhoc = Profile {
                endpoint: endpoint.clone(),
                ..Profile::default()
            };
            let options = ddplink_config::profile_to_client_options(&adhoc, &cfg.defaults)?;
            (options, None, "(none)".to_owned())
        }
        (Err(_), _) => return Err(missing_profile(global, &cfg)),
    };

    if global.endpoint.is_some() {
        options.endpoint = parse_endpoint(global)?;
    }
    if let Some(timeout_ms) = global.timeout_ms {
        options.max_timeout_ms = Some(timeout_ms);
    }
    options.max_timeout_ms.get_or_insert(DEFAULT_CONNECT_TIMEOUT_MS);
    options.auto_connect = false;
    // A one-shot command should fail rather than wait for a reconnect.
    options.auto_reconnect = false;

    Ok((options, credentials, name))
}

fn parse_endpoint(global: &GlobalOpts) -> Result<url::Url, CliError> {
    let raw = global.endpoint.as_deref().unwrap_or_default();
    let url: url::Url = raw.parse().map_err(|_| CliError::Validation {
        field: "endpoint".into(),
        reason: format!("invalid URL: {raw}"),
    })?;
    if !matches!(url.scheme(), "ws" | "wss") {
        return Err(CliError::Validation {
            field: "endpoint".into(),
            reason: format!("expected a ws:// or wss:// URL, got '{url}'"),
        });
    }
    Ok(url)
}

fn missing_profile(global: &GlobalOpts, cfg: &Config) -> CliError {
    if cfg.profiles.is_empty() && global.profile.is_none() {
        let path = global.config.clone().unwrap_or_else(ddplink_config::config_path);
        return CliError::NoConfig {
            path: path.display().to_string(),
        };
    }

    let mut available: Vec<&str> = cfg.profiles.keys().map(String::as_str).collect();
    available.sort_unstable();
    CliError::ProfileNotFound {
        name: global
            .profile
            .clone()
            .or_else(|| cfg.default_profile.clone())
            .unwrap_or_else(|| "default".into()),
        available: if available.is_empty() {
            "(none)".into()
        } else {
            available.join(", ")
        },
    }
}

async fn login(client: &Client, credentials: Credentials, profile: &str) -> Result<(), CliError> {
    let outcome = match credentials {
        Credentials::Token(token) => client.login_with_token(token.expose_secret()).await,
        Credentials::Password { username, password } => {
            client
                .login_with_password(&username, password.expose_secret())
                .await
        }
    };
    let user = outcome.map_err(|source| CliError::AuthFailed {
        profile: profile.to_owned(),
        source,
    })?;
    tracing::info!(user_id = %user.id, "Logged in");
    Ok(())
}
