//! Command handlers, one module per subcommand.

mod call;
mod export;
mod watch;

use ddplink_core::{Client, Subscription};
use serde_json::Value;

use crate::cli::Command;
use crate::error::CliError;

pub async fn dispatch(command: Command, client: &Client) -> Result<(), CliError> {
    match command {
        Command::Call(args) => call::handle(args, client).await,
        Command::Watch(args) => watch::handle(args, client).await,
        Command::Export(args) => export::handle(args, client).await,
    }
}

/// Subscribe to `publication` and wait until the server reports it ready.
async fn subscribe_ready(client: &Client, publication: &str, args: Vec<Value>) -> Result<Subscription, CliError> {
    let sub = client.subscribe(publication, args);
    sub.ready().await.map_err(|err| CliError::Subscription {
        publication: publication.to_owned(),
        message: err.remote().map_or_else(|| err.to_string(), ToString::to_string),
    })?;
    tracing::info!(publication, id = %sub.id(), "Subscription ready");
    Ok(sub)
}
