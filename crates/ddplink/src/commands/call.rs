use ddplink_core::Client;

use crate::cli::CallArgs;
use crate::error::CliError;

pub async fn handle(args: CallArgs, client: &Client) -> Result<(), CliError> {
    let result = client.call(&args.method, args.args).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
