use ddplink_core::{Client, ExportFormat, Exported};

use crate::cli::ExportArgs;
use crate::error::CliError;

pub async fn handle(args: ExportArgs, client: &Client) -> Result<(), CliError> {
    let sub = super::subscribe_ready(client, &args.publication, args.args).await?;

    let format = if args.raw {
        ExportFormat::Raw
    } else {
        ExportFormat::String
    };
    match client.export_data(format)? {
        Exported::Raw(value) => println!("{}", serde_json::to_string_pretty(&value)?),
        Exported::String(text) => println!("{text}"),
    }

    sub.stop().await?;
    Ok(())
}
