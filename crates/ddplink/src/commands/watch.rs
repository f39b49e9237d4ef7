// ── watch ──
//
// One JSON line per change of the watched collection:
// `{"event": "added" | "changed" | "removed", "document": {...}}`, with
// `"cleared"` listing removed fields on changes.

use ddplink_core::{Change, Client};
use serde_json::{Value, json};

use crate::cli::WatchArgs;
use crate::error::CliError;

pub async fn handle(args: WatchArgs, client: &Client) -> Result<(), CliError> {
    let listener = client
        .collection(&args.collection)
        .on_change(|change| println!("{}", change_line(change)));

    let sub = super::subscribe_ready(client, &args.publication, args.args).await?;
    eprintln!("Watching '{}' (Ctrl-C to stop)", args.collection);

    tokio::signal::ctrl_c().await?;

    listener.stop();
    sub.stop().await?;
    Ok(())
}

fn change_line(change: &Change) -> Value {
    match change {
        Change::Added(doc) => json!({ "event": "added", "document": doc }),
        Change::Changed(delta) => json!({
            "event": "changed",
            "document": delta.next,
            "fields": delta.fields_changed,
            "cleared": delta.fields_removed,
        }),
        Change::Removed(doc) => json!({ "event": "removed", "document": doc }),
    }
}
