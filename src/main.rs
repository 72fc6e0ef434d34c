use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use ping_client::api::ApiClient;
use ping_client::client::PingClient;
use ping_client::config;
use ping_client::push::{ConsoleNotificationHost, PushSubscription};
use ping_client::service_worker::ServiceWorker;
use ping_client::storage::FileStorage;
use ping_client::store::ProfileStore;
use ping_client::watch::{self, StoragePoller};

#[derive(Parser)]
#[command(name = "ping-client")]
#[command(about = "Send and answer random pings from the terminal")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Backend base URL (defaults to PING_CLIENT_BASE_URL or http://localhost:5000)
    #[arg(long, global = true)]
    server: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Print the stored profile
    Show,
    /// Fetch and store the server's public key and ping cooldown
    Info,
    /// Register a new user and store its identity
    Register,
    /// Send a push subscription object to the backend
    Subscribe {
        /// JSON file holding the subscription issued by the push service
        #[arg(long)]
        subscription: PathBuf,
    },
    /// Ping a random user
    Ping {
        /// Do not reveal the country of origin
        #[arg(long)]
        hide_country: bool,
    },
    /// Reply to a ping
    Reply { ping_id: String },
    /// Display a push payload the way the background handler would
    Notify {
        /// Push message text, e.g. '{"title":"Ping!","options":{"body":"..."}}'
        payload: String,
        /// Open the notification's url as if it were clicked
        #[arg(long)]
        click: bool,
    },
    /// Follow changes other processes make to the profile
    Watch {
        /// Polling interval in seconds
        #[arg(long, default_value_t = 2)]
        interval: u64,
    },
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let storage_dir = config::get_storage_dir()?;
    let store = Arc::new(ProfileStore::new(FileStorage::new(&storage_dir)));
    let base_url = cli.server.unwrap_or_else(config::default_base_url);
    let api = ApiClient::new(base_url).context("Failed to build HTTP client")?;
    let client = PingClient::new(Arc::clone(&store), api);

    match cli.command {
        Command::Show => print_json(&store.load()?)?,
        Command::Info => {
            let server_info = client.fetch_server_information().await?;
            println!(
                "Public key: {} bytes, ping cooldown: {}s",
                server_info.public_key.len(),
                server_info.ping_cooldown_seconds
            );
        }
        Command::Register => {
            let user_info = client.register_account().await?;
            println!(
                "Registered as {} {} ({})",
                user_info.country.emoji, user_info.user_id, user_info.country.iso_code
            );
        }
        Command::Subscribe { subscription } => {
            let raw = fs::read_to_string(&subscription)
                .with_context(|| format!("Failed to read subscription file: {:?}", subscription))?;
            let subscription: PushSubscription =
                serde_json::from_str(&raw).context("Subscription file is not valid JSON")?;
            client.update_push_subscription(&subscription).await?;
            println!("Subscription updated");
        }
        Command::Ping { hide_country } => {
            client.send_random_ping(!hide_country).await?;
            println!(
                "Ping sent ({} total)",
                store.load()?.stats.sent_pings_count
            );
        }
        Command::Reply { ping_id } => {
            client.reply_to_ping(&ping_id).await?;
            println!("Reply sent");
        }
        Command::Notify { payload, click } => {
            let worker = ServiceWorker::new(FileStorage::new(&storage_dir), ConsoleNotificationHost);
            let notification = worker.on_push(&payload)?;
            if click {
                worker.on_notification_click(&notification)?;
            }
        }
        Command::Watch { interval } => {
            let poller = StoragePoller::new(FileStorage::new(&storage_dir), store.key())?;
            store.load()?;
            println!("Watching {:?} (ctrl-c to stop)", storage_dir);
            watch::watch_profile(&store, poller, Duration::from_secs(interval.max(1)), |profile| {
                if let Err(err) = print_json(profile) {
                    tracing::warn!(error = %err, "Failed to print profile");
                }
            })
            .await?;
        }
    }

    Ok(())
}
