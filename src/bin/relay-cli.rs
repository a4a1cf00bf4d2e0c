use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::Value;

use config_relay::agent::{ClientRefreshAgent, HttpConfigClient};
use config_relay::bus::RemoteSubscriber;
use config_relay::config::RetryConfig;
use config_relay::lifecycle::signals::shutdown_signal;
use config_relay::{ConfigKey, ConfigResolver, Shutdown};

#[derive(Parser)]
#[command(name = "relay-cli")]
#[command(about = "Management CLI for config-relay", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8888")]
    url: String,

    #[arg(short, long, env = "CONFIG_RELAY_ADMIN_API_KEY", default_value = "CHANGE_ME_IN_PRODUCTION")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check relay status
    Status,
    /// List cached documents and their revisions
    Cache,
    /// Fetch a configuration document
    Resolve {
        application: String,
        profile: String,
        label: Option<String>,
        /// Bypass the server cache
        #[arg(long)]
        refresh: bool,
    },
    /// Broadcast a refresh (app, app:profile or app:profile:label; everything if omitted)
    Refresh { destination: Option<String> },
    /// Follow a document live, printing every applied revision
    Watch {
        application: String,
        profile: String,
        #[arg(default_value = "master")]
        label: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = cli.url.trim_end_matches('/').to_string();

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );

    match cli.command {
        Commands::Status => {
            let res = client.get(format!("{}/admin/status", base))
                .headers(headers)
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Cache => {
            let res = client.get(format!("{}/admin/cache", base))
                .headers(headers)
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Resolve { application, profile, label, refresh } => {
            let http = HttpConfigClient::new(&base, Duration::from_secs(30))?;
            let key = ConfigKey::new(application, profile, label.unwrap_or_default());
            let resolved = http.resolve(&key, refresh).await?;
            if resolved.stale {
                eprintln!("Warning: server returned a stale document");
            }
            println!("{}", serde_json::to_string_pretty(resolved.document.as_ref())?);
        }
        Commands::Refresh { destination } => {
            let url = match destination {
                Some(dest) => format!("{}/actuator/busrefresh/{}", base, dest),
                None => format!("{}/actuator/busrefresh", base),
            };
            let res = client.post(url).headers(headers).send().await?;
            print_response(res).await?;
        }
        Commands::Watch { application, profile, label } => {
            watch(&base, ConfigKey::new(application, profile, label)).await?;
        }
    }

    Ok(())
}

async fn watch(base: &str, key: ConfigKey) -> Result<(), Box<dyn std::error::Error>> {
    let retry = RetryConfig::default();
    let resolver = Arc::new(HttpConfigClient::new(base, Duration::from_secs(30))?);
    let agent = ClientRefreshAgent::start(resolver, key, retry.clone()).await?;
    println!("{} @ {}", agent.key(), agent.snapshot().revision);

    let ws_url = format!("{}/bus/subscribe", base.replacen("http", "ws", 1));
    let shutdown = Arc::new(Shutdown::new());
    let (frames, _conn) = RemoteSubscriber::new(&ws_url, retry)?.spawn(shutdown.subscribe());
    let run = tokio::spawn(agent.clone().run(frames, shutdown.subscribe()));

    let printer = {
        let agent = agent.clone();
        tokio::spawn(async move {
            let mut last = agent.snapshot().revision.clone();
            loop {
                tokio::time::sleep(Duration::from_millis(250)).await;
                let snap = agent.snapshot();
                if snap.revision != last {
                    println!("{} @ {} (event {:?})", agent.key(), snap.revision, snap.event_id);
                    last = snap.revision.clone();
                }
            }
        })
    };

    shutdown_signal().await;
    shutdown.trigger();
    printer.abort();
    let _ = run.await;
    Ok(())
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: relay returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
