//! alert-fanout: interactive operator console
//!
//! Reads alert text from stdin and publishes it on the configured channel.
//! Every alert received on the channel is printed to stdout.
//!
//! ## Commands
//! - `/recent`: print the cached recent alerts, oldest first
//! - `/quit`: drain and exit
//! - anything else: published as an alert
//!
//! ## Configuration
//! - ALERT_FANOUT_CONFIG: optional YAML config file
//! - ALERT_FANOUT__SECTION__KEY: overrides a single setting
//! - ALERT_FANOUT_LOG: tracing filter (default "info")

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

use alert_fanout::utils::bootstrap::{init_tracing, wait_for_shutdown_signal};
use alert_fanout::{Alert, AlertService, Config, FnHandler};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config = Config::load(None).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    let service = AlertService::from_config(config);
    service
        .on_alert_received(FnHandler::new("console", |alert: Arc<Alert>| {
            println!(
                "[{}] #{} {}",
                alert.timestamp().format("%H:%M:%S"),
                alert.sequence(),
                alert.payload()
            );
            Ok::<(), std::io::Error>(())
        }))
        .await;

    if let Err(e) = service.start().await {
        error!(error = %e, "Alert service failed to start");
        std::process::exit(1);
    }

    info!(channel = %service.channel(), "Type an alert and press enter; /recent lists history, /quit exits");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let shutdown_signal = wait_for_shutdown_signal();
    tokio::pin!(shutdown_signal);

    loop {
        let line = tokio::select! {
            result = &mut shutdown_signal => {
                if let Err(e) = result {
                    warn!(error = %e, "Signal handling unavailable");
                }
                info!("Shutdown signal received");
                break;
            }
            line = lines.next_line() => line?,
        };

        let Some(line) = line else {
            break;
        };

        match line.trim() {
            "/quit" => break,
            "/recent" => match service.list_recent().await {
                Ok(recent) if recent.is_empty() => println!("(no recent alerts)"),
                Ok(recent) => {
                    for (i, payload) in recent.iter().enumerate() {
                        println!("{:>2}. {}", i + 1, payload);
                    }
                }
                Err(e) => eprintln!("cannot list recent alerts: {}", e),
            },
            text => match service.send_alert(text).await {
                Ok(sequence) => info!(sequence, "Alert sent"),
                Err(e) if e.is_invalid_argument() => eprintln!("{}", e),
                Err(e) => eprintln!("alert not sent: {}", e),
            },
        }
    }

    service.shutdown().await?;
    Ok(())
}
