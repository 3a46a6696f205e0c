//! MeetSync chat bridge: reads inbound chat messages as JSON lines on stdin and
//! writes replies as JSON lines on stdout.
//!
//! Usage: `meetsync < messages.jsonl`, or spawned by a chat connector that
//! pipes events through it. Logs go to stderr (`RUST_LOG`, default `info`).

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use meetsync_lib::config::load_config;
use meetsync_lib::gateway::RestGateway;
use meetsync_lib::scheduler::Scheduler;
use meetsync_lib::types::InboundMessage;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config =
        load_config().map_err(|e| anyhow::anyhow!("Failed to load MeetSync config: {e}"))?;
    let gateway = RestGateway::new(&config)
        .map_err(|e| anyhow::anyhow!("Failed to set up gateway client: {e}"))?;
    let scheduler = Scheduler::new(&config, Arc::new(gateway));
    log::info!(
        "MeetSync ready (timezone {}, workday {}:00-{}:00)",
        config.timezone,
        config.workday_start_hour,
        config.workday_end_hour
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let message: InboundMessage = match serde_json::from_str(&line) {
            Ok(m) => m,
            Err(e) => {
                log::warn!("Skipping malformed message: {}", e);
                continue;
            }
        };

        if let Some(reply) = scheduler.handle(&message).await {
            let mut out = serde_json::to_string(&reply)?;
            out.push('\n');
            stdout.write_all(out.as_bytes()).await?;
            stdout.flush().await?;
            log::debug!("Reply sent to chat={}", reply.chat_id);
        }
    }

    Ok(())
}
