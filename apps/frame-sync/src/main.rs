use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use frame_sync::config::{
    FALLBACK_HEIGHT_VAR, GUEST_URL_VAR, HOST_URL_VAR, PINNED_HEIGHT_VAR, POLL_ATTEMPTS_VAR,
    POLL_INTERVAL_VAR, RETRY_VAR,
};
use frame_sync::telemetry::logging::{self, LogConfig, LogLevel};
use frame_sync::{
    GuestConfig, GuestFrameReporter, HostConfig, HostFrameController, RetryPolicy, RetryStrategy,
    SimulatedDocument, Window,
};
use tracing::info;

// Long enough for both event loops to drain a round trip.
const SETTLE: Duration = Duration::from_millis(50);

#[derive(Parser, Debug)]
#[command(
    name = "frame-sync",
    about = "Run a host/guest frame height handshake between two in-process windows"
)]
struct Cli {
    #[arg(long, env = GUEST_URL_VAR, default_value = "https://guest.example/demo")]
    guest_url: String,

    #[arg(
        long,
        env = HOST_URL_VAR,
        default_value = "https://host.example/mini-projects/codeblock"
    )]
    host_url: String,

    #[arg(long, env = PINNED_HEIGHT_VAR, help = "Height the host imposes on the guest")]
    pinned_height: Option<u32>,

    #[arg(long, env = FALLBACK_HEIGHT_VAR, help = "Host height until the guest reports")]
    fallback_height: Option<u32>,

    #[arg(long, default_value_t = 620, help = "Natural height of the guest's content")]
    content_height: u32,

    #[arg(long, value_enum, env = RETRY_VAR, default_value_t = RetryStrategy::Event)]
    retry: RetryStrategy,

    #[arg(
        long,
        env = POLL_ATTEMPTS_VAR,
        default_value_t = RetryPolicy::DEFAULT_POLL_ATTEMPTS,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    poll_attempts: u32,

    #[arg(long, env = POLL_INTERVAL_VAR, default_value_t = 25)]
    poll_interval_ms: u64,

    #[arg(long, default_value_t = 100, help = "Delay before the frame finishes loading")]
    guest_delay_ms: u64,

    #[arg(long, value_enum, default_value_t = LogLevel::Info)]
    log_level: LogLevel,

    #[arg(long, help = "Write logs to a file instead of stderr")]
    log_file: Option<PathBuf>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    logging::init(&LogConfig {
        level: cli.log_level,
        file: cli.log_file.clone(),
    })
    .context("initializing logging")?;

    let host_config = HostConfig {
        guest_url: cli.guest_url.clone(),
        pinned_height: cli.pinned_height,
        fallback_height: cli.fallback_height,
    };
    let policy = cli
        .retry
        .into_policy(cli.poll_attempts, Duration::from_millis(cli.poll_interval_ms));

    let host_window = Window::top(&cli.host_url);
    let guest_window = Window::embed(&host_window, &cli.guest_url);
    let host_loop = tokio::spawn(host_window.clone().run_event_loop());
    let guest_loop = tokio::spawn(guest_window.clone().run_event_loop());

    let host = HostFrameController::mount(host_config, Arc::new(host_window.channel()), policy);
    info!(
        height = host.resolved_height(),
        retry = cli.retry.as_str(),
        "host mounted"
    );

    tokio::time::sleep(Duration::from_millis(cli.guest_delay_ms)).await;
    let guest = GuestFrameReporter::activate(
        GuestConfig::new(cli.host_url.clone()),
        Arc::new(guest_window.channel()),
        SimulatedDocument::shared(cli.content_height),
    );
    host.attach_frame_handle(guest_window.downgrade());
    info!("frame loaded");

    guest.on_render();
    tokio::time::sleep(SETTLE).await;
    // Re-render after the handshake, as a component would on state change.
    guest.on_render();
    tokio::time::sleep(SETTLE).await;

    println!(
        "host resolved height: {}px ({:?})",
        host.resolved_height(),
        host.phase()
    );
    println!(
        "guest child height:   {}px ({:?})",
        guest.child_height(),
        guest.phase()
    );

    host.teardown();
    guest.teardown();
    host_window.close();
    guest_window.close();
    host_loop.await.context("host event loop")?;
    guest_loop.await.context("guest event loop")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_flag_accepts_long_names() {
        for (value, expected) in [
            ("poll", RetryStrategy::Poll),
            ("polling", RetryStrategy::Poll),
            ("event", RetryStrategy::Event),
            ("event-driven", RetryStrategy::Event),
        ] {
            let cli = Cli::try_parse_from(["frame-sync", "--retry", value]).expect("cli");
            assert_eq!(cli.retry, expected);
        }
        assert!(Cli::try_parse_from(["frame-sync", "--retry", "sometimes"]).is_err());
    }
}
