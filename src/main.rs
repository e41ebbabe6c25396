use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use url::Url;

use feedrelay::chat::{ConsoleChat, Destination};
use feedrelay::config::Config;
use feedrelay::feed::{AnonymousAuthenticator, FeedPoller, HttpBoardSource, MemoryCredentials};
use feedrelay::fetch::{FetchError, FetchRequest, ReqwestTransport, ResilientFetcher};
use feedrelay::preview::{InboundMessage, PreviewRetractionTracker, PreviewService, PreviewStyle};
use feedrelay::proxy::ProxyPool;
use feedrelay::settings::{FeedCursor, MediaSettings, MemorySettings};

#[derive(Parser, Debug)]
#[command(
    name = "feedrelay",
    about = "Board feed relay and link previews over a rotating proxy pool"
)]
struct Args {
    /// Path to the config file
    #[arg(long, value_name = "FILE", default_value = "feedrelay.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load the proxy list and show the pool
    Proxies,
    /// Fetch a URL through the proxy pool and print the body
    Fetch {
        #[arg(value_name = "URL")]
        url: Url,
    },
    /// Relay new posts of one board to stdout
    Watch {
        /// Cafe or community id
        #[arg(value_name = "SOURCE")]
        source: String,
        #[arg(value_name = "BOARD")]
        board: String,
        /// Relay posts after this sequence instead of starting at the newest
        #[arg(long, value_name = "SEQUENCE")]
        from: Option<u64>,
        /// Run a single cycle and exit
        #[arg(long)]
        once: bool,
    },
    /// Print a preview for the post links in a message
    Preview {
        #[arg(value_name = "TEXT")]
        text: String,
        /// Render as plain text instead of an embed
        #[arg(long)]
        plain: bool,
    },
    /// Print the effective configuration
    CheckConfig,
}

/// Where console runs pretend to deliver.
const CONSOLE_DESTINATION: Destination = Destination {
    server_id: 1,
    channel_id: 1,
};
/// Author of messages typed on the console.
const CONSOLE_USER: u64 = 1;

/// Exit code when every proxy is blacklisted.
const EXIT_DEPLETED: i32 = 2;
/// Exit code when the retry budget ran out.
const EXIT_EXHAUSTED: i32 = 3;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = Config::load(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    match args.command {
        Command::CheckConfig => {
            println!("{config:#?}");
            Ok(())
        }
        Command::Proxies => {
            let pool = load_pool(&config).await?;
            println!("{} proxies, {} available", pool.len(), pool.available());
            for status in pool.snapshot() {
                match status.blacklisted_for {
                    Some(remaining) => println!(
                        "  {}  blacklisted for {}s",
                        status.endpoint,
                        remaining.as_secs()
                    ),
                    None => println!("  {}  available", status.endpoint),
                }
            }
            Ok(())
        }
        Command::Fetch { url } => {
            let fetcher = build_fetcher(&config, load_pool(&config).await?);

            match fetcher.fetch_with_retry(&FetchRequest::get(url)).await {
                Ok(body) => {
                    println!("{body}");
                    Ok(())
                }
                Err(FetchError::ProxiesDepleted) => {
                    eprintln!("Error: every proxy is blacklisted. Try again later or add proxies.");
                    std::process::exit(EXIT_DEPLETED);
                }
                Err(e @ FetchError::RetriesExhausted { .. }) => {
                    eprintln!("Error: {e}. The origin kept rejecting our proxies.");
                    std::process::exit(EXIT_EXHAUSTED);
                }
                Err(e) => Err(e).context("Fetch failed"),
            }
        }
        Command::Watch {
            source,
            board,
            from,
            once,
        } => watch(&config, source, board, from, once).await,
        Command::Preview { text, plain } => {
            let pool = load_pool(&config).await?;
            let chat = Arc::new(ConsoleChat::new());
            let tracker = PreviewRetractionTracker::new(chat.clone(), config.tracker_settings());
            let service = PreviewService::new(
                build_fetcher(&config, pool),
                chat,
                Arc::new(MemorySettings::default()),
                tracker,
                config.preview.links_per_message,
            )
            .with_command_prefix(config.preview.command_prefix.clone())
            .with_default_style(config.preview.style);

            let message = InboundMessage {
                id: 0,
                destination: CONSOLE_DESTINATION,
                author_id: CONSOLE_USER,
                author_is_bot: false,
                content: text,
            };
            let style = plain.then_some(PreviewStyle::Text);
            if service.preview_command(&message, style).await == 0 {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}

async fn watch(
    config: &Config,
    source_id: String,
    board_id: String,
    from: Option<u64>,
    once: bool,
) -> Result<()> {
    let pool = load_pool(config).await?;
    let refresh = pool.clone().spawn_refresh_loop(config.proxy_refresh_interval());
    let source = HttpBoardSource::new(
        config.board.name.clone(),
        config.board_urls(),
        build_fetcher(config, pool),
    );

    let mut feed = FeedCursor::new(1, source_id, board_id, CONSOLE_DESTINATION.channel_id);
    feed.last_processed_sequence = from;
    let settings = MemorySettings::new([MediaSettings {
        feeds: vec![feed],
        ..MediaSettings::new(CONSOLE_DESTINATION.server_id)
    }]);

    let poller = FeedPoller::new(
        config.poller_settings(),
        Arc::new(settings),
        Arc::new(ConsoleChat::new()),
        Arc::new(source),
        Arc::new(AnonymousAuthenticator),
        Arc::new(MemoryCredentials::default()),
    );

    // First cycle right away; it sets the starting point when none was given
    let report = poller.run_cycle().await.unwrap_or_default();
    if once {
        refresh.abort();
        if report.feeds_failed > 0 {
            anyhow::bail!("Failed to update the board, see the log for details");
        }
        return Ok(());
    }

    tracing::info!(
        interval_secs = poller.settings().interval.as_secs(),
        "Watching board, press Ctrl-C to stop"
    );
    let ticker = poller.start();
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    ticker.abort();
    refresh.abort();
    Ok(())
}

fn build_fetcher(config: &Config, pool: Arc<ProxyPool>) -> ResilientFetcher {
    let limits = config.retry_limits();
    let transport = ReqwestTransport::new(config.fetch.user_agent.clone(), limits.attempt_timeout);
    ResilientFetcher::new(
        pool,
        Arc::new(transport),
        Arc::new(config.classifier()),
        config.blacklist_policy(),
        limits,
    )
}

async fn load_pool(config: &Config) -> Result<Arc<ProxyPool>> {
    let pool = Arc::new(ProxyPool::new(config.proxy_source()));
    let count = pool.refresh().await.context("Failed to load proxy list")?;
    if count == 0 {
        eprintln!("Warning: the proxy list is empty");
        eprintln!("Set [proxies] list_path or addresses in the config file.");
    }
    Ok(pool)
}
