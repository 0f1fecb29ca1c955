use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use voiceover_shorts::config::Config;
use voiceover_shorts::factory::{build_gemini_client, run_factory, validate_credentials};
use voiceover_shorts::init;
use voiceover_shorts::queue::{is_supported_url, UrlQueue};

/// Turns queued YouTube/TikTok links into narrated vertical shorts.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// URLs to append to the queue before running
    #[arg(long, num_args = 1..)]
    urls: Vec<String>,

    /// Read URLs from stdin until `done` or EOF, then run
    #[arg(long)]
    add_urls: bool,

    /// Check directories, tools and API keys, then exit
    #[arg(long)]
    test: bool,

    /// Print the configuration summary and exit
    #[arg(long)]
    status: bool,

    /// Optional JSON configuration file
    #[arg(long, default_value = "config.json")]
    config: PathBuf,
}

async fn read_urls_from_stdin() -> Result<Vec<String>> {
    println!("Paste YouTube/TikTok links, one per line. Type `done` to finish.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut urls = Vec::new();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.eq_ignore_ascii_case("done") {
            break;
        }
        if line.is_empty() {
            continue;
        }
        if is_supported_url(line) {
            urls.push(line.to_string());
        } else {
            println!("Skipped (not a YouTube/TikTok link): {}", line);
        }
    }
    Ok(urls)
}

async fn self_test(cfg: &Config) -> Result<()> {
    init::ensure_directories(&cfg.paths).await?;
    let missing = init::missing_tools().await;
    if missing.is_empty() {
        println!("Tools: all found");
    } else {
        println!("Tools missing: {}", missing.join(", "));
    }

    let gemini = build_gemini_client(cfg)?;
    let rotation = validate_credentials(cfg, &gemini).await?;
    println!(
        "API keys: {}/{} working",
        rotation.working_count(),
        cfg.gemini.api_keys.len()
    );
    Ok(())
}

async fn run(cli: Cli) -> Result<i32> {
    let cfg = Config::load(&cli.config).await?;

    if cli.status {
        println!("{}", serde_json::to_string_pretty(&cfg.summary())?);
        return Ok(0);
    }

    if cli.test {
        self_test(&cfg).await?;
        return Ok(0);
    }

    let queue = UrlQueue::new(cfg.paths.url_file());
    let mut incoming = cli.urls;
    if cli.add_urls {
        incoming.extend(read_urls_from_stdin().await?);
    }
    if !incoming.is_empty() {
        let added = queue.add(&incoming).await?;
        tracing::info!("Queued {} new URL(s)", added);
    }

    let report = run_factory(&cfg).await?;
    Ok(report.exit_code())
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let code = match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            tracing::error!("{:#}", err);
            2
        }
    };
    std::process::exit(code);
}
