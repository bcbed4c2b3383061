//! pagepilot - live element index and action engine
//!
//! Main entry point for the CLI application.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use pagepilot::bridge::PageController;
use pagepilot::cli::Repl;
use pagepilot::dom::Page;
use pagepilot::Config;
use serde_json::{json, Value};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// pagepilot - live element index and action engine for page trees
#[derive(Parser, Debug)]
#[command(name = "pagepilot")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Enable debug output
    #[arg(long, short = 'd', global = true)]
    debug: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// Config file (defaults to the user config directory)
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a command batch against a page and print outbound messages
    Run {
        /// HTML file to load
        #[arg(long, short = 'p')]
        page: PathBuf,
        /// JSON batch file, or '-' for stdin
        #[arg(long, short = 'b')]
        batch: PathBuf,
        /// Location URL the page is served from
        #[arg(long)]
        location: Option<String>,
        /// Disable the cursor affordance
        #[arg(long)]
        no_cursor: bool,
    },
    /// Index a page and print statistics or an intent search
    Scan {
        #[arg(long, short = 'p')]
        page: PathBuf,
        /// Intent to search for instead of printing statistics
        #[arg(long, short = 'i')]
        intent: Option<String>,
    },
    /// Interactive session over a page
    Repl {
        #[arg(long, short = 'p')]
        page: PathBuf,
        #[arg(long)]
        location: Option<String>,
    },
    /// Print the default configuration
    Config {
        /// Write the effective configuration to the user config file
        #[arg(long, short = 'w')]
        write: bool,
    },
}

fn init_logging(config: &Config, debug: bool, json_logs: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level))
    };
    let registry = tracing_subscriber::registry().with(filter);
    if json_logs || config.logging.json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init();
    }
}

fn load_page(path: &Path, location: Option<String>) -> anyhow::Result<Page> {
    let html = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read page {}", path.display()))?;
    let page = Page::from_html(&html);
    let location = location.unwrap_or_else(|| match std::fs::canonicalize(path) {
        Ok(absolute) => format!("file://{}", absolute.display()),
        Err(_) => "about:blank".to_string(),
    });
    page.write().set_location(location);
    Ok(page)
}

fn read_batch(path: &Path) -> anyhow::Result<Value> {
    let text = if path.as_os_str() == "-" {
        std::io::read_to_string(std::io::stdin())?
    } else {
        std::fs::read_to_string(path).with_context(|| format!("Failed to read batch {}", path.display()))?
    };
    serde_json::from_str(&text).context("Batch is not valid JSON")
}

fn print_outbound(rx: &mut tokio::sync::mpsc::UnboundedReceiver<Value>) -> anyhow::Result<()> {
    while let Ok(message) = rx.try_recv() {
        println!("{}", serde_json::to_string(&message)?);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Build configuration
    let mut config = match &args.config {
        Some(path) => {
            let _ = dotenvy::dotenv();
            Config::load_from_path(path)?
        }
        None => Config::load(),
    };
    init_logging(&config, args.debug, args.json_logs);

    match args.command {
        Commands::Config { write: false } => {
            println!("# {}", Config::config_file().display());
            println!("{}", Config::default_config_toml());
        }

        Commands::Config { write: true } => {
            let path = config.save()?;
            info!(path = %path.display(), "configuration written");
            println!("Wrote {}", path.display());
        }

        Commands::Run {
            page,
            batch,
            location,
            no_cursor,
        } => {
            if no_cursor {
                config.executor.cursor_enabled = false;
            }
            let page = load_page(&page, location)?;
            let batch = read_batch(&batch)?;
            let (mut controller, mut rx) = PageController::new(page, config);
            controller.start();
            controller.handle_message(batch).await;
            controller.stop();
            print_outbound(&mut rx)?;
        }

        Commands::Scan { page, intent } => {
            let page = load_page(&page, None)?;
            let (controller, mut rx) = PageController::new(page, config);
            {
                let doc = controller.page().read();
                controller.index().lock().scan_to_completion(&doc);
            }
            let message = match intent {
                Some(intent) => json!({
                    "action": "dom_monitor_find_elements",
                    "intent": intent,
                    "requestId": "scan",
                }),
                None => json!({"action": "dom_monitor_get_stats", "requestId": "scan"}),
            };
            controller.handle_message(message).await;
            while let Ok(message) = rx.try_recv() {
                println!("{}", serde_json::to_string_pretty(&message)?);
            }
        }

        Commands::Repl { page, location } => {
            let source = page.display().to_string();
            let page = load_page(&page, location)?;
            let mut repl = Repl::new(page, config, source);
            repl.run().await?;
        }
    }

    Ok(())
}
