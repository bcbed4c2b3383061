//! Interactive REPL for pagepilot
//!
//! Reads shortcuts or raw protocol messages, hands them to the page
//! controller and prints every outbound message it produces.

use std::io::{self, BufRead, Write};

use serde_json::Value;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::bridge::PageController;
use crate::cli::commands::{handle_command, CommandResult};
use crate::core::{Config, Result};
use crate::dom::Page;

/// Interactive REPL (Read-Eval-Print Loop)
pub struct Repl {
    controller: PageController,
    outbound: UnboundedReceiver<Value>,
    source: String,
}

impl Repl {
    /// Create a REPL over a loaded page. Must be called inside a tokio
    /// runtime; background scanning starts immediately.
    pub fn new(page: Page, config: Config, source: impl Into<String>) -> Self {
        let (mut controller, outbound) = PageController::new(page, config);
        controller.start();
        Self {
            controller,
            outbound,
            source: source.into(),
        }
    }

    /// Run the REPL
    pub async fn run(&mut self) -> Result<()> {
        self.print_banner();

        let stdin = io::stdin();
        let mut stdout = io::stdout();

        loop {
            print!("page> ");
            stdout.flush()?;

            let mut input = String::new();
            match stdin.lock().read_line(&mut input) {
                Ok(0) => {
                    // EOF (Ctrl+D)
                    println!("\nGoodbye!");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    eprintln!("Error reading input: {}", e);
                    continue;
                }
            }

            match handle_command(&input) {
                CommandResult::Exit => {
                    println!("\nGoodbye!");
                    break;
                }
                CommandResult::Handled(output) => println!("{}\n", output),
                CommandResult::None => continue,
                CommandResult::Send(message) => {
                    self.controller.handle_message(message).await;
                    self.print_outbound()?;
                }
            }
        }

        self.controller.stop();
        Ok(())
    }

    fn print_outbound(&mut self) -> Result<()> {
        while let Ok(message) = self.outbound.try_recv() {
            println!("{}", serde_json::to_string_pretty(&message)?);
        }
        println!();
        Ok(())
    }

    /// Print the startup banner
    fn print_banner(&self) {
        let config = self.controller.config();
        println!("pagepilot - live element index and action engine");
        println!("─────────────────────────────────────────────");
        println!("Page:        {}", self.source);
        println!("Location:    {}", self.controller.page().read().location());
        println!(
            "Scan:        every {}ms, {}ms budget",
            config.index.scan_interval_ms, config.index.max_scan_millis
        );
        println!(
            "Cursor:      {}",
            if config.executor.cursor_enabled { "on" } else { "off" }
        );
        println!();
        println!("Commands: help, find, stats, click, type, select, exit");
        println!("─────────────────────────────────────────────");
    }
}
