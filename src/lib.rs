//! pagepilot - live element index and action engine
//!
//! Keeps a budgeted, continuously refreshed index of the interactive
//! elements on a page, tracks scroll containers and media players, and
//! executes batches of high-level actions (click, type, select, ...)
//! against the page on behalf of an external agent.
//!
//! # Architecture
//!
//! - **Core**: Shared types, configuration, and error handling
//! - **Dom**: The live document tree, selectors, XPath, and the event bus
//! - **Index**: Element identities, budgeted scanning, intent search
//! - **Detectors**: Scroll container and media player tracking
//! - **Serializer**: The trust boundary every outbound value passes through
//! - **Actions**: Finder, smart select, cursor and the action executor
//! - **Bridge**: Inbound message decoding and the page controller
//! - **CLI**: Command-line interface and REPL
//!
//! # Usage
//!
//! ```rust,no_run
//! use pagepilot::{Config, Page, PageController};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() {
//!     let page = Page::from_html(r#"<button id="go">Go</button>"#);
//!     let (mut controller, mut outbound) = PageController::new(page, Config::default());
//!     controller.start();
//!
//!     controller
//!         .handle_message(json!({"actions": [{"action": "click", "selector": "#go"}]}))
//!         .await;
//!     while let Ok(message) = outbound.try_recv() {
//!         println!("{}", message);
//!     }
//! }
//! ```

pub mod actions;
pub mod bridge;
pub mod cli;
pub mod core;
pub mod detectors;
pub mod dom;
pub mod index;
pub mod serializer;

// Re-export commonly used items
pub use actions::{ActionExecutor, ActionResult, BatchSummary, Command};
pub use bridge::PageController;
pub use cli::Repl;
pub use core::{Config, PilotError, Result};
pub use dom::Page;
pub use index::ElementIndex;
