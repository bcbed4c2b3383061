//! Command resolution and execution
//!
//! Commands are resolved against the live document at execution time,
//! never against the index.

pub mod command;
pub mod cursor;
pub mod effects;
pub mod executor;
pub mod resolver;
pub mod select;

pub use command::{parse_batch, ActionType, Command, CommandOptions};
pub use cursor::{CursorAffordance, VirtualCursor};
pub use executor::{ActionExecutor, ActionResult, BatchSummary, ExecutorMessage};
pub use resolver::{Finder, Strategy};
pub use select::{classify_select_target, extract_target_value, SelectOutcome, SelectTarget};
