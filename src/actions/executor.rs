//! Action executor
//!
//! Runs a batch of commands on a cumulative schedule, resolving each
//! element-bound command against the live document, showing the cursor
//! affordance before the effect and reporting one [`ActionResult`] per
//! command plus a [`BatchSummary`].

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

use crate::actions::command::{ActionType, Command};
use crate::actions::cursor::{CursorAffordance, VirtualCursor};
use crate::actions::effects::{self, SubmitVia};
use crate::actions::resolver::{Finder, Strategy};
use crate::actions::select::{extract_target_value, smart_select};
use crate::core::config::ExecutorConfig;
use crate::core::{epoch_millis, PilotError, Result};
use crate::dom::{NodeId, Page};

/// Default `wait` duration when a command names none
const DEFAULT_WAIT_MS: u64 = 1000;

/// Outcome of one command
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ActionResult {
    pub success: bool,
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_id: Option<String>,
    pub element_found: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<Strategy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_option: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    /// Epoch milliseconds at which the command started
    pub timestamp: i64,
}

impl ActionResult {
    fn for_command(command: &Command) -> Self {
        Self {
            action: command.action.name().to_string(),
            command_id: command.command_id.clone(),
            ..Default::default()
        }
    }
}

/// Effect-specific payload merged into a result
#[derive(Debug, Default)]
struct Outcome {
    message: String,
    value: Option<String>,
    text: Option<String>,
    selected_option: Option<String>,
    selected_value: Option<String>,
    warning: Option<String>,
}

impl Outcome {
    fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchSummary {
    pub total_actions: usize,
    pub successful_actions: usize,
    pub failed_actions: usize,
    pub results: Vec<ActionResult>,
    /// Epoch milliseconds
    pub completed_at: i64,
}

impl BatchSummary {
    fn from_results(results: Vec<ActionResult>, completed_at: i64) -> Self {
        let successful_actions = results.iter().filter(|r| r.success).count();
        Self {
            total_actions: results.len(),
            successful_actions,
            failed_actions: results.len() - successful_actions,
            results,
            completed_at,
        }
    }
}

/// Messages streamed while a batch runs
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ExecutorMessage {
    ActionResult {
        result: ActionResult,
        command_id: Option<String>,
        index: usize,
        total: usize,
    },
    ActionsComplete {
        summary: BatchSummary,
    },
}

/// Epoch clock that advances with tokio time, so paused-time runs report
/// the scheduled timestamps
#[derive(Debug, Clone, Copy)]
struct Clock {
    epoch_ms: i64,
    origin: Instant,
}

impl Clock {
    fn new() -> Self {
        Self {
            epoch_ms: epoch_millis(),
            origin: Instant::now(),
        }
    }

    fn now_ms(&self) -> i64 {
        self.epoch_ms + self.origin.elapsed().as_millis() as i64
    }
}

pub struct ActionExecutor {
    page: Page,
    config: ExecutorConfig,
    cursor: Arc<dyn CursorAffordance>,
    clock: Clock,
}

impl std::fmt::Debug for ActionExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionExecutor")
            .field("config", &self.config)
            .field("cursor", &self.cursor.name())
            .finish()
    }
}

impl ActionExecutor {
    /// Must be created inside a tokio runtime (the clock reads tokio time)
    pub fn new(page: Page, config: ExecutorConfig) -> Self {
        let cursor = Arc::new(VirtualCursor::new(Duration::from_millis(config.cursor_animation_ms)));
        Self {
            page,
            config,
            cursor,
            clock: Clock::new(),
        }
    }

    pub fn with_cursor(mut self, cursor: Arc<dyn CursorAffordance>) -> Self {
        self.cursor = cursor;
        self
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Nominal start offsets of each command relative to the batch start.
    ///
    /// The first command starts after its own `delay_before` (default 0).
    /// Each later one starts after the previous start, the previous slot
    /// (a wait's duration, otherwise nothing) and its own `delay_before`
    /// (default `default_delay_ms`).
    pub fn schedule(&self, commands: &[Command]) -> Vec<Duration> {
        let mut starts = Vec::with_capacity(commands.len());
        let mut previous: Option<(Duration, &Command)> = None;
        for command in commands {
            let start = match previous {
                None => Duration::from_millis(command.delay_before.unwrap_or(0)),
                Some((prev_start, prev)) => {
                    prev_start
                        + slot(prev)
                        + Duration::from_millis(command.delay_before.unwrap_or(self.config.default_delay_ms))
                }
            };
            starts.push(start);
            previous = Some((start, command));
        }
        starts
    }

    /// Run a batch without streaming
    pub async fn execute_batch(&self, commands: Vec<Command>) -> BatchSummary {
        self.run_batch(commands, None).await
    }

    /// Run a batch, sending an `action_result` per command and a final
    /// `actions_complete` on `outbound`
    pub async fn execute_batch_streaming(
        &self,
        commands: Vec<Command>,
        outbound: UnboundedSender<ExecutorMessage>,
    ) -> BatchSummary {
        self.run_batch(commands, Some(outbound)).await
    }

    async fn run_batch(
        &self,
        commands: Vec<Command>,
        outbound: Option<UnboundedSender<ExecutorMessage>>,
    ) -> BatchSummary {
        let starts = self.schedule(&commands);
        let total = commands.len();
        let batch_start = Instant::now();
        info!(total, "executing batch");

        // Gaps are kept relative to the previous command's actual start, so
        // a slow command pushes the rest of the batch back instead of
        // eating into the next delay
        let mut due = batch_start + starts.first().copied().unwrap_or_default();
        let mut results = Vec::with_capacity(total);
        for (index, command) in commands.iter().enumerate() {
            debug!(index, action = %command.action, "awaiting delay");
            time::sleep_until(due).await;
            let started = Instant::now();
            if let Some(next) = starts.get(index + 1) {
                due = started + next.saturating_sub(starts[index]);
            }
            let result = self.execute(command).await;
            if !result.success {
                warn!(index, action = %result.action, error = ?result.error, "action failed");
            }
            if let Some(tx) = &outbound {
                let _ = tx.send(ExecutorMessage::ActionResult {
                    command_id: result.command_id.clone(),
                    result: result.clone(),
                    index,
                    total,
                });
            }
            results.push(result);
        }

        let summary = BatchSummary::from_results(results, self.clock.now_ms());
        info!(
            total = summary.total_actions,
            failed = summary.failed_actions,
            "batch complete"
        );
        if let Some(tx) = &outbound {
            let _ = tx.send(ExecutorMessage::ActionsComplete {
                summary: summary.clone(),
            });
        }
        summary
    }

    /// Run one command immediately. Never panics or errors: failures are
    /// reported in the result, stamped with the time the command started.
    pub async fn execute(&self, command: &Command) -> ActionResult {
        let mut result = ActionResult::for_command(command);
        result.timestamp = self.clock.now_ms();
        match self.perform(command, &mut result).await {
            Ok(outcome) => {
                result.success = true;
                result.message = Some(outcome.message);
                result.value = outcome.value;
                result.text = outcome.text;
                result.selected_option = outcome.selected_option;
                result.selected_value = outcome.selected_value;
                result.warning = outcome.warning;
            }
            Err(e) => {
                result.success = false;
                result.error = Some(match e {
                    PilotError::Action(message) => message,
                    other => other.to_string(),
                });
            }
        }
        result
    }

    async fn perform(&self, command: &Command, result: &mut ActionResult) -> Result<Outcome> {
        if let ActionType::Unknown(name) = &command.action {
            return Err(PilotError::action(format!("Unknown action type: {}", name)));
        }
        if command.is_elementless() {
            return self.perform_elementless(command).await;
        }

        debug!(action = %command.action, target = %command.target_label(), "resolving");
        let found = Finder::find_with_strategy(&self.page.read(), command);
        let Some((node, strategy)) = found else {
            return Err(PilotError::ElementNotFound(command.target_label()));
        };
        result.element_found = true;
        result.strategy = Some(strategy);

        if self.shows_cursor(command) {
            let point = self.page.read().client_rect(node).center();
            self.cursor.move_to(point).await;
            if command.action == ActionType::Click {
                self.cursor.click_effect().await;
            }
        }
        debug!(action = %command.action, %node, "applying");
        self.perform_on(command, node).await
    }

    fn shows_cursor(&self, command: &Command) -> bool {
        self.config.cursor_enabled && command.options.show_cursor != Some(false)
    }

    async fn perform_elementless(&self, command: &Command) -> Result<Outcome> {
        match command.action {
            ActionType::Wait => {
                let duration = slot(command);
                time::sleep(duration).await;
                Ok(Outcome::message(format!("Waited {}ms", duration.as_millis())))
            }
            ActionType::Navigate => {
                let target = command
                    .value_str()
                    .or_else(|| command.text.clone())
                    .ok_or_else(|| PilotError::action("Navigate needs a URL"))?;
                let location = effects::navigate(&self.page, &target)?;
                Ok(Outcome {
                    value: Some(location.clone()),
                    ..Outcome::message(format!("Navigated to {}", location))
                })
            }
            ActionType::Scroll => {
                let direction = command
                    .options
                    .direction
                    .clone()
                    .or_else(|| command.value_str().filter(|v| v.parse::<f64>().is_err()))
                    .unwrap_or_else(|| "down".to_string());
                let amount = command
                    .options
                    .amount
                    .or_else(|| command.value_f64())
                    .unwrap_or(self.config.scroll_amount);
                let (x, y) = effects::scroll_window(&self.page, &direction, amount)?;
                Ok(Outcome::message(format!("Scrolled window {} to ({}, {})", direction, x, y)))
            }
            _ => Err(PilotError::action(format!(
                "Action {} needs a target element",
                command.action
            ))),
        }
    }

    async fn perform_on(&self, command: &Command, node: NodeId) -> Result<Outcome> {
        let page = &self.page;
        let label = command.target_label();
        match &command.action {
            ActionType::Click => {
                effects::click(page, node)?;
                Ok(Outcome::message(format!("Clicked {}", label)))
            }
            ActionType::Type => {
                let text = command
                    .value_str()
                    .or_else(|| command.text.clone())
                    .ok_or_else(|| PilotError::action("No text to type"))?;
                let value = effects::type_text(page, node, &text, command.options.clear.unwrap_or(true))?;
                Ok(Outcome {
                    value: Some(value),
                    ..Outcome::message(format!("Typed into {}", label))
                })
            }
            ActionType::Clear => {
                effects::clear(page, node)?;
                Ok(Outcome::message(format!("Cleared {}", label)))
            }
            ActionType::Scroll => {
                effects::scroll_into_view(page, node)?;
                let how = if command.options.smooth.unwrap_or(true) { "smoothly " } else { "" };
                Ok(Outcome::message(format!("Scrolled {}to {}", how, label)))
            }
            ActionType::Hover => {
                effects::hover(page, node)?;
                Ok(Outcome::message(format!("Hovered {}", label)))
            }
            ActionType::Focus => {
                effects::focus(page, node)?;
                Ok(Outcome::message(format!("Focused {}", label)))
            }
            ActionType::Submit => {
                let via = effects::submit(page, node)?;
                Ok(Outcome::message(match via {
                    SubmitVia::Form => "Submitted form".to_string(),
                    SubmitVia::AncestorForm => "Submitted enclosing form".to_string(),
                    SubmitVia::Click => format!("No form found; clicked {}", label),
                }))
            }
            ActionType::Check | ActionType::Uncheck => {
                let checked = command.action == ActionType::Check;
                let changed = effects::set_checked(page, node, checked)?;
                let state = if checked { "Checked" } else { "Unchecked" };
                Ok(Outcome {
                    value: Some(checked.to_string()),
                    ..Outcome::message(if changed {
                        format!("{} {}", state, label)
                    } else {
                        format!("{} was already {}", label, state.to_lowercase())
                    })
                })
            }
            ActionType::GetValue => {
                let value = effects::read_value(&page.read(), node)?;
                Ok(Outcome {
                    value: Some(value),
                    ..Outcome::message(format!("Read value of {}", label))
                })
            }
            ActionType::GetText => {
                let text = effects::read_text(&page.read(), node)?;
                Ok(Outcome {
                    text: Some(text),
                    ..Outcome::message(format!("Read text of {}", label))
                })
            }
            ActionType::Select => {
                let target = extract_target_value(command)
                    .ok_or_else(|| PilotError::action("No option to select was given"))?;
                let outcome = smart_select(page, Some(node), &target, &self.config).await?;
                Ok(Outcome {
                    message: outcome.message,
                    value: outcome.selected_value.clone(),
                    text: None,
                    selected_option: outcome.selected_option,
                    selected_value: outcome.selected_value,
                    warning: outcome.warning,
                })
            }
            ActionType::Wait | ActionType::Navigate => self.perform_elementless(command).await,
            ActionType::Unknown(name) => Err(PilotError::action(format!("Unknown action type: {}", name))),
        }
    }
}

/// Time a command reserves after it starts
fn slot(command: &Command) -> Duration {
    match command.action {
        ActionType::Wait => Duration::from_millis(
            command
                .value_f64()
                .filter(|ms| ms.is_finite() && *ms >= 0.0)
                .map_or(DEFAULT_WAIT_MS, |ms| ms as u64),
        ),
        _ => Duration::ZERO,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Rect;
    use crate::dom::Document;
    use serde_json::json;

    fn page() -> Page {
        let mut doc = Document::with_body();
        let body = doc.body().unwrap();
        let open = doc.append_element(body, "button", &[("id", "open")]);
        doc.append_text(open, "Open");
        doc.set_rect(open, Rect::new(10.0, 10.0, 80.0, 30.0));
        let q = doc.append_element(body, "input", &[("id", "q")]);
        doc.set_rect(q, Rect::new(10.0, 50.0, 200.0, 30.0));
        let terms = doc.append_element(body, "input", &[("id", "terms"), ("type", "checkbox")]);
        doc.set_rect(terms, Rect::new(10.0, 90.0, 20.0, 20.0));
        Page::new(doc)
    }

    fn commands(value: serde_json::Value) -> Vec<Command> {
        crate::actions::parse_batch(&value).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_is_cumulative() {
        let executor = ActionExecutor::new(page(), ExecutorConfig::default());
        let batch = commands(json!([
            {"action": "click", "selector": "#open"},
            {"action": "wait", "value": 500},
            {"action": "type", "selector": "#q", "value": "hello", "delay_before": 50},
            {"action": "click", "selector": "#open"}
        ]));
        let starts: Vec<u64> = executor
            .schedule(&batch)
            .into_iter()
            .map(|d| d.as_millis() as u64)
            .collect();
        assert_eq!(starts, vec![0, 300, 850, 1150]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_rejects_non_checkbox() {
        let executor = ActionExecutor::new(page(), ExecutorConfig::default());
        let ok = executor
            .execute(&Command::new(ActionType::Check).with_selector("#terms"))
            .await;
        assert!(ok.success, "{:?}", ok.error);
        let bad = executor
            .execute(&Command::new(ActionType::Check).with_selector("#q"))
            .await;
        assert!(!bad.success);
        assert!(bad.element_found);
        assert!(bad.error.unwrap().contains("checkbox"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_and_missing_targets() {
        let executor = ActionExecutor::new(page(), ExecutorConfig::default());
        let unknown = executor
            .execute(&Command::new(ActionType::from_name("teleport")))
            .await;
        assert!(!unknown.success);
        assert_eq!(unknown.error.as_deref(), Some("Unknown action type: teleport"));

        let missing = executor
            .execute(&Command::new(ActionType::Click).with_selector("#nope"))
            .await;
        assert!(!missing.success);
        assert!(!missing.element_found);
        assert!(missing.error.unwrap().starts_with("Element not found"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cursor_precedes_effect() {
        let page = page();
        let executor = ActionExecutor::new(page.clone(), ExecutorConfig::default());
        let start = Instant::now();
        let result = executor
            .execute(&Command::new(ActionType::Click).with_selector("#open"))
            .await;
        assert!(result.success);
        // move (250ms) plus click ripple (125ms)
        assert_eq!(start.elapsed(), Duration::from_millis(375));

        let mut quiet = Command::new(ActionType::Click).with_selector("#open");
        quiet.options.show_cursor = Some(false);
        let start = Instant::now();
        executor.execute(&quiet).await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reads_and_window_scroll() {
        let page = page();
        let executor = ActionExecutor::new(page.clone(), ExecutorConfig::default());
        let typed = executor
            .execute(&Command::new(ActionType::Type).with_selector("#q").with_value("rust"))
            .await;
        assert_eq!(typed.value.as_deref(), Some("rust"));
        let read = executor
            .execute(&Command::new(ActionType::GetValue).with_selector("#q"))
            .await;
        assert_eq!(read.value.as_deref(), Some("rust"));
        let text = executor
            .execute(&Command::new(ActionType::GetText).with_selector("#open"))
            .await;
        assert_eq!(text.text.as_deref(), Some("Open"));

        let scroll = executor.execute(&Command::new(ActionType::Scroll)).await;
        assert!(scroll.success);
        assert!(!scroll.element_found);
    }
}
