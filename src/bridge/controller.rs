//! Page controller - the single composition point
//!
//! Owns the page, the shared index and its monitor, both detectors, the
//! serializer and the executor. Every outbound message is validated by the
//! serializer before it is sent.

use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, info, warn};

use crate::actions::{ActionExecutor, BatchSummary, Command, ExecutorMessage};
use crate::bridge::protocol::{self, InboundMessage, MediaTarget};
use crate::core::{Config, PilotError, Result};
use crate::detectors::{MediaCommand, MediaDetector, ScrollDetector};
use crate::dom::Page;
use crate::index::{monitor, ElementIdentity, ElementIndex, EntryFilter, IndexMonitor, IntentOptions, SharedIndex};
use crate::serializer::Serializer;

pub struct PageController {
    page: Page,
    config: Config,
    index: SharedIndex,
    monitor: Option<IndexMonitor>,
    scroll: ScrollDetector,
    media: MediaDetector,
    serializer: Serializer,
    executor: ActionExecutor,
    outbound: UnboundedSender<Value>,
}

impl std::fmt::Debug for PageController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageController")
            .field("entries", &self.index.lock().len())
            .field("monitoring", &self.monitor.is_some())
            .field("scroll", &self.scroll.state())
            .field("media", &self.media.state())
            .finish()
    }
}

impl PageController {
    /// Build the controller and the receiver its outbound messages go to
    pub fn new(page: Page, config: Config) -> (Self, UnboundedReceiver<Value>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        let index = ElementIndex::new(config.index.clone()).shared();
        let controller = Self {
            scroll: ScrollDetector::new(page.clone(), index.clone(), config.scroll.clone()),
            media: MediaDetector::new(page.clone(), index.clone(), config.media.clone()),
            serializer: Serializer::new(config.serializer.clone()),
            executor: ActionExecutor::new(page.clone(), config.executor.clone()),
            monitor: None,
            page,
            config,
            index,
            outbound,
        };
        (controller, rx)
    }

    pub fn page(&self) -> &Page {
        &self.page
    }

    pub fn index(&self) -> &SharedIndex {
        &self.index
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn serializer(&self) -> &Serializer {
        &self.serializer
    }

    pub fn executor(&self) -> &ActionExecutor {
        &self.executor
    }

    pub fn scroll_detector(&self) -> &ScrollDetector {
        &self.scroll
    }

    pub fn media_detector(&self) -> &MediaDetector {
        &self.media
    }

    /// Start the index monitor and both detectors. Must be called inside a
    /// tokio runtime.
    pub fn start(&mut self) {
        if self.monitor.is_none() {
            self.monitor = Some(IndexMonitor::start(
                self.page.clone(),
                self.index.clone(),
                &self.config.index,
            ));
        }
        self.scroll.start_detecting();
        self.media.start_detecting();
        info!("page controller started");
    }

    /// Stop every background task and release every listener
    pub fn stop(&mut self) {
        if let Some(mut monitor) = self.monitor.take() {
            monitor.stop();
        }
        self.scroll.stop_detecting();
        self.media.stop_detecting();
        debug!("page controller stopped");
    }

    /// Handle one inbound message. Replies and batch results go out on the
    /// outbound channel; nothing here fails outward.
    pub async fn handle_message(&self, message: Value) {
        let inbound = match protocol::parse_message(&message) {
            Ok(inbound) => inbound,
            Err(e) => {
                warn!(error = %e, "dropping malformed message");
                self.send(protocol::protocol_error(&e));
                return;
            }
        };
        debug!(?inbound, "inbound message");
        match inbound {
            InboundMessage::ExecuteActions(commands) => {
                self.run_batch(commands).await;
            }
            InboundMessage::GetAllElements { request_id, filter } => {
                self.send_all_elements(&request_id, &filter);
            }
            other => {
                let request_id = other.request_id().cloned().unwrap_or(Value::Null);
                let reply = match self.answer(other) {
                    Ok(data) => protocol::response(&request_id, data, true),
                    Err(e) => {
                        warn!(error = %e, "query failed");
                        protocol::error_response(&request_id, &e)
                    }
                };
                self.send(reply);
            }
        }
    }

    /// Run a batch, forwarding each executor message as it is produced
    pub async fn run_batch(&self, commands: Vec<Command>) -> BatchSummary {
        let (tx, mut rx) = mpsc::unbounded_channel::<ExecutorMessage>();
        let forward = async {
            while let Some(message) = rx.recv().await {
                match serde_json::to_value(&message) {
                    Ok(value) => self.send(value),
                    Err(e) => error!(error = %e, "executor message did not encode"),
                }
            }
        };
        let (summary, ()) = tokio::join!(self.executor.execute_batch_streaming(commands, tx), forward);
        summary
    }

    fn answer(&self, message: InboundMessage) -> Result<Value> {
        match message {
            InboundMessage::FindElements { intent, options, .. } => self.find_elements(&intent, &options),
            InboundMessage::GetStats { .. } => to_json(&self.index.lock().stats()),
            InboundMessage::Refresh { .. } => {
                let report = {
                    let doc = self.page.read();
                    self.index.lock().refresh(&doc)
                };
                let stats = self.index.lock().stats();
                Ok(json!({ "scan": to_json(&report)?, "stats": to_json(&stats)? }))
            }
            InboundMessage::ScrollGetAll { .. } => {
                let records = self.scroll.records();
                let doc = self.page.read();
                Ok(Value::Array(
                    records
                        .iter()
                        .map(|r| self.serializer.serialize_scroll_record(r, &doc))
                        .collect(),
                ))
            }
            InboundMessage::MediaGetAll { .. } => {
                let records = self.media.records();
                let doc = self.page.read();
                Ok(Value::Array(
                    records
                        .iter()
                        .map(|r| self.serializer.serialize_media_record(r, &doc))
                        .collect(),
                ))
            }
            InboundMessage::MediaControl { target, command, .. } => self.media_control(target, command),
            InboundMessage::ExecuteActions(_) | InboundMessage::GetAllElements { .. } => {
                Err(PilotError::protocol("Message is not a query"))
            }
        }
    }

    fn find_elements(&self, intent: &str, options: &IntentOptions) -> Result<Value> {
        if self.index.lock().is_empty() {
            monitor::scan_once(&self.page, &self.index);
        }
        let matches = self.index.lock().find_by_intent(intent, options);
        debug!(intent, found = matches.len(), "intent search");
        let items = matches
            .iter()
            .map(|m| {
                let mut value = self.serializer.serialize_element(&m.entry);
                if let Value::Object(fields) = &mut value {
                    fields.insert("score".to_string(), json!(crate::core::round2(m.score)));
                }
                value
            })
            .collect();
        Ok(Value::Array(items))
    }

    /// Reply with every matching entry, one message per chunk
    fn send_all_elements(&self, request_id: &Value, filter: &EntryFilter) {
        let chunks = {
            let index = self.index.lock();
            self.serializer.serialize_batch(index.get_all(filter))
        };
        let total_chunks = chunks.len().max(1);
        if chunks.is_empty() {
            let mut reply = protocol::response(request_id, json!([]), true);
            reply["chunk"] = json!(0);
            reply["totalChunks"] = json!(1);
            self.send(reply);
            return;
        }
        for (i, chunk) in chunks.into_iter().enumerate() {
            let mut reply = protocol::response(request_id, Value::Array(chunk), true);
            reply["chunk"] = json!(i);
            reply["totalChunks"] = json!(total_chunks);
            self.send(reply);
        }
    }

    fn media_control(&self, target: MediaTarget, command: MediaCommand) -> Result<Value> {
        let record = match &target {
            MediaTarget::Identity(identity) => self.media.record(&ElementIdentity::from(identity.as_str())),
            MediaTarget::Selector(selector) => {
                let node = self.page.read().query_selector(selector)?;
                node.and_then(|n| self.media.record_for_node(n))
            }
        }
        .ok_or_else(|| PilotError::ElementNotFound(format!("No tracked media element for {:?}", target)))?;

        let applied = self.media.control(&record.identity, command);
        let doc = self.page.read();
        let current = self.media.record(&record.identity).unwrap_or(record);
        Ok(json!({
            "applied": applied,
            "record": self.serializer.serialize_media_record(&current, &doc),
        }))
    }

    /// Validate and send; a value that fails validation is replaced by an
    /// error message
    fn send(&self, value: Value) {
        let message = match self.serializer.validate_json(value) {
            Ok(value) => value,
            Err(e) => {
                error!(error = %e, "outbound message failed validation");
                protocol::protocol_error(&e)
            }
        };
        if self.outbound.send(message).is_err() {
            debug!("outbound receiver dropped");
        }
    }
}

impl Drop for PageController {
    fn drop(&mut self) {
        self.stop();
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}
