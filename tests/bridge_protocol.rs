//! Page controller integration tests
//!
//! Drives the controller with wire-format messages and checks every reply
//! that comes back out of the outbound channel.

use pagepilot::core::config::SerializerConfig;
use pagepilot::dom::Page;
use pagepilot::{Config, PageController};
use serde_json::{json, Value};
use tokio::sync::mpsc::UnboundedReceiver;

const PAGE: &str = r#"
<html><body>
  <nav><a href="/pricing">Pricing</a><a href="/contact">Contact sales</a></nav>
  <div id="feed" style="overflow-y: auto" data-rect="0,100,300,200" data-scroll-size="300,2000">
    <p>Post one</p>
  </div>
  <video id="clip" src="/clip.mp4" controls data-rect="0,320,320,180"></video>
  <form id="signup">
    <input id="email" name="email" placeholder="Email">
    <button id="join" type="submit">Join</button>
  </form>
</body></html>
"#;

fn controller() -> (PageController, UnboundedReceiver<Value>) {
    PageController::new(Page::from_html(PAGE), Config::default())
}

fn drain(rx: &mut UnboundedReceiver<Value>) -> Vec<Value> {
    let mut out = Vec::new();
    while let Ok(message) = rx.try_recv() {
        out.push(message);
    }
    out
}

#[tokio::test(start_paused = true)]
async fn test_find_elements_round_trip() {
    let (controller, mut rx) = controller();
    controller
        .handle_message(json!({
            "action": "dom_monitor_find_elements",
            "intent": "contact sales link",
            "options": {"limit": 3},
            "requestId": 42
        }))
        .await;

    let replies = drain(&mut rx);
    assert_eq!(replies.len(), 1);
    let reply = &replies[0];
    assert_eq!(reply["action"], "dom_monitor_response");
    assert_eq!(reply["requestId"], 42);
    assert_eq!(reply["success"], true);
    let found = reply["data"].as_array().unwrap();
    assert!(!found.is_empty() && found.len() <= 3);
    assert_eq!(found[0]["tagName"], "a");
    assert!(found[0]["score"].as_f64().unwrap() > 0.0);
}

#[tokio::test(start_paused = true)]
async fn test_batch_streams_results_then_summary() {
    let (controller, mut rx) = controller();
    controller
        .handle_message(json!({"payload": [
            {"action": "type", "selector": "#email", "value": "a@b.co", "id": "t"},
            {"action": "submit", "selector": "#join", "id": "s"}
        ]}))
        .await;

    let replies = drain(&mut rx);
    let actions: Vec<&str> = replies.iter().map(|r| r["action"].as_str().unwrap()).collect();
    assert_eq!(actions, vec!["action_result", "action_result", "actions_complete"]);
    assert_eq!(replies[0]["command_id"], "t");
    assert_eq!(replies[1]["index"], 1);
    assert_eq!(replies[1]["total"], 2);
    assert_eq!(replies[2]["summary"]["total_actions"], 2);
    assert_eq!(replies[2]["summary"]["failed_actions"], 0);

    let page = controller.page().read();
    let email = page.by_id("email").unwrap();
    assert_eq!(page.value(email).as_deref(), Some("a@b.co"));
}

#[tokio::test(start_paused = true)]
async fn test_malformed_messages_are_dropped_whole() {
    let (controller, mut rx) = controller();
    controller.handle_message(json!({"actions": []})).await;
    controller
        .handle_message(json!([{"action": "type", "selector": "#email", "value": "x"}, 7]))
        .await;
    controller.handle_message(json!("click")).await;

    let replies = drain(&mut rx);
    assert_eq!(replies.len(), 3);
    for reply in &replies {
        assert_eq!(reply["action"], "error");
        assert_eq!(reply["error_type"], "protocol_error");
    }
    // Nothing from the half-valid batch ran
    let page = controller.page().read();
    let email = page.by_id("email").unwrap();
    assert_eq!(page.value(email).as_deref(), Some(""));
}

#[tokio::test(start_paused = true)]
async fn test_stats_refresh_and_chunked_listing() {
    let mut config = Config::default();
    config.serializer = SerializerConfig {
        chunk_size: 2,
        ..Default::default()
    };
    let (controller, mut rx) = PageController::new(Page::from_html(PAGE), config);

    controller
        .handle_message(json!({"action": "dom_monitor_refresh", "requestId": "r"}))
        .await;
    controller
        .handle_message(json!({"action": "dom_monitor_get_stats", "requestId": "s"}))
        .await;
    let replies = drain(&mut rx);
    assert_eq!(replies[0]["requestId"], "r");
    assert!(replies[0]["data"]["scan"]["visited"].as_u64().unwrap() > 0);
    let total = replies[1]["data"]["total_entries"].as_u64().unwrap() as usize;
    assert!(total > 0);

    controller
        .handle_message(json!({"action": "dom_monitor_get_all_elements", "requestId": "all"}))
        .await;
    let chunks = drain(&mut rx);
    assert_eq!(chunks.len(), total.div_ceil(2));
    let listed: usize = chunks.iter().map(|c| c["data"].as_array().unwrap().len()).sum();
    assert_eq!(listed, total);
    for (i, chunk) in chunks.iter().enumerate() {
        assert_eq!(chunk["chunk"], i);
        assert_eq!(chunk["totalChunks"], chunks.len());
    }
}

#[tokio::test(start_paused = true)]
async fn test_detector_queries_and_media_control() {
    let (mut controller, mut rx) = controller();
    {
        let mut doc = controller.page().write();
        let clip = doc.by_id("clip").unwrap();
        if let Some(media) = doc.media_mut(clip) {
            media.duration = 120.0;
            media.ready_state = 4;
        }
    }
    controller.start();

    controller
        .handle_message(json!({"action": "scroll_detector_get_all", "requestId": 1}))
        .await;
    controller
        .handle_message(json!({"action": "media_detector_get_all", "requestId": 2}))
        .await;
    let replies = drain(&mut rx);
    let scrolls = replies[0]["data"].as_array().unwrap();
    assert!(scrolls.iter().any(|r| r["maxScrollTop"].as_f64() == Some(1800.0)));
    // Live references leave as identities
    assert!(scrolls.iter().all(|r| r["element"].is_string()));
    let media = replies[1]["data"].as_array().unwrap();
    assert_eq!(media.len(), 1);
    assert_eq!(media[0]["state"], "paused");

    controller
        .handle_message(json!({
            "action": "media_control",
            "selector": "#clip",
            "command": "seek",
            "value": 30,
            "requestId": 3
        }))
        .await;
    controller
        .handle_message(json!({
            "action": "media_control",
            "selector": "#nowhere",
            "command": "play",
            "requestId": 4
        }))
        .await;
    let replies = drain(&mut rx);
    assert_eq!(replies[0]["data"]["applied"], true);
    assert_eq!(replies[0]["data"]["record"]["currentTime"], 30.0);
    assert_eq!(replies[1]["success"], false);
    assert_eq!(replies[1]["error_type"], "element_not_found");

    controller.stop();
    assert!(controller.media_detector().records().is_empty());
}
