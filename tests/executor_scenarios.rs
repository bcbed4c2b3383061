//! Action executor integration tests
//!
//! End-to-end batches over parsed pages, run on paused tokio time so the
//! scheduled delays are exact.

use pagepilot::actions::{parse_batch, ActionExecutor, ExecutorMessage, Strategy};
use pagepilot::core::config::ExecutorConfig;
use pagepilot::dom::Page;
use serde_json::{json, Value};
use tokio::sync::mpsc;

const FORM: &str = r#"
<html><body>
  <button id="open">Open</button>
  <input id="q" type="text" placeholder="Search">
  <button id="other">Other</button>
</body></html>
"#;

fn countries(with_canada: bool) -> Page {
    let canada = if with_canada { r#"<option value="ca">Canada</option>"# } else { "" };
    Page::from_html(&format!(
        r#"<body><select id="country">
            <option value="us">United States</option>
            <option value="mx">Mexico</option>
            {}
        </select></body>"#,
        canada
    ))
}

async fn run(page: &Page, batch: Value) -> pagepilot::BatchSummary {
    let executor = ActionExecutor::new(page.clone(), ExecutorConfig::default());
    executor.execute_batch(parse_batch(&batch).unwrap()).await
}

#[tokio::test(start_paused = true)]
async fn test_click_wait_type_batch() {
    let page = Page::from_html(FORM);
    let summary = run(
        &page,
        json!([
            {"action": "click", "selector": "#open"},
            {"action": "wait", "value": 500},
            {"action": "type", "selector": "#q", "value": "hello"}
        ]),
    )
    .await;

    assert_eq!(summary.total_actions, 3);
    assert_eq!(summary.failed_actions, 0);
    assert_eq!(summary.successful_actions, 3);
    let actions: Vec<&str> = summary.results.iter().map(|r| r.action.as_str()).collect();
    assert_eq!(actions, vec!["click", "wait", "type"]);

    let wait = &summary.results[1];
    let typed = &summary.results[2];
    assert!(typed.timestamp - wait.timestamp >= 500);
    assert!(summary.results[0].timestamp <= wait.timestamp);
    assert!(summary.completed_at >= typed.timestamp);

    let q = page.read().by_id("q").unwrap();
    assert_eq!(page.read().value(q).as_deref(), Some("hello"));
}

#[tokio::test(start_paused = true)]
async fn test_gaps_hold_without_cursor() {
    let page = Page::from_html(FORM);
    let executor = ActionExecutor::new(
        page.clone(),
        ExecutorConfig {
            cursor_enabled: false,
            ..Default::default()
        },
    );
    let batch = parse_batch(&json!([
        {"action": "click", "selector": "#open"},
        {"action": "wait", "value": 500},
        {"action": "type", "selector": "#q", "value": "hello"},
        {"action": "click", "selector": "#other", "delay_before": 50}
    ]))
    .unwrap();
    let summary = executor.execute_batch(batch).await;
    let stamps: Vec<i64> = summary.results.iter().map(|r| r.timestamp).collect();
    let gaps: Vec<i64> = stamps.windows(2).map(|w| w[1] - w[0]).collect();
    assert_eq!(gaps, vec![300, 800, 50]);
}

#[tokio::test(start_paused = true)]
async fn test_failures_do_not_stop_the_batch() {
    let page = Page::from_html(FORM);
    let summary = run(
        &page,
        json!({"actions": [
            {"action": "click", "selector": "#missing"},
            {"action": "teleport"},
            {"action": "check", "selector": "#q"},
            {"action": "click", "selector": "#open"}
        ]}),
    )
    .await;

    assert_eq!(summary.total_actions, 4);
    assert_eq!(summary.failed_actions, 3);
    let errors: Vec<String> = summary
        .results
        .iter()
        .filter_map(|r| r.error.clone())
        .collect();
    assert!(errors[0].starts_with("Element not found"));
    assert_eq!(errors[1], "Unknown action type: teleport");
    assert!(errors[2].contains("checkbox"));
    assert!(summary.results[3].success);
}

#[tokio::test(start_paused = true)]
async fn test_select_native_option_by_text() {
    let page = countries(true);
    let summary = run(
        &page,
        json!([{"action": "select", "selector": "#country", "value": "Canada"}]),
    )
    .await;
    let result = &summary.results[0];
    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.selected_option.as_deref(), Some("Canada"));
    assert_eq!(result.selected_value.as_deref(), Some("ca"));
}

#[tokio::test(start_paused = true)]
async fn test_select_missing_option_names_choices() {
    let page = countries(false);
    let summary = run(
        &page,
        json!([{"action": "select", "selector": "#country", "value": "Canada"}]),
    )
    .await;
    let result = &summary.results[0];
    assert!(!result.success);
    assert!(result.element_found);
    let error = result.error.as_deref().unwrap();
    assert!(error.contains("Canada"));
    assert!(error.contains("United States"));
    assert!(error.contains("Mexico"));
}

#[tokio::test(start_paused = true)]
async fn test_custom_dropdown_degrades_to_warning() {
    let page = Page::from_html(
        r#"<body>
            <div id="picker" class="picker" role="combobox">Choose a country</div>
            <input type="search" style="display: none">
        </body>"#,
    );
    let summary = run(
        &page,
        json!([{"action": "select", "selector": "#picker", "value": "Canada"}]),
    )
    .await;
    let result = &summary.results[0];
    assert!(result.success);
    assert!(result.warning.is_some());
    assert!(result.selected_option.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_selector_beats_xpath() {
    let page = Page::from_html(FORM);
    let summary = run(
        &page,
        json!([{"action": "get_text", "selector": "#open", "xpath": "//button[@id='other']"}]),
    )
    .await;
    let result = &summary.results[0];
    assert_eq!(result.strategy, Some(Strategy::Css));
    assert_eq!(result.text.as_deref(), Some("Open"));

    let fallback = run(
        &page,
        json!([{"action": "get_text", "selector": "#gone", "xpath": "//button[@id='other']"}]),
    )
    .await;
    assert_eq!(fallback.results[0].strategy, Some(Strategy::XPath));
    assert_eq!(fallback.results[0].text.as_deref(), Some("Other"));
}

#[tokio::test(start_paused = true)]
async fn test_streaming_reports_in_order() {
    let page = Page::from_html(FORM);
    let executor = ActionExecutor::new(page, ExecutorConfig::default());
    let batch = parse_batch(&json!({"commands": [
        {"action": "click", "selector": "#open", "id": "c1"},
        {"action": "type", "selector": "#q", "value": "rust", "commandId": "c2"}
    ]}))
    .unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let summary = executor.execute_batch_streaming(batch, tx).await;

    let mut messages = Vec::new();
    while let Ok(message) = rx.try_recv() {
        messages.push(message);
    }
    assert_eq!(messages.len(), 3);
    match &messages[0] {
        ExecutorMessage::ActionResult {
            command_id, index, total, ..
        } => {
            assert_eq!(command_id.as_deref(), Some("c1"));
            assert_eq!((*index, *total), (0, 2));
        }
        other => panic!("unexpected {:?}", other),
    }
    match &messages[2] {
        ExecutorMessage::ActionsComplete { summary: streamed } => assert_eq!(streamed, &summary),
        other => panic!("unexpected {:?}", other),
    }

    let wire = serde_json::to_value(&messages[1]).unwrap();
    assert_eq!(wire["action"], "action_result");
    assert_eq!(wire["command_id"], "c2");
    assert_eq!(wire["result"]["value"], "rust");
}
