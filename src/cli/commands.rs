//! CLI commands
//!
//! REPL shortcuts that expand into protocol messages, plus raw JSON input.

use serde_json::{json, Value};

use crate::bridge::protocol::{
    FIND_ELEMENTS, GET_ALL_ELEMENTS, GET_STATS, MEDIA_CONTROL, MEDIA_GET_ALL, REFRESH, SCROLL_GET_ALL,
};

const REPL_REQUEST_ID: &str = "repl";

/// Result of parsing a line of input
#[derive(Debug, Clone, PartialEq)]
pub enum CommandResult {
    /// Send this message to the page controller
    Send(Value),
    /// Command was handled, show output
    Handled(String),
    /// Exit the REPL
    Exit,
    /// No output needed
    None,
}

fn query(action: &str) -> Value {
    json!({"action": action, "requestId": REPL_REQUEST_ID})
}

fn batch(command: Value) -> Value {
    json!({"actions": [command]})
}

/// Parse a REPL line into a message or a local result
pub fn handle_command(input: &str) -> CommandResult {
    let input = input.trim();
    if input.is_empty() {
        return CommandResult::None;
    }
    if input.starts_with('{') || input.starts_with('[') {
        return match serde_json::from_str(input) {
            Ok(value) => CommandResult::Send(value),
            Err(e) => CommandResult::Handled(format!("Invalid JSON: {}", e)),
        };
    }

    let parts: Vec<&str> = input.splitn(2, ' ').collect();
    let cmd = parts[0].to_lowercase();
    let args = parts.get(1).map(|s| s.trim()).unwrap_or("");

    match cmd.as_str() {
        "exit" | "quit" | "q" => CommandResult::Exit,

        "help" | "?" => CommandResult::Handled(help_text()),

        "find" => {
            if args.is_empty() {
                return CommandResult::Handled("Usage: find <intent>".to_string());
            }
            CommandResult::Send(json!({
                "action": FIND_ELEMENTS,
                "intent": args,
                "requestId": REPL_REQUEST_ID,
            }))
        }

        "stats" => CommandResult::Send(query(GET_STATS)),
        "all" => CommandResult::Send(query(GET_ALL_ELEMENTS)),
        "refresh" => CommandResult::Send(query(REFRESH)),
        "scrolls" => CommandResult::Send(query(SCROLL_GET_ALL)),

        "media" => {
            // media                      -> list
            // media <selector> <command> [value]
            let words: Vec<&str> = args.split_whitespace().collect();
            match words.as_slice() {
                [] => CommandResult::Send(query(MEDIA_GET_ALL)),
                [selector, command, rest @ ..] => {
                    let mut message = json!({
                        "action": MEDIA_CONTROL,
                        "selector": selector,
                        "command": command,
                        "requestId": REPL_REQUEST_ID,
                    });
                    if let Some(value) = rest.first() {
                        message["value"] = json!(value);
                    }
                    CommandResult::Send(message)
                }
                _ => CommandResult::Handled(
                    "Usage: media [<selector> <play|pause|seek|volume> [value]]".to_string(),
                ),
            }
        }

        "click" => {
            if args.is_empty() {
                return CommandResult::Handled("Usage: click <selector>".to_string());
            }
            CommandResult::Send(batch(json!({"action": "click", "selector": args})))
        }

        "type" | "select" => {
            let target: Vec<&str> = args.splitn(2, ' ').collect();
            match target.as_slice() {
                [selector, value] if !value.trim().is_empty() => CommandResult::Send(batch(json!({
                    "action": cmd,
                    "selector": selector,
                    "value": value.trim(),
                }))),
                _ => CommandResult::Handled(format!("Usage: {} <selector> <value>", cmd)),
            }
        }

        _ => CommandResult::Handled(format!(
            "Unknown command: {}. Type 'help' for available commands.",
            cmd
        )),
    }
}

/// Generate help text
pub fn help_text() -> String {
    r#"pagepilot commands:
─────────────────────────────────────────────
  help, ?                      Show this help message
  exit, quit, q                Leave the REPL

  find <intent>                Search the index by intent
  stats                        Index statistics
  all                          Every indexed element
  refresh                      Force a rescan
  scrolls                      Scroll detector records
  media                        Media detector records
  media <sel> <cmd> [value]    play, pause, seek or volume

  click <selector>             Click an element
  type <selector> <text>       Type into a field
  select <selector> <option>   Choose an option

Any line starting with { or [ is sent as a raw protocol message.
─────────────────────────────────────────────"#
        .to_string()
}
