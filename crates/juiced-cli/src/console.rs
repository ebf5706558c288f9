//! Headless console: prints chat, private messages, presence and media
//! changes to stdout.

use chrono::{DateTime, Local};
use juiced_bot::{Handler, Propagation, Registry};
use serde_json::Value;

/// Events the console prints.
pub const EVENTS: [&str; 5] = ["chatMsg", "pm", "addUser", "userLeave", "changeMedia"];

/// Subscribes the console to `registry`.
pub fn attach(registry: &Registry) {
    for event in EVENTS {
        registry.on(
            event,
            Handler::immediate(|event, data| {
                if let Some(line) = render(event, data) {
                    println!("{line}");
                }
                Ok(Propagation::Continue)
            }),
        );
    }
}

fn text<'a>(data: &'a Value, key: &str) -> &'a str {
    data.get(key).and_then(Value::as_str).unwrap_or_default()
}

fn clock(data: &Value) -> String {
    data.get("time")
        .and_then(Value::as_i64)
        .and_then(DateTime::from_timestamp_millis)
        .map(|t| t.with_timezone(&Local))
        .unwrap_or_else(Local::now)
        .format("%H:%M:%S")
        .to_string()
}

/// Renders one event as a console line.
pub fn render(event: &str, data: &Value) -> Option<String> {
    let line = match event {
        "chatMsg" => format!("[{}] <{}> {}", clock(data), text(data, "username"), text(data, "msg")),
        "pm" => format!(
            "[{}] *{} -> {}* {}",
            clock(data),
            text(data, "username"),
            text(data, "to"),
            text(data, "msg")
        ),
        "addUser" => format!("-> {} joined", text(data, "name")),
        "userLeave" => format!("<- {} left", text(data, "name")),
        "changeMedia" => format!("now playing: {}", text(data, "title")),
        _ => return None,
    };
    Some(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn chat_line() {
        let line = render("chatMsg", &json!({"username": "alice", "msg": "hi", "time": 0})).unwrap();
        assert!(line.ends_with("<alice> hi"));
        assert!(line.starts_with('['));
    }

    #[test]
    fn presence_and_media_lines() {
        assert_eq!(render("addUser", &json!({"name": "bob"})).unwrap(), "-> bob joined");
        assert_eq!(render("userLeave", &json!({"name": "bob"})).unwrap(), "<- bob left");
        assert_eq!(
            render("changeMedia", &json!({"title": "Song"})).unwrap(),
            "now playing: Song"
        );
    }

    #[test]
    fn pm_line_without_time() {
        let line = render("pm", &json!({"username": "alice", "to": "bot", "msg": "psst"})).unwrap();
        assert!(line.ends_with("*alice -> bot* psst"));
    }

    #[test]
    fn other_events_are_silent() {
        assert!(render("mediaUpdate", &json!({})).is_none());
    }

    #[test]
    fn attach_subscribes_each_event() {
        let registry = Registry::new();
        attach(&registry);
        for event in EVENTS {
            assert_eq!(registry.count(event), 1);
        }
    }
}
