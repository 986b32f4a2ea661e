//! SSE Fan-out — formats recorded events as Server-Sent Events frames.
//!
//! Framing is exactly `data: <json>\n\n`: no named events, no `id:`, no
//! retry hints. Live events get a timestamp rewritten relative to the
//! receiving subscriber's attach time; backlog events arrive already
//! zeroed by the Pruner and are framed as-is.

use std::time::Duration;

use serde_json::Value;

use crate::event::RecordedEvent;

/// Frames an arbitrary JSON value as one SSE `data:` event.
pub fn format_json_frame(value: &Value) -> String {
    format!("data: {value}\n\n")
}

/// Frames a backlog (already timestamp-zeroed) event verbatim.
pub fn format_backlog_frame(event: &RecordedEvent) -> String {
    format_json_frame(&event.to_json())
}

/// Frames a live event with its timestamp rewritten to `elapsed` seconds
/// since the receiving subscriber attached. Exit events carry no
/// timestamp and are forwarded unchanged.
pub fn format_live_event_frame(event: &RecordedEvent, elapsed: Duration) -> String {
    let rewritten = event.with_timestamp(elapsed.as_secs_f64());
    format_json_frame(&rewritten.to_json())
}

/// Frames a raw line the codec couldn't parse as a synthetic output event,
/// preserving fidelity when a writer emits something outside the format.
pub fn format_raw_passthrough_frame(raw_line: &str, elapsed: Duration) -> String {
    let synthetic = RecordedEvent::Output {
        t: elapsed.as_secs_f64(),
        payload: raw_line.to_string(),
    };
    format_json_frame(&synthetic.to_json())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_are_data_line_then_blank_line() {
        let frame = format_json_frame(&serde_json::json!({"version": 2}));
        assert!(frame.starts_with("data: "));
        assert!(frame.ends_with("\n\n"));
    }

    #[test]
    fn live_event_rewrites_timestamp_relative_to_elapsed() {
        let event = RecordedEvent::Output {
            t: 999.0,
            payload: "hi".to_string(),
        };
        let frame = format_live_event_frame(&event, Duration::from_millis(1500));
        assert_eq!(frame, "data: [1.5,\"o\",\"hi\"]\n\n");
    }

    #[test]
    fn exit_event_timestamp_is_unaffected_by_elapsed() {
        let event = RecordedEvent::Exit {
            code: 0,
            session_id: "sess-1".to_string(),
        };
        let frame = format_live_event_frame(&event, Duration::from_secs(5));
        assert_eq!(frame, "data: [\"exit\",0,\"sess-1\"]\n\n");
    }

    #[test]
    fn raw_passthrough_synthesizes_output_event() {
        let frame = format_raw_passthrough_frame("not json at all", Duration::from_secs(2));
        assert_eq!(frame, "data: [2.0,\"o\",\"not json at all\"]\n\n");
    }

    #[test]
    fn backlog_frame_preserves_zeroed_timestamp() {
        let event = RecordedEvent::Output {
            t: 0.0,
            payload: "x".to_string(),
        };
        assert_eq!(format_backlog_frame(&event), "data: [0.0,\"o\",\"x\"]\n\n");
    }
}
