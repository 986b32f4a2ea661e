//! Clear Scanner — recognizes the terminal "erase saved lines" control
//! sequence inside output payloads.
//!
//! This is a substring scan over opaque bytes, not terminal emulation: a
//! clear sequence split across two output events is not detected. That
//! limitation is accepted, not a bug (see design notes on control sequence
//! detection).

use crate::event::RecordedEvent;

/// The ANSI "erase saved lines" sequence: `ESC [ 3 J`.
const CLEAR_SEQUENCE: &str = "\x1b[3J";

/// Returns `true` iff `event` is an output event whose payload contains the
/// clear sequence.
pub fn contains_clear(event: &RecordedEvent) -> bool {
    match event {
        RecordedEvent::Output { payload, .. } => payload.contains(CLEAR_SEQUENCE),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(payload: &str) -> RecordedEvent {
        RecordedEvent::Output {
            t: 0.0,
            payload: payload.to_string(),
        }
    }

    #[test]
    fn detects_clear_sequence() {
        assert!(contains_clear(&output("\x1b[3J")));
        assert!(contains_clear(&output("prefix\x1b[3Jsuffix")));
    }

    #[test]
    fn ignores_plain_output() {
        assert!(!contains_clear(&output("hello world")));
    }

    #[test]
    fn ignores_similar_but_different_sequences() {
        // ESC[2J (clear screen, not erase-saved-lines) must not match.
        assert!(!contains_clear(&output("\x1b[2J")));
    }

    #[test]
    fn non_output_events_never_match() {
        let resize = RecordedEvent::Resize {
            t: 0.0,
            cols: 80,
            rows: 24,
        };
        assert!(!contains_clear(&resize));

        let exit = RecordedEvent::Exit {
            code: 0,
            session_id: "s".to_string(),
        };
        assert!(!contains_clear(&exit));
    }
}
