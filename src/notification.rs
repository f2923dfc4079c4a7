//! Controller notification decoding
//!
//! The controller pushes unstructured text such as `info[motion_changed][0]`
//! or `error[...]` on the script connection, with no guaranteed framing.
//! `NotificationDecoder` buffers raw chunks, cuts them into frames (one per
//! bracketed notification or per newline-terminated line) and classifies
//! each frame into a closed set of kinds. Text that matches nothing is kept
//! as `Unknown` rather than dropped silently.

use regex::Regex;

/// Largest partial frame kept between chunks.
const MAX_PENDING: usize = 4096;

/// Classified controller notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// `info[motion_changed][N]`; N = 0 means motion stopped.
    MotionChanged(i64),
    Info { key: String, value: Option<String> },
    Warning(String),
    Error(String),
    Unknown(String),
}

impl Notification {
    pub fn is_motion_stopped(&self) -> bool {
        matches!(self, Notification::MotionChanged(0))
    }

    pub fn is_motion_started(&self) -> bool {
        matches!(self, Notification::MotionChanged(n) if *n != 0)
    }
}

pub struct NotificationDecoder {
    pattern: Regex,
    pending: String,
}

impl NotificationDecoder {
    pub fn new() -> Self {
        // kind[key] with an optional [value]
        let pattern = Regex::new(r"(info|warn|error)\[([^\[\]\r\n]*)\](?:\[([^\[\]\r\n]*)\])?")
            .unwrap_or_else(|e| unreachable!("notification pattern is valid: {}", e));
        Self {
            pattern,
            pending: String::new(),
        }
    }

    /// Feed a raw chunk and return every complete frame it finished.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Notification> {
        self.pending.push_str(&String::from_utf8_lossy(chunk));
        let mut out = Vec::new();

        // Complete lines are final: classify everything in them.
        while let Some(pos) = self.pending.find('\n') {
            let line: String = self.pending.drain(..=pos).collect();
            self.classify_line(line.trim(), &mut out);
        }

        // A partial line may still hold fully closed notifications. A match
        // without a value that ends at the buffer edge, or before an
        // unclosed `[`, could still grow one, so it waits for more input.
        let mut consumed = 0;
        for caps in self.pattern.captures_iter(&self.pending) {
            let whole = caps.get(0).map(|m| m.end()).unwrap_or(0);
            if caps.get(3).is_none() {
                let rest = &self.pending[whole..];
                if rest.is_empty() || rest.starts_with('[') {
                    break;
                }
            }
            out.push(classify(&caps));
            consumed = whole;
        }
        if consumed > 0 {
            self.pending.drain(..consumed);
        }

        if self.pending.len() > MAX_PENDING {
            let junk = std::mem::take(&mut self.pending);
            out.push(Notification::Unknown(junk.trim().to_string()));
        }
        out
    }

    /// Drop any partially received frame.
    pub fn reset(&mut self) {
        self.pending.clear();
    }

    fn classify_line(&self, line: &str, out: &mut Vec<Notification>) {
        if line.is_empty() {
            return;
        }
        let before = out.len();
        for caps in self.pattern.captures_iter(line) {
            out.push(classify(&caps));
        }
        if out.len() == before {
            out.push(Notification::Unknown(line.to_string()));
        }
    }
}

impl Default for NotificationDecoder {
    fn default() -> Self {
        Self::new()
    }
}

fn classify(caps: &regex::Captures<'_>) -> Notification {
    let kind = caps.get(1).map_or("", |m| m.as_str());
    let raw_key = caps.get(2).map_or("", |m| m.as_str());
    let raw_value = caps.get(3).map(|m| m.as_str());
    let key = raw_key.trim().to_string();
    let value = raw_value.map(|v| v.trim().to_string());

    match kind {
        // Only the exact text `info[motion_changed][0]` means stopped.
        "info" if raw_key == "motion_changed" => match raw_value {
            Some("0") => Notification::MotionChanged(0),
            Some(v) => match v.parse::<i64>() {
                Ok(state) if state != 0 && !v.starts_with('+') => Notification::MotionChanged(state),
                _ => Notification::Info { key, value },
            },
            None => Notification::Info { key, value },
        },
        "info" => Notification::Info { key, value },
        "warn" => Notification::Warning(join_key_value(key, value)),
        "error" => Notification::Error(join_key_value(key, value)),
        _ => Notification::Unknown(caps.get(0).map_or("", |m| m.as_str()).to_string()),
    }
}

fn join_key_value(key: String, value: Option<String>) -> String {
    match value {
        Some(v) => format!("{}: {}", key, v),
        None => key,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_motion_changed_in_line() {
        let mut decoder = NotificationDecoder::new();
        let frames = decoder.push(b"info[motion_changed][0]\n");
        assert_eq!(frames, vec![Notification::MotionChanged(0)]);
        assert!(frames[0].is_motion_stopped());
    }

    #[test]
    fn test_marker_split_across_chunks() {
        let mut decoder = NotificationDecoder::new();
        assert!(decoder.push(b"info[motion_cha").is_empty());
        assert!(decoder.push(b"nged][0").is_empty());
        let frames = decoder.push(b"]\n");
        assert_eq!(frames, vec![Notification::MotionChanged(0)]);
    }

    #[test]
    fn test_unterminated_frames_are_emitted_once_closed() {
        let mut decoder = NotificationDecoder::new();
        let frames = decoder.push(b"info[motion_changed][1]info[motion_changed][0]");
        // Second frame sits on the buffer edge but already has its value.
        assert_eq!(
            frames,
            vec![Notification::MotionChanged(1), Notification::MotionChanged(0)]
        );
    }

    #[test]
    fn test_classifies_other_kinds() {
        let mut decoder = NotificationDecoder::new();
        let frames = decoder.push(b"warn[collision]\nerror[joint_limit][3]\nhello there\n");
        assert_eq!(
            frames,
            vec![
                Notification::Warning("collision".to_string()),
                Notification::Error("joint_limit: 3".to_string()),
                Notification::Unknown("hello there".to_string()),
            ]
        );
    }

    #[test]
    fn test_other_motion_states_are_not_stop() {
        let mut decoder = NotificationDecoder::new();
        let frames = decoder.push(b"info[motion_changed][2]\n");
        assert!(frames[0].is_motion_started());
        assert!(!frames[0].is_motion_stopped());
    }

    #[test]
    fn test_only_exact_zero_marks_motion_stopped() {
        let mut decoder = NotificationDecoder::new();
        let frames = decoder.push(
            b"info[motion_changed][00]\ninfo[motion_changed][+0]\ninfo[motion_changed][ 0]\ninfo[ motion_changed][0]\n",
        );
        assert_eq!(frames.len(), 4);
        assert!(frames.iter().all(|f| !f.is_motion_stopped()));
        assert!(frames
            .iter()
            .all(|f| matches!(f, Notification::Info { key, .. } if key == "motion_changed")));

        let frames = decoder.push(b"info[motion_changed][0]\n");
        assert_eq!(frames, vec![Notification::MotionChanged(0)]);
    }

    #[test]
    fn test_oversized_garbage_is_flushed_as_unknown() {
        let mut decoder = NotificationDecoder::new();
        let junk = vec![b'x'; MAX_PENDING + 1];
        let frames = decoder.push(&junk);
        assert!(matches!(frames.as_slice(), [Notification::Unknown(_)]));
        assert!(decoder.push(b"info[motion_changed][0]\n")[0].is_motion_stopped());
    }
}
