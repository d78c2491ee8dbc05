use regolo_core::ChatDelta;
use serde_json::Value;
use std::path::{Path, PathBuf};

const RESET: &str = "\x1b[0m";
const DIM: &str = "\x1b[2m";
const DIM_ITALIC: &str = "\x1b[2m\x1b[3m";
const SEPARATOR: &str = "─────────────────────";

/// Turns streamed chat deltas into terminal text. Reasoning is dimmed and
/// introduced by a header; a separator marks where the answer begins.
#[derive(Debug, Default)]
pub struct ChatRenderer {
    disable_newlines: bool,
    was_thinking: bool,
}

impl ChatRenderer {
    pub fn new(disable_newlines: bool) -> Self {
        Self {
            disable_newlines,
            was_thinking: false,
        }
    }

    pub fn render(&mut self, delta: &ChatDelta) -> String {
        let text = if self.disable_newlines {
            delta.content.replace('\n', " ")
        } else {
            delta.content.clone()
        };
        let thinking = delta.is_thinking();
        let mut out = String::new();

        if thinking && !self.was_thinking {
            out.push_str(&format!("{DIM_ITALIC}Thinking...{RESET}\n"));
            self.was_thinking = true;
        } else if !thinking && self.was_thinking && !text.is_empty() {
            out.push_str(&format!("{DIM}\n{SEPARATOR}\n{RESET}\n"));
            self.was_thinking = false;
        }

        if thinking {
            out.push_str(&format!("{DIM}{text}{RESET}"));
        } else {
            out.push_str(&text);
        }
        out
    }

    /// Call between turns.
    pub fn reset(&mut self) {
        self.was_thinking = false;
    }
}

pub fn pretty_json(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

/// First free `<stamp>.<ext>`, `<stamp>_1.<ext>`, ... in `dir`.
pub fn unique_image_path(dir: &Path, stamp: &str, extension: &str) -> PathBuf {
    let extension = match extension.to_ascii_lowercase().as_str() {
        "jpg" => "jpeg".to_string(),
        other => other.to_string(),
    };
    let mut candidate = dir.join(format!("{stamp}.{extension}"));
    let mut index = 1;
    while candidate.exists() {
        candidate = dir.join(format!("{stamp}_{index}.{extension}"));
        index += 1;
    }
    candidate
}
