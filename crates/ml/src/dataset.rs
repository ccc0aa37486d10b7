use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use switchboard_core::Intent;

#[derive(Debug, Deserialize)]
struct LabeledExample {
    text: String,
    intent: String,
}

/// Reads `{"text": ..., "intent": ...}` lines; blank lines are ignored.
pub fn load_jsonl(path: impl AsRef<Path>) -> Result<Vec<(String, Intent)>> {
    let raw = fs::read_to_string(path.as_ref()).with_context(|| {
        format!(
            "failed reading intent training dataset at {}",
            path.as_ref().display()
        )
    })?;
    parse_jsonl(&raw)
}

pub fn parse_jsonl(raw: &str) -> Result<Vec<(String, Intent)>> {
    let mut samples = Vec::new();
    for (line_no, line) in raw
        .lines()
        .map(str::trim)
        .enumerate()
        .filter(|(_, line)| !line.is_empty())
    {
        let example: LabeledExample = serde_json::from_str(line)
            .with_context(|| format!("invalid jsonl training line {}", line_no + 1))?;
        let intent = Intent::new(&example.intent);
        if intent.is_unknown() {
            continue;
        }
        samples.push((example.text, intent));
    }

    if samples.is_empty() {
        anyhow::bail!("training dataset produced zero labeled examples");
    }
    Ok(samples)
}
