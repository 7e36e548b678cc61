//! File-format detection and chunk splitting (§4.2).

use std::path::Path;

/// Source format dispatched on file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportFormat {
    Markdown,
    Json,
    Yaml,
    PlainText,
}

pub fn detect_format(path: &Path) -> ImportFormat {
    match path.extension().and_then(|e| e.to_str()).map(str::to_lowercase).as_deref() {
        Some("md") | Some("markdown") => ImportFormat::Markdown,
        Some("json") => ImportFormat::Json,
        Some("yaml") | Some("yml") => ImportFormat::Yaml,
        _ => ImportFormat::PlainText,
    }
}

/// Split raw file content into `(line, section, content)` chunks (§4.2).
///
/// Markdown splits on heading boundaries (the heading text becomes the
/// chunk's section). JSON/YAML split one memory per top-level array
/// element, or the whole document if it's an object, with `section` set
/// to a JSON-pointer-shaped path. Plain text splits one memory per
/// blank-line-delimited paragraph.
pub fn split_chunks(raw: &str, fmt: ImportFormat) -> Vec<(u32, Option<String>, String)> {
    match fmt {
        ImportFormat::Markdown => split_markdown(raw),
        ImportFormat::Json => split_json(raw).unwrap_or_else(|| split_plain_text(raw)),
        ImportFormat::Yaml => split_yaml(raw).unwrap_or_else(|| split_plain_text(raw)),
        ImportFormat::PlainText => split_plain_text(raw),
    }
}

fn split_markdown(raw: &str) -> Vec<(u32, Option<String>, String)> {
    let mut chunks = Vec::new();
    let mut current_section: Option<String> = None;
    let mut current_start: u32 = 1;
    let mut buf = String::new();

    let flush = |buf: &mut String, start: u32, section: &Option<String>, out: &mut Vec<(u32, Option<String>, String)>| {
        let trimmed = buf.trim();
        if !trimmed.is_empty() {
            out.push((start, section.clone(), trimmed.to_string()));
        }
        buf.clear();
    };

    for (idx, line) in raw.lines().enumerate() {
        let lineno = idx as u32 + 1;
        if let Some(heading) = line.strip_prefix("# ").or_else(|| line.strip_prefix("## ")).or_else(|| line.strip_prefix("### ")) {
            flush(&mut buf, current_start, &current_section, &mut chunks);
            current_section = Some(heading.trim().to_string());
            current_start = lineno;
            continue;
        }
        if buf.is_empty() {
            current_start = lineno;
        }
        buf.push_str(line);
        buf.push('\n');
    }
    flush(&mut buf, current_start, &current_section, &mut chunks);
    chunks
}

/// One memory per blank-line-delimited paragraph; line tracks the
/// paragraph's 1-based start line.
fn split_plain_text(raw: &str) -> Vec<(u32, Option<String>, String)> {
    let mut chunks = Vec::new();
    let mut buf = String::new();
    let mut start: u32 = 1;

    for (idx, line) in raw.lines().enumerate() {
        let lineno = idx as u32 + 1;
        if line.trim().is_empty() {
            let trimmed = buf.trim();
            if !trimmed.is_empty() {
                chunks.push((start, None, trimmed.to_string()));
            }
            buf.clear();
        } else {
            if buf.is_empty() {
                start = lineno;
            }
            buf.push_str(line);
            buf.push('\n');
        }
    }
    let trimmed = buf.trim();
    if !trimmed.is_empty() {
        chunks.push((start, None, trimmed.to_string()));
    }
    chunks
}

fn split_json(raw: &str) -> Option<Vec<(u32, Option<String>, String)>> {
    let value: serde_json::Value = serde_json::from_str(raw).ok()?;
    Some(split_structured_value(value))
}

fn split_yaml(raw: &str) -> Option<Vec<(u32, Option<String>, String)>> {
    let value: serde_yaml::Value = serde_yaml::from_str(raw).ok()?;
    let json = serde_json::to_value(value).ok()?;
    Some(split_structured_value(json))
}

/// A top-level array becomes one memory per element (`/0`, `/1`, ...); any
/// other document (object, scalar) becomes a single memory at `/`.
fn split_structured_value(value: serde_json::Value) -> Vec<(u32, Option<String>, String)> {
    match value {
        serde_json::Value::Array(items) => items
            .into_iter()
            .enumerate()
            .filter_map(|(idx, item)| {
                let rendered = serde_json::to_string_pretty(&item).ok()?;
                if rendered.trim().is_empty() || rendered == "null" {
                    return None;
                }
                Some((1u32, Some(format!("/{idx}")), rendered))
            })
            .collect(),
        other => {
            let rendered = serde_json::to_string_pretty(&other).unwrap_or_default();
            if rendered.trim().is_empty() {
                Vec::new()
            } else {
                vec![(1, Some("/".to_string()), rendered)]
            }
        }
    }
}
