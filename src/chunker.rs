//! Structure-aware text chunker.
//!
//! Splits article and document text into passages that respect a
//! configurable `max_tokens` budget while preserving semantic boundaries
//! where the text has any.
//!
//! # Algorithm
//!
//! 1. Split on markdown headings (`#`–`######`) and horizontal rules; each
//!    section keeps its heading text as a title.
//! 2. If the text has no headings, split on blank-line paragraph
//!    boundaries instead and greedily merge consecutive paragraphs while
//!    the running token estimate stays within `max_tokens`.
//! 3. Prefix every section with the caller's context (typically the parent
//!    record's title) and the section's own title: `"prefix title: content"`.
//! 4. Sections that still exceed the budget after prefixing are cut into
//!    fixed-size sliding windows with `overlap_tokens` of overlap, and the
//!    prefix is re-applied to each window.
//! 5. Whitespace-only results are dropped; non-empty input always yields
//!    at least one chunk (worst case: the trimmed input itself).
//!
//! Token counts are estimated at 4 characters per token. The estimate is
//! deliberately rough; the same function is used for every size
//! comparison in the pipeline.

/// Approximate characters-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

/// Estimate the token count of a piece of text.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

/// A heading- or rule-delimited span of the input text.
struct Section {
    title: Option<String>,
    content: String,
}

/// Split `text` into prefixed chunks of at most ~`max_tokens` tokens.
///
/// `context_prefix` is prepended to every chunk so that passages stay
/// self-describing once they are separated from their parent record
/// (e.g. the article title). Oversized sections are windowed with
/// `overlap_tokens` of overlap between consecutive windows.
///
/// # Guarantees
///
/// - Non-empty input never yields an empty result.
/// - No chunk exceeds `max_tokens + overlap_tokens` (a lone window plus
///   its prefix is the only case that can exceed `max_tokens` itself).
pub fn split(
    text: &str,
    max_tokens: usize,
    overlap_tokens: usize,
    context_prefix: &str,
) -> Vec<String> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let sections = match split_structural(text) {
        Some(sections) => sections,
        None => split_paragraphs(text, max_tokens),
    };

    let mut chunks = Vec::new();
    for section in &sections {
        let content = section.content.trim();
        if content.is_empty() {
            continue;
        }

        let head = build_head(context_prefix, section.title.as_deref());
        let prefixed = apply_head(&head, content);

        if estimate_tokens(&prefixed) <= max_tokens {
            chunks.push(prefixed);
        } else {
            for window in window_split(content, &head, max_tokens, overlap_tokens) {
                chunks.push(apply_head(&head, &window));
            }
        }
    }

    chunks.retain(|c| !c.trim().is_empty());

    if chunks.is_empty() {
        // Never return nothing for non-empty input.
        chunks.push(text.trim().to_string());
    }

    chunks
}

/// Segment on markdown headings and horizontal rules.
///
/// Returns `None` when the text contains no headings at all, signalling
/// the caller to fall back to paragraph segmentation.
fn split_structural(text: &str) -> Option<Vec<Section>> {
    let mut sections: Vec<Section> = Vec::new();
    let mut current_title: Option<String> = None;
    let mut current_body = String::new();
    let mut saw_heading = false;

    let mut flush = |title: &mut Option<String>, body: &mut String, out: &mut Vec<Section>| {
        if title.is_some() || !body.trim().is_empty() {
            out.push(Section {
                title: title.take(),
                content: std::mem::take(body),
            });
        }
        body.clear();
    };

    for line in text.lines() {
        if let Some(title) = heading_title(line) {
            saw_heading = true;
            flush(&mut current_title, &mut current_body, &mut sections);
            current_title = Some(title);
        } else if is_horizontal_rule(line) {
            flush(&mut current_title, &mut current_body, &mut sections);
        } else {
            if !current_body.is_empty() {
                current_body.push('\n');
            }
            current_body.push_str(line);
        }
    }
    flush(&mut current_title, &mut current_body, &mut sections);

    if saw_heading {
        Some(sections)
    } else {
        None
    }
}

/// Extract the title of a markdown ATX heading line (`#` through `######`).
fn heading_title(line: &str) -> Option<String> {
    let trimmed = line.trim_start();
    let hashes = trimmed.chars().take_while(|c| *c == '#').count();
    if hashes == 0 || hashes > 6 {
        return None;
    }
    let rest = &trimmed[hashes..];
    if rest.is_empty() || rest.starts_with(' ') || rest.starts_with('\t') {
        Some(rest.trim().trim_end_matches('#').trim().to_string())
    } else {
        None
    }
}

/// `---`, `***`, `___` (three or more, nothing else on the line).
fn is_horizontal_rule(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.len() >= 3
        && (trimmed.chars().all(|c| c == '-')
            || trimmed.chars().all(|c| c == '*')
            || trimmed.chars().all(|c| c == '_'))
}

/// Paragraph fallback: split on blank lines, then greedily merge
/// consecutive paragraphs while the estimate stays within budget.
fn split_paragraphs(text: &str, max_tokens: usize) -> Vec<Section> {
    let mut sections = Vec::new();
    let mut current = String::new();

    for para in text.split("\n\n") {
        let trimmed = para.trim();
        if trimmed.is_empty() {
            continue;
        }

        let merged_len = if current.is_empty() {
            estimate_tokens(trimmed)
        } else {
            estimate_tokens(&current) + estimate_tokens(trimmed)
        };

        if merged_len > max_tokens && !current.is_empty() {
            sections.push(Section {
                title: None,
                content: std::mem::take(&mut current),
            });
        }

        if !current.is_empty() {
            current.push_str("\n\n");
        }
        current.push_str(trimmed);
    }

    if !current.is_empty() {
        sections.push(Section {
            title: None,
            content: current,
        });
    }

    sections
}

/// Join the context prefix and section title into the chunk head.
fn build_head(context_prefix: &str, title: Option<&str>) -> String {
    let mut parts: Vec<&str> = Vec::new();
    let prefix = context_prefix.trim();
    if !prefix.is_empty() {
        parts.push(prefix);
    }
    if let Some(t) = title {
        let t = t.trim();
        if !t.is_empty() {
            parts.push(t);
        }
    }
    parts.join(" ")
}

fn apply_head(head: &str, content: &str) -> String {
    if head.is_empty() {
        content.to_string()
    } else {
        format!("{}: {}", head, content)
    }
}

/// Fixed-size sliding windows over `content`, leaving room for `head`.
///
/// Window boundaries are measured in characters (the same unit the token
/// estimate is based on) so multi-byte text cannot split inside a char.
fn window_split(content: &str, head: &str, max_tokens: usize, overlap_tokens: usize) -> Vec<String> {
    let max_chars = max_tokens * CHARS_PER_TOKEN;
    let overlap_chars = overlap_tokens * CHARS_PER_TOKEN;
    let head_chars = if head.is_empty() {
        0
    } else {
        head.chars().count() + 2
    };

    let mut window = max_chars.saturating_sub(head_chars);
    if window <= overlap_chars {
        // A pathologically long head: keep the step positive rather than
        // refusing to make progress.
        window = overlap_chars + 1;
    }
    let step = window - overlap_chars;

    let chars: Vec<char> = content.chars().collect();
    let mut windows = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + window).min(chars.len());
        let piece: String = chars[start..end].iter().collect();
        if !piece.trim().is_empty() {
            windows.push(piece.trim().to_string());
        }
        if end == chars.len() {
            break;
        }
        start += step;
    }
    windows
}
