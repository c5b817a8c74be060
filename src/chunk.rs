//! Bounded-size chunk packing for trial documents.
//!
//! Converts a parsed [`TrialSections`] record into an ordered sequence of
//! chunk texts, each within a `max_length` character budget. The order is
//! part of the contract consumers rely on via `chunk_index`: the overview
//! first, then the scalar sections in fixed order, then primary- and
//! secondary-outcome chunks.
//!
//! Packing never loses source tokens. Two documented cases may exceed the
//! budget: the low-budget splitter fallback, and a single outcome entry
//! longer than `max_length`, which occupies a chunk alone rather than
//! being truncated.

use crate::sections::TrialSections;

/// Default chunk budget in characters.
pub const DEFAULT_MAX_LENGTH: usize = 4096;

/// Minimum usable content budget after the section header. At or below
/// this the splitter emits a single header + 100-char chunk instead of
/// word-packing.
const MIN_SPLIT_BUDGET: usize = 100;

/// Build the ordered chunk sequence for one document.
pub fn build_chunks(sections: &TrialSections, max_length: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let title = &sections.title;

    // Overview: title + studied conditions.
    let overview = format!("Title: {}\nConditions: {}", title, sections.conditions);
    if overview.len() <= max_length {
        chunks.push(overview);
    } else {
        chunks.push(format!("Title: {}", title));
        if !sections.conditions.is_empty() {
            split_long(
                &mut chunks,
                title,
                "Conditions",
                &sections.conditions,
                max_length,
            );
        }
    }

    add_scalar(
        &mut chunks,
        title,
        "Inclusion Criteria",
        &sections.inclusion,
        max_length,
    );
    add_scalar(
        &mut chunks,
        title,
        "Exclusion Criteria",
        &sections.exclusion,
        max_length,
    );
    add_scalar(&mut chunks, title, "Locations", &sections.locations, max_length);
    add_scalar(
        &mut chunks,
        title,
        "Interventions",
        &sections.interventions,
        max_length,
    );

    add_outcomes(
        &mut chunks,
        title,
        "Primary Outcomes",
        &sections.primary_outcomes,
        max_length,
    );
    add_outcomes(
        &mut chunks,
        title,
        "Secondary Outcomes",
        &sections.secondary_outcomes,
        max_length,
    );

    chunks
}

fn add_scalar(
    chunks: &mut Vec<String>,
    title: &str,
    label: &str,
    content: &str,
    max_length: usize,
) {
    if content.is_empty() {
        return;
    }

    let text = format!("Title: {}\n{}: {}", title, label, content);
    if text.len() <= max_length {
        chunks.push(text);
    } else {
        split_long(chunks, title, label, content, max_length);
    }
}

/// Split long content into header-carrying chunks by whitespace tokens.
///
/// Tokens are accumulated greedily, never split, and the header is
/// re-emitted on every resulting chunk. Concatenating the token sequences
/// of all emitted chunks reproduces the source token sequence exactly.
fn split_long(
    chunks: &mut Vec<String>,
    title: &str,
    label: &str,
    content: &str,
    max_length: usize,
) {
    let header = format!("Title: {}\n{}: ", title, label);
    let remaining = max_length.saturating_sub(header.len());

    if remaining <= MIN_SPLIT_BUDGET {
        // Low-budget fallback: header plus the first 100 chars, which may
        // itself exceed max_length.
        let lead: String = content.chars().take(MIN_SPLIT_BUDGET).collect();
        chunks.push(format!("{}{}", header, lead));
        return;
    }

    let mut current: Vec<&str> = Vec::new();
    let mut current_len = 0usize;

    for word in content.split_whitespace() {
        let word_len = word.len() + 1; // +1 for the joining space

        if current_len + word_len > remaining && !current.is_empty() {
            chunks.push(format!("{}{}", header, current.join(" ")));
            current = vec![word];
            current_len = word_len;
        } else {
            current.push(word);
            current_len += word_len;
        }
    }

    if !current.is_empty() {
        chunks.push(format!("{}{}", header, current.join(" ")));
    }
}

/// Pack outcome entries into header-carrying chunks.
///
/// Entries are appended greedily as `"  - {entry}\n"` lines while the
/// running length stays within budget; overflow flushes the chunk and
/// reseeds with the header. Every entry lands in exactly one chunk, in
/// order. An entry longer than the whole budget still occupies a chunk
/// alone, never truncated.
fn add_outcomes(
    chunks: &mut Vec<String>,
    title: &str,
    label: &str,
    entries: &[String],
    max_length: usize,
) {
    if entries.is_empty() {
        return;
    }

    let header = format!("Title: {}\n{}:\n", title, label);
    let header_len = header.len();

    let mut current: Vec<String> = Vec::new();
    let mut current_len = header_len;

    for entry in entries {
        let line = format!("  - {}\n", entry);
        let line_len = line.len();

        if current_len + line_len > max_length && !current.is_empty() {
            chunks.push(format!("{}{}", header, current.concat()));
            current = vec![line];
            current_len = header_len + line_len;
        } else {
            current.push(line);
            current_len += line_len;
        }
    }

    if !current.is_empty() {
        chunks.push(format!("{}{}", header, current.concat()));
    }
}
