//! Trial document section extraction.
//!
//! Parses the semi-structured plain-text trial format into a typed
//! [`TrialSections`] record. Sections are located through a small marker
//! vocabulary ([`Marker`]); a missing marker yields an empty section,
//! never an error. Only empty input is fatal.
//!
//! Outcome statements inside the `Outcomes:` block are collected as ordered
//! lists, one entry per `- PRIMARY:` / `- SECONDARY:` bullet. The
//! scalar/list distinction matters downstream: the chunk packer groups list
//! entries instead of word-splitting them.

use thiserror::Error;

/// Errors produced while parsing a trial document.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("document text cannot be empty")]
    EmptyDocument,
}

/// The named sections of a trial document. Missing sections are empty,
/// never absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrialSections {
    pub title: String,
    pub inclusion: String,
    pub exclusion: String,
    pub conditions: String,
    pub locations: String,
    pub interventions: String,
    pub primary_outcomes: Vec<String>,
    pub secondary_outcomes: Vec<String>,
}

/// Section markers recognized in trial documents, with their literal
/// spellings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Marker {
    Eligibility,
    Inclusion,
    Exclusion,
    Conditions,
    Locations,
    Interventions,
    Outcomes,
}

impl Marker {
    fn literal(self) -> &'static str {
        match self {
            Marker::Eligibility => "Eligibility:",
            Marker::Inclusion => "Inclusion Criteria:",
            Marker::Exclusion => "Exclusion Criteria:",
            Marker::Conditions => "Conditions:",
            Marker::Locations => "Locations:",
            Marker::Interventions => "Interventions:",
            Marker::Outcomes => "Outcomes:",
        }
    }
}

/// Parse a trial document into its sections.
///
/// The title is the first line with any `Title:` prefix stripped. Every
/// other section is the trimmed substring between the first occurrence of
/// its start marker and the first occurrence of its end marker after that
/// point (or the end of the enclosing block).
pub fn parse_sections(text: &str) -> Result<TrialSections, ParseError> {
    if text.trim().is_empty() {
        return Err(ParseError::EmptyDocument);
    }

    let mut sections = TrialSections::default();

    let first_line = text.lines().next().unwrap_or("");
    sections.title = first_line
        .strip_prefix("Title:")
        .unwrap_or(first_line)
        .trim()
        .to_string();

    // Eligibility block splits further into inclusion / exclusion.
    let eligibility = extract_between(text, Marker::Eligibility, Some(Marker::Conditions));
    if !eligibility.is_empty() {
        sections.inclusion =
            extract_between(&eligibility, Marker::Inclusion, Some(Marker::Exclusion));
        sections.exclusion = extract_between(&eligibility, Marker::Exclusion, None);
    }

    sections.conditions = extract_between(text, Marker::Conditions, Some(Marker::Locations));
    sections.locations = extract_between(text, Marker::Locations, Some(Marker::Interventions));
    sections.interventions = extract_between(text, Marker::Interventions, Some(Marker::Outcomes));

    let outcomes = extract_between(text, Marker::Outcomes, None);
    if !outcomes.is_empty() {
        parse_outcomes(&outcomes, &mut sections);
    }

    Ok(sections)
}

fn extract_between(source: &str, start: Marker, end: Option<Marker>) -> String {
    let literal = start.literal();
    let Some(pos) = source.find(literal) else {
        return String::new();
    };
    let after = &source[pos + literal.len()..];

    let slice = match end.and_then(|e| after.find(e.literal())) {
        Some(end_pos) => &after[..end_pos],
        None => after,
    };

    slice.trim().to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutcomeKind {
    Primary,
    Secondary,
}

/// Collect `- PRIMARY:` / `- SECONDARY:` entries from the outcomes block.
/// Entry text runs to the next bullet marker or the end of the block and
/// may span multiple lines; empty entries are dropped.
fn parse_outcomes(block: &str, sections: &mut TrialSections) {
    let markers = scan_outcome_markers(block);

    for (idx, &(_, content_start, kind)) in markers.iter().enumerate() {
        let content_end = markers.get(idx + 1).map(|m| m.0).unwrap_or(block.len());
        let content = block[content_start..content_end].trim();
        if content.is_empty() {
            continue;
        }
        match kind {
            OutcomeKind::Primary => sections.primary_outcomes.push(content.to_string()),
            OutcomeKind::Secondary => sections.secondary_outcomes.push(content.to_string()),
        }
    }
}

/// Find bullet markers: a dash, optional whitespace, then the kind literal
/// and a colon. Returns `(marker_start, content_start, kind)` triples in
/// document order.
fn scan_outcome_markers(block: &str) -> Vec<(usize, usize, OutcomeKind)> {
    let bytes = block.as_bytes();
    let mut found = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'-' {
            let mut j = i + 1;
            while j < bytes.len() && (bytes[j] == b' ' || bytes[j] == b'\t') {
                j += 1;
            }
            let rest = &block[j..];
            let kind = if let Some(after) = rest.strip_prefix("PRIMARY:") {
                Some((after, OutcomeKind::Primary))
            } else if let Some(after) = rest.strip_prefix("SECONDARY:") {
                Some((after, OutcomeKind::Secondary))
            } else {
                None
            };

            if let Some((after, kind)) = kind {
                let content_start = block.len() - after.len();
                found.push((i, content_start, kind));
                i = content_start;
                continue;
            }
        }
        i += 1;
    }

    found
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL_DOC: &str = "Title: Test\nEligibility:\nInclusion Criteria: A\nExclusion Criteria: B\nConditions: C\nLocations: D\nInterventions: E\nOutcomes:\n- PRIMARY: P1\n- SECONDARY: S1";

    #[test]
    fn test_full_document() {
        let sections = parse_sections(FULL_DOC).unwrap();
        assert_eq!(sections.title, "Test");
        assert_eq!(sections.inclusion, "A");
        assert_eq!(sections.exclusion, "B");
        assert_eq!(sections.conditions, "C");
        assert_eq!(sections.locations, "D");
        assert_eq!(sections.interventions, "E");
        assert_eq!(sections.primary_outcomes, vec!["P1"]);
        assert_eq!(sections.secondary_outcomes, vec!["S1"]);
    }

    #[test]
    fn test_empty_document_is_fatal() {
        assert!(matches!(parse_sections(""), Err(ParseError::EmptyDocument)));
        assert!(matches!(
            parse_sections("  \n\t "),
            Err(ParseError::EmptyDocument)
        ));
    }

    #[test]
    fn test_missing_markers_yield_empty_sections() {
        let sections = parse_sections("Title: Only a title").unwrap();
        assert_eq!(sections.title, "Only a title");
        assert_eq!(sections.inclusion, "");
        assert_eq!(sections.exclusion, "");
        assert_eq!(sections.conditions, "");
        assert_eq!(sections.locations, "");
        assert_eq!(sections.interventions, "");
        assert!(sections.primary_outcomes.is_empty());
        assert!(sections.secondary_outcomes.is_empty());
    }

    #[test]
    fn test_title_without_prefix_keeps_line() {
        let sections = parse_sections("Some heading\nConditions: X").unwrap();
        assert_eq!(sections.title, "Some heading");
        assert_eq!(sections.conditions, "X");
    }

    #[test]
    fn test_eligibility_without_exclusion() {
        let doc = "Title: T\nEligibility:\nInclusion Criteria: adults over 18\nConditions: asthma";
        let sections = parse_sections(doc).unwrap();
        assert_eq!(sections.inclusion, "adults over 18");
        assert_eq!(sections.exclusion, "");
    }

    #[test]
    fn test_multiline_outcome_entries() {
        let doc = "Title: T\nOutcomes:\n- PRIMARY: overall survival\nmeasured at 24 months\n- PRIMARY: response rate\n- SECONDARY: quality of life";
        let sections = parse_sections(doc).unwrap();
        assert_eq!(
            sections.primary_outcomes,
            vec![
                "overall survival\nmeasured at 24 months",
                "response rate"
            ]
        );
        assert_eq!(sections.secondary_outcomes, vec!["quality of life"]);
    }

    #[test]
    fn test_outcome_entries_keep_document_order() {
        let doc = "Title: T\nOutcomes:\n- SECONDARY: s1\n- PRIMARY: p1\n- SECONDARY: s2";
        let sections = parse_sections(doc).unwrap();
        assert_eq!(sections.primary_outcomes, vec!["p1"]);
        assert_eq!(sections.secondary_outcomes, vec!["s1", "s2"]);
    }

    #[test]
    fn test_empty_outcome_entries_dropped() {
        let doc = "Title: T\nOutcomes:\n- PRIMARY:\n- SECONDARY: kept";
        let sections = parse_sections(doc).unwrap();
        assert!(sections.primary_outcomes.is_empty());
        assert_eq!(sections.secondary_outcomes, vec!["kept"]);
    }

    #[test]
    fn test_dash_without_kind_is_content() {
        let doc = "Title: T\nOutcomes:\n- PRIMARY: rate of events\n- also counted by site";
        let sections = parse_sections(doc).unwrap();
        assert_eq!(
            sections.primary_outcomes,
            vec!["rate of events\n- also counted by site"]
        );
    }
}
