//! Post-generation grounding checks.
//!
//! A source counts as cited when the model output contains its marker
//! (`[S1]`, or a group such as `[S1, S3]`) or the literal source identifier
//! standing on its own (`a.md` is not cited by `data.md`).
//! Whether the answer is grounded is decided from those citations plus the
//! policy's uncertainty phrases; the model's own claims are not trusted.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::answer::Confidence;
use crate::context::SourceMarker;
use crate::policy::PolicyMatcher;

static BRACKET_GROUP: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"\[([^\[\]]{1,64})\]"));
static MARKER_LABEL: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"(?i)\bS(\d+)\b"));

/// Marker labels (upper-case, e.g. `S2`) that appear inside brackets in `text`.
fn cited_labels(text: &str) -> BTreeSet<String> {
    let (Ok(groups), Ok(labels)) = (&*BRACKET_GROUP, &*MARKER_LABEL) else {
        return BTreeSet::new();
    };
    groups
        .captures_iter(text)
        .filter_map(|group| group.get(1))
        .flat_map(|inner| labels.captures_iter(inner.as_str()))
        .filter_map(|label| label.get(1))
        .map(|digits| format!("S{}", digits.as_str().trim_start_matches('0')))
        .collect()
}

fn is_id_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '/')
}

/// Whether `source` occurs in `output` with no identifier character on
/// either side.
fn mentions_source(output: &str, source: &str) -> bool {
    if source.is_empty() {
        return false;
    }
    output.match_indices(source).any(|(start, _)| {
        let before = output[..start].chars().next_back();
        let after = output[start + source.len()..].chars().next();
        !before.is_some_and(is_id_char) && !after.is_some_and(is_id_char)
    })
}

/// Sources from `markers` that `output` cites, in marker (relevance) order.
pub fn cited_sources(output: &str, markers: &[SourceMarker]) -> Vec<String> {
    let labels = cited_labels(output);
    markers
        .iter()
        .filter(|marker| labels.contains(&marker.label) || mentions_source(output, &marker.source))
        .map(|marker| marker.source.clone())
        .collect()
}

/// Confidence tier for an output citing `sources`.
pub fn assess(output: &str, sources: &[String], matcher: &PolicyMatcher) -> Confidence {
    if sources.is_empty() {
        Confidence::Ungrounded
    } else if matcher.expresses_uncertainty(output) {
        Confidence::Partial
    } else {
        Confidence::Grounded
    }
}
