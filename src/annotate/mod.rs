//! Rendering of an expansion report: table rows, inline expansion, and an
//! HTML highlight view. Nothing here resolves anything.

use std::collections::HashMap;

use serde::Serialize;

use crate::detection::{rewrite_tokens, token_spans};
use crate::engine::{ExpansionReport, ResolvedAbbreviation};
use crate::resolution::{Resolution, ResolutionSource};

/// One table row per distinct abbreviation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExpansionRow {
    pub abbr: String,
    pub expansion: String,
    /// Rounded to three decimals.
    pub confidence: f32,
    pub source: ResolutionSource,
}

impl From<&ResolvedAbbreviation> for ExpansionRow {
    fn from(resolved: &ResolvedAbbreviation) -> Self {
        Self {
            abbr: resolved.abbreviation.clone(),
            expansion: resolved.resolution.expansion.clone(),
            confidence: round3(resolved.resolution.confidence),
            source: resolved.resolution.source,
        }
    }
}

impl ExpansionRow {
    pub fn is_unknown(&self) -> bool {
        self.source == ResolutionSource::Unknown
    }
}

fn round3(value: f32) -> f32 {
    (value * 1000.0).round() / 1000.0
}

pub fn rows(report: &ExpansionReport) -> Vec<ExpansionRow> {
    report.rows()
}

fn by_abbreviation(report: &ExpansionReport) -> HashMap<&str, &Resolution> {
    report
        .resolutions
        .iter()
        .map(|r| (r.abbreviation.as_str(), &r.resolution))
        .collect()
}

/// Replace every token occurrence of a resolved abbreviation with
/// `ABBR (Expansion)`. Unknown abbreviations are left as they are.
pub fn expand_inline(text: &str, report: &ExpansionReport) -> String {
    let resolved = by_abbreviation(report);
    rewrite_tokens(text, |token| {
        resolved
            .get(token)
            .filter(|r| !r.is_unknown())
            .map(|r| format!("{token} ({})", r.expansion))
    })
}

/// HTML rendering of `text` with every abbreviation wrapped in a `<mark>`.
/// The title carries the expansion and its confidence.
pub fn highlight(text: &str, report: &ExpansionReport) -> String {
    let resolved = by_abbreviation(report);
    let mut out = String::with_capacity(text.len() * 2);
    let mut last = 0;

    for token in token_spans(text) {
        let Some(resolution) = resolved.get(token.as_str()) else {
            continue;
        };
        out.push_str(&escape_html(&text[last..token.start()]));

        let class = match resolution.source {
            ResolutionSource::Unknown => "abbr unknown",
            ResolutionSource::DefaultFallback | ResolutionSource::ModelFallback => "abbr fallback",
            _ => "abbr",
        };
        out.push_str(&format!(
            "<mark class=\"{class}\" title=\"{} (confidence {:.3})\">{}</mark>",
            escape_html(&resolution.expansion),
            resolution.confidence,
            token.as_str()
        ));
        last = token.end();
    }
    out.push_str(&escape_html(&text[last..]));

    out
}

/// Escape the five HTML-significant characters.
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
