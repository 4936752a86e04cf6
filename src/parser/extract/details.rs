use scraper::ElementRef;

use crate::parser::html;

/// The info paragraph is published as `class="text-muted "`; the trailing space matters
/// because the synopsis paragraph below it is a bare `text-muted`.
const INFO_CLASSES: &[&str] = &["text-muted ", "text-muted"];

fn info_span(fragment: ElementRef<'_>, class: &'static str) -> Option<String> {
    let info = html::find_first_of(fragment, "p", INFO_CLASSES)?;
    html::find_first(info, "span", Some(class)).and_then(html::text)
}

pub fn certificate(fragment: ElementRef<'_>) -> Option<String> {
    info_span(fragment, "certificate")
}

pub fn runtime_minutes(fragment: ElementRef<'_>) -> Option<u32> {
    info_span(fragment, "runtime").and_then(|t| parse_runtime(&t))
}

pub fn genres(fragment: ElementRef<'_>) -> Vec<String> {
    info_span(fragment, "genre")
        .map(|t| split_genres(&t))
        .unwrap_or_default()
}

/// Leading integer token only: `"142 min"` -> 142.
pub(crate) fn parse_runtime(text: &str) -> Option<u32> {
    text.split_whitespace().next()?.parse().ok()
}

pub(crate) fn split_genres(text: &str) -> Vec<String> {
    text.split(',')
        .map(str::trim)
        .filter(|g| !g.is_empty())
        .map(str::to_string)
        .collect()
}
