use std::sync::LazyLock;

use regex::Regex;
use scraper::ElementRef;

use crate::parser::html;

static YEAR_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b(\d{4})\b").unwrap());

const HEADER: (&str, &str) = ("h3", "lister-item-header");
const YEAR: (&str, &str) = ("span", "lister-item-year text-muted unbold");

/// The path segment after `title` in the header link: `/title/tt0111161/?ref_=..` -> `tt0111161`.
pub fn external_id(fragment: ElementRef<'_>) -> Option<String> {
    let link = title_link(fragment)?;
    let href = html::attribute(link, "href")?;
    id_from_href(href)
}

pub fn title(fragment: ElementRef<'_>) -> Option<String> {
    title_link(fragment).and_then(html::text)
}

pub fn release_year(fragment: ElementRef<'_>) -> Option<String> {
    let header = html::find_first(fragment, HEADER.0, Some(HEADER.1))?;
    let raw = html::find_first(header, YEAR.0, Some(YEAR.1)).and_then(html::text)?;
    if let Some(caps) = YEAR_RE.captures(&raw) {
        return Some(caps[1].to_string());
    }
    let stripped = raw.trim_start_matches('(').trim_end_matches(')').trim();
    (!stripped.is_empty()).then(|| stripped.to_string())
}

fn title_link(fragment: ElementRef<'_>) -> Option<ElementRef<'_>> {
    let header = html::find_first(fragment, HEADER.0, Some(HEADER.1))?;
    html::find_first(header, "a", None)
}

pub(crate) fn id_from_href(href: &str) -> Option<String> {
    let path = href.split(['?', '#']).next().unwrap_or_default();
    let mut segments = path.split('/').filter(|s| !s.is_empty());
    segments.find(|s| *s == "title")?;
    segments
        .next()
        .filter(|id| id.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(str::to_string)
}
