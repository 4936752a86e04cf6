use scraper::ElementRef;

use crate::parser::html;

const RATINGS_BAR: (&str, &str) = ("div", "ratings-bar");

/// Class strings the metascore badge is published under.
const METASCORE_CLASSES: &[&str] = &[
    "metascore",
    "metascore  favorable",
    "metascore  mixed",
    "metascore  unfavorable",
];

pub fn imdb_rating(fragment: ElementRef<'_>) -> Option<String> {
    let bar = html::find_first(fragment, RATINGS_BAR.0, Some(RATINGS_BAR.1))?;
    html::find_first(bar, "strong", None).and_then(html::text)
}

pub fn metascore(fragment: ElementRef<'_>) -> Option<String> {
    let bar = html::find_first(fragment, RATINGS_BAR.0, Some(RATINGS_BAR.1))?;
    html::find_first_of(bar, "span", METASCORE_CLASSES).and_then(html::text)
}
