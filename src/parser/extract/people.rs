use scraper::ElementRef;

use crate::parser::html;

/// Directors and stars, in page order. The credits paragraph carries `class=""`.
pub fn cast(fragment: ElementRef<'_>) -> Vec<String> {
    let Some(credits) = html::find_first(fragment, "p", Some("")) else {
        return Vec::new();
    };
    html::find_all(credits, "a", None)
        .filter_map(html::text)
        .collect()
}
