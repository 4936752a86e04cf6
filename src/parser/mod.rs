pub mod extract;
pub mod html;

use scraper::Html;

use crate::error::DecodeError;
pub use extract::MovieRecord;

const CONTAINER: (&str, &str) = ("div", "lister-list");
const FRAGMENT: (&str, &str) = ("div", "lister-item mode-advanced");

/// Decode every catalog fragment on a listing page, in page order.
///
/// A page without the listing container is a structural failure, not an empty page.
pub fn decode_page(markup: &str) -> Result<Vec<MovieRecord>, DecodeError> {
    let document = Html::parse_document(markup);
    let container = html::find_first(document.root_element(), CONTAINER.0, Some(CONTAINER.1))
        .ok_or(DecodeError::MissingContainer {
            tag: CONTAINER.0,
            class: CONTAINER.1,
        })?;

    Ok(html::find_all(container, FRAGMENT.0, Some(FRAGMENT.1))
        .map(extract::assemble)
        .collect())
}
