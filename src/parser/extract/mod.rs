pub mod details;
pub mod header;
pub mod people;
pub mod ratings;

use scraper::ElementRef;
use serde::Serialize;

/// One catalog entry as read from a listing fragment. `None` means the source
/// markup was absent or unreadable; for `external_id`/`title` it is the Unknown sentinel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MovieRecord {
    pub external_id: Option<String>,
    pub title: Option<String>,
    pub release_year: Option<String>,
    pub certificate: Option<String>,
    pub runtime_minutes: Option<u32>,
    pub genres: Vec<String>,
    pub metascore: Option<String>,
    pub imdb_rating: Option<String>,
    pub cast: Vec<String>,
}

/// Run every field extractor over one fragment. Never fails.
pub fn assemble(fragment: ElementRef<'_>) -> MovieRecord {
    MovieRecord {
        external_id: header::external_id(fragment),
        title: header::title(fragment),
        release_year: header::release_year(fragment),
        certificate: details::certificate(fragment),
        runtime_minutes: details::runtime_minutes(fragment),
        genres: details::genres(fragment),
        metascore: ratings::metascore(fragment),
        imdb_rating: ratings::imdb_rating(fragment),
        cast: people::cast(fragment),
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::html;
    use scraper::Html;

    fn fragments(doc: &Html) -> Vec<ElementRef<'_>> {
        html::find_all(doc.root_element(), "div", Some("lister-item mode-advanced")).collect()
    }

    fn fixture() -> Html {
        let page = std::fs::read_to_string("tests/fixtures/top_1000_page.html").unwrap();
        Html::parse_document(&page)
    }

    #[test]
    fn shawshank_full_record() {
        let doc = fixture();
        let r = assemble(fragments(&doc)[0]);
        assert_eq!(r.external_id.as_deref(), Some("tt0111161"));
        assert_eq!(r.title.as_deref(), Some("The Shawshank Redemption"));
        assert_eq!(r.release_year.as_deref(), Some("1994"));
        assert_eq!(r.certificate.as_deref(), Some("R"));
        assert_eq!(r.runtime_minutes, Some(142));
        assert_eq!(r.genres, vec!["Drama"]);
        assert_eq!(r.metascore.as_deref(), Some("82"));
        assert_eq!(r.imdb_rating.as_deref(), Some("9.3"));
        assert_eq!(
            r.cast,
            vec!["Frank Darabont", "Tim Robbins", "Morgan Freeman", "Bob Gunton"]
        );
    }

    #[test]
    fn missing_optional_fields_are_none() {
        let doc = fixture();
        let r = assemble(fragments(&doc)[1]);
        assert_eq!(r.external_id.as_deref(), Some("tt0050083"));
        assert_eq!(r.release_year.as_deref(), Some("1957"));
        assert_eq!(r.certificate, None);
        assert_eq!(r.runtime_minutes, None, "N/A runtime");
        assert_eq!(r.metascore, None);
        assert_eq!(r.imdb_rating.as_deref(), Some("9.0"));
        assert_eq!(r.genres, vec!["Crime", "Drama"]);
        assert_eq!(r.cast, vec!["Sidney Lumet", "Henry Fonda"]);
    }

    #[test]
    fn bare_fragment_degrades_to_unknown() {
        let doc = fixture();
        let r = assemble(fragments(&doc)[2]);
        assert_eq!(r.external_id, None);
        assert_eq!(r.title, None);
        assert_eq!(r.release_year, None);
        assert_eq!(r.imdb_rating, None);
        assert!(r.cast.is_empty());
        assert_eq!(r.genres, vec!["Drama", "Romance", "Thriller"]);
    }

    #[test]
    fn empty_fragment_is_all_missing() {
        let doc = Html::parse_fragment(r#"<div class="lister-item mode-advanced"></div>"#);
        let frag = fragments(&doc)[0];
        assert_eq!(assemble(frag), MovieRecord::default());
    }
}
