//! Structural queries over a parsed document.
//!
//! Class selectors compare the `class` attribute verbatim: `"lister-item mode-advanced"`
//! only matches that exact string, and an element without a class attribute
//! compares as `""`.

use scraper::ElementRef;

/// All descendant elements of `node` (excluding `node`) matching `tag` and `class`,
/// in document order.
pub fn find_all<'a>(
    node: ElementRef<'a>,
    tag: &'a str,
    class: Option<&'a str>,
) -> impl Iterator<Item = ElementRef<'a>> + 'a {
    node.descendants()
        .skip(1)
        .filter_map(ElementRef::wrap)
        .filter(move |el| matches(el, tag, class))
}

pub fn find_first<'a>(node: ElementRef<'a>, tag: &'a str, class: Option<&'a str>) -> Option<ElementRef<'a>> {
    find_all(node, tag, class).next()
}

/// First match for the earliest class string in `classes` that matches anything.
pub fn find_first_of<'a>(node: ElementRef<'a>, tag: &'a str, classes: &[&'a str]) -> Option<ElementRef<'a>> {
    classes
        .iter()
        .find_map(|class| find_first(node, tag, Some(*class)))
}

/// Concatenated text content, trimmed. Blank text is `None`.
pub fn text(node: ElementRef<'_>) -> Option<String> {
    let raw: String = node.text().collect();
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub fn attribute<'a>(node: ElementRef<'a>, name: &str) -> Option<&'a str> {
    node.value().attr(name)
}

fn matches(el: &ElementRef<'_>, tag: &str, class: Option<&str>) -> bool {
    let element = el.value();
    if !element.name().eq_ignore_ascii_case(tag) {
        return false;
    }
    match class {
        Some(wanted) => element.attr("class").unwrap_or("") == wanted,
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::Html;

    const DOC: &str = r#"
        <div id="root">
          <p class="text-muted">first</p>
          <p class="">cast</p>
          <p>bare</p>
          <div class="lister-item mode-advanced"><span class="genre"> Drama </span></div>
          <div class="lister-item"><span class="genre">Comedy</span></div>
        </div>"#;

    #[test]
    fn class_match_is_exact_string() {
        let doc = Html::parse_document(DOC);
        let root = doc.root_element();
        let items: Vec<_> = find_all(root, "div", Some("lister-item mode-advanced")).collect();
        assert_eq!(items.len(), 1);
        assert!(find_first(root, "div", Some("mode-advanced")).is_none());
    }

    #[test]
    fn empty_class_matches_blank_and_absent() {
        let doc = Html::parse_document(DOC);
        let texts: Vec<_> = find_all(doc.root_element(), "p", Some(""))
            .filter_map(text)
            .collect();
        assert_eq!(texts, vec!["cast", "bare"]);
    }

    #[test]
    fn first_of_respects_priority() {
        let doc = Html::parse_document(DOC);
        let root = doc.root_element();
        let p = find_first_of(root, "p", &["missing", "", "text-muted"]).unwrap();
        assert_eq!(text(p).as_deref(), Some("cast"));
        assert!(find_first_of(root, "p", &["nope"]).is_none());
    }

    #[test]
    fn text_trims_and_blank_is_none() {
        let doc = Html::parse_document("<span class='a'>  </span><span class='b'> x y </span>");
        let root = doc.root_element();
        assert_eq!(find_first(root, "span", Some("a")).and_then(text), None);
        assert_eq!(find_first(root, "span", Some("b")).and_then(text).as_deref(), Some("x y"));
    }

    #[test]
    fn attribute_lookup() {
        let doc = Html::parse_document(r#"<a href="/title/tt0111161/">x</a>"#);
        let link = find_first(doc.root_element(), "a", None).unwrap();
        assert_eq!(attribute(link, "href"), Some("/title/tt0111161/"));
        assert_eq!(attribute(link, "title"), None);
    }
}
