use std::collections::HashSet;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use url::Url;

/// Tried in order of specificity; the first group that yields anything wins.
const DETAIL_SELECTORS: &[&str] = &[
    r#"a[href*="/company/"]"#,
    r#"a[href*="/startup/"]"#,
    r#"a[href*="/detail/"]"#,
    r#"a[href*="/scheda/"]"#,
    r#"a[href*="/impresa/"]"#,
    r#"a[href*="?id="]"#,
];

const TABLE_SELECTORS: &[&str] = &[
    "table.results tr a[href]",
    "table.companies tr a[href]",
    "table.data tr a[href]",
];

const DETAIL_PATH_PATTERN: &str = r"/(company|startup|detail|scheda|impresa|profile)/";

const NEXT_SELECTORS: &[&str] = &[
    r#"a[rel="next"]"#,
    "a.next",
    "li.next a",
    ".pagination .next a",
    ".pagination-next a",
    r#"a[aria-label="Next"]"#,
    r#"a[aria-label="Successivo"]"#,
];

const NEXT_TEXTS: &[&str] = &["Next", "Successivo", "Avanti", "»"];

const ACTIVE_PAGE_SELECTORS: &[&str] = &[
    "li.active",
    "li.selected",
    "a.active",
    "a.selected",
    ".pagination .current",
];

/// All candidate detail-page URLs on a listing page, absolute, in document
/// order, each at most once.
pub fn extract_detail_links(doc: &Html, base: &Url) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut links = Vec::new();

    for css in DETAIL_SELECTORS {
        let selector = match Selector::parse(css) {
            Ok(s) => s,
            Err(_) => continue,
        };
        for el in doc.select(&selector) {
            push_link(&el, base, &mut seen, &mut links);
        }
    }

    // Result tables whose links carry no path hints.
    if links.is_empty() {
        for css in TABLE_SELECTORS {
            let selector = match Selector::parse(css) {
                Ok(s) => s,
                Err(_) => continue,
            };
            for el in doc.select(&selector) {
                push_link(&el, base, &mut seen, &mut links);
            }
        }
    }

    // Last resort: scan every link for a detail-looking path segment.
    if links.is_empty() {
        let any = Selector::parse("a[href]").unwrap();
        let pattern = Regex::new(DETAIL_PATH_PATTERN).unwrap();
        for el in doc.select(&any) {
            if el.value().attr("href").is_some_and(|h| pattern.is_match(h)) {
                push_link(&el, base, &mut seen, &mut links);
            }
        }
    }

    links
}

/// The next listing page, if any recognizable "next" control exists.
pub fn find_next_page(doc: &Html, base: &Url) -> Option<String> {
    for css in NEXT_SELECTORS {
        if let Ok(selector) = Selector::parse(css) {
            if let Some(url) = doc.select(&selector).find_map(|el| absolutize(&el, base)) {
                return Some(url);
            }
        }
    }

    // Anchor text holding a localized "next" synonym.
    let any = Selector::parse("a[href]").unwrap();
    for el in doc.select(&any) {
        let text = el.text().collect::<String>();
        let text = text.trim();
        if !text.is_empty() && NEXT_TEXTS.iter().any(|t| text.contains(t)) {
            if let Some(url) = absolutize(&el, base) {
                return Some(url);
            }
        }
    }

    // Numeric pagination: the link labelled with the active page + 1.
    let current: u32 = ACTIVE_PAGE_SELECTORS.iter().find_map(|css| {
        let selector = Selector::parse(css).ok()?;
        doc.select(&selector)
            .find_map(|el| el.text().collect::<String>().trim().parse::<u32>().ok())
    })?;
    let wanted = (current + 1).to_string();
    doc.select(&any)
        .find(|el| el.text().collect::<String>().trim() == wanted)
        .and_then(|el| absolutize(&el, base))
}

fn push_link(el: &ElementRef, base: &Url, seen: &mut HashSet<String>, links: &mut Vec<String>) {
    if let Some(url) = absolutize(el, base) {
        if seen.insert(url.clone()) {
            links.push(url);
        }
    }
}

fn absolutize(el: &ElementRef, base: &Url) -> Option<String> {
    let href = el.value().attr("href")?;
    if href.is_empty() || href.starts_with('#') || href.starts_with("javascript:") {
        return None;
    }
    let mut url = base.join(href).ok()?;
    url.set_fragment(None);
    Some(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://startup.registroimprese.it/isin/search").unwrap()
    }

    #[test]
    fn duplicate_detail_links_appear_once() {
        let html = r#"
            <a href="/company/1">Acme</a>
            <a href="/company/1">Acme again</a>
            <a href="/company/2">Other</a>
        "#;
        let doc = Html::parse_document(html);
        let links = extract_detail_links(&doc, &base());
        assert_eq!(
            links,
            vec![
                "https://startup.registroimprese.it/company/1",
                "https://startup.registroimprese.it/company/2",
            ]
        );
    }

    #[test]
    fn generic_scan_kicks_in_when_selectors_miss() {
        // "/profile/" is only matched by the path-pattern fallback.
        let html = r#"
            <a href="/profile/acme">Acme</a>
            <a href="/about">About us</a>
        "#;
        let doc = Html::parse_document(html);
        let links = extract_detail_links(&doc, &base());
        assert_eq!(
            links,
            vec!["https://startup.registroimprese.it/profile/acme"]
        );
    }

    #[test]
    fn table_rows_are_scanned_before_the_generic_fallback() {
        let html = r#"
            <table class="results">
              <tr><td><a href="/isin/s?x=1">Acme</a></td></tr>
              <tr><td><a href="/isin/s?x=2">Beta</a></td></tr>
            </table>
        "#;
        let doc = Html::parse_document(html);
        let links = extract_detail_links(&doc, &base());
        assert_eq!(links.len(), 2);
        assert!(links[0].ends_with("/isin/s?x=1"));
    }

    #[test]
    fn rel_next_wins() {
        let html = r#"
            <a href="/isin/search?p=3">3</a>
            <a rel="next" href="/isin/search?p=2">avanti</a>
        "#;
        let doc = Html::parse_document(html);
        assert_eq!(
            find_next_page(&doc, &base()).as_deref(),
            Some("https://startup.registroimprese.it/isin/search?p=2")
        );
    }

    #[test]
    fn localized_next_text_is_recognized() {
        let html = r#"<a href="?page=5">Successivo »</a>"#;
        let doc = Html::parse_document(html);
        let next = find_next_page(&doc, &base()).unwrap();
        assert!(next.ends_with("?page=5"));
    }

    #[test]
    fn numeric_pagination_follows_active_page_plus_one() {
        let html = r#"
            <ul class="pagination">
              <li><a href="?page=1">1</a></li>
              <li class="active">2</li>
              <li><a href="?page=3">3</a></li>
              <li><a href="?page=4">4</a></li>
            </ul>
        "#;
        let doc = Html::parse_document(html);
        let next = find_next_page(&doc, &base()).unwrap();
        assert!(next.ends_with("?page=3"));
    }

    #[test]
    fn no_next_control_terminates_pagination() {
        let html = r#"<a href="/company/1">Acme</a><p>fine dei risultati</p>"#;
        let doc = Html::parse_document(html);
        assert_eq!(find_next_page(&doc, &base()), None);
    }

    #[test]
    fn fragment_only_links_are_ignored() {
        let html = r##"<a class="next" href="#">next</a>"##;
        let doc = Html::parse_document(html);
        assert_eq!(find_next_page(&doc, &base()), None);
    }
}
