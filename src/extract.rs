use std::collections::HashSet;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::record::{CompanyRecord, Field};

/// One selector attempt: a CSS query plus the attribute to read, or the
/// element text when no attribute is named.
#[derive(Debug, Clone, Copy)]
pub struct SelectorRule {
    pub selector: &'static str,
    pub attr: Option<&'static str>,
}

const fn css(selector: &'static str) -> SelectorRule {
    SelectorRule {
        selector,
        attr: None,
    }
}

const fn attr(selector: &'static str, attr: &'static str) -> SelectorRule {
    SelectorRule {
        selector,
        attr: Some(attr),
    }
}

/// Ordered fallback chain for one field: direct selectors first, then the
/// labeled-field strategies. These are best-effort guesses over markup we do
/// not control; treat them as configuration, not as a correctness guarantee.
#[derive(Debug, Clone)]
pub struct ExtractionRule {
    pub field: Field,
    pub selectors: &'static [SelectorRule],
    pub labels: &'static [&'static str],
}

const NAME_SELECTORS: &[SelectorRule] = &[
    css("h1"),
    css("h2"),
    css(".company-name"),
    css("#company-name"),
    css("div.header h1"),
    css("div.intestazione h1"),
    css(".ragione-sociale"),
    css("title"),
];

const DESCRIPTION_SELECTORS: &[SelectorRule] = &[
    css(".description"),
    css("#description"),
    css(".company-description"),
    css("#company-description"),
    css(".about"),
    css("#about"),
    css(".profile"),
    css("#profile"),
    css("main p"),
    css("article p"),
    css(".content p"),
    css("#content p"),
];

const DATE_SELECTORS: &[SelectorRule] = &[
    css(".establishment-date"),
    css(".founded-date"),
    css(".foundation-date"),
];

const REGION_SELECTORS: &[SelectorRule] = &[css(".region"), css(".location .region")];

const CITY_SELECTORS: &[SelectorRule] = &[css(".city"), css(".location .city")];

const EMAIL_SELECTORS: &[SelectorRule] = &[
    attr(r#"a[href^="mailto:"]"#, "href"),
    css(".email"),
    css(".contact-email"),
];

const PHONE_SELECTORS: &[SelectorRule] = &[css(".phone"), css(".tel"), css(".contact-phone")];

const WEBSITE_SELECTORS: &[SelectorRule] = &[
    attr(".website a", "href"),
    attr(".url a", "href"),
];

const DATE_LABELS: &[&str] = &[
    "Data Costituzione",
    "Data di costituzione",
    "Costituzione",
    "Foundation Date",
    "Data iscrizione",
    "Costituita il",
];

const REGION_LABELS: &[&str] = &["Regione", "Region", "Territory"];

const CITY_LABELS: &[&str] = &["Comune", "Città", "City", "Località", "Location", "Sede"];

const PHONE_LABELS: &[&str] = &["Telefono", "Tel", "Phone", "Contatto", "Contact"];

const EMAIL_LABELS: &[&str] = &["Email", "E-mail"];

const WEBSITE_LABELS: &[&str] = &["Sito web", "Sito internet", "Website"];

const EMAIL_PATTERN: &str = r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b";

/// Generic free-mail domains are skipped when a company-looking address
/// exists elsewhere on the page.
const FREEMAIL_DENYLIST: &[&str] = &["example.com", "gmail.com", "libero.it", "hotmail"];

/// Italian landline and mobile formats.
const PHONE_PATTERNS: &[&str] = &[
    r"\+39\s?\d{10}",
    r"\+39\s?\d{3}[-\s]?\d{7}",
    r"\+39\s?\d{2}[-\s]?\d{8}",
    r"\+39\s?\d{3}[-\s]?\d{3}[-\s]?\d{4}",
    r"\+39\s?\d{3}[-\s]?\d{4}[-\s]?\d{3}",
    r"0\d{1,3}[-\s]?\d{6,7}",
    r"3\d{2}[-\s]?\d{6,7}",
];

/// Dates mentioned near a founding-related word, dd/mm/yyyy or yyyy/mm/dd
/// with any of / . - as separator.
const DATE_PATTERNS: &[&str] = &[
    r"(?i)(?:costituzione|costituita|foundation|created).*?(\d{2}[/.-]\d{2}[/.-]\d{4})",
    r"(?i)(?:costituzione|costituita|foundation|created).*?(\d{4}[/.-]\d{2}[/.-]\d{2})",
];

const FILE_EXTENSIONS: &[&str] = &[".pdf", ".doc", ".docx", ".xls", ".xlsx"];

// "file" is deliberately absent: as a substring it also hits the
// /profile/ detail URLs the listing parser treats as company pages.
const DOWNLOAD_KEYWORDS: &[&str] = &["download", "allegato", "attachment", "documento"];

/// Websites pointing back at the registry or at social profiles are not the
/// company's own site.
const WEBSITE_DENYLIST: &[&str] = &[
    "facebook.com",
    "twitter.com",
    "linkedin.com",
    "instagram.com",
    "registroimprese.it",
];

pub fn default_rules() -> Vec<ExtractionRule> {
    vec![
        ExtractionRule {
            field: Field::CompanyName,
            selectors: NAME_SELECTORS,
            labels: &[],
        },
        ExtractionRule {
            field: Field::FoundingDate,
            selectors: DATE_SELECTORS,
            labels: DATE_LABELS,
        },
        ExtractionRule {
            field: Field::Region,
            selectors: REGION_SELECTORS,
            labels: REGION_LABELS,
        },
        ExtractionRule {
            field: Field::City,
            selectors: CITY_SELECTORS,
            labels: CITY_LABELS,
        },
        ExtractionRule {
            field: Field::Description,
            selectors: DESCRIPTION_SELECTORS,
            labels: &[],
        },
        ExtractionRule {
            field: Field::Email,
            selectors: EMAIL_SELECTORS,
            labels: EMAIL_LABELS,
        },
        ExtractionRule {
            field: Field::Phone,
            selectors: PHONE_SELECTORS,
            labels: PHONE_LABELS,
        },
        ExtractionRule {
            field: Field::Website,
            selectors: WEBSITE_SELECTORS,
            labels: WEBSITE_LABELS,
        },
    ]
}

/// Runs the per-field strategy cascade over a detail page. A field that
/// survives every strategy unmatched comes out empty, never as an error.
pub struct FieldExtractor {
    rules: Vec<ExtractionRule>,
    email_re: Regex,
    phone_res: Vec<Regex>,
    date_res: Vec<Regex>,
}

impl Default for FieldExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl FieldExtractor {
    pub fn new() -> Self {
        Self::with_rules(default_rules())
    }

    pub fn with_rules(rules: Vec<ExtractionRule>) -> Self {
        Self {
            rules,
            email_re: Regex::new(EMAIL_PATTERN).unwrap(),
            phone_res: PHONE_PATTERNS
                .iter()
                .map(|p| Regex::new(p).unwrap())
                .collect(),
            date_res: DATE_PATTERNS
                .iter()
                .map(|p| Regex::new(p).unwrap())
                .collect(),
        }
    }

    pub fn extract(&self, html: &str, url: &Url) -> CompanyRecord {
        let doc = Html::parse_document(html);
        let page_text = collect_text(&doc);

        let mut record = CompanyRecord::new(url.as_str());
        for rule in &self.rules {
            let value = self.extract_field(&doc, html, &page_text, rule);
            record.set(rule.field, value);
        }
        record.file_urls = extract_file_links(&doc, url);
        record
    }

    fn extract_field(
        &self,
        doc: &Html,
        html: &str,
        page_text: &str,
        rule: &ExtractionRule,
    ) -> String {
        for selector_rule in rule.selectors {
            if let Some(raw) = select_first(doc, selector_rule) {
                let value = clean_field(rule.field, &raw);
                if !value.is_empty() {
                    return value;
                }
            }
        }

        for label in rule.labels {
            if let Some(raw) = labeled_value(doc, label) {
                let value = clean_field(rule.field, &raw);
                if !value.is_empty() {
                    return value;
                }
            }
        }

        let fallback = match rule.field {
            Field::Email => self.email_from_text(html),
            Field::Phone => first_match(&self.phone_res, page_text),
            Field::FoundingDate => first_capture(&self.date_res, page_text),
            _ => None,
        };
        fallback
            .map(|raw| clean_field(rule.field, &raw))
            .unwrap_or_default()
    }

    /// Email-shaped tokens anywhere in the markup, preferring addresses
    /// outside the free-mail denylist when an alternative exists.
    fn email_from_text(&self, html: &str) -> Option<String> {
        let found: Vec<&str> = self.email_re.find_iter(html).map(|m| m.as_str()).collect();
        let preferred = found.iter().find(|e| {
            let lower = e.to_lowercase();
            !FREEMAIL_DENYLIST.iter().any(|d| lower.contains(d))
        });
        preferred
            .or_else(|| found.first())
            .map(|e| e.to_string())
    }
}

/// Links on a detail page that look like attached documents, by extension or
/// by a download-related path keyword.
pub fn extract_file_links(doc: &Html, base: &Url) -> Vec<String> {
    let any = Selector::parse("a[href]").unwrap();
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    for el in doc.select(&any) {
        let Some(href) = el.value().attr("href") else {
            continue;
        };
        let lower = href.to_lowercase();
        let wanted = FILE_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
            || DOWNLOAD_KEYWORDS.iter().any(|k| lower.contains(k));
        if !wanted {
            continue;
        }
        if let Ok(abs) = base.join(href) {
            let abs = abs.to_string();
            if seen.insert(abs.clone()) {
                out.push(abs);
            }
        }
    }
    out
}

fn select_first(doc: &Html, rule: &SelectorRule) -> Option<String> {
    let selector = match Selector::parse(rule.selector) {
        Ok(s) => s,
        Err(e) => {
            log::debug!("Skipping invalid selector '{}': {:?}", rule.selector, e);
            return None;
        }
    };
    for el in doc.select(&selector) {
        let raw = match rule.attr {
            Some(name) => el.value().attr(name).map(str::to_string),
            None => Some(el.text().collect::<String>()),
        };
        if let Some(raw) = raw {
            let raw = raw.trim();
            if !raw.is_empty() {
                return Some(raw.to_string());
            }
        }
    }
    None
}

/// Labeled-field strategy: find an element whose own text carries the label,
/// then read the value from (in order) the text after a colon in that same
/// element, the following sibling element, the next table cell, or the next
/// definition-list value.
fn labeled_value(doc: &Html, label: &str) -> Option<String> {
    let all = Selector::parse("body *").unwrap();

    for el in doc.select(&all) {
        let own = direct_text(&el);
        if let Some(idx) = own.find(label) {
            let rest = own[idx + label.len()..].trim_start();
            if let Some(value) = rest.strip_prefix(':') {
                let value = value.trim();
                if !value.is_empty() {
                    return Some(value.to_string());
                }
            }
        }
    }

    for el in doc.select(&all) {
        if !direct_text(&el).contains(label) {
            continue;
        }
        if let Some(value) = following_value(&el) {
            return Some(value);
        }
    }

    None
}

/// Text nodes that are direct children only, so a label match on a leaf is
/// not shadowed by every ancestor containing the same text.
fn direct_text(el: &ElementRef) -> String {
    el.children()
        .filter_map(|node| node.value().as_text().map(|t| t.text.to_string()))
        .collect::<Vec<_>>()
        .join(" ")
}

fn following_value(el: &ElementRef) -> Option<String> {
    let wanted = match el.value().name() {
        "td" | "th" => Some("td"),
        "dt" => Some("dd"),
        _ => None,
    };
    el.next_siblings()
        .filter_map(ElementRef::wrap)
        .find(|sib| wanted.map_or(true, |w| sib.value().name() == w))
        .map(|sib| sib.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
}

fn first_match(patterns: &[Regex], text: &str) -> Option<String> {
    patterns
        .iter()
        .find_map(|re| re.find(text).map(|m| m.as_str().to_string()))
}

fn first_capture(patterns: &[Regex], text: &str) -> Option<String> {
    patterns.iter().find_map(|re| {
        re.captures(text)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    })
}

fn clean_field(field: Field, raw: &str) -> String {
    match field {
        Field::CompanyName | Field::Description | Field::Region | Field::City => collapse_ws(raw),
        Field::FoundingDate => raw
            .chars()
            .filter(|c| c.is_ascii_digit() || "/.-".contains(*c))
            .collect(),
        Field::Phone => collapse_ws(
            &raw.chars()
                .filter(|c| c.is_ascii_digit() || "+- ".contains(*c))
                .collect::<String>(),
        ),
        Field::Email => clean_email(raw),
        Field::Website => clean_website(raw),
    }
}

fn collapse_ws(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn clean_email(raw: &str) -> String {
    let email = raw.trim();
    let email = email.strip_prefix("mailto:").unwrap_or(email);
    let email = email.split('?').next().unwrap_or_default().trim();
    match email.rsplit_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => email.to_string(),
        _ => String::new(),
    }
}

fn clean_website(raw: &str) -> String {
    let site = raw.trim();
    if !site.starts_with("http") {
        return String::new();
    }
    let lower = site.to_lowercase();
    if WEBSITE_DENYLIST.iter().any(|d| lower.contains(d)) {
        return String::new();
    }
    site.to_string()
}

fn collect_text(doc: &Html) -> String {
    doc.root_element().text().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(html: &str) -> CompanyRecord {
        let url = Url::parse("https://startup.registroimprese.it/company/42").unwrap();
        FieldExtractor::new().extract(html, &url)
    }

    #[test]
    fn mailto_target_wins_and_is_stripped() {
        let html = r#"<h1>Acme</h1><a href="mailto:info@acme.it?subject=ciao">scrivici</a>"#;
        let record = extract(html);
        assert_eq!(record.email, "info@acme.it");
    }

    #[test]
    fn email_regex_prefers_non_freemail_addresses() {
        let html = "<p>contatti: boss@gmail.com oppure info@acme.it</p>";
        assert_eq!(extract(html).email, "info@acme.it");
    }

    #[test]
    fn freemail_is_kept_when_nothing_else_matches() {
        let html = "<p>contatti: boss@gmail.com</p>";
        assert_eq!(extract(html).email, "boss@gmail.com");
    }

    #[test]
    fn label_colon_value_in_single_text_node() {
        let html = "<div>Regione: Lombardia</div>";
        assert_eq!(extract(html).region, "Lombardia");
    }

    #[test]
    fn label_value_in_following_sibling() {
        let html = "<div><span>Comune</span><span>Milano</span></div>";
        assert_eq!(extract(html).city, "Milano");
    }

    #[test]
    fn label_value_in_next_table_cell() {
        let html = r#"
            <table><tr>
              <td>Data Costituzione</td><td>12/03/2021</td>
            </tr></table>
        "#;
        assert_eq!(extract(html).founding_date, "12/03/2021");
    }

    #[test]
    fn label_value_in_definition_list() {
        let html = "<dl><dt>Regione</dt><dd>Piemonte</dd></dl>";
        assert_eq!(extract(html).region, "Piemonte");
    }

    #[test]
    fn missing_date_is_empty_not_an_error() {
        let html = "<h1>Acme</h1><p>nessuna informazione utile</p>";
        assert_eq!(extract(html).founding_date, "");
    }

    #[test]
    fn date_regex_fallback_near_founding_words() {
        let html = "<p>La società è stata Costituita il giorno 01/02/2019 a Milano.</p>";
        assert_eq!(extract(html).founding_date, "01/02/2019");
    }

    #[test]
    fn phone_regex_fallback_matches_italian_formats() {
        let html = "<p>Per informazioni chiamare il +39 02 12345678.</p>";
        assert_eq!(extract(html).phone, "+39 02 12345678");
    }

    #[test]
    fn company_name_whitespace_is_collapsed() {
        let html = "<h1>  Acme \n   S.r.l.  </h1>";
        assert_eq!(extract(html).company_name, "Acme S.r.l.");
    }

    #[test]
    fn direct_selector_beats_label_strategy() {
        let html = r#"
            <span class="region">Veneto</span>
            <div>Regione: Lombardia</div>
        "#;
        assert_eq!(extract(html).region, "Veneto");
    }

    #[test]
    fn social_links_are_not_the_company_website() {
        let html = r#"
            <div class="website"><a href="https://linkedin.com/company/acme">in</a></div>
            <div>Sito web: nothing here</div>
        "#;
        assert_eq!(extract(html).website, "");
    }

    #[test]
    fn file_links_by_extension_and_keyword() {
        let html = r#"
            <a href="/docs/bilancio.pdf">bilancio</a>
            <a href="/docs/bilancio.pdf">ancora</a>
            <a href="/allegato?id=9">allegato</a>
            <a href="/chi-siamo">chi siamo</a>
        "#;
        let record = extract(html);
        assert_eq!(
            record.file_urls,
            vec![
                "https://startup.registroimprese.it/docs/bilancio.pdf",
                "https://startup.registroimprese.it/allegato?id=9",
            ]
        );
    }

    #[test]
    fn profile_links_are_not_mistaken_for_documents() {
        let html = r#"
            <a href="/profile/acme">Acme</a>
            <a href="/files/visura.pdf">visura</a>
        "#;
        let record = extract(html);
        assert_eq!(
            record.file_urls,
            vec!["https://startup.registroimprese.it/files/visura.pdf"]
        );
    }

    #[test]
    fn source_url_is_always_set() {
        let record = extract("<p></p>");
        assert_eq!(
            record.source_url,
            "https://startup.registroimprese.it/company/42"
        );
        assert!(record.is_empty());
    }
}
