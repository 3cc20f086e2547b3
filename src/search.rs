use scraper::{Html, Selector};
use url::Url;

/// Tried in order when the homepage yields no usable search form, or the
/// submission comes back without detail links.
pub const FALLBACK_SEARCH_URLS: &[&str] = &[
    "https://startup.registroimprese.it/isin/search?searchType=advanced",
    "https://startup.registroimprese.it/isin/search",
    "https://startup.registroimprese.it/isin/ricerca",
];

/// Overlaid on whatever the form already carries: advanced search over
/// active companies.
pub const SEARCH_PARAMS: &[(&str, &str)] = &[("searchType", "advanced"), ("stato", "A")];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormMethod {
    Get,
    Post,
}

/// A search form ready to submit: absolute action URL, declared method and
/// the full payload (collected inputs plus the fixed search parameters).
#[derive(Debug, Clone)]
pub struct SearchForm {
    pub action: String,
    pub method: FormMethod,
    pub fields: Vec<(String, String)>,
}

/// Picks the first form whose action path hints at search functionality,
/// falling back to the first form on the page.
pub fn discover_search_form(doc: &Html, page_url: &Url) -> Option<SearchForm> {
    let form_sel = Selector::parse("form").unwrap();
    let input_sel = Selector::parse("input[name], select[name]").unwrap();

    let forms: Vec<_> = doc.select(&form_sel).collect();
    let form = forms
        .iter()
        .find(|f| {
            let action = f.value().attr("action").unwrap_or("");
            action.contains("search") || action.contains("ricerca")
        })
        .or_else(|| forms.first())?;

    let action = page_url
        .join(form.value().attr("action").unwrap_or(""))
        .ok()?
        .to_string();

    let method = match form.value().attr("method") {
        Some(m) if m.eq_ignore_ascii_case("post") => FormMethod::Post,
        _ => FormMethod::Get,
    };

    let mut fields: Vec<(String, String)> = form
        .select(&input_sel)
        .filter_map(|el| {
            let name = el.value().attr("name")?;
            let value = el.value().attr("value").unwrap_or("");
            Some((name.to_string(), value.to_string()))
        })
        .collect();

    for (name, value) in SEARCH_PARAMS {
        overlay(&mut fields, name, value);
    }

    Some(SearchForm {
        action,
        method,
        fields,
    })
}

fn overlay(fields: &mut Vec<(String, String)>, name: &str, value: &str) {
    match fields.iter_mut().find(|(n, _)| n == name) {
        Some(entry) => entry.1 = value.to_string(),
        None => fields.push((name.to_string(), value.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page_url() -> Url {
        Url::parse("https://startup.registroimprese.it/isin/home").unwrap()
    }

    #[test]
    fn prefers_form_with_search_hint_in_action() {
        let html = r#"
            <form action="/isin/login" method="post">
              <input name="user" value="">
            </form>
            <form action="/isin/search" method="post">
              <input type="hidden" name="token" value="abc">
            </form>
        "#;
        let doc = Html::parse_document(html);
        let form = discover_search_form(&doc, &page_url()).unwrap();
        assert_eq!(form.action, "https://startup.registroimprese.it/isin/search");
        assert_eq!(form.method, FormMethod::Post);
        assert!(form.fields.contains(&("token".to_string(), "abc".to_string())));
    }

    #[test]
    fn falls_back_to_first_form() {
        let html = r#"<form action="/isin/go"><input name="q" value=""></form>"#;
        let doc = Html::parse_document(html);
        let form = discover_search_form(&doc, &page_url()).unwrap();
        assert_eq!(form.action, "https://startup.registroimprese.it/isin/go");
        assert_eq!(form.method, FormMethod::Get);
    }

    #[test]
    fn fixed_parameters_override_collected_values() {
        let html = r#"
            <form action="ricerca" method="GET">
              <input name="stato" value="X">
              <select name="regione"><option value="">tutte</option></select>
            </form>
        "#;
        let doc = Html::parse_document(html);
        let form = discover_search_form(&doc, &page_url()).unwrap();

        assert_eq!(
            form.action,
            "https://startup.registroimprese.it/isin/ricerca"
        );
        let stato = form.fields.iter().find(|(n, _)| n == "stato").unwrap();
        assert_eq!(stato.1, "A");
        let search_type = form.fields.iter().find(|(n, _)| n == "searchType").unwrap();
        assert_eq!(search_type.1, "advanced");
        assert!(form.fields.iter().any(|(n, _)| n == "regione"));
    }

    #[test]
    fn missing_action_resolves_to_page_url() {
        let html = r#"<form method="post"><input name="q" value=""></form>"#;
        let doc = Html::parse_document(html);
        let form = discover_search_form(&doc, &page_url()).unwrap();
        assert_eq!(form.action, page_url().to_string());
    }

    #[test]
    fn page_without_forms_yields_none() {
        let doc = Html::parse_document("<p>No search here</p>");
        assert!(discover_search_form(&doc, &page_url()).is_none());
    }
}
