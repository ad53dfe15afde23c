use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use tracing::info;

use super::heuristics;
use super::text_of;
use crate::models::{Company, ExtractionMethod, Filing, UNKNOWN};

static LINK: Lazy<Selector> = Lazy::new(|| Selector::parse("a[href]").expect("Failed to compile LINK"));

/// Fallback pass over every anchor on the page, judged by its own text and
/// the text of its closest three ancestors
pub(crate) fn from_links(document: &Html, company: &Company) -> Vec<Filing> {
    let mut filings = Vec::new();

    for link in document.select(&LINK) {
        let href = link.value().attr("href").unwrap_or_default();
        let link_text = text_of(link);
        if !heuristics::is_document_link(href, &link_text) {
            continue;
        }

        let context: Vec<String> = link
            .ancestors()
            .filter_map(ElementRef::wrap)
            .take(3)
            .map(text_of)
            .collect();
        let combined = format!("{} {}", link_text, context.join(" ")).to_lowercase();

        let url = match heuristics::resolve_url(href) {
            Some(url) => url,
            None => continue,
        };
        if !heuristics::is_likely_annual_report(&combined, &url, "", "") {
            continue;
        }

        let year = heuristics::year_from_text(&combined).unwrap_or_else(|| UNKNOWN.to_string());
        let subject = if link_text.is_empty() {
            "Annual Report".to_string()
        } else {
            link_text
        };
        info!("Found report from link: {}", subject);

        filings.push(Filing {
            ticker: company.ticker.clone(),
            year,
            url,
            subject,
            date: UNKNOWN.to_string(),
            filing_date: String::new(),
            broadcast_date: String::new(),
            from_year: String::new(),
            to_year: String::new(),
            submission_type: String::new(),
            method: ExtractionMethod::Link,
        });
    }

    filings
}
