//! Text heuristics shared by the table and link passes

use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

use crate::config::NseSite;
use crate::models::UNKNOWN;

const DOCUMENT_MARKERS: &[&str] = &[
    ".pdf",
    ".zip",
    ".doc",
    ".docx",
    "download",
    "attachment",
    "document",
    "nsearchives.nseindia.com",
];

const STRONG_PHRASES: &[&str] = &[
    "annual report",
    "yearly report",
    "audited annual results",
    "annual audited results",
];

const URL_MARKERS: &[&str] = &["annual_report", "annual-report", "nsearchives.nseindia.com"];

const MEDIUM_PHRASES: &[&str] = &["annual", "yearly", "year ended", "financial year", "fy"];

/// Fragments of a date cell that are never part of the date itself
const DATE_JUNK: &[&str] = &[
    "EXCHANGE",
    "RECEIVED",
    "DISSEMINATION",
    "TIME TAKEN",
    "HOVER",
    "TABLE",
    "WIDTH",
    "COLSPAN",
];

static YEAR_RANGE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(20\d{2})\s*[-–]\s*(20\d{2}|\d{2})\b").expect("Failed to compile YEAR_RANGE_RE")
});

/// Financial year patterns, most specific first. Two captures mean a
/// from/to range, one capture means the closing year.
static YEAR_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)(\d{4})-(\d{2,4})",
        r"(?i)FY\s*(\d{4})-?(\d{2,4})?",
        r"(?i)year\s+ended?\s+.*?(\d{4})",
        r"(?i)(\d{4})\s*-\s*(\d{2,4})",
        r"(?i)for\s+the\s+year\s+(\d{4})",
    ]
    .iter()
    .map(|pat| Regex::new(pat).expect("Failed to compile year pattern"))
    .collect()
});

/// Date shapes accepted at the start of a candidate date string
static DATE_PREFIX_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(\d{2}-[A-Z]{3}-\d{4}|\d{2}/\d{2}/\d{4}|\d{4}-\d{2}-\d{2}|\d{1,2}-\d{1,2}-\d{4})")
        .expect("Failed to compile DATE_PREFIX_RE")
});

/// Date shapes searched anywhere in a cell, in order of preference
static DATE_SCAN_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)\d{2}-[A-Z]{3}-\d{4}\s+\d{2}:\d{2}:\d{2}",
        r"(?i)\d{2}-[A-Z]{3}-\d{4}",
        r"\d{2}/\d{2}/\d{4}",
        r"\d{1,2}-\d{1,2}-\d{4}",
    ]
    .iter()
    .map(|pat| Regex::new(pat).expect("Failed to compile date pattern"))
    .collect()
});

static DATE_FRAGMENT_SPLIT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\n|  |Exchange|Received|Time|Dissemination").expect("Failed to compile DATE_FRAGMENT_SPLIT_RE")
});

/// Whether an anchor could point at a downloadable document
pub fn is_document_link(href: &str, text: &str) -> bool {
    if href.is_empty() {
        return false;
    }
    let href = href.to_lowercase();
    if href.contains("rss") || href.contains("xml") {
        return false;
    }
    let text = text.to_lowercase();
    DOCUMENT_MARKERS
        .iter()
        .any(|marker| href.contains(marker) || text.contains(marker))
}

/// Whether the surrounding text and URL suggest an annual report
pub fn is_likely_annual_report(text: &str, url: &str, from_year: &str, to_year: &str) -> bool {
    let text = text.to_lowercase();
    let url = url.to_lowercase();

    if STRONG_PHRASES.iter().any(|p| text.contains(p)) {
        return true;
    }
    if URL_MARKERS.iter().any(|m| url.contains(m)) {
        return true;
    }
    if YEAR_RANGE_RE.is_match(&text) {
        return true;
    }
    if let Some((from, to)) = consecutive_years(from_year, to_year) {
        if (2000..=2030).contains(&from) && to == from + 1 {
            return true;
        }
    }

    let has_medium = MEDIUM_PHRASES.iter().any(|p| text.contains(p));
    let is_document = url.contains(".pdf") || url.contains(".zip");
    has_medium && is_document
}

/// Parse a from/to pair where the closing year may be abbreviated (`2023`, `24`)
fn consecutive_years(from_year: &str, to_year: &str) -> Option<(i32, i32)> {
    let from_year = from_year.trim();
    let to_year = to_year.trim();
    if from_year.len() != 4 {
        return None;
    }
    let from: i32 = from_year.parse().ok()?;
    let to = expand_year(from, to_year)?;
    (to == from + 1).then_some((from, to))
}

fn expand_year(from: i32, to: &str) -> Option<i32> {
    let value: i32 = to.parse().ok()?;
    match to.len() {
        4 => Some(value),
        2 => Some(from / 100 * 100 + value),
        _ => None,
    }
}

fn range_label(from: i32, to: i32) -> String {
    format!("{}-{:02}", from, to % 100)
}

fn plausible_year(year: i32) -> bool {
    (1990..=2100).contains(&year)
}

/// Financial year label (`2023-24`) found in free text
pub fn year_from_text(text: &str) -> Option<String> {
    for pattern in YEAR_PATTERNS.iter() {
        for caps in pattern.captures_iter(text) {
            let first: i32 = match caps.get(1).and_then(|m| m.as_str().parse().ok()) {
                Some(year) if plausible_year(year) => year,
                _ => continue,
            };
            match caps.get(2) {
                Some(second) => {
                    if let Some(to) = expand_year(first, second.as_str()) {
                        if to == first + 1 {
                            return Some(range_label(first, to));
                        }
                    }
                }
                None => return Some(range_label(first - 1, first)),
            }
        }
    }
    None
}

/// Year label from the from/to columns, else from text, else whatever
/// column value is present
pub fn financial_year(from_year: &str, to_year: &str, text: &str) -> String {
    if let Some((from, to)) = consecutive_years(from_year, to_year) {
        return range_label(from, to);
    }
    if let Some(year) = year_from_text(text) {
        return year;
    }

    let from_year = from_year.trim();
    let to_year = to_year.trim();
    if !from_year.is_empty() {
        from_year.to_string()
    } else if !to_year.is_empty() {
        to_year.to_string()
    } else {
        UNKNOWN.to_string()
    }
}

pub fn subject(submission_type: &str, link_text: &str, year: &str) -> String {
    let submission_type = submission_type.trim();
    let link_text = link_text.trim();

    if !submission_type.is_empty() && submission_type != "-" && submission_type != "N/A" {
        submission_type.to_string()
    } else if link_text.chars().count() > 3 {
        link_text.chars().take(100).collect()
    } else {
        format!("Annual Report {}", year)
    }
}

/// Normalise a record date; a bare year stands for its March 31 year end
pub fn record_date(candidates: &[&str]) -> String {
    let value = candidates
        .iter()
        .map(|c| c.trim())
        .find(|c| !c.is_empty() && *c != "-" && *c != UNKNOWN);

    match value {
        Some(year) if year.len() == 4 && year.chars().all(|c| c.is_ascii_digit()) => {
            format!("{}-03-31", year)
        }
        Some(date) => date.to_string(),
        None => UNKNOWN.to_string(),
    }
}

/// Whether `text` starts with a recognised date shape and carries no
/// hover-table noise
pub fn is_date_like(text: &str) -> bool {
    let text = text.trim();
    if text.len() < 8 {
        return false;
    }
    let upper = text.to_uppercase();
    if DATE_JUNK.iter().any(|junk| upper.contains(junk)) {
        return false;
    }
    if text.matches('-').count() > 3 || text.matches(':').count() > 3 {
        return false;
    }
    DATE_PREFIX_RE.is_match(text)
}

/// First date-shaped fragment of a cell, splitting on the labels the
/// exchange puts around its timestamps
pub fn date_fragment(text: &str, max_len: usize) -> Option<String> {
    DATE_FRAGMENT_SPLIT_RE
        .split(text)
        .map(str::trim)
        .filter(|part| part.len() > 5 && part.len() < max_len)
        .find(|part| is_date_like(part))
        .map(str::to_string)
}

/// Last resort scan for a date anywhere in `text`
pub fn scan_date(text: &str) -> Option<String> {
    DATE_SCAN_PATTERNS
        .iter()
        .find_map(|pattern| pattern.find(text))
        .map(|m| m.as_str().to_string())
}

/// Absolute URL for an href found on the filings page
pub fn resolve_url(href: &str) -> Option<String> {
    let href = href.trim();
    if href.starts_with("http") {
        return Some(href.to_string());
    }
    let base = Url::parse(NseSite::BASE_URL).ok()?;
    base.join(href).ok().map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_link_detection() {
        assert!(is_document_link("https://nsearchives.nseindia.com/annual_reports/AR_1.zip", ""));
        assert!(is_document_link("/files/report.PDF", "View"));
        assert!(is_document_link("/x?id=1", "Download"));
        assert!(!is_document_link("/rss/annual.pdf", "Annual Report"));
        assert!(!is_document_link("/sitemap.xml", "document"));
        assert!(!is_document_link("", "annual report.pdf"));
        assert!(!is_document_link("/about", "About us"));
    }

    #[test]
    fn test_annual_report_detection() {
        assert!(is_likely_annual_report("annual report 2023", "", "", ""));
        assert!(is_likely_annual_report("", "https://nsearchives.nseindia.com/x", "", ""));
        assert!(is_likely_annual_report("filed for 2022-23", "https://x/y", "", ""));
        assert!(is_likely_annual_report("", "https://x/y", "2022", "2023"));
        assert!(is_likely_annual_report("", "https://x/y", "2022", "23"));
        assert!(is_likely_annual_report("financial year", "https://x/y.pdf", "", ""));
        assert!(!is_likely_annual_report("financial year", "https://x/y.html", "", ""));
        assert!(!is_likely_annual_report("board meeting outcome", "https://x/y.pdf", "2022", "2024"));
    }

    #[test]
    fn test_year_from_text() {
        assert_eq!(year_from_text("annual report 2023-24").as_deref(), Some("2023-24"));
        assert_eq!(year_from_text("annual report 2023-2024").as_deref(), Some("2023-24"));
        assert_eq!(year_from_text("FY2024 results").as_deref(), Some("2023-24"));
        assert_eq!(year_from_text("for the year ended 31st March, 2024").as_deref(), Some("2023-24"));
        assert_eq!(year_from_text("for the year 2022").as_deref(), Some("2021-22"));
        assert_eq!(year_from_text("no year here"), None);
    }

    #[test]
    fn test_year_from_text_rejects_non_consecutive_ranges() {
        // An ISO date is not a financial year range
        assert_eq!(year_from_text("filed 2024-03-31"), None);
        assert_eq!(year_from_text("2019-2024 and 2021-22").as_deref(), Some("2021-22"));
    }

    #[test]
    fn test_financial_year() {
        assert_eq!(financial_year("2023", "2024", ""), "2023-24");
        assert_eq!(financial_year("2023", "24", ""), "2023-24");
        assert_eq!(financial_year("", "", "annual report 2021-22"), "2021-22");
        assert_eq!(financial_year("2023", "", "nothing"), "2023");
        assert_eq!(financial_year("", "", "nothing"), UNKNOWN);
    }

    #[test]
    fn test_subject() {
        assert_eq!(subject("Annual Report", "x", "2023-24"), "Annual Report");
        assert_eq!(subject("-", "Integrated Report", "2023-24"), "Integrated Report");
        assert_eq!(subject("N/A", "pdf", "2023-24"), "Annual Report 2023-24");
        assert_eq!(subject("", &"a".repeat(150), "2023-24").len(), 100);
    }

    #[test]
    fn test_record_date() {
        assert_eq!(record_date(&["", "2024"]), "2024-03-31");
        assert_eq!(record_date(&["26-JUL-2024 18:01:12", "2024"]), "26-JUL-2024 18:01:12");
        assert_eq!(record_date(&["-", ""]), UNKNOWN);
    }

    #[test]
    fn test_date_shapes() {
        assert!(is_date_like("26-JUL-2024 18:01:12"));
        assert!(is_date_like("26-jul-2024"));
        assert!(is_date_like("31/03/2024"));
        assert!(is_date_like("2024-03-31"));
        assert!(!is_date_like("Exchange Received Time 26-JUL-2024"));
        assert!(!is_date_like("2024"));
        assert_eq!(
            date_fragment("26-JUL-2024 18:01:12\nExchange Received Time 26-JUL-2024 18:00:00", 50).as_deref(),
            Some("26-JUL-2024 18:01:12")
        );
        assert_eq!(scan_date("filed on 01/08/2024 late").as_deref(), Some("01/08/2024"));
    }

    #[test]
    fn test_resolve_url() {
        assert_eq!(
            resolve_url("/corporate/AR_2024.pdf").as_deref(),
            Some("https://www.nseindia.com/corporate/AR_2024.pdf")
        );
        assert_eq!(resolve_url("https://a.b/c.zip").as_deref(), Some("https://a.b/c.zip"));
    }
}
