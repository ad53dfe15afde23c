//! Checks on a rendered filings page before extraction

use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use tracing::{debug, warn};

use crate::extract::heuristics::is_document_link;
use crate::extract::table::{cells, own_rows};

static TABLE: Lazy<Selector> = Lazy::new(|| Selector::parse("table").expect("Failed to compile TABLE"));
static ROW: Lazy<Selector> = Lazy::new(|| Selector::parse("tr").expect("Failed to compile ROW"));
static LINK: Lazy<Selector> = Lazy::new(|| Selector::parse("a[href]").expect("Failed to compile LINK"));
static FORM: Lazy<Selector> = Lazy::new(|| Selector::parse("form").expect("Failed to compile FORM"));
static SCRIPT: Lazy<Selector> = Lazy::new(|| Selector::parse("script").expect("Failed to compile SCRIPT"));

const PROBE_LIMIT: usize = 3;
const PROBE_LINK_WINDOW: usize = 20;

/// Element counts and keyword hits of a rendered page
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageCheck {
    pub tables: usize,
    pub rows: usize,
    pub links: usize,
    pub pdf_links: usize,
    pub has_annual: bool,
    pub has_report: bool,
    pub has_attachment: bool,
    pub has_filing: bool,
}

impl PageCheck {
    pub fn assess(html: &str) -> Self {
        let document = Html::parse_document(html);
        let text = document.root_element().text().collect::<String>().to_lowercase();

        let hrefs: Vec<String> = document
            .select(&LINK)
            .filter_map(|a| a.value().attr("href"))
            .map(str::to_lowercase)
            .collect();

        Self {
            tables: document.select(&TABLE).count(),
            rows: document.select(&ROW).count(),
            links: hrefs.len(),
            pdf_links: hrefs.iter().filter(|h| h.contains(".pdf")).count(),
            has_annual: text.contains("annual"),
            has_report: text.contains("report"),
            has_attachment: text.contains("attachment"),
            has_filing: text.contains("filing"),
        }
    }

    fn has_keywords(&self) -> bool {
        self.has_annual || self.has_report || self.has_attachment || self.has_filing
    }

    /// Whether the page looks like a populated filings listing
    pub fn is_valid(&self) -> bool {
        let meaningful_tables = self.tables > 0 && self.rows > 3;
        let strong = self.has_attachment && (self.has_filing || self.has_annual);

        (meaningful_tables && self.has_keywords())
            || (self.pdf_links > 0 && self.has_keywords())
            || strong
            || self.tables > 2
    }
}

/// Validate a page and log why
pub fn validate_page(html: &str, ticker: &str) -> bool {
    let check = PageCheck::assess(html);
    let valid = check.is_valid();
    debug!(
        "Content validation for {}: tables={}, rows={}, links={}, pdf_links={}, annual={}, report={}, attachment={}, filing={}, valid={}",
        ticker,
        check.tables,
        check.rows,
        check.links,
        check.pdf_links,
        check.has_annual,
        check.has_report,
        check.has_attachment,
        check.has_filing,
        valid
    );
    valid
}

/// Count (up to three) document links reachable by extraction: the first
/// data rows of each table, else the first anchors of the page
pub fn quick_probe(html: &str) -> usize {
    let document = Html::parse_document(html);
    let mut hits = 0;

    for table in document.select(&TABLE) {
        let rows = own_rows(table);
        if rows.len() < 2 {
            continue;
        }
        for row in rows.iter().skip(1).take(2) {
            for link in cells(*row).into_iter().flat_map(|cell| cell.select(&LINK)) {
                let href = link.value().attr("href").unwrap_or_default();
                if is_document_link(href, &link.text().collect::<String>()) {
                    hits += 1;
                    if hits >= PROBE_LIMIT {
                        return hits;
                    }
                }
            }
        }
    }

    if hits == 0 {
        for link in document.select(&LINK).take(PROBE_LINK_WINDOW) {
            let href = link.value().attr("href").unwrap_or_default();
            let text = link.text().collect::<String>().trim().to_lowercase();
            let mentions_report = ["annual", "report", "attachment"].iter().any(|w| text.contains(w));
            if is_document_link(href, &text) && mentions_report {
                hits += 1;
                if hits >= PROBE_LIMIT {
                    break;
                }
            }
        }
    }

    hits
}

/// Debug-level overview of the tables on a page
pub fn log_structure(html: &str, ticker: &str) {
    let document = Html::parse_document(html);
    let text = document.root_element().text().collect::<String>().to_lowercase();
    let exchange_markers = ["nsearchives", "annual_reports", "corporate filings"]
        .iter()
        .any(|m| text.contains(m));

    debug!(
        "Page structure for {}: tables={}, rows={}, links={}, exchange markers={}",
        ticker,
        document.select(&TABLE).count(),
        document.select(&ROW).count(),
        document.select(&LINK).count(),
        exchange_markers
    );

    for (i, table) in document.select(&TABLE).take(3).enumerate() {
        if let Some(header) = own_rows(table).first() {
            let headers: Vec<String> = cells(*header)
                .into_iter()
                .take(5)
                .map(|c| c.text().collect::<String>().trim().to_string())
                .collect();
            debug!("  Table {} headers: {:?}", i + 1, headers);
            debug!("  Table {} links: {}", i + 1, table.select(&LINK).count());
        }
    }
}

/// Deeper look at a page that yielded no reports
pub fn log_missing_reports(html: &str, ticker: &str) {
    let document = Html::parse_document(html);

    let candidates: Vec<(String, String)> = document
        .select(&LINK)
        .filter_map(|a| {
            let href = a.value().attr("href")?.to_lowercase();
            [".pdf", ".zip", "download", "attachment"]
                .iter()
                .any(|m| href.contains(m))
                .then(|| (a.text().collect::<String>().trim().to_string(), href))
        })
        .collect();

    debug!("Found {} potential document links for {}", candidates.len(), ticker);
    for (i, (text, href)) in candidates.iter().take(5).enumerate() {
        debug!("  Doc link {}: {} -> {}", i + 1, text, href);
    }

    debug!(
        "Page has {} forms and {} scripts",
        document.select(&FORM).count(),
        document.select(&SCRIPT).count()
    );

    let source = html.to_lowercase();
    if ["ajax", "json", "api", "xhr", "fetch"].iter().any(|m| source.contains(m)) {
        debug!("Page appears to have dynamic content - may need additional wait time");
    }

    let text = document.root_element().text().collect::<String>().to_lowercase();
    let errors: Vec<&str> = ["no data", "not found", "error", "unavailable"]
        .into_iter()
        .filter(|m| text.contains(m))
        .collect();
    if !errors.is_empty() {
        warn!("Possible error indicators found for {}: {:?}", ticker, errors);
    }
}
