use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info};

use super::heuristics::{self, is_date_like};
use super::text_of;
use crate::models::{Company, ExtractionMethod, Filing};

static TABLE: Lazy<Selector> = Lazy::new(|| Selector::parse("table").expect("Failed to compile TABLE"));
static ROW: Lazy<Selector> = Lazy::new(|| Selector::parse("tr").expect("Failed to compile ROW"));
static LINK: Lazy<Selector> = Lazy::new(|| Selector::parse("a[href]").expect("Failed to compile LINK"));
static ANCHOR: Lazy<Selector> = Lazy::new(|| Selector::parse("a").expect("Failed to compile ANCHOR"));
static HOVER_FIRST_CELLS: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("div.hover_table tbody tr > td:first-child").expect("Failed to compile HOVER_FIRST_CELLS")
});

/// Column positions recovered from a header row
#[derive(Debug, Default, Clone, PartialEq)]
pub(crate) struct ColumnMap {
    pub attachment: Option<usize>,
    pub from_year: Option<usize>,
    pub to_year: Option<usize>,
    pub submission_type: Option<usize>,
    pub broadcast_date: Option<usize>,
}

impl ColumnMap {
    pub fn from_headers(headers: &[String]) -> Self {
        let mut map = ColumnMap::default();
        for (i, header) in headers.iter().enumerate() {
            let h = header.to_uppercase();
            let slot = if h.contains("ATTACHMENT") || h.contains("DOCUMENT") || h.contains("FILE") {
                &mut map.attachment
            } else if h.contains("FROM") && h.contains("YEAR") {
                &mut map.from_year
            } else if h.contains("TO") && h.contains("YEAR") {
                &mut map.to_year
            } else if h.contains("TYPE") || h.contains("SUBMISSION") || h.contains("CATEGORY") {
                &mut map.submission_type
            } else if h.contains("DATE") && (h.contains("BROADCAST") || h.contains("FILING")) {
                &mut map.broadcast_date
            } else {
                continue;
            };
            slot.get_or_insert(i);
        }
        map
    }
}

/// Rows owned by `table`, skipping rows of tables nested in its cells
pub(crate) fn own_rows<'a>(table: ElementRef<'a>) -> Vec<ElementRef<'a>> {
    table
        .select(&ROW)
        .filter(|row| {
            row.ancestors()
                .filter_map(ElementRef::wrap)
                .find(|el| el.value().name() == "table")
                .map_or(false, |owner| owner.id() == table.id())
        })
        .collect()
}

pub(crate) fn cells<'a>(row: ElementRef<'a>) -> Vec<ElementRef<'a>> {
    row.children()
        .filter_map(ElementRef::wrap)
        .filter(|el| matches!(el.value().name(), "td" | "th"))
        .collect()
}

fn header_texts(row: ElementRef<'_>) -> Vec<String> {
    let cells = cells(row);
    let th: Vec<_> = cells.iter().filter(|c| c.value().name() == "th").collect();
    let chosen: Vec<&ElementRef> = if th.is_empty() { cells.iter().collect() } else { th };
    chosen.iter().map(|c| text_of(**c).to_uppercase()).collect()
}

fn cell_text(cells: &[ElementRef<'_>], idx: Option<usize>) -> String {
    idx.and_then(|i| cells.get(i)).map(|c| text_of(*c)).unwrap_or_default()
}

/// Filing timestamp from the broadcast cell, looking at the visible link,
/// the exchange hover table, then the raw cell text
pub(crate) fn filing_date_from_cell(cell: ElementRef<'_>) -> String {
    if let Some(date) = cell.select(&ANCHOR).map(text_of).find(|t| is_date_like(t)) {
        return date;
    }
    if let Some(date) = cell.select(&HOVER_FIRST_CELLS).map(text_of).find(|t| is_date_like(t)) {
        return date;
    }

    let text = text_of(cell);
    heuristics::date_fragment(&text, 50)
        .or_else(|| heuristics::scan_date(&text))
        .unwrap_or_default()
}

/// Broadcast date without the hover-table noise
pub(crate) fn broadcast_date_from_cell(cell: ElementRef<'_>) -> String {
    if let Some(date) = cell.select(&ANCHOR).map(text_of).find(|t| is_date_like(t)) {
        return date;
    }
    heuristics::date_fragment(&text_of(cell), 25).unwrap_or_default()
}

/// Column index of the first link found in the first two data rows
fn first_link_column(rows: &[ElementRef<'_>]) -> Option<usize> {
    rows.iter().skip(1).take(2).find_map(|row| {
        cells(*row)
            .iter()
            .position(|cell| cell.select(&LINK).next().is_some())
    })
}

pub(crate) fn from_tables(document: &Html, company: &Company) -> Vec<Filing> {
    let mut filings = Vec::new();

    for (table_idx, table) in document.select(&TABLE).enumerate() {
        let rows = own_rows(table);
        if rows.len() < 2 {
            continue;
        }

        let headers = header_texts(rows[0]);
        debug!("Table {} headers for {}: {:?}", table_idx + 1, company.ticker, headers);

        let mut columns = ColumnMap::from_headers(&headers);
        if columns.attachment.is_none() {
            columns.attachment = first_link_column(&rows);
        }

        for row in rows.iter().skip(1) {
            let cells = cells(*row);
            if cells.is_empty() {
                continue;
            }
            filings.extend(filings_from_row(&cells, &columns, company));
        }
    }

    filings
}

fn filings_from_row(cells: &[ElementRef<'_>], columns: &ColumnMap, company: &Company) -> Vec<Filing> {
    let from_year = cell_text(cells, columns.from_year);
    let to_year = cell_text(cells, columns.to_year);
    let submission_type = cell_text(cells, columns.submission_type);

    let broadcast_cell = columns.broadcast_date.and_then(|i| cells.get(i)).copied();
    let (filing_date, broadcast_date) = match broadcast_cell {
        Some(cell) => (filing_date_from_cell(cell), broadcast_date_from_cell(cell)),
        None => (String::new(), String::new()),
    };

    let links: Vec<ElementRef> = match columns.attachment.and_then(|i| cells.get(i)) {
        Some(cell) => cell.select(&LINK).collect(),
        None => cells.iter().flat_map(|c| c.select(&LINK)).collect(),
    };

    let row_text = cells.iter().map(|c| text_of(*c)).collect::<Vec<_>>().join(" ");
    let mut filings = Vec::new();

    for link in links {
        let href = link.value().attr("href").unwrap_or_default();
        let link_text = text_of(link);
        if !heuristics::is_document_link(href, &link_text) {
            continue;
        }
        let url = match heuristics::resolve_url(href) {
            Some(url) => url,
            None => continue,
        };

        let combined =
            format!("{} {} {} {} {}", submission_type, link_text, from_year, to_year, row_text).to_lowercase();
        if !heuristics::is_likely_annual_report(&combined, &url, &from_year, &to_year) {
            continue;
        }

        let year = heuristics::financial_year(&from_year, &to_year, &combined);
        let subject = heuristics::subject(&submission_type, &link_text, &year);
        info!("Found report: {} for {}", subject, year);

        filings.push(Filing {
            ticker: company.ticker.clone(),
            date: heuristics::record_date(&[&filing_date, &broadcast_date, &to_year, &from_year]),
            year,
            url,
            subject,
            filing_date: filing_date.clone(),
            broadcast_date: broadcast_date.clone(),
            from_year: from_year.clone(),
            to_year: to_year.clone(),
            submission_type: submission_type.clone(),
            method: ExtractionMethod::Table,
        });
    }

    filings
}
