//! Report extraction from a rendered filings page
//!
//! The structured pass reads the corporate filings tables column by column.
//! When it yields nothing, a looser pass inspects every anchor on the page.

pub mod heuristics;
mod links;
pub(crate) mod table;

use std::collections::HashSet;

use scraper::{ElementRef, Html};
use tracing::{info, warn};

use crate::models::{Company, Filing};

/// Trimmed text content of an element
pub(crate) fn text_of(element: ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

/// Parse `html` and recover every report entry it advertises
pub fn extract_filings(html: &str, company: &Company) -> Vec<Filing> {
    let document = Html::parse_document(html);
    info!("Extracting reports for {}", company.ticker);

    let mut filings = table::from_tables(&document, company);
    if filings.is_empty() {
        info!("No table reports found for {}, trying link extraction...", company.ticker);
        filings = links::from_links(&document, company);
    }

    info!("Found {} potential reports for {}", filings.len(), company.ticker);
    filings
}

/// Filings split into the ones worth downloading and the ones dropped
#[derive(Debug, Default)]
pub struct Selection {
    pub accepted: Vec<Filing>,
    pub skipped: usize,
}

/// Keep filings with a known year and a fetchable URL, one per year. The
/// first entry advertised for a year wins.
pub fn select_downloadable(filings: Vec<Filing>) -> Selection {
    let mut seen_years = HashSet::new();
    let mut selection = Selection::default();

    for filing in filings {
        if !filing.has_known_year() {
            warn!("Skipping report with unknown year: {}", filing.url);
            selection.skipped += 1;
        } else if !filing.has_usable_url() {
            warn!("Skipping report {} with unusable URL: {}", filing.year, filing.url);
            selection.skipped += 1;
        } else if !seen_years.insert(filing.year.clone()) {
            info!("Report for {} already selected, skipping {}", filing.year, filing.url);
            selection.skipped += 1;
        } else {
            selection.accepted.push(filing);
        }
    }

    selection
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ExtractionMethod;

    const FILINGS_PAGE: &str = r##"
<html><body>
<table id="CFannualreportEquityTable">
  <thead>
    <tr><th>COMPANY NAME</th><th>FROM YEAR</th><th>TO YEAR</th><th>SUBMISSION TYPE</th><th>ATTACHMENT</th><th>BROADCAST DATE/TIME</th></tr>
  </thead>
  <tbody>
    <tr>
      <td>Tata Consultancy Services Limited</td><td>2023</td><td>2024</td><td>-</td>
      <td><a href="https://nsearchives.nseindia.com/annual_reports/AR_24029_TCS_2023_2024_A_27052024233502.zip">AR_TCS_2023_2024.zip</a></td>
      <td><a href="#">27-MAY-2024 23:35:02</a>
        <div class="hover_table"><table><tbody>
          <tr><td>27-MAY-2024 23:35:00</td><td>Exchange Received Time</td></tr>
        </tbody></table></div>
      </td>
    </tr>
    <tr>
      <td>Tata Consultancy Services Limited</td><td>2022</td><td>2023</td><td>Annual Report</td>
      <td><a href="/annual_reports/AR_TCS_2022_2023.pdf">AR_TCS_2022_2023.pdf</a></td>
      <td>08-JUN-2023 19:20:11</td>
    </tr>
    <tr>
      <td>Tata Consultancy Services Limited</td><td>2021</td><td>2022</td><td>-</td>
      <td>-</td>
      <td>01-JUN-2022 10:00:00</td>
    </tr>
  </tbody>
</table>
</body></html>"##;

    const LINKS_PAGE: &str = r#"
<html><body>
<div class="reports">
  <p>Annual Report for the year 2022-23 <a href="/docs/ar-2023.pdf">Download</a></p>
  <p><a href="/rss/annual.xml">Annual report RSS</a></p>
  <p><a href="/about">About the exchange</a></p>
</div>
</body></html>"#;

    fn tcs() -> Company {
        Company::named("TCS", "Tata Consultancy Services Limited")
    }

    #[test]
    fn test_table_extraction() {
        let filings = extract_filings(FILINGS_PAGE, &tcs());
        assert_eq!(filings.len(), 2);

        let latest = &filings[0];
        assert_eq!(latest.year, "2023-24");
        assert_eq!(latest.method, ExtractionMethod::Table);
        assert_eq!(latest.filing_date, "27-MAY-2024 23:35:02");
        assert_eq!(latest.date, "27-MAY-2024 23:35:02");
        assert_eq!(latest.subject, "AR_TCS_2023_2024.zip");
        assert!(latest.url.ends_with(".zip"));

        let previous = &filings[1];
        assert_eq!(previous.year, "2022-23");
        assert_eq!(previous.subject, "Annual Report");
        assert_eq!(previous.url, "https://www.nseindia.com/annual_reports/AR_TCS_2022_2023.pdf");
        assert_eq!(previous.filing_date, "08-JUN-2023 19:20:11");
    }

    #[test]
    fn test_link_fallback() {
        let filings = extract_filings(LINKS_PAGE, &tcs());
        assert_eq!(filings.len(), 1);
        assert_eq!(filings[0].year, "2022-23");
        assert_eq!(filings[0].subject, "Download");
        assert_eq!(filings[0].method, ExtractionMethod::Link);
        assert_eq!(filings[0].url, "https://www.nseindia.com/docs/ar-2023.pdf");
    }

    #[test]
    fn test_empty_page_yields_nothing() {
        assert!(extract_filings("<html><body><p>No records</p></body></html>", &tcs()).is_empty());
    }

    #[test]
    fn test_select_downloadable_first_year_wins() {
        let mut filings = extract_filings(FILINGS_PAGE, &tcs());
        let mut duplicate = filings[0].clone();
        duplicate.url = "https://example.com/other.pdf".to_string();
        filings.push(duplicate);

        let mut unknown = filings[1].clone();
        unknown.year = "unknown".to_string();
        filings.push(unknown);

        let selection = select_downloadable(filings);
        assert_eq!(selection.accepted.len(), 2);
        assert_eq!(selection.skipped, 2);
        assert!(selection.accepted[0].url.contains("nsearchives"));
    }
}
