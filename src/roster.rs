//! Company roster: the published equity list, parsed into `Company` records

use std::collections::HashSet;
use std::path::Path;

use serde::Deserialize;
use tracing::{debug, error, info, warn};

use crate::config::NseSite;
use crate::errors::Result;
use crate::http::ArtifactFetcher;
use crate::models::Company;

/// One row of `EQUITY_L.csv`. The published headers carry stray spaces,
/// so the reader trims them before these names are matched.
#[derive(Debug, Deserialize)]
struct RosterRow {
    #[serde(rename = "SYMBOL", default)]
    symbol: String,
    #[serde(rename = "NAME OF COMPANY", default)]
    name: String,
    #[serde(rename = "SERIES", default)]
    series: String,
    #[serde(rename = "DATE OF LISTING", default)]
    date_of_listing: String,
    #[serde(rename = "PAID UP VALUE", default)]
    paid_up_value: String,
    #[serde(rename = "MARKET LOT", default)]
    market_lot: String,
    #[serde(rename = "ISIN NUMBER", default)]
    isin_number: String,
    #[serde(rename = "FACE VALUE", default)]
    face_value: String,
}

impl From<RosterRow> for Company {
    fn from(row: RosterRow) -> Self {
        Company {
            ticker: row.symbol,
            company_name: row.name,
            isin_number: row.isin_number,
            date_of_listing: row.date_of_listing,
            face_value: row.face_value,
            series: row.series,
            paid_up_value: row.paid_up_value,
            market_lot: row.market_lot,
        }
    }
}

/// Parse roster CSV bytes. Rows missing a ticker or name are dropped and
/// repeated tickers keep their first row.
pub fn parse_roster(data: &[u8]) -> Result<Vec<Company>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(data);

    debug!("CSV columns found: {:?}", reader.headers()?);

    let mut seen = HashSet::new();
    let mut companies = Vec::new();

    for result in reader.deserialize::<RosterRow>() {
        let row = match result {
            Ok(row) => row,
            Err(e) => {
                warn!("Skipping unreadable roster row: {}", e);
                continue;
            }
        };

        if row.symbol.is_empty() || row.name.is_empty() {
            continue;
        }
        if !seen.insert(row.symbol.clone()) {
            debug!("Duplicate ticker {} in roster, keeping first row", row.symbol);
            continue;
        }
        companies.push(Company::from(row));
    }

    let with_isin = companies.iter().filter(|c| !c.isin_number.is_empty()).count();
    let with_listing = companies.iter().filter(|c| !c.date_of_listing.is_empty()).count();
    info!("Companies with ISIN: {}/{}", with_isin, companies.len());
    info!("Companies with listing date: {}/{}", with_listing, companies.len());

    Ok(companies)
}

/// Well-known companies used when the published roster is unreachable
pub fn fallback_roster() -> Vec<Company> {
    [
        ("TCS", "Tata Consultancy Services Limited"),
        ("RELIANCE", "Reliance Industries Limited"),
        ("20MICRONS", "20 Microns Limited"),
        ("360ONE", "360 ONE WAM Limited"),
        ("3IINFOLTD", "3i Infotech Limited"),
        ("3MINDIA", "3M India Limited"),
        ("AARTIIND", "Aarti Industries Limited"),
        ("AARTIDRUGS", "Aarti Drugs Limited"),
    ]
    .iter()
    .map(|(ticker, name)| Company::named(ticker, name))
    .collect()
}

/// Resolve the company universe from a local file or the published roster,
/// falling back to a built-in list when neither yields any company.
pub async fn load_companies<F: ArtifactFetcher>(fetcher: &F, local: Option<&Path>) -> Vec<Company> {
    let loaded = match local {
        Some(path) => {
            info!("Reading roster from {}", path.display());
            match tokio::fs::read(path).await {
                Ok(data) => parse_roster(&data),
                Err(e) => Err(e.into()),
            }
        }
        None => {
            info!("Downloading NSE securities CSV...");
            match fetcher.fetch(NseSite::SECURITIES_CSV_URL).await {
                Ok(payload) => parse_roster(&payload.bytes),
                Err(e) => Err(e),
            }
        }
    };

    match loaded {
        Ok(companies) if !companies.is_empty() => {
            info!("Successfully extracted {} companies from roster", companies.len());
            companies
        }
        Ok(_) => {
            warn!("Roster contained no companies, falling back to predefined company list");
            fallback_roster()
        }
        Err(e) => {
            error!("Failed to extract companies from roster: {}", e);
            info!("Falling back to predefined company list");
            fallback_roster()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::FetchedPayload;
    use async_trait::async_trait;

    const SAMPLE: &str = "SYMBOL,NAME OF COMPANY, SERIES, DATE OF LISTING, PAID UP VALUE, MARKET LOT, ISIN NUMBER, FACE VALUE\n\
20MICRONS,20 Microns Limited,EQ,06-OCT-2008,5,1,INE144J01027,5\n\
TCS,Tata Consultancy Services Limited,EQ,25-AUG-2004,1,1,INE467B01029,1\n\
,Nameless Limited,EQ,01-JAN-2000,1,1,INE000000000,1\n\
TCS,Duplicate Row Limited,EQ,25-AUG-2004,1,1,INE467B01029,1\n";

    struct FailingFetcher;

    #[async_trait]
    impl ArtifactFetcher for FailingFetcher {
        async fn fetch(&self, url: &str) -> Result<FetchedPayload> {
            Err(crate::errors::ScraperError::HttpStatus { status: 503, url: url.to_string() })
        }
    }

    #[test]
    fn test_parse_roster_trims_headers() {
        let companies = parse_roster(SAMPLE.as_bytes()).unwrap();
        assert_eq!(companies.len(), 2);

        let micron = &companies[0];
        assert_eq!(micron.ticker, "20MICRONS");
        assert_eq!(micron.isin_number, "INE144J01027");
        assert_eq!(micron.date_of_listing, "06-OCT-2008");
        assert_eq!(micron.series, "EQ");
        assert_eq!(micron.face_value, "5");
        assert_eq!(micron.market_lot, "1");
    }

    #[test]
    fn test_parse_roster_keeps_first_duplicate() {
        let companies = parse_roster(SAMPLE.as_bytes()).unwrap();
        let tcs: Vec<_> = companies.iter().filter(|c| c.ticker == "TCS").collect();
        assert_eq!(tcs.len(), 1);
        assert_eq!(tcs[0].company_name, "Tata Consultancy Services Limited");
    }

    #[test]
    fn test_parse_roster_tolerates_missing_columns() {
        let companies = parse_roster(b"SYMBOL,NAME OF COMPANY\nINFY,Infosys Limited\n").unwrap();
        assert_eq!(companies, vec![Company::named("INFY", "Infosys Limited")]);
    }

    #[tokio::test]
    async fn test_load_companies_falls_back() {
        let companies = load_companies(&FailingFetcher, None).await;
        assert_eq!(companies, fallback_roster());
    }

    #[tokio::test]
    async fn test_load_companies_from_local_file() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("EQUITY_L.csv");
        std::fs::write(&path, SAMPLE).unwrap();

        let companies = load_companies(&FailingFetcher, Some(&path)).await;
        assert_eq!(companies.len(), 2);
        assert_eq!(companies[1].ticker, "TCS");
    }

    #[tokio::test]
    async fn test_missing_local_file_falls_back() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("missing.csv");

        let companies = load_companies(&FailingFetcher, Some(&path)).await;
        assert_eq!(companies, fallback_roster());
    }
}
