use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, TimeDelta, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tracing::debug;

use super::MacroData;
use crate::models::macro_data::{INFLATION, POLICY_RATE};
use crate::models::MacroSnapshot;

/// `{}` is replaced with the SGS series code.
pub const DEFAULT_BASE_URL: &str = "http://api.bcb.gov.br/dados/serie/bcdata.sgs.{}/dados?formato=json";

pub const SELIC: u32 = 432;
pub const IPCA: u32 = 433;

/// Observations requested per call, ending today.
pub const DEFAULT_WINDOW_DAYS: i64 = 365;
const SGS_DATE_FORMAT: &str = "%d/%m/%Y";

const MIN_REQUEST_INTERVAL: Duration = Duration::from_millis(250);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct RawObservation {
    data: String,
    valor: String,
}

/// Central-bank time-series (SGS) client for policy rate and inflation.
pub struct BcbClient {
    client: Client,
    base_url: String,
    window: TimeDelta,
    last_request: Option<Instant>,
}

impl BcbClient {
    pub fn new(base_url: &str) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            base_url: base_url.to_string(),
            window: TimeDelta::days(DEFAULT_WINDOW_DAYS),
            last_request: None,
        }
    }

    pub fn with_window_days(mut self, days: i64) -> Self {
        self.window = TimeDelta::days(days.max(1));
        self
    }

    async fn rate_limit(&mut self) {
        if let Some(last) = self.last_request {
            let elapsed = last.elapsed();
            if elapsed < MIN_REQUEST_INTERVAL {
                tokio::time::sleep(MIN_REQUEST_INTERVAL - elapsed).await;
            }
        }
        self.last_request = Some(Instant::now());
    }

    fn url_for(&self, code: u32) -> String {
        self.base_url.replace("{}", &code.to_string())
    }

    /// `dataInicial`/`dataFinal` query for the inclusive range.
    fn request(&self, code: u32, start: NaiveDate, end: NaiveDate) -> reqwest::Result<reqwest::Request> {
        self.client
            .get(self.url_for(code))
            .query(&[
                ("dataInicial", start.format(SGS_DATE_FORMAT).to_string()),
                ("dataFinal", end.format(SGS_DATE_FORMAT).to_string()),
            ])
            .build()
    }

    /// The configured window of one series ending today, oldest first.
    pub async fn fetch_series(&mut self, code: u32) -> Result<Vec<(NaiveDate, f64)>> {
        let end = Utc::now().date_naive();
        self.fetch_range(code, end - self.window, end).await
    }

    pub async fn fetch_range(&mut self, code: u32, start: NaiveDate, end: NaiveDate) -> Result<Vec<(NaiveDate, f64)>> {
        self.rate_limit().await;
        let request = self
            .request(code, start, end)
            .with_context(|| format!("Failed to build request for SGS series {}", code))?;
        debug!("Fetching SGS series {} from {}", code, request.url());

        let resp = self
            .client
            .execute(request)
            .await
            .with_context(|| format!("Failed to fetch SGS series {}", code))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("BCB API error {}: {}", status, body);
        }

        let body = resp.text().await.context("Failed to read SGS response")?;
        parse_series(&body).with_context(|| format!("Failed to parse SGS series {}", code))
    }

    async fn latest(&mut self, code: u32) -> Result<(NaiveDate, f64)> {
        self.fetch_series(code)
            .await?
            .last()
            .copied()
            .with_context(|| format!("SGS series {} is empty", code))
    }
}

#[async_trait]
impl MacroData for BcbClient {
    async fn fetch_snapshot(&mut self) -> Result<MacroSnapshot> {
        let (selic_date, selic) = self.latest(SELIC).await?;
        let (ipca_date, ipca) = self.latest(IPCA).await?;

        let mut snap = MacroSnapshot::new(selic_date.max(ipca_date));
        snap.set(POLICY_RATE, selic);
        snap.set(INFLATION, ipca);
        Ok(snap)
    }
}

/// Parses `[{"data": "dd/mm/yyyy", "valor": "x"}, ...]`, sorted by date.
pub fn parse_series(body: &str) -> Result<Vec<(NaiveDate, f64)>> {
    let raw: Vec<RawObservation> = serde_json::from_str(body)?;
    let mut out = raw
        .into_iter()
        .map(|r| {
            let date = NaiveDate::parse_from_str(&r.data, SGS_DATE_FORMAT)
                .with_context(|| format!("bad date {:?}", r.data))?;
            let value = r
                .valor
                .trim()
                .parse::<f64>()
                .with_context(|| format!("bad value {:?}", r.valor))?;
            Ok((date, value))
        })
        .collect::<Result<Vec<_>>>()?;
    out.sort_by_key(|(d, _)| *d);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sgs_payload() {
        let body = r#"[
            {"data": "02/01/2024", "valor": "11.75"},
            {"data": "01/12/2023", "valor": "12.25"}
        ]"#;
        let series = parse_series(body).unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].0, NaiveDate::from_ymd_opt(2023, 12, 1).unwrap());
        assert_eq!(series[1].1, 11.75);
    }

    #[test]
    fn rejects_malformed_payload() {
        assert!(parse_series(r#"[{"data": "2024-01-02", "valor": "1"}]"#).is_err());
        assert!(parse_series(r#"[{"data": "02/01/2024", "valor": "n/a"}]"#).is_err());
        assert!(parse_series("not json").is_err());
    }

    #[test]
    fn url_template() {
        let client = BcbClient::new(DEFAULT_BASE_URL);
        assert_eq!(
            client.url_for(SELIC),
            "http://api.bcb.gov.br/dados/serie/bcdata.sgs.432/dados?formato=json"
        );
    }

    #[test]
    fn request_carries_date_window() {
        let client = BcbClient::new(DEFAULT_BASE_URL).with_window_days(30);
        let start = NaiveDate::from_ymd_opt(2024, 1, 5).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 2, 4).unwrap();
        let req = client.request(IPCA, start, end).unwrap();

        let url = req.url();
        assert_eq!(url.path(), "/dados/serie/bcdata.sgs.433/dados");
        let pairs: Vec<(String, String)> = url.query_pairs().map(|(k, v)| (k.into_owned(), v.into_owned())).collect();
        assert!(pairs.contains(&("formato".to_string(), "json".to_string())));
        assert!(pairs.contains(&("dataInicial".to_string(), "05/01/2024".to_string())));
        assert!(pairs.contains(&("dataFinal".to_string(), "04/02/2024".to_string())));
        assert_eq!(client.window, TimeDelta::days(30));
    }
}
