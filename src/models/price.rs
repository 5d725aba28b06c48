use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::DataError;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub date: NaiveDate,
    pub price: f64,
}

/// Date-ascending prices for a single instrument. Dates are strictly increasing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PriceSeries {
    points: Vec<PricePoint>,
}

impl PriceSeries {
    pub fn new(points: Vec<PricePoint>) -> Result<Self, DataError> {
        for pair in points.windows(2) {
            if pair[1].date <= pair[0].date {
                return Err(DataError::UnorderedDates {
                    previous: pair[0].date,
                    next: pair[1].date,
                });
            }
        }
        Ok(Self { points })
    }

    /// Consecutive daily points starting at `start`.
    pub fn from_closes(start: NaiveDate, closes: &[f64]) -> Self {
        let points = closes
            .iter()
            .enumerate()
            .map(|(i, &price)| PricePoint {
                date: start + chrono::Duration::days(i as i64),
                price,
            })
            .collect();
        Self { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn first(&self) -> Option<&PricePoint> {
        self.points.first()
    }

    pub fn last(&self) -> Option<&PricePoint> {
        self.points.last()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PricePoint> {
        self.points.iter()
    }

    pub fn as_slice(&self) -> &[PricePoint] {
        &self.points
    }

    pub fn closes(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.price).collect()
    }

    pub fn tail(&self, n: usize) -> PriceSeries {
        let start = self.points.len().saturating_sub(n);
        PriceSeries {
            points: self.points[start..].to_vec(),
        }
    }

    /// Points with date <= `date`.
    pub fn until(&self, date: NaiveDate) -> PriceSeries {
        let end = self.points.partition_point(|p| p.date <= date);
        PriceSeries {
            points: self.points[..end].to_vec(),
        }
    }

    /// Arithmetic returns between consecutive points. A zero base yields 0.
    pub fn returns(&self) -> Vec<f64> {
        self.points
            .windows(2)
            .map(|w| {
                if w[0].price.abs() > f64::EPSILON {
                    (w[1].price - w[0].price) / w[0].price
                } else {
                    0.0
                }
            })
            .collect()
    }
}

impl<'a> IntoIterator for &'a PriceSeries {
    type Item = &'a PricePoint;
    type IntoIter = std::slice::Iter<'a, PricePoint>;
    fn into_iter(self) -> Self::IntoIter {
        self.points.iter()
    }
}

/// Multi-instrument price table. Gap tolerant: a missing observation is
/// simply absent from that instrument's column.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PriceTable {
    columns: BTreeMap<String, BTreeMap<NaiveDate, f64>>,
}

impl PriceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, symbol: &str, date: NaiveDate, price: f64) {
        self.columns
            .entry(symbol.to_string())
            .or_default()
            .insert(date, price);
    }

    pub fn insert_series(&mut self, symbol: &str, series: &PriceSeries) {
        let column = self.columns.entry(symbol.to_string()).or_default();
        for p in series {
            column.insert(p.date, p.price);
        }
    }

    pub fn instruments(&self) -> Vec<String> {
        self.columns.keys().cloned().collect()
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.columns.contains_key(symbol)
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Exact observation on `date`.
    pub fn price_at(&self, symbol: &str, date: NaiveDate) -> Option<f64> {
        self.columns.get(symbol)?.get(&date).copied()
    }

    /// Latest observation on or before `date`.
    pub fn mark_at(&self, symbol: &str, date: NaiveDate) -> Option<f64> {
        self.columns
            .get(symbol)?
            .range(..=date)
            .next_back()
            .map(|(_, &p)| p)
    }

    pub fn series(&self, symbol: &str) -> Option<PriceSeries> {
        let column = self.columns.get(symbol)?;
        let points = column
            .iter()
            .map(|(&date, &price)| PricePoint { date, price })
            .collect();
        // BTreeMap keys are unique and ordered
        Some(PriceSeries { points })
    }

    pub fn earliest_date(&self) -> Option<NaiveDate> {
        self.columns
            .values()
            .filter_map(|c| c.keys().next().copied())
            .min()
    }

    pub fn latest_date(&self) -> Option<NaiveDate> {
        self.columns
            .values()
            .filter_map(|c| c.keys().next_back().copied())
            .max()
    }

    /// Load a wide CSV: `date,SYM1,SYM2,...`. Empty cells are absent
    /// observations. Row dates must be strictly increasing.
    pub fn from_csv_reader<R: std::io::Read>(reader: R) -> Result<Self, DataError> {
        let mut rdr = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
        let headers = rdr.headers()?.clone();
        if headers.len() < 2 {
            return Err(DataError::NoColumns);
        }

        let mut table = PriceTable::new();
        let mut previous: Option<NaiveDate> = None;
        for (row_idx, record) in rdr.records().enumerate() {
            let record = record?;
            let raw_date = record.get(0).unwrap_or("").trim();
            let date = NaiveDate::parse_from_str(raw_date, "%Y-%m-%d").map_err(|e| {
                DataError::MalformedRow {
                    row: row_idx + 1,
                    reason: format!("bad date '{}': {}", raw_date, e),
                }
            })?;
            if let Some(prev) = previous {
                if date <= prev {
                    return Err(DataError::UnorderedDates { previous: prev, next: date });
                }
            }
            previous = Some(date);

            for (col, symbol) in headers.iter().enumerate().skip(1) {
                let cell = record.get(col).unwrap_or("").trim();
                if cell.is_empty() {
                    continue;
                }
                let price: f64 = cell.parse().map_err(|_| DataError::MalformedRow {
                    row: row_idx + 1,
                    reason: format!("bad price '{}' for {}", cell, symbol),
                })?;
                table.insert(symbol.trim(), date, price);
            }
        }
        Ok(table)
    }

    pub fn from_csv_path(path: &std::path::Path) -> Result<Self, DataError> {
        let file = std::fs::File::open(path).map_err(csv::Error::from)?;
        Self::from_csv_reader(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn rejects_duplicate_dates() {
        let points = vec![
            PricePoint { date: d(2024, 1, 2), price: 10.0 },
            PricePoint { date: d(2024, 1, 2), price: 11.0 },
        ];
        assert!(matches!(
            PriceSeries::new(points),
            Err(DataError::UnorderedDates { .. })
        ));
    }

    #[test]
    fn returns_guard_zero_base() {
        let s = PriceSeries::from_closes(d(2024, 1, 1), &[0.0, 5.0, 10.0]);
        let r = s.returns();
        assert_eq!(r.len(), 2);
        assert_eq!(r[0], 0.0);
        assert!((r[1] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn mark_carries_last_observation() {
        let mut t = PriceTable::new();
        t.insert("AAA", d(2024, 1, 5), 10.0);
        t.insert("AAA", d(2024, 1, 8), 12.0);
        assert_eq!(t.price_at("AAA", d(2024, 1, 6)), None);
        assert_eq!(t.mark_at("AAA", d(2024, 1, 6)), Some(10.0));
        assert_eq!(t.mark_at("AAA", d(2024, 1, 4)), None);
        assert_eq!(t.mark_at("AAA", d(2024, 1, 9)), Some(12.0));
    }

    #[test]
    fn csv_with_gaps() {
        let csv = "date,AAA,BBB\n2024-01-01,10,20\n2024-01-02,,21\n2024-01-03,11,\n";
        let t = PriceTable::from_csv_reader(csv.as_bytes()).unwrap();
        assert_eq!(t.instruments(), vec!["AAA".to_string(), "BBB".to_string()]);
        assert_eq!(t.series("AAA").unwrap().len(), 2);
        assert_eq!(t.series("BBB").unwrap().len(), 2);
        assert_eq!(t.latest_date(), Some(d(2024, 1, 3)));
    }

    #[test]
    fn csv_rejects_unordered_or_repeated_dates() {
        let backwards = "date,AAA\n2024-01-03,12\n2024-01-01,10\n";
        assert!(matches!(
            PriceTable::from_csv_reader(backwards.as_bytes()),
            Err(DataError::UnorderedDates { previous, next })
                if previous == d(2024, 1, 3) && next == d(2024, 1, 1)
        ));

        let repeated = "date,AAA\n2024-01-01,10\n2024-01-01,11\n";
        assert!(matches!(
            PriceTable::from_csv_reader(repeated.as_bytes()),
            Err(DataError::UnorderedDates { .. })
        ));
    }

    #[test]
    fn csv_bad_price_is_error() {
        let csv = "date,AAA\n2024-01-01,abc\n";
        assert!(PriceTable::from_csv_reader(csv.as_bytes()).is_err());
    }
}
