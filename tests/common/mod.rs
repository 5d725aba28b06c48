#![allow(dead_code)]

use chrono::{Duration, NaiveDate};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use quant_invest_algo::models::{PriceSeries, PriceTable, Sector};

pub const BENCHMARK: &str = "^BVSP";

pub fn day(offset: i64) -> NaiveDate {
    NaiveDate::from_ymd_opt(2023, 1, 2).unwrap() + Duration::days(offset)
}

/// Steady 0.3% daily growth.
pub fn rising_closes(n: usize) -> Vec<f64> {
    (0..n).map(|i| 100.0 * 1.003f64.powi(i as i32)).collect()
}

pub fn flat_closes(n: usize) -> Vec<f64> {
    vec![100.0; n]
}

pub fn series(closes: &[f64]) -> PriceSeries {
    PriceSeries::from_closes(day(0), closes)
}

/// Rising benchmark plus one column per sector, quoted daily for `days` days.
/// Technology alternates +/-15% so it breaches every volatility ceiling.
pub fn sector_table(days: usize) -> PriceTable {
    let mut table = PriceTable::new();
    table.insert_series(BENCHMARK, &series(&rising_closes(days)));
    for sector in Sector::ALL {
        let closes: Vec<f64> = (0..days)
            .map(|i| match sector {
                Sector::Technology => {
                    if i % 2 == 0 {
                        100.0
                    } else {
                        115.0
                    }
                }
                _ => 50.0 + (i as f64) * 0.05,
            })
            .collect();
        table.insert_series(sector.as_str(), &series(&closes));
    }
    table
}

/// Writes `table` as a wide CSV under `dir` and returns its path.
pub fn write_prices_csv(dir: &Path, table: &PriceTable) -> PathBuf {
    let symbols = table.instruments();
    let mut out = String::from("date");
    for s in &symbols {
        write!(out, ",{}", s).unwrap();
    }
    out.push('\n');

    let (start, end) = (table.earliest_date().unwrap(), table.latest_date().unwrap());
    let mut date = start;
    while date <= end {
        write!(out, "{}", date.format("%Y-%m-%d")).unwrap();
        for s in &symbols {
            match table.price_at(s, date) {
                Some(p) => write!(out, ",{}", p).unwrap(),
                None => out.push(','),
            }
        }
        out.push('\n');
        date += Duration::days(1);
    }

    let path = dir.join("prices.csv");
    std::fs::write(&path, out).unwrap();
    path
}
