use chrono::{Duration, NaiveDate};

use crate::backtesting::Allocation;
use crate::models::{PriceSeries, PriceTable};

/// `2024-01-01` plus `offset` days.
pub fn day(offset: i64) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + Duration::days(offset)
}

/// 100, 101, 102, ...
pub fn rising_closes(n: usize) -> Vec<f64> {
    (0..n).map(|i| 100.0 + i as f64).collect()
}

/// 400, 399, 398, ...
pub fn falling_closes(n: usize) -> Vec<f64> {
    (0..n).map(|i| 400.0 - i as f64).collect()
}

pub fn flat_closes(n: usize) -> Vec<f64> {
    vec![100.0; n]
}

pub fn equal_allocation(instruments: &[String]) -> Allocation {
    let w = 1.0 / instruments.len() as f64;
    instruments.iter().map(|s| (s.clone(), w)).collect()
}

/// Three instruments (`AAA` trending up, `BBB` oscillating, `CCC` drifting
/// down) quoted every day from `day(0)` to `day(days)`.
pub fn three_asset_table(days: i64) -> PriceTable {
    let mut table = PriceTable::new();
    for i in 0..=days {
        let x = i as f64;
        let swing = if i % 2 == 0 { 1.5 } else { -1.5 };
        table.insert("AAA", day(i), 100.0 + x * 0.8);
        table.insert("BBB", day(i), 50.0 + swing);
        table.insert("CCC", day(i), 80.0 - x * 0.3);
    }
    table
}

pub fn series(closes: &[f64]) -> PriceSeries {
    PriceSeries::from_closes(day(0), closes)
}
