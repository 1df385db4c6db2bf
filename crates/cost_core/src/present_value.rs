//! Present-value restatement of historical costs.
//!
//! Annual increment rates compound from the year after the source year up to
//! and including the target year. Rates are normalized exactly once, when the
//! table is built: a table containing any rate above 1.0 is taken to be in
//! percent and every entry is divided by 100.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Yearly increment rates stored as fractions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IncrementTable {
    rates: BTreeMap<i32, f64>,
}

impl IncrementTable {
    /// Build a table from raw `(year, rate)` pairs, normalizing percentages.
    pub fn from_rates<I>(rates: I) -> Self
    where
        I: IntoIterator<Item = (i32, f64)>,
    {
        let mut rates: BTreeMap<i32, f64> = rates.into_iter().collect();
        if rates.values().any(|r| *r > 1.0) {
            for rate in rates.values_mut() {
                *rate /= 100.0;
            }
        }
        Self { rates }
    }

    /// Fractional rate for `year`; missing years contribute nothing.
    pub fn rate(&self, year: i32) -> f64 {
        self.rates.get(&year).copied().unwrap_or(0.0)
    }

    pub fn len(&self) -> usize {
        self.rates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }

    /// Compounded growth factor between two years.
    pub fn factor(&self, from_year: i32, to_year: i32) -> f64 {
        if to_year <= from_year {
            return 1.0;
        }
        ((from_year + 1)..=to_year)
            .map(|year| 1.0 + self.rate(year))
            .product()
    }

    /// Restate `value` from `from_year` money into `to_year` money.
    ///
    /// A target year at or before the source year leaves the value unchanged.
    pub fn present_value(&self, value: f64, from_year: i32, to_year: i32) -> f64 {
        value * self.factor(from_year, to_year)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn table() -> IncrementTable {
        IncrementTable::from_rates([(2021, 0.05), (2022, 0.10), (2024, 0.02)])
    }

    #[test]
    fn compounds_years_after_source_year() {
        let pv = table().present_value(100.0, 2020, 2022);
        assert!((pv - 100.0 * 1.05 * 1.10).abs() < 1e-9);
    }

    #[test]
    fn missing_years_contribute_zero_rate() {
        let pv = table().present_value(100.0, 2022, 2024);
        assert!((pv - 102.0).abs() < 1e-9);
    }

    #[test]
    fn percentages_are_normalized_once() {
        let pct = IncrementTable::from_rates([(2021, 5.0), (2022, 10.0)]);
        assert!((pct.rate(2021) - 0.05).abs() < 1e-12);
        assert!((pct.present_value(100.0, 2020, 2022) - 115.5).abs() < 1e-9);
    }

    #[test]
    fn fractions_are_left_alone() {
        let frac = IncrementTable::from_rates([(2021, 0.5), (2022, 1.0)]);
        assert_eq!(frac.rate(2022), 1.0);
    }

    proptest! {
        #[test]
        fn same_or_earlier_target_is_identity(value in 0.0f64..1e9, year in 1990i32..2040) {
            let t = table();
            prop_assert_eq!(t.present_value(value, year, year), value);
            prop_assert_eq!(t.present_value(value, year, year - 1), value);
        }

        #[test]
        fn non_negative_rates_are_monotonic(
            value in 0.0f64..1e9,
            y0 in 2000i32..2010,
            d1 in 1i32..10,
            d2 in 1i32..10,
            rates in proptest::collection::vec(0.0f64..0.3, 30),
        ) {
            let t = IncrementTable::from_rates(
                rates.iter().enumerate().map(|(i, r)| (2000 + i as i32, *r)),
            );
            let y1 = y0 + d1;
            let y2 = y1 + d2;
            prop_assert!(t.present_value(value, y0, y2) >= t.present_value(value, y0, y1));
        }
    }
}
