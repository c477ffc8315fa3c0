use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::de::{self, Deserializer};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::UnderwritingError;
use crate::types::Rate;
use crate::UnderwritingResult;

/// Ceiling for any compounding index. Rates that push an index past this
/// are reported as an overflow instead of wrapping the Decimal range.
pub const MAX_INDEX_VALUE: Decimal = dec!(1_000_000_000_000);

/// Longest projection the engine will build, in operating years.
pub const MAX_PROJECTION_YEARS: u32 = 100;

// ---------------------------------------------------------------------------
// YearKey
// ---------------------------------------------------------------------------

/// Ordinal year tag. Year 0 is the pre-operating / acquisition year.
///
/// Ordering is numeric (`y10` sorts after `y9`). The `"y{N}"` string form only
/// exists at the serde boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct YearKey(pub u32);

impl YearKey {
    pub const ACQUISITION: YearKey = YearKey(0);

    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn is_pre_operating(self) -> bool {
        self.0 == 0
    }

    /// `y0..=y{last}` in order.
    pub fn range_through(last: u32) -> Vec<YearKey> {
        (0..=last).map(YearKey).collect()
    }
}

impl fmt::Display for YearKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "y{}", self.0)
    }
}

impl FromStr for YearKey {
    type Err = UnderwritingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.strip_prefix('y')
            .and_then(|digits| digits.parse::<u32>().ok())
            .map(YearKey)
            .ok_or_else(|| UnderwritingError::InvalidInput {
                field: "year_key".into(),
                reason: format!("'{s}' is not of the form y<N>"),
            })
    }
}

impl Serialize for YearKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for YearKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// YearSeries
// ---------------------------------------------------------------------------

/// One line of a multi-year projection: a value for every year from `y0` to
/// the series' last year, with no gaps.
///
/// Years past the end are unknown (`get` returns `None`), never zero.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct YearSeries<T> {
    values: Vec<T>,
}

impl<T> YearSeries<T> {
    pub fn from_vec(values: Vec<T>) -> Self {
        Self { values }
    }

    /// Build `y0..=last` by evaluating `f` for each year.
    pub fn from_fn(last: YearKey, mut f: impl FnMut(YearKey) -> T) -> Self {
        Self {
            values: (0..=last.0).map(|y| f(YearKey(y))).collect(),
        }
    }

    /// Like [`YearSeries::from_fn`], stopping at the first error.
    pub fn try_from_fn<E>(
        last: YearKey,
        mut f: impl FnMut(YearKey) -> Result<T, E>,
    ) -> Result<Self, E> {
        let values = (0..=last.0)
            .map(|y| f(YearKey(y)))
            .collect::<Result<Vec<T>, E>>()?;
        Ok(Self { values })
    }

    pub fn get(&self, year: YearKey) -> Option<&T> {
        self.values.get(year.index())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[T] {
        &self.values
    }

    pub fn iter(&self) -> impl Iterator<Item = (YearKey, &T)> {
        self.values
            .iter()
            .enumerate()
            .map(|(i, v)| (YearKey(i as u32), v))
    }

    pub fn map<U>(&self, mut f: impl FnMut(YearKey, &T) -> U) -> YearSeries<U> {
        YearSeries {
            values: self.iter().map(|(y, v)| f(y, v)).collect(),
        }
    }

    /// Keep `y0..=last` only.
    pub fn through(mut self, last: YearKey) -> Self {
        self.values.truncate(last.index() + 1);
        self
    }
}

impl YearSeries<Decimal> {
    pub fn zeros(last: YearKey) -> Self {
        Self::from_fn(last, |_| Decimal::ZERO)
    }

    /// Value for `year`, zero when the year is outside the series.
    pub fn value_or_zero(&self, year: YearKey) -> Decimal {
        self.get(year).copied().unwrap_or(Decimal::ZERO)
    }

    /// Element-wise combination of two series over the shorter length.
    /// `f` returns `None` on overflow, reported against `context`.
    pub fn zip_with(
        &self,
        other: &YearSeries<Decimal>,
        context: &str,
        f: impl Fn(Decimal, Decimal) -> Option<Decimal>,
    ) -> UnderwritingResult<YearSeries<Decimal>> {
        let values = self
            .iter()
            .zip(other.values.iter())
            .map(|((year, a), b)| {
                f(*a, *b)
                    .ok_or_else(|| UnderwritingError::overflow(format!("{context} at {year}")))
            })
            .collect::<UnderwritingResult<Vec<Decimal>>>()?;
        Ok(YearSeries { values })
    }
}

impl<T> TryFrom<BTreeMap<YearKey, T>> for YearSeries<T> {
    type Error = UnderwritingError;

    fn try_from(map: BTreeMap<YearKey, T>) -> Result<Self, Self::Error> {
        let mut values = Vec::with_capacity(map.len());
        for (expected, (year, value)) in map.into_iter().enumerate() {
            if year.index() != expected {
                return Err(UnderwritingError::InvalidInput {
                    field: "year_series".into(),
                    reason: format!(
                        "years must be contiguous from y0; found {year} at position {expected}"
                    ),
                });
            }
            values.push(value);
        }
        Ok(Self { values })
    }
}

impl<T: Serialize> Serialize for YearSeries<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (year, value) in self.iter() {
            map.serialize_entry(&year, value)?;
        }
        map.end()
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for YearSeries<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let map = BTreeMap::<YearKey, T>::deserialize(deserializer)?;
        YearSeries::try_from(map).map_err(de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Rate schedules
// ---------------------------------------------------------------------------

/// Per-year rates with one explicit default.
///
/// Lookup is exact year, then `default_rate`. There is no
/// "reuse year 1" step: a year without its own rate takes the default and
/// is reported by [`RateSchedule::fallback_years`] so gaps stay visible.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RateSchedule {
    pub default_rate: Rate,
    pub by_year: BTreeMap<YearKey, Rate>,
}

/// How a rate was resolved for one year.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLookup {
    Explicit(Rate),
    Default(Rate),
}

impl RateLookup {
    pub fn rate(self) -> Rate {
        match self {
            RateLookup::Explicit(r) | RateLookup::Default(r) => r,
        }
    }
}

impl RateSchedule {
    pub fn flat(rate: Rate) -> Self {
        Self {
            default_rate: rate,
            by_year: BTreeMap::new(),
        }
    }

    pub fn with_rate(mut self, year: YearKey, rate: Rate) -> Self {
        self.by_year.insert(year, rate);
        self
    }

    pub fn lookup(&self, year: YearKey) -> RateLookup {
        match self.by_year.get(&year) {
            Some(rate) => RateLookup::Explicit(*rate),
            None => RateLookup::Default(self.default_rate),
        }
    }

    pub fn rate_for(&self, year: YearKey) -> Rate {
        self.lookup(year).rate()
    }

    /// Operating years (y1 onward) in `years` that resolve to the default
    /// while the schedule has at least one explicit entry.
    pub fn fallback_years(&self, years: &[YearKey]) -> Vec<YearKey> {
        if self.by_year.is_empty() {
            return Vec::new();
        }
        years
            .iter()
            .copied()
            .filter(|y| !y.is_pre_operating())
            .filter(|y| matches!(self.lookup(*y), RateLookup::Default(_)))
            .collect()
    }
}

/// Compound year-over-year rates into a cumulative index.
///
/// `years` must be `y0..=yN` in order. The first year equals `base`; each
/// later year is the previous value times `1 + rate`. The first year's own
/// rate is never applied.
pub fn build_index_from_rates(
    rates: &RateSchedule,
    years: &[YearKey],
    base: Decimal,
) -> UnderwritingResult<YearSeries<Decimal>> {
    let mut values = Vec::with_capacity(years.len());
    let mut current = base;

    for (position, year) in years.iter().enumerate() {
        if year.index() != position {
            return Err(UnderwritingError::InvalidInput {
                field: "years".into(),
                reason: format!("expected y{position}, found {year}"),
            });
        }
        if position > 0 {
            let growth = Decimal::ONE + rates.rate_for(*year);
            current = current
                .checked_mul(growth)
                .filter(|v| v.abs() <= MAX_INDEX_VALUE)
                .ok_or_else(|| UnderwritingError::Overflow {
                    context: format!("compounding index at {year}"),
                })?;
        }
        values.push(current);
    }

    Ok(YearSeries::from_vec(values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_year_key_numeric_ordering() {
        let mut keys: Vec<YearKey> = ["y10", "y2", "y9", "y0"]
            .iter()
            .map(|s| s.parse().unwrap())
            .collect();
        keys.sort();
        let rendered: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
        assert_eq!(rendered, vec!["y0", "y2", "y9", "y10"]);
    }

    #[test]
    fn test_year_key_rejects_garbage() {
        assert!("10".parse::<YearKey>().is_err());
        assert!("y".parse::<YearKey>().is_err());
        assert!("y-1".parse::<YearKey>().is_err());
    }

    #[test]
    fn test_index_compounding() {
        let rates = RateSchedule::default()
            .with_rate(YearKey(1), dec!(0.10))
            .with_rate(YearKey(2), dec!(0.10));
        let years = YearKey::range_through(2);
        let index = build_index_from_rates(&rates, &years, Decimal::ONE).unwrap();
        assert_eq!(index.values(), &[dec!(1), dec!(1.10), dec!(1.21)]);
    }

    #[test]
    fn test_index_ignores_first_year_rate() {
        let rates = RateSchedule::flat(dec!(0.05)).with_rate(YearKey(0), dec!(0.50));
        let index = build_index_from_rates(&rates, &YearKey::range_through(1), dec!(100)).unwrap();
        assert_eq!(index.values(), &[dec!(100), dec!(105)]);
    }

    #[test]
    fn test_index_missing_rate_uses_default_not_year_one() {
        let rates = RateSchedule::default().with_rate(YearKey(1), dec!(0.20));
        let years = YearKey::range_through(3);
        let index = build_index_from_rates(&rates, &years, Decimal::ONE).unwrap();
        assert_eq!(index.values(), &[dec!(1), dec!(1.2), dec!(1.2), dec!(1.2)]);
        assert_eq!(rates.fallback_years(&years), vec![YearKey(2), YearKey(3)]);
    }

    #[test]
    fn test_index_rejects_gapped_years() {
        let years = vec![YearKey(0), YearKey(2)];
        assert!(build_index_from_rates(&RateSchedule::default(), &years, Decimal::ONE).is_err());
    }

    #[test]
    fn test_index_overflow_is_an_error() {
        let rates = RateSchedule::flat(dec!(100));
        let result = build_index_from_rates(&rates, &YearKey::range_through(30), Decimal::ONE);
        assert!(matches!(result, Err(UnderwritingError::Overflow { .. })));
    }

    #[test]
    fn test_zip_with_reports_overflow() {
        let big = YearSeries::from_vec(vec![Decimal::MAX]);
        let sum = big.zip_with(&big, "total", |a, b| a.checked_add(b));
        assert!(matches!(sum, Err(UnderwritingError::Overflow { .. })));

        let small = YearSeries::from_vec(vec![dec!(2), dec!(3)]);
        let product = small.zip_with(&small, "square", |a, b| a.checked_mul(b)).unwrap();
        assert_eq!(product.values(), &[dec!(4), dec!(9)]);
    }

    #[test]
    fn test_series_serde_shape() {
        let series = YearSeries::from_vec(vec![dec!(0), dec!(1.5)]);
        let json = serde_json::to_string(&series).unwrap();
        assert_eq!(json, r#"{"y0":"0","y1":"1.5"}"#);

        let back: YearSeries<Decimal> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, series);
    }

    #[test]
    fn test_series_deserialize_orders_numerically_and_rejects_gaps() {
        let parsed: YearSeries<u32> =
            serde_json::from_str(r#"{"y10":10,"y9":9,"y8":8,"y7":7,"y6":6,"y5":5,"y4":4,"y3":3,"y2":2,"y1":1,"y0":0}"#)
                .unwrap();
        assert_eq!(parsed.get(YearKey(10)), Some(&10));
        assert_eq!(parsed.get(YearKey(11)), None);

        let gapped: Result<YearSeries<u32>, _> = serde_json::from_str(r#"{"y0":0,"y2":2}"#);
        assert!(gapped.is_err());
    }
}
