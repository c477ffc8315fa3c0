use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::deal::Deal;
use crate::error::UnderwritingError;
use crate::series::{YearKey, YearSeries};
use crate::types::{Money, Rate};
use crate::UnderwritingResult;

use super::drivers::MacroIndices;

/// ADR, occupancy and RevPAR by year, plus the room-night volumes the P&L
/// normalises against. Every series is zero at y0 (pre-operating).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevenueDrivers {
    pub adr: YearSeries<Money>,
    /// Fraction 0..=1
    pub occupancy: YearSeries<Rate>,
    pub revpar: YearSeries<Money>,
    pub rooms_available: YearSeries<Decimal>,
    pub rooms_sold: YearSeries<Decimal>,
}

/// Derive the revenue drivers. Topline growth compounds ADR only; the topline
/// ramp scales stabilised occupancy, capped at a full house.
pub fn build_revenue_drivers(
    deal: &Deal,
    indices: &MacroIndices,
    warnings: &mut Vec<String>,
) -> UnderwritingResult<RevenueDrivers> {
    let horizon = indices.horizon;
    let revenue = &deal.assumptions.revenue;
    let available_per_year = deal.rooms.available_room_nights();

    let adr = YearSeries::try_from_fn(horizon, |y| {
        if y.is_pre_operating() {
            return Ok(Decimal::ZERO);
        }
        revenue
            .base_adr
            .checked_mul(indices.growth_index.value_or_zero(y))
            .ok_or_else(|| UnderwritingError::overflow(format!("ADR at {y}")))
    })?;

    let mut capped: Vec<YearKey> = Vec::new();
    let occupancy = YearSeries::try_from_fn(horizon, |y| -> UnderwritingResult<Rate> {
        if y.is_pre_operating() {
            return Ok(Decimal::ZERO);
        }
        let ramp = indices
            .topline_ramp
            .get(y)
            .copied()
            .unwrap_or(Decimal::ONE);
        let raw = revenue
            .stabilized_occupancy
            .checked_mul(ramp)
            .ok_or_else(|| UnderwritingError::overflow(format!("occupancy at {y}")))?;
        if raw > Decimal::ONE {
            capped.push(y);
        }
        Ok(raw.clamp(Decimal::ZERO, Decimal::ONE))
    })?;

    if !capped.is_empty() {
        let listed: Vec<String> = capped.iter().map(|y| y.to_string()).collect();
        warnings.push(format!(
            "Ramped occupancy exceeds 100% in {}; capped at a full house",
            listed.join(", ")
        ));
    }

    let revpar = adr.zip_with(&occupancy, "RevPAR", |a, o| a.checked_mul(o))?;

    let rooms_available = YearSeries::from_fn(horizon, |y| {
        if y.is_pre_operating() {
            Decimal::ZERO
        } else {
            available_per_year
        }
    });
    let rooms_sold =
        rooms_available.zip_with(&occupancy, "rooms sold", |a, o| a.checked_mul(o))?;

    Ok(RevenueDrivers {
        adr,
        occupancy,
        revpar,
        rooms_available,
        rooms_sold,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deal::RoomConfig;
    use crate::projection::drivers::build_macro_indices;
    use crate::series::RateSchedule;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    fn sample_deal() -> Deal {
        let mut deal = Deal {
            rooms: RoomConfig {
                keys: 100,
                operating_days: 365,
            },
            ..Deal::default()
        };
        deal.assumptions.projection_years = 3;
        deal.assumptions.revenue.base_adr = dec!(200);
        deal.assumptions.revenue.stabilized_occupancy = dec!(0.75);
        deal.assumptions.ramp.topline = vec![dec!(0.80)];
        deal.assumptions.macro_rates.topline_growth = RateSchedule::flat(dec!(0.05));
        deal.assumptions.macro_rates.inflation = RateSchedule::flat(dec!(0.50));
        deal
    }

    fn drivers_for(deal: &Deal) -> (RevenueDrivers, Vec<String>) {
        let mut warnings = Vec::new();
        let indices = build_macro_indices(deal, &mut warnings).unwrap();
        let drivers = build_revenue_drivers(deal, &indices, &mut warnings).unwrap();
        (drivers, warnings)
    }

    #[test]
    fn test_year_zero_is_zero() {
        let (drivers, _) = drivers_for(&sample_deal());
        let y0 = YearKey(0);
        assert_eq!(drivers.adr.get(y0), Some(&Decimal::ZERO));
        assert_eq!(drivers.occupancy.get(y0), Some(&Decimal::ZERO));
        assert_eq!(drivers.revpar.get(y0), Some(&Decimal::ZERO));
        assert_eq!(drivers.rooms_sold.get(y0), Some(&Decimal::ZERO));
    }

    #[test]
    fn test_adr_grows_with_topline_not_inflation() {
        let (drivers, _) = drivers_for(&sample_deal());
        // 200 * 1.05, inflation of 50% must not leak in
        assert_eq!(drivers.adr.get(YearKey(1)), Some(&dec!(210)));
        assert_eq!(drivers.adr.get(YearKey(2)), Some(&dec!(220.5)));
    }

    #[test]
    fn test_occupancy_ramp_and_revpar() {
        let (drivers, _) = drivers_for(&sample_deal());
        assert_eq!(drivers.occupancy.get(YearKey(1)), Some(&dec!(0.6)));
        assert_eq!(drivers.occupancy.get(YearKey(2)), Some(&dec!(0.75)));
        // RevPAR = 210 * 0.6
        assert_eq!(drivers.revpar.get(YearKey(1)), Some(&dec!(126)));
        // 100 keys * 365 nights * 0.6
        assert_eq!(drivers.rooms_sold.get(YearKey(1)), Some(&dec!(21900)));
    }

    #[test]
    fn test_occupancy_capped_with_warning() {
        let mut deal = sample_deal();
        deal.assumptions.ramp.topline = vec![dec!(1.5)];
        let (drivers, warnings) = drivers_for(&deal);
        assert_eq!(drivers.occupancy.get(YearKey(1)), Some(&Decimal::ONE));
        assert!(warnings.iter().any(|w| w.contains("capped")));
    }

    #[test]
    fn test_oversized_adr_is_an_overflow_error() {
        let mut deal = sample_deal();
        deal.assumptions.revenue.base_adr = Decimal::MAX;
        let mut warnings = Vec::new();
        let indices = build_macro_indices(&deal, &mut warnings).unwrap();
        let result = build_revenue_drivers(&deal, &indices, &mut warnings);
        assert!(matches!(result, Err(UnderwritingError::Overflow { .. })));
    }
}
