use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::deal::Deal;
use crate::error::UnderwritingError;
use crate::series::{
    build_index_from_rates, RateSchedule, YearKey, YearSeries, MAX_PROJECTION_YEARS,
};
use crate::types::{Multiple, Rate};
use crate::UnderwritingResult;

// ---------------------------------------------------------------------------
// Per-year selectors
// ---------------------------------------------------------------------------

/// Cost inflation for `year`.
pub fn inflation_rate(deal: &Deal, year: YearKey) -> Rate {
    deal.assumptions.macro_rates.inflation.rate_for(year)
}

/// ADR growth for `year`.
pub fn topline_growth_rate(deal: &Deal, year: YearKey) -> Rate {
    deal.assumptions.macro_rates.topline_growth.rate_for(year)
}

/// Multiplier on steady-state cost burden. 1.0 outside the ramp window
/// and in the pre-operating year.
pub fn cost_ramp_factor(deal: &Deal, year: YearKey) -> Multiple {
    ramp_factor(&deal.assumptions.ramp.cost, year)
}

/// Multiplier on stabilised occupancy. 1.0 outside the ramp window and in
/// the pre-operating year.
pub fn topline_ramp_factor(deal: &Deal, year: YearKey) -> Multiple {
    ramp_factor(&deal.assumptions.ramp.topline, year)
}

/// Sale year, if the deal is sold. Years after it carry no operations.
pub fn exit_year_index(deal: &Deal) -> Option<YearKey> {
    deal.assumptions.exit_settings.disposal_year()
}

/// Last projected year: the configured horizon, stretched to reach the
/// exit event when it falls later. Never beyond [`MAX_PROJECTION_YEARS`].
pub fn projection_horizon(deal: &Deal) -> UnderwritingResult<YearKey> {
    let configured = deal.assumptions.projection_years.max(1);
    let event = deal
        .assumptions
        .exit_settings
        .event_year()
        .map(|y| y.0)
        .unwrap_or(0);
    let horizon = configured.max(event);
    if horizon > MAX_PROJECTION_YEARS {
        return Err(UnderwritingError::InvalidInput {
            field: if event > configured {
                "exit_settings".into()
            } else {
                "projection_years".into()
            },
            reason: format!("horizon of {horizon} years exceeds {MAX_PROJECTION_YEARS}"),
        });
    }
    Ok(YearKey(horizon))
}

fn ramp_factor(factors: &[Multiple], year: YearKey) -> Multiple {
    if year.is_pre_operating() {
        return Decimal::ONE;
    }
    factors
        .get(year.index() - 1)
        .copied()
        .unwrap_or(Decimal::ONE)
}

// ---------------------------------------------------------------------------
// Indices over the whole horizon
// ---------------------------------------------------------------------------

/// Every macro and ramp series the revenue and P&L builders need.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MacroIndices {
    pub horizon: YearKey,
    /// Cumulative cost inflation, 1.0 at y0
    pub inflation_index: YearSeries<Decimal>,
    /// Cumulative ADR growth, 1.0 at y0
    pub growth_index: YearSeries<Decimal>,
    pub topline_ramp: YearSeries<Multiple>,
    pub cost_ramp: YearSeries<Multiple>,
}

pub fn build_macro_indices(
    deal: &Deal,
    warnings: &mut Vec<String>,
) -> UnderwritingResult<MacroIndices> {
    let horizon = projection_horizon(deal)?;
    let years = YearKey::range_through(horizon.0);
    let rates = &deal.assumptions.macro_rates;

    if horizon.0 > deal.assumptions.projection_years {
        warnings.push(format!(
            "Exit event falls after the {}-year horizon; projection extended to {horizon}",
            deal.assumptions.projection_years
        ));
    }

    flag_fallbacks("inflation", &rates.inflation, &years, warnings);
    flag_fallbacks("topline growth", &rates.topline_growth, &years, warnings);

    let inflation_index = build_index_from_rates(&rates.inflation, &years, Decimal::ONE)?;
    let growth_index = build_index_from_rates(&rates.topline_growth, &years, Decimal::ONE)?;

    Ok(MacroIndices {
        horizon,
        inflation_index,
        growth_index,
        topline_ramp: YearSeries::from_fn(horizon, |y| topline_ramp_factor(deal, y)),
        cost_ramp: YearSeries::from_fn(horizon, |y| cost_ramp_factor(deal, y)),
    })
}

fn flag_fallbacks(
    name: &str,
    schedule: &RateSchedule,
    years: &[YearKey],
    warnings: &mut Vec<String>,
) {
    let missing = schedule.fallback_years(years);
    if missing.is_empty() {
        return;
    }
    let listed: Vec<String> = missing.iter().map(|y| y.to_string()).collect();
    warnings.push(format!(
        "No explicit {name} rate for {}; default rate {} applied",
        listed.join(", "),
        schedule.default_rate
    ));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deal::{ExitStrategy, SaleParams};
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    fn ramped_deal() -> Deal {
        let mut deal = Deal::default();
        deal.assumptions.ramp.topline = vec![dec!(0.80), dec!(0.90)];
        deal.assumptions.ramp.cost = vec![dec!(1.15)];
        deal.assumptions.macro_rates.inflation = RateSchedule::flat(dec!(0.025));
        deal.assumptions.macro_rates.topline_growth =
            RateSchedule::flat(dec!(0.03)).with_rate(YearKey(1), dec!(0.05));
        deal
    }

    #[test]
    fn test_ramp_factors_reach_steady_state() {
        let deal = ramped_deal();
        assert_eq!(topline_ramp_factor(&deal, YearKey(0)), Decimal::ONE);
        assert_eq!(topline_ramp_factor(&deal, YearKey(1)), dec!(0.80));
        assert_eq!(topline_ramp_factor(&deal, YearKey(2)), dec!(0.90));
        assert_eq!(topline_ramp_factor(&deal, YearKey(3)), Decimal::ONE);
        assert_eq!(cost_ramp_factor(&deal, YearKey(1)), dec!(1.15));
        assert_eq!(cost_ramp_factor(&deal, YearKey(2)), Decimal::ONE);
    }

    #[test]
    fn test_macro_rates_stay_separate() {
        let deal = ramped_deal();
        assert_eq!(inflation_rate(&deal, YearKey(1)), dec!(0.025));
        assert_eq!(topline_growth_rate(&deal, YearKey(1)), dec!(0.05));
        assert_eq!(topline_growth_rate(&deal, YearKey(2)), dec!(0.03));
    }

    #[test]
    fn test_horizon_extends_to_late_sale() {
        let mut deal = ramped_deal();
        deal.assumptions.projection_years = 5;
        assert_eq!(projection_horizon(&deal).unwrap(), YearKey(5));
        assert_eq!(exit_year_index(&deal), None);

        deal.assumptions.exit_settings = ExitStrategy::Sale(SaleParams {
            exit_year: 7,
            exit_cap_rate_pct: dec!(7),
            selling_costs_pct: dec!(2),
        });
        assert_eq!(projection_horizon(&deal).unwrap(), YearKey(7));
        assert_eq!(exit_year_index(&deal), Some(YearKey(7)));

        let mut warnings = Vec::new();
        let indices = build_macro_indices(&deal, &mut warnings).unwrap();
        assert_eq!(indices.inflation_index.len(), 8);
        assert!(warnings.iter().any(|w| w.contains("extended")));
    }

    #[test]
    fn test_unbounded_horizon_rejected() {
        let mut deal = ramped_deal();
        deal.assumptions.projection_years = u32::MAX;
        let mut warnings = Vec::new();
        assert!(matches!(
            build_macro_indices(&deal, &mut warnings),
            Err(UnderwritingError::InvalidInput { .. })
        ));

        deal.assumptions.projection_years = 10;
        deal.assumptions.exit_settings = ExitStrategy::Sale(SaleParams {
            exit_year: u32::MAX,
            exit_cap_rate_pct: dec!(7),
            selling_costs_pct: dec!(2),
        });
        match projection_horizon(&deal) {
            Err(UnderwritingError::InvalidInput { field, .. }) => {
                assert_eq!(field, "exit_settings")
            }
            other => panic!("expected invalid input, got {other:?}"),
        }

        deal.assumptions.exit_settings = ExitStrategy::HoldForever;
        deal.assumptions.projection_years = MAX_PROJECTION_YEARS;
        assert_eq!(projection_horizon(&deal).unwrap(), YearKey(MAX_PROJECTION_YEARS));
    }

    #[test]
    fn test_indices_and_fallback_warning() {
        let deal = ramped_deal();
        let mut warnings = Vec::new();
        let indices = build_macro_indices(&deal, &mut warnings).unwrap();

        assert_eq!(indices.growth_index.get(YearKey(0)), Some(&dec!(1)));
        assert_eq!(indices.growth_index.get(YearKey(1)), Some(&dec!(1.05)));
        assert_eq!(indices.growth_index.get(YearKey(2)), Some(&dec!(1.0815)));
        assert_eq!(indices.inflation_index.get(YearKey(1)), Some(&dec!(1.025)));

        // growth has an explicit y1 entry, so y2..y10 are reported as defaulted
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("topline growth"));
        assert!(warnings[0].contains("y2"));
    }
}
