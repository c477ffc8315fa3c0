use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::UnderwritingError;
use crate::series::{RateSchedule, YearKey};
use crate::types::{Currency, Money, Multiple, Rate};
use crate::UnderwritingResult;

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

pub const DEFAULT_PROJECTION_YEARS: u32 = 10;
pub const DEFAULT_OPERATING_DAYS: u32 = 365;
pub const DEFAULT_REFINANCE_CAP_RATE_PCT: Decimal = dec!(8);

fn default_projection_years() -> u32 {
    DEFAULT_PROJECTION_YEARS
}

fn default_operating_days() -> u32 {
    DEFAULT_OPERATING_DAYS
}

fn default_refinance_cap_rate() -> Decimal {
    DEFAULT_REFINANCE_CAP_RATE_PCT
}

// ---------------------------------------------------------------------------
// Deal
// ---------------------------------------------------------------------------

/// Snapshot of a hotel deal as handed over by the caller. The engine only
/// reads it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deal {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub currency: Currency,
    pub budget: Budget,
    pub rooms: RoomConfig,
    #[serde(default)]
    pub assumptions: DealAssumptions,
}

/// Development / acquisition budget.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Budget {
    /// Grand total investment, entered as the year-0 outflow
    pub grand_total: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomConfig {
    /// Number of lettable rooms (keys)
    pub keys: u32,
    /// Days the hotel trades per year
    #[serde(default = "default_operating_days")]
    pub operating_days: u32,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            keys: 0,
            operating_days: DEFAULT_OPERATING_DAYS,
        }
    }
}

impl RoomConfig {
    /// Room-nights available in one operating year.
    pub fn available_room_nights(&self) -> Decimal {
        Decimal::from(self.keys) * Decimal::from(self.operating_days)
    }
}

// ---------------------------------------------------------------------------
// Assumptions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DealAssumptions {
    /// Display horizon in operating years (y1..=yN)
    #[serde(default = "default_projection_years")]
    pub projection_years: u32,
    pub macro_rates: MacroRates,
    pub ramp: RampAssumptions,
    pub revenue: RevenueAssumptions,
    pub operating: OperatingAssumptions,
    pub capex: CapexAssumptions,
    pub tax: TaxAssumptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debt: Option<DebtTerms>,
    pub exit_settings: ExitStrategy,
}

impl Default for DealAssumptions {
    fn default() -> Self {
        Self {
            projection_years: DEFAULT_PROJECTION_YEARS,
            macro_rates: MacroRates::default(),
            ramp: RampAssumptions::default(),
            revenue: RevenueAssumptions::default(),
            operating: OperatingAssumptions::default(),
            capex: CapexAssumptions::default(),
            tax: TaxAssumptions::default(),
            debt: None,
            exit_settings: ExitStrategy::HoldForever,
        }
    }
}

/// Year-over-year macro rates. Inflation drives cost lines, topline growth
/// drives ADR; the two are never mixed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MacroRates {
    pub inflation: RateSchedule,
    pub topline_growth: RateSchedule,
}

/// Ramp-up multipliers by operating year. Entry `i` applies to year `i + 1`;
/// years past the end of the list are at steady state (1.0).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RampAssumptions {
    /// Applied to stabilised occupancy (typically below 1.0 early on)
    pub topline: Vec<Multiple>,
    /// Applied to departmental and undistributed cost burden (typically above 1.0)
    pub cost: Vec<Multiple>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RevenueAssumptions {
    /// Average daily rate in today's money (grown from y0)
    pub base_adr: Money,
    /// Stabilised occupancy as a fraction (0.75 = 75%)
    pub stabilized_occupancy: Rate,
    /// F&B revenue as a fraction of rooms revenue
    pub food_beverage_ratio: Rate,
    /// Other operated departments and miscellaneous income, fraction of rooms revenue
    pub other_revenue_ratio: Rate,
}

/// Steady-state cost assumptions.
///
/// `*_pct` are fractions of the named revenue base; `*_par` are annual
/// amounts per available room in today's money, inflated from y0.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OperatingAssumptions {
    pub rooms_cost_pct: Rate,
    pub food_beverage_cost_pct: Rate,
    pub other_cost_pct: Rate,
    pub admin_general_par: Money,
    pub sales_marketing_par: Money,
    pub utilities_par: Money,
    pub maintenance_par: Money,
    pub insurance_par: Money,
    /// Annual property tax as a fraction of the grand-total budget, inflated
    pub property_tax_pct_of_cost: Rate,
    /// Base management fee, fraction of total revenue
    pub management_fee_pct: Rate,
    /// Reserve for replacement (FF&E), fraction of total revenue
    pub ffe_reserve_pct: Rate,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CapexAssumptions {
    /// Ongoing capex after opening, fraction of total revenue
    pub ongoing_capex_pct: Rate,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TaxAssumptions {
    /// Tax rate applied to positive EBITDA
    pub income_tax_rate: Rate,
}

// ---------------------------------------------------------------------------
// Debt
// ---------------------------------------------------------------------------

/// Repayment profile of the acquisition / development loan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Amortisation {
    /// Interest only; the balance is repaid at sale
    InterestOnly,
    /// Level annual payment (annuity) over `years`
    Level { years: u32 },
    /// Equal principal instalments over `years`
    StraightLine { years: u32 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebtTerms {
    /// Loan amount as a fraction of the grand-total budget
    pub loan_to_cost: Rate,
    /// Annual interest rate
    pub interest_rate: Rate,
    pub amortisation: Amortisation,
}

impl DebtTerms {
    pub fn initial_loan(&self, grand_total: Money) -> UnderwritingResult<Money> {
        grand_total
            .checked_mul(self.loan_to_cost)
            .ok_or_else(|| UnderwritingError::overflow("initial loan"))
    }
}

// ---------------------------------------------------------------------------
// Exit strategy
// ---------------------------------------------------------------------------

/// Exactly one terminal strategy is active; the others' fields do not exist.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitStrategy {
    /// No terminal event; cash flows run through the display horizon
    #[default]
    HoldForever,
    Sale(SaleParams),
    Refinance(RefinanceParams),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleParams {
    pub exit_year: u32,
    /// Percent, e.g. 6 for a 6% cap rate
    pub exit_cap_rate_pct: Decimal,
    /// Percent of the sale price
    pub selling_costs_pct: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefinanceParams {
    pub refinance_year: u32,
    /// Percent of property value
    pub ltv_at_refinance: Decimal,
    /// Percent of the new loan
    pub refinance_costs_pct: Decimal,
    /// Percent cap rate used to value the property for the new loan
    #[serde(default = "default_refinance_cap_rate")]
    pub valuation_cap_rate_pct: Decimal,
}

impl ExitStrategy {
    /// Year of the exit event, if the strategy has one. Year 0 is not a
    /// trading year, so an event there is moved to y1.
    pub fn event_year(&self) -> Option<YearKey> {
        match self {
            ExitStrategy::HoldForever => None,
            ExitStrategy::Sale(p) => Some(YearKey(p.exit_year.max(1))),
            ExitStrategy::Refinance(p) => Some(YearKey(p.refinance_year.max(1))),
        }
    }

    /// Year after which the property is no longer owned.
    pub fn disposal_year(&self) -> Option<YearKey> {
        match self {
            ExitStrategy::Sale(p) => Some(YearKey(p.exit_year.max(1))),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_exit_strategy_tagged_json() {
        let json = r#"{"strategy":"SALE","exitYear":5,"exitCapRatePct":"6.5","sellingCostsPct":"2"}"#;
        let parsed: ExitStrategy = serde_json::from_str(json).unwrap();
        assert_eq!(
            parsed,
            ExitStrategy::Sale(SaleParams {
                exit_year: 5,
                exit_cap_rate_pct: dec!(6.5),
                selling_costs_pct: dec!(2),
            })
        );

        let hold: ExitStrategy = serde_json::from_str(r#"{"strategy":"HOLD_FOREVER"}"#).unwrap();
        assert_eq!(hold, ExitStrategy::HoldForever);
    }

    #[test]
    fn test_refinance_cap_rate_default() {
        let json = r#"{"strategy":"REFINANCE","refinanceYear":4,"ltvAtRefinance":"60","refinanceCostsPct":"1"}"#;
        match serde_json::from_str::<ExitStrategy>(json).unwrap() {
            ExitStrategy::Refinance(p) => {
                assert_eq!(p.valuation_cap_rate_pct, DEFAULT_REFINANCE_CAP_RATE_PCT)
            }
            other => panic!("expected refinance, got {other:?}"),
        }
    }

    #[test]
    fn test_partial_deal_gets_defaults() {
        let json = r#"{"budget":{"grandTotal":"1000000"},"rooms":{"keys":50}}"#;
        let deal: Deal = serde_json::from_str(json).unwrap();
        assert_eq!(deal.assumptions.projection_years, DEFAULT_PROJECTION_YEARS);
        assert_eq!(deal.rooms.operating_days, 365);
        assert_eq!(deal.assumptions.exit_settings, ExitStrategy::HoldForever);
        assert_eq!(deal.rooms.available_room_nights(), dec!(18250));
    }

    #[test]
    fn test_event_year_never_zero() {
        let sale = ExitStrategy::Sale(SaleParams {
            exit_year: 0,
            exit_cap_rate_pct: dec!(6),
            selling_costs_pct: dec!(2),
        });
        assert_eq!(sale.event_year(), Some(YearKey(1)));
        assert_eq!(ExitStrategy::HoldForever.disposal_year(), None);
    }
}
