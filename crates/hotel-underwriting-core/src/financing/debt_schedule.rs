use log::debug;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::deal::{Amortisation, Deal, DebtTerms, ExitStrategy};
use crate::error::UnderwritingError;
use crate::projection::{project_pnl, projection_horizon};
use crate::returns::exit::refinance_valuation;
use crate::series::{YearKey, YearSeries, MAX_PROJECTION_YEARS};
use crate::types::{with_metadata, ComputationOutput, Money, Rate};
use crate::UnderwritingResult;

/// A single year in the debt schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebtPeriod {
    pub year: YearKey,
    pub opening_balance: Money,
    /// New money drawn this year: the initial loan at y0, the refinance loan at its year
    pub drawdown: Money,
    pub interest: Money,
    pub scheduled_principal: Money,
    /// Balance repaid at a sale or refinance
    pub event_repayment: Money,
    pub closing_balance: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebtSchedule {
    pub initial_loan: Money,
    pub periods: Vec<DebtPeriod>,
    pub total_interest_paid: Money,
    pub total_principal_paid: Money,
}

impl DebtSchedule {
    pub fn period(&self, year: YearKey) -> Option<&DebtPeriod> {
        self.periods.get(year.index())
    }

    /// Balance repaid at the event year, before any new loan is drawn.
    pub fn balance_repaid_at(&self, year: YearKey) -> Money {
        self.period(year)
            .map(|p| p.event_repayment)
            .unwrap_or(Decimal::ZERO)
    }

    pub fn closing_balance(&self, year: YearKey) -> Money {
        self.period(year)
            .map(|p| p.closing_balance)
            .unwrap_or(Decimal::ZERO)
    }

    pub fn series(&self, f: impl Fn(&DebtPeriod) -> Money) -> YearSeries<Money> {
        YearSeries::from_vec(self.periods.iter().map(f).collect())
    }
}

/// Loan currently being serviced.
struct Facility {
    amount: Money,
    originated: YearKey,
    level_payment: Money,
}

impl Facility {
    fn new(
        amount: Money,
        originated: YearKey,
        terms: Option<&DebtTerms>,
    ) -> UnderwritingResult<Self> {
        let level_payment = match terms.map(|t| (&t.amortisation, t.interest_rate)) {
            Some((Amortisation::Level { years }, rate)) => annuity_payment(amount, rate, *years)?,
            _ => Decimal::ZERO,
        };
        Ok(Self {
            amount,
            originated,
            level_payment,
        })
    }

    fn scheduled_principal(
        &self,
        terms: &DebtTerms,
        year: YearKey,
        opening: Money,
        interest: Money,
    ) -> Money {
        let age = year.0.saturating_sub(self.originated.0);
        let principal = match terms.amortisation {
            Amortisation::InterestOnly => Decimal::ZERO,
            Amortisation::StraightLine { years } if age <= years => {
                self.amount / Decimal::from(years)
            }
            Amortisation::Level { years } if age <= years => {
                self.level_payment.checked_sub(interest).unwrap_or(Decimal::ZERO)
            }
            _ => Decimal::ZERO,
        };
        principal.clamp(Decimal::ZERO, opening.max(Decimal::ZERO))
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Year-by-year schedule for the deal's loan, including the payoff at sale
/// and the loan swap at refinance.
pub fn build_debt_schedule(deal: &Deal) -> UnderwritingResult<ComputationOutput<DebtSchedule>> {
    let start = Instant::now();
    let mut warnings: Vec<String> = Vec::new();

    let refinance_loan = match &deal.assumptions.exit_settings {
        ExitStrategy::Refinance(params) => {
            let pnl = project_pnl(deal, &mut warnings)?;
            let year = deal.assumptions.exit_settings.event_year().unwrap_or(YearKey(1));
            match refinance_valuation(params, pnl.ebitda().value_or_zero(year)) {
                Ok(valuation) => Some(valuation.new_loan_amount),
                Err(UnderwritingError::CannotValue(reason)) => {
                    warnings.push(format!("Refinance at {year} skipped: {reason}"));
                    None
                }
                Err(e) => return Err(e),
            }
        }
        _ => None,
    };

    let horizon = projection_horizon(deal)?;
    let schedule = project_debt(deal, horizon, refinance_loan, &mut warnings)?;

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Annual Debt Schedule",
        &deal.assumptions.debt,
        warnings,
        elapsed,
        schedule,
    ))
}

/// Schedule through `horizon`. `refinance_loan` is the new loan drawn at the
/// refinance year; with `None` the existing loan simply runs on.
pub fn project_debt(
    deal: &Deal,
    horizon: YearKey,
    refinance_loan: Option<Money>,
    warnings: &mut Vec<String>,
) -> UnderwritingResult<DebtSchedule> {
    if horizon.0 > MAX_PROJECTION_YEARS {
        return Err(UnderwritingError::InvalidInput {
            field: "horizon".into(),
            reason: format!("{horizon} is beyond y{MAX_PROJECTION_YEARS}"),
        });
    }
    let terms = deal.assumptions.debt.as_ref();
    if let Some(terms) = terms {
        validate_terms(terms)?;
    }

    let exit = &deal.assumptions.exit_settings;
    let sale_year = exit.disposal_year();
    let refinance_year = match exit {
        ExitStrategy::Refinance(_) => exit.event_year(),
        _ => None,
    };
    if refinance_year.is_some() && terms.is_none() {
        warnings.push(
            "No debt terms on the deal; the refinance loan carries no modelled debt service"
                .into(),
        );
    }

    let initial_loan = match terms {
        Some(t) => t.initial_loan(deal.budget.grand_total)?,
        None => Decimal::ZERO,
    };
    let rate: Rate = terms.map(|t| t.interest_rate).unwrap_or(Decimal::ZERO);

    debug!(
        "debt schedule for deal '{}': loan {} at {} through {}",
        deal.id, initial_loan, rate, horizon
    );

    let mut facility = Facility::new(initial_loan, YearKey::ACQUISITION, terms)?;
    let mut periods = Vec::with_capacity(horizon.index() + 1);
    periods.push(DebtPeriod {
        year: YearKey::ACQUISITION,
        opening_balance: Decimal::ZERO,
        drawdown: initial_loan,
        interest: Decimal::ZERO,
        scheduled_principal: Decimal::ZERO,
        event_repayment: Decimal::ZERO,
        closing_balance: initial_loan,
    });

    let mut balance = initial_loan;
    let mut total_interest_paid = Decimal::ZERO;
    let mut total_principal_paid = Decimal::ZERO;

    for year in (1..=horizon.0).map(YearKey) {
        if sale_year.map_or(false, |sold| year > sold) {
            periods.push(DebtPeriod::empty(year));
            continue;
        }

        let opening = balance;
        let interest = checked(opening.checked_mul(rate), year)?;
        let scheduled_principal = match terms {
            Some(t) => facility.scheduled_principal(t, year, opening, interest),
            None => Decimal::ZERO,
        };
        balance = opening - scheduled_principal;

        let mut drawdown = Decimal::ZERO;
        let mut event_repayment = Decimal::ZERO;
        if Some(year) == sale_year {
            event_repayment = balance;
            balance = Decimal::ZERO;
        }
        if let Some(new_loan) = refinance_loan.filter(|_| Some(year) == refinance_year) {
            event_repayment = balance;
            drawdown = new_loan;
            balance = new_loan;
            facility = Facility::new(new_loan, year, terms)?;
        }

        total_interest_paid = checked(total_interest_paid.checked_add(interest), year)?;
        total_principal_paid = checked(
            scheduled_principal
                .checked_add(event_repayment)
                .and_then(|repaid| total_principal_paid.checked_add(repaid)),
            year,
        )?;

        periods.push(DebtPeriod {
            year,
            opening_balance: opening,
            drawdown,
            interest,
            scheduled_principal,
            event_repayment,
            closing_balance: balance,
        });
    }

    Ok(DebtSchedule {
        initial_loan,
        periods,
        total_interest_paid,
        total_principal_paid,
    })
}

impl DebtPeriod {
    fn empty(year: YearKey) -> Self {
        Self {
            year,
            opening_balance: Decimal::ZERO,
            drawdown: Decimal::ZERO,
            interest: Decimal::ZERO,
            scheduled_principal: Decimal::ZERO,
            event_repayment: Decimal::ZERO,
            closing_balance: Decimal::ZERO,
        }
    }
}

fn validate_terms(terms: &DebtTerms) -> UnderwritingResult<()> {
    if terms.loan_to_cost < Decimal::ZERO {
        return Err(UnderwritingError::InvalidInput {
            field: "loan_to_cost".into(),
            reason: "Loan-to-cost cannot be negative".into(),
        });
    }
    if terms.interest_rate <= Decimal::NEGATIVE_ONE {
        return Err(UnderwritingError::InvalidInput {
            field: "interest_rate".into(),
            reason: "Interest rate must be greater than -100%".into(),
        });
    }
    match terms.amortisation {
        Amortisation::Level { years: 0 } | Amortisation::StraightLine { years: 0 } => {
            Err(UnderwritingError::InvalidInput {
                field: "amortisation.years".into(),
                reason: "Amortising loans need a term of at least 1 year".into(),
            })
        }
        _ => Ok(()),
    }
}

/// Level annual payment that clears `amount` over `years` at `rate`.
fn annuity_payment(amount: Money, rate: Rate, years: u32) -> UnderwritingResult<Money> {
    let n = Decimal::from(years.max(1));
    if rate.is_zero() {
        return Ok(amount / n);
    }

    let mut growth = Decimal::ONE;
    for _ in 0..years.max(1) {
        growth = growth
            .checked_mul(Decimal::ONE + rate)
            .ok_or_else(|| UnderwritingError::Overflow {
                context: "annuity factor".into(),
            })?;
    }

    // P * r * (1+r)^n / ((1+r)^n - 1)
    let denominator = growth - Decimal::ONE;
    if denominator.is_zero() {
        return Err(UnderwritingError::DivisionByZero {
            context: "annuity factor".into(),
        });
    }
    amount
        .checked_mul(rate)
        .and_then(|v| v.checked_mul(growth))
        .and_then(|v| v.checked_div(denominator))
        .ok_or_else(|| UnderwritingError::Overflow {
            context: "annuity payment".into(),
        })
}

fn checked(value: Option<Decimal>, year: YearKey) -> UnderwritingResult<Decimal> {
    value.ok_or_else(|| UnderwritingError::overflow(format!("debt schedule at {year}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deal::{RefinanceParams, SaleParams};
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    fn levered_deal(amortisation: Amortisation) -> Deal {
        let mut deal = Deal::default();
        deal.budget.grand_total = dec!(10_000_000);
        deal.assumptions.projection_years = 5;
        deal.assumptions.debt = Some(DebtTerms {
            loan_to_cost: dec!(0.60),
            interest_rate: dec!(0.05),
            amortisation,
        });
        deal
    }

    fn schedule(deal: &Deal, refinance_loan: Option<Money>) -> DebtSchedule {
        let mut warnings = Vec::new();
        let horizon = projection_horizon(deal).unwrap();
        project_debt(deal, horizon, refinance_loan, &mut warnings).unwrap()
    }

    #[test]
    fn test_interest_only_holds_balance() {
        let s = schedule(&levered_deal(Amortisation::InterestOnly), None);
        assert_eq!(s.initial_loan, dec!(6_000_000));
        assert_eq!(s.periods.len(), 6);
        let y1 = s.period(YearKey(1)).unwrap();
        assert_eq!(y1.interest, dec!(300_000));
        assert_eq!(y1.scheduled_principal, Decimal::ZERO);
        assert_eq!(s.period(YearKey(5)).unwrap().closing_balance, dec!(6_000_000));
        assert_eq!(s.total_interest_paid, dec!(1_500_000));
    }

    #[test]
    fn test_straight_line_repays_evenly() {
        let s = schedule(&levered_deal(Amortisation::StraightLine { years: 4 }), None);
        let y1 = s.period(YearKey(1)).unwrap();
        assert_eq!(y1.scheduled_principal, dec!(1_500_000));
        assert_eq!(y1.closing_balance, dec!(4_500_000));
        assert_eq!(s.period(YearKey(4)).unwrap().closing_balance, Decimal::ZERO);
        let y5 = s.period(YearKey(5)).unwrap();
        assert_eq!(y5.interest, Decimal::ZERO);
        assert_eq!(y5.scheduled_principal, Decimal::ZERO);
    }

    #[test]
    fn test_level_payment_clears_loan() {
        let s = schedule(&levered_deal(Amortisation::Level { years: 5 }), None);
        let y1 = s.period(YearKey(1)).unwrap();
        let y2 = s.period(YearKey(2)).unwrap();
        // Constant debt service, growing principal share
        let pay1 = y1.interest + y1.scheduled_principal;
        let pay2 = y2.interest + y2.scheduled_principal;
        assert!((pay1 - pay2).abs() < dec!(0.0001));
        assert!(y2.scheduled_principal > y1.scheduled_principal);
        assert!(s.period(YearKey(5)).unwrap().closing_balance.abs() < dec!(0.01));
    }

    #[test]
    fn test_sale_repays_and_stops_schedule() {
        let mut deal = levered_deal(Amortisation::InterestOnly);
        deal.assumptions.exit_settings = ExitStrategy::Sale(SaleParams {
            exit_year: 3,
            exit_cap_rate_pct: dec!(7),
            selling_costs_pct: dec!(2),
        });
        let s = schedule(&deal, None);
        let y3 = s.period(YearKey(3)).unwrap();
        assert_eq!(y3.event_repayment, dec!(6_000_000));
        assert_eq!(y3.closing_balance, Decimal::ZERO);
        assert_eq!(s.balance_repaid_at(YearKey(3)), dec!(6_000_000));
        assert_eq!(s.period(YearKey(4)).unwrap(), &DebtPeriod::empty(YearKey(4)));
    }

    #[test]
    fn test_refinance_swaps_loan() {
        let mut deal = levered_deal(Amortisation::StraightLine { years: 10 });
        deal.assumptions.exit_settings = ExitStrategy::Refinance(RefinanceParams {
            refinance_year: 2,
            ltv_at_refinance: dec!(65),
            refinance_costs_pct: dec!(1),
            valuation_cap_rate_pct: dec!(8),
        });
        let s = schedule(&deal, Some(dec!(9_000_000)));
        let y2 = s.period(YearKey(2)).unwrap();
        // 6.0m less two 600k instalments
        assert_eq!(y2.event_repayment, dec!(4_800_000));
        assert_eq!(y2.drawdown, dec!(9_000_000));
        assert_eq!(y2.closing_balance, dec!(9_000_000));
        // New loan amortises over a fresh 10-year term
        assert_eq!(s.period(YearKey(3)).unwrap().scheduled_principal, dec!(900_000));
    }

    #[test]
    fn test_refinance_without_new_loan_runs_on() {
        let mut deal = levered_deal(Amortisation::InterestOnly);
        deal.assumptions.exit_settings = ExitStrategy::Refinance(RefinanceParams {
            refinance_year: 2,
            ltv_at_refinance: dec!(65),
            refinance_costs_pct: dec!(1),
            valuation_cap_rate_pct: dec!(8),
        });
        let s = schedule(&deal, None);
        assert_eq!(s.balance_repaid_at(YearKey(2)), Decimal::ZERO);
        assert_eq!(s.closing_balance(YearKey(2)), dec!(6_000_000));
    }

    #[test]
    fn test_unlevered_deal_has_zero_schedule() {
        let mut deal = levered_deal(Amortisation::InterestOnly);
        deal.assumptions.debt = None;
        let s = schedule(&deal, None);
        assert_eq!(s.initial_loan, Decimal::ZERO);
        assert!(s.periods.iter().all(|p| p.closing_balance.is_zero()));
    }

    #[test]
    fn test_oversized_loan_is_an_overflow_error() {
        let mut deal = levered_deal(Amortisation::InterestOnly);
        deal.budget.grand_total = Decimal::MAX;
        deal.assumptions.debt.as_mut().unwrap().loan_to_cost = dec!(2);
        let result = project_debt(&deal, YearKey(5), None, &mut Vec::new());
        assert!(matches!(result, Err(UnderwritingError::Overflow { .. })));
    }

    #[test]
    fn test_horizon_beyond_cap_rejected() {
        let deal = levered_deal(Amortisation::InterestOnly);
        let result = project_debt(&deal, YearKey(u32::MAX), None, &mut Vec::new());
        assert!(matches!(result, Err(UnderwritingError::InvalidInput { .. })));
    }

    #[test]
    fn test_zero_term_rejected() {
        let deal = levered_deal(Amortisation::Level { years: 0 });
        let mut warnings = Vec::new();
        let result = project_debt(&deal, YearKey(5), None, &mut warnings);
        assert!(matches!(result, Err(UnderwritingError::InvalidInput { .. })));
    }
}
