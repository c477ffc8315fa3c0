use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::deal::{Deal, ExitStrategy, RefinanceParams, SaleParams};
use crate::error::UnderwritingError;
use crate::financing::{project_debt, DebtSchedule};
use crate::projection::{project_pnl, PnlStatement};
use crate::series::YearKey;
use crate::types::{with_metadata, ComputationOutput, Money, Rate};
use crate::UnderwritingResult;

/// LTV (percent) above which a refinance is flagged as aggressive
const HIGH_LTV_WARNING_PCT: Decimal = dec!(80);

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Price and costs of a sale valued off one year's EBITDA.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleValuation {
    pub estimated_sale_price: Money,
    pub selling_costs: Money,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefinanceValuation {
    pub property_value: Money,
    pub new_loan_amount: Money,
    pub refinance_costs: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleSummary {
    pub exit_year: YearKey,
    /// P&L EBITDA in the exit year
    pub reference_ebitda: Money,
    pub exit_cap_rate_pct: Decimal,
    pub estimated_sale_price: Money,
    pub selling_costs: Money,
    /// Loan repaid from the proceeds; zero for an unlevered deal
    pub outstanding_loan_balance: Money,
    pub net_sale_proceeds: Money,
    pub total_project_cost: Money,
    pub development_profit: Money,
    /// Reference EBITDA / project cost
    pub yield_on_cost: Option<Rate>,
    /// Development profit / project cost
    pub profit_on_cost: Option<Rate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefinanceSummary {
    pub refinance_year: YearKey,
    pub reference_ebitda: Money,
    pub valuation_cap_rate_pct: Decimal,
    pub property_value: Money,
    pub ltv_at_refinance: Decimal,
    pub new_loan_amount: Money,
    pub refinance_costs: Money,
    pub existing_loan_balance: Money,
    pub net_cash_out: Money,
    pub total_project_cost: Money,
    /// New loan / property value
    pub loan_to_value: Option<Rate>,
    pub yield_on_cost: Option<Rate>,
}

// ---------------------------------------------------------------------------
// Valuation
// ---------------------------------------------------------------------------

/// `price = EBITDA / (cap / 100)`, selling costs a percentage of price.
/// Each amount is rounded to cents before the next is derived from it.
pub fn sale_valuation(
    params: &SaleParams,
    reference_ebitda: Money,
) -> UnderwritingResult<SaleValuation> {
    let price = capitalise(reference_ebitda, params.exit_cap_rate_pct, "sale")?;
    Ok(SaleValuation {
        estimated_sale_price: price,
        selling_costs: percent_of(price, params.selling_costs_pct, "selling costs")?,
    })
}

/// Property value from EBITDA at the valuation cap rate, loan at LTV.
pub fn refinance_valuation(
    params: &RefinanceParams,
    reference_ebitda: Money,
) -> UnderwritingResult<RefinanceValuation> {
    let value = capitalise(reference_ebitda, params.valuation_cap_rate_pct, "refinance")?;
    let new_loan = percent_of(value, params.ltv_at_refinance, "refinance loan")?;
    Ok(RefinanceValuation {
        property_value: value,
        new_loan_amount: new_loan,
        refinance_costs: percent_of(new_loan, params.refinance_costs_pct, "refinance costs")?,
    })
}

fn percent_of(amount: Money, pct: Decimal, context: &str) -> UnderwritingResult<Money> {
    amount
        .checked_mul(pct)
        .map(|v| (v / dec!(100)).round_dp(2))
        .ok_or_else(|| UnderwritingError::overflow(context))
}

fn capitalise(ebitda: Money, cap_rate_pct: Decimal, event: &str) -> UnderwritingResult<Money> {
    if cap_rate_pct <= Decimal::ZERO {
        return Err(UnderwritingError::CannotValue(format!(
            "{event} cap rate must be positive, got {cap_rate_pct}%"
        )));
    }
    if ebitda <= Decimal::ZERO {
        return Err(UnderwritingError::CannotValue(format!(
            "{event} reference EBITDA must be positive, got {ebitda}"
        )));
    }
    ebitda
        .checked_div(cap_rate_pct / dec!(100))
        .map(|value| value.round_dp(2))
        .ok_or_else(|| UnderwritingError::Overflow {
            context: format!("{event} valuation"),
        })
}

// ---------------------------------------------------------------------------
// Summaries
// ---------------------------------------------------------------------------

/// Sale summary for `exit_settings` applied to `deal`.
///
/// The EBITDA referenced is the P&L's EBITDA in the exit year, and the
/// outstanding loan is whatever the debt schedule repays in that year.
pub fn calculate_sale_summary(
    exit_settings: &ExitStrategy,
    project_cost: Money,
    deal: &Deal,
) -> UnderwritingResult<ComputationOutput<SaleSummary>> {
    let start = Instant::now();
    let mut warnings: Vec<String> = Vec::new();

    let ExitStrategy::Sale(params) = exit_settings else {
        return Err(UnderwritingError::InvalidInput {
            field: "exit_settings".into(),
            reason: "Sale summary requires a SALE exit strategy".into(),
        });
    };

    let deal = with_exit(deal, exit_settings);
    let pnl = project_pnl(&deal, &mut warnings)?;
    let debt = project_debt(&deal, pnl.horizon, None, &mut warnings)?;
    let summary = summarise_sale(params, project_cost, &pnl, &debt)?;

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Sale Exit (EBITDA capitalised at exit cap rate)",
        exit_settings,
        warnings,
        elapsed,
        summary,
    ))
}

/// Refinance summary for `exit_settings` applied to `deal`.
pub fn calculate_refinance_summary(
    exit_settings: &ExitStrategy,
    project_cost: Money,
    deal: &Deal,
) -> UnderwritingResult<ComputationOutput<RefinanceSummary>> {
    let start = Instant::now();
    let mut warnings: Vec<String> = Vec::new();

    let ExitStrategy::Refinance(params) = exit_settings else {
        return Err(UnderwritingError::InvalidInput {
            field: "exit_settings".into(),
            reason: "Refinance summary requires a REFINANCE exit strategy".into(),
        });
    };

    let deal = with_exit(deal, exit_settings);
    let pnl = project_pnl(&deal, &mut warnings)?;
    let debt = project_debt(&deal, pnl.horizon, None, &mut warnings)?;
    let summary = summarise_refinance(params, project_cost, &pnl, &debt, &mut warnings)?;

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Refinance (LTV on capitalised EBITDA)",
        exit_settings,
        warnings,
        elapsed,
        summary,
    ))
}

/// `debt` must be the schedule the sale settles.
pub(crate) fn summarise_sale(
    params: &SaleParams,
    project_cost: Money,
    pnl: &PnlStatement,
    debt: &DebtSchedule,
) -> UnderwritingResult<SaleSummary> {
    let exit_year = YearKey(params.exit_year.max(1));
    let reference_ebitda = pnl.ebitda().value_or_zero(exit_year);
    let valuation = sale_valuation(params, reference_ebitda)?;

    let outstanding_loan_balance = debt.balance_repaid_at(exit_year);
    let net_sale_proceeds = valuation
        .estimated_sale_price
        .checked_sub(valuation.selling_costs)
        .and_then(|v| v.checked_sub(outstanding_loan_balance))
        .ok_or_else(|| UnderwritingError::overflow("net sale proceeds"))?;
    let development_profit = net_sale_proceeds
        .checked_sub(project_cost)
        .ok_or_else(|| UnderwritingError::overflow("development profit"))?;

    Ok(SaleSummary {
        exit_year,
        reference_ebitda,
        exit_cap_rate_pct: params.exit_cap_rate_pct,
        estimated_sale_price: valuation.estimated_sale_price,
        selling_costs: valuation.selling_costs,
        outstanding_loan_balance,
        net_sale_proceeds,
        total_project_cost: project_cost,
        development_profit,
        yield_on_cost: on_cost(reference_ebitda, project_cost),
        profit_on_cost: on_cost(development_profit, project_cost),
    })
}

/// `debt` must be the schedule without the refinance swap, so its closing
/// balance at the refinance year is the loan being replaced.
pub(crate) fn summarise_refinance(
    params: &RefinanceParams,
    project_cost: Money,
    pnl: &PnlStatement,
    debt: &DebtSchedule,
    warnings: &mut Vec<String>,
) -> UnderwritingResult<RefinanceSummary> {
    let refinance_year = YearKey(params.refinance_year.max(1));
    let reference_ebitda = pnl.ebitda().value_or_zero(refinance_year);
    let valuation = refinance_valuation(params, reference_ebitda)?;

    if params.ltv_at_refinance > HIGH_LTV_WARNING_PCT {
        warnings.push(format!(
            "Refinance LTV of {}% exceeds {}%",
            params.ltv_at_refinance, HIGH_LTV_WARNING_PCT
        ));
    }

    let existing_loan_balance = debt.closing_balance(refinance_year);
    let net_cash_out = valuation
        .new_loan_amount
        .checked_sub(valuation.refinance_costs)
        .and_then(|v| v.checked_sub(existing_loan_balance))
        .ok_or_else(|| UnderwritingError::overflow("refinance net cash out"))?;

    Ok(RefinanceSummary {
        refinance_year,
        reference_ebitda,
        valuation_cap_rate_pct: params.valuation_cap_rate_pct,
        property_value: valuation.property_value,
        ltv_at_refinance: params.ltv_at_refinance,
        new_loan_amount: valuation.new_loan_amount,
        refinance_costs: valuation.refinance_costs,
        existing_loan_balance,
        net_cash_out,
        total_project_cost: project_cost,
        loan_to_value: on_cost(valuation.new_loan_amount, valuation.property_value),
        yield_on_cost: on_cost(reference_ebitda, project_cost),
    })
}

fn on_cost(amount: Money, cost: Money) -> Option<Rate> {
    if cost.is_zero() {
        None
    } else {
        amount.checked_div(cost)
    }
}

fn with_exit(deal: &Deal, exit_settings: &ExitStrategy) -> Deal {
    let mut deal = deal.clone();
    deal.assumptions.exit_settings = exit_settings.clone();
    deal
}
