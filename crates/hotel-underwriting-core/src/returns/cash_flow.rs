use log::{debug, warn};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::deal::{Deal, ExitStrategy};
use crate::error::UnderwritingError;
use crate::financing::{project_debt, DebtSchedule};
use crate::projection::{project_pnl, PnlStatement, RowKind};
use crate::series::{YearKey, YearSeries};
use crate::time_value::{solve_irr, IrrOutcome, SolverConfig};
use crate::types::{with_metadata, ComputationOutput, Money, Multiple};
use crate::UnderwritingResult;

use super::exit::{summarise_refinance, summarise_sale, RefinanceSummary, SaleSummary};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CashFlowSection {
    /// Reference figures carried from the P&L
    Memo,
    Unlevered,
    Levered,
}

/// One cash-flow line. `None` marks a value that does not exist for that
/// year (IRR outside y1, sale proceeds that could not be valued).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CashFlowRow {
    pub id: String,
    pub label: String,
    pub section: CashFlowSection,
    pub kind: RowKind,
    pub values: YearSeries<Option<Money>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CashFlowStatement {
    pub rows: Vec<CashFlowRow>,
    /// Sale or refinance year; `None` when the deal is held
    pub exit_year: Option<YearKey>,
    pub unlevered_irr: IrrOutcome,
    pub levered_irr: IrrOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sale: Option<SaleSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refinance: Option<RefinanceSummary>,
}

impl CashFlowStatement {
    pub fn row(&self, id: &str) -> Option<&CashFlowRow> {
        self.rows.iter().find(|r| r.id == id)
    }
}

/// IRRs over a (possibly truncated) horizon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectIrrs {
    pub through_year: YearKey,
    pub unlevered_irr: IrrOutcome,
    pub levered_irr: IrrOutcome,
    /// Levered distributions / levered equity invested
    pub equity_multiple: Option<Multiple>,
}

pub mod row_ids {
    pub const EBITDA: &str = "ebitda";
    pub const INCOME_TAX: &str = "income-tax";
    pub const DEBT_BALANCE: &str = "debt-balance";
    pub const INITIAL_INVESTMENT: &str = "initial-investment";
    pub const TAX_PAID: &str = "tax-paid";
    pub const ONGOING_CAPEX: &str = "ongoing-capex";
    pub const SALE_PROCEEDS: &str = "sale-proceeds";
    pub const UNLEVERED_CASH_FLOW: &str = "unlevered-cash-flow";
    pub const UNLEVERED_IRR: &str = "unlevered-irr";
    pub const DEBT_DRAWDOWN: &str = "debt-drawdown";
    pub const INTEREST_EXPENSE: &str = "interest-expense";
    pub const PRINCIPAL_REPAYMENT: &str = "principal-repayment";
    pub const REFINANCE_PROCEEDS: &str = "refinance-proceeds";
    pub const LEVERED_CASH_FLOW: &str = "levered-cash-flow";
    pub const LEVERED_IRR: &str = "levered-irr";
}

// ---------------------------------------------------------------------------
// Projection
// ---------------------------------------------------------------------------

/// Every signed cash-flow line before it is laid out as rows.
struct CashFlowProjection {
    pnl: PnlStatement,
    debt: DebtSchedule,
    exit_year: Option<YearKey>,
    initial_investment: YearSeries<Money>,
    tax_paid: YearSeries<Money>,
    ongoing_capex: YearSeries<Money>,
    sale_proceeds: YearSeries<Option<Money>>,
    unlevered: YearSeries<Money>,
    debt_drawdown: YearSeries<Money>,
    interest: YearSeries<Money>,
    principal: YearSeries<Money>,
    refinance_proceeds: YearSeries<Option<Money>>,
    levered: YearSeries<Money>,
    sale: Option<SaleSummary>,
    refinance: Option<RefinanceSummary>,
}

fn project_cash_flows(
    deal: &Deal,
    warnings: &mut Vec<String>,
) -> UnderwritingResult<CashFlowProjection> {
    let pnl = project_pnl(deal, warnings)?;
    let horizon = pnl.horizon;
    let grand_total = deal.budget.grand_total;
    let exit = &deal.assumptions.exit_settings;
    let exit_year = exit.event_year();

    // Debt as it runs without a refinance, used to size the loan being replaced
    let base_debt = project_debt(deal, horizon, None, warnings)?;

    let mut sale: Option<SaleSummary> = None;
    let mut refinance: Option<RefinanceSummary> = None;
    match exit {
        ExitStrategy::Sale(params) => {
            match summarise_sale(params, grand_total, &pnl, &base_debt) {
                Ok(summary) => sale = Some(summary),
                Err(UnderwritingError::CannotValue(reason)) => {
                    warnings.push(format!(
                        "Sale could not be valued ({reason}); no proceeds included"
                    ));
                }
                Err(e) => return Err(e),
            }
        }
        ExitStrategy::Refinance(params) => {
            match summarise_refinance(params, grand_total, &pnl, &base_debt, warnings) {
                Ok(summary) => refinance = Some(summary),
                Err(UnderwritingError::CannotValue(reason)) => {
                    warnings.push(format!(
                        "Refinance could not be valued ({reason}); existing loan kept"
                    ));
                }
                Err(e) => return Err(e),
            }
        }
        ExitStrategy::HoldForever => {}
    }

    let debt = match &refinance {
        Some(summary) => project_debt(deal, horizon, Some(summary.new_loan_amount), warnings)?,
        None => base_debt,
    };

    let total_revenue = pnl.total_revenue();
    let ebitda = pnl.ebitda();
    let capex_pct = deal.assumptions.capex.ongoing_capex_pct;

    let initial_investment = YearSeries::from_fn(horizon, |y| {
        if y.is_pre_operating() {
            outflow(grand_total)
        } else {
            Decimal::ZERO
        }
    });
    let tax_paid = pnl.income_tax.map(|_, tax| outflow(*tax));
    let ongoing_capex = YearSeries::try_from_fn(horizon, |y| {
        total_revenue
            .value_or_zero(y)
            .checked_mul(capex_pct)
            .map(outflow)
            .ok_or_else(|| UnderwritingError::overflow(format!("ongoing capex at {y}")))
    })?;

    let event_cell = |amount: Option<Money>| {
        YearSeries::from_fn(horizon, |y| {
            if Some(y) == exit_year {
                amount
            } else {
                Some(Decimal::ZERO)
            }
        })
    };
    let sale_proceeds = match exit {
        // Unlevered proceeds: the loan payoff sits in the levered section
        ExitStrategy::Sale(_) => event_cell(
            sale.as_ref()
                .and_then(|s| s.estimated_sale_price.checked_sub(s.selling_costs)),
        ),
        _ => event_cell(Some(Decimal::ZERO)),
    };
    let refinance_proceeds = match exit {
        ExitStrategy::Refinance(_) => event_cell(Some(
            refinance.as_ref().map(|r| r.net_cash_out).unwrap_or(Decimal::ZERO),
        )),
        _ => event_cell(Some(Decimal::ZERO)),
    };

    let unlevered = YearSeries::try_from_fn(horizon, |y| {
        sum_cells(
            &[
                ebitda.value_or_zero(y),
                tax_paid.value_or_zero(y),
                ongoing_capex.value_or_zero(y),
                initial_investment.value_or_zero(y),
                cell_or_zero(&sale_proceeds, y),
            ],
            "unlevered cash flow",
            y,
        )
    })?;

    let debt_drawdown = YearSeries::from_fn(horizon, |y| {
        if y.is_pre_operating() {
            debt.initial_loan
        } else {
            Decimal::ZERO
        }
    });
    let interest = debt.series(|p| outflow(p.interest));
    let refinance_year = refinance.as_ref().map(|r| r.refinance_year);
    let principal = debt.series(|p| {
        // A refinance payoff is netted inside the refinance proceeds
        if Some(p.year) == refinance_year || p.event_repayment.is_zero() {
            outflow(p.scheduled_principal)
        } else {
            // Instalment plus payoff clears the opening balance
            outflow(p.opening_balance)
        }
    });

    let levered = YearSeries::try_from_fn(horizon, |y| {
        sum_cells(
            &[
                unlevered.value_or_zero(y),
                debt_drawdown.value_or_zero(y),
                interest.value_or_zero(y),
                principal.value_or_zero(y),
                cell_or_zero(&refinance_proceeds, y),
            ],
            "levered cash flow",
            y,
        )
    })?;

    Ok(CashFlowProjection {
        pnl,
        debt,
        exit_year,
        initial_investment,
        tax_paid,
        ongoing_capex,
        sale_proceeds,
        unlevered,
        debt_drawdown,
        interest,
        principal,
        refinance_proceeds,
        levered,
        sale,
        refinance,
    })
}

/// Cash paid out, as a negative amount. Zero stays unsigned.
fn outflow(amount: Money) -> Money {
    if amount.is_zero() {
        Decimal::ZERO
    } else {
        -amount
    }
}

fn cell_or_zero(series: &YearSeries<Option<Money>>, year: YearKey) -> Money {
    series.get(year).copied().flatten().unwrap_or(Decimal::ZERO)
}

fn sum_cells(cells: &[Money], context: &str, year: YearKey) -> UnderwritingResult<Money> {
    cells
        .iter()
        .try_fold(Decimal::ZERO, |acc, cell| acc.checked_add(*cell))
        .ok_or_else(|| UnderwritingError::overflow(format!("{context} at {year}")))
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Memo, unlevered and levered cash flows for the deal, with IRRs over the
/// full horizon shown in y1 of the IRR rows.
pub fn build_cash_flow_statement(
    deal: &Deal,
) -> UnderwritingResult<ComputationOutput<CashFlowStatement>> {
    let start = Instant::now();
    let mut warnings: Vec<String> = Vec::new();

    let projection = project_cash_flows(deal, &mut warnings)?;
    let config = SolverConfig::default();
    let unlevered_irr = solve_irr(projection.unlevered.values(), &config);
    let levered_irr = solve_irr(projection.levered.values(), &config);
    flag_irr("Unlevered", unlevered_irr, &mut warnings);
    flag_irr("Levered", levered_irr, &mut warnings);

    let rows = layout_rows(&projection, unlevered_irr, levered_irr);
    debug!(
        "cash flow statement for deal '{}': {} rows, exit {:?}",
        deal.id,
        rows.len(),
        projection.exit_year
    );

    let statement = CashFlowStatement {
        rows,
        exit_year: projection.exit_year,
        unlevered_irr,
        levered_irr,
        sale: projection.sale,
        refinance: projection.refinance,
    };

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Hotel Cash Flow Statement (unlevered and levered)",
        &deal.assumptions,
        warnings,
        elapsed,
        statement,
    ))
}

/// IRRs over `y0..=y{through_year_index}`, for "what if we exit earlier".
/// An index past the horizon uses the whole horizon.
pub fn compute_project_irrs_with_horizon(
    deal: &Deal,
    through_year_index: u32,
) -> UnderwritingResult<ComputationOutput<ProjectIrrs>> {
    let start = Instant::now();
    let mut warnings: Vec<String> = Vec::new();

    let projection = project_cash_flows(deal, &mut warnings)?;
    let through = YearKey(through_year_index.min(projection.pnl.horizon.0));
    let unlevered = projection.unlevered.through(through);
    let levered = projection.levered.through(through);

    let config = SolverConfig::default();
    let unlevered_irr = solve_irr(unlevered.values(), &config);
    let levered_irr = solve_irr(levered.values(), &config);
    flag_irr("Unlevered", unlevered_irr, &mut warnings);
    flag_irr("Levered", levered_irr, &mut warnings);

    let result = ProjectIrrs {
        through_year: through,
        unlevered_irr,
        levered_irr,
        equity_multiple: equity_multiple(levered.values()),
    };

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Project IRR (Newton-Raphson on annual cash flows)",
        &serde_json::json!({
            "dealId": deal.id,
            "throughYearIndex": through_year_index,
        }),
        warnings,
        elapsed,
        result,
    ))
}

/// IRRs over the whole projection horizon.
pub fn compute_project_irrs(deal: &Deal) -> UnderwritingResult<ComputationOutput<ProjectIrrs>> {
    compute_project_irrs_with_horizon(deal, u32::MAX)
}

/// Sum of inflows over sum of outflows; `None` when nothing was invested or
/// the sums leave the Decimal range.
pub fn equity_multiple(cash_flows: &[Money]) -> Option<Multiple> {
    let mut invested = Decimal::ZERO;
    let mut returned = Decimal::ZERO;
    for cf in cash_flows {
        if *cf < Decimal::ZERO {
            invested = invested.checked_sub(*cf)?;
        } else {
            returned = returned.checked_add(*cf)?;
        }
    }
    if invested.is_zero() {
        return None;
    }
    returned.checked_div(invested)
}

fn flag_irr(stream: &str, outcome: IrrOutcome, warnings: &mut Vec<String>) {
    match outcome {
        IrrOutcome::Rate(_) => {}
        IrrOutcome::Undefined => warnings.push(format!(
            "{stream} IRR undefined: cash flows never change sign"
        )),
        IrrOutcome::NonConvergent => {
            warn!("{stream} IRR did not converge");
            warnings.push(format!("{stream} IRR did not converge"));
        }
    }
}

// ---------------------------------------------------------------------------
// Row layout
// ---------------------------------------------------------------------------

fn layout_rows(
    p: &CashFlowProjection,
    unlevered_irr: IrrOutcome,
    levered_irr: IrrOutcome,
) -> Vec<CashFlowRow> {
    use row_ids::*;
    use CashFlowSection::*;
    use RowKind::{Line, Total};

    let horizon = p.pnl.horizon;
    let row = |id: &str, label: &str, section, kind, values| CashFlowRow {
        id: id.to_string(),
        label: label.to_string(),
        section,
        kind,
        values,
    };
    let known = |series: &YearSeries<Money>| series.map(|_, v| Some(*v));
    // IRR is not a per-year quantity; only y1 carries it
    let irr_cells = |outcome: IrrOutcome| {
        YearSeries::from_fn(horizon, |y| if y == YearKey(1) { outcome.rate() } else { None })
    };
    let debt_balance = known(&p.debt.series(|d| d.closing_balance));

    vec![
        row(EBITDA, "EBITDA", Memo, Line, known(&p.pnl.ebitda())),
        row(INCOME_TAX, "Income Tax", Memo, Line, known(&p.pnl.income_tax)),
        row(DEBT_BALANCE, "Closing Debt Balance", Memo, Line, debt_balance),
        row(
            INITIAL_INVESTMENT,
            "Initial Investment",
            Unlevered,
            Line,
            known(&p.initial_investment),
        ),
        row(TAX_PAID, "Tax Paid", Unlevered, Line, known(&p.tax_paid)),
        row(ONGOING_CAPEX, "Ongoing Capex", Unlevered, Line, known(&p.ongoing_capex)),
        row(SALE_PROCEEDS, "Net Sale Proceeds", Unlevered, Line, p.sale_proceeds.clone()),
        row(UNLEVERED_CASH_FLOW, "Unlevered Cash Flow", Unlevered, Total, known(&p.unlevered)),
        row(UNLEVERED_IRR, "Unlevered IRR", Unlevered, Line, irr_cells(unlevered_irr)),
        row(DEBT_DRAWDOWN, "Debt Drawdown", Levered, Line, known(&p.debt_drawdown)),
        row(INTEREST_EXPENSE, "Interest Expense", Levered, Line, known(&p.interest)),
        row(PRINCIPAL_REPAYMENT, "Principal Repayment", Levered, Line, known(&p.principal)),
        row(
            REFINANCE_PROCEEDS,
            "Refinance Proceeds (net)",
            Levered,
            Line,
            p.refinance_proceeds.clone(),
        ),
        row(LEVERED_CASH_FLOW, "Levered Cash Flow", Levered, Total, known(&p.levered)),
        row(LEVERED_IRR, "Levered IRR", Levered, Line, irr_cells(levered_irr)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deal::{Amortisation, DebtTerms, RefinanceParams, RoomConfig, SaleParams};
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    /// EBITDA of exactly 1,000,000 in every operating year.
    fn flat_deal() -> Deal {
        let mut deal = Deal {
            id: "cf-test".into(),
            rooms: RoomConfig {
                keys: 100,
                operating_days: 365,
            },
            ..Deal::default()
        };
        deal.budget.grand_total = dec!(10_000_000);
        deal.assumptions.projection_years = 10;
        deal.assumptions.revenue.base_adr = dec!(40);
        deal.assumptions.revenue.stabilized_occupancy = Decimal::ONE;
        deal.assumptions.operating.admin_general_par = dec!(4600);
        deal
    }

    fn sale_at(year: u32) -> ExitStrategy {
        ExitStrategy::Sale(SaleParams {
            exit_year: year,
            exit_cap_rate_pct: dec!(10),
            selling_costs_pct: dec!(2),
        })
    }

    fn value(statement: &CashFlowStatement, id: &str, year: u32) -> Option<Money> {
        statement.row(id).unwrap().values.get(YearKey(year)).copied().flatten()
    }

    #[test]
    fn test_hold_forever_unlevered() {
        let out = build_cash_flow_statement(&flat_deal()).unwrap();
        let s = &out.result;
        assert_eq!(s.exit_year, None);
        assert_eq!(value(s, row_ids::UNLEVERED_CASH_FLOW, 0), Some(dec!(-10_000_000)));
        assert_eq!(value(s, row_ids::UNLEVERED_CASH_FLOW, 1), Some(dec!(1_000_000)));
        // Ten years at 10% on cost only just hands the cost back
        assert!(s.unlevered_irr.rate().unwrap().abs() < dec!(0.000001));
        assert_eq!(s.levered_irr, s.unlevered_irr);
    }

    #[test]
    fn test_sale_proceeds_at_exit_year() {
        let mut deal = flat_deal();
        deal.assumptions.exit_settings = sale_at(5);
        let s = build_cash_flow_statement(&deal).unwrap().result;

        assert_eq!(s.exit_year, Some(YearKey(5)));
        // 10,000,000 price less 2% costs
        assert_eq!(value(&s, row_ids::SALE_PROCEEDS, 5), Some(dec!(9_800_000)));
        assert_eq!(value(&s, row_ids::UNLEVERED_CASH_FLOW, 5), Some(dec!(10_800_000)));
        for year in 6..=10 {
            assert_eq!(value(&s, row_ids::UNLEVERED_CASH_FLOW, year), Some(Decimal::ZERO));
        }
        let rate = s.unlevered_irr.rate().unwrap();
        assert!(rate > dec!(0.09) && rate < dec!(0.10), "got {rate}");
    }

    #[test]
    fn test_irr_rows_only_in_year_one() {
        let mut deal = flat_deal();
        deal.assumptions.exit_settings = sale_at(5);
        let s = build_cash_flow_statement(&deal).unwrap().result;
        assert_eq!(value(&s, row_ids::UNLEVERED_IRR, 1), s.unlevered_irr.rate());
        assert_eq!(value(&s, row_ids::UNLEVERED_IRR, 0), None);
        assert_eq!(value(&s, row_ids::LEVERED_IRR, 2), None);
    }

    #[test]
    fn test_levered_section_with_interest_only_loan() {
        let mut deal = flat_deal();
        deal.assumptions.exit_settings = sale_at(5);
        deal.assumptions.debt = Some(DebtTerms {
            loan_to_cost: dec!(0.5),
            interest_rate: dec!(0.06),
            amortisation: Amortisation::InterestOnly,
        });
        let s = build_cash_flow_statement(&deal).unwrap().result;

        assert_eq!(value(&s, row_ids::LEVERED_CASH_FLOW, 0), Some(dec!(-5_000_000)));
        assert_eq!(value(&s, row_ids::LEVERED_CASH_FLOW, 1), Some(dec!(700_000)));
        assert_eq!(value(&s, row_ids::PRINCIPAL_REPAYMENT, 5), Some(dec!(-5_000_000)));
        assert_eq!(value(&s, row_ids::LEVERED_CASH_FLOW, 5), Some(dec!(5_500_000)));
        assert!(s.levered_irr.rate().unwrap() > s.unlevered_irr.rate().unwrap());
    }

    #[test]
    fn test_refinance_only_touches_levered() {
        let mut deal = flat_deal();
        deal.assumptions.debt = Some(DebtTerms {
            loan_to_cost: dec!(0.4),
            interest_rate: dec!(0.05),
            amortisation: Amortisation::InterestOnly,
        });
        deal.assumptions.exit_settings = ExitStrategy::Refinance(RefinanceParams {
            refinance_year: 3,
            ltv_at_refinance: dec!(60),
            refinance_costs_pct: dec!(1),
            valuation_cap_rate_pct: dec!(10),
        });
        let s = build_cash_flow_statement(&deal).unwrap().result;

        assert_eq!(s.exit_year, Some(YearKey(3)));
        assert_eq!(value(&s, row_ids::SALE_PROCEEDS, 3), Some(Decimal::ZERO));
        assert_eq!(value(&s, row_ids::UNLEVERED_CASH_FLOW, 3), Some(dec!(1_000_000)));
        // 6.0m new loan, 60k costs, 4.0m repaid
        assert_eq!(value(&s, row_ids::REFINANCE_PROCEEDS, 3), Some(dec!(1_940_000)));
        assert_eq!(value(&s, row_ids::PRINCIPAL_REPAYMENT, 3), Some(Decimal::ZERO));
        // Interest on the new 6.0m loan from y4
        assert_eq!(value(&s, row_ids::INTEREST_EXPENSE, 4), Some(dec!(-300_000)));
        assert_eq!(value(&s, row_ids::DEBT_BALANCE, 3), Some(dec!(6_000_000)));
        assert!(s.refinance.is_some());
    }

    #[test]
    fn test_unvaluable_sale_leaves_gap_and_warns() {
        let mut deal = flat_deal();
        deal.assumptions.exit_settings = ExitStrategy::Sale(SaleParams {
            exit_year: 5,
            exit_cap_rate_pct: Decimal::ZERO,
            selling_costs_pct: dec!(2),
        });
        let out = build_cash_flow_statement(&deal).unwrap();
        assert_eq!(value(&out.result, row_ids::SALE_PROCEEDS, 5), None);
        assert_eq!(value(&out.result, row_ids::UNLEVERED_CASH_FLOW, 5), Some(dec!(1_000_000)));
        assert!(out.warnings.iter().any(|w| w.contains("could not be valued")));
        assert!(out.result.sale.is_none());
    }

    #[test]
    fn test_truncated_horizon_irrs() {
        let mut deal = flat_deal();
        deal.assumptions.exit_settings = sale_at(5);
        let full = compute_project_irrs(&deal).unwrap().result;
        assert_eq!(full.through_year, YearKey(10));

        // Cutting before the sale removes the proceeds
        let early = compute_project_irrs_with_horizon(&deal, 3).unwrap().result;
        assert_eq!(early.through_year, YearKey(3));
        assert!(early.unlevered_irr.rate().unwrap() < full.unlevered_irr.rate().unwrap());

        let y0_only = compute_project_irrs_with_horizon(&deal, 0).unwrap();
        assert_eq!(y0_only.result.unlevered_irr, IrrOutcome::Undefined);
        assert!(!y0_only.warnings.is_empty());
    }

    #[test]
    fn test_equity_multiple() {
        assert_eq!(equity_multiple(&[dec!(-100), dec!(50), dec!(200)]), Some(dec!(2.5)));
        assert_eq!(equity_multiple(&[dec!(10), dec!(20)]), None);
    }
}
