use log::debug;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::deal::Deal;
use crate::error::UnderwritingError;
use crate::series::{YearKey, YearSeries};
use crate::types::{with_metadata, ComputationOutput, Money, Rate};
use crate::UnderwritingResult;

use super::drivers::{build_macro_indices, exit_year_index, MacroIndices};
use super::revenue::{build_revenue_drivers, RevenueDrivers};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// USALI display group of a P&L row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlGroup {
    Revenue,
    Direct,
    Undistributed,
    Fixed,
    Summary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RowKind {
    Line,
    Subtotal,
    Total,
    /// Header row; carries no values
    Section,
}

/// One year of one P&L row. Ratios are `None` when their denominator is zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlCell {
    pub total: Money,
    pub pct_of_tr: Option<Rate>,
    pub por: Option<Money>,
    pub par: Option<Money>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlRow {
    pub id: String,
    pub label: String,
    pub group: PlGroup,
    pub kind: RowKind,
    pub values: YearSeries<PlCell>,
}

impl PlRow {
    /// Absolute totals by year.
    pub fn totals(&self) -> YearSeries<Money> {
        self.values.map(|_, cell| cell.total)
    }
}

/// Complete operating statement over the projection horizon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PnlStatement {
    pub horizon: YearKey,
    /// Sale year; every later year is zero
    pub exit_year: Option<YearKey>,
    pub rows: Vec<PlRow>,
    pub drivers: RevenueDrivers,
    /// Tax charged on positive EBITDA, zero after exit
    pub income_tax: YearSeries<Money>,
}

impl PnlStatement {
    pub fn row(&self, id: &str) -> Option<&PlRow> {
        self.rows.iter().find(|r| r.id == id)
    }

    pub fn ebitda(&self) -> YearSeries<Money> {
        self.row(row_ids::EBITDA)
            .map(PlRow::totals)
            .unwrap_or_else(|| YearSeries::zeros(self.horizon))
    }

    pub fn total_revenue(&self) -> YearSeries<Money> {
        self.row(row_ids::TOTAL_REVENUE)
            .map(PlRow::totals)
            .unwrap_or_else(|| YearSeries::zeros(self.horizon))
    }
}

/// Stable row identifiers used for UI diffing and lookups.
pub mod row_ids {
    pub const ROOMS_REVENUE: &str = "rooms-revenue";
    pub const FB_REVENUE: &str = "fb-revenue";
    pub const OTHER_REVENUE: &str = "other-revenue";
    pub const TOTAL_REVENUE: &str = "total-revenue";
    pub const ROOMS_EXPENSE: &str = "rooms-expense";
    pub const FB_EXPENSE: &str = "fb-expense";
    pub const OTHER_EXPENSE: &str = "other-expense";
    pub const TOTAL_DEPARTMENTAL: &str = "total-departmental-expenses";
    pub const DEPARTMENTAL_PROFIT: &str = "departmental-profit";
    pub const ADMIN_GENERAL: &str = "admin-general";
    pub const SALES_MARKETING: &str = "sales-marketing";
    pub const UTILITIES: &str = "utilities";
    pub const MAINTENANCE: &str = "maintenance";
    pub const TOTAL_UNDISTRIBUTED: &str = "total-undistributed";
    pub const GOI: &str = "goi";
    pub const MANAGEMENT_FEE: &str = "management-fee";
    pub const INSURANCE: &str = "insurance";
    pub const PROPERTY_TAX: &str = "property-tax";
    pub const FFE_RESERVE: &str = "ffe-reserve";
    pub const TOTAL_FIXED: &str = "total-fixed";
    pub const EBITDA: &str = "ebitda";
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Build the USALI operating statement for a deal.
pub fn build_pnl(deal: &Deal) -> UnderwritingResult<ComputationOutput<PnlStatement>> {
    let start = Instant::now();
    let mut warnings: Vec<String> = Vec::new();

    let statement = project_pnl(deal, &mut warnings)?;

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "USALI Operating Statement (ramped, inflation-indexed)",
        &deal.assumptions,
        warnings,
        elapsed,
        statement,
    ))
}

/// Statement without the output envelope, for builders further down the chain.
pub fn project_pnl(deal: &Deal, warnings: &mut Vec<String>) -> UnderwritingResult<PnlStatement> {
    let indices = build_macro_indices(deal, warnings)?;
    let drivers = build_revenue_drivers(deal, &indices, warnings)?;
    let exit_year = exit_year_index(deal);

    debug!(
        "projecting P&L for deal '{}' through {} (exit {:?})",
        deal.id, indices.horizon, exit_year
    );

    let lines = OperatingLines::compute(deal, &indices, &drivers, exit_year)?;
    let rows = lines.to_rows(&drivers);

    let tax_rate = deal.assumptions.tax.income_tax_rate;
    let income_tax = YearSeries::try_from_fn(indices.horizon, |y| {
        lines
            .ebitda
            .value_or_zero(y)
            .max(Decimal::ZERO)
            .checked_mul(tax_rate)
            .ok_or_else(|| UnderwritingError::overflow(format!("income tax at {y}")))
    })?;

    Ok(PnlStatement {
        horizon: indices.horizon,
        exit_year,
        rows,
        drivers,
        income_tax,
    })
}

// ---------------------------------------------------------------------------
// Line computation
// ---------------------------------------------------------------------------

/// Absolute amounts for every line. Costs are positive; subtotals subtract.
struct OperatingLines {
    rooms_revenue: YearSeries<Money>,
    fb_revenue: YearSeries<Money>,
    other_revenue: YearSeries<Money>,
    total_revenue: YearSeries<Money>,
    rooms_expense: YearSeries<Money>,
    fb_expense: YearSeries<Money>,
    other_expense: YearSeries<Money>,
    total_departmental: YearSeries<Money>,
    departmental_profit: YearSeries<Money>,
    admin_general: YearSeries<Money>,
    sales_marketing: YearSeries<Money>,
    utilities: YearSeries<Money>,
    maintenance: YearSeries<Money>,
    total_undistributed: YearSeries<Money>,
    goi: YearSeries<Money>,
    management_fee: YearSeries<Money>,
    insurance: YearSeries<Money>,
    property_tax: YearSeries<Money>,
    ffe_reserve: YearSeries<Money>,
    total_fixed: YearSeries<Money>,
    ebitda: YearSeries<Money>,
}

/// y1 through the sale year; y0 is pre-operating and later years belong
/// to the buyer.
struct TradingYears {
    horizon: YearKey,
    exit_year: Option<YearKey>,
}

impl TradingYears {
    fn contains(&self, year: YearKey) -> bool {
        !year.is_pre_operating() && self.exit_year.map_or(true, |exit| year <= exit)
    }

    /// `f` in trading years, zero elsewhere. `None` from `f` is an overflow.
    fn line(
        &self,
        id: &str,
        f: impl Fn(YearKey) -> Option<Money>,
    ) -> UnderwritingResult<YearSeries<Money>> {
        YearSeries::try_from_fn(self.horizon, |y| {
            if !self.contains(y) {
                return Ok(Decimal::ZERO);
            }
            f(y).ok_or_else(|| UnderwritingError::overflow(format!("{id} at {y}")))
        })
    }
}

impl OperatingLines {
    fn compute(
        deal: &Deal,
        indices: &MacroIndices,
        drivers: &RevenueDrivers,
        exit_year: Option<YearKey>,
    ) -> UnderwritingResult<Self> {
        use row_ids::*;

        let years = TradingYears {
            horizon: indices.horizon,
            exit_year,
        };
        let rev = &deal.assumptions.revenue;
        let ops = &deal.assumptions.operating;
        let keys = Decimal::from(deal.rooms.keys);
        let grand_total = deal.budget.grand_total;

        let inflation = |y: YearKey| indices.inflation_index.value_or_zero(y);
        let cost_ramp = |y: YearKey| indices.cost_ramp.get(y).copied().unwrap_or(Decimal::ONE);

        let rooms_revenue = years.line(ROOMS_REVENUE, |y| {
            drivers
                .adr
                .value_or_zero(y)
                .checked_mul(drivers.rooms_sold.value_or_zero(y))
        })?;
        let fb_revenue = years.line(FB_REVENUE, |y| {
            rooms_revenue.value_or_zero(y).checked_mul(rev.food_beverage_ratio)
        })?;
        let other_revenue = years.line(OTHER_REVENUE, |y| {
            rooms_revenue.value_or_zero(y).checked_mul(rev.other_revenue_ratio)
        })?;
        let total_revenue =
            sum_of(TOTAL_REVENUE, &[&rooms_revenue, &fb_revenue, &other_revenue])?;

        let departmental = |id: &str, base: &YearSeries<Money>, pct: Rate| {
            years.line(id, |y| {
                base.value_or_zero(y).checked_mul(pct)?.checked_mul(cost_ramp(y))
            })
        };
        let rooms_expense = departmental(ROOMS_EXPENSE, &rooms_revenue, ops.rooms_cost_pct)?;
        let fb_expense = departmental(FB_EXPENSE, &fb_revenue, ops.food_beverage_cost_pct)?;
        let other_expense = departmental(OTHER_EXPENSE, &other_revenue, ops.other_cost_pct)?;
        let total_departmental =
            sum_of(TOTAL_DEPARTMENTAL, &[&rooms_expense, &fb_expense, &other_expense])?;
        let departmental_profit =
            difference(DEPARTMENTAL_PROFIT, &total_revenue, &total_departmental)?;

        let undistributed = |id: &str, par: Money| {
            years.line(id, |y| {
                par.checked_mul(keys)?
                    .checked_mul(inflation(y))?
                    .checked_mul(cost_ramp(y))
            })
        };
        let admin_general = undistributed(ADMIN_GENERAL, ops.admin_general_par)?;
        let sales_marketing = undistributed(SALES_MARKETING, ops.sales_marketing_par)?;
        let utilities = undistributed(UTILITIES, ops.utilities_par)?;
        let maintenance = undistributed(MAINTENANCE, ops.maintenance_par)?;
        let total_undistributed = sum_of(
            TOTAL_UNDISTRIBUTED,
            &[&admin_general, &sales_marketing, &utilities, &maintenance],
        )?;
        let goi = difference(GOI, &departmental_profit, &total_undistributed)?;

        let management_fee = years.line(MANAGEMENT_FEE, |y| {
            total_revenue.value_or_zero(y).checked_mul(ops.management_fee_pct)
        })?;
        let insurance = years.line(INSURANCE, |y| {
            ops.insurance_par.checked_mul(keys)?.checked_mul(inflation(y))
        })?;
        let property_tax = years.line(PROPERTY_TAX, |y| {
            grand_total
                .checked_mul(ops.property_tax_pct_of_cost)?
                .checked_mul(inflation(y))
        })?;
        let ffe_reserve = years.line(FFE_RESERVE, |y| {
            total_revenue.value_or_zero(y).checked_mul(ops.ffe_reserve_pct)
        })?;
        let total_fixed = sum_of(
            TOTAL_FIXED,
            &[&management_fee, &insurance, &property_tax, &ffe_reserve],
        )?;
        let ebitda = difference(EBITDA, &goi, &total_fixed)?;

        Ok(Self {
            rooms_revenue,
            fb_revenue,
            other_revenue,
            total_revenue,
            rooms_expense,
            fb_expense,
            other_expense,
            total_departmental,
            departmental_profit,
            admin_general,
            sales_marketing,
            utilities,
            maintenance,
            total_undistributed,
            goi,
            management_fee,
            insurance,
            property_tax,
            ffe_reserve,
            total_fixed,
            ebitda,
        })
    }

    fn to_rows(&self, drivers: &RevenueDrivers) -> Vec<PlRow> {
        use row_ids::*;
        use PlGroup::*;
        use RowKind::*;

        let ratios = RatioBases {
            total_revenue: &self.total_revenue,
            rooms_sold: &drivers.rooms_sold,
            rooms_available: &drivers.rooms_available,
        };
        let row = |id: &str, label: &str, group, kind, series: &YearSeries<Money>| PlRow {
            id: id.to_string(),
            label: label.to_string(),
            group,
            kind,
            values: ratios.cells(series),
        };

        vec![
            section("section-revenue", "Revenue", Revenue),
            row(ROOMS_REVENUE, "Rooms", Revenue, Line, &self.rooms_revenue),
            row(FB_REVENUE, "Food & Beverage", Revenue, Line, &self.fb_revenue),
            row(
                OTHER_REVENUE,
                "Other Operated & Miscellaneous",
                Revenue,
                Line,
                &self.other_revenue,
            ),
            row(TOTAL_REVENUE, "Total Revenue", Revenue, Total, &self.total_revenue),
            section("section-direct", "Departmental Expenses", Direct),
            row(ROOMS_EXPENSE, "Rooms", Direct, Line, &self.rooms_expense),
            row(FB_EXPENSE, "Food & Beverage", Direct, Line, &self.fb_expense),
            row(OTHER_EXPENSE, "Other Operated", Direct, Line, &self.other_expense),
            row(
                TOTAL_DEPARTMENTAL,
                "Total Departmental Expenses",
                Direct,
                Subtotal,
                &self.total_departmental,
            ),
            row(
                DEPARTMENTAL_PROFIT,
                "Departmental Profit",
                Direct,
                Subtotal,
                &self.departmental_profit,
            ),
            section(
                "section-undistributed",
                "Undistributed Operating Expenses",
                Undistributed,
            ),
            row(
                ADMIN_GENERAL,
                "Administrative & General",
                Undistributed,
                Line,
                &self.admin_general,
            ),
            row(
                SALES_MARKETING,
                "Sales & Marketing",
                Undistributed,
                Line,
                &self.sales_marketing,
            ),
            row(UTILITIES, "Utilities", Undistributed, Line, &self.utilities),
            row(
                MAINTENANCE,
                "Property Operation & Maintenance",
                Undistributed,
                Line,
                &self.maintenance,
            ),
            row(
                TOTAL_UNDISTRIBUTED,
                "Total Undistributed Expenses",
                Undistributed,
                Subtotal,
                &self.total_undistributed,
            ),
            row(GOI, "Gross Operating Income", Summary, Subtotal, &self.goi),
            section("section-fixed", "Fixed Charges", Fixed),
            row(MANAGEMENT_FEE, "Management Fee", Fixed, Line, &self.management_fee),
            row(INSURANCE, "Insurance", Fixed, Line, &self.insurance),
            row(PROPERTY_TAX, "Property Tax", Fixed, Line, &self.property_tax),
            row(FFE_RESERVE, "Reserve for Replacement", Fixed, Line, &self.ffe_reserve),
            row(TOTAL_FIXED, "Total Fixed Charges", Fixed, Subtotal, &self.total_fixed),
            row(EBITDA, "EBITDA", Summary, Total, &self.ebitda),
        ]
    }
}

struct RatioBases<'a> {
    total_revenue: &'a YearSeries<Money>,
    rooms_sold: &'a YearSeries<Decimal>,
    rooms_available: &'a YearSeries<Decimal>,
}

impl RatioBases<'_> {
    fn cells(&self, series: &YearSeries<Money>) -> YearSeries<PlCell> {
        series.map(|y, total| PlCell {
            total: *total,
            pct_of_tr: ratio(*total, self.total_revenue.value_or_zero(y)),
            por: ratio(*total, self.rooms_sold.value_or_zero(y)),
            par: ratio(*total, self.rooms_available.value_or_zero(y)),
        })
    }
}

/// `numerator / denominator`, undefined for a zero denominator.
pub fn ratio(numerator: Decimal, denominator: Decimal) -> Option<Decimal> {
    if denominator.is_zero() {
        return None;
    }
    numerator.checked_div(denominator)
}

fn section(id: &str, label: &str, group: PlGroup) -> PlRow {
    PlRow {
        id: id.to_string(),
        label: label.to_string(),
        group,
        kind: RowKind::Section,
        values: YearSeries::from_vec(Vec::new()),
    }
}

fn sum_of(id: &str, lines: &[&YearSeries<Money>]) -> UnderwritingResult<YearSeries<Money>> {
    let Some((first, rest)) = lines.split_first() else {
        return Ok(YearSeries::default());
    };
    rest.iter().try_fold((*first).clone(), |acc, next| {
        acc.zip_with(next, id, |a, b| a.checked_add(b))
    })
}

fn difference(
    id: &str,
    minuend: &YearSeries<Money>,
    subtrahend: &YearSeries<Money>,
) -> UnderwritingResult<YearSeries<Money>> {
    minuend.zip_with(subtrahend, id, |a, b| a.checked_sub(b))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
