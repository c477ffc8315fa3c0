use hotel_underwriting_core::deal::{Deal, ExitStrategy};
use hotel_underwriting_core::types::{Money, Rate};
use napi::Result as NapiResult;
use napi_derive::napi;
use serde::Deserialize;

/// Convert any Display error into a napi::Error.
fn to_napi_error(e: impl std::fmt::Display) -> napi::Error {
    napi::Error::from_reason(e.to_string())
}

fn parse_deal(deal_json: &str) -> NapiResult<Deal> {
    serde_json::from_str(deal_json).map_err(to_napi_error)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct HorizonInput {
    deal: Deal,
    through_year_index: u32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExitInput {
    exit_settings: ExitStrategy,
    project_cost: Money,
    deal: Deal,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IrrInput {
    cashflows: Vec<Money>,
    #[serde(default)]
    guess: Option<Rate>,
}

// ---------------------------------------------------------------------------
// Statements
// ---------------------------------------------------------------------------

#[napi]
pub fn build_pnl(deal_json: String) -> NapiResult<String> {
    let deal = parse_deal(&deal_json)?;
    let output = hotel_underwriting_core::projection::build_pnl(&deal).map_err(to_napi_error)?;
    serde_json::to_string(&output).map_err(to_napi_error)
}

#[napi]
pub fn build_cash_flow_statement(deal_json: String) -> NapiResult<String> {
    let deal = parse_deal(&deal_json)?;
    let output =
        hotel_underwriting_core::returns::build_cash_flow_statement(&deal).map_err(to_napi_error)?;
    serde_json::to_string(&output).map_err(to_napi_error)
}

#[napi]
pub fn build_debt_schedule(deal_json: String) -> NapiResult<String> {
    let deal = parse_deal(&deal_json)?;
    let output =
        hotel_underwriting_core::financing::build_debt_schedule(&deal).map_err(to_napi_error)?;
    serde_json::to_string(&output).map_err(to_napi_error)
}

// ---------------------------------------------------------------------------
// Returns
// ---------------------------------------------------------------------------

#[napi]
pub fn compute_project_irrs(deal_json: String) -> NapiResult<String> {
    let deal = parse_deal(&deal_json)?;
    let output =
        hotel_underwriting_core::returns::compute_project_irrs(&deal).map_err(to_napi_error)?;
    serde_json::to_string(&output).map_err(to_napi_error)
}

#[napi]
pub fn compute_project_irrs_with_horizon(input_json: String) -> NapiResult<String> {
    let input: HorizonInput = serde_json::from_str(&input_json).map_err(to_napi_error)?;
    let output = hotel_underwriting_core::returns::compute_project_irrs_with_horizon(
        &input.deal,
        input.through_year_index,
    )
    .map_err(to_napi_error)?;
    serde_json::to_string(&output).map_err(to_napi_error)
}

#[napi]
pub fn calculate_sale_summary(input_json: String) -> NapiResult<String> {
    let input: ExitInput = serde_json::from_str(&input_json).map_err(to_napi_error)?;
    let output = hotel_underwriting_core::returns::calculate_sale_summary(
        &input.exit_settings,
        input.project_cost,
        &input.deal,
    )
    .map_err(to_napi_error)?;
    serde_json::to_string(&output).map_err(to_napi_error)
}

#[napi]
pub fn calculate_refinance_summary(input_json: String) -> NapiResult<String> {
    let input: ExitInput = serde_json::from_str(&input_json).map_err(to_napi_error)?;
    let output = hotel_underwriting_core::returns::calculate_refinance_summary(
        &input.exit_settings,
        input.project_cost,
        &input.deal,
    )
    .map_err(to_napi_error)?;
    serde_json::to_string(&output).map_err(to_napi_error)
}

// ---------------------------------------------------------------------------
// IRR and display
// ---------------------------------------------------------------------------

#[napi]
pub fn safe_irr(input_json: String) -> NapiResult<String> {
    let input: IrrInput = serde_json::from_str(&input_json).map_err(to_napi_error)?;
    let guess = input
        .guess
        .unwrap_or(hotel_underwriting_core::time_value::DEFAULT_IRR_GUESS);
    let outcome = hotel_underwriting_core::time_value::safe_irr(&input.cashflows, guess);
    serde_json::to_string(&outcome).map_err(to_napi_error)
}

/// `irr_json` is a decimal string, a number, or `null`.
#[napi]
pub fn format_irr(irr_json: String) -> NapiResult<String> {
    let irr: Option<Rate> = serde_json::from_str(&irr_json).map_err(to_napi_error)?;
    Ok(hotel_underwriting_core::format::format_irr(irr))
}
