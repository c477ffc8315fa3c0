pub mod cash_flow;
pub mod exit;

pub use cash_flow::{
    build_cash_flow_statement, compute_project_irrs, compute_project_irrs_with_horizon,
    equity_multiple, CashFlowRow, CashFlowSection, CashFlowStatement, ProjectIrrs,
};
pub use exit::{
    calculate_refinance_summary, calculate_sale_summary, refinance_valuation, sale_valuation,
    RefinanceSummary, RefinanceValuation, SaleSummary, SaleValuation,
};
