//! Hotel underwriting engine: turns a deal snapshot into year-indexed
//! operating and cash-flow statements and the return metrics derived from
//! them.
//!
//! Every entry point is a pure function of the [`deal::Deal`] it is given.

pub mod deal;
pub mod error;
pub mod financing;
pub mod format;
pub mod projection;
pub mod returns;
pub mod series;
pub mod time_value;
pub mod types;

pub use deal::{Deal, ExitStrategy, RefinanceParams, SaleParams};
pub use error::UnderwritingError;
pub use returns::{
    build_cash_flow_statement, calculate_refinance_summary, calculate_sale_summary,
    compute_project_irrs, compute_project_irrs_with_horizon,
};
pub use series::{YearKey, YearSeries};
pub use time_value::{calculate_irr, safe_irr, IrrOutcome};
pub use types::*;

/// Standard result type for all underwriting computations
pub type UnderwritingResult<T> = Result<T, UnderwritingError>;
