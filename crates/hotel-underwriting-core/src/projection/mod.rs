pub mod drivers;
pub mod pnl;
pub mod revenue;

pub use drivers::{build_macro_indices, exit_year_index, projection_horizon, MacroIndices};
pub use pnl::{build_pnl, project_pnl, PlCell, PlGroup, PlRow, PnlStatement, RowKind};
pub use revenue::{build_revenue_drivers, RevenueDrivers};
