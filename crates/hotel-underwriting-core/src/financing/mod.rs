pub mod debt_schedule;

pub use debt_schedule::{build_debt_schedule, project_debt, DebtPeriod, DebtSchedule};
