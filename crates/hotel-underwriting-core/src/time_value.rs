use log::warn;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::UnderwritingError;
use crate::types::{Money, Rate};
use crate::UnderwritingResult;

pub const DEFAULT_IRR_GUESS: Rate = dec!(0.10);
const MAX_IRR_ITERATIONS: u32 = 1000;
const CONVERGENCE_THRESHOLD: Decimal = dec!(0.00000001);

/// Result of an IRR solve. The two failure modes stay distinct so callers
/// can tell "no root can exist" from "the solver gave up".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "rate", rename_all = "camelCase")]
pub enum IrrOutcome {
    Rate(Rate),
    /// Cash flows never change sign
    Undefined,
    /// Iteration cap reached, flat NPV curve, or an estimate left the Decimal range
    NonConvergent,
}

impl IrrOutcome {
    pub fn rate(self) -> Option<Rate> {
        match self {
            IrrOutcome::Rate(r) => Some(r),
            _ => None,
        }
    }

    /// Legacy display fallback: undefined and non-convergent both become 0.
    /// Not a computed IRR.
    pub fn or_zero(self) -> Rate {
        self.rate().unwrap_or(Decimal::ZERO)
    }
}

/// Newton-Raphson settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SolverConfig {
    pub guess: Rate,
    pub max_iterations: u32,
    pub tolerance: Decimal,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            guess: DEFAULT_IRR_GUESS,
            max_iterations: MAX_IRR_ITERATIONS,
            tolerance: CONVERGENCE_THRESHOLD,
        }
    }
}

/// Net Present Value of a series of cash flows, first flow undiscounted.
pub fn npv(rate: Rate, cash_flows: &[Money]) -> UnderwritingResult<Money> {
    if rate <= dec!(-1) {
        return Err(UnderwritingError::InvalidInput {
            field: "rate".into(),
            reason: "Discount rate must be greater than -100%".into(),
        });
    }

    npv_and_derivative(cash_flows, rate)
        .map(|(value, _)| value)
        .ok_or_else(|| UnderwritingError::Overflow {
            context: format!("NPV at rate {rate}"),
        })
}

/// Internal Rate of Return using the default solver settings and `guess`.
pub fn safe_irr(cash_flows: &[Money], guess: Rate) -> IrrOutcome {
    solve_irr(
        cash_flows,
        &SolverConfig {
            guess,
            ..SolverConfig::default()
        },
    )
}

/// Legacy wrapper: IRR or 0 when there is none. Prefer [`safe_irr`].
pub fn calculate_irr(cash_flows: &[Money]) -> Rate {
    safe_irr(cash_flows, DEFAULT_IRR_GUESS).or_zero()
}

/// Newton-Raphson on NPV(r) = Σ cf_t / (1+r)^t.
///
/// Requires at least one strictly positive and one strictly negative flow;
/// otherwise returns [`IrrOutcome::Undefined`] without iterating.
pub fn solve_irr(cash_flows: &[Money], config: &SolverConfig) -> IrrOutcome {
    newton(cash_flows, config).0
}

/// Outcome plus the size of the last Newton step taken.
fn newton(cash_flows: &[Money], config: &SolverConfig) -> (IrrOutcome, Decimal) {
    let has_inflow = cash_flows.iter().any(|cf| *cf > Decimal::ZERO);
    let has_outflow = cash_flows.iter().any(|cf| *cf < Decimal::ZERO);
    if !has_inflow || !has_outflow {
        return (IrrOutcome::Undefined, Decimal::ZERO);
    }

    let mut rate = config.guess;
    let mut last_delta = Decimal::ZERO;

    for _ in 0..config.max_iterations {
        let Some((value, slope)) = npv_and_derivative(cash_flows, rate) else {
            return (IrrOutcome::NonConvergent, last_delta);
        };

        if slope.is_zero() {
            return (IrrOutcome::NonConvergent, last_delta);
        }

        let next = value
            .checked_div(slope)
            .and_then(|step| rate.checked_sub(step));
        let Some(mut next) = next else {
            return (IrrOutcome::NonConvergent, last_delta);
        };

        // (1+r) must stay positive; step halfway towards -100% instead of past it
        if next <= dec!(-1) {
            next = (rate + dec!(-1)) / dec!(2);
        }

        last_delta = (next - rate).abs();
        if last_delta < config.tolerance {
            return (IrrOutcome::Rate(next), last_delta);
        }

        rate = next;
    }

    warn!(
        "IRR did not converge after {} iterations (last step {})",
        config.max_iterations, last_delta
    );
    (IrrOutcome::NonConvergent, last_delta)
}

/// Like [`solve_irr`] but reports failure as an error, for callers that
/// treat a missing IRR as fatal.
pub fn irr(cash_flows: &[Money], config: &SolverConfig) -> UnderwritingResult<Rate> {
    let (outcome, last_delta) = newton(cash_flows, config);
    match outcome {
        IrrOutcome::Rate(r) => Ok(r),
        IrrOutcome::Undefined => Err(UnderwritingError::InsufficientData(
            "IRR requires at least one inflow and one outflow".into(),
        )),
        IrrOutcome::NonConvergent => Err(UnderwritingError::ConvergenceFailure {
            function: "IRR".into(),
            iterations: config.max_iterations,
            last_delta,
        }),
    }
}

/// NPV(r) and d(NPV)/dr, or `None` when a term leaves the Decimal range.
fn npv_and_derivative(cash_flows: &[Money], rate: Rate) -> Option<(Decimal, Decimal)> {
    let one_plus_r = Decimal::ONE.checked_add(rate)?;
    let mut value = Decimal::ZERO;
    let mut slope = Decimal::ZERO;
    // 1 / (1+r)^t
    let mut discount = Decimal::ONE;

    for (t, cf) in cash_flows.iter().enumerate() {
        value = value.checked_add(cf.checked_mul(discount)?)?;
        if t > 0 {
            // d/dr of CF_t / (1+r)^t = -t * CF_t / (1+r)^(t+1)
            let term = Decimal::from(t as u64)
                .checked_mul(*cf)?
                .checked_mul(discount)?
                .checked_div(one_plus_r)?;
            slope = slope.checked_sub(term)?;
        }
        discount = discount.checked_div(one_plus_r)?;
    }

    Some((value, slope))
}
