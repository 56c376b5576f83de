//! Amounts that cross chains are capped at [`TRIMMED_DECIMALS`] decimals.
//!
//! Chains disagree on how many decimals a token has, so an amount is
//! truncated to `min(source decimals, destination decimals, cap)` before it is
//! embedded in a message. Whatever precision is lost ("dust") never leaves the
//! source chain. [`TrimmedAmount::untrim`] scales an amount back to a chain's
//! native decimals on the way out.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default decimal cap for amounts embedded in messages.
pub const TRIMMED_DECIMALS: u8 = 8;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalingError {
    #[error("Decimal scaling exponent overflows u64")]
    OverflowExponent,
    #[error("Scaled amount overflows u64")]
    OverflowScaledAmount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrimmedAmount {
    pub amount: u64,
    pub decimals: u8,
}

fn power_of_ten(exponent: u8) -> Result<u64, ScalingError> {
    10u64
        .checked_pow(exponent.into())
        .ok_or(ScalingError::OverflowExponent)
}

/// Move `amount` from `from` to `to` decimals. Scaling down truncates.
fn rescale(amount: u64, from: u8, to: u8) -> Result<u64, ScalingError> {
    match from.cmp(&to) {
        Ordering::Equal => Ok(amount),
        Ordering::Greater => Ok(amount / power_of_ten(from - to)?),
        Ordering::Less => amount
            .checked_mul(power_of_ten(to - from)?)
            .ok_or(ScalingError::OverflowScaledAmount),
    }
}

impl TrimmedAmount {
    pub fn new(amount: u64, decimals: u8) -> Self {
        Self { amount, decimals }
    }

    pub fn amount(&self) -> u64 {
        self.amount
    }

    pub fn is_zero(&self) -> bool {
        self.amount == 0
    }

    /// Truncate `amount` to the precision both chains share, never above
    /// `cap`.
    pub fn trim_with_cap(
        amount: u64,
        from_decimals: u8,
        to_decimals: u8,
        cap: u8,
    ) -> Result<Self, ScalingError> {
        let decimals = cap.min(from_decimals).min(to_decimals);
        Ok(Self {
            amount: rescale(amount, from_decimals, decimals)?,
            decimals,
        })
    }

    pub fn untrim(&self, to_decimals: u8) -> Result<u64, ScalingError> {
        rescale(self.amount, self.decimals, to_decimals)
    }

    /// Express the same amount in `new_decimals` (e.g. the decimals a rate
    /// limit is kept in).
    pub fn change_decimals(&self, new_decimals: u8) -> Result<Self, ScalingError> {
        Ok(Self {
            amount: rescale(self.amount, self.decimals, new_decimals)?,
            decimals: new_decimals,
        })
    }

    /// Split `amount` into its trimmed form and the dust left behind.
    ///
    /// Returns `(trimmed, dust)` where `dust` is in `from_decimals` units and
    /// `trimmed.untrim(from_decimals) + dust == amount`.
    pub fn remove_dust(
        amount: u64,
        from_decimals: u8,
        to_decimals: u8,
        cap: u8,
    ) -> Result<(Self, u64), ScalingError> {
        let trimmed = Self::trim_with_cap(amount, from_decimals, to_decimals, cap)?;
        let kept = trimmed.untrim(from_decimals)?;
        Ok((trimmed, amount - kept))
    }
}
