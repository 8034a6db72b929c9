//! Paid extensions
//!
//! Extensions are priced proportionally to the configured unit. The
//! payment must come out to a whole number of base units; a request that
//! would need a fractional payment is refused rather than rounded. With
//! partial extension disabled the request must also be a whole multiple
//! of the unit.
//!
//! Caps are checked first: a request past `max_expiration` or `max_usages`
//! is refused no matter what it would cost.

use leasehold_types::{
    checked_add_i64, checked_add_u64, EscrowRecord, LeaseholdError, MintId, Result,
    TimeInvalidator, UnixTimestamp, UsageInvalidator,
};
use serde::{Deserialize, Serialize};

use crate::expiration::resolved_expiration;

/// Price and effect of an extension, computed before anything is charged
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionQuote<V> {
    /// Amount owed to the invalidator's collector
    pub payment: u64,
    pub payment_mint: MintId,
    /// Expiration or usage budget after the extension
    pub new_value: V,
}

/// Quote extending a time invalidator by `seconds`.
///
/// The extension stacks on the later of the duration-derived expiration
/// and any explicit one.
pub fn quote_time_extension(
    escrow: &EscrowRecord,
    time: &TimeInvalidator,
    seconds: u64,
) -> Result<ExtensionQuote<UnixTimestamp>> {
    let extension = time
        .extension
        .as_ref()
        .ok_or_else(|| LeaseholdError::ExtensionNotConfigured {
            invalidator_id: time.id.to_string(),
        })?;

    if seconds == 0 {
        return Err(invalid_amount(seconds, "must be positive"));
    }

    let duration_end = match time.duration_seconds {
        Some(duration) => Some(checked_add_i64(escrow.state_changed_at, duration, "duration end")?),
        None => None,
    };
    let base = duration_end
        .max(time.expiration)
        .ok_or_else(|| LeaseholdError::InvalidConfiguration {
            message: format!("time invalidator {} has no expiration to extend", time.id),
        })?;

    let delta = i64::try_from(seconds).map_err(|_| overflow("extension seconds"))?;
    let new_expiration = checked_add_i64(base, delta, "extended expiration")?;

    if let Some(max_expiration) = time.max_expiration {
        if new_expiration > max_expiration {
            return Err(LeaseholdError::ExceedsMaxExpiration {
                requested: new_expiration,
                max_expiration,
            });
        }
    }

    let payment = proportional_payment(
        seconds,
        extension.duration_seconds,
        extension.payment_amount,
        extension.disable_partial_extension,
    )?;

    Ok(ExtensionQuote {
        payment,
        payment_mint: extension.payment_mint,
        new_value: new_expiration,
    })
}

/// Quote raising a usage budget by `usages`
pub fn quote_usage_extension(usage: &UsageInvalidator, usages: u64) -> Result<ExtensionQuote<u64>> {
    let extension = usage
        .extension
        .as_ref()
        .ok_or_else(|| LeaseholdError::ExtensionNotConfigured {
            invalidator_id: usage.id.to_string(),
        })?;

    if usages == 0 {
        return Err(invalid_amount(usages, "must be positive"));
    }

    let total = usage
        .total_usages
        .ok_or_else(|| LeaseholdError::InvalidConfiguration {
            message: format!("usage invalidator {} has no budget to extend", usage.id),
        })?;
    let new_total = checked_add_u64(total, usages, "extended usages")?;

    if let Some(max_usages) = extension.max_usages {
        if new_total > max_usages {
            return Err(LeaseholdError::ExceedsMaxUsages {
                requested: new_total,
                max_usages,
            });
        }
    }

    let payment = proportional_payment(
        usages,
        extension.extension_usages,
        extension.payment_amount,
        false,
    )?;

    Ok(ExtensionQuote {
        payment,
        payment_mint: extension.payment_mint,
        new_value: new_total,
    })
}

/// Check a new hard cap for a time invalidator.
///
/// The cap never moves backwards, and never lands before the current
/// expiration of a claimed escrow.
pub fn validate_max_expiration_update(
    escrow: &EscrowRecord,
    time: &TimeInvalidator,
    new_max_expiration: UnixTimestamp,
) -> Result<()> {
    let floor = time.max_expiration.max(resolved_expiration(escrow, time));
    match floor {
        Some(floor) if new_max_expiration < floor => Err(LeaseholdError::InvalidMaxExpiration {
            requested: new_max_expiration,
            floor,
        }),
        _ => Ok(()),
    }
}

/// `requested * amount / unit`, refusing anything that is not exact
fn proportional_payment(requested: u64, unit: u64, amount: u64, whole_units_only: bool) -> Result<u64> {
    if unit == 0 {
        return Err(LeaseholdError::InvalidConfiguration {
            message: "extension unit is zero".to_string(),
        });
    }
    if whole_units_only && requested % unit != 0 {
        return Err(invalid_amount(
            requested,
            &format!("partial extension disabled, must be a multiple of {}", unit),
        ));
    }

    let scaled = u128::from(requested) * u128::from(amount);
    let unit = u128::from(unit);
    if scaled % unit != 0 {
        return Err(invalid_amount(requested, "payment would be fractional"));
    }
    u64::try_from(scaled / unit).map_err(|_| overflow("extension payment"))
}

fn invalid_amount(requested: u64, reason: &str) -> LeaseholdError {
    LeaseholdError::InvalidExtensionAmount {
        requested,
        reason: reason.to_string(),
    }
}

fn overflow(context: &str) -> LeaseholdError {
    LeaseholdError::ArithmeticOverflow {
        context: context.to_string(),
    }
}
