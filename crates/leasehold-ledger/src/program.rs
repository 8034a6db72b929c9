//! Instruction dispatch
//!
//! Maps each instruction onto the rental state machine and applies a whole
//! operation against a draft, so a refused instruction leaves no trace.

use leasehold_escrow::{Custody, PaymentSettlement, RentalStateMachine};
use leasehold_types::{UnixTimestamp, WalletId};

use crate::error::{LedgerError, Result};
use crate::instruction::{Instruction, Operation};

/// Apply one instruction with `caller` as its signer
pub fn execute<C>(
    machine: &mut RentalStateMachine<C>,
    caller: &WalletId,
    instruction: &Instruction,
    now: UnixTimestamp,
) -> leasehold_types::Result<()>
where
    C: Custody + PaymentSettlement + Clone,
{
    match instruction {
        Instruction::Issue { escrow, request } => {
            machine.issue(caller, *escrow, request.clone(), now)?;
        }
        Instruction::Claim { escrow } => {
            machine.claim(caller, escrow, now)?;
        }
        Instruction::Invalidate { escrow } => {
            machine.invalidate(caller, escrow, now)?;
        }
        Instruction::UpdateInvalidationType {
            escrow,
            invalidation_type,
        } => {
            machine.update_invalidation_type(caller, escrow, *invalidation_type)?;
        }
        Instruction::IncrementUsages { escrow, usages } => {
            machine.increment_usages(caller, escrow, *usages)?;
        }
        Instruction::ExtendExpiration { escrow, seconds } => {
            machine.extend_expiration(caller, escrow, *seconds)?;
        }
        Instruction::ExtendUsages { escrow, usages } => {
            machine.extend_usages(caller, escrow, *usages)?;
        }
        Instruction::UpdateMaxExpiration {
            escrow,
            max_expiration,
        } => {
            machine.update_max_expiration(caller, escrow, *max_expiration)?;
        }
        Instruction::CloseTimeInvalidator { invalidator } => {
            machine.close_time_invalidator(invalidator)?;
        }
        Instruction::CloseUsageInvalidator { invalidator } => {
            machine.close_usage_invalidator(invalidator)?;
        }
        Instruction::Unissue { escrow } => {
            machine.unissue(caller, escrow)?;
        }
        Instruction::CreateAssociatedAccount { owner, mint } => {
            machine.custody_mut().open_associated(owner, mint)?;
        }
    }
    Ok(())
}

/// Apply every instruction of `operation` or none of them
pub fn apply<C>(machine: &mut RentalStateMachine<C>, operation: &Operation, now: UnixTimestamp) -> Result<()>
where
    C: Custody + PaymentSettlement + Clone,
{
    let mut draft = machine.draft();
    for (index, instruction) in operation.instructions.iter().enumerate() {
        execute(&mut draft, &operation.payer, instruction, now).map_err(|source| LedgerError::Rejected {
            index,
            instruction: instruction.name().to_string(),
            source,
        })?;
    }
    machine.commit(draft);
    Ok(())
}
