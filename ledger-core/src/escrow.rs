//! Credit movement primitives
//!
//! These operate on in-memory [`Account`] records. The ledger actor loads the
//! accounts, applies one of these, and commits the result in a single write,
//! so each primitive is atomic against storage.
//!
//! # Invariants
//!
//! - `balance >= 0` and `pending >= 0` after every call
//! - `settle` and `revert` change nothing when they return `false`
//! - Only `grant` changes the total credit held across accounts

use crate::{
    error::{Error, Result},
    types::Account,
};
use rust_decimal::Decimal;

fn ensure_positive(amount: Decimal) -> Result<()> {
    if amount <= Decimal::ZERO {
        return Err(Error::InvalidAmount(amount));
    }
    Ok(())
}

/// `balance -= amount; pending += amount`
pub fn move_to_pending(account: &mut Account, amount: Decimal) -> Result<()> {
    ensure_positive(amount)?;

    if account.balance < amount {
        return Err(Error::InsufficientBalance {
            account: account.id,
            available: account.balance,
            requested: amount,
        });
    }

    account.balance -= amount;
    account.pending += amount;
    Ok(())
}

/// Pay escrowed credit from `payer.pending` to `payee.balance`.
///
/// Returns `false` without touching either account if the payer's pending
/// would go negative.
pub fn settle(payer: &mut Account, payee: &mut Account, amount: Decimal) -> bool {
    if amount <= Decimal::ZERO || payer.pending < amount {
        return false;
    }

    payer.pending -= amount;
    payee.balance += amount;
    true
}

/// Return escrowed credit to the owner's balance.
///
/// Returns `false` without touching the account if pending would go negative.
pub fn revert(account: &mut Account, amount: Decimal) -> bool {
    if amount <= Decimal::ZERO || account.pending < amount {
        return false;
    }

    account.pending -= amount;
    account.balance += amount;
    true
}

/// Admin credit grant; the only primitive that creates credit
pub fn grant(account: &mut Account, amount: Decimal) -> Result<()> {
    ensure_positive(amount)?;
    account.balance += amount;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AccountId;

    fn account(id: i64, balance: i64, pending: i64) -> Account {
        let mut account = Account::new(AccountId::new(id), None, false);
        account.balance = Decimal::from(balance);
        account.pending = Decimal::from(pending);
        account
    }

    #[test]
    fn test_move_to_pending() {
        let mut y = account(2, 6, 0);
        move_to_pending(&mut y, Decimal::ONE).unwrap();
        assert_eq!(y.balance, Decimal::from(5));
        assert_eq!(y.pending, Decimal::ONE);
    }

    #[test]
    fn test_move_to_pending_never_underflows() {
        let mut y = account(2, 0, 0);
        let err = move_to_pending(&mut y, Decimal::ONE).unwrap_err();
        assert!(matches!(err, Error::InsufficientBalance { .. }));
        assert_eq!(y.balance, Decimal::ZERO);
        assert_eq!(y.pending, Decimal::ZERO);
    }

    #[test]
    fn test_settle_moves_credit_between_accounts() {
        let mut payer = account(2, 5, 1);
        let mut payee = account(1, 5, 0);

        assert!(settle(&mut payer, &mut payee, Decimal::ONE));
        assert_eq!(payer.balance, Decimal::from(5));
        assert_eq!(payer.pending, Decimal::ZERO);
        assert_eq!(payee.balance, Decimal::from(6));
    }

    #[test]
    fn test_settle_rejects_over_pending() {
        let mut payer = account(2, 5, 0);
        let mut payee = account(1, 5, 0);

        assert!(!settle(&mut payer, &mut payee, Decimal::ONE));
        assert_eq!(payer, account(2, 5, 0));
        assert_eq!(payee, account(1, 5, 0));
    }

    #[test]
    fn test_revert() {
        let mut y = account(2, 5, 1);
        assert!(revert(&mut y, Decimal::ONE));
        assert_eq!(y.balance, Decimal::from(6));
        assert_eq!(y.pending, Decimal::ZERO);

        // Second revert has nothing left to return
        assert!(!revert(&mut y, Decimal::ONE));
        assert_eq!(y.balance, Decimal::from(6));
    }

    #[test]
    fn test_grant_requires_positive_amount() {
        let mut x = account(1, 0, 0);
        assert!(grant(&mut x, Decimal::ZERO).is_err());
        assert!(grant(&mut x, Decimal::from(-3)).is_err());
        grant(&mut x, Decimal::from(10)).unwrap();
        assert_eq!(x.balance, Decimal::from(10));
    }
}
