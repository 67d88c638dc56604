//! LedgerStore - the authoritative loan/user state machine
//!
//! Every mutating operation validates first and mutates only on success, so a
//! rejecting call leaves all entities unchanged. Operations are linearized
//! behind a single write lock; reads take the read lock and return clones.
//!
//! Each operation exists in a convenience form using `Utc::now()` and an
//! `_at` form taking an explicit timestamp (used by tests and backfills).
//! State is rebuilt from the event journal via `replay`.

use crate::error::LedgerError;
use crate::event::LoanEvent;
use crate::loan::{Loan, LoanId};
use crate::user::User;
use cbi_core::{Address, Amount, ScoreBounds};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Default)]
struct LedgerState {
    users: HashMap<Address, User>,
    loans: Vec<Loan>,
}

/// Authoritative record of Users and Loans.
pub struct LedgerStore {
    admin: Address,
    bounds: ScoreBounds,
    inner: RwLock<LedgerState>,
}

impl LedgerStore {
    /// Create an empty store with the given admin capability holder.
    pub fn new(admin: Address, bounds: ScoreBounds) -> Self {
        Self {
            admin,
            bounds,
            inner: RwLock::new(LedgerState::default()),
        }
    }

    /// The configured admin address.
    pub fn admin(&self) -> &Address {
        &self.admin
    }

    /// The configured score bounds.
    pub fn bounds(&self) -> ScoreBounds {
        self.bounds
    }

    // Lock poisoning only happens if a panic occurred mid-operation; the
    // state is still consistent because every op validates before mutating.
    fn read(&self) -> RwLockReadGuard<'_, LedgerState> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, LedgerState> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    fn require_admin(&self, caller: &Address) -> Result<(), LedgerError> {
        if caller != &self.admin {
            return Err(LedgerError::Unauthorized);
        }
        Ok(())
    }

    // === Mutating operations ===

    /// Register a new user at the base score.
    ///
    /// NOT idempotent: a second registration for the same address fails.
    pub fn register_user(&self, address: &Address) -> Result<LoanEvent, LedgerError> {
        self.register_user_at(address, Utc::now())
    }

    pub fn register_user_at(
        &self,
        address: &Address,
        now: DateTime<Utc>,
    ) -> Result<LoanEvent, LedgerError> {
        let mut state = self.write();
        if state.users.contains_key(address) {
            return Err(LedgerError::AlreadyRegistered(address.clone()));
        }
        state
            .users
            .insert(address.clone(), User::new(address.clone(), self.bounds.base));

        tracing::info!(address = %address, score = self.bounds.base, "user registered");
        Ok(LoanEvent::UserRegistered {
            address: address.clone(),
            registered_at: now,
        })
    }

    /// Request a loan. `due_date = now + duration`.
    pub fn request_loan(
        &self,
        borrower: &Address,
        amount: Amount,
        duration: Duration,
    ) -> Result<LoanEvent, LedgerError> {
        self.request_loan_at(borrower, amount, duration, Utc::now())
    }

    pub fn request_loan_at(
        &self,
        borrower: &Address,
        amount: Amount,
        duration: Duration,
        now: DateTime<Utc>,
    ) -> Result<LoanEvent, LedgerError> {
        let mut state = self.write();

        let user = state
            .users
            .get(borrower)
            .ok_or_else(|| LedgerError::NotRegistered(borrower.clone()))?;
        if user.blacklisted {
            return Err(LedgerError::Blacklisted(borrower.clone()));
        }
        if amount.is_zero() {
            return Err(LedgerError::InvalidAmount);
        }
        if duration <= Duration::zero() {
            return Err(LedgerError::InvalidDuration(duration.num_seconds()));
        }

        let loan_id = state.loans.len() as LoanId;
        let due_date = now + duration;
        state
            .loans
            .push(Loan::new(loan_id, borrower.clone(), amount, now, due_date));
        if let Some(user) = state.users.get_mut(borrower) {
            user.total_loans += 1;
        }

        tracing::info!(loan_id, borrower = %borrower, %amount, %due_date, "loan requested");
        Ok(LoanEvent::LoanRequested {
            loan_id,
            borrower: borrower.clone(),
            amount,
            created_at: now,
            due_date,
        })
    }

    /// Repay a loan. Allowed before or after the due date; only the borrower
    /// may repay, and only while the loan is not terminal.
    pub fn repay_loan(&self, caller: &Address, loan_id: LoanId) -> Result<LoanEvent, LedgerError> {
        self.repay_loan_at(caller, loan_id, Utc::now())
    }

    pub fn repay_loan_at(
        &self,
        caller: &Address,
        loan_id: LoanId,
        paid_at: DateTime<Utc>,
    ) -> Result<LoanEvent, LedgerError> {
        let mut state = self.write();

        let loan = state
            .loans
            .get_mut(loan_id as usize)
            .ok_or(LedgerError::LoanNotFound(loan_id))?;
        if &loan.borrower != caller {
            return Err(LedgerError::NotBorrower {
                caller: caller.clone(),
                loan_id,
            });
        }
        if loan.is_terminal() {
            return Err(LedgerError::AlreadyTerminal(loan_id));
        }

        loan.repaid = true;
        let event = LoanEvent::RepaymentMade {
            loan_id,
            borrower: loan.borrower.clone(),
            amount: loan.amount,
            due_date: loan.due_date,
            paid_at,
        };

        tracing::info!(loan_id, borrower = %caller, %paid_at, "loan repaid");
        Ok(event)
    }

    /// Mark a loan defaulted. Admin only, and only once `now > due_date`.
    pub fn mark_loan_default(
        &self,
        caller: &Address,
        loan_id: LoanId,
    ) -> Result<LoanEvent, LedgerError> {
        self.mark_loan_default_at(caller, loan_id, Utc::now())
    }

    pub fn mark_loan_default_at(
        &self,
        caller: &Address,
        loan_id: LoanId,
        now: DateTime<Utc>,
    ) -> Result<LoanEvent, LedgerError> {
        self.require_admin(caller)?;
        let mut state = self.write();

        let loan = state
            .loans
            .get_mut(loan_id as usize)
            .ok_or(LedgerError::LoanNotFound(loan_id))?;
        if loan.is_terminal() {
            return Err(LedgerError::AlreadyTerminal(loan_id));
        }
        if now <= loan.due_date {
            return Err(LedgerError::NotOverdue(loan_id));
        }

        loan.defaulted = true;
        let borrower = loan.borrower.clone();
        let due_date = loan.due_date;

        tracing::warn!(loan_id, borrower = %borrower, "loan defaulted");
        Ok(LoanEvent::LoanDefaulted {
            loan_id,
            borrower,
            due_date,
            defaulted_at: now,
        })
    }

    /// Write back a CBI score. Admin only; the score is clamped into bounds.
    pub fn update_cbi_score(
        &self,
        caller: &Address,
        address: &Address,
        new_score: i32,
    ) -> Result<LoanEvent, LedgerError> {
        self.update_cbi_score_at(caller, address, new_score, Utc::now())
    }

    pub fn update_cbi_score_at(
        &self,
        caller: &Address,
        address: &Address,
        new_score: i32,
        now: DateTime<Utc>,
    ) -> Result<LoanEvent, LedgerError> {
        self.require_admin(caller)?;
        let mut state = self.write();

        let user = state
            .users
            .get_mut(address)
            .ok_or_else(|| LedgerError::NotRegistered(address.clone()))?;

        let clamped = self.bounds.clamp(new_score as i64);
        let old_score = user.cbi_score;
        user.cbi_score = clamped;

        tracing::info!(address = %address, old_score, new_score = clamped, "cbi score updated");
        Ok(LoanEvent::CbiScoreUpdated {
            address: address.clone(),
            old_score,
            new_score: clamped,
            updated_at: now,
        })
    }

    /// Set or clear the blacklist flag. Admin only.
    pub fn blacklist_user(
        &self,
        caller: &Address,
        address: &Address,
        flag: bool,
    ) -> Result<LoanEvent, LedgerError> {
        self.blacklist_user_at(caller, address, flag, Utc::now())
    }

    pub fn blacklist_user_at(
        &self,
        caller: &Address,
        address: &Address,
        flag: bool,
        now: DateTime<Utc>,
    ) -> Result<LoanEvent, LedgerError> {
        self.require_admin(caller)?;
        let mut state = self.write();

        let user = state
            .users
            .get_mut(address)
            .ok_or_else(|| LedgerError::NotRegistered(address.clone()))?;
        user.blacklisted = flag;

        tracing::warn!(address = %address, flag, "blacklist flag set");
        Ok(LoanEvent::UserBlacklisted {
            address: address.clone(),
            flag,
            updated_at: now,
        })
    }

    // === Reads ===

    pub fn get_user(&self, address: &Address) -> Option<User> {
        self.read().users.get(address).cloned()
    }

    pub fn get_loan(&self, loan_id: LoanId) -> Option<Loan> {
        self.read().loans.get(loan_id as usize).cloned()
    }

    pub fn loan_count(&self) -> u64 {
        self.read().loans.len() as u64
    }

    /// All loans for a borrower, oldest first.
    pub fn loans_for(&self, borrower: &Address) -> Vec<Loan> {
        self.read()
            .loans
            .iter()
            .filter(|l| &l.borrower == borrower)
            .cloned()
            .collect()
    }

    // === Replay ===

    /// Rebuild state from journaled events without re-emitting.
    ///
    /// The journal is trusted: events were validated when first applied, so
    /// replay mutates directly. Returns the number of events applied.
    pub fn replay<'a>(&self, events: impl IntoIterator<Item = &'a LoanEvent>) -> usize {
        let mut state = self.write();
        let mut applied = 0;

        for event in events {
            match event {
                LoanEvent::UserRegistered { address, .. } => {
                    state
                        .users
                        .entry(address.clone())
                        .or_insert_with(|| User::new(address.clone(), self.bounds.base));
                }
                LoanEvent::LoanRequested {
                    loan_id,
                    borrower,
                    amount,
                    created_at,
                    due_date,
                } => {
                    debug_assert_eq!(*loan_id as usize, state.loans.len());
                    state.loans.push(Loan::new(
                        *loan_id,
                        borrower.clone(),
                        *amount,
                        *created_at,
                        *due_date,
                    ));
                    if let Some(user) = state.users.get_mut(borrower) {
                        user.total_loans += 1;
                    }
                }
                LoanEvent::RepaymentMade { loan_id, .. } => {
                    if let Some(loan) = state.loans.get_mut(*loan_id as usize) {
                        loan.repaid = true;
                    }
                }
                LoanEvent::LoanDefaulted { loan_id, .. } => {
                    if let Some(loan) = state.loans.get_mut(*loan_id as usize) {
                        loan.defaulted = true;
                    }
                }
                LoanEvent::CbiScoreUpdated {
                    address, new_score, ..
                } => {
                    if let Some(user) = state.users.get_mut(address) {
                        user.cbi_score = *new_score;
                    }
                }
                LoanEvent::UserBlacklisted { address, flag, .. } => {
                    if let Some(user) = state.users.get_mut(address) {
                        user.blacklisted = *flag;
                    }
                }
            }
            applied += 1;
        }

        applied
    }
}
