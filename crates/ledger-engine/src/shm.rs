//! Ledger storage in an anonymous shared mapping.
//!
//! The parent maps the segment, writes every record in place and initialises
//! each record's `pthread_mutex_t` with `PTHREAD_PROCESS_SHARED` before any
//! child is forked. Children inherit the mapping at the same address. Only the
//! parent tears the segment down, after every child has been reaped.
//!
//! Layout: ATM reserve, bank reserve, accounts, loans, then one outcome slot
//! per transaction in the batch.

use crate::config::{CreditLimits, Genesis};
use crate::error::BackendError;
use crate::ledger::Ledger;
use crate::lock::Record;
use crate::transaction::{AccountRecord, LoanRecord, Outcome};
use crate::workload::WorkloadSimulator;
use parking_lot::lock_api::{GuardNoSend, RawMutex};
use std::alloc::Layout;
use std::cell::UnsafeCell;
use std::io;
use std::mem::MaybeUninit;
use std::ops::Range;
use std::ptr::{self, NonNull};
use std::slice;

/// Mutex usable across processes that map the same memory.
///
/// `INIT` is a placeholder. Each latch must be re-initialised with
/// [`SharedLatch::init`] at its final address before first use; a pthread
/// mutex may not be moved or copied once initialised.
pub struct SharedLatch(UnsafeCell<libc::pthread_mutex_t>);

unsafe impl Send for SharedLatch {}
unsafe impl Sync for SharedLatch {}

impl SharedLatch {
    /// # Safety
    ///
    /// `self` must be at its final address and not yet initialised.
    unsafe fn init(&self) -> io::Result<()> {
        let mut attr = MaybeUninit::<libc::pthread_mutexattr_t>::uninit();
        check(libc::pthread_mutexattr_init(attr.as_mut_ptr()))?;

        let mut rc =
            libc::pthread_mutexattr_setpshared(attr.as_mut_ptr(), libc::PTHREAD_PROCESS_SHARED);
        if rc == 0 {
            rc = libc::pthread_mutex_init(self.0.get(), attr.as_ptr());
        }
        libc::pthread_mutexattr_destroy(attr.as_mut_ptr());

        check(rc)
    }

    /// # Safety
    ///
    /// The latch must be initialised and unheld, and no process may use it
    /// afterwards.
    unsafe fn destroy(&self) {
        libc::pthread_mutex_destroy(self.0.get());
    }
}

unsafe impl RawMutex for SharedLatch {
    const INIT: Self = Self(UnsafeCell::new(libc::PTHREAD_MUTEX_INITIALIZER));

    // pthread mutexes must be unlocked by the thread that locked them.
    type GuardMarker = GuardNoSend;

    fn lock(&self) {
        let rc = unsafe { libc::pthread_mutex_lock(self.0.get()) };
        debug_assert_eq!(rc, 0, "pthread_mutex_lock failed");
    }

    fn try_lock(&self) -> bool {
        unsafe { libc::pthread_mutex_trylock(self.0.get()) == 0 }
    }

    unsafe fn unlock(&self) {
        let rc = libc::pthread_mutex_unlock(self.0.get());
        debug_assert_eq!(rc, 0, "pthread_mutex_unlock failed");
    }
}

fn check(rc: libc::c_int) -> io::Result<()> {
    if rc == 0 {
        return Ok(());
    }

    Err(io::Error::from_raw_os_error(rc))
}

type Reserve = Record<SharedLatch, u64>;
type SharedAccount = Record<SharedLatch, AccountRecord>;
type SharedLoan = Record<SharedLatch, LoanRecord>;
type Slot = Option<Outcome>;

#[derive(Debug, Clone, Copy)]
struct SegmentLayout {
    atm_reserve: usize,
    bank_reserve: usize,
    accounts: usize,
    loans: usize,
    slots: usize,
    users: usize,
    slot_count: usize,
    size: usize,
}

impl SegmentLayout {
    fn new(users: usize, slot_count: usize) -> io::Result<Self> {
        let invalid = |_| io::Error::new(io::ErrorKind::InvalidInput, "segment too large");

        let reserve = Layout::new::<Reserve>();
        let (layout, bank_reserve) = reserve.extend(reserve).map_err(invalid)?;
        let (layout, accounts) = layout
            .extend(Layout::array::<SharedAccount>(users).map_err(invalid)?)
            .map_err(invalid)?;
        let (layout, loans) = layout
            .extend(Layout::array::<SharedLoan>(users).map_err(invalid)?)
            .map_err(invalid)?;
        let (layout, slots) = layout
            .extend(Layout::array::<Slot>(slot_count).map_err(invalid)?)
            .map_err(invalid)?;

        Ok(Self {
            atm_reserve: 0,
            bank_reserve,
            accounts,
            loans,
            slots,
            users,
            slot_count,
            size: layout.pad_to_align().size(),
        })
    }
}

/// A mapped, initialised ledger plus outcome slots.
pub struct SharedSegment {
    base: NonNull<u8>,
    layout: SegmentLayout,
    credit_limits: CreditLimits,
    /// Leading latches, in [`SharedSegment::latches`] order, that went through
    /// `pthread_mutex_init` and must be destroyed.
    initialised_latches: usize,
}

impl SharedSegment {
    /// Map and initialise a segment holding `genesis` and `slot_count`
    /// empty outcome slots.
    pub fn create(genesis: &Genesis, slot_count: usize) -> Result<Self, BackendError> {
        let mut segment = Self::map(genesis, slot_count)?;
        segment
            .init_latches(|latch| unsafe { latch.init() })
            .map_err(BackendError::LockInit)?;

        Ok(segment)
    }

    /// Map a segment and write the genesis records, leaving every latch
    /// uninitialised.
    fn map(genesis: &Genesis, slot_count: usize) -> Result<Self, BackendError> {
        let layout =
            SegmentLayout::new(genesis.user_count(), slot_count).map_err(BackendError::SegmentMap)?;

        let addr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                layout.size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(BackendError::SegmentMap(io::Error::last_os_error()));
        }
        let base = NonNull::new(addr.cast::<u8>())
            .ok_or_else(|| BackendError::SegmentMap(io::Error::last_os_error()))?;

        let segment = Self {
            base,
            layout,
            credit_limits: genesis.credit_limits,
            initialised_latches: 0,
        };

        unsafe {
            segment.write_records(genesis);
        }

        Ok(segment)
    }

    /// # Safety
    ///
    /// Only called once, on a fresh mapping sized by `self.layout`.
    unsafe fn write_records(&self, genesis: &Genesis) {
        let base = self.base.as_ptr();

        ptr::write(
            base.add(self.layout.atm_reserve).cast::<Reserve>(),
            Reserve::new(genesis.atm_reserve),
        );
        ptr::write(
            base.add(self.layout.bank_reserve).cast::<Reserve>(),
            Reserve::new(genesis.bank_reserve),
        );

        let accounts = base.add(self.layout.accounts).cast::<SharedAccount>();
        for (index, &account) in genesis.accounts.iter().enumerate() {
            ptr::write(accounts.add(index), SharedAccount::new(account));
        }

        let loans = base.add(self.layout.loans).cast::<SharedLoan>();
        for (index, &loan) in genesis.loans.iter().enumerate() {
            ptr::write(loans.add(index), SharedLoan::new(loan));
        }

        let slots = base.add(self.layout.slots).cast::<Slot>();
        for index in 0..self.layout.slot_count {
            ptr::write(slots.add(index), None);
        }
    }

    /// Run `init` over every latch in order, stopping at the first failure.
    /// Latches initialised before a failure are still destroyed on drop.
    fn init_latches<F>(&mut self, mut init: F) -> io::Result<()>
    where
        F: FnMut(&SharedLatch) -> io::Result<()>,
    {
        let mut initialised = 0;
        let result = self.latches().try_for_each(|latch| {
            init(latch)?;
            initialised += 1;
            Ok(())
        });
        self.initialised_latches = initialised;

        result
    }

    fn latches(&self) -> impl Iterator<Item = &SharedLatch> {
        // Only the raw locks are touched; no guard is alive during setup or
        // teardown.
        [self.atm_reserve(), self.bank_reserve()]
            .into_iter()
            .map(|r| unsafe { raw_latch(r) })
            .chain(self.accounts().iter().map(|r| unsafe { raw_latch(r) }))
            .chain(self.loans().iter().map(|r| unsafe { raw_latch(r) }))
    }

    fn atm_reserve(&self) -> &Reserve {
        unsafe { &*self.base.as_ptr().add(self.layout.atm_reserve).cast() }
    }

    fn bank_reserve(&self) -> &Reserve {
        unsafe { &*self.base.as_ptr().add(self.layout.bank_reserve).cast() }
    }

    fn accounts(&self) -> &[SharedAccount] {
        unsafe {
            slice::from_raw_parts(
                self.base.as_ptr().add(self.layout.accounts).cast(),
                self.layout.users,
            )
        }
    }

    fn loans(&self) -> &[SharedLoan] {
        unsafe {
            slice::from_raw_parts(
                self.base.as_ptr().add(self.layout.loans).cast(),
                self.layout.users,
            )
        }
    }

    pub fn ledger<'a>(&'a self, workload: &'a dyn WorkloadSimulator) -> Ledger<'a, SharedLatch> {
        Ledger::from_parts(
            self.accounts(),
            self.loans(),
            self.atm_reserve(),
            self.bank_reserve(),
            self.credit_limits,
            workload,
        )
    }

    pub const fn slot_count(&self) -> usize {
        self.layout.slot_count
    }

    /// Mutable view of a range of outcome slots.
    ///
    /// # Safety
    ///
    /// The caller must be the only party reading or writing `range` until it
    /// hands the range back (for a child process: until it exits).
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn slots_mut(&self, range: Range<usize>) -> &mut [Slot] {
        assert!(range.start <= range.end && range.end <= self.layout.slot_count);
        let slots = self.base.as_ptr().add(self.layout.slots).cast::<Slot>();
        slice::from_raw_parts_mut(slots.add(range.start), range.len())
    }

    /// Read one outcome slot. Only meaningful once its writer has finished.
    pub(crate) fn slot(&self, index: usize) -> Slot {
        if index >= self.layout.slot_count {
            return None;
        }
        unsafe {
            ptr::read(
                self.base
                    .as_ptr()
                    .add(self.layout.slots)
                    .cast::<Slot>()
                    .add(index),
            )
        }
    }
}

/// # Safety
///
/// No guard on `record` may be alive while the returned latch is used.
unsafe fn raw_latch<T>(record: &Record<SharedLatch, T>) -> &SharedLatch {
    record.raw()
}

impl Drop for SharedSegment {
    fn drop(&mut self) {
        for latch in self.latches().take(self.initialised_latches) {
            unsafe { latch.destroy() };
        }

        unsafe {
            libc::munmap(self.base.as_ptr().cast(), self.layout.size);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LedgerConfig;
    use crate::error::Rejection;
    use crate::workload::ZeroCost;

    fn segment(max_users: usize, slots: usize) -> SharedSegment {
        let config = LedgerConfig {
            max_users,
            ..LedgerConfig::default()
        };
        SharedSegment::create(&config.genesis().unwrap(), slots).unwrap()
    }

    #[test]
    fn test_segment_holds_genesis() {
        let segment = segment(20, 3);
        let snapshot = segment.ledger(&ZeroCost).snapshot();

        assert_eq!(snapshot.accounts.len(), 20);
        assert_eq!(snapshot.account(20).unwrap().balance, 100_000);
        assert_eq!(snapshot.atm_reserve, 1_000_000);
        assert_eq!(snapshot.bank_reserve, 500_000);
        assert_eq!(segment.slot_count(), 3);
        assert!((0..3).all(|i| segment.slot(i).is_none()));
    }

    #[test]
    fn test_operations_on_shared_records() {
        let segment = segment(5, 0);
        let ledger = segment.ledger(&ZeroCost);

        assert!(ledger.transfer(1, 1, 1, 2, 40_000).is_ok());
        assert_eq!(
            ledger.issue_loan(5, 5, 1),
            Err(Rejection::CreditLimitExceeded)
        );

        let snapshot = ledger.snapshot();
        assert_eq!(snapshot.account(1).unwrap().balance, 60_000);
        assert_eq!(snapshot.account(2).unwrap().balance, 140_000);
    }

    #[test]
    fn test_latch_count_covers_all_records() {
        let segment = segment(4, 0);

        // Two reserves plus an account and a loan per user.
        assert_eq!(segment.initialised_latches, 10);
        assert_eq!(segment.latches().count(), 10);
    }

    #[test]
    fn test_partial_latch_setup_is_tracked() {
        let config = LedgerConfig {
            max_users: 4,
            ..LedgerConfig::default()
        };
        let mut segment = SharedSegment::map(&config.genesis().unwrap(), 0).unwrap();

        let mut calls = 0;
        let result = segment.init_latches(|latch| {
            calls += 1;
            if calls > 3 {
                return Err(io::Error::from_raw_os_error(libc::EAGAIN));
            }
            unsafe { latch.init() }
        });

        assert_eq!(result.unwrap_err().raw_os_error(), Some(libc::EAGAIN));
        assert_eq!(calls, 4);
        // Drop destroys exactly the three latches that were initialised.
        assert_eq!(segment.initialised_latches, 3);
    }

    #[test]
    fn test_slots_round_trip_through_shared_memory() {
        let segment = segment(1, 4);

        unsafe {
            segment.slots_mut(1..3)[1] = Some(Outcome::Rejected(Rejection::AuthFailure));
        }

        assert_eq!(segment.slot(0), None);
        assert_eq!(
            segment.slot(2),
            Some(Outcome::Rejected(Rejection::AuthFailure))
        );
        assert_eq!(segment.slot(9), None);
    }

    #[test]
    fn test_child_process_writes_are_visible() {
        let segment = segment(2, 1);

        let pid = unsafe { libc::fork() };
        assert!(pid >= 0, "fork failed");
        if pid == 0 {
            let ledger = segment.ledger(&ZeroCost);
            let outcome = ledger.apply(&crate::transaction::Transaction::Deposit {
                actor: 2,
                account_number: 2,
                pin: 2,
                amount: 7,
            });
            unsafe {
                segment.slots_mut(0..1)[0] = Some(outcome);
                libc::_exit(0);
            }
        }

        let mut status = 0;
        let waited = unsafe { libc::waitpid(pid, &mut status, 0) };
        assert_eq!(waited, pid);
        assert!(libc::WIFEXITED(status));
        assert_eq!(libc::WEXITSTATUS(status), 0);

        assert!(segment.slot(0).unwrap().is_accepted());
        assert_eq!(
            segment.ledger(&ZeroCost).snapshot().account(2).unwrap().balance,
            100_007
        );
    }
}
