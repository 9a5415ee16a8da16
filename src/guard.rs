//! Call journal and per-ledger exclusive lock
//!
//! Each ledger keeps its books inside a [`GuardedState`]. A mutating call
//! opens a [`Txn`]:
//!
//! 1. `enter()` joins the deployment-wide [`Journal`], then takes the
//!    ledger's own lock with `try_lock`. A call that arrives while another
//!    call on the same ledger is still running (a reentrant callback from a
//!    transfer or the trade venue) fails at once with
//!    [`LedgerError::Reentrancy`]. Nothing ever waits for a ledger lock.
//! 2. Entering opens a journal frame holding a transfer savepoint. The
//!    transaction snapshots the books and mutates them in place.
//! 3. `checkpoint()` publishes the post-effect books to readers before any
//!    outbound call, so a callback observes consistent post-state.
//! 4. `commit()` closes the frame. A nested call hands its records and its
//!    undo step to the calling frame; the outermost commit publishes every
//!    record, the caller's own first.
//! 5. Dropping an uncommitted transaction (any `?` exit) restores its books,
//!    undoes every nested ledger call that committed inside it, puts the
//!    transfer port back to the savepoint and discards all buffered records.
//!
//! The journal is a reentrant lock: one thread's call chain runs at a time
//! across the whole deployment and nested calls on that thread pass straight
//! through. Readers take neither lock; they load the last published books
//! from an `ArcSwap`.

use std::cell::RefCell;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::{Mutex, MutexGuard, ReentrantMutex, ReentrantMutexGuard};
use tracing::debug;

use crate::error::{LedgerError, LedgerResult};
use crate::events::{EventSink, LedgerEvent};
use crate::ports::{AccountId, AssetTransferPort, TransferSavepoint};

type Undo = Box<dyn FnOnce() + Send>;

/// Records one committed call owes a sink.
struct Outgoing {
    sink: Arc<dyn EventSink>,
    source: AccountId,
    events: Vec<LedgerEvent>,
}

struct Frame {
    label: &'static str,
    savepoint: TransferSavepoint,
    /// Undo steps of nested calls that already committed, in commit order.
    undo: Vec<Undo>,
    /// Records of nested calls that already committed, in publish order.
    outbox: Vec<Outgoing>,
}

type Frames = RefCell<Vec<Frame>>;

// =============================================================================
// JOURNAL
// =============================================================================

/// Shared by every ledger of one deployment.
pub struct Journal {
    transfers: Arc<dyn AssetTransferPort>,
    frames: ReentrantMutex<Frames>,
}

impl Journal {
    pub fn new(transfers: Arc<dyn AssetTransferPort>) -> Self {
        Self {
            transfers,
            frames: ReentrantMutex::new(RefCell::new(Vec::new())),
        }
    }

    /// Run `f` as one unit. If it fails, every ledger call and transfer made
    /// inside it is undone and none of their records are published.
    pub fn atomic<T>(
        &self,
        label: &'static str,
        f: impl FnOnce() -> LedgerResult<T>,
    ) -> LedgerResult<T> {
        let scope = Scope::open(self, self.frames.lock(), label);
        let value = f()?;
        scope.close(None, None);
        Ok(value)
    }

    /// Calls open on the current chain. Blocks while another thread's chain runs.
    pub fn depth(&self) -> usize {
        self.frames.lock().borrow().len()
    }
}

/// One open journal frame. Dropping it without `close` unwinds the frame.
struct Scope<'a> {
    journal: &'a Journal,
    frames: ReentrantMutexGuard<'a, Frames>,
    open: bool,
}

impl<'a> Scope<'a> {
    fn open(
        journal: &'a Journal,
        frames: ReentrantMutexGuard<'a, Frames>,
        label: &'static str,
    ) -> Self {
        frames.borrow_mut().push(Frame {
            label,
            savepoint: journal.transfers.savepoint(),
            undo: Vec::new(),
            outbox: Vec::new(),
        });
        Self {
            journal,
            frames,
            open: true,
        }
    }

    /// Close as committed. `undo` restores the closing call's own books,
    /// `records` are its own events.
    fn close(mut self, undo: Option<Undo>, records: Option<Outgoing>) {
        self.open = false;
        let mut frames = self.frames.borrow_mut();
        let Some(mut frame) = frames.pop() else {
            return;
        };
        let mut outbox = Vec::with_capacity(frame.outbox.len() + 1);
        outbox.extend(records.filter(|r| !r.events.is_empty()));
        outbox.append(&mut frame.outbox);

        match frames.last_mut() {
            Some(parent) => {
                parent.undo.append(&mut frame.undo);
                parent.undo.extend(undo);
                parent.outbox.append(&mut outbox);
            }
            None => {
                drop(frames);
                for out in outbox {
                    out.sink.publish(&out.source, out.events);
                }
            }
        }
    }

    fn unwind(&mut self) {
        self.open = false;
        let frame = self.frames.borrow_mut().pop();
        if let Some(frame) = frame {
            let discarded: usize = frame.outbox.iter().map(|o| o.events.len()).sum();
            for undo in frame.undo.into_iter().rev() {
                undo();
            }
            self.journal.transfers.restore(frame.savepoint);
            debug!(call = frame.label, discarded_nested_events = discarded, "call unwound");
        }
    }
}

impl Drop for Scope<'_> {
    fn drop(&mut self) {
        if self.open {
            self.unwind();
        }
    }
}

// =============================================================================
// GUARDED STATE
// =============================================================================

struct Shared<S> {
    books: Mutex<S>,
    published: ArcSwap<S>,
}

pub struct GuardedState<S> {
    name: &'static str,
    journal: Arc<Journal>,
    shared: Arc<Shared<S>>,
}

impl<S: Clone + Send + Sync + 'static> GuardedState<S> {
    pub fn new(name: &'static str, books: S, journal: Arc<Journal>) -> Self {
        Self {
            name,
            journal,
            shared: Arc::new(Shared {
                published: ArcSwap::new(Arc::new(books.clone())),
                books: Mutex::new(books),
            }),
        }
    }

    /// Last published books.
    pub fn view(&self) -> Arc<S> {
        self.shared.published.load_full()
    }

    pub fn enter(&self) -> LedgerResult<Txn<'_, S>> {
        let frames = self.journal.frames.lock();
        let books = self
            .shared
            .books
            .try_lock()
            .ok_or(LedgerError::Reentrancy { ledger: self.name })?;
        let before = books.clone();
        Ok(Txn {
            cell: self,
            books,
            before: Some(before),
            events: Vec::new(),
            scope: Some(Scope::open(&self.journal, frames, self.name)),
        })
    }

    /// True while a mutating call holds the lock.
    pub fn is_locked(&self) -> bool {
        self.shared.books.is_locked()
    }

    fn restorer(&self, before: S) -> Undo {
        let shared = self.shared.clone();
        let name = self.name;
        Box::new(move || {
            shared.published.store(Arc::new(before.clone()));
            *shared.books.lock() = before;
            debug!(ledger = name, "committed nested call reverted");
        })
    }
}

pub struct Txn<'a, S: Clone + Send + Sync + 'static> {
    cell: &'a GuardedState<S>,
    books: MutexGuard<'a, S>,
    /// `None` once committed.
    before: Option<S>,
    events: Vec<LedgerEvent>,
    /// Dropped after `books`, so the ledger lock goes first.
    scope: Option<Scope<'a>>,
}

impl<'a, S: Clone + Send + Sync + 'static> Txn<'a, S> {
    pub fn emit(&mut self, event: LedgerEvent) {
        self.events.push(event);
    }

    /// Publish the current books without committing.
    pub fn checkpoint(&self) {
        self.cell.shared.published.store(Arc::new(self.books.clone()));
    }

    /// Keep the books and hand the buffered events to the journal, which
    /// publishes them to `sink` once the outermost call commits.
    pub fn commit(mut self, sink: &Arc<dyn EventSink>, source: &AccountId) {
        self.checkpoint();
        let Some(before) = self.before.take() else {
            return;
        };
        let undo = self.cell.restorer(before);
        let records = Outgoing {
            sink: sink.clone(),
            source: source.clone(),
            events: std::mem::take(&mut self.events),
        };
        if let Some(scope) = self.scope.take() {
            scope.close(Some(undo), Some(records));
        }
    }
}

impl<S: Clone + Send + Sync + 'static> Deref for Txn<'_, S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.books
    }
}

impl<S: Clone + Send + Sync + 'static> DerefMut for Txn<'_, S> {
    fn deref_mut(&mut self) -> &mut S {
        &mut self.books
    }
}

impl<S: Clone + Send + Sync + 'static> Drop for Txn<'_, S> {
    fn drop(&mut self) {
        if let Some(before) = self.before.take() {
            self.cell.shared.published.store(Arc::new(before.clone()));
            *self.books = before;
            debug!(
                ledger = self.cell.name,
                discarded_events = self.events.len(),
                "rolled back"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MemoryEventLog;
    use crate::ports::InMemoryAssetBank;

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Books {
        total: u128,
    }

    struct Fixture {
        bank: Arc<InMemoryAssetBank>,
        journal: Arc<Journal>,
        log: Arc<MemoryEventLog>,
        sink: Arc<dyn EventSink>,
    }

    fn fixture() -> Fixture {
        let bank = Arc::new(InMemoryAssetBank::new());
        let log = Arc::new(MemoryEventLog::new());
        Fixture {
            journal: Arc::new(Journal::new(bank.clone())),
            bank,
            sink: log.clone(),
            log,
        }
    }

    fn paused(by: &str) -> LedgerEvent {
        LedgerEvent::VaultPaused {
            by: AccountId::from(by),
        }
    }

    fn source(name: &str) -> AccountId {
        AccountId::from(name)
    }

    #[test]
    fn test_commit_publishes() {
        let f = fixture();
        let state = GuardedState::new("books", Books::default(), f.journal.clone());
        let mut tx = state.enter().unwrap();
        tx.total = 7;
        tx.emit(paused("admin"));
        tx.commit(&f.sink, &source("books"));
        assert_eq!(state.view().total, 7);
        assert_eq!(f.log.events(), vec![paused("admin")]);
        assert_eq!(f.journal.depth(), 0);
    }

    #[test]
    fn test_drop_rolls_back_after_checkpoint() {
        let f = fixture();
        let state = GuardedState::new("books", Books { total: 1 }, f.journal.clone());
        {
            let mut tx = state.enter().unwrap();
            tx.total = 99;
            tx.checkpoint();
            assert_eq!(state.view().total, 99);
            tx.emit(paused("admin"));
        }
        assert_eq!(state.view().total, 1);
        assert!(f.log.is_empty());
        let tx = state.enter().unwrap();
        assert_eq!(tx.total, 1);
    }

    #[test]
    fn test_abort_restores_transfers() {
        let f = fixture();
        let state = GuardedState::new("books", Books::default(), f.journal.clone());
        f.bank.mint(&source("alice"), 50);
        {
            let mut tx = state.enter().unwrap();
            tx.total = 50;
            f.bank.push(&source("alice"), &source("books"), 50).unwrap();
        }
        assert_eq!(f.bank.balance_of(&source("alice")), 50);
        assert_eq!(f.bank.balance_of(&source("books")), 0);
    }

    #[test]
    fn test_outer_abort_reverts_committed_nested_call() {
        let f = fixture();
        let outer = GuardedState::new("outer", Books::default(), f.journal.clone());
        let inner = GuardedState::new("inner", Books::default(), f.journal.clone());
        f.bank.mint(&source("outer"), 10);
        {
            let mut tx = outer.enter().unwrap();
            tx.total = 1;
            tx.emit(paused("outer"));

            let mut nested = inner.enter().unwrap();
            nested.total = 10;
            nested.emit(paused("inner"));
            f.bank.push(&source("outer"), &source("inner"), 10).unwrap();
            nested.commit(&f.sink, &source("inner"));

            assert_eq!(inner.view().total, 10);
            assert!(f.log.is_empty());
        }
        assert_eq!(outer.view().total, 0);
        assert_eq!(inner.view().total, 0);
        assert_eq!(f.bank.balance_of(&source("outer")), 10);
        assert!(f.log.is_empty());
        assert_eq!(f.journal.depth(), 0);
    }

    #[test]
    fn test_outer_records_precede_nested_records() {
        let f = fixture();
        let outer = GuardedState::new("outer", Books::default(), f.journal.clone());
        let inner = GuardedState::new("inner", Books::default(), f.journal.clone());

        let mut tx = outer.enter().unwrap();
        tx.emit(paused("outer"));
        let mut nested = inner.enter().unwrap();
        nested.emit(paused("inner"));
        nested.commit(&f.sink, &source("inner"));
        tx.commit(&f.sink, &source("outer"));

        let sources: Vec<String> = f
            .log
            .records()
            .iter()
            .map(|r| r.source.to_string())
            .collect();
        assert_eq!(sources, vec!["outer", "inner"]);
    }

    #[test]
    fn test_second_entry_fails_fast() {
        let f = fixture();
        let state = GuardedState::new("books", Books::default(), f.journal.clone());
        let _tx = state.enter().unwrap();
        assert!(state.is_locked());
        assert!(matches!(
            state.enter(),
            Err(LedgerError::Reentrancy { ledger: "books" })
        ));
        assert_eq!(f.journal.depth(), 1);
    }

    #[test]
    fn test_lock_released_on_error_path() {
        let f = fixture();
        let state = GuardedState::new("books", Books::default(), f.journal.clone());
        let failing = || -> LedgerResult<()> {
            let mut tx = state.enter()?;
            tx.total = 5;
            Err(LedgerError::ZeroAmount)
        };
        assert!(failing().is_err());
        assert!(!state.is_locked());
        assert_eq!(state.view().total, 0);
        assert_eq!(f.journal.depth(), 0);
    }

    #[test]
    fn test_atomic_groups_calls() {
        let f = fixture();
        let state = GuardedState::new("books", Books::default(), f.journal.clone());
        f.bank.mint(&source("alice"), 5);

        let result: LedgerResult<()> = f.journal.atomic("pair", || {
            let mut tx = state.enter()?;
            tx.total = 5;
            tx.emit(paused("admin"));
            tx.commit(&f.sink, &source("books"));
            f.bank.push(&source("alice"), &source("bob"), 5)?;
            Err(LedgerError::NothingToClaim)
        });
        assert!(result.is_err());
        assert_eq!(state.view().total, 0);
        assert_eq!(f.bank.balance_of(&source("alice")), 5);
        assert!(f.log.is_empty());

        f.journal
            .atomic("single", || {
                let mut tx = state.enter()?;
                tx.total = 2;
                tx.commit(&f.sink, &source("books"));
                Ok(())
            })
            .unwrap();
        assert_eq!(state.view().total, 2);
    }
}
