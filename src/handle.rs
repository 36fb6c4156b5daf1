#![allow(unsafe_code)]

//! Ownership of opaque native pointers.
//!
//! Every engine object is held by exactly one [`Handle`]. A handle is released
//! once, either explicitly or when dropped; later releases are no-ops and later
//! uses fail with [`Error::InvalidHandleState`]. Derived handles keep a link to
//! their parent so that using a connection whose database was closed, or a row
//! whose cursor has moved on, is detected before the pointer reaches the engine.
//!
//! Native calls run under a [`Pin`], which holds read locks on the handle and
//! every ancestor. Release takes the write lock, so a handle is never destroyed
//! while a call on it (or on a descendant) is in flight.
//!
//! A release that finds an ancestor already gone skips the native destructor.
//! Such handles leave the live count and are tallied as orphaned instead, so
//! [`live_snapshot`] still shows what the engine may have leaked.

use std::ffi::c_void;
use std::fmt;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::lock_api::ArcRwLockReadGuard;
use parking_lot::{RawRwLock, RwLock};
use smallvec::SmallVec;
use tracing::{trace, warn};

use crate::error::{Error, Result};
use crate::sys::{Destroy, NativeApi, NativeState, RawHandle};

/// Kind of engine object behind a handle.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum HandleKind {
    /// Database instance.
    Database,
    /// Connection to a database.
    Connection,
    /// Prepared statement.
    Statement,
    /// Query result set.
    QueryResult,
    /// Row tuple produced by a cursor.
    Tuple,
    /// Owned value.
    Value,
    /// Compile/execute timing summary.
    Summary,
    /// Exported Arrow schema descriptor.
    ArrowSchema,
    /// Exported Arrow array descriptor.
    ArrowArray,
}

const KIND_COUNT: usize = 9;

impl HandleKind {
    /// Every kind, in counter order.
    pub const ALL: [HandleKind; KIND_COUNT] = [
        HandleKind::Database,
        HandleKind::Connection,
        HandleKind::Statement,
        HandleKind::QueryResult,
        HandleKind::Tuple,
        HandleKind::Value,
        HandleKind::Summary,
        HandleKind::ArrowSchema,
        HandleKind::ArrowArray,
    ];

    const fn index(self) -> usize {
        self as usize
    }

    /// Lower-case name used in messages and log fields.
    pub const fn as_str(self) -> &'static str {
        match self {
            HandleKind::Database => "database",
            HandleKind::Connection => "connection",
            HandleKind::Statement => "statement",
            HandleKind::QueryResult => "query result",
            HandleKind::Tuple => "tuple",
            HandleKind::Value => "value",
            HandleKind::Summary => "summary",
            HandleKind::ArrowSchema => "arrow schema",
            HandleKind::ArrowArray => "arrow array",
        }
    }
}

impl fmt::Display for HandleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

static LIVE: [AtomicU64; KIND_COUNT] = [const { AtomicU64::new(0) }; KIND_COUNT];
static ORPHANED: [AtomicU64; KIND_COUNT] = [const { AtomicU64::new(0) }; KIND_COUNT];

/// Number of handles of `kind` currently alive in this process.
pub fn live_handles(kind: HandleKind) -> u64 {
    LIVE[kind.index()].load(Ordering::Acquire)
}

/// Number of handles of `kind` released without their native destructor
/// because an ancestor was released first. Never decreases.
pub fn orphaned_handles(kind: HandleKind) -> u64 {
    ORPHANED[kind.index()].load(Ordering::Acquire)
}

/// Point-in-time copy of every live-handle and orphan counter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LiveHandles {
    counts: [u64; KIND_COUNT],
    orphaned: [u64; KIND_COUNT],
}

impl LiveHandles {
    /// Live handles of one kind.
    pub fn get(&self, kind: HandleKind) -> u64 {
        self.counts[kind.index()]
    }

    /// Live handles across all kinds.
    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Orphaned releases of one kind.
    pub fn orphaned(&self, kind: HandleKind) -> u64 {
        self.orphaned[kind.index()]
    }

    /// Orphaned releases across all kinds.
    pub fn total_orphaned(&self) -> u64 {
        self.orphaned.iter().sum()
    }
}

/// Reads all live-handle and orphan counters.
pub fn live_snapshot() -> LiveHandles {
    let mut snapshot = LiveHandles::default();
    for kind in HandleKind::ALL {
        snapshot.counts[kind.index()] = live_handles(kind);
        snapshot.orphaned[kind.index()] = orphaned_handles(kind);
    }
    snapshot
}

#[derive(Clone, Copy)]
struct RawPtr(NonNull<c_void>);

// SAFETY: the pointer is only dereferenced by the engine while a `Pin` holds the
// slot's read lock; the engine contract allows calls from any thread as long as
// a single connection is not driven concurrently, which `Connection` enforces.
unsafe impl Send for RawPtr {}
// SAFETY: see above; shared access only hands the pointer back to the engine.
unsafe impl Sync for RawPtr {}

type Slot = RwLock<Option<RawPtr>>;
type SlotGuard = ArcRwLockReadGuard<RawRwLock, Option<RawPtr>>;

struct Link {
    kind: HandleKind,
    slot: Arc<Slot>,
    epoch: AtomicU64,
    parent: Option<Arc<Link>>,
    bound_epoch: Option<u64>,
}

impl Link {
    fn pin(self: &Arc<Self>) -> Result<Pin> {
        self.pin_with(|slot| slot.read_arc())
    }

    /// Pins without queueing behind a pending release. Only for short calls
    /// that must reach the engine while another pin is held, like interrupt.
    fn pin_recursive(self: &Arc<Self>) -> Result<Pin> {
        self.pin_with(|slot| slot.read_arc_recursive())
    }

    fn pin_with(self: &Arc<Self>, read: impl Fn(&Arc<Slot>) -> SlotGuard) -> Result<Pin> {
        let mut guards: SmallVec<[SlotGuard; 4]> = SmallVec::new();
        let mut current = self;
        loop {
            let guard = read(&current.slot);
            if guard.is_none() {
                let reason = if Arc::ptr_eq(current, self) {
                    "handle already released".to_string()
                } else {
                    format!(
                        "parent {} handle was released while this handle was still held",
                        current.kind
                    )
                };
                return Err(Error::invalid_handle(self.kind, reason));
            }
            guards.push(guard);
            if let (Some(bound), Some(parent)) = (current.bound_epoch, current.parent.as_ref()) {
                if parent.epoch.load(Ordering::Acquire) != bound {
                    return Err(Error::invalid_handle(
                        self.kind,
                        format!(
                            "{} was invalidated when its {} cursor advanced",
                            current.kind, parent.kind
                        ),
                    ));
                }
            }
            match current.parent.as_ref() {
                Some(parent) => current = parent,
                None => break,
            }
        }
        let Some(RawPtr(ptr)) = *guards[0] else {
            return Err(Error::invalid_handle(self.kind, "handle already released"));
        };
        Ok(Pin { ptr, guards })
    }

    fn released_ancestor(&self) -> Option<HandleKind> {
        let mut current = self.parent.as_ref();
        while let Some(link) = current {
            if link.slot.read().is_none() {
                return Some(link.kind);
            }
            current = link.parent.as_ref();
        }
        None
    }
}

/// Keeps a handle and all of its ancestors from being released while a native
/// call is using the pointer.
///
/// Pins are not reentrant: a thread holding a pin must not pin the same handle
/// or one of its ancestors again, or a queued release can deadlock it.
pub(crate) struct Pin {
    ptr: NonNull<c_void>,
    guards: SmallVec<[SlotGuard; 4]>,
}

impl Pin {
    pub(crate) fn as_ptr(&self) -> RawHandle {
        self.ptr.as_ptr()
    }

    /// Pointer of the (also pinned) parent.
    pub(crate) fn parent_ptr(&self) -> Option<RawHandle> {
        let guard = self.guards.get(1)?;
        (**guard).map(|RawPtr(ptr)| ptr.as_ptr())
    }
}

/// Shared back-reference to a handle, held by its children.
///
/// Keeping a lineage alive does not keep the native object alive; it only lets
/// the child find out whether the parent is still usable.
#[derive(Clone)]
pub(crate) struct Lineage(Arc<Link>);

impl Lineage {
    pub(crate) fn kind(&self) -> HandleKind {
        self.0.kind
    }

    pub(crate) fn pin(&self) -> Result<Pin> {
        self.0.pin()
    }

    /// Like [`Lineage::pin`], but does not wait for a queued release. A
    /// release already in progress still blocks it.
    pub(crate) fn pin_recursive(&self) -> Result<Pin> {
        self.0.pin_recursive()
    }

    pub(crate) fn same_as(&self, other: &Lineage) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// Exclusive owner of one native pointer.
pub(crate) struct Handle {
    link: Arc<Link>,
    destroy: Destroy,
}

impl Handle {
    /// Runs a native creation call and takes ownership of what it produced.
    ///
    /// Fails with [`Error::NativeCallFailed`] when the call reports an error or
    /// writes a null pointer.
    pub(crate) fn acquire(
        api: &NativeApi,
        kind: HandleKind,
        parent: Option<&Lineage>,
        destroy: Destroy,
        stage: &'static str,
        create: impl FnOnce(*mut RawHandle) -> NativeState,
    ) -> Result<Handle> {
        let mut raw: RawHandle = ptr::null_mut();
        let state = create(&mut raw);
        if !state.is_success() {
            let message = api.last_error();
            if !raw.is_null() {
                // SAFETY: the engine handed us ownership even though it failed.
                unsafe { destroy(raw) };
            }
            return Err(Error::native(stage, message));
        }
        Self::adopt(kind, parent, destroy, raw, stage)
    }

    /// Takes ownership of a pointer the engine already produced.
    pub(crate) fn adopt(
        kind: HandleKind,
        parent: Option<&Lineage>,
        destroy: Destroy,
        raw: RawHandle,
        stage: &'static str,
    ) -> Result<Handle> {
        let ptr = NonNull::new(raw)
            .ok_or_else(|| Error::native(stage, format!("engine returned a null {kind} handle")))?;
        Ok(Self::track(
            kind,
            parent.map(|p| Arc::clone(&p.0)),
            None,
            destroy,
            ptr,
        ))
    }

    /// Like [`Handle::adopt`], but the new handle only stays usable until the
    /// parent's cursor advances again.
    pub(crate) fn adopt_row(
        kind: HandleKind,
        parent: &Lineage,
        destroy: Destroy,
        raw: RawHandle,
        stage: &'static str,
    ) -> Result<Handle> {
        let ptr = NonNull::new(raw)
            .ok_or_else(|| Error::native(stage, format!("engine returned a null {kind} handle")))?;
        let epoch = parent.0.epoch.load(Ordering::Acquire);
        Ok(Self::track(
            kind,
            Some(Arc::clone(&parent.0)),
            Some(epoch),
            destroy,
            ptr,
        ))
    }

    fn track(
        kind: HandleKind,
        parent: Option<Arc<Link>>,
        bound_epoch: Option<u64>,
        destroy: Destroy,
        ptr: NonNull<c_void>,
    ) -> Handle {
        let live = LIVE[kind.index()].fetch_add(1, Ordering::AcqRel) + 1;
        trace!(kind = kind.as_str(), live, "handle.acquire");
        Handle {
            link: Arc::new(Link {
                kind,
                slot: Arc::new(RwLock::new(Some(RawPtr(ptr)))),
                epoch: AtomicU64::new(0),
                parent,
                bound_epoch,
            }),
            destroy,
        }
    }

    pub(crate) fn kind(&self) -> HandleKind {
        self.link.kind
    }

    pub(crate) fn lineage(&self) -> Lineage {
        Lineage(Arc::clone(&self.link))
    }

    pub(crate) fn is_released(&self) -> bool {
        self.link.slot.read().is_none()
    }

    /// True when this handle was derived from `parent`.
    pub(crate) fn is_child_of(&self, parent: &Lineage) -> bool {
        self.link
            .parent
            .as_ref()
            .is_some_and(|link| Arc::ptr_eq(link, &parent.0))
    }

    /// Validates the handle and its ancestors and locks them for one native call.
    pub(crate) fn pin(&self) -> Result<Pin> {
        self.link.pin()
    }

    /// Invalidates every row handle derived from the current cursor position.
    pub(crate) fn advance_epoch(&self) {
        self.link.epoch.fetch_add(1, Ordering::AcqRel);
    }

    /// Releases the native object. Returns false when it was already released.
    ///
    /// If an ancestor has been released first, the native destructor is skipped:
    /// the engine may have torn down the memory this object points into.
    pub(crate) fn release(&self) -> bool {
        let kind = self.link.kind;
        let mut slot = self.link.slot.write();
        let Some(RawPtr(ptr)) = slot.take() else {
            return false;
        };
        match self.link.released_ancestor() {
            Some(ancestor) => {
                let orphaned = ORPHANED[kind.index()].fetch_add(1, Ordering::AcqRel) + 1;
                warn!(
                    kind = kind.as_str(),
                    ancestor = ancestor.as_str(),
                    orphaned,
                    "handle.release.orphaned"
                );
            }
            // SAFETY: the slot held the only copy of the pointer and the write
            // lock guarantees no pinned call is using it.
            None => unsafe { (self.destroy)(ptr.as_ptr()) },
        }
        drop(slot);
        let live = LIVE[kind.index()].fetch_sub(1, Ordering::AcqRel) - 1;
        trace!(kind = kind.as_str(), live, "handle.release");
        true
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("kind", &self.link.kind)
            .field("released", &self.is_released())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    static DESTROYED: AtomicUsize = AtomicUsize::new(0);

    unsafe extern "C" fn destroy_boxed(raw: RawHandle) {
        drop(Box::from_raw(raw as *mut u64));
        DESTROYED.fetch_add(1, Ordering::SeqCst);
    }

    fn boxed(kind: HandleKind, parent: Option<&Lineage>) -> Handle {
        let raw = Box::into_raw(Box::new(7u64)) as RawHandle;
        Handle::adopt(kind, parent, destroy_boxed, raw, "test").unwrap()
    }

    #[test]
    fn release_is_idempotent() {
        let handle = boxed(HandleKind::Value, None);
        assert!(handle.release());
        assert!(!handle.release());
        assert!(handle.is_released());
        let err = handle.pin().err().unwrap();
        assert!(matches!(
            err,
            Error::InvalidHandleState {
                kind: HandleKind::Value,
                ..
            }
        ));
    }

    #[test]
    fn child_fails_after_parent_release() {
        let db = boxed(HandleKind::Database, None);
        let conn = boxed(HandleKind::Connection, Some(&db.lineage()));
        assert!(conn.pin().is_ok());
        db.release();
        match conn.pin() {
            Err(Error::InvalidHandleState { kind, reason }) => {
                assert_eq!(kind, HandleKind::Connection);
                assert!(reason.contains("parent database"), "{reason}");
            }
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }
        // releasing an orphan is still safe
        assert!(conn.release());
    }

    #[test]
    fn orphaned_release_skips_native_destroy() {
        let db = boxed(HandleKind::Database, None);
        let conn = boxed(HandleKind::Connection, Some(&db.lineage()));
        let before = DESTROYED.load(Ordering::SeqCst);
        let orphans = orphaned_handles(HandleKind::Connection);
        db.release();
        conn.release();
        // only the database was destroyed natively
        assert!(DESTROYED.load(Ordering::SeqCst) >= before + 1);
        assert!(conn.is_released());
        assert!(orphaned_handles(HandleKind::Connection) >= orphans + 1);
    }

    #[test]
    fn recursive_pin_passes_a_queued_release() {
        let db = boxed(HandleKind::Database, None);
        let conn = boxed(HandleKind::Connection, Some(&db.lineage()));
        let held = conn.pin().unwrap();
        std::thread::scope(|scope| {
            let closer = scope.spawn(|| db.release());
            // a queued writer holds the writer bit while it waits for readers
            while !db.link.slot.is_locked_exclusive() {
                std::thread::yield_now();
            }
            assert!(db.link.slot.try_read().is_none());
            let pin = conn.lineage().pin_recursive().unwrap();
            assert_eq!(pin.parent_ptr(), held.parent_ptr());
            drop(pin);
            drop(held);
            assert!(closer.join().unwrap());
        });
    }

    #[test]
    fn row_handles_expire_when_cursor_advances() {
        let result = boxed(HandleKind::QueryResult, None);
        result.advance_epoch();
        let raw = Box::into_raw(Box::new(1u64)) as RawHandle;
        let row = Handle::adopt_row(
            HandleKind::Tuple,
            &result.lineage(),
            destroy_boxed,
            raw,
            "test",
        )
        .unwrap();
        assert!(row.pin().is_ok());
        result.advance_epoch();
        match row.pin() {
            Err(Error::InvalidHandleState { reason, .. }) => {
                assert!(reason.contains("cursor advanced"), "{reason}")
            }
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn adopt_rejects_null() {
        let err = Handle::adopt(
            HandleKind::Statement,
            None,
            destroy_boxed,
            ptr::null_mut(),
            "Prepare",
        )
        .unwrap_err();
        assert!(matches!(
            err,
            Error::NativeCallFailed {
                stage: "Prepare",
                ..
            }
        ));
    }

    #[test]
    fn lineage_identity() {
        let db = boxed(HandleKind::Database, None);
        let other = boxed(HandleKind::Database, None);
        let conn = boxed(HandleKind::Connection, Some(&db.lineage()));
        assert!(conn.is_child_of(&db.lineage()));
        let db_ptr = db.pin().unwrap().as_ptr();
        assert_eq!(conn.pin().unwrap().parent_ptr(), Some(db_ptr));
        assert!(!conn.is_child_of(&other.lineage()));
        assert!(db.lineage().same_as(&db.lineage()));
        assert_eq!(db.lineage().kind(), HandleKind::Database);
    }
}
