//! Garbage-collected object handles.
//!
//! The heap lives in the external runtime; this module only funnels the four
//! mutation entry points (alloc, root, unroot, collect) and the type query
//! through the API table. Rooting is counted per handle: an object stays
//! reachable until its root count returns to zero, so N roots require N
//! unroots. [`RootGuard`] layers scoped acquisition over that raw pair.
//!
//! All operations assume the handle came from [`Runtime::gc_alloc`] or from
//! a prior invocation result; passing a foreign or stale handle is undefined
//! behavior at the boundary and is not checked here.

use moult_abi::{RawGcPtr, TypeDescriptor};

use crate::error::{check, RuntimeError};
use crate::runtime::Runtime;
use crate::structs::StructView;

/// Handle to a garbage-collected object.
///
/// A stable pointer to the runtime's payload pointer: the handle itself is
/// pinned, the payload may move during compaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GcHandle {
    raw: RawGcPtr,
}

impl GcHandle {
    pub(crate) fn from_raw(raw: RawGcPtr) -> GcHandle {
        GcHandle { raw }
    }

    pub fn as_raw(&self) -> RawGcPtr {
        self.raw
    }

    /// The object's current payload address.
    ///
    /// # Safety
    ///
    /// The handle must be live, and the address is only meaningful until the
    /// next collection; hold it only while the object is rooted.
    pub unsafe fn payload(&self) -> *mut u8 {
        (*self.raw) as *mut u8
    }

    /// View this object as a struct, resolving its runtime type first.
    ///
    /// This is the instance-reflection path for GC-backed values: the
    /// returned view carries the object's concrete record identity.
    pub fn as_struct(&self, runtime: &Runtime) -> Result<StructView, RuntimeError> {
        let ty = runtime.gc_type_of(*self)?;
        if !ty.is_struct() {
            return Err(RuntimeError::Api(format!(
                "expected a struct object, found `{}`",
                ty.name()
            )));
        }
        Ok(unsafe { StructView::from_raw_parts(ty, self.payload()) })
    }
}

impl Runtime {
    /// Allocate an instance of `ty` on the runtime's heap.
    pub fn gc_alloc(&self, ty: &TypeDescriptor) -> Result<GcHandle, RuntimeError> {
        let mut obj: RawGcPtr = std::ptr::null();
        let raw = unsafe { (self.api().gc_alloc)(self.handle(), ty, &mut obj) };
        match check(self.api(), raw) {
            Ok(()) => Ok(GcHandle::from_raw(obj)),
            Err(err) => Err(RuntimeError::AllocationFailed(
                err.take_message()
                    .unwrap_or_else(|| "unknown runtime error".to_string()),
            )),
        }
    }

    /// Increment the root count of `obj`, keeping it and everything it
    /// references alive.
    pub fn gc_root(&self, obj: GcHandle) -> Result<(), RuntimeError> {
        let raw = unsafe { (self.api().gc_root)(self.handle(), obj.as_raw()) };
        check(self.api(), raw).map_err(RuntimeError::from)
    }

    /// Decrement the root count of `obj`. Unrooting more times than the
    /// object was rooted is a logic error the runtime does not detect.
    pub fn gc_unroot(&self, obj: GcHandle) -> Result<(), RuntimeError> {
        let raw = unsafe { (self.api().gc_unroot)(self.handle(), obj.as_raw()) };
        check(self.api(), raw).map_err(RuntimeError::from)
    }

    /// Trigger a collection pass. Returns whether any memory was reclaimed;
    /// the runtime may make this a no-op under its own pressure heuristics.
    pub fn gc_collect(&self) -> Result<bool, RuntimeError> {
        let mut reclaimed = false;
        let raw = unsafe { (self.api().gc_collect)(self.handle(), &mut reclaimed) };
        check(self.api(), raw).map_err(RuntimeError::from)?;
        Ok(reclaimed)
    }

    /// The runtime type of `obj`.
    pub fn gc_type_of(&self, obj: GcHandle) -> Result<&TypeDescriptor, RuntimeError> {
        let mut ty: *const TypeDescriptor = std::ptr::null();
        let raw = unsafe { (self.api().gc_ptr_type)(self.handle(), obj.as_raw(), &mut ty) };
        check(self.api(), raw).map_err(RuntimeError::from)?;
        if ty.is_null() {
            return Err(RuntimeError::Api(
                "runtime returned no type descriptor".to_string(),
            ));
        }
        Ok(unsafe { &*ty })
    }
}

/// Scoped root: roots the object on construction and unroots it on every
/// exit path, preserving the runtime's count-based semantics without manual
/// bookkeeping.
pub struct RootGuard<'rt> {
    runtime: &'rt Runtime,
    handle: GcHandle,
}

impl<'rt> RootGuard<'rt> {
    pub fn new(runtime: &'rt Runtime, handle: GcHandle) -> Result<RootGuard<'rt>, RuntimeError> {
        runtime.gc_root(handle)?;
        Ok(RootGuard { runtime, handle })
    }

    pub fn handle(&self) -> GcHandle {
        self.handle
    }
}

impl Drop for RootGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.runtime.gc_unroot(self.handle) {
            log::warn!("failed to unroot {:?}: {err}", self.handle);
        }
    }
}
