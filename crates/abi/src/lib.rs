//! Wire-level ABI shared between the Moult runtime and its hosts.
//!
//! Everything in this crate is a passive `#[repr(C)]` declaration of data the
//! runtime library owns. Hosts borrow these shapes read-only for the duration
//! of a call; the runtime is responsible for keeping them alive while the
//! module they describe is loaded.
//!
//! A runtime shared library exports a single symbol, [`RUNTIME_API_SYMBOL`],
//! holding a [`RuntimeApi`] table of entry points. Hosts resolve that one
//! symbol and go through the table for every boundary operation.

use std::ffi::{c_char, c_void, CStr};
use std::fmt;

/// Number of bytes in a [`TypeId`].
pub const TYPE_ID_LEN: usize = 16;

/// Content-derived identifier for a type.
///
/// Two independently compiled binaries agree a value is "the same type" by
/// deriving this identifier from the type's canonical name with a fixed
/// digest (SHA-256, truncated to 16 bytes). Compared byte-wise; never derived
/// from memory addresses or compiler-internal indices.
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeId {
    pub b: [u8; TYPE_ID_LEN],
}

impl fmt::Debug for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeId(")?;
        for byte in &self.b {
            write!(f, "{:02x}", byte)?;
        }
        write!(f, ")")
    }
}

/// Groups of types that share calling conventions.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TypeGroup {
    /// Fundamental types: `()`, `bool`, integers, floats.
    Fundamental = 0,
    /// Struct types: user-defined records.
    Struct = 1,
}

/// How a struct's memory is managed by the runtime.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemoryKind {
    /// Heap-allocated, garbage collected, reference semantics.
    Gc = 0,
    /// Stack-allocated, value semantics. When crossing the ABI the runtime
    /// pins a heap copy that must be released by whoever requested it.
    Value = 1,
}

/// The runtime's self-description of a type.
///
/// Owned by the loaded module; hosts only ever hold `&TypeDescriptor`
/// borrowed from the function directory or the GC.
#[repr(C)]
pub struct TypeDescriptor {
    /// Content-derived type identifier.
    pub id: TypeId,
    /// Canonical display name (null-terminated UTF-8).
    pub name: *const c_char,
    /// Exact size in bits, without padding.
    pub size_in_bits: u32,
    /// Alignment in bytes.
    pub alignment: u8,
    /// Type group.
    pub group: TypeGroup,
}

impl TypeDescriptor {
    /// The canonical display name. Empty if the runtime supplied a null
    /// pointer.
    pub fn name(&self) -> &str {
        if self.name.is_null() {
            return "";
        }
        unsafe { CStr::from_ptr(self.name) }.to_str().unwrap_or("")
    }

    pub fn is_struct(&self) -> bool {
        self.group == TypeGroup::Struct
    }

    /// The field table of a struct-group descriptor.
    ///
    /// Struct descriptors are declared as the leading member of a
    /// [`StructDescriptor`], so the layout sits directly behind the
    /// descriptor in memory. Returns `None` for fundamental types.
    ///
    /// # Safety
    ///
    /// `self` must be owned by the runtime and, when `group` is
    /// [`TypeGroup::Struct`], must be embedded in a [`StructDescriptor`].
    pub unsafe fn struct_layout(&self) -> Option<&StructLayout> {
        if !self.is_struct() {
            return None;
        }
        let outer = self as *const TypeDescriptor as *const StructDescriptor;
        Some(&(*outer).layout)
    }
}

// Safety: descriptor tables are immutable once published by the runtime and
// stay alive while the module is loaded.
unsafe impl Send for TypeDescriptor {}
unsafe impl Sync for TypeDescriptor {}

/// Field table of a struct type: parallel arrays of names, types, and byte
/// offsets, all owned by the runtime.
#[repr(C)]
pub struct StructLayout {
    /// Field names (null-terminated UTF-8), `num_fields` entries.
    pub field_names: *const *const c_char,
    /// Field type descriptors, `num_fields` entries.
    pub field_types: *const *const TypeDescriptor,
    /// Field byte offsets from the struct base, `num_fields` entries.
    pub field_offsets: *const u16,
    /// Number of fields.
    pub num_fields: u16,
    /// Memory management kind.
    pub memory_kind: MemoryKind,
}

// Safety: same contract as `TypeDescriptor`.
unsafe impl Send for StructLayout {}
unsafe impl Sync for StructLayout {}

/// A struct-group type descriptor together with its field table.
///
/// The runtime declares struct types with this shape; hosts reach the layout
/// through [`TypeDescriptor::struct_layout`].
#[repr(C)]
pub struct StructDescriptor {
    pub ty: TypeDescriptor,
    pub layout: StructLayout,
}

// Safety: same contract as `TypeDescriptor`.
unsafe impl Send for StructDescriptor {}
unsafe impl Sync for StructDescriptor {}

/// A function's type signature: ordered argument descriptors and an optional
/// return descriptor.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct FunctionSignature {
    /// Argument type descriptors, `num_args` entries.
    pub arg_types: *const *const TypeDescriptor,
    /// Return type descriptor; null for functions returning nothing.
    pub return_type: *const TypeDescriptor,
    /// Number of arguments.
    pub num_args: u16,
}

impl FunctionSignature {
    /// Borrow the descriptor of argument `idx`.
    ///
    /// # Safety
    ///
    /// `idx` must be below `num_args` and the signature must be borrowed from
    /// a live function directory entry.
    pub unsafe fn arg(&self, idx: usize) -> &TypeDescriptor {
        &**self.arg_types.add(idx)
    }

    /// Borrow the return type descriptor, if the function returns a value.
    ///
    /// # Safety
    ///
    /// The signature must be borrowed from a live function directory entry.
    pub unsafe fn return_type(&self) -> Option<&TypeDescriptor> {
        self.return_type.as_ref()
    }
}

/// A function's name and signature, without an implementation.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct FunctionPrototype {
    /// Function name (null-terminated UTF-8).
    pub name: *const c_char,
    /// Type signature.
    pub signature: FunctionSignature,
}

impl FunctionPrototype {
    pub fn name(&self) -> &str {
        if self.name.is_null() {
            return "";
        }
        unsafe { CStr::from_ptr(self.name) }.to_str().unwrap_or("")
    }
}

/// A callable function: prototype plus an untyped code pointer.
///
/// `fn_ptr` may only be reinterpreted as a concrete function pointer after
/// the signature has been validated against the caller's static call shape.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct FunctionDefinition {
    pub prototype: FunctionPrototype,
    pub fn_ptr: *const c_void,
}

/// Options for constructing a runtime.
///
/// `functions` may preregister host-provided functions the module can call
/// back into; they are inserted into the directory before the module loads.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct RuntimeOptions {
    /// Host function definitions, `num_functions` entries. May be null when
    /// `num_functions` is zero.
    pub functions: *const FunctionDefinition,
    /// Number of entries in `functions`.
    pub num_functions: u32,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        RuntimeOptions {
            functions: std::ptr::null(),
            num_functions: 0,
        }
    }
}

/// Opaque token identifying an error object owned by the runtime.
///
/// Zero means "no error". Non-zero tokens must be released exactly once via
/// [`RuntimeApi::error_destroy`].
#[repr(transparent)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RawErrorHandle(pub usize);

impl RawErrorHandle {
    pub const NONE: RawErrorHandle = RawErrorHandle(0);

    /// Whether the token refers to an actual error object.
    pub fn is_error(&self) -> bool {
        self.0 != 0
    }
}

/// Opaque handle to a loaded runtime instance.
#[repr(transparent)]
#[derive(Clone, Copy, Debug)]
pub struct RawRuntimeHandle(pub *mut c_void);

/// Raw GC object handle: a stable pointer to the runtime's payload pointer.
///
/// The outer pointer is pinned for the handle's lifetime; the inner payload
/// pointer may move, e.g. during compaction. Dereference the indirection on
/// every access, never cache the payload address.
pub type RawGcPtr = *const *mut c_void;

/// Entry points exported by a Moult runtime library.
///
/// A runtime shared library exports one static of this type under
/// [`RUNTIME_API_SYMBOL`]; hosts resolve the symbol once and call through the
/// table. Every fallible entry returns a [`RawErrorHandle`] that is
/// [`RawErrorHandle::NONE`] on success.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct RuntimeApi {
    /// Load the module at `library_path` and its dependencies, inserting any
    /// host functions from `options` first. Writes the new handle on success.
    pub runtime_create: unsafe extern "C" fn(
        library_path: *const c_char,
        options: RuntimeOptions,
        handle: *mut RawRuntimeHandle,
    ) -> RawErrorHandle,

    /// Release all resources of a runtime. Call exactly once per successful
    /// create.
    pub runtime_destroy: unsafe extern "C" fn(handle: RawRuntimeHandle),

    /// Look up `fn_name` in the module's function directory. Writes whether
    /// the function exists and, if so, its definition.
    pub find_function: unsafe extern "C" fn(
        handle: RawRuntimeHandle,
        fn_name: *const c_char,
        has_fn: *mut bool,
        fn_def: *mut FunctionDefinition,
    ) -> RawErrorHandle,

    /// Poll for and apply a hot reload. Writes whether the module was
    /// updated. Side-effecting: descriptors and definitions obtained before
    /// an update that reports `true` are stale.
    pub runtime_update:
        unsafe extern "C" fn(handle: RawRuntimeHandle, updated: *mut bool) -> RawErrorHandle,

    /// Allocate an instance of `ty` on the garbage-collected heap. Writes
    /// the new object handle on success.
    pub gc_alloc: unsafe extern "C" fn(
        handle: RawRuntimeHandle,
        ty: *const TypeDescriptor,
        obj: *mut RawGcPtr,
    ) -> RawErrorHandle,

    /// Trigger a collection pass. Writes whether any memory was reclaimed.
    pub gc_collect:
        unsafe extern "C" fn(handle: RawRuntimeHandle, reclaimed: *mut bool) -> RawErrorHandle,

    /// Increment the root count of `obj`. An object stays alive until its
    /// root count returns to zero: N roots require N unroots.
    pub gc_root: unsafe extern "C" fn(handle: RawRuntimeHandle, obj: RawGcPtr) -> RawErrorHandle,

    /// Decrement the root count of `obj`. Unrooting below zero is a caller
    /// logic error the runtime does not detect.
    pub gc_unroot: unsafe extern "C" fn(handle: RawRuntimeHandle, obj: RawGcPtr) -> RawErrorHandle,

    /// Write the runtime type descriptor of `obj`.
    pub gc_ptr_type: unsafe extern "C" fn(
        handle: RawRuntimeHandle,
        obj: RawGcPtr,
        ty: *mut *const TypeDescriptor,
    ) -> RawErrorHandle,

    /// The diagnostic message of an error token, or null if there is none.
    /// The returned string is owned by the error object.
    pub error_message: unsafe extern "C" fn(error: RawErrorHandle) -> *const c_char,

    /// Release an error token. Passing [`RawErrorHandle::NONE`] is a no-op.
    pub error_destroy: unsafe extern "C" fn(error: RawErrorHandle),
}

/// Name of the [`RuntimeApi`] static a runtime library exports.
pub const RUNTIME_API_SYMBOL: &[u8] = b"MOULT_RUNTIME_API";

/// Declare the [`RuntimeApi`] export of a runtime library.
///
/// ```rust,ignore
/// moult_abi::declare_runtime_api! {
///     runtime_create: create,
///     runtime_destroy: destroy,
///     find_function: find_function,
///     runtime_update: update,
///     gc_alloc: gc_alloc,
///     gc_collect: gc_collect,
///     gc_root: gc_root,
///     gc_unroot: gc_unroot,
///     gc_ptr_type: gc_ptr_type,
///     error_message: error_message,
///     error_destroy: error_destroy,
/// }
/// ```
#[macro_export]
macro_rules! declare_runtime_api {
    ($($field:ident: $entry:expr),* $(,)?) => {
        #[no_mangle]
        pub static MOULT_RUNTIME_API: $crate::RuntimeApi = $crate::RuntimeApi {
            $($field: $entry),*
        };
    };
}
