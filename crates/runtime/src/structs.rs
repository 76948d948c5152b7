//! Typed views over externally owned struct values.
//!
//! A [`StructView`] wraps a struct's base address together with its runtime
//! type descriptor. Field access resolves the field by name in the external
//! field table, validates the declared field type against the requested Rust
//! type, and only then reinterprets the bytes at `base + offset`. Offset
//! arithmetic never leaves this module.

use std::ffi::CStr;
use std::fmt;
use std::ptr;

use moult_abi::{StructLayout, TypeDescriptor, TypeId};

use crate::error::FieldError;
use crate::marshal::Marshal;
use crate::reflect::{equals_return_type, ArgReflect, ReturnReflect, STRUCT_TYPE_NAME};

/// Non-owning view over a struct value owned by the runtime.
///
/// Valid for as long as the backing allocation is: either a rooted GC object
/// or a pinned value-struct wrapper owned elsewhere. The view is a plain
/// `(descriptor, base)` pair and is freely copyable.
#[derive(Clone, Copy)]
pub struct StructView {
    desc: *const TypeDescriptor,
    base: *mut u8,
}

impl StructView {
    /// Build a view from a struct-group descriptor and the value's base
    /// address.
    ///
    /// # Safety
    ///
    /// `desc` must be a struct-group descriptor owned by the runtime (and
    /// therefore embedded in a `StructDescriptor`), and `base` must point at
    /// a live instance of that type for the lifetime of the view.
    pub unsafe fn from_raw_parts(desc: &TypeDescriptor, base: *mut u8) -> StructView {
        debug_assert!(desc.is_struct(), "descriptor must describe a struct");
        StructView { desc, base }
    }

    /// The struct's canonical type name.
    pub fn type_name(&self) -> &str {
        self.descriptor().name()
    }

    /// The struct's runtime type descriptor.
    pub fn descriptor(&self) -> &TypeDescriptor {
        unsafe { &*self.desc }
    }

    pub(crate) fn base(&self) -> *mut u8 {
        self.base
    }

    fn layout(&self) -> &StructLayout {
        unsafe { self.descriptor().struct_layout() }
            .expect("struct views are only constructed over struct-group descriptors")
    }

    /// Resolve a field by name against the external field table.
    fn field(&self, name: &str) -> Result<(&TypeDescriptor, usize), FieldError> {
        let layout = self.layout();
        for idx in 0..layout.num_fields as usize {
            let field_name = unsafe { CStr::from_ptr(*layout.field_names.add(idx)) };
            if field_name.to_bytes() == name.as_bytes() {
                let ty = unsafe { &**layout.field_types.add(idx) };
                let offset = unsafe { *layout.field_offsets.add(idx) } as usize;
                return Ok((ty, offset));
            }
        }

        log::warn!(
            "struct `{}` does not contain field `{name}`",
            self.type_name()
        );
        Err(FieldError::FieldNotFound {
            struct_name: self.type_name().to_string(),
            field: name.to_string(),
        })
    }

    /// Resolve a field and validate its declared type against `T`.
    fn typed_field<T: ReturnReflect>(
        &self,
        name: &str,
    ) -> Result<(&TypeDescriptor, usize), FieldError> {
        let (ty, offset) = self.field(name)?;
        if let Err((expected, found)) = equals_return_type::<T>(ty) {
            log::warn!(
                "mismatched types for `{}::{name}`: expected `{expected}`, found `{found}`",
                self.type_name()
            );
            return Err(FieldError::FieldTypeMismatch {
                struct_name: self.type_name().to_string(),
                field: name.to_string(),
                expected,
                found,
            });
        }
        Ok((ty, offset))
    }

    /// Read the value of a field.
    pub fn get<T: Marshal + ReturnReflect>(&self, field: &str) -> Result<T, FieldError> {
        let (ty, offset) = self.typed_field::<T>(field)?;
        let wire = unsafe { ptr::read_unaligned(self.base.add(offset) as *const T::Wire) };
        Ok(T::from_wire(wire, Some(ty)))
    }

    /// Overwrite the value of a field.
    pub fn set<T: Marshal + ReturnReflect>(&self, field: &str, value: T) -> Result<(), FieldError> {
        let (_, offset) = self.typed_field::<T>(field)?;
        unsafe { ptr::write_unaligned(self.base.add(offset) as *mut T::Wire, value.to_wire()) };
        Ok(())
    }

    /// Swap a new value into a field, returning the previous one.
    pub fn replace<T: Marshal + ReturnReflect>(
        &self,
        field: &str,
        value: T,
    ) -> Result<T, FieldError> {
        let (ty, offset) = self.typed_field::<T>(field)?;
        let loc = unsafe { self.base.add(offset) } as *mut T::Wire;
        let previous = unsafe { ptr::read_unaligned(loc) };
        unsafe { ptr::write_unaligned(loc, value.to_wire()) };
        Ok(T::from_wire(previous, Some(ty)))
    }
}

impl fmt::Debug for StructView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StructView<{}>({:p})", self.type_name(), self.base)
    }
}

impl Marshal for StructView {
    type Wire = *mut u8;

    fn to_wire(self) -> *mut u8 {
        self.base
    }

    fn from_wire(wire: *mut u8, ty: Option<&TypeDescriptor>) -> StructView {
        let ty = ty.expect("struct marshaling requires a type descriptor");
        unsafe { StructView::from_raw_parts(ty, wire) }
    }
}

impl ReturnReflect for StructView {
    fn type_name() -> &'static str {
        STRUCT_TYPE_NAME
    }
}

impl ArgReflect for StructView {
    fn arg_type_name(&self) -> &str {
        self.type_name()
    }

    fn arg_type_id(&self) -> TypeId {
        self.descriptor().id
    }
}
