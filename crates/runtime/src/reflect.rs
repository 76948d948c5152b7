//! Per-type reflection capabilities.
//!
//! Two capability shapes exist per supported type:
//!
//! - [`ReturnReflect`] is the *static* capability: the identifier and name of
//!   a type with no instance at hand. Used for return positions.
//! - [`ArgReflect`] is the *instance* capability: the identifier and name of
//!   a concrete value. Used for argument positions, because some value kinds
//!   (notably struct views over user-defined records) only know their type at
//!   runtime.
//!
//! Fundamental types implement both through the same static answer.

use std::collections::HashMap;
use std::ffi::CString;
use std::sync::OnceLock;

use moult_abi::{TypeDescriptor, TypeGroup, TypeId};
use parking_lot::RwLock;

use crate::type_id::type_id_of;

/// Canonical name reported for struct views in return positions. Any
/// struct-group descriptor matches it; the concrete record identity is only
/// known per instance.
pub(crate) const STRUCT_TYPE_NAME: &str = "struct";

/// Static reflection: type identity without an instance.
pub trait ReturnReflect {
    /// The canonical type name.
    fn type_name() -> &'static str;

    /// The content-derived type identifier.
    fn type_id() -> TypeId {
        type_id_of(Self::type_name())
    }
}

/// Instance reflection: type identity of a concrete value.
pub trait ArgReflect {
    /// The canonical type name of this value.
    fn arg_type_name(&self) -> &str;

    /// The content-derived type identifier of this value.
    fn arg_type_id(&self) -> TypeId;
}

/// Marker for fundamental types that can appear in host-provided function
/// signatures; see [`host_descriptor`].
pub trait HostArg: ReturnReflect + Sized {}

/// Return-position counterpart of [`HostArg`]; `()` maps to "no return
/// descriptor".
pub trait HostReturn {
    fn return_descriptor() -> *const TypeDescriptor;
}

impl HostReturn for () {
    fn return_descriptor() -> *const TypeDescriptor {
        std::ptr::null()
    }
}

macro_rules! impl_fundamental_reflect {
    ($($ty:ty => $name:literal),* $(,)?) => {
        $(
            impl ReturnReflect for $ty {
                fn type_name() -> &'static str {
                    $name
                }
            }

            impl ArgReflect for $ty {
                fn arg_type_name(&self) -> &str {
                    <$ty as ReturnReflect>::type_name()
                }

                fn arg_type_id(&self) -> TypeId {
                    <$ty as ReturnReflect>::type_id()
                }
            }

            impl HostArg for $ty {}

            impl HostReturn for $ty {
                fn return_descriptor() -> *const TypeDescriptor {
                    host_descriptor::<$ty>()
                }
            }
        )*
    };
}

impl_fundamental_reflect! {
    bool => "core::bool",
    i8 => "core::i8",
    i16 => "core::i16",
    i32 => "core::i32",
    i64 => "core::i64",
    u8 => "core::u8",
    u16 => "core::u16",
    u32 => "core::u32",
    u64 => "core::u64",
    f32 => "core::f32",
    f64 => "core::f64",
}

impl ReturnReflect for () {
    fn type_name() -> &'static str {
        "core::empty"
    }
}

/// Host-side descriptor for a fundamental type, interned for the process.
///
/// Host-provided functions need argument and return descriptors the module
/// can read; the host owns these the same way the module owns its own. One
/// descriptor (and its name string) is leaked per type, keyed by identifier.
pub fn host_descriptor<T: HostArg>() -> &'static TypeDescriptor {
    static DESCRIPTORS: OnceLock<RwLock<HashMap<TypeId, &'static TypeDescriptor>>> =
        OnceLock::new();

    let table = DESCRIPTORS.get_or_init(|| RwLock::new(HashMap::new()));
    let id = T::type_id();
    if let Some(desc) = table.read().get(&id) {
        return *desc;
    }

    let mut table = table.write();
    *table.entry(id).or_insert_with(|| {
        let name = CString::new(T::type_name())
            .expect("canonical type names contain no NUL")
            .into_raw();
        Box::leak(Box::new(TypeDescriptor {
            id,
            name,
            size_in_bits: (std::mem::size_of::<T>() * 8) as u32,
            alignment: std::mem::align_of::<T>() as u8,
            group: TypeGroup::Fundamental,
        }))
    })
}

/// Compare a declared parameter type against the runtime identity of the
/// supplied argument. On mismatch, returns `(expected, found)` type names for
/// diagnostics.
pub(crate) fn equals_argument_type<A: ArgReflect>(
    declared: &TypeDescriptor,
    arg: &A,
) -> Result<(), (String, String)> {
    if declared.id == arg.arg_type_id() {
        Ok(())
    } else {
        Err((declared.name().to_string(), arg.arg_type_name().to_string()))
    }
}

/// Compare a declared return (or field) type against the statically known
/// type `T`. Fundamental declarations compare identifiers; struct-group
/// declarations accept exactly the struct-view sentinel, since a record's
/// concrete identity is an instance property.
pub(crate) fn equals_return_type<T: ReturnReflect>(
    declared: &TypeDescriptor,
) -> Result<(), (String, String)> {
    let matches = match declared.group {
        TypeGroup::Fundamental => declared.id == T::type_id(),
        TypeGroup::Struct => T::type_id() == type_id_of(STRUCT_TYPE_NAME),
    };

    if matches {
        Ok(())
    } else {
        Err((declared.name().to_string(), T::type_name().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fundamental_names() {
        assert_eq!(<i64 as ReturnReflect>::type_name(), "core::i64");
        assert_eq!(<f32 as ReturnReflect>::type_name(), "core::f32");
        assert_eq!(<() as ReturnReflect>::type_name(), "core::empty");
    }

    #[test]
    fn static_and_instance_reflection_agree_for_fundamentals() {
        let value = 17i64;
        assert_eq!(value.arg_type_id(), <i64 as ReturnReflect>::type_id());
        assert_eq!(value.arg_type_name(), <i64 as ReturnReflect>::type_name());
    }

    #[test]
    fn host_descriptor_is_interned() {
        let a = host_descriptor::<i64>();
        let b = host_descriptor::<i64>();
        assert!(std::ptr::eq(a, b));
        assert_eq!(a.name(), "core::i64");
        assert_eq!(a.id, <i64 as ReturnReflect>::type_id());
        assert_eq!(a.size_in_bits, 64);
        assert_eq!(a.group, TypeGroup::Fundamental);
    }

    #[test]
    fn return_type_comparison_reports_both_names() {
        let decl = host_descriptor::<i64>();
        assert!(equals_return_type::<i64>(decl).is_ok());

        let (expected, found) = equals_return_type::<f64>(decl).unwrap_err();
        assert_eq!(expected, "core::i64");
        assert_eq!(found, "core::f64");
    }

    #[test]
    fn argument_comparison_uses_instance_identity() {
        let decl = host_descriptor::<f64>();
        assert!(equals_argument_type(decl, &1.5f64).is_ok());
        let (expected, found) = equals_argument_type(decl, &1i64).unwrap_err();
        assert_eq!(expected, "core::f64");
        assert_eq!(found, "core::i64");
    }
}
