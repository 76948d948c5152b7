//! The dynamic invocation protocol and its hot-reload retry state machine.
//!
//! Invocation resolves a function by name, validates the directory's
//! signature against the statically known call shape (arity, per-argument
//! identifiers, return identifier), and only then reinterprets the callable
//! address and calls it. Any failure along the way is not fatal: it degrades
//! into a [`Continuation`] holding the function name and the argument
//! snapshot, which can be forced after the module hot-reloads.
//!
//! Validation is purely structural and never inspects argument values beyond
//! their declared type, so it is O(arity), side-effect-free, and safe to
//! re-run after every reload attempt.

use std::ffi::c_void;
use std::fmt;
use std::marker::PhantomData;

use moult_abi::{FunctionDefinition, FunctionSignature};

use crate::error::InvokeError;
use crate::marshal::Marshal;
use crate::reflect::{equals_argument_type, equals_return_type, ArgReflect, ReturnReflect};
use crate::runtime::Runtime;

/// Outcome of an invocation attempt: a value, or a deferred retry.
pub enum InvokeResult<O, A> {
    /// The call went through; terminal.
    Resolved(O),
    /// The call could not be made as requested; hold the continuation and
    /// force it after a reload.
    Pending(Continuation<O, A>),
}

impl<O, A> InvokeResult<O, A> {
    pub fn is_resolved(&self) -> bool {
        matches!(self, InvokeResult::Resolved(_))
    }

    pub fn into_result(self) -> Result<O, Continuation<O, A>> {
        match self {
            InvokeResult::Resolved(value) => Ok(value),
            InvokeResult::Pending(continuation) => Err(continuation),
        }
    }
}

/// A deferred, resumable invocation: plain data, no captured closure.
///
/// Created only by a failed or unresolved invocation; consumed exactly once
/// when forced. The failure that produced it is preserved unchanged, so the
/// negative path is idempotent: forcing without a reload reproduces the same
/// classification.
pub struct Continuation<O, A> {
    name: String,
    args: A,
    error: InvokeError,
    _output: PhantomData<fn() -> O>,
}

impl<O, A> Continuation<O, A>
where
    O: Marshal + ReturnReflect,
    A: InvokeArgs,
{
    /// Why the original attempt failed.
    pub fn error(&self) -> &InvokeError {
        &self.error
    }

    /// The function name the attempt targeted.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Check the runtime for an update and, if one was applied, re-run the
    /// whole invocation protocol from scratch with the captured arguments.
    ///
    /// Performs at most one update check and at most one re-invocation. If
    /// the module was not updated the continuation comes back unchanged,
    /// still carrying the original failure. An update-check error is logged
    /// and treated as "not updated".
    ///
    /// Must be forced against a runtime that is still alive; the borrow
    /// makes it impossible to force a continuation past the runtime's
    /// destruction without `unsafe`.
    pub fn force(self, runtime: &Runtime) -> InvokeResult<O, A> {
        match runtime.update() {
            Ok(true) => {
                let Continuation { name, args, .. } = self;
                invoke(runtime, &name, args)
            }
            Ok(false) => InvokeResult::Pending(self),
            Err(err) => {
                log::warn!("update check for `{}` failed: {err}", self.name);
                InvokeResult::Pending(self)
            }
        }
    }

    /// Force up to `max_attempts` times, bounding retry depth against
    /// pathological reload storms. Each attempt is gated by an actual reload
    /// event; this never sleeps or blocks.
    pub fn retry(self, runtime: &Runtime, max_attempts: usize) -> Result<O, Continuation<O, A>> {
        let mut pending = self;
        for _ in 0..max_attempts {
            match pending.force(runtime) {
                InvokeResult::Resolved(value) => return Ok(value),
                InvokeResult::Pending(next) => pending = next,
            }
        }
        Err(pending)
    }
}

impl<O, A> fmt::Debug for Continuation<O, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Continuation")
            .field("name", &self.name)
            .field("error", &self.error)
            .finish()
    }
}

/// Invoke `fn_name` in the module loaded by `runtime`.
///
/// Resolution, validation, marshaling and the call all happen synchronously
/// on the calling thread. On success the marshaled result is returned as
/// [`InvokeResult::Resolved`]; on any resolution or validation failure the
/// arguments are captured into a [`Continuation`] instead — an absent name
/// can legitimately appear after a reload, so nothing here is fatal.
pub fn invoke<O, A>(runtime: &Runtime, fn_name: &str, args: A) -> InvokeResult<O, A>
where
    O: Marshal + ReturnReflect,
    A: InvokeArgs,
{
    let error = match resolve::<O, A>(runtime, fn_name, &args) {
        Ok(def) => {
            // The one place the directory is trusted: the address is
            // reinterpreted with the statically known signature, which the
            // validation above just matched against the declared one.
            let declared_return = unsafe { def.prototype.signature.return_type() };
            let wire = unsafe { args.call::<O>(def.fn_ptr) };
            return InvokeResult::Resolved(O::from_wire(wire, declared_return));
        }
        Err(error) => error,
    };

    log::warn!("deferring invocation of `{fn_name}`: {error}");
    InvokeResult::Pending(Continuation {
        name: fn_name.to_string(),
        args,
        error,
        _output: PhantomData,
    })
}

/// Steps 1–4 of the protocol: directory lookup, arity check, per-argument
/// identifier check, return identifier check. First failure wins.
fn resolve<O, A>(runtime: &Runtime, fn_name: &str, args: &A) -> Result<FunctionDefinition, InvokeError>
where
    O: ReturnReflect,
    A: InvokeArgs,
{
    let def = match runtime.find_function(fn_name) {
        Ok(Some(def)) => def,
        Ok(None) => {
            return Err(InvokeError::LookupFailed(format!(
                "`{fn_name}` is not in the function directory"
            )))
        }
        Err(err) => return Err(InvokeError::LookupFailed(format!("`{fn_name}`: {err}"))),
    };

    validate_signature::<O, A>(&def.prototype.signature, args)?;
    Ok(def)
}

/// Structural signature validation against the static call shape.
fn validate_signature<O, A>(signature: &FunctionSignature, args: &A) -> Result<(), InvokeError>
where
    O: ReturnReflect,
    A: InvokeArgs,
{
    args.validate(signature)?;

    match unsafe { signature.return_type() } {
        Some(declared) => equals_return_type::<O>(declared)
            .map_err(|(expected, found)| InvokeError::ReturnTypeMismatch { expected, found }),
        None => {
            if O::type_id() == <() as ReturnReflect>::type_id() {
                Ok(())
            } else {
                Err(InvokeError::ReturnTypeMismatch {
                    expected: <() as ReturnReflect>::type_name().to_string(),
                    found: O::type_name().to_string(),
                })
            }
        }
    }
}

/// An argument tuple: knows its arity, how to compare itself position by
/// position against a declared signature, and how to push itself through a
/// validated function pointer.
pub trait InvokeArgs: Sized {
    const ARITY: usize;

    /// Compare argument count and each argument's runtime identity with the
    /// declared parameter types.
    fn validate(&self, signature: &FunctionSignature) -> Result<(), InvokeError>;

    /// Reinterpret `fn_ptr` with this tuple's wire shape and call it.
    ///
    /// # Safety
    ///
    /// `fn_ptr` must be the address of an `extern "C"` function whose
    /// parameter and return wire types match this tuple and `O`; this is
    /// exactly what a successful [`InvokeArgs::validate`] plus return-type
    /// check establishes.
    unsafe fn call<O: Marshal>(self, fn_ptr: *const c_void) -> O::Wire;
}

macro_rules! impl_invoke_args {
    ($arity:literal $(, $idx:tt: $A:ident)*) => {
        impl<$($A),*> InvokeArgs for ($($A,)*)
        where
            $($A: Marshal + ArgReflect),*
        {
            const ARITY: usize = $arity;

            fn validate(&self, signature: &FunctionSignature) -> Result<(), InvokeError> {
                if signature.num_args as usize != $arity {
                    return Err(InvokeError::ArityMismatch {
                        expected: $arity,
                        found: signature.num_args as usize,
                    });
                }
                $(
                    {
                        let declared = unsafe { signature.arg($idx) };
                        if let Err((expected, found)) = equals_argument_type(declared, &self.$idx) {
                            return Err(InvokeError::ArgumentTypeMismatch {
                                index: $idx,
                                expected,
                                found,
                            });
                        }
                    }
                )*
                Ok(())
            }

            unsafe fn call<O: Marshal>(self, fn_ptr: *const c_void) -> O::Wire {
                let f: unsafe extern "C" fn($($A::Wire),*) -> O::Wire =
                    std::mem::transmute(fn_ptr);
                f($(self.$idx.to_wire()),*)
            }
        }
    };
}

impl_invoke_args!(0);
impl_invoke_args!(1, 0: A0);
impl_invoke_args!(2, 0: A0, 1: A1);
impl_invoke_args!(3, 0: A0, 1: A1, 2: A2);
impl_invoke_args!(4, 0: A0, 1: A1, 2: A2, 3: A3);
impl_invoke_args!(5, 0: A0, 1: A1, 2: A2, 3: A3, 4: A4);
impl_invoke_args!(6, 0: A0, 1: A1, 2: A2, 3: A3, 4: A4, 5: A5);
impl_invoke_args!(7, 0: A0, 1: A1, 2: A2, 3: A3, 4: A4, 5: A5, 6: A6);
impl_invoke_args!(8, 0: A0, 1: A1, 2: A2, 3: A3, 4: A4, 5: A5, 6: A6, 7: A7);
