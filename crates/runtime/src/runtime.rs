//! The runtime handle.
//!
//! A [`Runtime`] owns a loaded runtime library, its resolved entry-point
//! table and the handle to one runtime instance. It exposes the function
//! directory lookup and hot-reload polling the invocation protocol is built
//! on, and releases the instance exactly once, on drop.

use std::ffi::{c_void, CString};
use std::fmt;
use std::mem::MaybeUninit;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use libloading::Library;
use moult_abi::{
    FunctionDefinition, FunctionPrototype, FunctionSignature, RawRuntimeHandle, RuntimeApi,
    RuntimeOptions, TypeDescriptor, RUNTIME_API_SYMBOL,
};

use crate::error::{check, RuntimeError};
use crate::reflect::{host_descriptor, HostArg, HostReturn};

/// An instantiated runtime with a loaded module.
///
/// Exclusively owned; dropping it destroys the runtime instance. All
/// descriptors and function definitions borrowed through this handle become
/// invalid when it drops.
pub struct Runtime {
    api: Arc<RuntimeApi>,
    handle: RawRuntimeHandle,
    // Preregistered host functions: the runtime keeps pointers into this
    // storage for its lifetime.
    _host_functions: Vec<HostFunction>,
    // Keeps the runtime library mapped while the handle is alive.
    _library: Option<Library>,
}

impl Runtime {
    /// Start building a runtime that will load the module at `module_path`.
    pub fn builder(module_path: impl Into<PathBuf>) -> RuntimeBuilder {
        RuntimeBuilder {
            module_path: module_path.into(),
            functions: Vec::new(),
        }
    }

    /// Look up `fn_name` in the module's function directory.
    ///
    /// Returns `Ok(None)` when the name is absent — after a hot reload the
    /// same lookup may start succeeding.
    pub fn find_function(&self, fn_name: &str) -> Result<Option<FunctionDefinition>, RuntimeError> {
        let name = CString::new(fn_name)
            .map_err(|_| RuntimeError::Api(format!("function name `{fn_name}` contains NUL")))?;

        let mut has_fn = false;
        let mut def = MaybeUninit::<FunctionDefinition>::uninit();
        let raw = unsafe {
            (self.api.find_function)(self.handle, name.as_ptr(), &mut has_fn, def.as_mut_ptr())
        };
        check(&self.api, raw).map_err(RuntimeError::from)?;

        Ok(has_fn.then(|| unsafe { def.assume_init() }))
    }

    /// Poll for and apply a hot reload. Returns whether the module was
    /// updated; if so, previously resolved definitions are stale and must be
    /// re-resolved before use.
    pub fn update(&self) -> Result<bool, RuntimeError> {
        let mut updated = false;
        let raw = unsafe { (self.api.runtime_update)(self.handle, &mut updated) };
        check(&self.api, raw).map_err(RuntimeError::from)?;
        Ok(updated)
    }

    pub(crate) fn api(&self) -> &Arc<RuntimeApi> {
        &self.api
    }

    pub(crate) fn handle(&self) -> RawRuntimeHandle {
        self.handle
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("handle", &self.handle)
            .field("host_functions", &self._host_functions.len())
            .finish_non_exhaustive()
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        unsafe { (self.api.runtime_destroy)(self.handle) };
    }
}

/// Builder for a [`Runtime`]: module path plus host functions the module can
/// call back into.
pub struct RuntimeBuilder {
    module_path: PathBuf,
    functions: Vec<HostFunction>,
}

impl RuntimeBuilder {
    /// Preregister a host function under `name`. It is inserted into the
    /// function directory before the module loads.
    pub fn insert_fn<F: IntoHostFunction>(mut self, name: &str, f: F) -> Self {
        self.functions.push(f.into_host_function(name));
        self
    }

    /// Load the runtime shared library at `runtime_library`, resolve its
    /// entry-point table and create the runtime.
    pub fn load(self, runtime_library: impl AsRef<Path>) -> Result<Runtime, RuntimeError> {
        let path = runtime_library.as_ref();
        let library = unsafe { Library::new(path) }.map_err(|e| {
            RuntimeError::LoadFailed(format!("failed to load `{}`: {e}", path.display()))
        })?;

        let api = unsafe {
            let symbol = library.get::<*const RuntimeApi>(RUNTIME_API_SYMBOL).map_err(|e| {
                RuntimeError::LoadFailed(format!(
                    "`{}` does not export a runtime API: {e}",
                    path.display()
                ))
            })?;
            **symbol
        };

        self.create(api, Some(library))
    }

    /// Create the runtime against an already-resolved entry-point table: a
    /// runtime statically linked into the host, or a test harness.
    pub fn with_api(self, api: RuntimeApi) -> Result<Runtime, RuntimeError> {
        self.create(api, None)
    }

    fn create(self, api: RuntimeApi, library: Option<Library>) -> Result<Runtime, RuntimeError> {
        let api = Arc::new(api);
        let module_path = CString::new(self.module_path.to_string_lossy().into_owned())
            .map_err(|_| RuntimeError::LoadFailed("module path contains NUL".to_string()))?;

        let definitions: Vec<FunctionDefinition> =
            self.functions.iter().map(HostFunction::as_definition).collect();
        let options = RuntimeOptions {
            functions: if definitions.is_empty() {
                std::ptr::null()
            } else {
                definitions.as_ptr()
            },
            num_functions: definitions.len() as u32,
        };

        let mut handle = RawRuntimeHandle(std::ptr::null_mut());
        let raw = unsafe { (api.runtime_create)(module_path.as_ptr(), options, &mut handle) };
        if let Err(err) = check(&api, raw) {
            return Err(RuntimeError::LoadFailed(
                err.take_message()
                    .unwrap_or_else(|| "unknown runtime error".to_string()),
            ));
        }

        Ok(Runtime {
            api,
            handle,
            _host_functions: self.functions,
            _library: library,
        })
    }
}

/// A host function with its reflected signature, ready to be handed to the
/// runtime through [`RuntimeOptions`].
pub struct HostFunction {
    name: CString,
    arg_types: Box<[*const TypeDescriptor]>,
    return_type: *const TypeDescriptor,
    fn_ptr: *const c_void,
}

impl HostFunction {
    fn as_definition(&self) -> FunctionDefinition {
        FunctionDefinition {
            prototype: FunctionPrototype {
                name: self.name.as_ptr(),
                signature: FunctionSignature {
                    arg_types: self.arg_types.as_ptr(),
                    return_type: self.return_type,
                    num_args: self.arg_types.len() as u16,
                },
            },
            fn_ptr: self.fn_ptr,
        }
    }
}

/// Reflect an `extern "C"` function pointer into a [`HostFunction`].
pub trait IntoHostFunction {
    fn into_host_function(self, name: &str) -> HostFunction;
}

macro_rules! impl_into_host_function {
    ($($A:ident),*) => {
        impl<R: HostReturn, $($A: HostArg),*> IntoHostFunction for extern "C" fn($($A),*) -> R {
            fn into_host_function(self, name: &str) -> HostFunction {
                HostFunction {
                    name: CString::new(name).expect("function names contain no NUL"),
                    arg_types: vec![
                        $(host_descriptor::<$A>() as *const TypeDescriptor),*
                    ]
                    .into_boxed_slice(),
                    return_type: R::return_descriptor(),
                    fn_ptr: self as *const c_void,
                }
            }
        }
    };
}

impl_into_host_function!();
impl_into_host_function!(A0);
impl_into_host_function!(A0, A1);
impl_into_host_function!(A0, A1, A2);
impl_into_host_function!(A0, A1, A2, A3);
impl_into_host_function!(A0, A1, A2, A3, A4);
impl_into_host_function!(A0, A1, A2, A3, A4, A5);
impl_into_host_function!(A0, A1, A2, A3, A4, A5, A6);
impl_into_host_function!(A0, A1, A2, A3, A4, A5, A6, A7);
