//! Moult runtime bindings
//!
//! A typed dynamic invocation layer for hot-reloadable modules:
//! - Content-addressed type identity, agreed on across independently
//!   compiled binaries without a shared registry
//! - Signature-checked calls with marshaling across the C ABI
//! - Transparent retry after a hot reload: mismatches degrade into
//!   continuations instead of errors
//! - Garbage-collected object handles with counted roots
//!
//! Everything is synchronous and single-threaded: every operation runs to
//! completion on the calling thread. The only asynchrony is external — the
//! module may be reloaded between two invocation attempts.
//!
//! # Usage
//!
//! ```ignore
//! let runtime = Runtime::builder("mod.moultlib").load("libmoult_runtime.so")?;
//!
//! match invoke::<i64, _>(&runtime, "add", (2i64, 3i64)) {
//!     InvokeResult::Resolved(sum) => println!("{sum}"),
//!     InvokeResult::Pending(retry) => {
//!         // the module is stale; force after the next hot reload
//!         let _ = retry.force(&runtime);
//!     }
//! }
//! ```

pub mod error;
pub mod gc;
pub mod invoke;
pub mod marshal;
pub mod reflect;
pub mod runtime;
pub mod structs;
pub mod type_id;

pub use moult_abi as abi;

pub use error::{ErrorHandle, FieldError, InvokeError, RuntimeError};
pub use gc::{GcHandle, RootGuard};
pub use invoke::{invoke, Continuation, InvokeArgs, InvokeResult};
pub use marshal::Marshal;
pub use reflect::{host_descriptor, ArgReflect, ReturnReflect};
pub use runtime::{HostFunction, IntoHostFunction, Runtime, RuntimeBuilder};
pub use structs::StructView;
pub use type_id::type_id_of;
