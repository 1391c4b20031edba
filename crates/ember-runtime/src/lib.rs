//! Runtime core linked into compiled programs.
//!
//! The Rust API is used by the `ember` developer CLI and by tests; generated
//! code reaches the same functionality through the `ember_*` symbols in
//! [`ffi`].

pub mod chan;
pub mod config;
pub mod decode;
pub mod diag;
pub mod facade;
pub mod ffi;
pub mod metrics;
pub mod object;
pub mod sched;

pub use chan::{ChanError, Channel, TryRecvError, TrySendError};
pub use config::RuntimeConfig;
pub use decode::{decode, parse_scalar, DecodeError, Decoded, Format, ScalarDecoder};
pub use facade::{print_newline, print_value, runtime_init, runtime_shutdown, Runtime};
pub use metrics::Metrics;
pub use object::{
    get_attr_generic, set_attr_generic, FieldSpec, LayoutError, LayoutId, LayoutRegistry,
    ObjectError, ObjectLayout,
};
pub use sched::{Scheduler, ShutDown, Signal, TaskError, TaskHandle, TaskResult, TaskState};

pub use ember_value::{Arena, ArenaError, ArenaRef, Value, ValueKind};
