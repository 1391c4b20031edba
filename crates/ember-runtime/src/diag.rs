use once_cell::sync::OnceCell;

use crate::config::env_bool;
use ember_contracts::ENV_DEBUG;

static DEBUG: OnceCell<bool> = OnceCell::new();

/// Pins the debug flag. The first caller wins; later calls are ignored.
pub fn init(debug: bool) {
    let _ = DEBUG.set(debug);
}

pub fn enabled() -> bool {
    *DEBUG.get_or_init(|| env_bool(ENV_DEBUG, false))
}

/// Debug diagnostics on stderr, gated by `EMBER_DEBUG`.
macro_rules! diag {
    ($($arg:tt)*) => {
        if $crate::diag::enabled() {
            eprintln!("ember: {}", format_args!($($arg)*));
        }
    };
}

pub(crate) use diag;
