/// In debug builds, panics just like `debug_assert!` — these catch broken
/// per-record invariants (single-owner mutex, non-negative pending counter)
/// during development without taking down a production server over one bad
/// connection.
/// In release builds, logs via `tracing::error!` instead of panicking.
#[macro_export]
macro_rules! safe_assert {
    ($cond:expr $(,)?) => {
        #[cfg(debug_assertions)]
        {
            debug_assert!($cond);
        }
        #[cfg(not(debug_assertions))]
        {
            if !$cond {
                tracing::error!("invariant violated: {}", stringify!($cond));
            }
        }
    };
    ($cond:expr, $($arg:tt)+) => {
        #[cfg(debug_assertions)]
        {
            debug_assert!($cond, $($arg)+);
        }
        #[cfg(not(debug_assertions))]
        {
            if !$cond {
                tracing::error!("invariant violated: {}", format!($($arg)+));
            }
        }
    };
}

/// Same trade-off as [`safe_assert`] for an unconditional "this should be
/// unreachable" site.
#[macro_export]
macro_rules! safe_panic {
    ($($arg:tt)*) => {
        if cfg!(debug_assertions) {
            panic!($($arg)*);
        } else {
            tracing::error!($($arg)*);
        }
    };
}
