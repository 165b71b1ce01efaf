/// Domain-tagged logging macros.
///
/// Each macro injects a `domain` field so log consumers can filter by
/// subsystem. Domains in use: `sys` (lifecycle), `pipe` (metric pipelines),
/// `sink` (output delivery), `conf` (configuration).
///
/// ```ignore
/// tl_info!(sys, metrics = 3, "runtime started");
/// tl_warn!(sink, sink = name, error = %e, "sink write failed");
/// ```
///
/// The domain is a bare identifier, not a string.

#[doc(hidden)]
macro_rules! tl_log {
    ($level:ident, $domain:ident, $($field:tt)*) => {
        tracing::$level!(domain = stringify!($domain), $($field)*)
    };
}

macro_rules! tl_error {
    ($domain:ident, $($rest:tt)*) => {
        tl_log!(error, $domain, $($rest)*)
    };
}

macro_rules! tl_warn {
    ($domain:ident, $($rest:tt)*) => {
        tl_log!(warn, $domain, $($rest)*)
    };
}

macro_rules! tl_info {
    ($domain:ident, $($rest:tt)*) => {
        tl_log!(info, $domain, $($rest)*)
    };
}

macro_rules! tl_debug {
    ($domain:ident, $($rest:tt)*) => {
        tl_log!(debug, $domain, $($rest)*)
    };
}

#[allow(unused_macros)]
macro_rules! tl_trace {
    ($domain:ident, $($rest:tt)*) => {
        tl_log!(trace, $domain, $($rest)*)
    };
}
