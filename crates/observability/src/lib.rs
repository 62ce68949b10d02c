//! Process-wide tracing setup.

/// Initialize process-wide logging with the default `info` filter.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    subscriber::init_with_default("info");
}

/// Subscriber configuration (filters, formatting).
pub mod subscriber;
