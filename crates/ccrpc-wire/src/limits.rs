use std::sync::OnceLock;

/// Default cap on a single envelope payload: 64 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 64 * 1024 * 1024;

/// Environment variable overriding the default payload cap, in bytes.
pub const MAX_PAYLOAD_ENV: &str = "CCRPC_MAX_PAYLOAD";

static MAX_PAYLOAD: OnceLock<usize> = OnceLock::new();

/// The process-wide payload cap: `CCRPC_MAX_PAYLOAD` if set and parseable,
/// otherwise [`DEFAULT_MAX_PAYLOAD`]. Read once; later environment changes
/// are not observed. Servers and proxies may still configure a tighter
/// per-instance cap.
pub fn max_payload() -> usize {
    *MAX_PAYLOAD.get_or_init(|| {
        std::env::var(MAX_PAYLOAD_ENV)
            .ok()
            .and_then(|v| v.trim().parse::<usize>().ok())
            .filter(|&n| n > 0)
            .unwrap_or(DEFAULT_MAX_PAYLOAD)
    })
}
