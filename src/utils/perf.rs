//! Memory measurement for the experiment binaries.
//!
//! Values come from `/proc/self/status` and are only available on Linux. Each
//! run of `blockmul` happens in its own process, so the high-water marks read
//! here belong to a single multiplication variant.

/// Reads a `kB` valued field such as `VmHWM` from `/proc/self/status`.
#[cfg(target_os = "linux")]
fn status_field_kb(field: &str) -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    parse_status_field(&status, field)
}

#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_status_field(status: &str, field: &str) -> Option<u64> {
    status.lines().find_map(|line| {
        let rest = line.strip_prefix(field)?.strip_prefix(':')?;
        rest.split_whitespace().next()?.parse().ok()
    })
}

/// Peak resident set size of the current process, in kB.
///
/// Uses `VmHWM` (the resident high-water mark) rather than `VmPeak`, which also
/// counts reserved but untouched address space such as the rayon thread stacks.
/// Returns 0 when the value cannot be read.
#[cfg(target_os = "linux")]
pub fn get_peak_rss_kb() -> u64 {
    status_field_kb("VmHWM").unwrap_or(0)
}

#[cfg(not(target_os = "linux"))]
pub fn get_peak_rss_kb() -> u64 {
    use std::sync::Once;
    static WARN_ONCE: Once = Once::new();
    WARN_ONCE.call_once(|| {
        log::warn!("Peak RSS is only measured on Linux; reporting 0 kB.");
    });
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_status_field() {
        let status = "Name:\tblockmul\nVmPeak:\t  204800 kB\nVmHWM:\t    5120 kB\n";
        assert_eq!(parse_status_field(status, "VmHWM"), Some(5120));
        assert_eq!(parse_status_field(status, "VmPeak"), Some(204800));
        assert_eq!(parse_status_field(status, "VmRSS"), None);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_peak_rss_is_reported_on_linux() {
        let _ballast = vec![1u8; 1 << 20];
        assert!(get_peak_rss_kb() > 0);
    }
}
