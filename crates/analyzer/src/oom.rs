//! Memory budget probe
//!
//! The `--oom-kb` budget is checked at statement boundaries against the
//! process's virtual size, read from `/proc/self/status`. Targets
//! without procfs report `None`, which disables the check.

use std::fs;

/// Current VmSize in kilobytes, if the platform exposes it.
pub fn vm_size_kb() -> Option<u64> {
    if cfg!(not(target_os = "linux")) {
        return None;
    }
    let status = fs::read_to_string("/proc/self/status").ok()?;
    parse_vm_size(&status)
}

fn parse_vm_size(status: &str) -> Option<u64> {
    for line in status.lines() {
        if let Some(rest) = line.strip_prefix("VmSize:") {
            let kb = rest.trim().trim_end_matches("kB").trim();
            return kb.parse().ok();
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_vm_size() {
        let status = "Name:\tsift\nVmPeak:\t  123 kB\nVmSize:\t  4567 kB\nThreads: 1\n";
        assert_eq!(parse_vm_size(status), Some(4567));
        assert_eq!(parse_vm_size("Name: x\n"), None);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_probe_reports_something() {
        let kb = vm_size_kb().expect("procfs should be readable");
        assert!(kb > 0);
    }
}
