//! Combining and exporting sizing results

use std::collections::BTreeMap;
use std::fmt::Write;

use super::calculator::{max_configured, CPU_RESOURCE, MEMORY_RESOURCE};
use crate::models::{RequestLimit, SizingResult};

/// Merge sizings of several windows, keeping the maximum of every field
/// per container
pub fn merge_sizings<I>(windows: I) -> Vec<SizingResult>
where
    I: IntoIterator<Item = Vec<SizingResult>>,
{
    let mut merged: BTreeMap<String, SizingResult> = BTreeMap::new();
    for result in windows.into_iter().flatten() {
        match merged.get_mut(&result.container) {
            Some(current) => {
                current.cpu_millis = max_pair(current.cpu_millis, result.cpu_millis);
                current.memory_mib = max_pair(current.memory_mib, result.memory_mib);
                current.current_cpu_millis =
                    max_configured(current.current_cpu_millis, result.current_cpu_millis);
                current.current_memory_mib =
                    max_configured(current.current_memory_mib, result.current_memory_mib);
            }
            None => {
                merged.insert(result.container.clone(), result);
            }
        }
    }
    merged.into_values().collect()
}

fn max_pair(a: RequestLimit, b: RequestLimit) -> RequestLimit {
    RequestLimit {
        request: a.request.max(b.request),
        limit: a.limit.max(b.limit),
    }
}

/// Render sizings as INI, one section per container
///
/// Containers requesting less than `min_cpu_request_millis` are left out.
/// Memory request and limit are both set to the recommended memory limit.
pub fn to_ini(results: &[SizingResult], min_cpu_request_millis: u64) -> String {
    let cpu = CPU_RESOURCE.unit.suffix();
    let memory = MEMORY_RESOURCE.unit.suffix();
    let mut out = String::new();
    for result in results
        .iter()
        .filter(|r| r.cpu_millis.request >= min_cpu_request_millis)
    {
        // writing into a String cannot fail
        let _ = writeln!(out, "[{}]", result.container);
        let _ = writeln!(out, "requests.cpu = {}{cpu}", result.cpu_millis.request);
        let _ = writeln!(out, "limits.cpu = {}{cpu}", result.cpu_millis.limit);
        let _ = writeln!(out, "requests.memory = {}{memory}", result.memory_mib.limit);
        let _ = writeln!(out, "limits.memory = {}{memory}", result.memory_mib.limit);
        out.push('\n');
    }
    out
}
