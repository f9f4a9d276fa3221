/// Human readable form of a byte count, rounded to the nearest whole unit.
///
/// Boundaries are inclusive: `1_000_000` bytes is reported as `"1000 Kb"`.
pub fn size_metric(size: u64) -> String {
    const KB: f64 = 1_000.0;
    const MB: f64 = 1_000_000.0;
    const GB: f64 = 1_000_000_000.0;
    const TB: f64 = 1_000_000_000_000.0;

    let value = size as f64;
    if size < 1_000 {
        format!("{size} bytes")
    } else if size <= 1_000_000 {
        format!("{} Kb", (value / KB).round())
    } else if size <= 1_000_000_000 {
        format!("{} Mb", (value / MB).round())
    } else if size <= 1_000_000_000_000 {
        format!("{} Gb", (value / GB).round())
    } else {
        format!("{} T", (value / TB).round())
    }
}
