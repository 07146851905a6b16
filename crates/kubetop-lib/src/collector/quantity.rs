//! Kubernetes resource quantity conversion
//!
//! Converts quantity strings from pod specs (`250m`, `2`, `512Mi`, `1G`, `1e9`)
//! into milli-cores and bytes. Fractional results are rounded up, matching
//! how the API server reports `MilliValue()` and `Value()`.

const BINARY_SUFFIXES: &[(&str, f64)] = &[
    ("Ki", 1024.0),
    ("Mi", 1024.0 * 1024.0),
    ("Gi", 1024.0 * 1024.0 * 1024.0),
    ("Ti", 1024.0 * 1024.0 * 1024.0 * 1024.0),
    ("Pi", 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0),
    ("Ei", 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0),
];

const DECIMAL_SUFFIXES: &[(&str, f64)] = &[
    ("n", 1e-9),
    ("u", 1e-6),
    ("m", 1e-3),
    ("k", 1e3),
    ("M", 1e6),
    ("G", 1e9),
    ("T", 1e12),
    ("P", 1e15),
    ("E", 1e18),
];

/// Parse a quantity into its plain numeric value (cores for CPU, bytes for memory)
pub fn parse_quantity(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    for (suffix, multiplier) in BINARY_SUFFIXES.iter().chain(DECIMAL_SUFFIXES) {
        if let Some(number) = raw.strip_suffix(suffix) {
            // "1E" is exa, but "1e3" is an exponent and is handled below
            if let Ok(value) = number.parse::<f64>() {
                return finite_non_negative(value * multiplier);
            }
        }
    }

    raw.parse::<f64>().ok().and_then(finite_non_negative)
}

/// CPU quantity in milli-cores, rounded up
pub fn cpu_millis(raw: &str) -> Option<u64> {
    parse_quantity(raw).map(|cores| round_up(cores * 1000.0))
}

/// Memory quantity in bytes, rounded up
pub fn memory_bytes(raw: &str) -> Option<u64> {
    parse_quantity(raw).map(round_up)
}

fn finite_non_negative(value: f64) -> Option<f64> {
    (value.is_finite() && value >= 0.0).then_some(value)
}

fn round_up(value: f64) -> u64 {
    // Absorb float noise such as 0.1 * 1000 = 100.00000000000001
    let rounded = (value * 1e6).round() / 1e6;
    rounded.ceil() as u64
}
