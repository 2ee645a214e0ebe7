/// Derives a floating-point build identifier from semver components.
///
/// `1.2.3` becomes `1.2` and `0.14.0` becomes `0.14`. A `0.0.x` version
/// falls back to the patch scaled by 1/100 so pre-release builds still
/// report a non-zero number.
///
/// The minor component is read as decimal digits, so trailing zeros are
/// lost: `1.5` and `1.50` both give `1.5`. Compare the version string when
/// that distinction matters.
pub const fn version_number(major: &str, minor: &str, patch: &str) -> f64 {
    let major = parse_component(major) as f64;
    let minor_raw = parse_component(minor);
    let minor = minor_raw as f64 / pow10(digit_count(minor_raw)) as f64;

    let number = major + minor;
    if number > 0.0 {
        number
    } else {
        parse_component(patch) as f64 / 100.0
    }
}

const fn parse_component(s: &str) -> u64 {
    let bytes = s.as_bytes();
    let mut value = 0u64;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if !b.is_ascii_digit() {
            break;
        }
        value = value * 10 + (b - b'0') as u64;
        i += 1;
    }
    value
}

const fn digit_count(mut n: u64) -> u32 {
    if n == 0 {
        return 1;
    }
    let mut digits = 0;
    while n > 0 {
        digits += 1;
        n /= 10;
    }
    digits
}

const fn pow10(exp: u32) -> u64 {
    let mut value = 1u64;
    let mut i = 0;
    while i < exp {
        value *= 10;
        i += 1;
    }
    value
}
