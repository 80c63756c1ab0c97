//! Alignment math and byte formatting helpers.

/// Round `value` up to the next multiple of `alignment`.
///
/// `alignment` must be a power of two; `0` and `1` leave the value unchanged.
#[inline]
#[must_use]
pub const fn align_up(value: u64, alignment: u64) -> u64 {
    if alignment <= 1 {
        return value;
    }
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}

/// Round `value` down to the previous multiple of `alignment`.
///
/// `alignment` must be a power of two; `0` and `1` leave the value unchanged.
#[inline]
#[must_use]
pub const fn align_down(value: u64, alignment: u64) -> u64 {
    if alignment <= 1 {
        return value;
    }
    debug_assert!(alignment.is_power_of_two());
    value & !(alignment - 1)
}

/// Whether `value` is a multiple of the power-of-two `alignment`.
#[inline]
#[must_use]
pub const fn is_aligned(value: u64, alignment: u64) -> bool {
    align_down(value, alignment) == value
}

/// Format a byte amount with a binary-unit suffix for log output.
#[must_use]
pub fn fmt_bytes(amount: u64) -> String {
    const SUFFIX: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];

    let mut value = amount as f64;
    let mut idx = 0;
    while value >= 1024.0 && idx < SUFFIX.len() - 1 {
        value /= 1024.0;
        idx += 1;
    }

    if idx == 0 {
        format!("{amount} B")
    } else {
        format!("{value:.2} {}", SUFFIX[idx])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_up_rounds_to_next_multiple() {
        assert_eq!(align_up(0, 16), 0);
        assert_eq!(align_up(1, 16), 16);
        assert_eq!(align_up(16, 16), 16);
        assert_eq!(align_up(17, 16), 32);
    }

    #[test]
    fn zero_and_one_alignment_are_identity() {
        assert_eq!(align_up(13, 0), 13);
        assert_eq!(align_up(13, 1), 13);
        assert_eq!(align_down(13, 0), 13);
        assert_eq!(align_down(13, 1), 13);
    }

    #[test]
    fn align_down_rounds_to_previous_multiple() {
        assert_eq!(align_down(0, 16), 0);
        assert_eq!(align_down(15, 16), 0);
        assert_eq!(align_down(16, 16), 16);
        assert_eq!(align_down(31, 16), 16);
    }

    #[test]
    fn is_aligned_checks_multiples() {
        assert!(is_aligned(0, 256));
        assert!(is_aligned(512, 256));
        assert!(!is_aligned(513, 256));
    }

    #[test]
    fn fmt_bytes_uses_binary_units() {
        assert_eq!(fmt_bytes(512), "512 B");
        assert_eq!(fmt_bytes(1024), "1.00 KiB");
        assert_eq!(fmt_bytes(1536), "1.50 KiB");
        assert_eq!(fmt_bytes(3 * 1024 * 1024), "3.00 MiB");
    }
}
