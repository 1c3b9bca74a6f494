//! Zig-zag mapping between signed values and compact unsigned patterns.
//!
//! Small-magnitude values of either sign land near zero, which keeps the
//! bit width a packed integer field needs proportional to the largest
//! magnitude actually stored rather than to the sign bit position.

pub fn zigzag32(value: i32) -> u64 {
    (((value << 1) ^ (value >> 31)) as u32) as u64
}

pub fn unzigzag32(pattern: u64) -> i32 {
    let p = pattern as u32;
    ((p >> 1) as i32) ^ -((p & 1) as i32)
}

pub fn zigzag64(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

pub fn unzigzag64(pattern: u64) -> i64 {
    ((pattern >> 1) as i64) ^ -((pattern & 1) as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_magnitudes_map_near_zero() {
        assert_eq!(zigzag32(0), 0);
        assert_eq!(zigzag32(-1), 1);
        assert_eq!(zigzag32(1), 2);
        assert_eq!(zigzag32(-2), 3);
        assert_eq!(zigzag64(2), 4);
    }

    #[test]
    fn round_trips_32() {
        for value in [0, 1, -1, 57, -57, i32::MAX, i32::MIN] {
            assert_eq!(unzigzag32(zigzag32(value)), value, "value {value}");
        }
    }

    #[test]
    fn round_trips_64() {
        for value in [0i64, 1, -1, 1 << 40, -(1 << 40), i64::MAX, i64::MIN + 1] {
            assert_eq!(unzigzag64(zigzag64(value)), value, "value {value}");
        }
    }

    #[test]
    fn i64_min_pattern_is_all_ones() {
        // The write path rejects i64::MIN because this pattern doubles as
        // the 64-bit null sentinel.
        assert_eq!(zigzag64(i64::MIN), u64::MAX);
    }
}
