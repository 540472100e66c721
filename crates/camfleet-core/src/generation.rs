//! Wraparound-safe arithmetic on discovery generations.
//!
//! A generation is a `u32` round counter bumped once per discovery sweep.
//! It is allowed to overflow, so every comparison between a camera's last
//! observed generation and the current one goes through this module.

/// Unsigned integer types usable as a circular generation counter.
pub trait Generation: Copy + Eq + Ord {
    const MAX: Self;
    const HALF: Self;

    fn wrapping_sub(self, rhs: Self) -> Self;
    fn wrapping_add(self, rhs: Self) -> Self;
}

macro_rules! impl_generation {
    ($($t:ty),*) => {
        $(
            impl Generation for $t {
                const MAX: Self = <$t>::MAX;
                const HALF: Self = <$t>::MAX / 2;

                fn wrapping_sub(self, rhs: Self) -> Self {
                    <$t>::wrapping_sub(self, rhs)
                }

                fn wrapping_add(self, rhs: Self) -> Self {
                    <$t>::wrapping_add(self, rhs)
                }
            }
        )*
    };
}

impl_generation!(u8, u16, u32, u64, usize);

/// Forward distance from `lo` to `hi` on the circular counter space.
///
/// Returns `hi - lo` when `hi >= lo`, otherwise `hi - lo + MAX`.
pub fn distance<T: Generation>(hi: T, lo: T) -> T {
    if hi >= lo {
        hi.wrapping_sub(lo)
    } else {
        hi.wrapping_sub(lo).wrapping_add(T::MAX)
    }
}

/// `true` when `a` is strictly newer than `b`.
///
/// Newer means reachable from `b` by moving forward less than half the
/// counter range, which keeps the answer correct across an overflow.
pub fn is_after<T: Generation>(a: T, b: T) -> bool {
    a != b && a.wrapping_sub(b) <= T::HALF
}

/// `true` when a camera last refreshed at `seen` has missed at least
/// `grace` rounds as of `current`.
pub fn is_expired(current: u32, seen: u32, grace: u32) -> bool {
    !is_after(seen, current) && distance(current, seen) >= grace
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_without_wrap() {
        assert_eq!(distance(6u32, 2), 4);
        assert_eq!(distance(10u8, 0), 10);
    }

    #[test]
    fn distance_with_wrap() {
        assert_eq!(distance(2u32, u32::MAX - 2), 4);
        assert_eq!(distance(1u8, u8::MAX), 1);
    }

    #[test]
    fn distance_to_self_is_zero() {
        for g in [0u32, 1, 17, u32::MAX / 2, u32::MAX - 1, u32::MAX] {
            assert_eq!(distance(g, g), 0);
        }
    }

    #[test]
    fn distance_is_shift_invariant() {
        let pairs = [(6u32, 2u32), (100, 3), (5, 5)];
        for (hi, lo) in pairs {
            for k in [1u32, 7, 1000, u32::MAX - 200] {
                assert_eq!(
                    distance(hi, lo),
                    distance(hi.wrapping_add(k), lo.wrapping_add(k)),
                    "hi={hi} lo={lo} k={k}"
                );
            }
        }
    }

    #[test]
    fn is_after_handles_overflow() {
        assert!(is_after(3u32, 2));
        assert!(!is_after(2u32, 3));
        assert!(!is_after(7u32, 7));
        assert!(is_after(1u32, u32::MAX - 1));
        assert!(!is_after(u32::MAX - 1, 1u32));
    }

    #[test]
    fn expiry_happens_exactly_after_grace_rounds() {
        let seen = 40;
        assert!(!is_expired(40, seen, 3));
        assert!(!is_expired(41, seen, 3));
        assert!(!is_expired(42, seen, 3));
        assert!(is_expired(43, seen, 3));
        assert!(is_expired(50, seen, 3));
    }

    #[test]
    fn expiry_ignores_cameras_refreshed_by_a_newer_round() {
        assert!(!is_expired(10, 12, 1));
    }

    #[test]
    fn expiry_across_overflow() {
        let seen = u32::MAX;
        assert!(!is_expired(0, seen, 3));
        assert!(is_expired(3, seen, 3));
    }
}
