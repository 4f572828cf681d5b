//! Key comparison and key distance.

use std::cmp::Ordering;
use std::fmt;
use std::marker::PhantomData;

/// Total order over keys, injected into every search and append.
///
/// Implementations must stay consistent for the lifetime of a series.
pub trait KeyComparer<K>: Send + Sync {
    /// Compares two keys.
    fn compare(&self, a: &K, b: &K) -> Ordering;
}

/// Comparer using the key's `Ord` implementation.
#[derive(Debug, Clone, Copy, Default)]
pub struct OrdComparer;

impl<K: Ord> KeyComparer<K> for OrdComparer {
    #[inline]
    fn compare(&self, a: &K, b: &K) -> Ordering {
        a.cmp(b)
    }
}

/// Comparer backed by a function, for keys without a usable `Ord`.
///
/// ```rust,ignore
/// let cmp = FnComparer::new(|a: &f64, b: &f64| a.total_cmp(b));
/// ```
pub struct FnComparer<K, F> {
    compare: F,
    _key: PhantomData<fn(&K, &K)>,
}

impl<K, F> FnComparer<K, F>
where
    F: Fn(&K, &K) -> Ordering + Send + Sync,
{
    /// Wraps a comparison function.
    pub fn new(compare: F) -> Self {
        Self {
            compare,
            _key: PhantomData,
        }
    }
}

impl<K, F> KeyComparer<K> for FnComparer<K, F>
where
    F: Fn(&K, &K) -> Ordering + Send + Sync,
{
    #[inline]
    fn compare(&self, a: &K, b: &K) -> Ordering {
        (self.compare)(a, b)
    }
}

impl<K, F: Clone> Clone for FnComparer<K, F> {
    fn clone(&self) -> Self {
        Self {
            compare: self.compare.clone(),
            _key: PhantomData,
        }
    }
}

impl<K, F> fmt::Debug for FnComparer<K, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnComparer").finish_non_exhaustive()
    }
}

/// Signed distance between two keys, used by width-bounded windows.
pub trait KeyDistance {
    /// Returns `self - earlier` as a float.
    fn distance_from(&self, earlier: &Self) -> f64;
}

macro_rules! impl_key_distance {
    ($($t:ty),*) => {
        $(
            impl KeyDistance for $t {
                #[inline]
                fn distance_from(&self, earlier: &Self) -> f64 {
                    *self as f64 - *earlier as f64
                }
            }
        )*
    };
}

impl_key_distance!(i32, i64, u32, u64, usize, f32, f64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ord_comparer() {
        assert_eq!(OrdComparer.compare(&1, &2), Ordering::Less);
        assert_eq!(OrdComparer.compare(&"b", &"a"), Ordering::Greater);
    }

    #[test]
    fn test_fn_comparer_total_order() {
        let cmp = FnComparer::new(|a: &f64, b: &f64| a.total_cmp(b));
        assert_eq!(cmp.compare(&1.5, &1.5), Ordering::Equal);
        assert_eq!(cmp.compare(&-0.0, &0.0), Ordering::Less);
    }

    #[test]
    fn test_key_distance() {
        assert_eq!(10_i64.distance_from(&4), 6.0);
        assert_eq!(4_u64.distance_from(&10), -6.0);
        assert!((1.5_f64.distance_from(&0.25) - 1.25).abs() < f64::EPSILON);
    }
}
