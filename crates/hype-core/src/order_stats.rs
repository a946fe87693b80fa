//! Online order statistics over activity samples.
//!
//! [`OrderStatistics`] keeps every sample since the last flush in ascending
//! order so that any percentile can be read by linear interpolation between
//! the two nearest ranks. Lifetime count/min/max/average survive flushes and
//! are only cleared by [`OrderStatistics::reset`].
//!
//! Insertion is a binary search followed by a shift (`O(log n + k)`). A new
//! value lands **before** any samples equal to it.

/// Value at percentile `p` (0.0–1.0) of an ascending slice.
///
/// `idx = (len - 1) * p`; the two surrounding ranks are interpolated only
/// when their values differ. Returns `None` for an empty slice.
pub fn percentile_of(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let p = p.clamp(0.0, 1.0);
    let idx = (sorted.len() - 1) as f64 * p;
    let lo = idx.floor() as usize;
    let hi = (idx.ceil() as usize).min(sorted.len() - 1);
    let (a, b) = (sorted[lo], sorted[hi]);
    if a == b { Some(a) } else { Some(a + (idx - lo as f64) * (b - a)) }
}

/// Sorted sample set plus lifetime summary statistics.
#[derive(Debug, Clone, Default)]
pub struct OrderStatistics {
    sorted: Vec<f64>,
    count: u64,
    min: Option<f64>,
    max: Option<f64>,
    avg: Option<f64>,
}

impl OrderStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a sample, keeping ascending order.
    pub fn insert(&mut self, x: f64) {
        let at = self.sorted.partition_point(|&v| v < x);
        self.sorted.insert(at, x);

        self.count += 1;
        let n = self.count as f64;
        self.avg = Some(match self.avg {
            Some(avg) => avg * ((n - 1.0) / n) + x / n,
            None => x,
        });
        self.min = Some(self.min.map_or(x, |m| m.min(x)));
        self.max = Some(self.max.map_or(x, |m| m.max(x)));
    }

    /// Value at percentile `p`, or `None` if no samples are held.
    pub fn percentile(&self, p: f64) -> Option<f64> {
        percentile_of(&self.sorted, p)
    }

    /// Take the current sorted samples, leaving the set empty.
    ///
    /// Lifetime statistics are kept.
    pub fn flush_and_clear(&mut self) -> Vec<f64> {
        std::mem::take(&mut self.sorted)
    }

    /// Merge a previously flushed snapshot back into the held samples.
    ///
    /// Lifetime statistics already include these samples and are not touched.
    pub fn restore(&mut self, snapshot: Vec<f64>) {
        if self.sorted.is_empty() {
            self.sorted = snapshot;
            return;
        }
        let held = std::mem::take(&mut self.sorted);
        let mut merged = Vec::with_capacity(held.len() + snapshot.len());
        let (mut a, mut b) = (snapshot.into_iter().peekable(), held.into_iter().peekable());
        while let (Some(&x), Some(&y)) = (a.peek(), b.peek()) {
            if x <= y {
                merged.push(x);
                a.next();
            } else {
                merged.push(y);
                b.next();
            }
        }
        merged.extend(a);
        merged.extend(b);
        self.sorted = merged;
    }

    /// Clear samples and lifetime statistics.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Samples currently held (since the last flush).
    pub fn len(&self) -> usize {
        self.sorted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sorted.is_empty()
    }

    pub fn samples(&self) -> &[f64] {
        &self.sorted
    }

    /// Samples inserted since the last reset.
    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn min(&self) -> Option<f64> {
        self.min
    }

    pub fn max(&self) -> Option<f64> {
        self.max
    }

    pub fn avg(&self) -> Option<f64> {
        self.avg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_sorted(s: &[f64]) -> bool {
        s.windows(2).all(|w| w[0] <= w[1])
    }

    #[test]
    fn stays_sorted_on_every_insert() {
        let mut os = OrderStatistics::new();
        // Deterministic pseudo-random sequence with duplicates.
        let mut x: u64 = 7;
        for _ in 0..500 {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            os.insert(((x >> 33) % 50) as f64 / 4.0);
            assert!(is_sorted(os.samples()));
        }
        assert_eq!(os.len(), 500);
    }

    #[test]
    fn percentile_extremes_match_min_max() {
        let mut os = OrderStatistics::new();
        for v in [3.5, 0.2, 9.1, 4.4, 4.4, 7.0] {
            os.insert(v);
            assert_eq!(os.percentile(0.0), os.min());
            assert_eq!(os.percentile(1.0), os.max());
        }
    }

    #[test]
    fn percentile_is_monotone() {
        let mut os = OrderStatistics::new();
        for v in [5.0, 1.0, 1.0, 8.0, 2.5, 9.0, 3.0] {
            os.insert(v);
        }
        let mut prev = f64::MIN;
        for i in 0..=1000 {
            let v = os.percentile(i as f64 / 1000.0).unwrap();
            assert!(v >= prev);
            prev = v;
        }
    }

    #[test]
    fn percentile_interpolates() {
        let sorted = [1.0, 2.0, 4.0, 8.0];
        // idx = 3 * 0.5 = 1.5 -> 2.0 + 0.5 * (4.0 - 2.0)
        assert_eq!(percentile_of(&sorted, 0.5), Some(3.0));
        // Equal endpoints return the value directly.
        assert_eq!(percentile_of(&[2.0, 2.0, 2.0], 0.37), Some(2.0));
        assert_eq!(percentile_of(&[], 0.5), None);
        assert_eq!(percentile_of(&[4.2], 0.9), Some(4.2));
    }

    #[test]
    fn running_stats() {
        let mut os = OrderStatistics::new();
        assert_eq!(os.avg(), None);
        for v in [2.0, 4.0, 9.0] {
            os.insert(v);
        }
        assert_eq!(os.count(), 3);
        assert_eq!(os.min(), Some(2.0));
        assert_eq!(os.max(), Some(9.0));
        assert!((os.avg().unwrap() - 5.0).abs() < 1e-12);
    }

    #[test]
    fn flush_keeps_lifetime_stats() {
        let mut os = OrderStatistics::new();
        for v in [3.0, 1.0, 2.0] {
            os.insert(v);
        }
        let snapshot = os.flush_and_clear();
        assert_eq!(snapshot, vec![1.0, 2.0, 3.0]);
        assert!(os.is_empty());
        assert_eq!(os.percentile(0.5), None);
        assert_eq!(os.count(), 3);
        assert_eq!(os.max(), Some(3.0));

        os.reset();
        assert_eq!(os.count(), 0);
        assert_eq!(os.max(), None);
    }

    #[test]
    fn restore_merges_in_order() {
        let mut os = OrderStatistics::new();
        for v in [5.0, 1.0, 3.0] {
            os.insert(v);
        }
        let snapshot = os.flush_and_clear();
        os.insert(2.0);
        os.insert(6.0);
        os.restore(snapshot);
        assert_eq!(os.samples(), &[1.0, 2.0, 3.0, 5.0, 6.0]);
        assert_eq!(os.count(), 5);
    }
}
