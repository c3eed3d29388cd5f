//! Exclusive prefix sum and stable counting sort.
//!
//! Host reference for the GPU primitives of the same names. The GPU sort
//! applies the same steps to one 4-bit digit at a time; both are stable, so
//! their outputs match exactly. Here the whole key is one digit:
//! 1. Clear a counts array of `max_key + 1` entries
//! 2. Count the keys
//! 3. Exclusive prefix sum to get per-key start offsets
//! 4. Scatter each `(item, key)` pair to `offset[key]++`
//! 5. Copy the scattered pairs back over the inputs

/// In-place exclusive prefix sum. Returns the total.
pub fn exclusive_scan(values: &mut [u32]) -> u32 {
    let mut running = 0u32;
    for v in values.iter_mut() {
        let count = *v;
        *v = running;
        running = running.wrapping_add(count);
    }
    running
}

/// Reusable scratch space for [`CountingSort::run`].
#[derive(Debug, Default)]
pub struct CountingSort {
    counts: Vec<u32>,
    scratch_items: Vec<u32>,
    scratch_keys: Vec<u32>,
}

impl CountingSort {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stable ascending sort of the first `num_to_sort` pairs by key.
    ///
    /// Every key must be `<= max_key`; a larger key is a caller bug and
    /// panics on the counts index.
    pub fn run(&mut self, items: &mut [u32], keys: &mut [u32], num_to_sort: usize, max_key: u32) {
        let n = num_to_sort.min(items.len()).min(keys.len());
        if n == 0 {
            return;
        }

        self.counts.clear();
        self.counts.resize(max_key as usize + 1, 0);
        for &key in &keys[..n] {
            self.counts[key as usize] += 1;
        }

        exclusive_scan(&mut self.counts);

        self.scratch_items.clear();
        self.scratch_items.resize(n, 0);
        self.scratch_keys.clear();
        self.scratch_keys.resize(n, 0);
        for i in 0..n {
            let key = keys[i];
            let slot = &mut self.counts[key as usize];
            self.scratch_items[*slot as usize] = items[i];
            self.scratch_keys[*slot as usize] = key;
            *slot += 1;
        }

        items[..n].copy_from_slice(&self.scratch_items);
        keys[..n].copy_from_slice(&self.scratch_keys);
    }
}

/// One-shot convenience wrapper around [`CountingSort`].
pub fn counting_sort(items: &mut [u32], keys: &mut [u32], num_to_sort: usize, max_key: u32) {
    CountingSort::new().run(items, keys, num_to_sort, max_key);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_is_exclusive() {
        let mut v = vec![3, 0, 2, 5, 1];
        let total = exclusive_scan(&mut v);
        assert_eq!(v, vec![0, 3, 3, 5, 10]);
        assert_eq!(total, 11);

        let mut empty: Vec<u32> = Vec::new();
        assert_eq!(exclusive_scan(&mut empty), 0);
    }

    #[test]
    fn sort_is_stable() {
        let mut items = vec![0, 1, 2, 3, 4, 5];
        let mut keys = vec![2, 0, 2, 1, 0, 2];
        counting_sort(&mut items, &mut keys, 6, 2);
        assert_eq!(keys, vec![0, 0, 1, 2, 2, 2]);
        assert_eq!(items, vec![1, 4, 3, 0, 2, 5]);
    }

    #[test]
    fn only_prefix_is_sorted() {
        let mut items = vec![0, 1, 2, 3];
        let mut keys = vec![3, 1, 9, 0];
        counting_sort(&mut items, &mut keys, 2, 3);
        assert_eq!(keys, vec![1, 3, 9, 0]);
        assert_eq!(items, vec![1, 0, 2, 3]);
    }
}
