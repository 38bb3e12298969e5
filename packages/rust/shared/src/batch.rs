//! Fixed-size batching for remote lookups.

/// Split `items` into consecutive groups of at most `size`, preserving order.
///
/// The final group may be shorter. A `size` of 0 is treated as 1.
pub fn chunk<T: Clone>(items: &[T], size: usize) -> Vec<Vec<T>> {
    items.chunks(size.max(1)).map(<[T]>::to_vec).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_preserves_order_and_bounds() {
        let items: Vec<u32> = (1..=7).collect();
        let groups = chunk(&items, 3);
        assert_eq!(groups, vec![vec![1, 2, 3], vec![4, 5, 6], vec![7]]);
    }

    #[test]
    fn chunk_exact_multiple_has_no_empty_tail() {
        let groups = chunk(&["a", "b", "c", "d"], 2);
        assert_eq!(groups.len(), 2);
        assert!(groups.iter().all(|g| g.len() == 2));
    }

    #[test]
    fn chunk_empty_and_zero_size() {
        assert!(chunk::<u8>(&[], 10).is_empty());
        assert_eq!(chunk(&[1, 2], 0), vec![vec![1], vec![2]]);
    }
}
