//! Striping candidates over workers and collecting the results back

/// Items assigned to `rank` out of `size` workers: every `size`-th item
/// starting at `rank`
pub fn stripe<T: Clone>(items: &[T], rank: usize, size: usize) -> Vec<T> {
    if size == 0 {
        return Vec::new();
    }
    items.iter().skip(rank).step_by(size).cloned().collect()
}

/// Assignment for every worker, indexed by rank
pub fn distribute<T: Clone>(items: &[T], size: usize) -> Vec<Vec<T>> {
    (0..size).map(|rank| stripe(items, rank, size)).collect()
}

/// Flatten per-rank results in rank order. Global item order is not
/// preserved; callers must not rely on position.
pub fn collect<T>(per_rank: Vec<Vec<T>>) -> Vec<T> {
    per_rank.into_iter().flatten().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stripes_cover_everything_once() {
        let items: Vec<usize> = (1..=10).collect();
        let parts = distribute(&items, 3);
        assert_eq!(parts[0], vec![1, 4, 7, 10]);
        assert_eq!(parts[1], vec![2, 5, 8]);
        assert_eq!(parts[2], vec![3, 6, 9]);

        let mut flat = collect(parts);
        assert_eq!(flat.len(), items.len());
        flat.sort();
        assert_eq!(flat, items);
    }

    #[test]
    fn test_more_workers_than_items() {
        let parts = distribute(&["a", "b"], 4);
        assert_eq!(parts.len(), 4);
        assert!(parts[2].is_empty() && parts[3].is_empty());
        assert_eq!(collect(parts), vec!["a", "b"]);
        assert!(stripe(&[1, 2, 3], 0, 0).is_empty());
    }
}
