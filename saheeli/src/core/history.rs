//! Bounded conversation history arithmetic.

/// Remove and return the oldest entries so at most `max_len` remain.
///
/// The returned entries keep their original order. Nothing is dropped: every
/// element is either still in `history` or in the returned overflow.
pub fn take_overflow<T>(history: &mut Vec<T>, max_len: usize) -> Vec<T> {
    let excess = history.len().saturating_sub(max_len);
    history.drain(..excess).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn under_limit_takes_nothing() {
        let mut history = vec![1, 2, 3];
        assert!(take_overflow(&mut history, 3).is_empty());
        assert_eq!(history, vec![1, 2, 3]);
    }

    #[test]
    fn over_limit_takes_oldest_in_order() {
        let mut history: Vec<u32> = (0..8).collect();
        let overflow = take_overflow(&mut history, 5);
        assert_eq!(overflow, vec![0, 1, 2]);
        assert_eq!(history, vec![3, 4, 5, 6, 7]);
    }

    #[test]
    fn zero_limit_moves_everything() {
        let mut history = vec!["a", "b"];
        assert_eq!(take_overflow(&mut history, 0), vec!["a", "b"]);
        assert!(history.is_empty());
    }
}
