//! Bulk log splitting.

/// Split a pasted or uploaded log into lines.
///
/// Accepts `\n`, `\r\n` and bare `\r` terminators, keeps order and drops
/// lines that are empty after trimming.
#[must_use]
pub fn split_bulk(text: &str) -> Vec<&str> {
    text.split(['\n', '\r'])
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_mixed_terminators() {
        let text = "Turn 1\r\nFoo used Tackle!\rTurn 2\n\n  \nBar fainted!";
        assert_eq!(
            split_bulk(text),
            vec!["Turn 1", "Foo used Tackle!", "Turn 2", "Bar fainted!"]
        );
    }

    #[test]
    fn test_split_empty() {
        assert!(split_bulk("").is_empty());
        assert!(split_bulk("\r\n\r\n").is_empty());
    }

    #[test]
    fn test_split_preserves_duplicates() {
        // Dedup is the normalizer's job
        assert_eq!(split_bulk("a\na\n"), vec!["a", "a"]);
    }
}
