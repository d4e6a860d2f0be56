use crate::domain::types::{DiscriminatorDirection, DiscriminatorRecord, PairVerdict};

/// Pair-resolution verdict from the accepted typed discriminators of one
/// pair. Resolution needs at least `min_count` directional records and a
/// directional margin of at least `min_margin`.
pub fn compute_pair_verdict(
    records: &[DiscriminatorRecord],
    min_margin: usize,
    min_count: usize,
) -> PairVerdict {
    let left = records
        .iter()
        .filter(|record| record.direction == DiscriminatorDirection::Left)
        .count();
    let right = records
        .iter()
        .filter(|record| record.direction == DiscriminatorDirection::Right)
        .count();

    if left + right < min_count.max(1) {
        return PairVerdict::Unresolved;
    }
    let margin = left.abs_diff(right);
    if margin < min_margin.max(1) {
        return PairVerdict::Unresolved;
    }
    if left > right {
        PairVerdict::FavorsLeft
    } else {
        PairVerdict::FavorsRight
    }
}

#[cfg(test)]
mod tests {
    use super::compute_pair_verdict;
    use crate::domain::types::{
        DiscriminatorDirection, DiscriminatorKind, DiscriminatorRecord, PairVerdict,
    };

    fn record(direction: DiscriminatorDirection) -> DiscriminatorRecord {
        DiscriminatorRecord {
            id: "d".to_string(),
            pair_key: "pair:a|b".to_string(),
            direction,
            kind: DiscriminatorKind::Support,
            evidence_ids: vec!["ev1".to_string()],
            quote: None,
        }
    }

    #[test]
    fn no_records_is_unresolved() {
        assert_eq!(compute_pair_verdict(&[], 1, 1), PairVerdict::Unresolved);
    }

    #[test]
    fn a_clear_directional_margin_resolves_the_pair() {
        let records = vec![
            record(DiscriminatorDirection::Left),
            record(DiscriminatorDirection::Left),
            record(DiscriminatorDirection::Right),
        ];
        assert_eq!(compute_pair_verdict(&records, 1, 1), PairVerdict::FavorsLeft);
    }

    #[test]
    fn a_balanced_pair_stays_unresolved() {
        let records = vec![
            record(DiscriminatorDirection::Left),
            record(DiscriminatorDirection::Right),
        ];
        assert_eq!(compute_pair_verdict(&records, 1, 1), PairVerdict::Unresolved);
    }

    #[test]
    fn margin_and_count_minimums_both_bind() {
        let records = vec![
            record(DiscriminatorDirection::Right),
            record(DiscriminatorDirection::Right),
        ];
        assert_eq!(
            compute_pair_verdict(&records, 3, 1),
            PairVerdict::Unresolved
        );
        assert_eq!(
            compute_pair_verdict(&records, 1, 4),
            PairVerdict::Unresolved
        );
        assert_eq!(
            compute_pair_verdict(&records, 2, 2),
            PairVerdict::FavorsRight
        );
    }
}
