use crate::model::{Candidate, Tie};

/// Compute the maximal-vote candidate subset of a poll in a single
/// left-to-right scan. The returned *set* does not depend on candidate
/// order; the order of entries within it is scan order.
pub fn winner_set(candidates: &[Candidate]) -> Vec<Candidate> {
    let mut leaders: Vec<&Candidate> = Vec::new();
    for candidate in candidates {
        match leaders.first() {
            None => leaders.push(candidate),
            Some(top) if top.votes == candidate.votes => leaders.push(candidate),
            Some(top) if top.votes < candidate.votes => {
                leaders.clear();
                leaders.push(candidate);
            }
            Some(_) => {}
        }
    }
    leaders.into_iter().cloned().collect()
}

/// Total votes cast in a poll.
pub fn poll_total(candidates: &[Candidate]) -> u64 {
    candidates.iter().map(|c| c.votes).sum()
}

/// A winner set larger than one is an exact tie; it is reported for human
/// review, never resolved automatically.
pub fn tie_for(poll_name: &str, winners: &[Candidate]) -> Option<Tie> {
    if winners.len() > 1 {
        Some(Tie {
            poll_name: poll_name.to_string(),
            candidates: winners.iter().map(|c| c.name.clone()).collect(),
        })
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DEFAULT_CANDIDATE_IMAGE, FALLBACK_NONE};

    fn candidate(id: &str, name: &str, votes: u64) -> Candidate {
        Candidate {
            id: id.into(),
            name: name.into(),
            image: DEFAULT_CANDIDATE_IMAGE.into(),
            votes,
            parent_id: "p1".into(),
            fallback: FALLBACK_NONE.into(),
            fallback_name: None,
        }
    }

    #[test]
    fn two_way_tie_is_detected() {
        let candidates = vec![
            candidate("a", "A", 10),
            candidate("b", "B", 10),
            candidate("c", "C", 9),
        ];
        let winners = winner_set(&candidates);
        assert_eq!(
            winners.iter().map(|c| c.id.as_str()).collect::<Vec<_>>(),
            vec!["a", "b"]
        );

        let tie = tie_for("Prefect", &winners).unwrap();
        // Tied names are reported in scan order over the candidate list.
        assert_eq!(tie.candidates, vec!["A", "B"]);
        assert_eq!(tie.poll_name, "Prefect");
    }

    #[test]
    fn clear_winner_produces_no_tie() {
        let candidates = vec![candidate("a", "A", 10), candidate("b", "B", 9)];
        let winners = winner_set(&candidates);
        assert_eq!(winners.len(), 1);
        assert_eq!(winners[0].id, "a");
        assert!(tie_for("Prefect", &winners).is_none());
    }

    #[test]
    fn single_candidate_never_ties() {
        let candidates = vec![candidate("a", "A", 0)];
        let winners = winner_set(&candidates);
        assert_eq!(winners.len(), 1);
        assert!(tie_for("Prefect", &winners).is_none());
    }

    #[test]
    fn later_leader_replaces_earlier_ones() {
        let candidates = vec![
            candidate("a", "A", 3),
            candidate("b", "B", 3),
            candidate("c", "C", 7),
        ];
        let winners = winner_set(&candidates);
        assert_eq!(winners.len(), 1);
        assert_eq!(winners[0].id, "c");
    }

    #[test]
    fn winner_set_is_order_independent() {
        let forward = vec![
            candidate("a", "A", 5),
            candidate("b", "B", 8),
            candidate("c", "C", 8),
        ];
        let mut reversed = forward.clone();
        reversed.reverse();

        let ids = |cands: &[Candidate]| {
            let mut ids: Vec<String> = winner_set(cands).iter().map(|c| c.id.clone()).collect();
            ids.sort();
            ids
        };
        assert_eq!(ids(&forward), ids(&reversed));
    }

    #[test]
    fn empty_poll_has_no_winners_and_zero_total() {
        assert!(winner_set(&[]).is_empty());
        assert_eq!(poll_total(&[]), 0);
    }

    #[test]
    fn totals_sum_all_votes() {
        let candidates = vec![candidate("a", "A", 4), candidate("b", "B", 6)];
        assert_eq!(poll_total(&candidates), 10);
    }
}
