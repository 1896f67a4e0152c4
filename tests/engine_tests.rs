//! Tests for the pure matching and settlement logic

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use squadbot::coordinator::{find_compatible_pairs, find_expired_matches, match_statistics};
    use squadbot::oracle::normalize_price;
    use squadbot::scheduler::backoff_delay;
    use squadbot::types::{Bid, BidStatus, Match, MatchStatus};

    const NOW: i64 = 1_700_000_000_000;

    fn bid(id: &str, creator: &str, squad: &str, amount: u64) -> Bid {
        Bid {
            id: id.to_string(),
            creator: creator.to_string(),
            squad_id: squad.to_string(),
            bid_amount: amount,
            duration_ms: 3_600_000,
            created_at: NOW - 60_000,
            status: BidStatus::Open,
        }
    }

    fn active_match(id: &str, started_at: i64, duration_ms: i64) -> Match {
        Match {
            id: id.to_string(),
            bid1_id: format!("{id}-b1"),
            bid2_id: format!("{id}-b2"),
            player1: "0xalice".into(),
            player2: "0xbob".into(),
            squad1_id: "0xsquad1".into(),
            squad2_id: "0xsquad2".into(),
            total_prize: 2_000_000,
            duration_ms,
            started_at,
            status: MatchStatus::Active,
            winner: None,
            prize_claimed: false,
            fees_collected: false,
            squad1_initial_value: 100,
            squad2_initial_value: 120,
            squad1_final_value: None,
            squad2_final_value: None,
        }
    }

    // ========================================================================
    // Pairing
    // ========================================================================

    #[test]
    fn test_two_opposing_bids_yield_exactly_one_pair() {
        // Scenario: two bids, stake 1,000,000, different creators and
        // squads, both Open.
        let bids = vec![
            bid("0xb1", "0xalice", "0xsquad1", 1_000_000),
            bid("0xb2", "0xbob", "0xsquad2", 1_000_000),
        ];

        let pairs = find_compatible_pairs(&bids, NOW);
        assert_eq!(pairs.len(), 1);
        let pair = &pairs[0];
        assert_ne!(pair.bid1.creator, pair.bid2.creator);
        assert_eq!(pair.bid1.bid_amount, pair.bid2.bid_amount);
        // The resulting match carries the combined stake as its prize pool.
        assert_eq!(pair.bid1.bid_amount + pair.bid2.bid_amount, 2_000_000);
    }

    #[test]
    fn test_pairs_require_equal_stake() {
        let bids = vec![
            bid("0xb1", "0xalice", "0xsquad1", 1_000_000),
            bid("0xb2", "0xbob", "0xsquad2", 999_999),
        ];
        assert!(find_compatible_pairs(&bids, NOW).is_empty());
    }

    #[test]
    fn test_pairs_require_distinct_creators() {
        let bids = vec![
            bid("0xb1", "0xalice", "0xsquad1", 1_000_000),
            bid("0xb2", "0xalice", "0xsquad2", 1_000_000),
        ];
        assert!(find_compatible_pairs(&bids, NOW).is_empty());
    }

    #[test]
    fn test_pairs_require_distinct_squads() {
        let bids = vec![
            bid("0xb1", "0xalice", "0xsquad1", 1_000_000),
            bid("0xb2", "0xbob", "0xsquad1", 1_000_000),
        ];
        assert!(find_compatible_pairs(&bids, NOW).is_empty());
    }

    #[test]
    fn test_no_pair_is_emitted_twice() {
        let bids = vec![
            bid("0xb1", "0xalice", "0xsquad1", 500),
            bid("0xb2", "0xbob", "0xsquad2", 500),
            bid("0xb3", "0xcarol", "0xsquad3", 500),
            bid("0xb4", "0xdave", "0xsquad1", 500),
        ];

        let pairs = find_compatible_pairs(&bids, NOW);
        let mut seen = std::collections::HashSet::new();
        for p in &pairs {
            assert_ne!(p.bid1.id, p.bid2.id, "self pair");
            let key = (p.bid1.id.clone(), p.bid2.id.clone());
            assert!(seen.insert(key), "duplicate pair");
        }
        // b1-b2, b1-b3, b4-b2, b4-b3, b2-b3
        assert_eq!(pairs.len(), 5);
    }

    #[test]
    fn test_expired_and_non_open_bids_never_pair() {
        let mut stale = bid("0xb1", "0xalice", "0xsquad1", 500);
        stale.created_at = NOW - stale.duration_ms - 1;
        let mut matched = bid("0xb2", "0xbob", "0xsquad2", 500);
        matched.status = BidStatus::Matched;
        let bids = vec![stale, matched, bid("0xb3", "0xcarol", "0xsquad3", 500)];

        assert!(find_compatible_pairs(&bids, NOW).is_empty());
    }

    // ========================================================================
    // Expiry detection
    // ========================================================================

    #[test]
    fn test_expiry_boundary_is_inclusive() {
        let m = active_match("0xm1", NOW - 500, 500);
        // ends_at == NOW
        assert_eq!(find_expired_matches(&[m.clone()], NOW).len(), 1);
        assert_eq!(find_expired_matches(&[m], NOW - 1).len(), 0);
    }

    #[test]
    fn test_settled_matches_are_not_expired() {
        let mut m = active_match("0xm1", NOW - 1_000, 500);
        m.status = MatchStatus::Completed;
        m.prize_claimed = true;
        assert!(find_expired_matches(&[m], NOW).is_empty());
    }

    #[test]
    fn test_detection_is_a_pure_filter() {
        let matches = vec![
            active_match("0xm1", NOW - 1_000, 500),
            active_match("0xm2", NOW, 500),
        ];
        let expired = find_expired_matches(&matches, NOW);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, "0xm1");
        // inputs untouched
        assert_eq!(matches[0].status, MatchStatus::Active);
    }

    // ========================================================================
    // Statistics
    // ========================================================================

    #[test]
    fn test_statistics_distributions() {
        let mut tied = active_match("0xm3", NOW - 1_000, 500);
        tied.status = MatchStatus::Tied;
        let matches = vec![
            active_match("0xm1", NOW - 100, 900_000),
            active_match("0xm2", NOW - 1_000, 500),
            tied,
        ];

        let stats = match_statistics(&matches, NOW);
        assert_eq!(stats.active_matches, 1);
        assert_eq!(stats.expired_matches, 1);
        assert_eq!(stats.by_squad_pair["0xsquad1|0xsquad2"], 3);
        assert_eq!(stats.by_duration_ms[&900_000], 1);
        assert_eq!(stats.by_prize[&2_000_000], 3);

        let top = stats.top_squad_pairs(5);
        assert_eq!(top[0].0, "0xsquad1|0xsquad2");
        assert_eq!(top[0].1, 3);
    }

    // ========================================================================
    // Price normalization
    // ========================================================================

    #[test]
    fn test_prices_truncate_toward_zero() {
        assert_eq!(normalize_price(1.9999999, 1_000_000), Some(1_999_999));
        assert_eq!(normalize_price(0.0000009, 1_000_000), Some(0));
        assert_eq!(normalize_price(42.0, 1), Some(42));
        assert_eq!(normalize_price(-1.0, 1_000_000), None);
        assert_eq!(normalize_price(f64::INFINITY, 1_000_000), None);
    }

    // ========================================================================
    // Backoff
    // ========================================================================

    #[test]
    fn test_backoff_growth_and_cap() {
        let base = Duration::from_secs(5);
        let cap = Duration::from_secs(300);
        // min(base * 2^(n-1), cap)
        for (errors, expected_secs) in [(1, 5), (2, 10), (3, 20), (4, 40), (5, 80), (6, 160)] {
            assert_eq!(
                backoff_delay(base, cap, errors),
                Duration::from_secs(expected_secs),
                "n = {errors}"
            );
        }
        assert_eq!(backoff_delay(base, cap, 7), cap);
        assert_eq!(backoff_delay(base, cap, 100), cap);
    }

    #[test]
    fn test_backoff_restarts_from_base_after_reset() {
        let base = Duration::from_secs(5);
        let cap = Duration::from_secs(300);
        // After a success the error counter resets, so the next error
        // waits the base delay again.
        assert_eq!(backoff_delay(base, cap, 1), base);
    }
}
