//! Property-based tests for lookups, windows and the Gorilla codec.
//!
//! Every property is checked against a plain `Vec` model of the same rows.

use alopex_series::{
    GorillaCodec, KeySorting, Lookup, Series, SeriesCodec, SeriesConfig, SpanCursor,
    SpanOpCount, SpanOpWidth, SumAvgOp,
};
use proptest::prelude::*;

/// Non-decreasing keys with duplicates, spaced so odd lookup keys fall between them.
fn weak_keys_strategy() -> impl Strategy<Value = Vec<i64>> {
    prop::collection::vec(0i64..3, 1..200).prop_map(|steps| {
        let mut key = 0;
        steps
            .into_iter()
            .map(|step| {
                key += step * 2;
                key
            })
            .collect()
    })
}

/// Block capacities small enough to force growth and rollover.
fn capacity_strategy() -> impl Strategy<Value = (usize, usize)> {
    (1usize..5).prop_flat_map(|initial| (Just(initial), initial..17))
}

fn build(keys: &[i64], (initial, max): (usize, usize)) -> Series<i64, i64> {
    let config = SeriesConfig::default()
        .with_initial_block_capacity(initial)
        .with_max_block_capacity(max)
        .with_key_sorting(KeySorting::Weak)
        .with_correctness_checks(true);
    let series = Series::with_config(config).unwrap();
    for (row, &key) in keys.iter().enumerate() {
        series.append(key, row as i64).unwrap();
    }
    series
}

/// Row index a lookup must resolve to, computed by scanning.
fn expected_row(keys: &[i64], key: i64, lookup: Lookup) -> Option<usize> {
    match lookup {
        Lookup::EQ => keys.iter().rposition(|&k| k == key),
        Lookup::LE => keys.iter().rposition(|&k| k <= key),
        Lookup::LT => keys.iter().rposition(|&k| k < key),
        Lookup::GE => keys.iter().position(|&k| k >= key),
        Lookup::GT => keys.iter().position(|&k| k > key),
    }
}

/// Left row of the narrowest forward width span ending at `right`.
///
/// Falls back to row 0 when incomplete spans are allowed and nothing reaches the width.
fn expected_forward_left(
    keys: &[i64],
    right: usize,
    width: i64,
    lookup: Lookup,
    allow_incomplete: bool,
) -> Option<usize> {
    let reaches = |left: usize| {
        let distance = keys[right] - keys[left];
        match lookup {
            Lookup::GT => distance > width,
            _ => distance >= width,
        }
    };
    (0..=right)
        .rev()
        .find(|&left| reaches(left))
        .or(allow_incomplete.then_some(0))
}

/// Collects `(left, right, sum)` for every span reached by `move_next`.
fn forward_spans(
    series: &Series<i64, i64>,
    op: SpanOpCount<SumAvgOp>,
) -> Vec<(usize, usize, f64)> {
    let mut window = SpanCursor::new(series, op);
    let mut spans = Vec::new();
    while window.move_next() {
        let (left, right) = window.bounds().unwrap();
        spans.push((left, right, window.result().unwrap().sum));
    }
    spans
}

proptest! {
    /// Appended rows read back in order, across any block layout.
    #[test]
    fn test_rows_preserved_proptest(keys in weak_keys_strategy(), caps in capacity_strategy()) {
        let series = build(&keys, caps);
        let expected: Vec<(i64, i64)> =
            keys.iter().enumerate().map(|(row, &k)| (k, row as i64)).collect();

        prop_assert_eq!(series.len(), keys.len());
        prop_assert_eq!(series.to_vec(), expected);
        prop_assert_eq!(series.version(), keys.len() as u64);
    }

    /// Every lookup direction agrees with a linear scan, duplicates included.
    #[test]
    fn test_lookup_matches_scan_proptest(
        keys in weak_keys_strategy(),
        caps in capacity_strategy(),
        targets in prop::collection::vec(-2i64..500, 1..40),
    ) {
        let series = build(&keys, caps);
        for target in targets {
            for lookup in [Lookup::EQ, Lookup::LE, Lookup::LT, Lookup::GE, Lookup::GT] {
                let got = series.find_indexed(&target, lookup).map(|(row, _, _)| row);
                prop_assert_eq!(
                    got,
                    expected_row(&keys, target, lookup),
                    "key {} lookup {:?}",
                    target,
                    lookup
                );
            }
        }
    }

    /// A sliding count window always equals a sum recomputed from scratch.
    #[test]
    fn test_count_window_matches_recompute_proptest(
        keys in weak_keys_strategy(),
        caps in capacity_strategy(),
        width in 1usize..8,
    ) {
        let series = build(&keys, caps);
        let op = SpanOpCount::new(width, false, SumAvgOp::new()).unwrap();
        let mut window = SpanCursor::new(&series, op);

        let mut spans = 0;
        while window.move_next() {
            let (left, right) = window.bounds().unwrap();
            prop_assert_eq!(right - left + 1, width);
            // Values are row indexes.
            let expected: usize = (left..=right).sum();
            prop_assert_eq!(window.result().unwrap().sum, expected as f64);
            spans += 1;
        }
        prop_assert_eq!(spans, keys.len().saturating_sub(width - 1));
    }

    /// With incomplete spans allowed, every row ends a span, short ones included.
    #[test]
    fn test_incomplete_count_window_proptest(
        keys in weak_keys_strategy(),
        caps in capacity_strategy(),
        width in 1usize..8,
    ) {
        let series = build(&keys, caps);
        let op = SpanOpCount::new(width, true, SumAvgOp::new()).unwrap();
        let spans = forward_spans(&series, op);

        let expected: Vec<(usize, usize, f64)> = (0..keys.len())
            .map(|right| {
                let left = (right + 1).saturating_sub(width);
                let sum: usize = (left..=right).sum();
                (left, right, sum as f64)
            })
            .collect();
        prop_assert_eq!(spans, expected);
    }

    /// Walking back from the last span visits the forward spans in reverse.
    #[test]
    fn test_count_window_walks_back_proptest(
        keys in weak_keys_strategy(),
        caps in capacity_strategy(),
        width in 1usize..8,
        allow_incomplete in any::<bool>(),
    ) {
        let series = build(&keys, caps);
        let op = SpanOpCount::new(width, allow_incomplete, SumAvgOp::new()).unwrap();
        let mut forward = forward_spans(&series, op);
        forward.reverse();

        let op = SpanOpCount::new(width, allow_incomplete, SumAvgOp::new()).unwrap();
        let mut window = SpanCursor::new(&series, op);
        let mut backward = Vec::new();
        while window.move_previous() {
            let (left, right) = window.bounds().unwrap();
            backward.push((left, right, window.result().unwrap().sum));
        }
        prop_assert_eq!(backward, forward);
    }

    /// A forward width window is the narrowest span reaching `width`, or the
    /// whole prefix while incomplete spans are allowed.
    #[test]
    fn test_forward_width_window_matches_recompute_proptest(
        keys in weak_keys_strategy(),
        caps in capacity_strategy(),
        width in 0u8..10,
    ) {
        let series = build(&keys, caps);
        let width_key = i64::from(width);
        for lookup in [Lookup::GE, Lookup::GT] {
            for allow_incomplete in [false, true] {
                let op = SpanOpWidth::new(f64::from(width), lookup, allow_incomplete, SumAvgOp::new())
                    .unwrap();
                let mut window = SpanCursor::new(&series, op);
                let mut spans = Vec::new();
                while window.move_next() {
                    let (left, right) = window.bounds().unwrap();
                    spans.push((left, right, window.result().unwrap().sum));
                }

                let expected: Vec<(usize, usize, f64)> = (0..keys.len())
                    .filter_map(|right| {
                        expected_forward_left(&keys, right, width_key, lookup, allow_incomplete)
                            .map(|left| {
                                let sum: usize = (left..=right).sum();
                                (left, right, sum as f64)
                            })
                    })
                    .collect();
                prop_assert_eq!(
                    spans,
                    expected,
                    "lookup {:?} incomplete {}",
                    lookup,
                    allow_incomplete
                );
            }
        }
    }

    /// A backward width window holds exactly the rows within `width` of its right key.
    #[test]
    fn test_width_window_matches_recompute_proptest(
        keys in weak_keys_strategy(),
        caps in capacity_strategy(),
        width in 0u8..10,
    ) {
        let series = build(&keys, caps);
        let op = SpanOpWidth::new(f64::from(width), Lookup::LE, false, SumAvgOp::new()).unwrap();
        let mut window = SpanCursor::new(&series, op);

        let mut right = 0;
        while window.move_next() {
            let (left, r) = window.bounds().unwrap();
            prop_assert_eq!(r, right);
            let expected_left = keys
                .iter()
                .position(|&k| keys[r] - k <= i64::from(width))
                .unwrap();
            prop_assert_eq!(left, expected_left);
            let expected: usize = (left..=r).sum();
            prop_assert_eq!(window.result().unwrap().sum, expected as f64);
            right += 1;
        }
        prop_assert_eq!(right, keys.len());
    }

    /// Gorilla frames are lossless for arbitrary keys and value bit patterns.
    #[test]
    fn test_gorilla_roundtrip_proptest(
        rows in prop::collection::vec((any::<i64>(), any::<u64>()), 0..200)
    ) {
        let rows: Vec<(i64, f64)> = rows.into_iter().map(|(k, v)| (k, f64::from_bits(v))).collect();
        let bytes = GorillaCodec.encode(&rows).unwrap();
        let decoded = GorillaCodec.decode(&bytes).unwrap();

        prop_assert_eq!(decoded.len(), rows.len());
        for ((k0, v0), (k1, v1)) in rows.iter().zip(&decoded) {
            prop_assert_eq!(k0, k1);
            prop_assert_eq!(v0.to_bits(), v1.to_bits());
        }
    }

    /// Typical regular-interval data compresses well below the raw size.
    #[test]
    fn test_gorilla_compresses_typical_proptest(
        interval in 1i64..1000,
        values in prop::collection::vec(-1000.0f64..1000.0, 1..100),
    ) {
        let rows: Vec<(i64, f64)> = values
            .iter()
            .enumerate()
            .map(|(i, &v)| (1_000_000_000_000 + i as i64 * interval, v))
            .collect();
        let bytes = GorillaCodec.encode(&rows).unwrap();
        prop_assert!(bytes.len() <= 22 + 16 * rows.len() + 4);
        prop_assert_eq!(GorillaCodec.decode(&bytes).unwrap(), rows);
    }
}
