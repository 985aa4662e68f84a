/// Similarity engine for tracker items
///
/// Every comparison in this crate returns a *delta*: `0.0` means identical
/// and larger means further apart. `default_compare` keeps the delta in
/// `0.0..=1.0`; custom compare functions may leave that range (e.g. to add
/// a frequency bonus) but keep the direction. Best-match scoring turns a
/// delta into a closeness with `closeness(delta) = 1 - delta`, so there
/// "higher is closer".
///
/// The per-column rules are heuristics. The text rule is not symmetric and
/// none of this satisfies the triangle inequality.

use crate::tracker::item::TrackerItem;
use crate::tracker::schema::Value;

/// Compare two items, returning a delta (smaller is closer)
pub type CompareFn = dyn Fn(&TrackerItem, &TrackerItem) -> f64 + Send + Sync;

/// Merge a later item into an earlier one, returning the combined item
pub type MergeFn = dyn Fn(&TrackerItem, &TrackerItem) -> TrackerItem + Send + Sync;

const BOOL_WEIGHT: f64 = 2.0;
const NUMERIC_WEIGHT: f64 = 16.0;
const TEXT_WEIGHT: f64 = 16.0;
const SEQ_WEIGHT: f64 = 16.0;

/// Divisor mapping the summed column contributions into 0..1
const SCALE: f64 = 50.0;

/// Diminishing-returns normalization
///
/// Grows roughly linearly for small differences and approaches `weight`
/// for large ones, so one wild column can't swamp the rest.
pub fn saturate(raw: f64, weight: f64) -> f64 {
    if raw <= 0.0 {
        return 0.0;
    }
    weight * raw / ((raw + 2.0) * (raw + 2.0) + 1.0).sqrt()
}

/// Raw dissimilarity of two strings
///
/// Counts characters of `a` that appear anywhere in `b`, rewards long runs
/// of such characters, and penalizes length difference. Not edit distance.
pub fn text_difference(a: &str, b: &str) -> f64 {
    let len_diff = (a.chars().count() as i64 - b.chars().count() as i64).abs();

    let mut num_eq: i64 = 0;
    let mut num_diff: i64 = 0;
    let mut run: i64 = 0;
    let mut max_run: i64 = 0;

    for ch in a.chars() {
        if b.contains(ch) {
            num_eq += 1;
            run += 1;
            max_run = max_run.max(run);
        } else {
            num_diff += 1;
            run = 0;
        }
    }

    let raw = num_diff * 3 - num_eq * num_eq - max_run * max_run + len_diff * 2;
    raw.max(0) as f64
}

/// Raw dissimilarity of two sequences: missing elements and length difference
/// count against, shared elements count for.
pub fn seq_difference(a: &[String], b: &[String]) -> f64 {
    let len_diff = (a.len() as i64 - b.len() as i64).abs();

    let mut num_eq: i64 = 0;
    let mut num_diff: i64 = 0;
    for element in a {
        if b.contains(element) {
            num_eq += 1;
        } else {
            num_diff += 1;
        }
    }

    let raw = num_diff * 3 + len_diff * 2 - num_eq;
    raw.max(0) as f64
}

/// Weighted, saturated contribution of a single column
pub fn column_delta(a: &Value, b: &Value) -> f64 {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => {
            BOOL_WEIGHT * (*x as i64 - *y as i64).abs() as f64
        }
        (Value::Str(x), Value::Str(y)) => saturate(text_difference(x, y), TEXT_WEIGHT),
        (Value::Seq(x), Value::Seq(y)) => saturate(seq_difference(x, y), SEQ_WEIGHT),
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => saturate((x - y).abs(), NUMERIC_WEIGHT),
            // Items of one tracker share a schema; mixed types only come from misuse
            _ => NUMERIC_WEIGHT,
        },
    }
}

/// Default item comparison, a delta in `0.0..=1.0`
pub fn default_compare(a: &TrackerItem, b: &TrackerItem) -> f64 {
    let total: f64 = a
        .values()
        .iter()
        .zip(b.values().iter())
        .map(|(x, y)| column_delta(x, y))
        .sum();

    (total / SCALE).clamp(0.0, 1.0)
}

/// Closeness used by best-match scoring (higher is closer)
pub fn closeness(delta: f64) -> f64 {
    1.0 - delta
}

/// Default merge of a later item into an earlier one
///
/// Booleans are OR'd, numbers move halfway toward the later value, strings
/// concatenate unless one already contains the other, sequences are
/// concatenated in order (repeats included).
pub fn default_merge(earlier: &TrackerItem, later: &TrackerItem) -> TrackerItem {
    let mut merged = earlier.clone();

    for (index, (a, b)) in earlier.values().iter().zip(later.values().iter()).enumerate() {
        let value = match (a, b) {
            (Value::Bool(x), Value::Bool(y)) => Value::Bool(*x || *y),
            (Value::Int(x), Value::Int(y)) => {
                // Round the step away from zero so the result leans toward the later value
                let step = ((*y - *x) as f64 * 0.5).round() as i64;
                Value::Int(*x + step)
            }
            (Value::Float(x), Value::Float(y)) => Value::Float(x + (y - x) * 0.5),
            (Value::Str(x), Value::Str(y)) => {
                if x.contains(y.as_str()) {
                    Value::Str(x.clone())
                } else if y.contains(x.as_str()) {
                    Value::Str(y.clone())
                } else {
                    Value::Str(format!("{}{}", x, y))
                }
            }
            (Value::Seq(x), Value::Seq(y)) => Value::Seq([x.as_slice(), y.as_slice()].concat()),
            _ => a.clone(),
        };

        // Same column type on both sides, so this can't fail
        let _ = merged.set_at(index, value);
    }

    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::schema::{ColumnType, Schema};
    use proptest::prelude::*;
    use std::sync::Arc;

    fn all_types_schema() -> Arc<Schema> {
        Arc::new(
            Schema::new(vec![
                ("flag", ColumnType::Bool),
                ("count", ColumnType::Int),
                ("weight", ColumnType::Float),
                ("name", ColumnType::Str),
                ("tags", ColumnType::Seq),
            ])
            .unwrap(),
        )
    }

    fn item(flag: bool, count: i64, weight: f64, name: &str, tags: Vec<&str>) -> TrackerItem {
        TrackerItem::from_values(
            all_types_schema(),
            vec![flag.into(), count.into(), weight.into(), name.into(), tags.into()],
        )
        .unwrap()
    }

    #[test]
    fn test_saturate_bounds() {
        assert_eq!(saturate(0.0, 16.0), 0.0);
        assert!(saturate(1_000_000.0, 16.0) < 16.0);
        assert!(saturate(1_000_000.0, 16.0) > 15.9);
        assert!(saturate(2.0, 16.0) < saturate(3.0, 16.0));
    }

    #[test]
    fn test_identical_items_have_zero_delta() {
        let a = item(true, 4, 1.5, "downloads", vec!["a", "b"]);
        assert_eq!(default_compare(&a, &a.clone()), 0.0);
    }

    #[test]
    fn test_numeric_difference_increases_delta() {
        let a = item(false, 1, 0.0, "x", vec![]);
        let near = item(false, 2, 0.0, "x", vec![]);
        let far = item(false, 50, 0.0, "x", vec![]);
        assert!(default_compare(&a, &near) < default_compare(&a, &far));
    }

    #[test]
    fn test_text_difference_is_not_edit_distance() {
        // A single substituted letter still shares most characters
        assert_eq!(text_difference("alpha", "alphb"), 0.0);
        assert!(text_difference("alpha", "zzz") > 0.0);
    }

    #[test]
    fn test_text_difference_is_asymmetric() {
        // Every char of "ab" is in "abcdef", but not the other way round
        assert_ne!(text_difference("ab", "abcdef"), text_difference("abcdef", "ab"));
    }

    #[test]
    fn test_seq_difference_rewards_overlap() {
        let base = vec!["docs".to_string(), "notes".to_string()];
        let overlap = vec!["docs".to_string(), "music".to_string()];
        let disjoint = vec!["x".to_string(), "y".to_string()];
        assert!(seq_difference(&base, &overlap) < seq_difference(&base, &disjoint));
        assert_eq!(seq_difference(&base, &base), 0.0);
    }

    #[test]
    fn test_closeness_direction() {
        assert!(closeness(0.1) > closeness(0.9));
    }

    #[test]
    fn test_default_merge_rules() {
        let a = item(false, 2, 1.0, "alpha", vec!["x"]);
        let b = item(true, 4, 3.0, "beta", vec!["x", "y"]);
        let merged = default_merge(&a, &b);

        assert_eq!(merged.get("flag"), Some(&Value::Bool(true)));
        assert_eq!(merged.get("count"), Some(&Value::Int(3)));
        assert_eq!(merged.get("weight"), Some(&Value::Float(2.0)));
        assert_eq!(merged.get_str("name"), Some("alphabeta"));
        assert_eq!(merged.get_seq("tags").unwrap(), ["x", "x", "y"]);
    }

    #[test]
    fn test_seq_merge_concatenates_in_order() {
        let a = item(false, 0, 0.0, "", vec!["docs", "notes"]);
        let b = item(false, 0, 0.0, "", vec!["notes", "music"]);
        assert_eq!(
            default_merge(&a, &b).get("tags"),
            Some(&Value::from(vec!["docs", "notes", "notes", "music"]))
        );
        assert_eq!(
            default_merge(&b, &a).get("tags"),
            Some(&Value::from(vec!["notes", "music", "docs", "notes"]))
        );
    }

    #[test]
    fn test_int_merge_leans_toward_later() {
        let a = item(false, 5, 0.0, "", vec![]);
        let b = item(false, 2, 0.0, "", vec![]);
        assert_eq!(default_merge(&a, &b).get("count"), Some(&Value::Int(3)));

        let a = item(false, 2, 0.0, "", vec![]);
        let b = item(false, 5, 0.0, "", vec![]);
        assert_eq!(default_merge(&a, &b).get("count"), Some(&Value::Int(4)));
    }

    #[test]
    fn test_equal_strings_do_not_double() {
        let a = item(false, 2, 0.0, "alpha", vec![]);
        let b = item(false, 4, 0.0, "alpha", vec![]);
        assert_eq!(default_merge(&a, &b).get_str("name"), Some("alpha"));
    }

    proptest! {
        #[test]
        fn prop_self_compare_is_minimum(
            flag in any::<bool>(),
            count in -10_000i64..10_000,
            weight in -1e6f64..1e6,
            name in "[a-z ]{0,16}",
            tags in proptest::collection::vec("[a-z]{1,6}", 0..5),
        ) {
            let tags: Vec<&str> = tags.iter().map(String::as_str).collect();
            let x = item(flag, count, weight, &name, tags);
            prop_assert_eq!(default_compare(&x, &x), 0.0);
        }

        #[test]
        fn prop_delta_stays_in_range(
            a in -10_000i64..10_000,
            b in -10_000i64..10_000,
            s in "[a-z]{0,12}",
            t in "[a-z]{0,12}",
        ) {
            let x = item(true, a, 0.0, &s, vec![]);
            let y = item(false, b, 0.0, &t, vec!["q"]);
            let delta = default_compare(&x, &y);
            prop_assert!((0.0..=1.0).contains(&delta));
        }
    }
}
