use crate::core::types::LinkAux;
use crate::store::driver::RowDict;

/// Merge two duplicate Store rows: `newer`'s non-null
/// columns win; any column `newer` leaves null is filled from `older`.
/// Used by `fix_duplicates`/`merge` when the Store driver, not the
/// in-memory link tables, holds the duplicate rows.
pub fn smart_merge_row(newer: &RowDict, older: &RowDict) -> RowDict {
    let mut merged = older.clone();
    for (col, value) in newer {
        let value_is_null = matches!(value, crate::core::types::Scalar::Null);
        if !value_is_null || !merged.contains_key(col) {
            merged.insert(col.clone(), value.clone());
        }
    }
    merged
}

/// The same smart-merge rule applied to a link row's auxiliary data:
/// whichever side has the later `timestamp` is "newer" and its
/// non-`None` fields win; fields it leaves `None` fall back to the
/// other side.
pub fn smart_merge_link_aux(a: &LinkAux, b: &LinkAux) -> LinkAux {
    let (newer, older) = match (a.timestamp, b.timestamp) {
        (Some(ta), Some(tb)) if tb > ta => (b, a),
        _ => (a, b),
    };
    LinkAux {
        priority: newer.priority.or(older.priority),
        link_type: newer.link_type.clone().or_else(|| older.link_type.clone()),
        index: newer.index.or(older.index),
        timestamp: newer.timestamp.or(older.timestamp),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Scalar;
    use chrono::{Duration, Utc};

    #[test]
    fn smart_merge_row_prefers_newer_non_null() {
        let mut newer = RowDict::new();
        newer.insert("title".to_string(), Scalar::Text("New Title".to_string()));
        newer.insert("comments".to_string(), Scalar::Null);
        let mut older = RowDict::new();
        older.insert("title".to_string(), Scalar::Text("Old Title".to_string()));
        older.insert("comments".to_string(), Scalar::Text("kept".to_string()));

        let merged = smart_merge_row(&newer, &older);
        assert_eq!(merged.get("title"), Some(&Scalar::Text("New Title".to_string())));
        assert_eq!(merged.get("comments"), Some(&Scalar::Text("kept".to_string())));
    }

    #[test]
    fn smart_merge_link_aux_picks_later_timestamp() {
        let now = Utc::now();
        let earlier = LinkAux { priority: Some(1), link_type: None, index: None, timestamp: Some(now - Duration::days(1)) };
        let later = LinkAux { priority: None, link_type: Some("primary".to_string()), index: None, timestamp: Some(now) };
        let merged = smart_merge_link_aux(&earlier, &later);
        assert_eq!(merged.link_type.as_deref(), Some("primary"));
        assert_eq!(merged.priority, Some(1));
    }
}
