//! SQL text shared by both backends.

use crate::models::Grouping;

/// `model, provider, ` style prefix for a SELECT list, empty for the empty
/// grouping.
pub fn select_columns(grouping: &Grouping) -> String {
    grouping
        .fields()
        .map(|field| format!("{}, ", field.column()))
        .collect()
}

/// `GROUP BY ...` clause, empty for the empty grouping.
pub fn group_by_clause(grouping: &Grouping) -> String {
    if grouping.is_empty() {
        return String::new();
    }
    let columns: Vec<&str> = grouping.fields().map(|f| f.column()).collect();
    format!("GROUP BY {}", columns.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_by_clause() {
        assert_eq!(group_by_clause(&Grouping::default()), "");
        assert_eq!(
            group_by_clause(&Grouping::parse("provider,model").unwrap()),
            "GROUP BY model, provider"
        );
    }

    #[test]
    fn test_select_columns() {
        assert_eq!(select_columns(&Grouping::default()), "");
        assert_eq!(select_columns(&Grouping::parse("agent").unwrap()), "agent, ");
    }
}
