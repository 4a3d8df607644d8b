use serde_json::Value;

use crate::models::{DatasetRow, DynamicData};

/**
 * \brief Wraps parsed rows with a derived schema and starter suggestions.
 */
pub fn from_rows(file_name: impl Into<String>, rows: Vec<DatasetRow>) -> DynamicData {
    let schema = describe_schema(&rows);
    let suggestions = heuristic_suggestions(&rows);
    DynamicData {
        dataset: rows,
        schema,
        file_name: file_name.into(),
        suggestions: Some(suggestions),
    }
}

/**
 * \brief One `- column: type` line per column of the first row, in upload order.
 */
pub fn describe_schema(rows: &[DatasetRow]) -> String {
    let Some(first) = rows.first() else {
        return String::new();
    };
    let mut lines = vec!["Dataset Schema:".to_string()];
    for (key, value) in first {
        lines.push(format!("- {}: {}", key, value_type(value)));
    }
    lines.join("\n")
}

fn value_type(value: &Value) -> &'static str {
    match value {
        Value::String(_) => "string",
        Value::Number(_) => "number",
        Value::Bool(_) => "boolean",
        Value::Null => "null",
        Value::Array(_) | Value::Object(_) => "object",
    }
}

/**
 * \brief Up to three starter questions derived from column types, no model involved.
 */
pub fn heuristic_suggestions(rows: &[DatasetRow]) -> Vec<String> {
    let Some(first) = rows.first() else {
        return Vec::new();
    };
    let numeric: Vec<&str> = first
        .iter()
        .filter(|(_, v)| v.is_number())
        .map(|(k, _)| k.as_str())
        .collect();
    let text: Vec<&str> = first
        .iter()
        .filter(|(_, v)| v.is_string())
        .map(|(k, _)| k.as_str())
        .collect();
    let has_time_column = first.keys().any(|k| {
        let k = k.to_lowercase();
        k.contains("date") || k.contains("time") || k.contains("year")
    });

    let mut out = Vec::new();
    if let Some(num) = numeric.first() {
        out.push(format!("Show total {}", num));
        if let Some(label) = text.first() {
            out.push(format!("{} by {}", num, label));
        }
    }

    if has_time_column && !numeric.is_empty() {
        out.push(format!("{} trend over time", numeric[0]));
    } else if numeric.len() > 1 {
        out.push(format!("Compare {} vs {}", numeric[0], numeric[1]));
    } else if let Some(label) = text.first() {
        out.push(format!("Count by {}", label));
    }

    out.truncate(3);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(v: Value) -> DatasetRow {
        match v {
            Value::Object(m) => m,
            _ => panic!("row must be an object"),
        }
    }

    #[test]
    fn test_describe_schema_lists_types() {
        let rows = vec![row(json!({"region": "EU", "sales": 10, "active": true, "note": null}))];
        let schema = describe_schema(&rows);
        assert!(schema.starts_with("Dataset Schema:"));
        assert!(schema.contains("- region: string"));
        assert!(schema.contains("- sales: number"));
        assert!(schema.contains("- active: boolean"));
        assert!(schema.contains("- note: null"));
    }

    #[test]
    fn test_columns_keep_upload_order() {
        let first: DatasetRow =
            serde_json::from_str(r#"{"sales":1,"revenue":2,"region":"EU"}"#).expect("row");
        let rows = vec![first];
        assert_eq!(
            describe_schema(&rows),
            "Dataset Schema:\n- sales: number\n- revenue: number\n- region: string"
        );
        assert_eq!(
            heuristic_suggestions(&rows),
            vec!["Show total sales", "sales by region", "Compare sales vs revenue"]
        );
    }

    #[test]
    fn test_empty_rows() {
        assert_eq!(describe_schema(&[]), "");
        assert!(heuristic_suggestions(&[]).is_empty());
    }

    #[test]
    fn test_suggestions_with_time_column() {
        let rows = vec![row(json!({"order_date": "2024-01-01", "sales": 10}))];
        let s = heuristic_suggestions(&rows);
        assert_eq!(
            s,
            vec![
                "Show total sales".to_string(),
                "sales by order_date".to_string(),
                "sales trend over time".to_string(),
            ]
        );
    }

    #[test]
    fn test_suggestions_compare_numeric_columns() {
        let rows = vec![row(json!({"cost": 3, "revenue": 10}))];
        let s = heuristic_suggestions(&rows);
        assert_eq!(s, vec!["Show total cost", "Compare cost vs revenue"]);
    }

    #[test]
    fn test_suggestions_text_only() {
        let rows = vec![row(json!({"city": "Oslo"}))];
        assert_eq!(heuristic_suggestions(&rows), vec!["Count by city"]);
    }

    #[test]
    fn test_from_rows() {
        let rows = vec![row(json!({"month": "Jan", "sales": 100}))];
        let data = from_rows("sales.csv", rows);
        assert_eq!(data.file_name, "sales.csv");
        assert_eq!(data.dataset.len(), 1);
        assert!(data.schema.contains("- month: string"));
        assert_eq!(data.suggestions.as_ref().map(Vec::len), Some(3));
    }
}
