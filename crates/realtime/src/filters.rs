use serde::Serialize;

/// Row predicate attached to a change-feed binding
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatabaseFilter {
    pub column: String,
    pub operator: FilterOperator,
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FilterOperator {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
}

impl std::fmt::Display for FilterOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FilterOperator::Eq => "eq",
            FilterOperator::Neq => "neq",
            FilterOperator::Gt => "gt",
            FilterOperator::Gte => "gte",
            FilterOperator::Lt => "lt",
            FilterOperator::Lte => "lte",
            FilterOperator::In => "in",
        };
        write!(f, "{}", s)
    }
}

fn render_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Array(items) => {
            let inner: Vec<String> = items.iter().map(render_value).collect();
            format!("({})", inner.join(","))
        }
        other => other.to_string(),
    }
}

impl DatabaseFilter {
    pub fn new<T: Into<serde_json::Value>>(column: &str, operator: FilterOperator, value: T) -> Self {
        Self {
            column: column.to_string(),
            operator,
            value: value.into(),
        }
    }
}

/// Wire form: `column=op.value`, lists as `column=in.(a,b)`
impl std::fmt::Display for DatabaseFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}={}.{}", self.column, self.operator, render_value(&self.value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_filter_wire_form() {
        let f = DatabaseFilter::new("booking_id", FilterOperator::Eq, "b-1");
        assert_eq!(f.to_string(), "booking_id=eq.b-1");

        let f = DatabaseFilter::new("likes_count", FilterOperator::Gte, 10);
        assert_eq!(f.to_string(), "likes_count=gte.10");

        let f = DatabaseFilter::new("id", FilterOperator::In, json!(["a", "b"]));
        assert_eq!(f.to_string(), "id=in.(a,b)");
    }
}
