//! Query descriptors and result rows.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A result row: column name to value, in column order.
pub type Row = serde_json::Map<String, Value>;

/// A statement to execute.
///
/// Every input accepted by the facades is normalized to this form before
/// execution (see [`IntoQuery`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    /// Statement text with `$n` placeholders.
    pub text: String,

    /// Positional parameter values.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<Value>,

    /// Whether result rows go into the query log. `None` means yes.
    #[serde(
        default,
        rename = "logResults",
        skip_serializing_if = "Option::is_none"
    )]
    pub log_results: Option<bool>,
}

impl Query {
    /// Create a new query from statement text.
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            values: Vec::new(),
            log_results: None,
        }
    }

    /// Append a positional parameter.
    #[must_use]
    pub fn bind(mut self, value: impl Into<Value>) -> Self {
        self.values.push(value.into());
        self
    }

    /// Replace all positional parameters.
    #[must_use]
    pub fn values(mut self, values: impl IntoIterator<Item = Value>) -> Self {
        self.values = values.into_iter().collect();
        self
    }

    /// Include or omit result rows in the query log.
    #[must_use]
    pub fn log_results(mut self, enabled: bool) -> Self {
        self.log_results = Some(enabled);
        self
    }

    /// Get the statement text.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Resolve the result-logging flag: only an explicit `false` disables it.
    #[must_use]
    pub fn should_log_results(&self) -> bool {
        self.log_results != Some(false)
    }
}

/// Conversion into a [`Query`].
pub trait IntoQuery {
    /// Normalize into a query descriptor.
    fn into_query(self) -> Query;
}

impl IntoQuery for Query {
    fn into_query(self) -> Query {
        self
    }
}

impl IntoQuery for &Query {
    fn into_query(self) -> Query {
        self.clone()
    }
}

impl IntoQuery for &str {
    fn into_query(self) -> Query {
        Query::new(self)
    }
}

impl IntoQuery for String {
    fn into_query(self) -> Query {
        Query::new(self)
    }
}

impl IntoQuery for &String {
    fn into_query(self) -> Query {
        Query::new(self.as_str())
    }
}

impl<S: Into<String>> IntoQuery for (S, Vec<Value>) {
    fn into_query(self) -> Query {
        Query::new(self.0).values(self.1)
    }
}

impl<S: Into<String>> IntoQuery for (S, &[Value]) {
    fn into_query(self) -> Query {
        Query::new(self.0).values(self.1.iter().cloned())
    }
}

impl<S: Into<String>, const N: usize> IntoQuery for (S, [Value; N]) {
    fn into_query(self) -> Query {
        Query::new(self.0).values(self.1)
    }
}
