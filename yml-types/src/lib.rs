use derive_more::{Display, Error};
use serde_json::Value;

pub mod category;
pub mod field;
pub mod product;

/// Stored JSON column that doesn't have the shape the exporter expects.
#[derive(Debug, Display, Error)]
pub enum PayloadError {
    #[display("no price entry for currency {currency:?}")]
    MissingPrice { currency: String },
    #[display("malformed {column} payload: {source}")]
    Malformed {
        column: &'static str,
        source: serde_json::Error,
    },
}

impl PayloadError {
    pub fn malformed(column: &'static str) -> impl FnOnce(serde_json::Error) -> Self {
        move |source| Self::Malformed { column, source }
    }
}

/// Renders a scalar JSON value the way it's used as an option key or a text value.
pub fn scalar_to_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(true) => Some("1".to_string()),
        Value::Bool(false) | Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

/// `true` for values that carry nothing worth exporting.
pub fn is_blank(v: &Value) -> bool {
    match v {
        Value::Null | Value::Bool(false) => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        Value::Bool(true) | Value::Number(_) => false,
    }
}

pub(crate) fn decode<T>(column: &'static str, raw: &str) -> Result<T, PayloadError>
where
    T: serde::de::DeserializeOwned + Default,
{
    if raw.trim().is_empty() {
        return Ok(T::default());
    }
    serde_json::from_str(raw).map_err(PayloadError::malformed(column))
}
