use crate::{decode, scalar_to_string, PayloadError};
use derive_more::Display;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use typesafe_repository::async_ops::Select;
use typesafe_repository::macros::Id;
use typesafe_repository::prelude::*;
use typesafe_repository::{IdentityOf, SelectBy, Selector};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum FieldType {
    #[display("text")]
    Text,
    #[display("list")]
    List,
    /// `list` with the `multiple` flag set.
    #[display("list_m")]
    MultiList,
    #[display("checkboxes")]
    Checkboxes,
    #[display("textarea")]
    Textarea,
    #[display("editor")]
    Editor,
}

impl FieldType {
    pub fn parse(kind: &str, multiple: bool) -> Option<Self> {
        match kind {
            "text" => Some(Self::Text),
            "list" if multiple => Some(Self::MultiList),
            "list" => Some(Self::List),
            "list_m" => Some(Self::MultiList),
            "checkboxes" => Some(Self::Checkboxes),
            "textarea" => Some(Self::Textarea),
            "editor" => Some(Self::Editor),
            _ => None,
        }
    }
}

#[derive(Id, Clone, Debug, PartialEq)]
#[Id(ref_id, get_id)]
pub struct FieldDefinition {
    #[id]
    pub alias: String,
    pub title: String,
    pub field_type: FieldType,
    /// Raw option value to display label.
    pub options: HashMap<String, String>,
}

#[derive(Deserialize, Default)]
struct FieldParams {
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    multiple: Value,
}

#[derive(Deserialize)]
struct FieldOption {
    #[serde(default)]
    value: Value,
    #[serde(default)]
    text: String,
}

impl FieldDefinition {
    /// Builds a definition from stored columns. `Ok(None)` means the field
    /// has an empty or unsupported type and isn't exported.
    pub fn from_row(
        alias: String,
        title: String,
        options: &str,
        params: &str,
    ) -> Result<Option<Self>, PayloadError> {
        let params: FieldParams = decode("params", params)?;
        let multiple = matches!(
            scalar_to_string(&params.multiple).as_deref(),
            Some("1") | Some("true")
        );
        let kind = params.kind.unwrap_or_else(|| "text".to_string());
        let Some(field_type) = FieldType::parse(&kind, multiple) else {
            return Ok(None);
        };
        let options: Value = decode("options", options)?;
        let options = match options {
            Value::Array(o) => o,
            Value::Object(o) => o.into_iter().map(|(_, v)| v).collect(),
            _ => vec![],
        };
        let options = options
            .into_iter()
            .map(serde_json::from_value::<FieldOption>)
            .collect::<Result<Vec<_>, _>>()
            .map_err(PayloadError::malformed("options"))?
            .into_iter()
            .filter_map(|o| scalar_to_string(&o.value).map(|v| (v, o.text)))
            .collect();
        Ok(Some(FieldDefinition {
            alias,
            title,
            field_type,
            options,
        }))
    }
}

pub struct ByAliases(pub Vec<IdentityOf<FieldDefinition>>);

impl Selector for ByAliases {}
impl SelectBy<ByAliases> for FieldDefinition {}

pub trait FieldRepository:
    Repository<FieldDefinition, Error = anyhow::Error>
    + Select<FieldDefinition, ByAliases>
    + Send
    + Sync
{
}
