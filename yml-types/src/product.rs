use crate::{decode, is_blank, PayloadError};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_aux::field_attributes::deserialize_number_from_string;
use serde_json::{Map, Value};
use std::collections::HashMap;
use typesafe_repository::async_ops::Select;
use typesafe_repository::macros::Id;
use typesafe_repository::prelude::*;
use typesafe_repository::{IdentityOf, SelectBy, Selector};

/// `state` value of a published product row.
pub const PUBLISHED: i64 = 1;

/// Raw product row. JSON columns are decoded on demand so a single broken
/// row can be skipped without failing the query.
#[derive(Id, Clone, Debug, Default)]
#[Id(ref_id, get_id)]
pub struct Product {
    #[id]
    pub id: i64,
    pub title: String,
    pub language: String,
    pub alias: String,
    pub prices: String,
    pub category: i64,
    pub categories: String,
    pub media: String,
    pub fulltext: Option<String>,
    pub fields: String,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Price {
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub base: Decimal,
    #[serde(default)]
    pub currency: String,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct MediaItem {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub src: String,
}

impl MediaItem {
    pub fn is_image(&self) -> bool {
        self.kind == "image"
    }
}

#[derive(Deserialize, Default)]
struct Media {
    #[serde(default)]
    gallery: Value,
}

impl Product {
    pub fn price(&self, currency: &str) -> Result<Price, PayloadError> {
        let mut prices: HashMap<String, Price> = decode("prices", &self.prices)?;
        prices
            .remove(currency)
            .ok_or_else(|| PayloadError::MissingPrice {
                currency: currency.to_string(),
            })
    }

    /// Gallery entries in stored order. The gallery is either a list or an
    /// object keyed by position.
    pub fn gallery(&self) -> Result<Vec<MediaItem>, PayloadError> {
        let media: Media = decode("media", &self.media)?;
        let items = match media.gallery {
            Value::Null => return Ok(vec![]),
            Value::Array(items) => items,
            Value::Object(items) => items.into_iter().map(|(_, v)| v).collect(),
            other => vec![other],
        };
        items
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<_, _>>()
            .map_err(PayloadError::malformed("media"))
    }

    /// Custom field values with blank entries removed, in stored order.
    pub fn field_values(&self) -> Result<Map<String, Value>, PayloadError> {
        let mut fields: Map<String, Value> = decode("fields", &self.fields)?;
        fields.retain(|_, v| !is_blank(v));
        Ok(fields)
    }

    /// Additional category ids, in the order they're listed.
    pub fn additional_categories(&self) -> impl Iterator<Item = i64> + '_ {
        self.categories
            .split(',')
            .filter_map(|c| c.trim().parse::<i64>().ok())
            .filter(|c| *c > 0)
    }

    pub fn fulltext(&self) -> Option<&str> {
        self.fulltext.as_deref().filter(|t| !t.is_empty())
    }
}

/// Next published products after the given id, ascending.
pub struct PublishedAfter(pub IdentityOf<Product>);

impl Selector for PublishedAfter {}
impl SelectBy<PublishedAfter> for Product {}

#[async_trait]
pub trait ProductRepository:
    Repository<Product, Error = anyhow::Error> + Select<Product, PublishedAfter> + Send + Sync
{
    async fn count_published(&self) -> Result<usize, Self::Error>;
}

#[cfg(test)]
mod test {
    use super::*;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn product() -> Product {
        Product {
            id: 1,
            prices: r#"{"rub": {"base": "1500.00", "currency": "RUB"}, "usd": {"base": 20, "currency": "USD"}}"#
                .to_string(),
            categories: " 5,x, 8,0,12".to_string(),
            media: r#"{"gallery": {"gallery0": {"type": "image", "src": "/images/a.jpg"}, "gallery1": {"type": "video", "src": "v.mp4"}}}"#
                .to_string(),
            fields: r#"{"b": "", "a": "x", "c": []}"#.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn reads_price_for_currency() {
        let p = product();
        let rub = p.price("rub").unwrap();
        assert_eq!(rub.base, Decimal::from_str("1500.00").unwrap());
        assert_eq!(rub.base.to_string(), "1500.00");
        assert_eq!(rub.currency, "RUB");
        assert_eq!(p.price("usd").unwrap().base, Decimal::from(20));
        assert!(matches!(
            p.price("eur"),
            Err(PayloadError::MissingPrice { .. })
        ));
    }

    #[test]
    fn malformed_prices_are_reported() {
        let p = Product {
            prices: "{not json".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            p.price("rub"),
            Err(PayloadError::Malformed { column: "prices", .. })
        ));
    }

    #[test]
    fn reads_keyed_gallery_in_order() {
        let gallery = product().gallery().unwrap();
        assert_eq!(gallery.len(), 2);
        assert!(gallery[0].is_image());
        assert_eq!(gallery[0].src, "/images/a.jpg");
        assert!(!gallery[1].is_image());
    }

    #[test]
    fn empty_media_has_no_gallery() {
        let p = Product::default();
        assert!(p.gallery().unwrap().is_empty());
    }

    #[test]
    fn drops_blank_field_values() {
        let fields = product().field_values().unwrap();
        assert_eq!(fields.keys().collect::<Vec<_>>(), vec!["a"]);
    }

    #[test]
    fn parses_additional_categories() {
        let p = product();
        assert_eq!(p.additional_categories().collect::<Vec<_>>(), vec![5, 8, 12]);
    }
}
