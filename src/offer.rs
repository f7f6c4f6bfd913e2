use crate::router::{ProductRoute, Router, SiteUrl};
use lazy_regex::regex;
use rust_decimal::Decimal;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use yml_types::field::{FieldDefinition, FieldType};
use yml_types::product::Product;
use yml_types::{scalar_to_string, PayloadError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OfferProperty {
    Param { name: String, value: String },
    Vendor(String),
}

/// One `<offer>` of the feed, children in output order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Offer {
    pub id: i64,
    pub currency: String,
    pub price: Decimal,
    pub name: String,
    pub url: String,
    pub properties: Vec<OfferProperty>,
    pub category_id: i64,
    pub pictures: Vec<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MapperOptions {
    pub currency: String,
    /// Additional categories preferred over the primary one, first match wins.
    pub exportable_category_ids: HashSet<i64>,
    /// Field exported as `<vendor>` instead of a `<param>`.
    pub vendor_field: String,
    /// Field used as description when the product has no full text.
    pub description_field: String,
}

impl Default for MapperOptions {
    fn default() -> Self {
        Self {
            currency: "rub".to_string(),
            exportable_category_ids: HashSet::new(),
            vendor_field: "zavod".to_string(),
            description_field: "nazvanie-produkta".to_string(),
        }
    }
}

pub struct OfferMapper {
    options: MapperOptions,
    site: SiteUrl,
    router: Arc<dyn Router>,
}

impl OfferMapper {
    pub fn new(options: MapperOptions, site: SiteUrl, router: Arc<dyn Router>) -> Self {
        Self {
            options,
            site,
            router,
        }
    }

    pub fn select_category(&self, product: &Product) -> i64 {
        product
            .additional_categories()
            .find(|c| self.options.exportable_category_ids.contains(c))
            .unwrap_or(product.category)
    }

    pub fn map(
        &self,
        product: &Product,
        fields: &HashMap<String, FieldDefinition>,
        category_id: i64,
    ) -> Result<Offer, PayloadError> {
        let price = product.price(&self.options.currency)?;
        let values = product.field_values()?;
        let pictures = product
            .gallery()?
            .into_iter()
            .filter(|m| m.is_image())
            .map(|m| self.site.resource(&m.src))
            .collect();
        let route = self.router.product_route(&ProductRoute {
            id: product.id,
            alias: &product.alias,
            category: product.category,
            language: &product.language,
        });
        let properties = values
            .iter()
            .filter_map(|(alias, value)| {
                let field = fields.get(alias)?;
                let value = map_field_value(field, value)?;
                if *alias == self.options.vendor_field {
                    Some(OfferProperty::Vendor(value))
                } else {
                    Some(OfferProperty::Param {
                        name: field.title.clone(),
                        value,
                    })
                }
            })
            .collect();
        let description = product.fulltext().map(ToString::to_string).or_else(|| {
            values
                .get(&self.options.description_field)
                .and_then(scalar_to_string)
                .filter(|d| !d.is_empty())
        });
        Ok(Offer {
            id: product.id,
            currency: price.currency,
            price: price.base,
            name: product.title.clone(),
            url: self.site.absolute(&route),
            properties,
            category_id,
            pictures,
            description,
        })
    }
}

/// Display value of a raw field value, `None` when nothing is left to export.
pub fn map_field_value(field: &FieldDefinition, value: &Value) -> Option<String> {
    let mapped = match field.field_type {
        FieldType::Text => scalar_to_string(value)?,
        FieldType::List => field.options.get(&scalar_to_string(value)?)?.clone(),
        FieldType::MultiList | FieldType::Checkboxes => {
            let keys: Vec<String> = match value {
                Value::Array(keys) => keys.iter().filter_map(scalar_to_string).collect(),
                Value::Object(keys) => keys.values().filter_map(scalar_to_string).collect(),
                v => scalar_to_string(v).into_iter().collect(),
            };
            keys.iter()
                .filter_map(|k| field.options.get(k))
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join(", ")
        }
        FieldType::Textarea => collapse_line_breaks(&scalar_to_string(value)?),
        FieldType::Editor => strip_markup(&scalar_to_string(value)?),
    };
    Some(mapped).filter(|v| !v.is_empty())
}

fn collapse_line_breaks(s: &str) -> String {
    regex!(r"\r|\n").replace_all(s, " ").into_owned()
}

fn strip_markup(s: &str) -> String {
    let s = regex!(r"<[<>]+>").replace_all(s, " ");
    let s = regex!(r"(?s)<!--.*?-->|<[^>]*>").replace_all(&s, "");
    collapse_line_breaks(&s)
}
