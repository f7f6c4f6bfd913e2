use crate::offer::{Offer, OfferProperty};
use quick_xml::events::{BytesCData, BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::writer::Writer;
use std::collections::HashSet;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use yml_types::category::CategoryNode;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShopInfo {
    pub name: String,
    pub company: String,
    pub url: String,
}

/// Feed document under construction.
#[derive(Debug, Clone)]
pub struct YmlDocument {
    date: OffsetDateTime,
    shop: ShopInfo,
    offers: Vec<Offer>,
    category_ids: Vec<i64>,
    seen_categories: HashSet<i64>,
}

impl YmlDocument {
    pub fn new(shop: ShopInfo, date: OffsetDateTime) -> Self {
        Self {
            date,
            shop,
            offers: vec![],
            category_ids: vec![],
            seen_categories: HashSet::new(),
        }
    }

    /// Appends an offer and records the category it's listed under.
    /// Returns the number of offers in the document.
    pub fn add_offer(&mut self, offer: Offer, category_id: i64) -> usize {
        if self.seen_categories.insert(category_id) {
            self.category_ids.push(category_id);
        }
        self.offers.push(offer);
        self.offers.len()
    }

    pub fn len(&self) -> usize {
        self.offers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offers.is_empty()
    }

    /// Distinct category ids referenced by offers, in first-seen order.
    pub fn category_ids(&self) -> &[i64] {
        &self.category_ids
    }

    /// Serializes the document. `categories` must already be deduplicated;
    /// parents equal to `root_id` are not written.
    pub fn write<W: std::io::Write>(
        &self,
        categories: &[CategoryNode],
        root_id: i64,
        w: W,
    ) -> Result<(), anyhow::Error> {
        let mut writer = Writer::new(w);
        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        let date = self.date.format(&Rfc3339)?;
        writer.write_event(Event::Start(
            BytesStart::new("yml_catalog").with_attributes([("date", date.as_str())]),
        ))?;
        writer.write_event(Event::Start(BytesStart::new("shop")))?;
        text_element(&mut writer, "name", &self.shop.name)?;
        text_element(&mut writer, "company", &self.shop.company)?;
        text_element(&mut writer, "url", &self.shop.url)?;

        writer.write_event(Event::Start(BytesStart::new("categories")))?;
        for c in categories {
            let id = c.id.to_string();
            let mut start = BytesStart::new("category").with_attributes([("id", id.as_str())]);
            if let Some(parent_id) = c.feed_parent(root_id) {
                start.push_attribute(("parentId", parent_id.to_string().as_str()));
            }
            writer.write_event(Event::Start(start))?;
            writer.write_event(Event::Text(BytesText::new(&c.title)))?;
            writer.write_event(Event::End(BytesEnd::new("category")))?;
        }
        writer.write_event(Event::End(BytesEnd::new("categories")))?;

        writer.write_event(Event::Start(BytesStart::new("offers")))?;
        for o in &self.offers {
            write_offer(&mut writer, o)?;
        }
        writer.write_event(Event::End(BytesEnd::new("offers")))?;
        writer.write_event(Event::End(BytesEnd::new("shop")))?;
        writer.write_event(Event::End(BytesEnd::new("yml_catalog")))?;
        Ok(())
    }
}

fn write_offer<W: std::io::Write>(writer: &mut Writer<W>, o: &Offer) -> Result<(), anyhow::Error> {
    let id = o.id.to_string();
    writer.write_event(Event::Start(
        BytesStart::new("offer").with_attributes([("id", id.as_str())]),
    ))?;
    text_element(writer, "currencyId", &o.currency)?;
    text_element(writer, "price", &o.price.to_string())?;
    text_element(writer, "name", &o.name)?;
    text_element(writer, "url", &o.url)?;
    for p in &o.properties {
        match p {
            OfferProperty::Param { name, value } => {
                writer.write_event(Event::Start(
                    BytesStart::new("param").with_attributes([("name", name.as_str())]),
                ))?;
                writer.write_event(Event::Text(BytesText::new(value)))?;
                writer.write_event(Event::End(BytesEnd::new("param")))?;
            }
            OfferProperty::Vendor(vendor) => text_element(writer, "vendor", vendor)?,
        }
    }
    text_element(writer, "categoryId", &o.category_id.to_string())?;
    for picture in &o.pictures {
        text_element(writer, "picture", picture)?;
    }
    if let Some(description) = &o.description {
        writer.write_event(Event::Start(BytesStart::new("description")))?;
        for chunk in cdata_chunks(description) {
            writer.write_event(Event::CData(BytesCData::new(chunk)))?;
        }
        writer.write_event(Event::End(BytesEnd::new("description")))?;
    }
    writer.write_event(Event::End(BytesEnd::new("offer")))?;
    Ok(())
}

fn text_element<W: std::io::Write>(
    writer: &mut Writer<W>,
    name: &str,
    text: &str,
) -> Result<(), anyhow::Error> {
    writer.write_event(Event::Start(BytesStart::new(name)))?;
    writer.write_event(Event::Text(BytesText::new(text)))?;
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

/// Splits text so that no chunk contains `]]>`, each chunk becoming its own
/// CDATA section.
fn cdata_chunks(s: &str) -> Vec<&str> {
    let mut chunks = vec![];
    let mut rest = s;
    while let Some(pos) = rest.find("]]>") {
        chunks.push(&rest[..pos + 2]);
        rest = &rest[pos + 2..];
    }
    chunks.push(rest);
    chunks
}
