use crate::category::CategoryCatalog;
use crate::offer::Offer;
use crate::xml::{ShopInfo, YmlDocument};
use anyhow::Context;
use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use yml_types::category::CategoryNode;

/// Splits offers into numbered feed files inside one output directory.
///
/// Holds at most one open document. The first flush of a run replaces the
/// output directory with an empty one.
pub struct FeedWriter {
    output_dir: PathBuf,
    shop: ShopInfo,
    root_category_id: i64,
    file_index: usize,
    document: Option<YmlDocument>,
    written: Vec<PathBuf>,
}

impl FeedWriter {
    pub fn new(output_dir: PathBuf, shop: ShopInfo, root_category_id: i64) -> Self {
        Self {
            output_dir,
            shop,
            root_category_id,
            file_index: 1,
            document: None,
            written: vec![],
        }
    }

    pub fn is_open(&self) -> bool {
        self.document.is_some()
    }

    /// Current document, starting a fresh one if none is open.
    pub fn ensure_open(&mut self) -> &mut YmlDocument {
        self.document
            .get_or_insert_with(|| YmlDocument::new(self.shop.clone(), OffsetDateTime::now_utc()))
    }

    /// Adds an offer to the current document, returning its offer count.
    pub fn add_offer(&mut self, offer: Offer, category_id: i64) -> usize {
        self.ensure_open().add_offer(offer, category_id)
    }

    pub fn file_path(&self, index: usize) -> PathBuf {
        self.output_dir.join(format!("export_{index}.xml"))
    }

    /// Files written so far, in order.
    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }

    /// Writes the open document to the next numbered file. Does nothing if
    /// no document is open.
    pub async fn flush(
        &mut self,
        catalog: &mut CategoryCatalog,
    ) -> Result<Option<PathBuf>, anyhow::Error> {
        let Some(document) = self.document.take() else {
            return Ok(None);
        };
        let categories = self.collect_categories(&document, catalog).await?;
        if self.file_index == 1 {
            reset_dir(&self.output_dir).await?;
        }
        let path = self.file_path(self.file_index);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => (),
            Err(err) if err.kind() == ErrorKind::NotFound => (),
            Err(err) => {
                return Err(err).with_context(|| format!("Unable to remove {}", path.display()))
            }
        }
        let mut buf = vec![];
        document.write(&categories, self.root_category_id, &mut buf)?;
        tokio::fs::write(&path, buf)
            .await
            .with_context(|| format!("Unable to write {}", path.display()))?;
        log::info!(
            "{} written: {} offers, {} categories",
            path.display(),
            document.len(),
            categories.len()
        );
        self.file_index += 1;
        self.written.push(path.clone());
        Ok(Some(path))
    }

    /// Final flush. A run that hasn't produced any file yet still writes an
    /// empty feed, so stale files never outlive an export.
    pub async fn finish(
        &mut self,
        catalog: &mut CategoryCatalog,
    ) -> Result<Option<PathBuf>, anyhow::Error> {
        if self.written.is_empty() {
            self.ensure_open();
        }
        self.flush(catalog).await
    }

    /// Categories referenced by the document plus their ancestors, each once,
    /// parents before children.
    async fn collect_categories(
        &self,
        document: &YmlDocument,
        catalog: &mut CategoryCatalog,
    ) -> Result<Vec<CategoryNode>, anyhow::Error> {
        let mut seen = HashSet::new();
        let mut categories = vec![];
        for id in document.category_ids() {
            let path = catalog.ancestors(*id).await?;
            let mut resolved = catalog.resolve(path.iter().copied()).await?;
            for id in path {
                if seen.contains(&id) {
                    continue;
                }
                if let Some(c) = resolved.remove(&id) {
                    seen.insert(id);
                    categories.push(c);
                }
            }
        }
        Ok(categories)
    }
}

async fn reset_dir(dir: &Path) -> Result<(), anyhow::Error> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => log::info!("Removed previous export in {}", dir.display()),
        Err(err) if err.kind() == ErrorKind::NotFound => (),
        Err(err) => {
            return Err(err).with_context(|| format!("Unable to clear {}", dir.display()))
        }
    }
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Unable to create {}", dir.display()))?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::category::test::repository;
    use rust_decimal::Decimal;
    use std::sync::Arc;
    use tokio_rusqlite::Connection;

    fn offer(id: i64, category_id: i64) -> Offer {
        Offer {
            id,
            currency: "RUB".to_string(),
            price: Decimal::from(100),
            name: format!("Product {id}"),
            url: format!("https://example.com/{id}"),
            properties: vec![],
            category_id,
            pictures: vec![],
            description: None,
        }
    }

    async fn setup() -> (tempfile::TempDir, FeedWriter, CategoryCatalog) {
        let dir = tempfile::tempdir().unwrap();
        let conn = Connection::open_in_memory().await.unwrap();
        let catalog = CategoryCatalog::new(Arc::new(repository(&conn).await), 50);
        let writer = FeedWriter::new(
            dir.path().join("yml"),
            ShopInfo {
                name: "Shop".to_string(),
                company: "Company".to_string(),
                url: "https://example.com/".to_string(),
            },
            1,
        );
        (dir, writer, catalog)
    }

    #[tokio::test]
    async fn flush_without_document_is_noop() {
        let (_dir, mut writer, mut catalog) = setup().await;
        assert!(!writer.is_open());
        assert_eq!(writer.flush(&mut catalog).await.unwrap(), None);
        assert!(writer.written().is_empty());
    }

    #[tokio::test]
    async fn writes_numbered_files_with_category_tree() {
        let (dir, mut writer, mut catalog) = setup().await;
        assert_eq!(writer.add_offer(offer(1, 3), 3), 1);
        assert_eq!(writer.add_offer(offer(2, 4), 4), 2);
        let first = writer.flush(&mut catalog).await.unwrap().unwrap();
        assert_eq!(first, dir.path().join("yml/export_1.xml"));
        assert!(!writer.is_open());

        writer.add_offer(offer(3, 5), 5);
        let second = writer.flush(&mut catalog).await.unwrap().unwrap();
        assert_eq!(second, dir.path().join("yml/export_2.xml"));

        let xml = std::fs::read_to_string(first).unwrap();
        assert!(xml.contains(concat!(
            r#"<categories><category id="2">Jewelry</category>"#,
            r#"<category id="3" parentId="2">Rings</category>"#,
            r#"<category id="4" parentId="2">Chains</category></categories>"#,
        )));
        assert!(!xml.contains("ROOT"));
        let xml = std::fs::read_to_string(second).unwrap();
        assert!(xml.contains(r#"<categories><category id="5">Watches</category></categories>"#));
        assert!(xml.contains(r#"<offer id="3">"#));
        assert!(!xml.contains(r#"<offer id="1">"#));
    }

    #[tokio::test]
    async fn first_flush_clears_output_dir() {
        let (dir, mut writer, mut catalog) = setup().await;
        let out = dir.path().join("yml");
        std::fs::create_dir_all(&out).unwrap();
        std::fs::write(out.join("export_7.xml"), "stale").unwrap();
        std::fs::write(out.join("export_1.xml"), "stale").unwrap();

        writer.add_offer(offer(1, 3), 3);
        writer.flush(&mut catalog).await.unwrap();
        assert!(!out.join("export_7.xml").exists());
        let xml = std::fs::read_to_string(out.join("export_1.xml")).unwrap();
        assert!(xml.starts_with("<?xml"));
    }

    #[tokio::test]
    async fn finish_writes_empty_feed_when_nothing_was_exported() {
        let (dir, mut writer, mut catalog) = setup().await;
        let path = writer.finish(&mut catalog).await.unwrap().unwrap();
        assert_eq!(path, dir.path().join("yml/export_1.xml"));
        let xml = std::fs::read_to_string(path).unwrap();
        assert!(xml.contains("<categories></categories><offers></offers>"));

        assert_eq!(writer.finish(&mut catalog).await.unwrap(), None);
    }
}
