use crate::category::{CategoryCatalog, SqliteCategoryRepository};
use crate::config::Settings;
use crate::feed::FeedWriter;
use crate::field::{FieldCatalog, SqliteFieldRepository};
use crate::offer::OfferMapper;
use crate::product::SqliteProductRepository;
use crate::retry::Retry;
use crate::router::{PatternRouter, SiteUrl};
use anyhow::{anyhow, Context};
use indicatif::ProgressBar;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_rusqlite::Connection;
use typesafe_repository::async_ops::Select;
use yml_types::product::{Product, ProductRepository, PublishedAfter};
use yml_types::PayloadError;

#[derive(Debug, Clone, Default)]
pub struct ExportOptions {
    /// Offers per file, `0` for a single file.
    pub products_limit: usize,
    pub retry: Retry,
}

/// Progress of a single run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExportState {
    /// Id of the last product read, exported or not.
    pub last_id: i64,
    pub exported: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSummary {
    pub total: usize,
    pub exported: usize,
    pub skipped: usize,
    pub files: Vec<PathBuf>,
}

pub struct ExportDriver {
    products: Arc<dyn ProductRepository>,
    fields: FieldCatalog,
    categories: CategoryCatalog,
    mapper: OfferMapper,
    writer: FeedWriter,
    options: ExportOptions,
    progress: ProgressBar,
}

impl ExportDriver {
    pub fn new(
        products: Arc<dyn ProductRepository>,
        fields: FieldCatalog,
        categories: CategoryCatalog,
        mapper: OfferMapper,
        writer: FeedWriter,
        options: ExportOptions,
    ) -> Self {
        Self {
            products,
            fields,
            categories,
            mapper,
            writer,
            options,
            progress: ProgressBar::hidden(),
        }
    }

    /// Wires SQLite repositories on `conn` and the feed writer as configured.
    /// The catalog schema is expected to exist.
    pub async fn open(settings: &Settings, conn: Connection) -> Result<Self, anyhow::Error> {
        let site = SiteUrl::parse(&settings.site_url)
            .with_context(|| format!("Invalid site url {:?}", settings.site_url))?;
        let router = Arc::new(PatternRouter::new(
            settings.route_pattern.clone(),
            site.base_path(),
        ));
        let writer = FeedWriter::new(
            settings.output_dir.clone(),
            settings.shop_info(site.root().to_string()),
            settings.root_category_id,
        );
        let mapper = OfferMapper::new(settings.mapper_options(), site, router);
        let retry = Retry {
            retries: settings.fetch_retries,
            delay: settings.retry_delay()?,
        };
        let options = ExportOptions {
            products_limit: settings.products_limit,
            retry,
        };

        let products = Arc::new(SqliteProductRepository::new(conn.clone()));
        let fields = Arc::new(SqliteFieldRepository::new(conn.clone()));
        let categories = Arc::new(SqliteCategoryRepository::new(conn));
        Ok(Self::new(
            products,
            FieldCatalog::new(fields, settings.cache_capacity).with_retry(retry),
            CategoryCatalog::new(categories, settings.cache_capacity).with_retry(retry),
            mapper,
            writer,
            options,
        ))
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    /// Exports every published product, in id order, into feed files.
    pub async fn run(mut self) -> Result<ExportSummary, anyhow::Error> {
        let res = self.export().await;
        self.progress.finish_and_clear();
        res
    }

    async fn export(&mut self) -> Result<ExportSummary, anyhow::Error> {
        let total = self.count_published().await?;
        log::info!("Exporting {total} published products");
        self.progress.set_length(total as u64);

        let mut state = ExportState::default();
        while let Some(product) = self.next_product(state.last_id).await? {
            if product.id <= state.last_id {
                return Err(anyhow!(
                    "Product store returned id {} after {}",
                    product.id,
                    state.last_id
                ));
            }
            state.last_id = product.id;
            self.export_product(product, &mut state).await?;
            self.progress.inc(1);
        }
        self.writer.finish(&mut self.categories).await?;

        let summary = ExportSummary {
            total,
            exported: state.exported,
            skipped: state.skipped,
            files: self.writer.written().to_vec(),
        };
        log::info!(
            "Export finished: {} exported, {} skipped, {} files",
            summary.exported,
            summary.skipped,
            summary.files.len()
        );
        Ok(summary)
    }

    async fn export_product(
        &mut self,
        product: Product,
        state: &mut ExportState,
    ) -> Result<(), anyhow::Error> {
        let aliases = match product.field_values() {
            Ok(values) => values.keys().cloned().collect::<Vec<_>>(),
            Err(err) => {
                skip(&product, err, state);
                return Ok(());
            }
        };
        let fields = self
            .fields
            .resolve(aliases)
            .await
            .context("Unable to load field definitions")?;
        let category_id = self.mapper.select_category(&product);
        let offer = match self.mapper.map(&product, &fields, category_id) {
            Ok(offer) => offer,
            Err(err) => {
                skip(&product, err, state);
                return Ok(());
            }
        };
        let count = self.writer.add_offer(offer, category_id);
        state.exported += 1;
        if self.options.products_limit > 0 && count >= self.options.products_limit {
            self.writer.flush(&mut self.categories).await?;
        }
        Ok(())
    }

    async fn count_published(&self) -> Result<usize, anyhow::Error> {
        let products = &self.products;
        self.options
            .retry
            .run("count products", || products.count_published())
            .await
            .context("Unable to count published products")
    }

    async fn next_product(&self, after: i64) -> Result<Option<Product>, anyhow::Error> {
        let products = &self.products;
        let selector = PublishedAfter(after);
        let next = self
            .options
            .retry
            .run("fetch product", || products.select(&selector))
            .await
            .with_context(|| format!("Unable to fetch product after id {after}"))?;
        Ok(next.into_iter().next())
    }
}

fn skip(product: &Product, err: PayloadError, state: &mut ExportState) {
    log::warn!("Skipping product {}: {err}", product.id);
    state.skipped += 1;
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::category::test::{repository as category_repository, FlakyCategories};
    use crate::field::test::{repository as field_repository, FlakyFields};
    use crate::offer::MapperOptions;
    use crate::xml::ShopInfo;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    async fn products() -> SqliteProductRepository {
        let conn = Connection::open_in_memory().await.unwrap();
        let repo = SqliteProductRepository::init(conn.clone()).await.unwrap();
        conn.call(|conn| {
            conn.execute_batch(
                r#"INSERT INTO product (id, title, language, alias, prices, category, fields, state) VALUES
                    (1, 'Gold ring', '*', 'gold-ring', '{"rub": {"base": "1500", "currency": "RUB"}}', 3, '{"zavod": "BrandX"}', 1),
                    (2, 'Chain', '*', 'chain', '{"rub": {"base": "900", "currency": "RUB"}}', 4, '{"metal": "au"}', 1);"#,
            )?;
            Ok(())
        })
        .await
        .unwrap();
        repo
    }

    async fn driver(dir: &std::path::Path, failures: usize, retries: usize) -> ExportDriver {
        let retry = Retry {
            retries,
            delay: Duration::ZERO,
        };
        let fields = FlakyFields {
            inner: field_repository().await,
            failures: AtomicUsize::new(failures),
        };
        let conn = Connection::open_in_memory().await.unwrap();
        let categories = FlakyCategories {
            inner: category_repository(&conn).await,
            failures: AtomicUsize::new(failures),
        };
        let site = SiteUrl::parse("https://example.com/").unwrap();
        let router = Arc::new(PatternRouter::new("{id}-{alias}", site.base_path()));
        let shop = ShopInfo {
            name: "Shop".to_string(),
            company: "Company".to_string(),
            url: site.root().to_string(),
        };
        ExportDriver::new(
            Arc::new(products().await),
            FieldCatalog::new(Arc::new(fields), 50).with_retry(retry),
            CategoryCatalog::new(Arc::new(categories), 50).with_retry(retry),
            OfferMapper::new(MapperOptions::default(), site, router),
            FeedWriter::new(dir.join("yml"), shop, 1),
            ExportOptions {
                products_limit: 0,
                retry,
            },
        )
    }

    #[tokio::test]
    async fn retries_field_and_category_store_failures() {
        let dir = tempfile::tempdir().unwrap();
        let summary = driver(dir.path(), 1, 3).await.run().await.unwrap();
        assert_eq!(summary.exported, 2);
        assert_eq!(summary.skipped, 0);

        let xml = std::fs::read_to_string(&summary.files[0]).unwrap();
        assert!(xml.contains("<vendor>BrandX</vendor>"));
        assert!(xml.contains(r#"<param name="Metal">Gold</param>"#));
        assert!(xml.contains(r#"<category id="3" parentId="2">Rings</category>"#));
    }

    #[tokio::test]
    async fn store_failure_without_retries_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let err = driver(dir.path(), 1, 0).await.run().await.unwrap_err();
        assert!(format!("{err:#}").contains("database is locked"));
    }
}
