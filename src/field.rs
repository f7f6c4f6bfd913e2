use crate::cache::BoundedCache;
use crate::retry::Retry;
use async_trait::async_trait;
use itertools::Itertools;
use rusqlite::params_from_iter;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_rusqlite::Connection;
use typesafe_repository::async_ops::Select;
use typesafe_repository::prelude::*;
use yml_types::field::{ByAliases, FieldDefinition, FieldRepository};

pub struct SqliteFieldRepository {
    conn: Connection,
}

impl SqliteFieldRepository {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    /// Creates the `field` table if it's missing.
    pub async fn init(conn: Connection) -> Result<Self, tokio_rusqlite::Error> {
        conn.call(|conn| {
            conn.execute(
                "CREATE TABLE IF NOT EXISTS field (
                    alias TEXT PRIMARY KEY,
                    title TEXT,
                    options TEXT,
                    params TEXT
                )",
                [],
            )?;
            Ok(())
        })
        .await?;
        Ok(Self::new(conn))
    }
}

impl Repository<FieldDefinition> for SqliteFieldRepository {
    type Error = anyhow::Error;
}

#[async_trait]
impl Select<FieldDefinition, ByAliases> for SqliteFieldRepository {
    async fn select(
        &self,
        ByAliases(aliases): &ByAliases,
    ) -> Result<Vec<FieldDefinition>, Self::Error> {
        if aliases.is_empty() {
            return Ok(vec![]);
        }
        let aliases = aliases.clone();
        let rows = self
            .conn
            .call(move |conn| {
                let placeholders = std::iter::repeat("?").take(aliases.len()).join(", ");
                let mut stmt = conn.prepare(&format!(
                    "SELECT alias, title, options, params FROM field WHERE alias IN ({placeholders})"
                ))?;
                let rows = stmt
                    .query_map(params_from_iter(aliases.iter()), |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                            row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                            row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                        ))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        Ok(rows
            .into_iter()
            .filter_map(|(alias, title, options, params)| {
                match FieldDefinition::from_row(alias.clone(), title, &options, &params) {
                    Ok(Some(f)) => Some(f),
                    Ok(None) => {
                        log::debug!("Field {alias} has no exportable type, skipping");
                        None
                    }
                    Err(err) => {
                        log::warn!("Unable to read field {alias}: {err}");
                        None
                    }
                }
            })
            .collect())
    }
}

impl FieldRepository for SqliteFieldRepository {}

/// Field definitions by alias, backed by a capped cache.
pub struct FieldCatalog {
    repository: Arc<dyn FieldRepository>,
    cache: BoundedCache<String, FieldDefinition>,
    retry: Retry,
}

impl FieldCatalog {
    pub fn new(repository: Arc<dyn FieldRepository>, capacity: usize) -> Self {
        Self {
            repository,
            cache: BoundedCache::new(capacity),
            retry: Retry::none(),
        }
    }

    pub fn with_retry(mut self, retry: Retry) -> Self {
        self.retry = retry;
        self
    }

    /// Definitions for the requested aliases. Unknown aliases and fields
    /// without an exportable type are absent from the result.
    pub async fn resolve<I>(
        &mut self,
        aliases: I,
    ) -> Result<HashMap<String, FieldDefinition>, anyhow::Error>
    where
        I: IntoIterator<Item = String>,
    {
        if self.cache.reset_if_full() {
            log::debug!("Field cache is full, resetting");
        }
        let (mut fields, misses) = self.cache.lookup(aliases);
        if misses.is_empty() {
            return Ok(fields);
        }
        let repository = &self.repository;
        let selector = ByAliases(misses);
        let found = self
            .retry
            .run("load field definitions", || repository.select(&selector))
            .await?;
        for f in found {
            self.cache.insert(f.alias.clone(), f.clone());
            fields.insert(f.alias.clone(), f);
        }
        Ok(fields)
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use typesafe_repository::Repository;
    use yml_types::field::FieldType;

    /// Fails the first `failures` lookups, then reads from `inner`.
    pub(crate) struct FlakyFields {
        pub(crate) inner: SqliteFieldRepository,
        pub(crate) failures: AtomicUsize,
    }

    impl Repository<FieldDefinition> for FlakyFields {
        type Error = anyhow::Error;
    }

    #[async_trait]
    impl Select<FieldDefinition, ByAliases> for FlakyFields {
        async fn select(&self, aliases: &ByAliases) -> Result<Vec<FieldDefinition>, Self::Error> {
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(anyhow::anyhow!("database is locked"));
            }
            self.inner.select(aliases).await
        }
    }

    impl FieldRepository for FlakyFields {}

    pub(crate) async fn repository() -> SqliteFieldRepository {
        let conn = Connection::open_in_memory().await.unwrap();
        let repo = SqliteFieldRepository::init(conn.clone()).await.unwrap();
        conn.call(|conn| {
            conn.execute_batch(
                r#"INSERT INTO field (alias, title, options, params) VALUES
                    ('zavod', 'Manufacturer', '', '{"type": "text"}'),
                    ('metal', 'Metal', '[{"value": "au", "text": "Gold"}]', '{"type": "list"}'),
                    ('inserts', 'Inserts', '[]', '{"type": "list", "multiple": "1"}'),
                    ('hidden', 'Hidden', '', '{"type": ""}'),
                    ('broken', 'Broken', '{', '{"type": "list"}');"#,
            )?;
            Ok(())
        })
        .await
        .unwrap();
        repo
    }

    #[tokio::test]
    async fn selects_exportable_fields_by_alias() {
        let repo = repository().await;
        let fields = repo
            .select(&ByAliases(vec![
                "metal".to_string(),
                "inserts".to_string(),
                "hidden".to_string(),
                "broken".to_string(),
                "missing".to_string(),
            ]))
            .await
            .unwrap();
        let mut aliases = fields.iter().map(|f| f.alias.as_str()).collect::<Vec<_>>();
        aliases.sort();
        assert_eq!(aliases, vec!["inserts", "metal"]);
        let metal = fields.iter().find(|f| f.alias == "metal").unwrap();
        assert_eq!(metal.field_type, FieldType::List);
        assert_eq!(metal.options.get("au").map(String::as_str), Some("Gold"));
    }

    #[tokio::test]
    async fn catalog_resolves_and_caches() {
        let mut catalog = FieldCatalog::new(Arc::new(repository().await), 50);
        let fields = catalog
            .resolve(["zavod".to_string(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(fields.len(), 1);
        assert_eq!(fields["zavod"].title, "Manufacturer");
        assert_eq!(catalog.cache.len(), 1);

        let fields = catalog.resolve(["zavod".to_string()]).await.unwrap();
        assert_eq!(fields["zavod"].field_type, FieldType::Text);
    }

    #[tokio::test]
    async fn catalog_retries_failed_lookups() {
        let repo = FlakyFields {
            inner: repository().await,
            failures: AtomicUsize::new(2),
        };
        let mut catalog = FieldCatalog::new(Arc::new(repo), 50).with_retry(Retry {
            retries: 2,
            delay: Duration::ZERO,
        });
        let fields = catalog.resolve(["zavod".to_string()]).await.unwrap();
        assert_eq!(fields["zavod"].title, "Manufacturer");

        let repo = FlakyFields {
            inner: repository().await,
            failures: AtomicUsize::new(1),
        };
        let mut catalog = FieldCatalog::new(Arc::new(repo), 50);
        assert!(catalog.resolve(["zavod".to_string()]).await.is_err());
    }

    #[tokio::test]
    async fn catalog_resets_cache_at_capacity() {
        let mut catalog = FieldCatalog::new(Arc::new(repository().await), 2);
        catalog
            .resolve(["zavod".to_string(), "metal".to_string()])
            .await
            .unwrap();
        assert_eq!(catalog.cache.len(), 2);
        let fields = catalog.resolve(["inserts".to_string()]).await.unwrap();
        assert_eq!(fields.len(), 1);
        assert_eq!(catalog.cache.len(), 1);
    }
}
