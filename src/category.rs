use crate::cache::BoundedCache;
use crate::retry::Retry;
use async_trait::async_trait;
use itertools::Itertools;
use rusqlite::{params, params_from_iter};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_rusqlite::Connection;
use typesafe_repository::async_ops::Select;
use typesafe_repository::prelude::*;
use typesafe_repository::IdentityOf;
use yml_types::category::{ByIds, CategoryNode, CategoryRepository, ROOT_ALIAS};

pub struct SqliteCategoryRepository {
    conn: Connection,
}

impl SqliteCategoryRepository {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    /// Creates the `category` table if it's missing.
    pub async fn init(conn: Connection) -> Result<Self, tokio_rusqlite::Error> {
        conn.call(|conn| {
            conn.execute(
                "CREATE TABLE IF NOT EXISTS category (
                    id INTEGER PRIMARY KEY,
                    title TEXT,
                    alias TEXT,
                    parent_id INTEGER,
                    lft INTEGER NOT NULL DEFAULT 0,
                    rgt INTEGER NOT NULL DEFAULT 0
                )",
                [],
            )?;
            Ok(())
        })
        .await?;
        Ok(Self::new(conn))
    }
}

impl Repository<CategoryNode> for SqliteCategoryRepository {
    type Error = anyhow::Error;
}

#[async_trait]
impl Select<CategoryNode, ByIds> for SqliteCategoryRepository {
    async fn select(&self, ByIds(ids): &ByIds) -> Result<Vec<CategoryNode>, Self::Error> {
        if ids.is_empty() {
            return Ok(vec![]);
        }
        let ids = ids.clone();
        Ok(self
            .conn
            .call(move |conn| {
                let placeholders = std::iter::repeat("?").take(ids.len()).join(", ");
                let mut stmt = conn.prepare(&format!(
                    "SELECT id, title, parent_id FROM category
                     WHERE COALESCE(alias, '') <> '{ROOT_ALIAS}' AND id IN ({placeholders})"
                ))?;
                let c = stmt
                    .query_map(params_from_iter(ids.iter()), |row| {
                        Ok(CategoryNode {
                            id: row.get(0)?,
                            title: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                            parent_id: row.get(2)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(c)
            })
            .await?)
    }
}

#[async_trait]
impl CategoryRepository for SqliteCategoryRepository {
    async fn ancestor_ids(
        &self,
        id: IdentityOf<CategoryNode>,
    ) -> Result<Vec<IdentityOf<CategoryNode>>, Self::Error> {
        Ok(self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT sub.id FROM category sub
                     INNER JOIN category this ON sub.lft <= this.lft AND sub.rgt >= this.rgt
                     WHERE this.id = ?1
                     ORDER BY sub.lft",
                )?;
                let ids = stmt
                    .query_map(params![id], |row| row.get(0))?
                    .collect::<Result<Vec<IdentityOf<CategoryNode>>, _>>()?;
                Ok(ids)
            })
            .await?)
    }
}

/// Category rows and nested-set paths, backed by a capped cache.
pub struct CategoryCatalog {
    repository: Arc<dyn CategoryRepository>,
    cache: BoundedCache<IdentityOf<CategoryNode>, CategoryNode>,
    retry: Retry,
}

impl CategoryCatalog {
    pub fn new(repository: Arc<dyn CategoryRepository>, capacity: usize) -> Self {
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

    /// Path from the tree root down to `id`, `id` included. Empty for `0`.
    pub async fn ancestors(
        &self,
        id: IdentityOf<CategoryNode>,
    ) -> Result<Vec<IdentityOf<CategoryNode>>, anyhow::Error> {
        if id == 0 {
            return Ok(vec![]);
        }
        let repository = &self.repository;
        let mut path = self
            .retry
            .run("load category path", || repository.ancestor_ids(id))
            .await?;
        path.push(id);
        Ok(path.into_iter().unique().collect())
    }

    /// Categories with the given ids. Unknown ids and the root are absent.
    pub async fn resolve<I>(
        &mut self,
        ids: I,
    ) -> Result<HashMap<IdentityOf<CategoryNode>, CategoryNode>, anyhow::Error>
    where
        I: IntoIterator<Item = IdentityOf<CategoryNode>>,
    {
        if self.cache.reset_if_full() {
            log::debug!("Category cache is full, resetting");
        }
        let (mut categories, misses) = self.cache.lookup(ids);
        if misses.is_empty() {
            return Ok(categories);
        }
        let repository = &self.repository;
        let selector = ByIds(misses);
        let found = self
            .retry
            .run("load categories", || repository.select(&selector))
            .await?;
        for c in found {
            self.cache.insert(c.id, c.clone());
            categories.insert(c.id, c);
        }
        Ok(categories)
    }
}
