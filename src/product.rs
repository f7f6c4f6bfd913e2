use async_trait::async_trait;
use rusqlite::params;
use tokio_rusqlite::Connection;
use typesafe_repository::async_ops::Select;
use typesafe_repository::prelude::*;
use yml_types::product::{Product, ProductRepository, PublishedAfter, PUBLISHED};

pub struct SqliteProductRepository {
    conn: Connection,
}

impl SqliteProductRepository {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    /// Creates the `product` table if it's missing.
    pub async fn init(conn: Connection) -> Result<Self, tokio_rusqlite::Error> {
        conn.call(|conn| {
            conn.execute(
                "CREATE TABLE IF NOT EXISTS product (
                    id INTEGER PRIMARY KEY,
                    title TEXT,
                    language TEXT,
                    alias TEXT,
                    prices TEXT,
                    category INTEGER,
                    categories TEXT,
                    media TEXT,
                    fulltext TEXT,
                    fields TEXT,
                    state INTEGER NOT NULL DEFAULT 0
                )",
                [],
            )?;
            Ok(())
        })
        .await?;
        Ok(Self::new(conn))
    }
}

impl Repository<Product> for SqliteProductRepository {
    type Error = anyhow::Error;
}

#[async_trait]
impl Select<Product, PublishedAfter> for SqliteProductRepository {
    /// Returns at most one row: the published product right after the cursor.
    async fn select(&self, PublishedAfter(id): &PublishedAfter) -> Result<Vec<Product>, Self::Error> {
        let id = *id;
        Ok(self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, title, language, alias, prices, category, categories, media, fulltext, fields
                     FROM product WHERE state = ?1 AND id > ?2 ORDER BY id LIMIT 1",
                )?;
                let p = stmt
                    .query_map(params![PUBLISHED, id], |row| {
                        Ok(Product {
                            id: row.get(0)?,
                            title: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                            language: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                            alias: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                            prices: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
                            category: row.get::<_, Option<i64>>(5)?.unwrap_or_default(),
                            categories: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
                            media: row.get::<_, Option<String>>(7)?.unwrap_or_default(),
                            fulltext: row.get(8)?,
                            fields: row.get::<_, Option<String>>(9)?.unwrap_or_default(),
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(p)
            })
            .await?)
    }
}

#[async_trait]
impl ProductRepository for SqliteProductRepository {
    async fn count_published(&self) -> Result<usize, Self::Error> {
        Ok(self
            .conn
            .call(|conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(id) FROM product WHERE state = ?1",
                    [PUBLISHED],
                    |row| row.get(0),
                )?;
                Ok(count as usize)
            })
            .await?)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    async fn repository() -> SqliteProductRepository {
        let conn = Connection::open_in_memory().await.unwrap();
        let repo = SqliteProductRepository::init(conn.clone()).await.unwrap();
        conn.call(|conn| {
            conn.execute_batch(
                "INSERT INTO product (id, title, alias, category, fulltext, state) VALUES
                    (3, 'Ring', 'ring', 4, NULL, 1),
                    (5, 'Draft', 'draft', 4, NULL, 0),
                    (7, NULL, 'chain', NULL, 'Long text', 1);",
            )?;
            Ok(())
        })
        .await
        .unwrap();
        repo
    }

    #[tokio::test]
    async fn counts_published_products() {
        let repo = repository().await;
        assert_eq!(repo.count_published().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn selects_next_published_after_cursor() {
        let repo = repository().await;
        let first = repo.select(&PublishedAfter(0)).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].id, 3);
        assert_eq!(first[0].title, "Ring");

        let next = repo.select(&PublishedAfter(3)).await.unwrap();
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].id, 7);
        assert_eq!(next[0].title, "");
        assert_eq!(next[0].category, 0);
        assert_eq!(next[0].fulltext.as_deref(), Some("Long text"));

        assert!(repo.select(&PublishedAfter(7)).await.unwrap().is_empty());
    }
}
