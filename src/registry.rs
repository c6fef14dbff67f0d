//! Source registry: the persisted, ordered list of registered links.
//!
//! Backed by SQLite. The list is only ever replaced wholesale on an
//! explicit save, never mutated incrementally, so the persisted registry
//! always reflects the last successfully synchronized set. Files are not
//! tracked here; object storage's own listing is their source of truth.

use anyhow::Result;
use regex::Regex;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

/// Persistent store for the flat list of registered link URLs.
pub struct LinkRegistry {
    pool: SqlitePool,
}

impl LinkRegistry {
    /// Open (or create) the registry database and run its schema.
    pub async fn connect(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS links (
                position INTEGER PRIMARY KEY,
                url TEXT NOT NULL UNIQUE
            )
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }

    /// All registered links, in registration order.
    pub async fn get_links(&self) -> Result<Vec<String>> {
        let links: Vec<String> =
            sqlx::query_scalar("SELECT url FROM links ORDER BY position ASC")
                .fetch_all(&self.pool)
                .await?;
        Ok(links)
    }

    /// Replace the whole registered set in one transaction (full replace,
    /// not incremental).
    pub async fn replace_links(&self, links: &[String]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM links").execute(&mut *tx).await?;

        for (position, url) in links.iter().enumerate() {
            sqlx::query("INSERT INTO links (position, url) VALUES (?, ?)")
                .bind(position as i64)
                .bind(url)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Loose URL shape check applied before a link may be registered.
pub fn is_url_valid(url: &str) -> bool {
    // scheme optional, host with at least one dot and a 2+ letter TLD
    let url_regex = Regex::new(r"^(https?://)?(([A-Za-z0-9-]+\.)+[A-Za-z]{2,})(/\S*)?$")
        .expect("valid URL regex");
    url_regex.is_match(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn temp_registry() -> (LinkRegistry, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let registry = LinkRegistry::connect(&dir.path().join("links.db"))
            .await
            .unwrap();
        (registry, dir)
    }

    #[tokio::test]
    async fn empty_registry_returns_no_links() {
        let (registry, _dir) = temp_registry().await;
        assert!(registry.get_links().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn replace_then_get_preserves_order() {
        let (registry, _dir) = temp_registry().await;
        let links = vec![
            "https://example.com/b".to_string(),
            "https://example.com/a".to_string(),
            "https://example.com/c".to_string(),
        ];
        registry.replace_links(&links).await.unwrap();
        assert_eq!(registry.get_links().await.unwrap(), links);
    }

    #[tokio::test]
    async fn replace_is_a_full_replace() {
        let (registry, _dir) = temp_registry().await;
        registry
            .replace_links(&["https://old.example.com".to_string()])
            .await
            .unwrap();
        let new_links = vec!["https://new.example.com".to_string()];
        registry.replace_links(&new_links).await.unwrap();
        assert_eq!(registry.get_links().await.unwrap(), new_links);
    }

    #[test]
    fn accepts_plausible_urls() {
        assert!(is_url_valid("https://example.com"));
        assert!(is_url_valid("http://docs.example.co.uk/path?q=1"));
        assert!(is_url_valid("example.com/page"));
    }

    #[test]
    fn rejects_malformed_urls() {
        assert!(!is_url_valid(""));
        assert!(!is_url_valid("not a url"));
        assert!(!is_url_valid("http://"));
        assert!(!is_url_valid("ftp;//example"));
    }
}
