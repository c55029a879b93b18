use std::str::FromStr;

use chrono::Utc;
use serde::Serialize;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    FromRow, SqlitePool,
};
use thiserror::Error;

/// How many posts `recent_posts_for_user` returns at most.
pub const RECENT_POSTS_LIMIT: i64 = 50;

#[derive(Debug, Error)]
pub enum DbError {
    /// An insert hit a UNIQUE constraint (username, feed url, or post url).
    #[error("already exists")]
    Duplicate,
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

fn map_insert_err(err: sqlx::Error) -> DbError {
    if let sqlx::Error::Database(ref db_err) = err {
        if db_err.is_unique_violation() {
            return DbError::Duplicate;
        }
    }
    DbError::Sqlx(err)
}

#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub password_hash: String,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Feed {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub url: String,
    pub last_fetched: Option<String>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Post {
    pub id: i64,
    pub feed_id: i64,
    pub title: String,
    pub url: String,
    pub published_at: Option<String>,
}

/// Slim feed row for the poller: it only needs id + url.
#[derive(Debug, Clone, FromRow)]
pub struct FeedRef {
    pub id: i64,
    pub url: String,
}

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        // Cascade deletes rely on foreign-key enforcement being on.
        let options = SqliteConnectOptions::from_str(database_url)?.foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    pub async fn initialize(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY,
                username TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feeds (
                id INTEGER PRIMARY KEY,
                user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                url TEXT NOT NULL UNIQUE,
                last_fetched TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS posts (
                id INTEGER PRIMARY KEY,
                feed_id INTEGER NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
                title TEXT NOT NULL,
                url TEXT NOT NULL UNIQUE,
                published_at TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_posts_feed_published
            ON posts(feed_id, published_at DESC)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // Users

    /// Insert a new user row. The UNIQUE constraint on username is the
    /// source of truth for duplicates; there is no pre-check.
    pub async fn create_user(&self, username: &str, password_hash: &str) -> Result<i64, DbError> {
        let result = sqlx::query("INSERT INTO users (username, password_hash) VALUES (?, ?)")
            .bind(username)
            .bind(password_hash)
            .execute(&self.pool)
            .await
            .map_err(map_insert_err)?;

        Ok(result.last_insert_rowid())
    }

    pub async fn user_by_username(&self, username: &str) -> Result<Option<User>, DbError> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, username, password_hash FROM users WHERE username = ?",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    // Feeds

    pub async fn feeds_for_user(&self, user_id: i64) -> Result<Vec<Feed>, DbError> {
        let feeds = sqlx::query_as::<_, Feed>("SELECT * FROM feeds WHERE user_id = ? ORDER BY id")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(feeds)
    }

    pub async fn add_feed(&self, user_id: i64, name: &str, url: &str) -> Result<i64, DbError> {
        let result = sqlx::query("INSERT INTO feeds (user_id, name, url) VALUES (?, ?, ?)")
            .bind(user_id)
            .bind(name)
            .bind(url)
            .execute(&self.pool)
            .await
            .map_err(map_insert_err)?;

        Ok(result.last_insert_rowid())
    }

    /// Delete a feed, scoped to its owner. Returns whether a row was
    /// actually removed, so callers can distinguish a missing or
    /// foreign feed from a real delete.
    pub async fn delete_feed(&self, user_id: i64, feed_id: i64) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM feeds WHERE id = ? AND user_id = ?")
            .bind(feed_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Every feed in the system, regardless of owner. Poller input.
    pub async fn all_feeds(&self) -> Result<Vec<FeedRef>, DbError> {
        let feeds = sqlx::query_as::<_, FeedRef>("SELECT id, url FROM feeds ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(feeds)
    }

    pub async fn mark_feed_fetched(&self, feed_id: i64) -> Result<(), DbError> {
        let now = Utc::now().to_rfc3339();
        sqlx::query("UPDATE feeds SET last_fetched = ? WHERE id = ?")
            .bind(&now)
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // Posts

    pub async fn post_exists(&self, url: &str) -> Result<bool, DbError> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT id FROM posts WHERE url = ?")
            .bind(url)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    pub async fn insert_post(
        &self,
        feed_id: i64,
        title: &str,
        url: &str,
        published_at: Option<&str>,
    ) -> Result<(), DbError> {
        sqlx::query("INSERT INTO posts (feed_id, title, url, published_at) VALUES (?, ?, ?, ?)")
            .bind(feed_id)
            .bind(title)
            .bind(url)
            .bind(published_at)
            .execute(&self.pool)
            .await
            .map_err(map_insert_err)?;

        Ok(())
    }

    /// Most recent posts across all of a user's feeds, newest first.
    /// Posts without a publish time sort last.
    pub async fn recent_posts_for_user(&self, user_id: i64) -> Result<Vec<Post>, DbError> {
        let posts = sqlx::query_as::<_, Post>(
            r#"
            SELECT p.id, p.feed_id, p.title, p.url, p.published_at
            FROM posts p
            JOIN feeds f ON p.feed_id = f.id
            WHERE f.user_id = ?
            ORDER BY p.published_at DESC NULLS LAST, p.id DESC
            LIMIT ?
            "#,
        )
        .bind(user_id)
        .bind(RECENT_POSTS_LIMIT)
        .fetch_all(&self.pool)
        .await?;
        Ok(posts)
    }
}
