//! Durable store adapter: the `rooms` and `messages` tables behind plain
//! create/find/update/delete calls. The coordinator is the only caller that
//! writes rooms; everything in-memory is rebuilt from nothing at boot, so
//! these two tables are the whole persisted surface.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::RelayResult;
use crate::protocol::{ReactionMap, WireMessage};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Room {
    pub name: String,
    /// Sealed form, see `utils::secret`. Never the plaintext.
    pub password: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub id: String,
    pub room_name: String,
    pub username: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub reactions: ReactionMap,
}

impl StoredMessage {
    pub fn into_wire(self) -> WireMessage {
        WireMessage {
            id: self.id,
            username: self.username,
            text: self.text,
            time: self.created_at,
            reactions: self.reactions,
        }
    }
}

/// Outcome of a room insert. `Exists` is the losing side of a concurrent
/// first-join race; the caller re-reads and validates against the row that
/// won.
#[derive(Debug, PartialEq, Eq)]
pub enum RoomInsert {
    Created,
    Exists,
}

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn init_schema(&self) -> RelayResult<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS rooms (
                name       TEXT PRIMARY KEY,
                password   TEXT NOT NULL,
                created_by TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS messages (
                id         TEXT PRIMARY KEY,
                room_name  TEXT NOT NULL,
                username   TEXT NOT NULL,
                text       TEXT NOT NULL,
                created_at TEXT NOT NULL,
                reactions  TEXT NOT NULL DEFAULT '{}'
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_messages_room
             ON messages (room_name, created_at)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn find_room(&self, name: &str) -> RelayResult<Option<Room>> {
        let room = sqlx::query_as::<_, Room>(
            "SELECT name, password, created_by, created_at FROM rooms WHERE name = ?",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(room)
    }

    /// The name column's PRIMARY KEY is the tie-break for racing first
    /// joiners: the second insert comes back as `Exists`, never as a bare
    /// duplicate-key error.
    pub async fn create_room(
        &self,
        name: &str,
        sealed_password: &str,
        created_by: &str,
    ) -> RelayResult<RoomInsert> {
        let inserted =
            sqlx::query("INSERT INTO rooms (name, password, created_by, created_at) VALUES (?,?,?,?)")
                .bind(name)
                .bind(sealed_password)
                .bind(created_by)
                .bind(Utc::now())
                .execute(&self.pool)
                .await;

        match inserted {
            Ok(_) => Ok(RoomInsert::Created),
            Err(sqlx::Error::Database(db))
                if matches!(db.kind(), sqlx::error::ErrorKind::UniqueViolation) =>
            {
                Ok(RoomInsert::Exists)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Room and messages go in one transaction: the caller never observes a
    /// room that is gone while its messages linger.
    pub async fn delete_room(&self, name: &str) -> RelayResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM messages WHERE room_name = ?")
            .bind(name)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM rooms WHERE name = ?")
            .bind(name)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn list_rooms(&self) -> RelayResult<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT name FROM rooms")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(name,)| name).collect())
    }

    pub async fn insert_message(
        &self,
        room_name: &str,
        username: &str,
        text: &str,
    ) -> RelayResult<StoredMessage> {
        let msg = StoredMessage {
            id: Uuid::new_v4().to_string(),
            room_name: room_name.to_owned(),
            username: username.to_owned(),
            text: text.to_owned(),
            created_at: Utc::now(),
            reactions: ReactionMap::new(),
        };
        sqlx::query(
            "INSERT INTO messages (id, room_name, username, text, created_at, reactions)
             VALUES (?,?,?,?,?,'{}')",
        )
        .bind(&msg.id)
        .bind(&msg.room_name)
        .bind(&msg.username)
        .bind(&msg.text)
        .bind(msg.created_at)
        .execute(&self.pool)
        .await?;
        Ok(msg)
    }

    pub async fn messages_for_room(&self, room_name: &str) -> RelayResult<Vec<StoredMessage>> {
        let rows: Vec<(String, String, String, DateTime<Utc>, String)> = sqlx::query_as(
            "SELECT id, username, text, created_at, reactions
             FROM messages WHERE room_name = ? ORDER BY created_at ASC",
        )
        .bind(room_name)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, username, text, created_at, reactions)| StoredMessage {
                id,
                room_name: room_name.to_owned(),
                username,
                text,
                created_at,
                reactions: decode_reactions(&reactions),
            })
            .collect())
    }

    pub async fn find_message(&self, id: &str) -> RelayResult<Option<StoredMessage>> {
        let row: Option<(String, String, String, String, DateTime<Utc>, String)> =
            sqlx::query_as(
                "SELECT id, room_name, username, text, created_at, reactions
                 FROM messages WHERE id = ?",
            )
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(
            |(id, room_name, username, text, created_at, reactions)| StoredMessage {
                id,
                room_name,
                username,
                text,
                created_at,
                reactions: decode_reactions(&reactions),
            },
        ))
    }

    pub async fn update_reactions(&self, id: &str, reactions: &ReactionMap) -> RelayResult<()> {
        let encoded =
            serde_json::to_string(reactions).expect("a reaction map always serializes");
        sqlx::query("UPDATE messages SET reactions = ? WHERE id = ?")
            .bind(encoded)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn decode_reactions(raw: &str) -> ReactionMap {
    serde_json::from_str(raw).unwrap_or_default()
}

#[cfg(test)]
pub(crate) async fn memory_store() -> Store {
    use sqlx::sqlite::SqlitePoolOptions;

    // one connection, or every pooled conn gets its own :memory: database
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    let store = Store::new(pool);
    store.init_schema().await.unwrap();
    store
}
