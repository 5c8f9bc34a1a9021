use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Mutex;

use crate::event::{DialogueEvent, MomentComment};

pub const MOMENTS_CONVERSATION_ID: &str = "moments";

/// Persists events emitted by the parser. Ids and timestamps are assigned
/// here, never by the parser.
pub trait MessageStore: Send + Sync {
    /// Store `event` under `conversation_id` and return the ids of the new
    /// records (empty when everything was a duplicate).
    fn append_message(&self, event: &DialogueEvent, conversation_id: &str) -> Result<Vec<String>>;

    /// Keep a response that produced no events so it can be shown as-is.
    fn record_unparsed(&self, _conversation_id: &str, _raw: &str) -> Result<()> {
        Ok(())
    }
}

/// Pick the conversation an event belongs to.
///
/// A private chat whose participant could not be resolved stays in the
/// caller's current conversation rather than being dropped.
pub fn conversation_for_event(event: &DialogueEvent, current: &str) -> String {
    match event {
        DialogueEvent::PrivateChat {
            other_name: Some(name),
            ..
        } => format!("private:{}", name),
        DialogueEvent::PrivateChat { other_name: None, .. } => current.to_string(),
        DialogueEvent::GroupChat { group_name, .. } => format!("group:{}", group_name),
        DialogueEvent::Moments { .. } => MOMENTS_CONVERSATION_ID.to_string(),
        DialogueEvent::MomentReply { moment_id, .. } => {
            if moment_id.trim().is_empty() {
                current.to_string()
            } else {
                moment_id.trim().to_string()
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: String,
    pub conversation_id: String,
    pub role: String, // "assistant" for parsed replies
    pub speaker: String,
    pub content: String,
    pub time_label: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: String,
    pub kind: String, // "private", "group" or "other"
    pub title: String,
    pub message_count: usize,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMoment {
    pub id: String,
    pub signature: String,
    pub author: String,
    pub content: String,
    pub time_label: String,
    pub views: i64,
    pub likes: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredComment {
    pub id: String,
    pub moment_id: String,
    pub author: String,
    pub content: String,
    pub reply_to: String,
    pub reply_to_author: String,
    pub time_label: String,
    pub created_at: DateTime<Utc>,
}

/// SQLite-backed message store.
pub struct ChatStore {
    conn: Mutex<Connection>,
}

fn parse_timestamp(raw: &str, column: usize) -> rusqlite::Result<DateTime<Utc>> {
    raw.parse().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
    })
}

impl ChatStore {
    /// Helper to lock the connection
    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Database lock poisoned: {}", e))
    }

    /// Create or open the database
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open message store at {:?}", path))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&self) -> Result<()> {
        let conn = self.lock_conn()?;

        conn.execute(
            r#"CREATE TABLE IF NOT EXISTS chat_conversations (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                title TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )"#,
            [],
        )?;

        conn.execute(
            r#"CREATE TABLE IF NOT EXISTS chat_messages (
                id TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL,
                role TEXT NOT NULL,
                speaker TEXT NOT NULL,
                content TEXT NOT NULL,
                time_label TEXT NOT NULL,
                created_at TEXT NOT NULL
            )"#,
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_chat_messages_conversation ON chat_messages(conversation_id, created_at)",
            [],
        )?;

        conn.execute(
            r#"CREATE TABLE IF NOT EXISTS moments (
                id TEXT PRIMARY KEY,
                signature TEXT NOT NULL UNIQUE,
                author TEXT NOT NULL,
                content TEXT NOT NULL,
                time_label TEXT NOT NULL,
                views INTEGER NOT NULL,
                likes INTEGER NOT NULL,
                created_at TEXT NOT NULL
            )"#,
            [],
        )?;

        conn.execute(
            r#"CREATE TABLE IF NOT EXISTS moment_comments (
                id TEXT PRIMARY KEY,
                moment_id TEXT NOT NULL,
                author TEXT NOT NULL,
                content TEXT NOT NULL,
                reply_to TEXT NOT NULL,
                reply_to_author TEXT NOT NULL,
                time_label TEXT NOT NULL,
                created_at TEXT NOT NULL
            )"#,
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_moment_comments_moment ON moment_comments(moment_id, created_at)",
            [],
        )?;

        conn.execute(
            r#"CREATE TABLE IF NOT EXISTS raw_responses (
                conversation_id TEXT PRIMARY KEY,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL
            )"#,
            [],
        )?;

        Ok(())
    }

    fn touch_conversation(
        conn: &Connection,
        conversation_id: &str,
        kind: &str,
        title: &str,
        now: &str,
    ) -> Result<()> {
        conn.execute(
            "INSERT OR IGNORE INTO chat_conversations (id, kind, title, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)",
            params![conversation_id, kind, title, now],
        )?;
        conn.execute(
            "UPDATE chat_conversations SET updated_at = ?2 WHERE id = ?1",
            params![conversation_id, now],
        )?;
        Ok(())
    }

    fn insert_message(
        conn: &Connection,
        conversation_id: &str,
        speaker: &str,
        content: &str,
        time_label: &str,
        now: &str,
    ) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO chat_messages (id, conversation_id, role, speaker, content, time_label, created_at)
             VALUES (?1, ?2, 'assistant', ?3, ?4, ?5, ?6)",
            params![id, conversation_id, speaker, content, time_label, now],
        )?;
        Ok(id)
    }

    fn insert_comment(
        conn: &Connection,
        moment_id: &str,
        comment: &MomentComment,
        now: &str,
    ) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO moment_comments (id, moment_id, author, content, reply_to, reply_to_author, time_label, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                id,
                moment_id,
                comment.author,
                comment.content,
                comment.reply_to,
                comment.reply_to_author,
                comment.time,
                now
            ],
        )?;
        Ok(id)
    }

    /// Messages of one conversation, oldest first.
    pub fn get_chat_history_for_conversation(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<StoredMessage>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            r#"SELECT id, conversation_id, role, speaker, content, time_label, created_at
               FROM (
                   SELECT rowid AS seq, * FROM chat_messages
                   WHERE conversation_id = ?1
                   ORDER BY created_at DESC, seq DESC
                   LIMIT ?2
               )
               ORDER BY created_at ASC, seq ASC"#,
        )?;

        let messages = stmt
            .query_map(params![conversation_id, limit], |row| {
                let created_at: String = row.get(6)?;
                Ok(StoredMessage {
                    id: row.get(0)?,
                    conversation_id: row.get(1)?,
                    role: row.get(2)?,
                    speaker: row.get(3)?,
                    content: row.get(4)?,
                    time_label: row.get(5)?,
                    created_at: parse_timestamp(&created_at, 6)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(messages)
    }

    pub fn count_chat_messages_for_conversation(&self, conversation_id: &str) -> Result<usize> {
        let conn = self.lock_conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM chat_messages WHERE conversation_id = ?1",
            params![conversation_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Conversations, most recently updated first.
    pub fn list_conversations(&self, limit: usize) -> Result<Vec<ConversationSummary>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            r#"SELECT c.id, c.kind, c.title, c.updated_at, COUNT(m.id)
               FROM chat_conversations c
               LEFT JOIN chat_messages m ON m.conversation_id = c.id
               GROUP BY c.id
               ORDER BY c.updated_at DESC
               LIMIT ?1"#,
        )?;

        let conversations = stmt
            .query_map([limit], |row| {
                let updated_at: String = row.get(3)?;
                Ok(ConversationSummary {
                    id: row.get(0)?,
                    kind: row.get(1)?,
                    title: row.get(2)?,
                    updated_at: parse_timestamp(&updated_at, 3)?,
                    message_count: row.get::<_, i64>(4)? as usize,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(conversations)
    }

    /// Newest posts first.
    pub fn get_recent_moments(&self, limit: usize) -> Result<Vec<StoredMoment>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            r#"SELECT id, signature, author, content, time_label, views, likes, created_at
               FROM moments
               ORDER BY created_at DESC, rowid DESC
               LIMIT ?1"#,
        )?;

        let moments = stmt
            .query_map([limit], |row| {
                let created_at: String = row.get(7)?;
                Ok(StoredMoment {
                    id: row.get(0)?,
                    signature: row.get(1)?,
                    author: row.get(2)?,
                    content: row.get(3)?,
                    time_label: row.get(4)?,
                    views: row.get(5)?,
                    likes: row.get(6)?,
                    created_at: parse_timestamp(&created_at, 7)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(moments)
    }

    /// Comments on one post, oldest first.
    pub fn get_moment_comments(&self, moment_id: &str) -> Result<Vec<StoredComment>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            r#"SELECT id, moment_id, author, content, reply_to, reply_to_author, time_label, created_at
               FROM moment_comments
               WHERE moment_id = ?1
               ORDER BY created_at ASC, rowid ASC"#,
        )?;

        let comments = stmt
            .query_map(params![moment_id], |row| {
                let created_at: String = row.get(7)?;
                Ok(StoredComment {
                    id: row.get(0)?,
                    moment_id: row.get(1)?,
                    author: row.get(2)?,
                    content: row.get(3)?,
                    reply_to: row.get(4)?,
                    reply_to_author: row.get(5)?,
                    time_label: row.get(6)?,
                    created_at: parse_timestamp(&created_at, 7)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(comments)
    }

    /// Keep the latest raw response of a conversation, e.g. one that could not
    /// be parsed and is shown to the user as-is.
    pub fn save_raw_response(&self, conversation_id: &str, raw: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO raw_responses (conversation_id, content, created_at) VALUES (?1, ?2, ?3)",
            params![conversation_id, raw, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn get_last_raw_response(&self, conversation_id: &str) -> Result<Option<String>> {
        let conn = self.lock_conn()?;
        let raw = conn
            .query_row(
                "SELECT content FROM raw_responses WHERE conversation_id = ?1",
                params![conversation_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(raw)
    }
}

impl MessageStore for ChatStore {
    fn append_message(&self, event: &DialogueEvent, conversation_id: &str) -> Result<Vec<String>> {
        let conversation_id = conversation_id.trim();
        if conversation_id.is_empty() {
            anyhow::bail!("Cannot store a {} event without a conversation id", event.kind());
        }
        let now = Utc::now().to_rfc3339();
        let conn = self.lock_conn()?;
        // One event is stored entirely or not at all.
        let tx = conn.unchecked_transaction()?;
        let mut ids = Vec::new();

        match event {
            DialogueEvent::PrivateChat {
                other_name,
                messages,
                ..
            } => {
                let speaker = other_name.as_deref().unwrap_or_default();
                let title = other_name.as_deref().unwrap_or(conversation_id);
                Self::touch_conversation(&tx, conversation_id, "private", title, &now)?;
                for message in messages {
                    ids.push(Self::insert_message(
                        &tx,
                        conversation_id,
                        speaker,
                        message,
                        "",
                        &now,
                    )?);
                }
            }
            DialogueEvent::GroupChat {
                group_name,
                messages,
                ..
            } => {
                Self::touch_conversation(&tx, conversation_id, "group", group_name, &now)?;
                for message in messages {
                    ids.push(Self::insert_message(
                        &tx,
                        conversation_id,
                        &message.speaker,
                        &message.content,
                        &message.time,
                        &now,
                    )?);
                }
            }
            DialogueEvent::Moments { moments } => {
                for moment in moments {
                    let id = uuid::Uuid::new_v4().to_string();
                    let inserted = tx.execute(
                        "INSERT OR IGNORE INTO moments (id, signature, author, content, time_label, views, likes, created_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                        params![
                            id,
                            moment.signature,
                            moment.author,
                            moment.content,
                            moment.time,
                            moment.views,
                            moment.likes,
                            now
                        ],
                    )?;
                    if inserted == 0 {
                        tracing::debug!("Skipping duplicate moment by {}", moment.author);
                        continue;
                    }
                    for comment in &moment.comments {
                        Self::insert_comment(&tx, &id, comment, &now)?;
                    }
                    ids.push(id);
                }
            }
            DialogueEvent::MomentReply { comments, .. } => {
                for comment in comments {
                    ids.push(Self::insert_comment(&tx, conversation_id, comment, &now)?);
                }
            }
        }

        tx.commit()?;
        Ok(ids)
    }

    fn record_unparsed(&self, conversation_id: &str, raw: &str) -> Result<()> {
        self.save_raw_response(conversation_id, raw)
    }
}
