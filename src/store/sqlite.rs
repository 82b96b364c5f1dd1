//! SQLite store backend.
//!
//! One connection behind a mutex. Every query runs on the blocking thread
//! pool so callers never stall the async runtime.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;
use uuid::Uuid;

use super::{CommitLedger, ImageStore, ScenarioStore, StoreError, StoryStore};
use crate::domain::{
    DurableId, Image, ImageDraft, PedagogicalApproach, Scenario, ScenarioDraft, Story, StoryDraft,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS stories (
    id          TEXT PRIMARY KEY,
    title       TEXT NOT NULL,
    body        TEXT NOT NULL,
    context     TEXT NOT NULL,
    category    TEXT NOT NULL,
    approach    TEXT NOT NULL,
    owner_id    TEXT,
    created_at  TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_stories_owner ON stories(owner_id, created_at);

CREATE TABLE IF NOT EXISTS scenarios (
    id               TEXT PRIMARY KEY,
    story_id         TEXT NOT NULL REFERENCES stories(id) ON DELETE CASCADE,
    sequence_number  INTEGER NOT NULL,
    description      TEXT NOT NULL,
    image_prompt     TEXT NOT NULL,
    created_at       TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_scenarios_story ON scenarios(story_id, sequence_number);

CREATE TABLE IF NOT EXISTS images (
    id            TEXT PRIMARY KEY,
    scenario_id   TEXT NOT NULL REFERENCES scenarios(id) ON DELETE CASCADE,
    prompt        TEXT NOT NULL,
    artifact_url  TEXT NOT NULL,
    created_at    TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_images_scenario ON images(scenario_id, created_at);

CREATE TABLE IF NOT EXISTS commit_ledger (
    key         TEXT PRIMARY KEY,
    durable_id  TEXT NOT NULL
);
"#;

const STORY_COLUMNS: &str =
    "id, title, body, context, category, approach, owner_id, created_at";
const SCENARIO_COLUMNS: &str =
    "id, story_id, sequence_number, description, image_prompt, created_at";
const IMAGE_COLUMNS: &str = "i.id, i.scenario_id, i.prompt, i.artifact_url, i.created_at";

// Current image: newest timestamp, then latest insert
const IMAGE_ORDER: &str = "ORDER BY i.created_at DESC, i.rowid DESC";

/// Store backend on a SQLite database
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) a database file
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Task(format!("create {}: {}", parent.display(), e)))?;
        }
        debug!(path = %path.display(), "Opening SQLite store");
        Self::init(Connection::open(path)?)
    }

    /// Private in-memory database
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a closure against the connection on the blocking pool
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| StoreError::Task("sqlite connection lock poisoned".to_string()))?;
            f(&mut guard)
        })
        .await?
    }
}

/// Stored at microsecond precision; `timestamp_now` values survive unchanged
fn timestamp(at: &DateTime<Utc>) -> String {
    // Fixed width so lexical order matches time order
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_id(raw: String) -> Result<DurableId, StoreError> {
    Uuid::parse_str(&raw)
        .map(DurableId::from_uuid)
        .map_err(|_| StoreError::Corrupt(format!("bad id '{}'", raw)))
}

fn parse_time(raw: String) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| StoreError::Corrupt(format!("bad timestamp '{}'", raw)))
}

fn story_from_row(row: &Row<'_>) -> Result<Story<DurableId>, StoreError> {
    let approach: String = row.get(5)?;
    let owner: Option<String> = row.get(6)?;
    Ok(Story {
        id: parse_id(row.get(0)?)?,
        title: row.get(1)?,
        body: row.get(2)?,
        context: row.get(3)?,
        category: row.get(4)?,
        approach: approach
            .parse::<PedagogicalApproach>()
            .map_err(|e| StoreError::Corrupt(e.to_string()))?,
        owner_id: owner
            .map(|o| {
                Uuid::parse_str(&o).map_err(|_| StoreError::Corrupt(format!("bad owner '{}'", o)))
            })
            .transpose()?,
        created_at: parse_time(row.get(7)?)?,
    })
}

fn scenario_from_row(row: &Row<'_>) -> Result<Scenario<DurableId>, StoreError> {
    Ok(Scenario {
        id: parse_id(row.get(0)?)?,
        story_id: parse_id(row.get(1)?)?,
        sequence_number: row.get(2)?,
        description: row.get(3)?,
        image_prompt: row.get(4)?,
        created_at: parse_time(row.get(5)?)?,
    })
}

fn image_from_row(row: &Row<'_>) -> Result<Image<DurableId>, StoreError> {
    Ok(Image {
        id: parse_id(row.get(0)?)?,
        scenario_id: parse_id(row.get(1)?)?,
        prompt: row.get(2)?,
        artifact_url: row.get(3)?,
        created_at: parse_time(row.get(4)?)?,
    })
}

/// Run a query and convert every row
fn query_all<T>(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
    convert: fn(&Row<'_>) -> Result<T, StoreError>,
) -> Result<Vec<T>, StoreError> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params)?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        out.push(convert(row)?);
    }
    Ok(out)
}

fn query_one<T>(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
    convert: fn(&Row<'_>) -> Result<T, StoreError>,
) -> Result<Option<T>, StoreError> {
    Ok(query_all(conn, sql, params, convert)?.into_iter().next())
}

fn exists(conn: &Connection, table: &str, id: DurableId) -> Result<bool, StoreError> {
    let found = conn
        .query_row(
            &format!("SELECT 1 FROM {} WHERE id = ?1", table),
            params![id.to_string()],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

#[async_trait]
impl StoryStore for SqliteStore {
    async fn create(&self, draft: StoryDraft) -> Result<DurableId, StoreError> {
        self.with_conn(move |conn| {
            let id = DurableId::issue();
            conn.execute(
                "INSERT INTO stories (id, title, body, context, category, approach, owner_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    id.to_string(),
                    draft.title,
                    draft.body,
                    draft.context,
                    draft.category,
                    draft.approach.as_str(),
                    draft.owner_id.map(|o| o.to_string()),
                    timestamp(&draft.created_at),
                ],
            )?;
            Ok(id)
        })
        .await
    }

    async fn get(&self, id: DurableId) -> Result<Option<Story<DurableId>>, StoreError> {
        self.with_conn(move |conn| {
            query_one(
                conn,
                &format!("SELECT {} FROM stories WHERE id = ?1", STORY_COLUMNS),
                params![id.to_string()],
                story_from_row,
            )
        })
        .await
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<Story<DurableId>>, StoreError> {
        self.with_conn(move |conn| {
            query_all(
                conn,
                &format!(
                    "SELECT {} FROM stories ORDER BY created_at DESC, rowid DESC LIMIT ?1",
                    STORY_COLUMNS
                ),
                params![limit as i64],
                story_from_row,
            )
        })
        .await
    }

    async fn list_by_owner(
        &self,
        owner_id: Uuid,
        limit: usize,
    ) -> Result<Vec<Story<DurableId>>, StoreError> {
        self.with_conn(move |conn| {
            query_all(
                conn,
                &format!(
                    "SELECT {} FROM stories WHERE owner_id = ?1
                     ORDER BY created_at DESC, rowid DESC LIMIT ?2",
                    STORY_COLUMNS
                ),
                params![owner_id.to_string(), limit as i64],
                story_from_row,
            )
        })
        .await
    }

    async fn update(&self, story: &Story<DurableId>) -> Result<bool, StoreError> {
        let story = story.clone();
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE stories SET title = ?2, body = ?3, context = ?4, category = ?5,
                 approach = ?6, owner_id = ?7 WHERE id = ?1",
                params![
                    story.id.to_string(),
                    story.title,
                    story.body,
                    story.context,
                    story.category,
                    story.approach.as_str(),
                    story.owner_id.map(|o| o.to_string()),
                ],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    async fn delete(&self, id: DurableId) -> Result<bool, StoreError> {
        self.with_conn(move |conn| {
            let changed =
                conn.execute("DELETE FROM stories WHERE id = ?1", params![id.to_string()])?;
            Ok(changed > 0)
        })
        .await
    }
}

#[async_trait]
impl ScenarioStore for SqliteStore {
    async fn create(
        &self,
        story_id: DurableId,
        draft: ScenarioDraft,
    ) -> Result<DurableId, StoreError> {
        self.with_conn(move |conn| {
            if !exists(conn, "stories", story_id)? {
                return Err(StoreError::MissingParent {
                    entity: "scenario",
                    parent: story_id,
                });
            }
            let id = DurableId::issue();
            conn.execute(
                "INSERT INTO scenarios (id, story_id, sequence_number, description, image_prompt, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    id.to_string(),
                    story_id.to_string(),
                    draft.sequence_number,
                    draft.description,
                    draft.image_prompt,
                    timestamp(&draft.created_at),
                ],
            )?;
            Ok(id)
        })
        .await
    }

    async fn get(&self, id: DurableId) -> Result<Option<Scenario<DurableId>>, StoreError> {
        self.with_conn(move |conn| {
            query_one(
                conn,
                &format!("SELECT {} FROM scenarios WHERE id = ?1", SCENARIO_COLUMNS),
                params![id.to_string()],
                scenario_from_row,
            )
        })
        .await
    }

    async fn list_by_story(
        &self,
        story_id: DurableId,
    ) -> Result<Vec<Scenario<DurableId>>, StoreError> {
        self.with_conn(move |conn| {
            query_all(
                conn,
                &format!(
                    "SELECT {} FROM scenarios WHERE story_id = ?1 ORDER BY sequence_number, rowid",
                    SCENARIO_COLUMNS
                ),
                params![story_id.to_string()],
                scenario_from_row,
            )
        })
        .await
    }
}

#[async_trait]
impl ImageStore for SqliteStore {
    async fn create(
        &self,
        scenario_id: DurableId,
        draft: ImageDraft,
    ) -> Result<DurableId, StoreError> {
        self.with_conn(move |conn| {
            if !exists(conn, "scenarios", scenario_id)? {
                return Err(StoreError::MissingParent {
                    entity: "image",
                    parent: scenario_id,
                });
            }
            let id = DurableId::issue();
            conn.execute(
                "INSERT INTO images (id, scenario_id, prompt, artifact_url, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    id.to_string(),
                    scenario_id.to_string(),
                    draft.prompt,
                    draft.artifact_url,
                    timestamp(&draft.created_at),
                ],
            )?;
            Ok(id)
        })
        .await
    }

    async fn get(&self, id: DurableId) -> Result<Option<Image<DurableId>>, StoreError> {
        self.with_conn(move |conn| {
            query_one(
                conn,
                &format!("SELECT {} FROM images i WHERE i.id = ?1", IMAGE_COLUMNS),
                params![id.to_string()],
                image_from_row,
            )
        })
        .await
    }

    async fn get_by_scenario(
        &self,
        scenario_id: DurableId,
    ) -> Result<Option<Image<DurableId>>, StoreError> {
        self.with_conn(move |conn| {
            query_one(
                conn,
                &format!(
                    "SELECT {} FROM images i WHERE i.scenario_id = ?1 {} LIMIT 1",
                    IMAGE_COLUMNS, IMAGE_ORDER
                ),
                params![scenario_id.to_string()],
                image_from_row,
            )
        })
        .await
    }

    async fn list_by_story(
        &self,
        story_id: DurableId,
    ) -> Result<Vec<Image<DurableId>>, StoreError> {
        self.with_conn(move |conn| {
            query_all(
                conn,
                &format!(
                    "SELECT {} FROM images i JOIN scenarios s ON s.id = i.scenario_id
                     WHERE s.story_id = ?1 ORDER BY i.created_at, i.rowid",
                    IMAGE_COLUMNS
                ),
                params![story_id.to_string()],
                image_from_row,
            )
        })
        .await
    }

    async fn history(&self, scenario_id: DurableId) -> Result<Vec<Image<DurableId>>, StoreError> {
        self.with_conn(move |conn| {
            query_all(
                conn,
                &format!(
                    "SELECT {} FROM images i WHERE i.scenario_id = ?1 {}",
                    IMAGE_COLUMNS, IMAGE_ORDER
                ),
                params![scenario_id.to_string()],
                image_from_row,
            )
        })
        .await
    }
}

#[async_trait]
impl CommitLedger for SqliteStore {
    async fn lookup(&self, key: &str) -> Result<Option<DurableId>, StoreError> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            let raw: Option<String> = conn
                .query_row(
                    "SELECT durable_id FROM commit_ledger WHERE key = ?1",
                    params![key],
                    |row| row.get(0),
                )
                .optional()?;
            raw.map(parse_id).transpose()
        })
        .await
    }

    async fn record(&self, key: &str, id: DurableId) -> Result<(), StoreError> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO commit_ledger (key, durable_id) VALUES (?1, ?2)",
                params![key, id.to_string()],
            )?;
            Ok(())
        })
        .await
    }
}
