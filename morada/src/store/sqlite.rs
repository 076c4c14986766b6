//! SQLite-backed [`AdvisorStore`]. Persistent across restarts; single-node.
//!
//! Opens a connection per call inside `spawn_blocking`. `init_db` is safe to
//! run on every startup (`IF NOT EXISTS` throughout).

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::error::StoreError;

use super::{
    merge_section_patch, ActionLogEntry, AdvisorStore, AnalysisRecord, Conversation,
    DurableEffect, HydrationBundle, PortfolioEntry, PortfolioItem, PortfolioStatus, Profile,
    PropertyRecord, RoomFeature, StoredMessage, ANALYSIS_KIND_RENOVATION,
};

/// SQLite store; one file, one table per owned row kind.
pub struct SqliteStore {
    db_path: PathBuf,
}

impl SqliteStore {
    /// Opens (creating if needed) the database and ensures the schema exists.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db_path = path.as_ref().to_path_buf();
        let conn = Connection::open(&db_path)?;
        init_db(&conn)?;
        Ok(Self { db_path })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = Connection::open(&path)?;
            conn.busy_timeout(Duration::from_secs(5))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Storage(format!("store task join: {}", e)))?
    }
}

/// Initialises every table and index. Safe to call on each startup.
pub fn init_db(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS profiles (
            user_id           TEXT PRIMARY KEY,
            sections          TEXT NOT NULL DEFAULT '{}',
            section_summaries TEXT NOT NULL DEFAULT '{}',
            master_summary    TEXT NOT NULL DEFAULT '',
            created_at        TEXT NOT NULL,
            updated_at        TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS properties (
            id          TEXT PRIMARY KEY,
            external_id TEXT NOT NULL UNIQUE,
            url         TEXT NOT NULL,
            title       TEXT NOT NULL,
            location    TEXT NOT NULL,
            price_eur   INTEGER NOT NULL,
            typology    TEXT NOT NULL,
            area_m2     REAL NOT NULL,
            images      TEXT NOT NULL DEFAULT '[]',
            scraped_at  TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS portfolio_items (
            id             TEXT PRIMARY KEY,
            user_id        TEXT NOT NULL,
            property_id    TEXT NOT NULL,
            nickname       TEXT,
            status         TEXT NOT NULL DEFAULT 'saved',
            is_active      INTEGER NOT NULL DEFAULT 0,
            created_at     TEXT NOT NULL,
            last_active_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_portfolio_user
            ON portfolio_items(user_id, status);
        CREATE TABLE IF NOT EXISTS analyses (
            id          TEXT PRIMARY KEY,
            user_id     TEXT NOT NULL,
            property_id TEXT NOT NULL,
            kind        TEXT NOT NULL,
            cost_min    INTEGER NOT NULL,
            cost_max    INTEGER NOT NULL,
            confidence  REAL NOT NULL,
            narrative   TEXT NOT NULL,
            created_at  TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_analyses_lookup
            ON analyses(user_id, property_id, kind, created_at DESC);
        CREATE TABLE IF NOT EXISTS room_features (
            id          TEXT PRIMARY KEY,
            analysis_id TEXT NOT NULL,
            room_key    TEXT NOT NULL,
            room_type   TEXT NOT NULL,
            condition   TEXT NOT NULL,
            items       TEXT NOT NULL DEFAULT '[]',
            cost_min    INTEGER NOT NULL,
            cost_max    INTEGER NOT NULL,
            confidence  REAL NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_room_features_analysis
            ON room_features(analysis_id);
        CREATE TABLE IF NOT EXISTS conversations (
            id            TEXT PRIMARY KEY,
            user_id       TEXT NOT NULL,
            message_count INTEGER NOT NULL DEFAULT 0,
            summary       TEXT,
            created_at    TEXT NOT NULL,
            ended_at      TEXT
        );
        CREATE TABLE IF NOT EXISTS messages (
            id              TEXT PRIMARY KEY,
            conversation_id TEXT NOT NULL,
            role            TEXT NOT NULL,
            content         TEXT NOT NULL,
            tool_calls      TEXT,
            tool_call_id    TEXT,
            created_at      TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages(conversation_id, created_at);
        CREATE TABLE IF NOT EXISTS action_log (
            id                TEXT PRIMARY KEY,
            user_id           TEXT NOT NULL,
            conversation_id   TEXT NOT NULL,
            message_id        TEXT,
            action_type       TEXT NOT NULL,
            entity_type       TEXT NOT NULL,
            entity_id         TEXT NOT NULL,
            field_changed     TEXT,
            old_value         TEXT,
            new_value         TEXT,
            trigger_message   TEXT,
            confidence        REAL NOT NULL,
            confirmed_by_user INTEGER NOT NULL,
            timestamp         TEXT NOT NULL
        );",
    )?;
    Ok(())
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

const PROPERTY_COLS: &str =
    "id, external_id, url, title, location, price_eur, typology, area_m2, images, scraped_at";

fn row_to_property(row: &rusqlite::Row<'_>, offset: usize) -> Result<PropertyRecord, StoreError> {
    let images: String = row.get(offset + 8)?;
    Ok(PropertyRecord {
        id: row.get(offset)?,
        external_id: row.get(offset + 1)?,
        url: row.get(offset + 2)?,
        title: row.get(offset + 3)?,
        location: row.get(offset + 4)?,
        price_eur: row.get(offset + 5)?,
        typology: row.get(offset + 6)?,
        area_m2: row.get(offset + 7)?,
        images: serde_json::from_str(&images)?,
        scraped_at: row.get(offset + 9)?,
    })
}

const ITEM_COLS: &str =
    "id, user_id, property_id, nickname, status, is_active, created_at, last_active_at";

fn row_to_item(row: &rusqlite::Row<'_>, offset: usize) -> Result<PortfolioItem, StoreError> {
    let status: String = row.get(offset + 4)?;
    Ok(PortfolioItem {
        id: row.get(offset)?,
        user_id: row.get(offset + 1)?,
        property_id: row.get(offset + 2)?,
        nickname: row.get(offset + 3)?,
        status: PortfolioStatus::parse(&status)?,
        is_active: row.get::<_, i64>(offset + 5)? != 0,
        created_at: row.get(offset + 6)?,
        last_active_at: row.get(offset + 7)?,
    })
}

const ANALYSIS_COLS: &str =
    "id, user_id, property_id, kind, cost_min, cost_max, confidence, narrative, created_at";

fn row_to_analysis(row: &rusqlite::Row<'_>, offset: usize) -> Result<AnalysisRecord, StoreError> {
    Ok(AnalysisRecord {
        id: row.get(offset)?,
        user_id: row.get(offset + 1)?,
        property_id: row.get(offset + 2)?,
        kind: row.get(offset + 3)?,
        cost_min: row.get(offset + 4)?,
        cost_max: row.get(offset + 5)?,
        confidence: row.get(offset + 6)?,
        narrative: row.get(offset + 7)?,
        created_at: row.get(offset + 8)?,
    })
}

fn upsert_property_tx(conn: &Connection, record: &PropertyRecord) -> Result<(), StoreError> {
    let images = serde_json::to_string(&record.images)?;
    conn.execute(
        "INSERT INTO properties
         (id, external_id, url, title, location, price_eur, typology, area_m2, images, scraped_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
         ON CONFLICT(external_id) DO UPDATE SET
            url = excluded.url,
            title = excluded.title,
            location = excluded.location,
            price_eur = excluded.price_eur,
            typology = excluded.typology,
            area_m2 = excluded.area_m2,
            images = excluded.images,
            scraped_at = excluded.scraped_at",
        params![
            record.id,
            record.external_id,
            record.url,
            record.title,
            record.location,
            record.price_eur,
            record.typology,
            record.area_m2,
            images,
            record.scraped_at,
        ],
    )?;
    Ok(())
}

fn create_item_tx(conn: &Connection, item: &PortfolioItem) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO portfolio_items
         (id, user_id, property_id, nickname, status, is_active, created_at, last_active_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            item.id,
            item.user_id,
            item.property_id,
            item.nickname,
            item.status.as_str(),
            item.is_active as i64,
            item.created_at,
            item.last_active_at,
        ],
    )?;
    Ok(())
}

fn set_status_tx(
    conn: &Connection,
    user_id: &str,
    item_id: &str,
    status: PortfolioStatus,
) -> Result<(), StoreError> {
    let changed = conn.execute(
        "UPDATE portfolio_items
         SET status = ?1, is_active = CASE WHEN ?1 = 'archived' THEN 0 ELSE is_active END
         WHERE id = ?2 AND user_id = ?3",
        params![status.as_str(), item_id, user_id],
    )?;
    if changed == 0 {
        return Err(StoreError::NotFound(format!("portfolio item {}", item_id)));
    }
    Ok(())
}

fn set_active_tx(conn: &Connection, user_id: &str, item_id: &str) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE portfolio_items SET is_active = 0 WHERE user_id = ?1",
        params![user_id],
    )?;
    let changed = conn.execute(
        "UPDATE portfolio_items SET is_active = 1, last_active_at = ?1
         WHERE id = ?2 AND user_id = ?3 AND status = 'saved'",
        params![now(), item_id, user_id],
    )?;
    if changed == 0 {
        return Err(StoreError::NotFound(format!("portfolio item {}", item_id)));
    }
    Ok(())
}

fn touch_item_tx(conn: &Connection, user_id: &str, item_id: &str) -> Result<(), StoreError> {
    let changed = conn.execute(
        "UPDATE portfolio_items SET last_active_at = ?1 WHERE id = ?2 AND user_id = ?3",
        params![now(), item_id, user_id],
    )?;
    if changed == 0 {
        return Err(StoreError::NotFound(format!("portfolio item {}", item_id)));
    }
    Ok(())
}

fn create_analysis_tx(conn: &Connection, record: &AnalysisRecord) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO analyses
         (id, user_id, property_id, kind, cost_min, cost_max, confidence, narrative, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            record.id,
            record.user_id,
            record.property_id,
            record.kind,
            record.cost_min,
            record.cost_max,
            record.confidence,
            record.narrative,
            record.created_at,
        ],
    )?;
    Ok(())
}

fn save_room_features_tx(
    conn: &Connection,
    analysis_id: &str,
    features: &[RoomFeature],
) -> Result<(), StoreError> {
    conn.execute(
        "DELETE FROM room_features WHERE analysis_id = ?1",
        params![analysis_id],
    )?;
    for f in features {
        let items = serde_json::to_string(&f.items)?;
        conn.execute(
            "INSERT INTO room_features
             (id, analysis_id, room_key, room_type, condition, items, cost_min, cost_max, confidence)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                f.id,
                analysis_id,
                f.room_key,
                f.room_type,
                f.condition,
                items,
                f.cost_min,
                f.cost_max,
                f.confidence,
            ],
        )?;
    }
    Ok(())
}

fn update_analysis_totals_tx(
    conn: &Connection,
    user_id: &str,
    analysis_id: &str,
    cost_min: i64,
    cost_max: i64,
    confidence: f64,
    narrative: &str,
) -> Result<(), StoreError> {
    let changed = conn.execute(
        "UPDATE analyses SET cost_min = ?1, cost_max = ?2, confidence = ?3, narrative = ?4
         WHERE id = ?5 AND user_id = ?6",
        params![cost_min, cost_max, confidence, narrative, analysis_id, user_id],
    )?;
    if changed == 0 {
        return Err(StoreError::NotFound(format!("analysis {}", analysis_id)));
    }
    Ok(())
}

fn upsert_profile_tx(
    conn: &Connection,
    user_id: &str,
    section: &str,
    patch: &serde_json::Value,
    section_summary: &str,
    master_summary: &str,
) -> Result<(), StoreError> {
    let existing: Option<(String, String)> = conn
        .query_row(
            "SELECT sections, section_summaries FROM profiles WHERE user_id = ?1",
            params![user_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    let (mut sections, mut summaries): (serde_json::Value, serde_json::Value) = match existing {
        Some((s, ss)) => (serde_json::from_str(&s)?, serde_json::from_str(&ss)?),
        None => (serde_json::json!({}), serde_json::json!({})),
    };

    let mut section_value = sections
        .get(section)
        .cloned()
        .unwrap_or(serde_json::json!({}));
    merge_section_patch(&mut section_value, patch);
    sections[section] = section_value;
    summaries[section] = serde_json::Value::String(section_summary.to_string());

    let ts = now();
    conn.execute(
        "INSERT INTO profiles
         (user_id, sections, section_summaries, master_summary, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?5)
         ON CONFLICT(user_id) DO UPDATE SET
            sections = excluded.sections,
            section_summaries = excluded.section_summaries,
            master_summary = excluded.master_summary,
            updated_at = excluded.updated_at",
        params![
            user_id,
            serde_json::to_string(&sections)?,
            serde_json::to_string(&summaries)?,
            master_summary,
            ts,
        ],
    )?;
    Ok(())
}

fn apply_effect_tx(conn: &Connection, user_id: &str, effect: &DurableEffect) -> Result<(), StoreError> {
    match effect {
        DurableEffect::UpsertProfile {
            section,
            patch,
            section_summary,
            master_summary,
        } => upsert_profile_tx(conn, user_id, section, patch, section_summary, master_summary),
        DurableEffect::UpsertProperty(record) => upsert_property_tx(conn, record),
        DurableEffect::CreatePortfolioItem(item) => create_item_tx(conn, item),
        DurableEffect::SetPortfolioStatus { item_id, status } => {
            set_status_tx(conn, user_id, item_id, *status)
        }
        DurableEffect::SetActive { item_id } => set_active_tx(conn, user_id, item_id),
        DurableEffect::TouchPortfolioItem { item_id } => touch_item_tx(conn, user_id, item_id),
        DurableEffect::CreateAnalysis(record) => create_analysis_tx(conn, record),
        DurableEffect::SaveRoomFeatures {
            analysis_id,
            features,
        } => save_room_features_tx(conn, analysis_id, features),
        DurableEffect::UpdateAnalysisTotals {
            analysis_id,
            cost_min,
            cost_max,
            confidence,
            narrative,
        } => update_analysis_totals_tx(
            conn,
            user_id,
            analysis_id,
            *cost_min,
            *cost_max,
            *confidence,
            narrative,
        ),
    }
}

#[async_trait]
impl AdvisorStore for SqliteStore {
    async fn get_profile(&self, user_id: &str) -> Result<Option<Profile>, StoreError> {
        let user_id = user_id.to_string();
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    "SELECT user_id, sections, section_summaries, master_summary, updated_at
                     FROM profiles WHERE user_id = ?1",
                    params![user_id],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                            row.get::<_, String>(4)?,
                        ))
                    },
                )
                .optional()?;
            match row {
                None => Ok(None),
                Some((user_id, sections, section_summaries, master_summary, updated_at)) => {
                    Ok(Some(Profile {
                        user_id,
                        sections: serde_json::from_str(&sections)?,
                        section_summaries: serde_json::from_str(&section_summaries)?,
                        master_summary,
                        updated_at,
                    }))
                }
            }
        })
        .await
    }

    async fn upsert_profile(
        &self,
        user_id: &str,
        section: &str,
        patch: serde_json::Value,
        section_summary: &str,
        master_summary: &str,
    ) -> Result<(), StoreError> {
        let (user_id, section) = (user_id.to_string(), section.to_string());
        let (section_summary, master_summary) =
            (section_summary.to_string(), master_summary.to_string());
        self.with_conn(move |conn| {
            upsert_profile_tx(
                conn,
                &user_id,
                &section,
                &patch,
                &section_summary,
                &master_summary,
            )
        })
        .await
    }

    async fn hydrate(&self, user_id: &str) -> Result<HydrationBundle, StoreError> {
        let user_id = user_id.to_string();
        self.with_conn(move |conn| {
            let profile = conn
                .query_row(
                    "SELECT user_id, sections, section_summaries, master_summary, updated_at
                     FROM profiles WHERE user_id = ?1",
                    params![user_id],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                            row.get::<_, String>(4)?,
                        ))
                    },
                )
                .optional()?
                .map(
                    |(user_id, sections, section_summaries, master_summary, updated_at)| {
                        Ok::<_, StoreError>(Profile {
                            user_id,
                            sections: serde_json::from_str(&sections)?,
                            section_summaries: serde_json::from_str(&section_summaries)?,
                            master_summary,
                            updated_at,
                        })
                    },
                )
                .transpose()?;

            let sql = format!(
                "SELECT {item_cols}, {prop_cols}, {analysis_cols}
                 FROM portfolio_items i
                 JOIN properties p ON p.id = i.property_id
                 LEFT JOIN analyses a ON a.id = (
                     SELECT a2.id FROM analyses a2
                     WHERE a2.user_id = i.user_id
                       AND a2.property_id = i.property_id
                       AND a2.kind = '{kind}'
                     ORDER BY a2.created_at DESC LIMIT 1
                 )
                 WHERE i.user_id = ?1 AND i.status = 'saved'
                 ORDER BY i.created_at",
                item_cols = ITEM_COLS
                    .split(", ")
                    .map(|c| format!("i.{}", c))
                    .collect::<Vec<_>>()
                    .join(", "),
                prop_cols = PROPERTY_COLS
                    .split(", ")
                    .map(|c| format!("p.{}", c))
                    .collect::<Vec<_>>()
                    .join(", "),
                analysis_cols = ANALYSIS_COLS
                    .split(", ")
                    .map(|c| format!("a.{}", c))
                    .collect::<Vec<_>>()
                    .join(", "),
                kind = ANALYSIS_KIND_RENOVATION,
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(params![user_id])?;
            let mut portfolio = Vec::new();
            while let Some(row) = rows.next()? {
                let item = row_to_item(row, 0)?;
                let property = row_to_property(row, 8)?;
                let analysis_id: Option<String> = row.get(18)?;
                let analysis = match analysis_id {
                    Some(_) => Some(row_to_analysis(row, 18)?),
                    None => None,
                };
                portfolio.push(PortfolioEntry {
                    item,
                    property,
                    analysis,
                });
            }

            let last_session_summary: Option<String> = conn
                .query_row(
                    "SELECT summary FROM conversations
                     WHERE user_id = ?1 AND summary IS NOT NULL
                     ORDER BY created_at DESC LIMIT 1",
                    params![user_id],
                    |row| row.get(0),
                )
                .optional()?;

            Ok(HydrationBundle {
                profile,
                portfolio,
                last_session_summary,
            })
        })
        .await
    }

    async fn get_property_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<PropertyRecord>, StoreError> {
        let external_id = external_id.to_string();
        self.with_conn(move |conn| {
            let sql = format!(
                "SELECT {} FROM properties WHERE external_id = ?1",
                PROPERTY_COLS
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(params![external_id])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_property(row, 0)?)),
                None => Ok(None),
            }
        })
        .await
    }

    async fn upsert_property(&self, record: &PropertyRecord) -> Result<(), StoreError> {
        let record = record.clone();
        self.with_conn(move |conn| upsert_property_tx(conn, &record)).await
    }

    async fn get_portfolio_item(
        &self,
        user_id: &str,
        item_id: &str,
    ) -> Result<Option<PortfolioItem>, StoreError> {
        let (user_id, item_id) = (user_id.to_string(), item_id.to_string());
        self.with_conn(move |conn| {
            let sql = format!(
                "SELECT {} FROM portfolio_items WHERE id = ?1 AND user_id = ?2",
                ITEM_COLS
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(params![item_id, user_id])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_item(row, 0)?)),
                None => Ok(None),
            }
        })
        .await
    }

    async fn create_portfolio_item(&self, item: &PortfolioItem) -> Result<(), StoreError> {
        let item = item.clone();
        self.with_conn(move |conn| create_item_tx(conn, &item)).await
    }

    async fn update_portfolio_status(
        &self,
        user_id: &str,
        item_id: &str,
        status: PortfolioStatus,
    ) -> Result<(), StoreError> {
        let (user_id, item_id) = (user_id.to_string(), item_id.to_string());
        self.with_conn(move |conn| set_status_tx(conn, &user_id, &item_id, status))
            .await
    }

    async fn set_active(&self, user_id: &str, item_id: &str) -> Result<(), StoreError> {
        let (user_id, item_id) = (user_id.to_string(), item_id.to_string());
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            set_active_tx(&tx, &user_id, &item_id)?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn get_latest_analysis(
        &self,
        user_id: &str,
        property_id: &str,
        kind: &str,
    ) -> Result<Option<AnalysisRecord>, StoreError> {
        let (user_id, property_id, kind) =
            (user_id.to_string(), property_id.to_string(), kind.to_string());
        self.with_conn(move |conn| {
            let sql = format!(
                "SELECT {} FROM analyses
                 WHERE user_id = ?1 AND property_id = ?2 AND kind = ?3
                 ORDER BY created_at DESC LIMIT 1",
                ANALYSIS_COLS
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(params![user_id, property_id, kind])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_analysis(row, 0)?)),
                None => Ok(None),
            }
        })
        .await
    }

    async fn create_analysis(&self, record: &AnalysisRecord) -> Result<(), StoreError> {
        let record = record.clone();
        self.with_conn(move |conn| create_analysis_tx(conn, &record)).await
    }

    async fn update_analysis(&self, record: &AnalysisRecord) -> Result<(), StoreError> {
        let record = record.clone();
        self.with_conn(move |conn| {
            update_analysis_totals_tx(
                conn,
                &record.user_id,
                &record.id,
                record.cost_min,
                record.cost_max,
                record.confidence,
                &record.narrative,
            )
        })
        .await
    }

    async fn get_room_features(&self, analysis_id: &str) -> Result<Vec<RoomFeature>, StoreError> {
        let analysis_id = analysis_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, analysis_id, room_key, room_type, condition, items,
                        cost_min, cost_max, confidence
                 FROM room_features WHERE analysis_id = ?1 ORDER BY room_key",
            )?;
            let mut rows = stmt.query(params![analysis_id])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                let items: String = row.get(5)?;
                out.push(RoomFeature {
                    id: row.get(0)?,
                    analysis_id: row.get(1)?,
                    room_key: row.get(2)?,
                    room_type: row.get(3)?,
                    condition: row.get(4)?,
                    items: serde_json::from_str(&items)?,
                    cost_min: row.get(6)?,
                    cost_max: row.get(7)?,
                    confidence: row.get(8)?,
                });
            }
            Ok(out)
        })
        .await
    }

    async fn save_room_features(
        &self,
        analysis_id: &str,
        features: &[RoomFeature],
    ) -> Result<(), StoreError> {
        let analysis_id = analysis_id.to_string();
        let features = features.to_vec();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            save_room_features_tx(&tx, &analysis_id, &features)?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn create_conversation(&self, user_id: &str) -> Result<Conversation, StoreError> {
        let user_id = user_id.to_string();
        self.with_conn(move |conn| {
            let id = Uuid::new_v4().to_string();
            let ts = now();
            conn.execute(
                "INSERT INTO conversations (id, user_id, message_count, created_at)
                 VALUES (?1, ?2, 0, ?3)",
                params![id, user_id, ts],
            )?;
            Ok(Conversation {
                id,
                user_id,
                message_count: 0,
                summary: None,
                created_at: ts,
                ended_at: None,
            })
        })
        .await
    }

    async fn get_conversation(
        &self,
        user_id: &str,
        conversation_id: &str,
    ) -> Result<Option<Conversation>, StoreError> {
        let (user_id, conversation_id) = (user_id.to_string(), conversation_id.to_string());
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    "SELECT id, user_id, message_count, summary, created_at, ended_at
                     FROM conversations WHERE id = ?1 AND user_id = ?2",
                    params![conversation_id, user_id],
                    |row| {
                        Ok(Conversation {
                            id: row.get(0)?,
                            user_id: row.get(1)?,
                            message_count: row.get(2)?,
                            summary: row.get(3)?,
                            created_at: row.get(4)?,
                            ended_at: row.get(5)?,
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
        .await
    }

    async fn end_conversation(
        &self,
        conversation_id: &str,
        summary: &str,
    ) -> Result<(), StoreError> {
        let (conversation_id, summary) = (conversation_id.to_string(), summary.to_string());
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE conversations SET summary = ?1, ended_at = ?2 WHERE id = ?3",
                params![summary, now(), conversation_id],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!(
                    "conversation {}",
                    conversation_id
                )));
            }
            Ok(())
        })
        .await
    }

    async fn increment_message_count(
        &self,
        conversation_id: &str,
        by: i64,
    ) -> Result<(), StoreError> {
        let conversation_id = conversation_id.to_string();
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE conversations SET message_count = message_count + ?1 WHERE id = ?2",
                params![by, conversation_id],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!(
                    "conversation {}",
                    conversation_id
                )));
            }
            Ok(())
        })
        .await
    }

    async fn append_message(
        &self,
        conversation_id: &str,
        role: &str,
        content: &str,
        tool_calls: Option<String>,
        tool_call_id: Option<String>,
    ) -> Result<String, StoreError> {
        let (conversation_id, role, content) = (
            conversation_id.to_string(),
            role.to_string(),
            content.to_string(),
        );
        self.with_conn(move |conn| {
            let id = Uuid::new_v4().to_string();
            conn.execute(
                "INSERT INTO messages
                 (id, conversation_id, role, content, tool_calls, tool_call_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![id, conversation_id, role, content, tool_calls, tool_call_id, now()],
            )?;
            Ok(id)
        })
        .await
    }

    async fn list_messages(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<StoredMessage>, StoreError> {
        let conversation_id = conversation_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, conversation_id, role, content, tool_calls, tool_call_id, created_at
                 FROM messages WHERE conversation_id = ?1
                 ORDER BY created_at, rowid",
            )?;
            let mut rows = stmt.query(params![conversation_id])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(StoredMessage {
                    id: row.get(0)?,
                    conversation_id: row.get(1)?,
                    role: row.get(2)?,
                    content: row.get(3)?,
                    tool_calls: row.get(4)?,
                    tool_call_id: row.get(5)?,
                    created_at: row.get(6)?,
                });
            }
            Ok(out)
        })
        .await
    }

    async fn log_action(&self, entry: &ActionLogEntry) -> Result<(), StoreError> {
        let entry = entry.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO action_log
                 (id, user_id, conversation_id, message_id, action_type, entity_type, entity_id,
                  field_changed, old_value, new_value, trigger_message, confidence,
                  confirmed_by_user, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                params![
                    entry.id,
                    entry.user_id,
                    entry.conversation_id,
                    entry.message_id,
                    entry.action_type,
                    entry.entity_type,
                    entry.entity_id,
                    entry.field_changed,
                    entry.old_value,
                    entry.new_value,
                    entry.trigger_message,
                    entry.confidence,
                    entry.confirmed_by_user as i64,
                    entry.timestamp,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn list_actions(
        &self,
        user_id: &str,
        conversation_id: &str,
    ) -> Result<Vec<ActionLogEntry>, StoreError> {
        let (user_id, conversation_id) = (user_id.to_string(), conversation_id.to_string());
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, conversation_id, message_id, action_type, entity_type,
                        entity_id, field_changed, old_value, new_value, trigger_message,
                        confidence, confirmed_by_user, timestamp
                 FROM action_log WHERE user_id = ?1 AND conversation_id = ?2
                 ORDER BY timestamp, rowid",
            )?;
            let mut rows = stmt.query(params![user_id, conversation_id])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(ActionLogEntry {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    conversation_id: row.get(2)?,
                    message_id: row.get(3)?,
                    action_type: row.get(4)?,
                    entity_type: row.get(5)?,
                    entity_id: row.get(6)?,
                    field_changed: row.get(7)?,
                    old_value: row.get(8)?,
                    new_value: row.get(9)?,
                    trigger_message: row.get(10)?,
                    confidence: row.get(11)?,
                    confirmed_by_user: row.get::<_, i64>(12)? != 0,
                    timestamp: row.get(13)?,
                });
            }
            Ok(out)
        })
        .await
    }

    async fn apply_effects(
        &self,
        user_id: &str,
        effects: &[DurableEffect],
    ) -> Result<(), StoreError> {
        let user_id = user_id.to_string();
        let effects = effects.to_vec();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            for effect in &effects {
                apply_effect_tx(&tx, &user_id, effect)?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }
}
