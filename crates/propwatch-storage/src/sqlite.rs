use crate::error::{Result, StorageError};
use crate::{DeliveryLogStore, InstanceStore, RuleStore, TemplateStore};
use chrono::{DateTime, NaiveDate, Utc};
use propwatch_common::types::{
    AlertInstance, AlertRule, ChannelType, DateRange, DeliveryLog, DeliveryStatistic,
    InstanceFilter, MessageTemplate, StatCounter, Thresholds,
};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS alert_rules (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    description TEXT,
    metric_type TEXT NOT NULL,
    target_ids TEXT NOT NULL,
    red_min REAL,
    red_max REAL,
    yellow_min REAL,
    yellow_max REAL,
    green_min REAL,
    green_max REAL,
    frequency TEXT NOT NULL,
    channels TEXT NOT NULL,
    active INTEGER NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS alert_instances (
    id TEXT PRIMARY KEY,
    rule_id TEXT NOT NULL,
    target_id TEXT NOT NULL,
    level TEXT NOT NULL,
    message TEXT NOT NULL,
    status TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    acknowledged_at INTEGER,
    acknowledged_by TEXT,
    resolved_at INTEGER,
    resolved_by TEXT
);
CREATE INDEX IF NOT EXISTS idx_instances_rule_target
    ON alert_instances(rule_id, target_id, status);
CREATE INDEX IF NOT EXISTS idx_instances_created ON alert_instances(created_at);

CREATE TABLE IF NOT EXISTS message_templates (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    channel_type TEXT NOT NULL,
    subject TEXT,
    body TEXT NOT NULL,
    variables TEXT NOT NULL DEFAULT '[]',
    active INTEGER NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS delivery_logs (
    id TEXT PRIMARY KEY,
    template_id TEXT NOT NULL,
    recipient TEXT NOT NULL,
    channel TEXT NOT NULL,
    status TEXT NOT NULL,
    retry_count INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    provider_message_id TEXT,
    is_test INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_delivery_logs_created ON delivery_logs(created_at);

CREATE TABLE IF NOT EXISTS delivery_statistics (
    date TEXT NOT NULL,
    channel TEXT NOT NULL,
    total_sent INTEGER NOT NULL DEFAULT 0,
    total_delivered INTEGER NOT NULL DEFAULT 0,
    total_failed INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (date, channel)
);

CREATE TABLE IF NOT EXISTS delivery_stat_marks (
    log_id TEXT NOT NULL,
    counter TEXT NOT NULL,
    PRIMARY KEY (log_id, counter)
);
";

const RULE_COLUMNS: &str = "id, name, description, metric_type, target_ids, red_min, red_max, \
     yellow_min, yellow_max, green_min, green_max, frequency, channels, active, created_at, updated_at";

const INSTANCE_COLUMNS: &str = "id, rule_id, target_id, level, message, status, created_at, \
     updated_at, acknowledged_at, acknowledged_by, resolved_at, resolved_by";

const TEMPLATE_COLUMNS: &str =
    "id, name, channel_type, subject, body, variables, active, created_at, updated_at";

const LOG_COLUMNS: &str = "id, template_id, recipient, channel, status, retry_count, last_error, \
     provider_message_id, is_test, created_at, updated_at";

const DATE_FORMAT: &str = "%Y-%m-%d";

/// All record families in one SQLite database (WAL mode).
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens (creating if needed) the database file at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StorageError::Other(format!("create {}: {e}", parent.display())))?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        let store = Self::init(conn)?;
        tracing::info!(path = %path.display(), "Opened SQLite store");
        Ok(store)
    }

    /// Private in-memory database, mostly for tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Lock the connection, recovering from a poisoned Mutex if necessary.
    fn lock_conn(&self) -> MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// ---- column helpers ----

fn conversion_error(idx: usize, ty: Type, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, ty, msg.into())
}

fn parse_col<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = String>,
{
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e| conversion_error(idx, Type::Text, e))
}

fn json_col<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| conversion_error(idx, Type::Text, e.to_string()))
}

fn ts_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let ms: i64 = row.get(idx)?;
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| conversion_error(idx, Type::Integer, format!("timestamp out of range: {ms}")))
}

fn opt_ts_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let ms: Option<i64> = row.get(idx)?;
    match ms {
        Some(ms) => DateTime::from_timestamp_millis(ms)
            .map(Some)
            .ok_or_else(|| conversion_error(idx, Type::Integer, format!("timestamp out of range: {ms}"))),
        None => Ok(None),
    }
}

fn date_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<NaiveDate> {
    let raw: String = row.get(idx)?;
    NaiveDate::parse_from_str(&raw, DATE_FORMAT)
        .map_err(|e| conversion_error(idx, Type::Text, e.to_string()))
}

fn row_to_rule(row: &Row<'_>) -> rusqlite::Result<AlertRule> {
    Ok(AlertRule {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        metric_type: parse_col(row, 3)?,
        target_ids: json_col(row, 4)?,
        thresholds: Thresholds {
            red_min: row.get(5)?,
            red_max: row.get(6)?,
            yellow_min: row.get(7)?,
            yellow_max: row.get(8)?,
            green_min: row.get(9)?,
            green_max: row.get(10)?,
        },
        frequency: parse_col(row, 11)?,
        channels: json_col(row, 12)?,
        active: row.get(13)?,
        created_at: ts_col(row, 14)?,
        updated_at: ts_col(row, 15)?,
    })
}

fn row_to_instance(row: &Row<'_>) -> rusqlite::Result<AlertInstance> {
    Ok(AlertInstance {
        id: row.get(0)?,
        rule_id: row.get(1)?,
        target_id: row.get(2)?,
        level: parse_col(row, 3)?,
        message: row.get(4)?,
        status: parse_col(row, 5)?,
        created_at: ts_col(row, 6)?,
        updated_at: ts_col(row, 7)?,
        acknowledged_at: opt_ts_col(row, 8)?,
        acknowledged_by: row.get(9)?,
        resolved_at: opt_ts_col(row, 10)?,
        resolved_by: row.get(11)?,
    })
}

fn row_to_template(row: &Row<'_>) -> rusqlite::Result<MessageTemplate> {
    Ok(MessageTemplate {
        id: row.get(0)?,
        name: row.get(1)?,
        channel_type: parse_col(row, 2)?,
        subject: row.get(3)?,
        body: row.get(4)?,
        variables: json_col(row, 5)?,
        active: row.get(6)?,
        created_at: ts_col(row, 7)?,
        updated_at: ts_col(row, 8)?,
    })
}

fn row_to_log(row: &Row<'_>) -> rusqlite::Result<DeliveryLog> {
    Ok(DeliveryLog {
        id: row.get(0)?,
        template_id: row.get(1)?,
        recipient: row.get(2)?,
        channel: parse_col(row, 3)?,
        status: parse_col(row, 4)?,
        retry_count: row.get(5)?,
        last_error: row.get(6)?,
        provider_message_id: row.get(7)?,
        is_test: row.get(8)?,
        created_at: ts_col(row, 9)?,
        updated_at: ts_col(row, 10)?,
    })
}

fn row_to_statistic(row: &Row<'_>) -> rusqlite::Result<DeliveryStatistic> {
    Ok(DeliveryStatistic {
        date: date_col(row, 0)?,
        channel: parse_col(row, 1)?,
        total_sent: row.get(2)?,
        total_delivered: row.get(3)?,
        total_failed: row.get(4)?,
    })
}

// ---- RuleStore ----

impl RuleStore for SqliteStore {
    fn upsert_rule(&self, rule: &AlertRule) -> Result<()> {
        let target_ids = serde_json::to_string(&rule.target_ids)?;
        let channels = serde_json::to_string(&rule.channels)?;
        let t = &rule.thresholds;
        self.lock_conn().execute(
            &format!(
                "INSERT OR REPLACE INTO alert_rules ({RULE_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)"
            ),
            params![
                &rule.id,
                &rule.name,
                &rule.description,
                rule.metric_type.as_str(),
                target_ids,
                t.red_min,
                t.red_max,
                t.yellow_min,
                t.yellow_max,
                t.green_min,
                t.green_max,
                rule.frequency.as_str(),
                channels,
                rule.active,
                rule.created_at.timestamp_millis(),
                rule.updated_at.timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    fn get_rule(&self, id: &str) -> Result<Option<AlertRule>> {
        let conn = self.lock_conn();
        let rule = conn
            .query_row(
                &format!("SELECT {RULE_COLUMNS} FROM alert_rules WHERE id = ?1"),
                params![id],
                row_to_rule,
            )
            .optional()?;
        Ok(rule)
    }

    fn list_rules(&self) -> Result<Vec<AlertRule>> {
        let conn = self.lock_conn();
        let mut stmt =
            conn.prepare_cached(&format!("SELECT {RULE_COLUMNS} FROM alert_rules ORDER BY name, id"))?;
        let rows = stmt.query_map([], row_to_rule)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn delete_rule(&self, id: &str) -> Result<bool> {
        let n = self
            .lock_conn()
            .execute("DELETE FROM alert_rules WHERE id = ?1", params![id])?;
        Ok(n > 0)
    }

    fn list_active_rules(&self) -> Result<Vec<AlertRule>> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {RULE_COLUMNS} FROM alert_rules WHERE active = 1 ORDER BY name, id"
        ))?;
        let rows = stmt.query_map([], row_to_rule)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

// ---- InstanceStore ----

impl InstanceStore for SqliteStore {
    fn insert_instance(&self, instance: &AlertInstance) -> Result<()> {
        self.lock_conn().execute(
            &format!(
                "INSERT INTO alert_instances ({INSTANCE_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
            ),
            params![
                &instance.id,
                &instance.rule_id,
                &instance.target_id,
                instance.level.as_str(),
                &instance.message,
                instance.status.as_str(),
                instance.created_at.timestamp_millis(),
                instance.updated_at.timestamp_millis(),
                instance.acknowledged_at.map(|t| t.timestamp_millis()),
                &instance.acknowledged_by,
                instance.resolved_at.map(|t| t.timestamp_millis()),
                &instance.resolved_by,
            ],
        )?;
        Ok(())
    }

    fn update_instance(&self, instance: &AlertInstance) -> Result<()> {
        let n = self.lock_conn().execute(
            "UPDATE alert_instances SET level = ?2, message = ?3, status = ?4, updated_at = ?5,
                 acknowledged_at = ?6, acknowledged_by = ?7, resolved_at = ?8, resolved_by = ?9
             WHERE id = ?1",
            params![
                &instance.id,
                instance.level.as_str(),
                &instance.message,
                instance.status.as_str(),
                instance.updated_at.timestamp_millis(),
                instance.acknowledged_at.map(|t| t.timestamp_millis()),
                &instance.acknowledged_by,
                instance.resolved_at.map(|t| t.timestamp_millis()),
                &instance.resolved_by,
            ],
        )?;
        if n == 0 {
            return Err(StorageError::NotFound {
                entity: "alert_instance",
                id: instance.id.clone(),
            });
        }
        Ok(())
    }

    fn get_instance(&self, id: &str) -> Result<Option<AlertInstance>> {
        let conn = self.lock_conn();
        let instance = conn
            .query_row(
                &format!("SELECT {INSTANCE_COLUMNS} FROM alert_instances WHERE id = ?1"),
                params![id],
                row_to_instance,
            )
            .optional()?;
        Ok(instance)
    }

    fn find_open_instance(&self, rule_id: &str, target_id: &str) -> Result<Option<AlertInstance>> {
        let conn = self.lock_conn();
        let instance = conn
            .query_row(
                &format!(
                    "SELECT {INSTANCE_COLUMNS} FROM alert_instances
                     WHERE rule_id = ?1 AND target_id = ?2 AND status IN ('active', 'acknowledged')
                     ORDER BY created_at DESC LIMIT 1"
                ),
                params![rule_id, target_id],
                row_to_instance,
            )
            .optional()?;
        Ok(instance)
    }

    fn list_instances(&self, filter: &InstanceFilter) -> Result<Vec<AlertInstance>> {
        let mut sql = format!("SELECT {INSTANCE_COLUMNS} FROM alert_instances WHERE 1 = 1");
        let mut args: Vec<String> = Vec::new();

        if let Some(status) = filter.status {
            args.push(status.as_str().to_string());
            sql.push_str(&format!(" AND status = ?{}", args.len()));
        }
        if let Some(target_id) = &filter.target_id {
            args.push(target_id.clone());
            sql.push_str(&format!(" AND target_id = ?{}", args.len()));
        }
        if let Some(rule_id) = &filter.rule_id {
            args.push(rule_id.clone());
            sql.push_str(&format!(" AND rule_id = ?{}", args.len()));
        }
        sql.push_str(" ORDER BY created_at DESC, id DESC");

        let conn = self.lock_conn();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(args.iter()), row_to_instance)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

// ---- TemplateStore ----

impl TemplateStore for SqliteStore {
    fn upsert_template(&self, template: &MessageTemplate) -> Result<()> {
        let variables = serde_json::to_string(&template.variables)?;
        self.lock_conn().execute(
            &format!(
                "INSERT OR REPLACE INTO message_templates ({TEMPLATE_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
            ),
            params![
                &template.id,
                &template.name,
                template.channel_type.as_str(),
                &template.subject,
                &template.body,
                variables,
                template.active,
                template.created_at.timestamp_millis(),
                template.updated_at.timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    fn get_template(&self, id: &str) -> Result<Option<MessageTemplate>> {
        let conn = self.lock_conn();
        let template = conn
            .query_row(
                &format!("SELECT {TEMPLATE_COLUMNS} FROM message_templates WHERE id = ?1"),
                params![id],
                row_to_template,
            )
            .optional()?;
        Ok(template)
    }

    fn list_templates(&self, channel: Option<ChannelType>) -> Result<Vec<MessageTemplate>> {
        let conn = self.lock_conn();
        let items = match channel {
            Some(channel) => {
                let mut stmt = conn.prepare_cached(&format!(
                    "SELECT {TEMPLATE_COLUMNS} FROM message_templates
                     WHERE channel_type = ?1 ORDER BY name, id"
                ))?;
                let rows = stmt.query_map(params![channel.as_str()], row_to_template)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
            None => {
                let mut stmt = conn.prepare_cached(&format!(
                    "SELECT {TEMPLATE_COLUMNS} FROM message_templates ORDER BY name, id"
                ))?;
                let rows = stmt.query_map([], row_to_template)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
        };
        Ok(items)
    }

    fn delete_template(&self, id: &str) -> Result<bool> {
        let n = self
            .lock_conn()
            .execute("DELETE FROM message_templates WHERE id = ?1", params![id])?;
        Ok(n > 0)
    }
}

// ---- DeliveryLogStore ----

impl DeliveryLogStore for SqliteStore {
    fn insert_log(&self, log: &DeliveryLog) -> Result<()> {
        self.lock_conn().execute(
            &format!(
                "INSERT INTO delivery_logs ({LOG_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
            ),
            params![
                &log.id,
                &log.template_id,
                &log.recipient,
                log.channel.as_str(),
                log.status.as_str(),
                log.retry_count,
                &log.last_error,
                &log.provider_message_id,
                log.is_test,
                log.created_at.timestamp_millis(),
                log.updated_at.timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    fn update_log(&self, log: &DeliveryLog) -> Result<()> {
        let n = self.lock_conn().execute(
            "UPDATE delivery_logs SET status = ?2, retry_count = ?3, last_error = ?4,
                 provider_message_id = ?5, updated_at = ?6
             WHERE id = ?1",
            params![
                &log.id,
                log.status.as_str(),
                log.retry_count,
                &log.last_error,
                &log.provider_message_id,
                log.updated_at.timestamp_millis(),
            ],
        )?;
        if n == 0 {
            return Err(StorageError::NotFound {
                entity: "delivery_log",
                id: log.id.clone(),
            });
        }
        Ok(())
    }

    fn get_log(&self, id: &str) -> Result<Option<DeliveryLog>> {
        let conn = self.lock_conn();
        let log = conn
            .query_row(
                &format!("SELECT {LOG_COLUMNS} FROM delivery_logs WHERE id = ?1"),
                params![id],
                row_to_log,
            )
            .optional()?;
        Ok(log)
    }

    fn list_logs(&self, limit: usize) -> Result<Vec<DeliveryLog>> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {LOG_COLUMNS} FROM delivery_logs ORDER BY created_at DESC, id DESC LIMIT ?1"
        ))?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt.query_map(params![limit], row_to_log)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn apply_stat(
        &self,
        log_id: &str,
        date: NaiveDate,
        channel: ChannelType,
        counter: StatCounter,
    ) -> Result<bool> {
        let column = match counter {
            StatCounter::Sent => "total_sent",
            StatCounter::Delivered => "total_delivered",
            StatCounter::Failed => "total_failed",
        };
        let date = date.format(DATE_FORMAT).to_string();

        let conn = self.lock_conn();
        let tx = conn.unchecked_transaction()?;
        let marked = tx.execute(
            "INSERT OR IGNORE INTO delivery_stat_marks (log_id, counter) VALUES (?1, ?2)",
            params![log_id, counter.as_str()],
        )?;
        if marked == 0 {
            return Ok(false);
        }
        tx.execute(
            "INSERT OR IGNORE INTO delivery_statistics (date, channel) VALUES (?1, ?2)",
            params![&date, channel.as_str()],
        )?;
        tx.execute(
            &format!("UPDATE delivery_statistics SET {column} = {column} + 1 WHERE date = ?1 AND channel = ?2"),
            params![&date, channel.as_str()],
        )?;
        tx.commit()?;
        Ok(true)
    }

    fn query_statistics(
        &self,
        range: &DateRange,
        channel: Option<ChannelType>,
    ) -> Result<Vec<DeliveryStatistic>> {
        let from = range.from.format(DATE_FORMAT).to_string();
        let to = range.to.format(DATE_FORMAT).to_string();
        let conn = self.lock_conn();
        let items = match channel {
            Some(channel) => {
                let mut stmt = conn.prepare_cached(
                    "SELECT date, channel, total_sent, total_delivered, total_failed
                     FROM delivery_statistics WHERE date >= ?1 AND date <= ?2 AND channel = ?3
                     ORDER BY date, channel",
                )?;
                let rows = stmt.query_map(params![from, to, channel.as_str()], row_to_statistic)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
            None => {
                let mut stmt = conn.prepare_cached(
                    "SELECT date, channel, total_sent, total_delivered, total_failed
                     FROM delivery_statistics WHERE date >= ?1 AND date <= ?2
                     ORDER BY date, channel",
                )?;
                let rows = stmt.query_map(params![from, to], row_to_statistic)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
        };
        Ok(items)
    }
}
