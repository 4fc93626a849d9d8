//! sqlite backend (rusqlite behind an async mutex).

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use rusqlite::{params, Connection};
use tokio::sync::Mutex;

use crate::repo::{
    dedupe_by_distinct_key, DeleteFilter, MetricSample, MoveDirection, RepoError, ServerFilter,
    Statistics,
};
use crate::server::Server;

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS servers (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    position INT NOT NULL,
    guild_id BIGINT NOT NULL,
    channel_id BIGINT NOT NULL,
    message_id BIGINT,
    game_id TEXT NOT NULL,
    address TEXT NOT NULL,
    query_port INT NOT NULL,
    query_extra TEXT NOT NULL,
    status INT NOT NULL,
    result TEXT NOT NULL,
    style_id TEXT NOT NULL,
    style_data TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS metrics (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    game_id TEXT NOT NULL,
    address TEXT NOT NULL,
    query_port INT NOT NULL,
    query_extra TEXT NOT NULL,
    status INT NOT NULL,
    numplayers BIGINT NOT NULL,
    numbots BIGINT NOT NULL,
    maxplayers BIGINT NOT NULL,
    captured_at BIGINT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_metrics_endpoint
    ON metrics (game_id, address, query_port, query_extra);
";

const SERVER_COLUMNS: &str = "id, position, guild_id, channel_id, message_id, game_id, address, \
                              query_port, query_extra, status, result, style_id, style_data";

pub struct SqliteRepo {
    conn: Arc<Mutex<Connection>>,
    metrics_limit: usize,
}

/// Raw row shape; JSON columns decode outside the rusqlite closure so parse
/// failures surface as [`RepoError::Serde`].
struct RawServerRow {
    id: i64,
    position: i32,
    guild_id: i64,
    channel_id: i64,
    message_id: Option<i64>,
    game_id: String,
    address: String,
    query_port: i64,
    query_extra: String,
    status: bool,
    result: String,
    style_id: String,
    style_data: String,
}

impl RawServerRow {
    fn from_row(row: &rusqlite::Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(RawServerRow {
            id: row.get(0)?,
            position: row.get(1)?,
            guild_id: row.get(2)?,
            channel_id: row.get(3)?,
            message_id: row.get(4)?,
            game_id: row.get(5)?,
            address: row.get(6)?,
            query_port: row.get(7)?,
            query_extra: row.get(8)?,
            status: row.get::<_, i64>(9)? != 0,
            result: row.get(10)?,
            style_id: row.get(11)?,
            style_data: row.get(12)?,
        })
    }

    fn into_server(self) -> Result<Server, RepoError> {
        Ok(Server {
            id: self.id,
            position: self.position,
            guild_id: self.guild_id,
            channel_id: self.channel_id,
            message_id: self.message_id,
            game_id: self.game_id,
            address: self.address,
            query_port: u16::try_from(self.query_port).unwrap_or(0),
            query_extra: serde_json::from_str(&self.query_extra)?,
            status: self.status,
            result: serde_json::from_str(&self.result)?,
            style_id: self.style_id,
            style_data: serde_json::from_str(&self.style_data)?,
        })
    }
}

fn stringify<T: serde::Serialize>(value: &T) -> Result<String, RepoError> {
    Ok(serde_json::to_string(value)?)
}

impl SqliteRepo {
    pub fn open(path: &Path, metrics_limit: usize) -> Result<Self, RepoError> {
        Self::from_connection(Connection::open(path)?, metrics_limit)
    }

    pub fn open_in_memory(metrics_limit: usize) -> Result<Self, RepoError> {
        Self::from_connection(Connection::open_in_memory()?, metrics_limit)
    }

    fn from_connection(conn: Connection, metrics_limit: usize) -> Result<Self, RepoError> {
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(SqliteRepo {
            conn: Arc::new(Mutex::new(conn)),
            metrics_limit,
        })
    }

    pub async fn all_servers(&self, filter: &ServerFilter) -> Result<Vec<Server>, RepoError> {
        let conn = self.conn.lock().await;
        let (sql, param): (String, Option<rusqlite::types::Value>) =
            if let Some(channel_id) = filter.channel_id {
                (
                    format!("SELECT {SERVER_COLUMNS} FROM servers WHERE channel_id = ?1 ORDER BY position"),
                    Some(channel_id.into()),
                )
            } else if let Some(guild_id) = filter.guild_id {
                (
                    format!("SELECT {SERVER_COLUMNS} FROM servers WHERE guild_id = ?1 ORDER BY position"),
                    Some(guild_id.into()),
                )
            } else if let Some(message_id) = filter.message_id {
                (
                    format!("SELECT {SERVER_COLUMNS} FROM servers WHERE message_id = ?1 ORDER BY position"),
                    Some(message_id.into()),
                )
            } else if let Some(game_id) = &filter.game_id {
                (
                    format!("SELECT {SERVER_COLUMNS} FROM servers WHERE game_id = ?1 ORDER BY id"),
                    Some(game_id.clone().into()),
                )
            } else {
                (
                    format!("SELECT {SERVER_COLUMNS} FROM servers ORDER BY position"),
                    None,
                )
            };

        let mut stmt = conn.prepare(&sql)?;
        let raws: Vec<RawServerRow> = match param {
            Some(value) => stmt
                .query_map(params![value], RawServerRow::from_row)?
                .collect::<Result<_, _>>()?,
            None => stmt
                .query_map([], RawServerRow::from_row)?
                .collect::<Result<_, _>>()?,
        };
        raws.into_iter().map(RawServerRow::into_server).collect()
    }

    pub async fn distinct_servers(&self) -> Result<Vec<Server>, RepoError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT game_id, address, query_port, query_extra, status, result \
             FROM servers",
        )?;
        let raws: Vec<(String, String, i64, String, bool, String)> = stmt
            .query_map([], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get::<_, i64>(4)? != 0,
                    row.get(5)?,
                ))
            })?
            .collect::<Result<_, _>>()?;

        raws.into_iter()
            .map(|(game_id, address, query_port, query_extra, status, result)| {
                Ok(Server {
                    id: 0,
                    position: 0,
                    guild_id: 0,
                    channel_id: 0,
                    message_id: None,
                    game_id,
                    address,
                    query_port: u16::try_from(query_port).unwrap_or(0),
                    query_extra: serde_json::from_str(&query_extra)?,
                    status,
                    result: serde_json::from_str(&result)?,
                    style_id: String::new(),
                    style_data: BTreeMap::new(),
                })
            })
            .collect()
    }

    pub async fn count_per_game(&self) -> Result<BTreeMap<String, i64>, RepoError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("SELECT game_id, COUNT(*) FROM servers GROUP BY game_id")?;
        let counts = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<BTreeMap<String, i64>, _>>()?;
        Ok(counts)
    }

    pub async fn count_per_channel(&self) -> Result<BTreeMap<i64, i64>, RepoError> {
        let conn = self.conn.lock().await;
        let mut stmt =
            conn.prepare("SELECT channel_id, COUNT(*) FROM servers GROUP BY channel_id")?;
        let counts = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<BTreeMap<i64, i64>, _>>()?;
        Ok(counts)
    }

    pub async fn statistics(&self) -> Result<Statistics, RepoError> {
        let conn = self.conn.lock().await;
        let stats = conn.query_row(
            "SELECT \
                (SELECT COUNT(DISTINCT message_id) FROM servers), \
                (SELECT COUNT(DISTINCT channel_id) FROM servers), \
                (SELECT COUNT(DISTINCT guild_id) FROM servers), \
                (SELECT COUNT(*) FROM \
                    (SELECT DISTINCT game_id, address, query_port, query_extra FROM servers))",
            [],
            |row| {
                Ok(Statistics {
                    messages: row.get(0)?,
                    channels: row.get(1)?,
                    guilds: row.get(2)?,
                    unique_servers: row.get(3)?,
                })
            },
        )?;
        Ok(stats)
    }

    pub async fn find_server(
        &self,
        channel_id: i64,
        address: &str,
        query_port: u16,
    ) -> Result<Server, RepoError> {
        let conn = self.conn.lock().await;
        find_server_locked(&conn, channel_id, address, query_port)
    }

    pub async fn add_server(&self, server: &Server) -> Result<Server, RepoError> {
        let conn = self.conn.lock().await;

        use rusqlite::OptionalExtension;
        let exists = conn
            .query_row(
                "SELECT 1 FROM servers WHERE channel_id = ?1 AND address = ?2 AND query_port = ?3",
                params![server.channel_id, server.address, i64::from(server.query_port)],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        if exists {
            return Err(RepoError::Conflict(format!(
                "{}:{} already monitored in channel {}",
                server.address, server.query_port, server.channel_id
            )));
        }

        conn.execute(
            "INSERT INTO servers \
                (position, guild_id, channel_id, message_id, game_id, address, query_port, \
                 query_extra, status, result, style_id, style_data) \
             VALUES ((SELECT IFNULL(MAX(position + 1), 0) FROM servers WHERE channel_id = ?1), \
                     ?2, ?1, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                server.channel_id,
                server.guild_id,
                server.message_id,
                server.game_id,
                server.address,
                i64::from(server.query_port),
                stringify(&server.query_extra)?,
                i64::from(server.status),
                stringify(&server.result)?,
                server.style_id,
                stringify(&server.style_data)?,
            ],
        )?;

        find_server_locked(&conn, server.channel_id, &server.address, server.query_port)
    }

    pub async fn update_servers(&self, servers: &[Server]) -> Result<(), RepoError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "UPDATE servers SET status = ?1, result = ?2 \
             WHERE game_id = ?3 AND address = ?4 AND query_port = ?5 AND query_extra = ?6",
        )?;
        for server in dedupe_by_distinct_key(servers) {
            stmt.execute(params![
                i64::from(server.status),
                stringify(&server.result)?,
                server.game_id,
                server.address,
                i64::from(server.query_port),
                stringify(&server.query_extra)?,
            ])?;
        }
        Ok(())
    }

    pub async fn update_servers_message_id(&self, servers: &[Server]) -> Result<(), RepoError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("UPDATE servers SET message_id = ?1 WHERE id = ?2")?;
        for server in servers {
            stmt.execute(params![server.message_id, server.id])?;
        }
        Ok(())
    }

    pub async fn update_servers_style_data(&self, servers: &[Server]) -> Result<(), RepoError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("UPDATE servers SET style_data = ?1 WHERE id = ?2")?;
        for server in servers {
            stmt.execute(params![stringify(&server.style_data)?, server.id])?;
        }
        Ok(())
    }

    pub async fn update_server_style_id(&self, server: &Server) -> Result<(), RepoError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE servers SET style_id = ?1 WHERE id = ?2",
            params![server.style_id, server.id],
        )?;
        Ok(())
    }

    pub async fn move_server(
        &self,
        server: &Server,
        direction: MoveDirection,
    ) -> Result<Vec<Server>, RepoError> {
        let channel = self
            .all_servers(&ServerFilter::channel(server.channel_id))
            .await?;
        let Some((moving, other)) = super::pick_swap_pair(&channel, server.id, direction) else {
            return Ok(Vec::new());
        };

        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE servers SET \
                position = CASE id WHEN ?1 THEN ?3 WHEN ?2 THEN ?4 END, \
                message_id = CASE id WHEN ?1 THEN ?5 WHEN ?2 THEN ?6 END \
             WHERE id IN (?1, ?2)",
            params![
                moving.id,
                other.id,
                other.position,
                moving.position,
                other.message_id,
                moving.message_id,
            ],
        )?;

        let mut moved = moving.clone();
        let mut displaced = other.clone();
        std::mem::swap(&mut moved.position, &mut displaced.position);
        std::mem::swap(&mut moved.message_id, &mut displaced.message_id);
        Ok(vec![moved, displaced])
    }

    pub async fn move_servers_to_channel(
        &self,
        servers: &[Server],
        channel_id: i64,
    ) -> Result<(), RepoError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "UPDATE servers SET channel_id = ?1, \
                position = (SELECT IFNULL(MAX(position + 1), 0) FROM servers WHERE channel_id = ?1) \
             WHERE id = ?2",
        )?;
        for server in servers {
            stmt.execute(params![channel_id, server.id])?;
        }
        Ok(())
    }

    pub async fn delete_servers(&self, filter: &DeleteFilter) -> Result<(), RepoError> {
        let conn = self.conn.lock().await;
        match filter {
            DeleteFilter::Guild(guild_id) => {
                conn.execute("DELETE FROM servers WHERE guild_id = ?1", params![guild_id])?;
            }
            DeleteFilter::Channel(channel_id) => {
                conn.execute(
                    "DELETE FROM servers WHERE channel_id = ?1",
                    params![channel_id],
                )?;
            }
            DeleteFilter::Ids(ids) => {
                let mut stmt = conn.prepare("DELETE FROM servers WHERE id = ?1")?;
                for id in ids {
                    stmt.execute(params![id])?;
                }
            }
        }
        Ok(())
    }

    pub async fn update_metrics(
        &self,
        servers: &[Server],
        captured_at: i64,
    ) -> Result<(), RepoError> {
        let conn = self.conn.lock().await;
        let mut insert = conn.prepare(
            "INSERT INTO metrics \
                (game_id, address, query_port, query_extra, status, numplayers, numbots, \
                 maxplayers, captured_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )?;
        let mut prune = conn.prepare(
            "DELETE FROM metrics \
             WHERE game_id = ?1 AND address = ?2 AND query_port = ?3 AND query_extra = ?4 \
               AND id NOT IN ( \
                 SELECT id FROM metrics \
                 WHERE game_id = ?1 AND address = ?2 AND query_port = ?3 AND query_extra = ?4 \
                 ORDER BY captured_at DESC, id DESC LIMIT ?5)",
        )?;

        for server in dedupe_by_distinct_key(servers) {
            let extra = stringify(&server.query_extra)?;
            insert.execute(params![
                server.game_id,
                server.address,
                i64::from(server.query_port),
                extra,
                i64::from(server.status),
                server.result.numplayers,
                server.result.numbots,
                server.result.maxplayers,
                captured_at,
            ])?;
            prune.execute(params![
                server.game_id,
                server.address,
                i64::from(server.query_port),
                extra,
                i64::try_from(self.metrics_limit).unwrap_or(i64::MAX),
            ])?;
        }
        Ok(())
    }

    pub async fn metric_samples(&self, server: &Server) -> Result<Vec<MetricSample>, RepoError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT status, numplayers, numbots, maxplayers, captured_at FROM metrics \
             WHERE game_id = ?1 AND address = ?2 AND query_port = ?3 AND query_extra = ?4 \
             ORDER BY captured_at, id",
        )?;
        let samples = stmt
            .query_map(
                params![
                    server.game_id,
                    server.address,
                    i64::from(server.query_port),
                    stringify(&server.query_extra)?,
                ],
                |row| {
                    Ok(MetricSample {
                        status: row.get::<_, i64>(0)? != 0,
                        numplayers: row.get(1)?,
                        numbots: row.get(2)?,
                        maxplayers: row.get(3)?,
                        captured_at: row.get(4)?,
                    })
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(samples)
    }
}

fn find_server_locked(
    conn: &Connection,
    channel_id: i64,
    address: &str,
    query_port: u16,
) -> Result<Server, RepoError> {
    let raw = conn
        .query_row(
            &format!(
                "SELECT {SERVER_COLUMNS} FROM servers \
                 WHERE channel_id = ?1 AND address = ?2 AND query_port = ?3"
            ),
            params![channel_id, address, i64::from(query_port)],
            RawServerRow::from_row,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => RepoError::NotFound,
            other => RepoError::Sqlite(other),
        })?;
    raw.into_server()
}
