//! postgres backend (sqlx connection pool).

use std::collections::BTreeMap;

use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};

use crate::repo::{
    dedupe_by_distinct_key, DeleteFilter, MetricSample, MoveDirection, RepoError, ServerFilter,
    Statistics,
};
use crate::server::Server;

const SERVER_COLUMNS: &str = "id, position, guild_id, channel_id, message_id, game_id, address, \
                              query_port, query_extra, status, result, style_id, style_data";

pub struct PgRepo {
    pool: PgPool,
    metrics_limit: usize,
}

fn server_from_row(row: &sqlx::postgres::PgRow) -> Result<Server, RepoError> {
    let query_extra: String = row.get("query_extra");
    let result: String = row.get("result");
    let style_data: String = row.get("style_data");
    Ok(Server {
        id: row.get("id"),
        position: row.get("position"),
        guild_id: row.get("guild_id"),
        channel_id: row.get("channel_id"),
        message_id: row.get("message_id"),
        game_id: row.get("game_id"),
        address: row.get("address"),
        query_port: u16::try_from(row.get::<i32, _>("query_port")).unwrap_or(0),
        query_extra: serde_json::from_str(&query_extra)?,
        status: row.get("status"),
        result: serde_json::from_str(&result)?,
        style_id: row.get("style_id"),
        style_data: serde_json::from_str(&style_data)?,
    })
}

fn stringify<T: serde::Serialize>(value: &T) -> Result<String, RepoError> {
    Ok(serde_json::to_string(value)?)
}

impl PgRepo {
    /// Connect and apply the schema. `sslmode` is appended to the url when
    /// the url does not already carry one.
    pub async fn connect(
        url: &str,
        ssl_mode: &str,
        metrics_limit: usize,
    ) -> Result<Self, RepoError> {
        let url = if url.contains("sslmode=") {
            url.to_owned()
        } else {
            let separator = if url.contains('?') { '&' } else { '?' };
            format!("{url}{separator}sslmode={ssl_mode}")
        };

        let pool = PgPoolOptions::new().max_connections(5).connect(&url).await?;
        let repo = PgRepo {
            pool,
            metrics_limit,
        };
        repo.create_tables().await?;
        Ok(repo)
    }

    async fn create_tables(&self) -> Result<(), RepoError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS servers ( \
                id BIGSERIAL PRIMARY KEY, \
                position INT NOT NULL, \
                guild_id BIGINT NOT NULL, \
                channel_id BIGINT NOT NULL, \
                message_id BIGINT, \
                game_id TEXT NOT NULL, \
                address TEXT NOT NULL, \
                query_port INT NOT NULL, \
                query_extra TEXT NOT NULL, \
                status BOOLEAN NOT NULL, \
                result TEXT NOT NULL, \
                style_id TEXT NOT NULL, \
                style_data TEXT NOT NULL)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS metrics ( \
                id BIGSERIAL PRIMARY KEY, \
                game_id TEXT NOT NULL, \
                address TEXT NOT NULL, \
                query_port INT NOT NULL, \
                query_extra TEXT NOT NULL, \
                status BOOLEAN NOT NULL, \
                numplayers BIGINT NOT NULL, \
                numbots BIGINT NOT NULL, \
                maxplayers BIGINT NOT NULL, \
                captured_at BIGINT NOT NULL)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_metrics_endpoint \
             ON metrics (game_id, address, query_port, query_extra)",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn all_servers(&self, filter: &ServerFilter) -> Result<Vec<Server>, RepoError> {
        let rows = if let Some(channel_id) = filter.channel_id {
            sqlx::query(sqlx::AssertSqlSafe(format!(
                "SELECT {SERVER_COLUMNS} FROM servers WHERE channel_id = $1 ORDER BY position"
            )))
            .bind(channel_id)
            .fetch_all(&self.pool)
            .await?
        } else if let Some(guild_id) = filter.guild_id {
            sqlx::query(sqlx::AssertSqlSafe(format!(
                "SELECT {SERVER_COLUMNS} FROM servers WHERE guild_id = $1 ORDER BY position"
            )))
            .bind(guild_id)
            .fetch_all(&self.pool)
            .await?
        } else if let Some(message_id) = filter.message_id {
            sqlx::query(sqlx::AssertSqlSafe(format!(
                "SELECT {SERVER_COLUMNS} FROM servers WHERE message_id = $1 ORDER BY position"
            )))
            .bind(message_id)
            .fetch_all(&self.pool)
            .await?
        } else if let Some(game_id) = &filter.game_id {
            sqlx::query(sqlx::AssertSqlSafe(format!(
                "SELECT {SERVER_COLUMNS} FROM servers WHERE game_id = $1 ORDER BY id"
            )))
            .bind(game_id)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query(sqlx::AssertSqlSafe(format!(
                "SELECT {SERVER_COLUMNS} FROM servers ORDER BY position"
            )))
            .fetch_all(&self.pool)
            .await?
        };

        rows.iter().map(server_from_row).collect()
    }

    pub async fn distinct_servers(&self) -> Result<Vec<Server>, RepoError> {
        let rows = sqlx::query(
            "SELECT DISTINCT game_id, address, query_port, query_extra, status, result \
             FROM servers",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let query_extra: String = row.get("query_extra");
                let result: String = row.get("result");
                Ok(Server {
                    id: 0,
                    position: 0,
                    guild_id: 0,
                    channel_id: 0,
                    message_id: None,
                    game_id: row.get("game_id"),
                    address: row.get("address"),
                    query_port: u16::try_from(row.get::<i32, _>("query_port")).unwrap_or(0),
                    query_extra: serde_json::from_str(&query_extra)?,
                    status: row.get("status"),
                    result: serde_json::from_str(&result)?,
                    style_id: String::new(),
                    style_data: BTreeMap::new(),
                })
            })
            .collect()
    }

    pub async fn count_per_game(&self) -> Result<BTreeMap<String, i64>, RepoError> {
        let rows = sqlx::query("SELECT game_id, COUNT(*) AS n FROM servers GROUP BY game_id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|row| (row.get("game_id"), row.get("n")))
            .collect())
    }

    pub async fn count_per_channel(&self) -> Result<BTreeMap<i64, i64>, RepoError> {
        let rows =
            sqlx::query("SELECT channel_id, COUNT(*) AS n FROM servers GROUP BY channel_id")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows
            .iter()
            .map(|row| (row.get("channel_id"), row.get("n")))
            .collect())
    }

    pub async fn statistics(&self) -> Result<Statistics, RepoError> {
        let row = sqlx::query(
            "SELECT \
                (SELECT COUNT(DISTINCT message_id) FROM servers) AS messages, \
                (SELECT COUNT(DISTINCT channel_id) FROM servers) AS channels, \
                (SELECT COUNT(DISTINCT guild_id) FROM servers) AS guilds, \
                (SELECT COUNT(*) FROM \
                    (SELECT DISTINCT game_id, address, query_port, query_extra FROM servers) x) \
                    AS unique_servers",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(Statistics {
            messages: row.get("messages"),
            channels: row.get("channels"),
            guilds: row.get("guilds"),
            unique_servers: row.get("unique_servers"),
        })
    }

    pub async fn find_server(
        &self,
        channel_id: i64,
        address: &str,
        query_port: u16,
    ) -> Result<Server, RepoError> {
        let row = sqlx::query(sqlx::AssertSqlSafe(format!(
            "SELECT {SERVER_COLUMNS} FROM servers \
             WHERE channel_id = $1 AND address = $2 AND query_port = $3"
        )))
        .bind(channel_id)
        .bind(address)
        .bind(i32::from(query_port))
        .fetch_optional(&self.pool)
        .await?
        .ok_or(RepoError::NotFound)?;
        server_from_row(&row)
    }

    pub async fn add_server(&self, server: &Server) -> Result<Server, RepoError> {
        let exists = sqlx::query(
            "SELECT 1 FROM servers WHERE channel_id = $1 AND address = $2 AND query_port = $3",
        )
        .bind(server.channel_id)
        .bind(&server.address)
        .bind(i32::from(server.query_port))
        .fetch_optional(&self.pool)
        .await?
        .is_some();
        if exists {
            return Err(RepoError::Conflict(format!(
                "{}:{} already monitored in channel {}",
                server.address, server.query_port, server.channel_id
            )));
        }

        sqlx::query(
            "INSERT INTO servers \
                (position, guild_id, channel_id, message_id, game_id, address, query_port, \
                 query_extra, status, result, style_id, style_data) \
             VALUES ((SELECT COALESCE(MAX(position + 1), 0) FROM servers WHERE channel_id = $1), \
                     $2, $1, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(server.channel_id)
        .bind(server.guild_id)
        .bind(server.message_id)
        .bind(&server.game_id)
        .bind(&server.address)
        .bind(i32::from(server.query_port))
        .bind(stringify(&server.query_extra)?)
        .bind(server.status)
        .bind(stringify(&server.result)?)
        .bind(&server.style_id)
        .bind(stringify(&server.style_data)?)
        .execute(&self.pool)
        .await?;

        self.find_server(server.channel_id, &server.address, server.query_port)
            .await
    }

    pub async fn update_servers(&self, servers: &[Server]) -> Result<(), RepoError> {
        let mut tx = self.pool.begin().await?;
        for server in dedupe_by_distinct_key(servers) {
            sqlx::query(
                "UPDATE servers SET status = $1, result = $2 \
                 WHERE game_id = $3 AND address = $4 AND query_port = $5 AND query_extra = $6",
            )
            .bind(server.status)
            .bind(stringify(&server.result)?)
            .bind(&server.game_id)
            .bind(&server.address)
            .bind(i32::from(server.query_port))
            .bind(stringify(&server.query_extra)?)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn update_servers_message_id(&self, servers: &[Server]) -> Result<(), RepoError> {
        let mut tx = self.pool.begin().await?;
        for server in servers {
            sqlx::query("UPDATE servers SET message_id = $1 WHERE id = $2")
                .bind(server.message_id)
                .bind(server.id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn update_servers_style_data(&self, servers: &[Server]) -> Result<(), RepoError> {
        let mut tx = self.pool.begin().await?;
        for server in servers {
            sqlx::query("UPDATE servers SET style_data = $1 WHERE id = $2")
                .bind(stringify(&server.style_data)?)
                .bind(server.id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn update_server_style_id(&self, server: &Server) -> Result<(), RepoError> {
        sqlx::query("UPDATE servers SET style_id = $1 WHERE id = $2")
            .bind(&server.style_id)
            .bind(server.id)
            .execute(&self.pool)
            .await?;
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

        sqlx::query(
            "UPDATE servers SET \
                position = CASE id WHEN $1 THEN $3 WHEN $2 THEN $4 END, \
                message_id = CASE id WHEN $1 THEN $5 WHEN $2 THEN $6 END \
             WHERE id IN ($1, $2)",
        )
        .bind(moving.id)
        .bind(other.id)
        .bind(other.position)
        .bind(moving.position)
        .bind(other.message_id)
        .bind(moving.message_id)
        .execute(&self.pool)
        .await?;

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
        let mut tx = self.pool.begin().await?;
        for server in servers {
            sqlx::query(
                "UPDATE servers SET channel_id = $1, \
                    position = (SELECT COALESCE(MAX(position + 1), 0) FROM servers \
                                WHERE channel_id = $1) \
                 WHERE id = $2",
            )
            .bind(channel_id)
            .bind(server.id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn delete_servers(&self, filter: &DeleteFilter) -> Result<(), RepoError> {
        match filter {
            DeleteFilter::Guild(guild_id) => {
                sqlx::query("DELETE FROM servers WHERE guild_id = $1")
                    .bind(guild_id)
                    .execute(&self.pool)
                    .await?;
            }
            DeleteFilter::Channel(channel_id) => {
                sqlx::query("DELETE FROM servers WHERE channel_id = $1")
                    .bind(channel_id)
                    .execute(&self.pool)
                    .await?;
            }
            DeleteFilter::Ids(ids) => {
                let mut tx = self.pool.begin().await?;
                for id in ids {
                    sqlx::query("DELETE FROM servers WHERE id = $1")
                        .bind(id)
                        .execute(&mut *tx)
                        .await?;
                }
                tx.commit().await?;
            }
        }
        Ok(())
    }

    pub async fn update_metrics(
        &self,
        servers: &[Server],
        captured_at: i64,
    ) -> Result<(), RepoError> {
        let mut tx = self.pool.begin().await?;
        for server in dedupe_by_distinct_key(servers) {
            let extra = stringify(&server.query_extra)?;
            sqlx::query(
                "INSERT INTO metrics \
                    (game_id, address, query_port, query_extra, status, numplayers, numbots, \
                     maxplayers, captured_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
            )
            .bind(&server.game_id)
            .bind(&server.address)
            .bind(i32::from(server.query_port))
            .bind(&extra)
            .bind(server.status)
            .bind(server.result.numplayers)
            .bind(server.result.numbots)
            .bind(server.result.maxplayers)
            .bind(captured_at)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "DELETE FROM metrics \
                 WHERE game_id = $1 AND address = $2 AND query_port = $3 AND query_extra = $4 \
                   AND id NOT IN ( \
                     SELECT id FROM metrics \
                     WHERE game_id = $1 AND address = $2 AND query_port = $3 AND query_extra = $4 \
                     ORDER BY captured_at DESC, id DESC LIMIT $5)",
            )
            .bind(&server.game_id)
            .bind(&server.address)
            .bind(i32::from(server.query_port))
            .bind(&extra)
            .bind(i64::try_from(self.metrics_limit).unwrap_or(i64::MAX))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn metric_samples(&self, server: &Server) -> Result<Vec<MetricSample>, RepoError> {
        let rows = sqlx::query(
            "SELECT status, numplayers, numbots, maxplayers, captured_at FROM metrics \
             WHERE game_id = $1 AND address = $2 AND query_port = $3 AND query_extra = $4 \
             ORDER BY captured_at, id",
        )
        .bind(&server.game_id)
        .bind(&server.address)
        .bind(i32::from(server.query_port))
        .bind(stringify(&server.query_extra)?)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| MetricSample {
                status: row.get("status"),
                numplayers: row.get("numplayers"),
                numbots: row.get("numbots"),
                maxplayers: row.get("maxplayers"),
                captured_at: row.get("captured_at"),
            })
            .collect())
    }
}
