use std::{fmt, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use metrics::Timer;
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use tracing::info;

use crate::{
    metrics::BlobStoreMetrics,
    schema,
    schema::{Dialect, TableSchema},
    BlobStoreBackend,
    BlobStoreConfig,
    DeleteStrategy,
    StoreError,
};

const DIALECT: Dialect = Dialect::Postgres;

/// Postgres error code raised when `lock_timeout` expires while waiting
/// for a row lock.
const LOCK_NOT_AVAILABLE: &str = "55P03";

pub struct PgBlobStore {
    pool: PgPool,
    schema: TableSchema,
    lock_timeout: Duration,
    delete_strategy: DeleteStrategy,
    metrics: BlobStoreMetrics,
}

impl fmt::Debug for PgBlobStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PgBlobStore")
            .field("table", &self.schema.table)
            .finish()
    }
}

impl PgBlobStore {
    pub fn new(config: &BlobStoreConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect_lazy(&config.connection_url)
            .map_err(|e| {
                StoreError::Configuration(format!("unable to open postgres pool: {}", e))
            })?;
        info!("using postgres blob table: {}", config.table.table);
        Ok(Self {
            pool,
            schema: config.table.clone(),
            lock_timeout: Duration::from_millis(config.lock_timeout_ms),
            delete_strategy: config.delete_strategy,
            metrics: BlobStoreMetrics::new(),
        })
    }

    fn write_error(name: &str, e: sqlx::Error) -> StoreError {
        match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::AlreadyExists {
                name: name.to_string(),
            },
            sqlx::Error::Database(db) if db.code().as_deref() == Some(LOCK_NOT_AVAILABLE) => {
                StoreError::LockTimeout {
                    name: name.to_string(),
                }
            }
            _ => StoreError::Io { source: e },
        }
    }
}

#[async_trait]
impl BlobStoreBackend for PgBlobStore {
    async fn create_table(&self) -> Result<(), StoreError> {
        sqlx::query(&self.schema.create_table_sql(DIALECT))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_names(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let sql = self.schema.list_names_sql(DIALECT);
        let rows = sqlx::query(&sql)
            .bind(format!("{}%", schema::escape_like(prefix)))
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| row.try_get::<String, _>(0).map_err(StoreError::from))
            .collect()
    }

    async fn exists(&self, name: &str) -> Result<bool, StoreError> {
        let sql = self.schema.exists_sql(DIALECT);
        let row = sqlx::query(&sql).bind(name).fetch_optional(&self.pool).await?;
        Ok(row.is_some())
    }

    async fn length(&self, name: &str) -> Result<u64, StoreError> {
        let sql = self.schema.select_size_sql(DIALECT);
        let row = sqlx::query(&sql).bind(name).fetch_optional(&self.pool).await?;
        match row {
            Some(row) => Ok(row.try_get::<i64, _>(0)? as u64),
            None => Err(StoreError::FileNotFound {
                name: name.to_string(),
            }),
        }
    }

    async fn modified(&self, name: &str) -> Result<u64, StoreError> {
        let sql = self.schema.select_modified_sql(DIALECT);
        let row = sqlx::query(&sql).bind(name).fetch_optional(&self.pool).await?;
        match row {
            Some(row) => Ok(row.try_get::<i64, _>(0)? as u64),
            None => Err(StoreError::FileNotFound {
                name: name.to_string(),
            }),
        }
    }

    async fn write(&self, name: &str, data: Bytes) -> Result<(), StoreError> {
        let _timer = Timer::start(&self.metrics.writes);
        let mut tx = self.pool.begin().await?;
        let set_timeout = format!(
            "SET LOCAL lock_timeout = '{}ms'",
            self.lock_timeout.as_millis()
        );
        sqlx::query(&set_timeout).execute(&mut *tx).await?;

        // Phase one: claim the name with an empty placeholder row.
        let insert = self.schema.insert_placeholder_sql(DIALECT);
        sqlx::query(&insert)
            .bind(name)
            .bind(Vec::<u8>::new())
            .execute(&mut *tx)
            .await
            .map_err(|e| Self::write_error(name, e))?;

        // Phase two: row-lock the placeholder. A missing row here means
        // the insert above did not take effect in this transaction.
        let select = self.schema.select_for_update_sql(DIALECT);
        let row = sqlx::query(&select)
            .bind(name)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| Self::write_error(name, e))?;
        if row.is_none() {
            return Err(StoreError::Internal(format!(
                "row for {} missing immediately after insert",
                name
            )));
        }

        // Stream the buffered content into the locked row and commit.
        let update = self.schema.update_content_sql(DIALECT);
        sqlx::query(&update)
            .bind(data.as_ref())
            .bind(data.len() as i64)
            .bind(name)
            .execute(&mut *tx)
            .await
            .map_err(|e| Self::write_error(name, e))?;
        tx.commit().await?;

        self.metrics.write_bytes.add(data.len() as u64, &[]);
        Ok(())
    }

    async fn read(&self, name: &str) -> Result<Bytes, StoreError> {
        let _timer = Timer::start(&self.metrics.reads);
        let sql = self.schema.select_value_sql(DIALECT);
        let row = sqlx::query(&sql).bind(name).fetch_optional(&self.pool).await?;
        match row {
            Some(row) => {
                let value: Vec<u8> = row.try_get(0)?;
                self.metrics.read_bytes.add(value.len() as u64, &[]);
                Ok(Bytes::from(value))
            }
            None => Err(StoreError::FileNotFound {
                name: name.to_string(),
            }),
        }
    }

    async fn delete(&self, name: &str) -> Result<(), StoreError> {
        let sql = match self.delete_strategy {
            DeleteStrategy::Remove => self.schema.delete_row_sql(DIALECT),
            DeleteStrategy::MarkDeleted => self.schema.mark_deleted_sql(DIALECT),
        };
        let result = sqlx::query(&sql).bind(name).execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::FileNotFound {
                name: name.to_string(),
            });
        }
        Ok(())
    }

    async fn purge(&self, name: &str) -> Result<(), StoreError> {
        let sql = self.schema.delete_row_sql(DIALECT);
        sqlx::query(&sql).bind(name).execute(&self.pool).await?;
        Ok(())
    }

    async fn rename(&self, from: &str, to: &str) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        let set_timeout = format!(
            "SET LOCAL lock_timeout = '{}ms'",
            self.lock_timeout.as_millis()
        );
        sqlx::query(&set_timeout).execute(&mut *tx).await?;

        let select = self.schema.select_content_for_update_sql(DIALECT);
        let row = sqlx::query(&select)
            .bind(from)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| Self::write_error(from, e))?;
        let row = row.ok_or_else(|| StoreError::FileNotFound {
            name: from.to_string(),
        })?;
        let value: Vec<u8> = row.try_get(0)?;
        let size: i64 = row.try_get(1)?;

        // Clear any stale target row, then copy + delete the source inside
        // the same transaction.
        let delete = self.schema.delete_row_sql(DIALECT);
        sqlx::query(&delete).bind(to).execute(&mut *tx).await?;
        let insert = self.schema.insert_content_sql(DIALECT);
        sqlx::query(&insert)
            .bind(to)
            .bind(&value)
            .bind(size)
            .execute(&mut *tx)
            .await
            .map_err(|e| Self::write_error(to, e))?;
        sqlx::query(&delete).bind(from).execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn touch(&self, name: &str) -> Result<(), StoreError> {
        let sql = self.schema.touch_sql(DIALECT);
        let result = sqlx::query(&sql).bind(name).execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::FileNotFound {
                name: name.to_string(),
            });
        }
        Ok(())
    }

    async fn insert_lock_row(&self, name: &str) -> Result<bool, StoreError> {
        let sql = self.schema.insert_placeholder_sql(DIALECT);
        let result = sqlx::query(&sql)
            .bind(name)
            .bind(Vec::<u8>::new())
            .execute(&self.pool)
            .await;
        match result {
            Ok(_) => Ok(true),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Ok(false),
            Err(e) => Err(StoreError::Io { source: e }),
        }
    }

    async fn delete_lock_row(&self, name: &str) -> Result<(), StoreError> {
        self.purge(name).await
    }

    async fn lock_row_exists(&self, name: &str) -> Result<bool, StoreError> {
        self.exists(name).await
    }
}
