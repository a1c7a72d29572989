use async_trait::async_trait;
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    AggregateId, EventEnvelope, EventId, EventStoreError, Result, Snapshot, Version,
    store::{EventStore, EventStream, validate_append},
};

/// PostgreSQL-backed event store.
///
/// The `unique_aggregate_version` constraint on `(aggregate_id, version)`
/// is the concurrency primitive: any insert colliding with it reports a
/// [`EventStoreError::ConcurrencyConflict`], independent of the explicit
/// version check at the start of the transaction.
#[derive(Clone)]
pub struct PostgresEventStore {
    pool: PgPool,
}

impl PostgresEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Applies the workspace migrations (event log and read model).
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_event(row: PgRow) -> Result<EventEnvelope> {
        Ok(EventEnvelope {
            event_id: EventId::from_uuid(row.try_get::<Uuid, _>("id")?),
            event_type: row.try_get("event_type")?,
            aggregate_id: AggregateId::from_uuid(row.try_get::<Uuid, _>("aggregate_id")?),
            version: Version::new(row.try_get("version")?),
            timestamp: row.try_get("timestamp")?,
            payload: row.try_get("payload")?,
        })
    }
}

#[async_trait]
impl EventStore for PostgresEventStore {
    async fn append(
        &self,
        events: Vec<EventEnvelope>,
        expected_version: Version,
    ) -> Result<Version> {
        validate_append(&events, expected_version)?;
        let aggregate_id = events[0].aggregate_id;

        let mut tx = self.pool.begin().await?;

        let stored: Option<i64> =
            sqlx::query_scalar("SELECT MAX(version) FROM events WHERE aggregate_id = $1")
                .bind(aggregate_id.as_uuid())
                .fetch_one(&mut *tx)
                .await?;
        let actual = stored.map(Version::new).unwrap_or_else(Version::none);

        if actual != expected_version {
            return Err(EventStoreError::ConcurrencyConflict {
                aggregate_id,
                expected: expected_version,
                actual,
            });
        }

        let mut last_version = expected_version;
        for event in &events {
            sqlx::query(
                r#"
                INSERT INTO events (id, aggregate_id, version, event_type, timestamp, payload)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(event.event_id.as_uuid())
            .bind(event.aggregate_id.as_uuid())
            .bind(event.version.as_i64())
            .bind(&event.event_type)
            .bind(event.timestamp)
            .bind(&event.payload)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                if let sqlx::Error::Database(ref db_err) = e
                    && db_err.constraint() == Some("unique_aggregate_version")
                {
                    return EventStoreError::ConcurrencyConflict {
                        aggregate_id,
                        expected: expected_version,
                        actual: event.version,
                    };
                }
                EventStoreError::Database(e)
            })?;

            last_version = event.version;
        }

        tx.commit().await?;
        Ok(last_version)
    }

    async fn load_events(&self, aggregate_id: AggregateId) -> Result<Vec<EventEnvelope>> {
        let rows = sqlx::query(
            r#"
            SELECT id, aggregate_id, version, event_type, timestamp, payload
            FROM events
            WHERE aggregate_id = $1
            ORDER BY version ASC
            "#,
        )
        .bind(aggregate_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_event).collect()
    }

    async fn load_events_from(
        &self,
        aggregate_id: AggregateId,
        from_version: Version,
    ) -> Result<Vec<EventEnvelope>> {
        let rows = sqlx::query(
            r#"
            SELECT id, aggregate_id, version, event_type, timestamp, payload
            FROM events
            WHERE aggregate_id = $1 AND version >= $2
            ORDER BY version ASC
            "#,
        )
        .bind(aggregate_id.as_uuid())
        .bind(from_version.as_i64())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_event).collect()
    }

    async fn last_event(&self, aggregate_id: AggregateId) -> Result<Option<EventEnvelope>> {
        let row = sqlx::query(
            r#"
            SELECT id, aggregate_id, version, event_type, timestamp, payload
            FROM events
            WHERE aggregate_id = $1
            ORDER BY version DESC
            LIMIT 1
            "#,
        )
        .bind(aggregate_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_event).transpose()
    }

    async fn save_snapshot(&self, snapshot: Snapshot) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO snapshots (aggregate_id, version, timestamp, schema_version, state)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (aggregate_id) DO UPDATE SET
                version = EXCLUDED.version,
                timestamp = EXCLUDED.timestamp,
                schema_version = EXCLUDED.schema_version,
                state = EXCLUDED.state
            "#,
        )
        .bind(snapshot.aggregate_id.as_uuid())
        .bind(snapshot.version.as_i64())
        .bind(snapshot.timestamp)
        .bind(snapshot.schema_version)
        .bind(&snapshot.state)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn load_snapshot(&self, aggregate_id: AggregateId) -> Result<Option<Snapshot>> {
        let row: Option<PgRow> = sqlx::query(
            r#"
            SELECT aggregate_id, version, timestamp, schema_version, state
            FROM snapshots
            WHERE aggregate_id = $1
            "#,
        )
        .bind(aggregate_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(Snapshot {
                aggregate_id: AggregateId::from_uuid(row.try_get::<Uuid, _>("aggregate_id")?),
                version: Version::new(row.try_get("version")?),
                timestamp: row.try_get("timestamp")?,
                schema_version: row.try_get("schema_version")?,
                state: row.try_get("state")?,
            })
        })
        .transpose()
    }

    async fn stream_all(&self) -> Result<EventStream> {
        // Pages on the global insertion sequence so the stream owns its
        // connection handle and survives arbitrarily large logs.
        const PAGE: i64 = 256;

        let pool = self.pool.clone();
        let stream = async_stream::stream! {
            let mut after: i64 = 0;
            loop {
                let page = sqlx::query(
                    r#"
                    SELECT global_seq, id, aggregate_id, version, event_type, timestamp, payload
                    FROM events
                    WHERE global_seq > $1
                    ORDER BY global_seq ASC
                    LIMIT $2
                    "#,
                )
                .bind(after)
                .bind(PAGE)
                .fetch_all(&pool)
                .await;

                match page {
                    Err(e) => {
                        yield Err(EventStoreError::Database(e));
                        break;
                    }
                    Ok(rows) => {
                        let fetched = rows.len() as i64;
                        for row in rows {
                            match row.try_get::<i64, _>("global_seq") {
                                Ok(seq) => after = seq,
                                Err(e) => {
                                    yield Err(EventStoreError::Database(e));
                                    return;
                                }
                            }
                            yield Self::row_to_event(row);
                        }
                        if fetched < PAGE {
                            break;
                        }
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }
}
