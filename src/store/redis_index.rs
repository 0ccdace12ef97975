use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tracing::{debug, instrument};

use super::{Batch, BatchOp, BatchReply, EligibilityIndex};
use crate::error::{ConfigurationError, StoreError};

/// An eligibility index kept in Redis sorted sets.
///
/// Batches run as a `MULTI`/`EXEC` pipeline, which gives the claim protocol
/// its atomic range-then-remove.
#[derive(Clone)]
pub struct RedisIndex {
    conn: MultiplexedConnection,
}

impl std::fmt::Debug for RedisIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisIndex").finish_non_exhaustive()
    }
}

impl RedisIndex {
    /// Connects to the Redis server at `url` (e.g. `redis://127.0.0.1:6379`).
    #[instrument(skip_all, err)]
    pub async fn connect(url: &str) -> Result<Self, ConfigurationError> {
        let client = redis::Client::open(url)
            .map_err(|error| ConfigurationError::Store(error.to_string()))?;

        let conn = client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(|error| ConfigurationError::Store(error.to_string()))?;

        debug!("connected to redis");

        Ok(Self { conn })
    }

    /// Wraps an already established connection.
    pub fn from_connection(conn: MultiplexedConnection) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl EligibilityIndex for RedisIndex {
    async fn upsert(
        &self,
        set: &str,
        member: &str,
        score: i64,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.zadd::<_, _, _, ()>(set, member, score).await?;
        Ok(())
    }

    async fn exec(&self, batch: Batch) -> Result<Vec<BatchReply>, StoreError> {
        let mut pipe = redis::pipe();
        pipe.atomic();

        for op in batch.ops() {
            match op {
                BatchOp::RangeByScore { set, min, max } => {
                    pipe.zrangebyscore(set, min.to_string(), max.to_string());
                },
                BatchOp::RemoveRangeByScore { set, min, max } => {
                    pipe.zrembyscore(set, min.to_string(), max.to_string());
                },
            }
        }

        let mut conn = self.conn.clone();
        let values: Vec<redis::Value> = pipe.query_async(&mut conn).await?;

        if values.len() != batch.len() {
            return Err(StoreError::UnexpectedReply(format!(
                "{} replies for {} commands",
                values.len(),
                batch.len()
            )));
        }

        batch
            .ops()
            .iter()
            .zip(values)
            .map(|(op, value)| -> Result<BatchReply, StoreError> {
                Ok(match op {
                    BatchOp::RangeByScore { .. } => {
                        BatchReply::Members(redis::from_redis_value(&value)?)
                    },
                    BatchOp::RemoveRangeByScore { .. } => {
                        BatchReply::Removed(redis::from_redis_value(&value)?)
                    },
                })
            })
            .collect()
    }
}
