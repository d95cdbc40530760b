use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use uuid::Uuid;

use crate::jobs::model::Priority;
use crate::jobs::store::QueueStore;

fn cancel_key(id: Uuid) -> String {
    format!("cancel:{id}")
}

fn log_channel(id: Uuid) -> String {
    format!("log:{id}")
}

/// Redis-backed priority queue. One list per tier (`jobqueue:<tier>`),
/// LPUSH on submit, RPOP on consume, so each tier is FIFO and every pop is
/// atomic: two workers never receive the same entry.
#[derive(Clone)]
pub struct RedisQueue {
    con: MultiplexedConnection,
}

impl RedisQueue {
    pub async fn connect(redis_url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let con = client.get_multiplexed_async_connection().await?;
        Ok(Self { con })
    }
}

#[async_trait]
impl QueueStore for RedisQueue {
    async fn push_back(&self, priority: Priority, payload: &str) -> anyhow::Result<()> {
        let mut con = self.con.clone();
        let _: () = con.lpush(priority.queue_key(), payload).await?;
        Ok(())
    }

    async fn pop_next(&self) -> anyhow::Result<Option<String>> {
        let mut con = self.con.clone();

        for priority in Priority::ALL {
            let popped: Option<String> = con.rpop(priority.queue_key(), None).await?;
            if popped.is_some() {
                return Ok(popped);
            }
        }

        Ok(None)
    }

    async fn set_cancel_flag(&self, id: Uuid, ttl_secs: u64) -> anyhow::Result<()> {
        let mut con = self.con.clone();
        let _: () = con.set_ex(cancel_key(id), "1", ttl_secs).await?;
        Ok(())
    }

    async fn cancel_requested(&self, id: Uuid) -> anyhow::Result<bool> {
        let mut con = self.con.clone();
        let flag: Option<String> = con.get(cancel_key(id)).await?;
        Ok(flag.is_some())
    }

    async fn clear_cancel_flag(&self, id: Uuid) -> anyhow::Result<()> {
        let mut con = self.con.clone();
        let _: () = con.del(cancel_key(id)).await?;
        Ok(())
    }

    async fn publish_log(&self, id: Uuid, message: &str) -> anyhow::Result<()> {
        let mut con = self.con.clone();
        let _: () = con.publish(log_channel(id), message).await?;
        Ok(())
    }
}
