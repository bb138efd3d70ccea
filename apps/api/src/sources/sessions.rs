use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};

use crate::errors::AppError;

/// Sessions expire after a week without being saved again.
const SESSION_TTL_SECS: u64 = 7 * 24 * 60 * 60;

/// Client session: remembers which job and sample a user is working with so
/// matching requests can omit them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub user_id: Option<String>,
    pub job_description_id: Option<String>,
    pub sample_name: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionUpdate {
    pub user_id: Option<String>,
    pub job_description_id: Option<String>,
    pub sample_name: Option<String>,
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, session_id: &str) -> Result<Option<Session>, AppError>;
    async fn put(&self, session: &Session) -> Result<(), AppError>;
}

pub struct RedisSessionStore {
    client: redis::Client,
}

impl RedisSessionStore {
    pub fn new(client: redis::Client) -> Self {
        Self { client }
    }
}

pub fn session_key(session_id: &str) -> String {
    format!("match:session:{session_id}")
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn get(&self, session_id: &str) -> Result<Option<Session>, AppError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let raw: Option<String> = conn.get(session_key(session_id)).await?;
        raw.map(|json| {
            serde_json::from_str(&json).map_err(|e| {
                AppError::Internal(anyhow::anyhow!("corrupt session {session_id}: {e}"))
            })
        })
        .transpose()
    }

    async fn put(&self, session: &Session) -> Result<(), AppError> {
        let json = serde_json::to_string(session)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("session encode failed: {e}")))?;
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        redis::cmd("SET")
            .arg(session_key(&session.session_id))
            .arg(json)
            .arg("EX")
            .arg(SESSION_TTL_SECS)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }
}

impl Session {
    /// Applies an update on top of an optional existing session. Fields the
    /// update leaves empty keep their previous value.
    pub fn merged(session_id: &str, existing: Option<Session>, update: SessionUpdate) -> Session {
        let previous = existing.unwrap_or(Session {
            session_id: session_id.to_string(),
            user_id: None,
            job_description_id: None,
            sample_name: None,
            updated_at: Utc::now(),
        });
        Session {
            session_id: session_id.to_string(),
            user_id: update.user_id.or(previous.user_id),
            job_description_id: update.job_description_id.or(previous.job_description_id),
            sample_name: update.sample_name.or(previous.sample_name),
            updated_at: Utc::now(),
        }
    }
}
