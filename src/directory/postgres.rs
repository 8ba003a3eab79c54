use super::{
    group_joined_rows, with_deadline, EventDirectory, JoinedRow, StoreError, SubscriptionDirectory,
};
use crate::config::DatabaseConfig;
use crate::domain::{
    ChatRecipientLink, Event, EventId, EventIdentifier, RecipientId, Subscriber, SubscriberId,
    SubscriberReport, SubscriptionId,
};
use crate::error::{Context, Result};
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Row};
use std::collections::BTreeSet;
use std::time::Duration;

const SCHEMA: &str = include_str!("schema.sql");

/// Both directories over one Postgres pool.
#[derive(Clone)]
pub struct PostgresDirectory {
    pool: PgPool,
    statement_timeout: Duration,
}

impl PostgresDirectory {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let max_conn = config.max_connections.unwrap_or(5);
        let timeout = config.acquire_timeout_secs.unwrap_or(5);

        let pool = PgPoolOptions::new()
            .max_connections(max_conn)
            .acquire_timeout(Duration::from_secs(timeout))
            .connect(&config.url)
            .await
            .context("failed to connect to postgres")?;

        Ok(Self::from_pool(pool, config.statement_timeout))
    }

    pub fn from_pool(pool: PgPool, statement_timeout: Duration) -> Self {
        Self {
            pool,
            statement_timeout,
        }
    }

    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .context("failed to apply database schema")?;
        Ok(())
    }

    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .context("database ping failed")?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn classify(operation: &'static str, err: sqlx::Error) -> StoreError {
    let unique_violation = err
        .as_database_error()
        .map(|db| db.is_unique_violation())
        .unwrap_or(false);

    if unique_violation {
        StoreError::Conflict { operation }
    } else {
        StoreError::backend(operation, err)
    }
}

#[async_trait]
impl EventDirectory for PostgresDirectory {
    async fn register_event(&self, event: &Event) -> Result<bool, StoreError> {
        const OP: &str = "register_event";
        with_deadline(self.statement_timeout, OP, async {
            let result = sqlx::query(
                "INSERT INTO events (event_id, name, translate) VALUES ($1, $2, $3) \
                 ON CONFLICT DO NOTHING",
            )
            .bind(event.event_id)
            .bind(&event.name)
            .bind(&event.translate)
            .execute(&self.pool)
            .await
            .map_err(|err| classify(OP, err))?;
            Ok(result.rows_affected() == 1)
        })
        .await
    }

    async fn find_event(
        &self,
        identifier: &EventIdentifier,
    ) -> Result<Option<EventId>, StoreError> {
        const OP: &str = "find_event";
        with_deadline(self.statement_timeout, OP, async {
            let query = match identifier {
                EventIdentifier::Id(id) => sqlx::query_scalar::<Postgres, EventId>(
                    "SELECT event_id FROM events WHERE event_id = $1",
                )
                .bind(*id),
                EventIdentifier::Name(name) => sqlx::query_scalar::<Postgres, EventId>(
                    "SELECT event_id FROM events WHERE name = $1",
                )
                .bind(name.as_str()),
            };
            query
                .fetch_optional(&self.pool)
                .await
                .map_err(|err| classify(OP, err))
        })
        .await
    }

    async fn list_events(&self) -> Result<Vec<Event>, StoreError> {
        const OP: &str = "list_events";
        with_deadline(self.statement_timeout, OP, async {
            sqlx::query_as::<_, Event>(
                "SELECT event_id, name, translate FROM events ORDER BY event_id",
            )
            .fetch_all(&self.pool)
            .await
            .map_err(|err| classify(OP, err))
        })
        .await
    }
}

#[async_trait]
impl SubscriptionDirectory for PostgresDirectory {
    async fn get_subscriber_by_phone(&self, phone: &str) -> Result<Option<Subscriber>, StoreError> {
        const OP: &str = "get_subscriber_by_phone";
        with_deadline(self.statement_timeout, OP, async {
            sqlx::query_as::<_, Subscriber>(
                "SELECT subscriber_id, phone_number FROM subscribers WHERE phone_number = $1",
            )
            .bind(phone)
            .fetch_optional(&self.pool)
            .await
            .map_err(|err| classify(OP, err))
        })
        .await
    }

    async fn register_subscriber(&self, phone: &str) -> Result<SubscriberId, StoreError> {
        const OP: &str = "register_subscriber";
        with_deadline(self.statement_timeout, OP, async {
            sqlx::query_scalar::<_, SubscriberId>(
                "INSERT INTO subscribers (phone_number) VALUES ($1) RETURNING subscriber_id",
            )
            .bind(phone)
            .fetch_one(&self.pool)
            .await
            .map_err(|err| classify(OP, err))
        })
        .await
    }

    async fn subscribe_to_event(
        &self,
        subscriber_id: SubscriberId,
        event_id: EventId,
    ) -> Result<Option<SubscriptionId>, StoreError> {
        const OP: &str = "subscribe_to_event";
        with_deadline(self.statement_timeout, OP, async {
            sqlx::query_scalar::<_, SubscriptionId>(
                "INSERT INTO subscriptions (subscriber_id, event_id) VALUES ($1, $2) \
                 ON CONFLICT (subscriber_id, event_id) DO NOTHING \
                 RETURNING subscription_id",
            )
            .bind(subscriber_id)
            .bind(event_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|err| classify(OP, err))
        })
        .await
    }

    async fn cancel_subscription(
        &self,
        subscription_id: SubscriptionId,
    ) -> Result<bool, StoreError> {
        const OP: &str = "cancel_subscription";
        with_deadline(self.statement_timeout, OP, async {
            let result = sqlx::query("DELETE FROM subscriptions WHERE subscription_id = $1")
                .bind(subscription_id)
                .execute(&self.pool)
                .await
                .map_err(|err| classify(OP, err))?;
            Ok(result.rows_affected() > 0)
        })
        .await
    }

    async fn event_subscribers(&self, event_id: EventId) -> Result<Vec<Subscriber>, StoreError> {
        const OP: &str = "event_subscribers";
        with_deadline(self.statement_timeout, OP, async {
            sqlx::query_as::<_, Subscriber>(
                "SELECT sub.subscriber_id, sub.phone_number \
                 FROM subscriptions s \
                 JOIN subscribers sub ON sub.subscriber_id = s.subscriber_id \
                 WHERE s.event_id = $1 \
                 ORDER BY sub.subscriber_id",
            )
            .bind(event_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|err| classify(OP, err))
        })
        .await
    }

    async fn link_chat_recipient(
        &self,
        recipient_id: RecipientId,
        subscriber_id: SubscriberId,
    ) -> Result<bool, StoreError> {
        const OP: &str = "link_chat_recipient";
        with_deadline(self.statement_timeout, OP, async {
            let result = sqlx::query(
                "INSERT INTO chat_recipients (recipient_id, subscriber_id) VALUES ($1, $2) \
                 ON CONFLICT (subscriber_id) DO NOTHING",
            )
            .bind(recipient_id)
            .bind(subscriber_id)
            .execute(&self.pool)
            .await
            .map_err(|err| classify(OP, err))?;
            Ok(result.rows_affected() == 1)
        })
        .await
    }

    async fn chat_recipients(
        &self,
        phone_numbers: &BTreeSet<String>,
    ) -> Result<Vec<ChatRecipientLink>, StoreError> {
        const OP: &str = "chat_recipients";
        if phone_numbers.is_empty() {
            return Ok(Vec::new());
        }

        let phones: Vec<String> = phone_numbers.iter().cloned().collect();
        with_deadline(self.statement_timeout, OP, async {
            sqlx::query_as::<_, ChatRecipientLink>(
                "SELECT cr.recipient_id, cr.subscriber_id \
                 FROM chat_recipients cr \
                 JOIN subscribers sub ON sub.subscriber_id = cr.subscriber_id \
                 WHERE sub.phone_number = ANY($1) \
                 ORDER BY cr.subscriber_id",
            )
            .bind(&phones)
            .fetch_all(&self.pool)
            .await
            .map_err(|err| classify(OP, err))
        })
        .await
    }

    async fn subscribers_overview(&self) -> Result<Vec<SubscriberReport>, StoreError> {
        const OP: &str = "subscribers_overview";
        with_deadline(self.statement_timeout, OP, async {
            let rows = sqlx::query(
                "SELECT sub.subscriber_id, sub.phone_number, \
                        (cr.subscriber_id IS NOT NULL) AS has_chat_link \
                 FROM subscribers sub \
                 LEFT JOIN chat_recipients cr ON cr.subscriber_id = sub.subscriber_id \
                 ORDER BY sub.subscriber_id",
            )
            .fetch_all(&self.pool)
            .await
            .map_err(|err| classify(OP, err))?;

            rows.iter()
                .map(|row| {
                    Ok(SubscriberReport {
                        subscriber_id: row.try_get("subscriber_id")?,
                        phone_number: row.try_get("phone_number")?,
                        has_chat_link: row.try_get("has_chat_link")?,
                        subscriptions: Vec::new(),
                    })
                })
                .collect::<Result<Vec<_>, sqlx::Error>>()
                .map_err(|err| classify(OP, err))
        })
        .await
    }

    async fn subscribers_joined(&self) -> Result<Vec<SubscriberReport>, StoreError> {
        const OP: &str = "subscribers_joined";
        with_deadline(self.statement_timeout, OP, async {
            let rows = sqlx::query_as::<_, JoinedRow>(
                "SELECT sub.subscriber_id, sub.phone_number, \
                        (cr.subscriber_id IS NOT NULL) AS has_chat_link, \
                        s.subscription_id, e.event_id, e.name, e.translate \
                 FROM subscribers sub \
                 JOIN subscriptions s ON s.subscriber_id = sub.subscriber_id \
                 JOIN events e ON e.event_id = s.event_id \
                 LEFT JOIN chat_recipients cr ON cr.subscriber_id = sub.subscriber_id \
                 ORDER BY sub.subscriber_id, s.subscription_id",
            )
            .fetch_all(&self.pool)
            .await
            .map_err(|err| classify(OP, err))?;

            Ok(group_joined_rows(rows))
        })
        .await
    }
}
