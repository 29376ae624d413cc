//! Reward-request eligibility.
//!
//! The `create_reward_request` command carries the request snapshot captured
//! by the gateway. The handler reads the event type and its condition from
//! the body, looks up the caller's progress and reports whether the caller
//! qualifies.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Timelike, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::broker::CommandEnvelope;
use crate::worker::handler::{CommandHandler, HandlerError};

/// Pattern handled by [`RewardRequestHandler`].
pub const CREATE_REWARD_REQUEST: &str = "create_reward_request";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    Login,
    FriendInvitation,
    LevelUp,
    TimePeriod,
    Achievement,
    Purchase,
    DailyMission,
    ItemCollection,
}

/// Condition attached to an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventCondition {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_data: Option<Value>,
}

impl EventCondition {
    pub fn new(kind: impl Into<String>, value: i64) -> Self {
        Self {
            kind: kind.into(),
            value,
            additional_data: None,
        }
    }

    pub fn with_additional_data(mut self, data: Value) -> Self {
        self.additional_data = Some(data);
        self
    }

    /// Raw `additionalData.timeRange`, if the condition carries one.
    fn time_range(&self) -> Option<&Value> {
        self.additional_data.as_ref()?.get("timeRange")
    }
}

/// `{startHour, endHour}` as a pair of hours. `None` when either bound is
/// missing, negative or does not fit a `u32`.
fn hour_range(range: &Value) -> Option<(u32, u32)> {
    let start = u32::try_from(range.get("startHour")?.as_u64()?).ok()?;
    let end = u32::try_from(range.get("endHour")?.as_u64()?).ok()?;
    Some((start, end))
}

/// Source of per-user progress. `Ok(None)` means no record for the user.
#[async_trait]
pub trait EventDataProvider: Send + Sync {
    async fn login_streak(&self, user_id: &str) -> Result<Option<i64>, HandlerError>;
    async fn friend_invitation_count(&self, user_id: &str) -> Result<Option<i64>, HandlerError>;
    async fn user_level(&self, user_id: &str) -> Result<Option<i64>, HandlerError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UserProgress {
    pub login_streak: i64,
    pub friend_invitations: i64,
    pub level: i64,
}

/// Process-local [`EventDataProvider`].
#[derive(Debug, Default)]
pub struct InMemoryEventData {
    users: DashMap<String, UserProgress>,
}

impl InMemoryEventData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, user_id: impl Into<String>, progress: UserProgress) {
        self.users.insert(user_id.into(), progress);
    }

    fn field(&self, user_id: &str, f: fn(&UserProgress) -> i64) -> Option<i64> {
        self.users.get(user_id).map(|p| f(p.value()))
    }
}

#[async_trait]
impl EventDataProvider for InMemoryEventData {
    async fn login_streak(&self, user_id: &str) -> Result<Option<i64>, HandlerError> {
        Ok(self.field(user_id, |p| p.login_streak))
    }

    async fn friend_invitation_count(&self, user_id: &str) -> Result<Option<i64>, HandlerError> {
        Ok(self.field(user_id, |p| p.friend_invitations))
    }

    async fn user_level(&self, user_id: &str) -> Result<Option<i64>, HandlerError> {
        Ok(self.field(user_id, |p| p.level))
    }
}

/// Checks one event type's condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionValidator {
    LoginStreak,
    FriendInvitation,
    LevelUp,
    TimePeriod,
    Unsupported,
}

impl ConditionValidator {
    pub fn for_event(event_type: EventType) -> Self {
        match event_type {
            EventType::Login => ConditionValidator::LoginStreak,
            EventType::FriendInvitation => ConditionValidator::FriendInvitation,
            EventType::LevelUp => ConditionValidator::LevelUp,
            EventType::TimePeriod => ConditionValidator::TimePeriod,
            _ => ConditionValidator::Unsupported,
        }
    }

    pub async fn validate(
        &self,
        data: &dyn EventDataProvider,
        user_id: &str,
        condition: &EventCondition,
        now: DateTime<Utc>,
    ) -> Result<bool, HandlerError> {
        let at_least = |v: Option<i64>| v.is_some_and(|v| v >= condition.value);

        match self {
            ConditionValidator::LoginStreak => Ok(at_least(data.login_streak(user_id).await?)),
            ConditionValidator::FriendInvitation => {
                Ok(at_least(data.friend_invitation_count(user_id).await?))
            }
            ConditionValidator::LevelUp => Ok(at_least(data.user_level(user_id).await?)),
            ConditionValidator::TimePeriod => Ok(match condition.time_range() {
                None => true,
                Some(range) => match hour_range(range) {
                    Some((start, end)) => (start..end).contains(&now.hour()),
                    None => false,
                },
            }),
            ConditionValidator::Unsupported => Ok(false),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RewardRequestBody {
    event_type: EventType,
    condition: EventCondition,
}

/// Handles `create_reward_request`.
pub struct RewardRequestHandler {
    data: Arc<dyn EventDataProvider>,
}

impl RewardRequestHandler {
    pub fn new(data: Arc<dyn EventDataProvider>) -> Self {
        Self { data }
    }
}

#[async_trait]
impl CommandHandler for RewardRequestHandler {
    async fn handle(&self, envelope: &CommandEnvelope) -> Result<Value, HandlerError> {
        let payload = envelope.payload();
        let user_id = payload
            .pointer("/user/userId")
            .and_then(Value::as_str)
            .ok_or_else(|| HandlerError::InvalidPayload("missing user".into()))?;
        let body: RewardRequestBody = payload
            .get("body")
            .cloned()
            .ok_or_else(|| HandlerError::InvalidPayload("missing body".into()))
            .and_then(|b| {
                serde_json::from_value(b).map_err(|e| HandlerError::InvalidPayload(e.to_string()))
            })?;

        let eligible = ConditionValidator::for_event(body.event_type)
            .validate(self.data.as_ref(), user_id, &body.condition, Utc::now())
            .await?;

        tracing::info!(
            user_id = %user_id,
            event_type = ?body.event_type,
            eligible,
            message_id = %envelope.message_id(),
            "Reward request evaluated"
        );

        Ok(json!({
            "userId": user_id,
            "eventType": body.event_type,
            "eligible": eligible,
        }))
    }
}
