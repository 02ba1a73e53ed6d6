//! Follow-up rules, triggers, and scheduled actions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::campaign::model::Tone;

/// What condition a rule reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    /// Sent or delivered, never opened, for at least `delay_hours`.
    UnopenedAfterHours,
    /// Opened but not clicked or replied, `delay_hours` after the open.
    OpenedNoReply,
    /// Clicked but not replied, `delay_hours` after the click.
    ClickedNoReply,
    /// Bounced, regardless of delay.
    Bounced,
    /// Only fired by an explicit request.
    Manual,
}

impl std::fmt::Display for TriggerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnopenedAfterHours => write!(f, "unopened_after_hours"),
            Self::OpenedNoReply => write!(f, "opened_no_reply"),
            Self::ClickedNoReply => write!(f, "clicked_no_reply"),
            Self::Bounced => write!(f, "bounced"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

impl std::str::FromStr for TriggerType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unopened_after_hours" => Ok(Self::UnopenedAfterHours),
            "opened_no_reply" => Ok(Self::OpenedNoReply),
            "clicked_no_reply" => Ok(Self::ClickedNoReply),
            "bounced" => Ok(Self::Bounced),
            "manual" => Ok(Self::Manual),
            _ => Err(format!("Unknown trigger type: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleStatus {
    #[default]
    Active,
    Paused,
    Completed,
}

impl std::fmt::Display for RuleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Paused => write!(f, "paused"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

impl std::str::FromStr for RuleStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "paused" => Ok(Self::Paused),
            "completed" => Ok(Self::Completed),
            _ => Err(format!("Unknown rule status: {}", s)),
        }
    }
}

/// A re-engagement policy scoped to one campaign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FollowUpRule {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub trigger: TriggerType,
    pub delay_hours: u32,
    /// Overrides the built-in follow-up template when set.
    #[serde(default)]
    pub body_template: Option<String>,
    pub tone: Tone,
    pub max_attempts: u32,
    #[serde(default)]
    pub status: RuleStatus,
    pub created_at: DateTime<Utc>,
}

impl FollowUpRule {
    pub fn new(campaign_id: Uuid, trigger: TriggerType, delay_hours: u32, max_attempts: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            campaign_id,
            trigger,
            delay_hours,
            body_template: None,
            tone: Tone::Professional,
            max_attempts: max_attempts.max(1),
            status: RuleStatus::Active,
            created_at: Utc::now(),
        }
    }

    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.body_template = Some(template.into());
        self
    }

    pub fn with_tone(mut self, tone: Tone) -> Self {
        self.tone = tone;
        self
    }

    pub fn is_active(&self) -> bool {
        self.status == RuleStatus::Active
    }

    pub fn delay(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::from(self.delay_hours))
    }
}

/// A rule that matched one message at one instant. Output of `evaluate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FollowUpTrigger {
    pub rule_id: Uuid,
    pub message_id: Uuid,
    pub trigger: TriggerType,
    /// The event the delay was measured from (send, open, click, bounce).
    pub anchor_at: DateTime<Utc>,
    /// Earliest moment the follow-up may go out.
    pub due_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Pending,
    /// Claimed by one processor run; no other run may touch it.
    InFlight,
    Sent,
    Skipped,
    Failed,
}

impl ActionStatus {
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Pending | Self::InFlight)
    }
}

impl std::fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::InFlight => write!(f, "in_flight"),
            Self::Sent => write!(f, "sent"),
            Self::Skipped => write!(f, "skipped"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for ActionStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_flight" => Ok(Self::InFlight),
            "sent" => Ok(Self::Sent),
            "skipped" => Ok(Self::Skipped),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Unknown action status: {}", s)),
        }
    }
}

/// One scheduled instance of a rule applied to one original message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FollowUpAction {
    pub id: Uuid,
    pub rule_id: Uuid,
    pub campaign_id: Uuid,
    pub message_id: Uuid,
    pub trigger: TriggerType,
    pub scheduled_at: DateTime<Utc>,
    pub status: ActionStatus,
    pub attempt_number: u32,
    #[serde(default)]
    pub follow_up_message_id: Option<Uuid>,
    #[serde(default)]
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FollowUpAction {
    pub fn pending(
        rule: &FollowUpRule,
        message_id: Uuid,
        scheduled_at: DateTime<Utc>,
        attempt_number: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            rule_id: rule.id,
            campaign_id: rule.campaign_id,
            message_id,
            trigger: rule.trigger,
            scheduled_at,
            status: ActionStatus::Pending,
            attempt_number,
            follow_up_message_id: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }
}
