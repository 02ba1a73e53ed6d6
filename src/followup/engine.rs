//! Stateless trigger evaluation.
//!
//! Each rule's precondition is the message's literal current status, never
//! "has passed through". A message that jumped from `sent` to `replied`
//! matches nothing.

use chrono::{DateTime, Utc};

use super::model::{FollowUpRule, FollowUpTrigger, TriggerType};
use crate::campaign::model::{MessageDraft, MessageStatus};

/// Which rules fire for `message` at `now`.
///
/// Pure and deterministic. Deduplication and attempt caps are the
/// scheduler's job.
pub fn evaluate(
    message: &MessageDraft,
    rules: &[FollowUpRule],
    now: DateTime<Utc>,
) -> Vec<FollowUpTrigger> {
    rules
        .iter()
        .filter(|rule| rule.is_active())
        .filter_map(|rule| match_rule(message, rule, now))
        .collect()
}

/// Whether the message's current status still satisfies the trigger.
pub fn precondition_holds(trigger: TriggerType, status: MessageStatus) -> bool {
    match trigger {
        TriggerType::UnopenedAfterHours => {
            matches!(status, MessageStatus::Sent | MessageStatus::Delivered)
        }
        TriggerType::OpenedNoReply => status == MessageStatus::Opened,
        TriggerType::ClickedNoReply => status == MessageStatus::Clicked,
        TriggerType::Bounced => status == MessageStatus::Bounced,
        TriggerType::Manual => false,
    }
}

fn match_rule(
    message: &MessageDraft,
    rule: &FollowUpRule,
    now: DateTime<Utc>,
) -> Option<FollowUpTrigger> {
    if !precondition_holds(rule.trigger, message.status) {
        return None;
    }

    let (anchor_at, due_at) = match rule.trigger {
        TriggerType::UnopenedAfterHours => {
            let sent_at = message.sent_at()?;
            if now - sent_at < rule.delay() {
                return None;
            }
            (sent_at, now)
        }
        TriggerType::OpenedNoReply => {
            let opened_at = message.status_at(MessageStatus::Opened)?;
            (opened_at, (opened_at + rule.delay()).max(now))
        }
        TriggerType::ClickedNoReply => {
            let clicked_at = message.status_at(MessageStatus::Clicked)?;
            (clicked_at, (clicked_at + rule.delay()).max(now))
        }
        TriggerType::Bounced => {
            let bounced_at = message.status_at(MessageStatus::Bounced).unwrap_or(now);
            (bounced_at, now)
        }
        TriggerType::Manual => return None,
    };

    Some(FollowUpTrigger {
        rule_id: rule.id,
        message_id: message.id,
        trigger: rule.trigger,
        anchor_at,
        due_at,
    })
}
