//! Plain-text command router for the conversational webhook.
//!
//! Recognised commands act on the sender's active campaign; anything else
//! starts a new campaign.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use regex::Regex;
use tracing::info;
use uuid::Uuid;

use super::session::SessionStore;
use crate::campaign::model::{Campaign, MessageStatus};
use crate::campaign::service::CampaignService;
use crate::pipeline::RunRequest;

const HELP_TEXT: &str = "Tell me who to reach and why, e.g. \"Reach out to 10 hotels in NYC about partnerships\".\n\
Then:\n\
- status: where your campaign stands\n\
- show <n>: read message n\n\
- edit <n> <text>: replace message n\n\
- approve all: approve every draft\n\
- send all: send every approved message\n\
- cancel: stop the campaign";

const NO_CAMPAIGN: &str =
    "You don't have an active campaign. Describe who you want to reach to start one, or say \"help\".";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Status,
    ApproveAll,
    SendAll,
    Cancel,
    Show(usize),
    Edit(usize, String),
    Create(String),
}

/// Parses message text into a [`Command`].
pub struct CommandParser {
    show: Regex,
    edit: Regex,
}

impl CommandParser {
    pub fn new() -> Self {
        Self {
            show: Regex::new(r"(?i)^show\s+#?(\d+)$").unwrap(),
            edit: Regex::new(r"(?is)^edit\s+#?(\d+)\s+(.+)$").unwrap(),
        }
    }

    pub fn parse(&self, text: &str) -> Command {
        let text = text.trim();
        let lowered = text.to_lowercase();
        match lowered.trim_end_matches(['.', '!']) {
            "help" | "?" | "commands" => return Command::Help,
            "status" => return Command::Status,
            "approve all" | "approve" => return Command::ApproveAll,
            "send all" | "send" => return Command::SendAll,
            "cancel" | "stop" => return Command::Cancel,
            _ => {}
        }
        if let Some(caps) = self.show.captures(text)
            && let Ok(n) = caps[1].parse()
        {
            return Command::Show(n);
        }
        if let Some(caps) = self.edit.captures(text)
            && let Ok(n) = caps[1].parse()
        {
            return Command::Edit(n, caps[2].trim().to_string());
        }
        Command::Create(text.to_string())
    }
}

impl Default for CommandParser {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ConversationRouter {
    service: Arc<CampaignService>,
    sessions: Arc<SessionStore>,
    parser: CommandParser,
}

impl ConversationRouter {
    pub fn new(service: Arc<CampaignService>, sessions: Arc<SessionStore>) -> Self {
        Self {
            service,
            sessions,
            parser: CommandParser::new(),
        }
    }

    /// Handle one inbound message and produce the reply text.
    pub async fn handle(&self, from: &str, body: &str, now: DateTime<Utc>) -> String {
        self.sessions.sweep(now).await;
        let session = self.sessions.touch(from, now).await;
        let command = self.parser.parse(body);
        info!(from = %from, command = command_label(&command), "Conversation command");

        let command = match command {
            Command::Help => return HELP_TEXT.to_string(),
            Command::Create(input) => return self.create(from, input).await,
            other => other,
        };

        let Some(campaign_id) = session.active_campaign else {
            return NO_CAMPAIGN.to_string();
        };
        let Some(campaign) = self.service.book().get(campaign_id).await else {
            self.sessions.set_campaign(from, None).await;
            return NO_CAMPAIGN.to_string();
        };

        match command {
            Command::Status => status_text(&campaign),
            Command::ApproveAll => match self.service.book().approve_all(campaign_id).await {
                Ok(outcome) => format!(
                    "Approved {} message(s). Say \"send all\" to send them.",
                    outcome.succeeded.len()
                ),
                Err(e) => format!("Couldn't approve: {e}"),
            },
            Command::SendAll => match self.service.book().send_all(campaign_id).await {
                Ok(outcome) if outcome.is_clean() => {
                    format!("Sent {} message(s).", outcome.succeeded.len())
                }
                Ok(outcome) => format!(
                    "Sent {} message(s), {} failed.",
                    outcome.succeeded.len(),
                    outcome.failed.len()
                ),
                Err(e) => format!("Couldn't send: {e}"),
            },
            Command::Cancel => match self.service.book().cancel(campaign_id).await {
                Ok(_) => {
                    self.sessions.set_campaign(from, None).await;
                    "Campaign cancelled.".to_string()
                }
                Err(e) => format!("Couldn't cancel: {e}"),
            },
            Command::Show(n) => match nth_message(&campaign, n) {
                Some(id) => show_text(&campaign, id, n),
                None => out_of_range(&campaign, n),
            },
            Command::Edit(n, text) => match nth_message(&campaign, n) {
                Some(id) => match self.service.book().edit(id, text, None).await {
                    Ok(_) => format!("Updated message {n}. It's still a draft."),
                    Err(e) => format!("Couldn't edit message {n}: {e}"),
                },
                None => out_of_range(&campaign, n),
            },
            Command::Help | Command::Create(_) => HELP_TEXT.to_string(),
        }
    }

    async fn create(&self, from: &str, input: String) -> String {
        let response = self
            .service
            .create(RunRequest::new(input).with_user(from))
            .await;

        match (response.campaign_id, response.error) {
            (Some(campaign_id), _) => {
                self.sessions.set_campaign(from, Some(campaign_id)).await;
                let mut reply = format!(
                    "Created \"{}\" with {} draft message(s).",
                    response.name.unwrap_or_default(),
                    response.stats.map(|s| s.messages_generated).unwrap_or(0)
                );
                if let Some(campaign) = self.service.book().get(campaign_id).await
                    && let Some(first) = campaign.messages().first()
                {
                    reply.push_str("\n\n");
                    reply.push_str(&show_text(&campaign, first.id, 1));
                }
                reply.push_str("\n\nSay \"approve all\" to approve, \"show <n>\" to read more, or \"help\".");
                reply
            }
            (None, Some(err)) => match err.suggestion {
                Some(suggestion) => format!("{} {}", err.message, suggestion),
                None => err.message,
            },
            (None, None) => "Something went wrong creating that campaign.".to_string(),
        }
    }
}

fn command_label(command: &Command) -> &'static str {
    match command {
        Command::Help => "help",
        Command::Status => "status",
        Command::ApproveAll => "approve_all",
        Command::SendAll => "send_all",
        Command::Cancel => "cancel",
        Command::Show(_) => "show",
        Command::Edit(..) => "edit",
        Command::Create(_) => "create",
    }
}

/// 1-based message lookup.
fn nth_message(campaign: &Campaign, n: usize) -> Option<Uuid> {
    n.checked_sub(1)
        .and_then(|i| campaign.messages().get(i))
        .map(|m| m.id)
}

fn out_of_range(campaign: &Campaign, n: usize) -> String {
    format!(
        "There's no message {n}. This campaign has {}.",
        campaign.messages().len()
    )
}

fn status_text(campaign: &Campaign) -> String {
    let stats = campaign.stats();
    let counts: Vec<String> = MessageStatus::ALL
        .iter()
        .filter_map(|s| {
            let n = stats.count(*s);
            (n > 0).then(|| format!("{n} {s}"))
        })
        .collect();
    format!(
        "{} ({})\n{} target(s), {} message(s): {}\n{}% done",
        campaign.name,
        campaign.status,
        stats.total_targets,
        stats.total_messages,
        counts.join(", "),
        campaign.progress_percent()
    )
}

fn show_text(campaign: &Campaign, message_id: Uuid, n: usize) -> String {
    let Some(message) = campaign.message(message_id) else {
        return out_of_range(campaign, n);
    };
    let target = campaign
        .target(message.target_id)
        .map(|t| t.name.as_str())
        .unwrap_or("unknown");
    let mut out = format!("Message {n} to {target} [{}]", message.status);
    if let Some(subject) = &message.subject {
        out.push_str(&format!("\nSubject: {subject}"));
    }
    out.push_str("\n\n");
    out.push_str(&message.body);
    out
}
