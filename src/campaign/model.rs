//! Campaign data model: intents, targets, message drafts, and the campaign aggregate.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::error::ApprovalError;

/// Lowest and highest target count an intent may carry.
pub const MIN_COUNT: u32 = 1;
pub const MAX_COUNT: u32 = 100;

/// Normalize free text into a snake_case key for lenient enum parsing.
fn normalize_key(s: &str) -> String {
    s.trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect::<String>()
        .split('_')
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

// ── Channel ─────────────────────────────────────────────────────────

/// Delivery medium for a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Email,
    Dm,
    Whatsapp,
    #[default]
    Unset,
}

impl Channel {
    /// Only email carries a subject line.
    pub fn supports_subject(&self) -> bool {
        matches!(self, Self::Email)
    }

    /// Coerce free text to a channel, `Unset` when unrecognized.
    pub fn parse_lenient(s: &str) -> Self {
        match normalize_key(s).as_str() {
            "email" | "e_mail" | "mail" | "cold_email" => Self::Email,
            "dm" | "direct_message" | "instagram" | "instagram_dm" | "twitter" | "x"
            | "linkedin" | "tiktok" | "social" => Self::Dm,
            "whatsapp" | "whats_app" | "wa" | "sms" | "text" => Self::Whatsapp,
            _ => Self::Unset,
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Email => write!(f, "email"),
            Self::Dm => write!(f, "dm"),
            Self::Whatsapp => write!(f, "whatsapp"),
            Self::Unset => write!(f, "unset"),
        }
    }
}

impl std::str::FromStr for Channel {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "email" => Ok(Self::Email),
            "dm" => Ok(Self::Dm),
            "whatsapp" => Ok(Self::Whatsapp),
            "unset" => Ok(Self::Unset),
            _ => Err(format!("Unknown channel: {}", s)),
        }
    }
}

// ── Target type ─────────────────────────────────────────────────────

/// Kind of recipient the campaign is aimed at. Unknown kinds map to `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetType {
    RestaurantOwner,
    Hotel,
    Creator,
    Influencer,
    Founder,
    Executive,
    Agency,
    Retailer,
    Realtor,
    Gym,
    SmallBusiness,
    Investor,
    #[default]
    Other,
}

impl TargetType {
    pub const ALL: [TargetType; 13] = [
        Self::RestaurantOwner,
        Self::Hotel,
        Self::Creator,
        Self::Influencer,
        Self::Founder,
        Self::Executive,
        Self::Agency,
        Self::Retailer,
        Self::Realtor,
        Self::Gym,
        Self::SmallBusiness,
        Self::Investor,
        Self::Other,
    ];

    /// Businesses reached in a professional capacity.
    pub fn is_business(&self) -> bool {
        !matches!(self, Self::Creator | Self::Influencer | Self::Other)
    }

    /// Audiences that live on social platforms.
    pub fn is_social(&self) -> bool {
        matches!(self, Self::Creator | Self::Influencer)
    }

    /// Human-readable plural ("restaurant owners").
    pub fn plural(&self) -> &'static str {
        match self {
            Self::RestaurantOwner => "restaurant owners",
            Self::Hotel => "hotels",
            Self::Creator => "creators",
            Self::Influencer => "influencers",
            Self::Founder => "founders",
            Self::Executive => "executives",
            Self::Agency => "agencies",
            Self::Retailer => "retailers",
            Self::Realtor => "realtors",
            Self::Gym => "gyms",
            Self::SmallBusiness => "small businesses",
            Self::Investor => "investors",
            Self::Other => "contacts",
        }
    }

    /// Coerce free text to a target type, `Other` when unrecognized.
    pub fn parse_lenient(s: &str) -> Self {
        let key = normalize_key(s);
        if let Ok(t) = key.parse() {
            return t;
        }
        let singular = key.strip_suffix('s').unwrap_or(&key);
        match singular {
            "restaurant" | "restaurant_owner" | "cafe" | "bar" | "bakerie" | "bakery" => {
                Self::RestaurantOwner
            }
            "hotel" | "motel" | "resort" | "hospitality" => Self::Hotel,
            "creator" | "content_creator" | "youtuber" | "streamer" | "podcaster" => {
                Self::Creator
            }
            "influencer" | "instagrammer" | "tiktoker" => Self::Influencer,
            "founder" | "startup" | "startup_founder" | "ceo" | "entrepreneur" => Self::Founder,
            "executive" | "vp" | "director" | "cmo" | "cto" => Self::Executive,
            "agency" | "agencie" | "marketing_agency" => Self::Agency,
            "retailer" | "store" | "shop" | "boutique" => Self::Retailer,
            "realtor" | "real_estate_agent" | "broker" => Self::Realtor,
            "gym" | "fitness_studio" | "studio" => Self::Gym,
            "small_business" | "small_businesse" | "business" | "businesse" | "local_business" => {
                Self::SmallBusiness
            }
            "investor" | "vc" | "angel" | "angel_investor" => Self::Investor,
            _ => Self::Other,
        }
    }
}

impl std::fmt::Display for TargetType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::RestaurantOwner => "restaurant_owner",
            Self::Hotel => "hotel",
            Self::Creator => "creator",
            Self::Influencer => "influencer",
            Self::Founder => "founder",
            Self::Executive => "executive",
            Self::Agency => "agency",
            Self::Retailer => "retailer",
            Self::Realtor => "realtor",
            Self::Gym => "gym",
            Self::SmallBusiness => "small_business",
            Self::Investor => "investor",
            Self::Other => "other",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for TargetType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|t| t.to_string() == s)
            .copied()
            .ok_or_else(|| format!("Unknown target type: {}", s))
    }
}

// ── Purpose ─────────────────────────────────────────────────────────

/// Why the outreach is happening. Unknown purposes map to `General`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Purpose {
    Partnership,
    Sales,
    BrandDeal,
    Collaboration,
    Sponsorship,
    Hiring,
    Investment,
    Networking,
    Feedback,
    #[default]
    General,
}

impl Purpose {
    pub const ALL: [Purpose; 10] = [
        Self::Partnership,
        Self::Sales,
        Self::BrandDeal,
        Self::Collaboration,
        Self::Sponsorship,
        Self::Hiring,
        Self::Investment,
        Self::Networking,
        Self::Feedback,
        Self::General,
    ];

    /// Short noun phrase used in rendered copy and campaign names.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Partnership => "partnership",
            Self::Sales => "sales",
            Self::BrandDeal => "brand deal",
            Self::Collaboration => "collaboration",
            Self::Sponsorship => "sponsorship",
            Self::Hiring => "hiring",
            Self::Investment => "investment",
            Self::Networking => "networking",
            Self::Feedback => "feedback",
            Self::General => "general",
        }
    }

    /// Coerce free text to a purpose, `General` when unrecognized.
    pub fn parse_lenient(s: &str) -> Self {
        let key = normalize_key(s);
        if let Ok(p) = key.parse() {
            return p;
        }
        match key.as_str() {
            "partnerships" | "partner" | "partnering" => Self::Partnership,
            "sell" | "selling" | "sale" | "demo" | "pitch" => Self::Sales,
            "brand_deals" | "brand" | "promotion" | "paid_promotion" => Self::BrandDeal,
            "collab" | "collabs" | "collaborations" | "collaborate" => Self::Collaboration,
            "sponsor" | "sponsorships" | "sponsoring" => Self::Sponsorship,
            "hire" | "recruiting" | "recruitment" | "job" => Self::Hiring,
            "invest" | "funding" | "fundraising" | "raise" => Self::Investment,
            "network" | "connect" | "intro" | "introduction" => Self::Networking,
            "survey" | "research" | "interview" => Self::Feedback,
            _ => Self::General,
        }
    }
}

impl std::fmt::Display for Purpose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Partnership => "partnership",
            Self::Sales => "sales",
            Self::BrandDeal => "brand_deal",
            Self::Collaboration => "collaboration",
            Self::Sponsorship => "sponsorship",
            Self::Hiring => "hiring",
            Self::Investment => "investment",
            Self::Networking => "networking",
            Self::Feedback => "feedback",
            Self::General => "general",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for Purpose {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|p| p.to_string() == s)
            .copied()
            .ok_or_else(|| format!("Unknown purpose: {}", s))
    }
}

// ── Tone ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tone {
    #[default]
    Professional,
    Casual,
    Direct,
    Friendly,
}

impl Tone {
    /// Coerce free text to a tone, `Professional` when unrecognized.
    pub fn parse_lenient(s: &str) -> Self {
        match normalize_key(s).as_str() {
            "casual" | "relaxed" | "informal" | "chill" => Self::Casual,
            "direct" | "brief" | "short" | "concise" | "blunt" => Self::Direct,
            "friendly" | "warm" | "upbeat" => Self::Friendly,
            _ => Self::Professional,
        }
    }
}

impl std::fmt::Display for Tone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Professional => write!(f, "professional"),
            Self::Casual => write!(f, "casual"),
            Self::Direct => write!(f, "direct"),
            Self::Friendly => write!(f, "friendly"),
        }
    }
}

impl std::str::FromStr for Tone {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "professional" => Ok(Self::Professional),
            "casual" => Ok(Self::Casual),
            "direct" => Ok(Self::Direct),
            "friendly" => Ok(Self::Friendly),
            _ => Err(format!("Unknown tone: {}", s)),
        }
    }
}

// ── Intent ──────────────────────────────────────────────────────────

/// Clamp any requested count into `[MIN_COUNT, MAX_COUNT]`.
pub fn clamp_count(n: i64) -> u32 {
    n.clamp(MIN_COUNT as i64, MAX_COUNT as i64) as u32
}

fn deserialize_count<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = f64::deserialize(deserializer)?;
    Ok(clamp_count(raw.round() as i64))
}

/// Structured interpretation of a free-text outreach request.
///
/// Never mutated in place: channel resolution produces a new value via
/// [`Intent::with_channel`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    pub channel: Channel,
    pub target_type: TargetType,
    #[serde(default)]
    pub target_niche: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    pub purpose: Purpose,
    #[serde(default)]
    pub purpose_description: String,
    #[serde(deserialize_with = "deserialize_count")]
    pub count: u32,
    pub tone: Tone,
    pub confidence: f32,
}

impl Intent {
    /// Create an intent with defaults for everything but type and purpose.
    pub fn new(target_type: TargetType, purpose: Purpose) -> Self {
        Self {
            channel: Channel::Unset,
            target_type,
            target_niche: None,
            location: None,
            purpose,
            purpose_description: String::new(),
            count: 10,
            tone: Tone::Professional,
            confidence: 1.0,
        }
    }

    pub fn with_count(mut self, count: i64) -> Self {
        self.count = clamp_count(count);
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_niche(mut self, niche: impl Into<String>) -> Self {
        self.target_niche = Some(niche.into());
        self
    }

    pub fn with_tone(mut self, tone: Tone) -> Self {
        self.tone = tone;
        self
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    pub fn with_purpose_description(mut self, description: impl Into<String>) -> Self {
        self.purpose_description = description.into();
        self
    }

    /// Return a copy with the channel resolved.
    pub fn with_channel(&self, channel: Channel) -> Self {
        Self {
            channel,
            ..self.clone()
        }
    }

    pub fn needs_clarification(&self, threshold: f32) -> bool {
        self.confidence < threshold
    }

    /// Human-readable campaign name derived from the intent.
    pub fn campaign_name(&self) -> String {
        let mut purpose = self.purpose.label().to_string();
        if let Some(first) = purpose.get_mut(0..1) {
            first.make_ascii_uppercase();
        }
        match self.location.as_deref() {
            Some(loc) => format!(
                "{} outreach: {} {} in {}",
                purpose,
                self.count,
                self.target_type.plural(),
                loc
            ),
            None => format!(
                "{} outreach: {} {}",
                purpose,
                self.count,
                self.target_type.plural()
            ),
        }
    }
}

// ── Target ──────────────────────────────────────────────────────────

/// How complete a target's contact data is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataQuality {
    High,
    Medium,
    Low,
}

impl DataQuality {
    /// High: handle and company. Medium: handle only. Low: no handle.
    pub fn derive(contact_handle: Option<&str>, company: Option<&str>) -> Self {
        let has_handle = contact_handle.is_some_and(|h| !h.trim().is_empty());
        let has_company = company.is_some_and(|c| !c.trim().is_empty());
        match (has_handle, has_company) {
            (true, true) => Self::High,
            (true, false) => Self::Medium,
            (false, _) => Self::Low,
        }
    }
}

/// A prospective recipient discovered for one campaign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub id: Uuid,
    pub name: String,
    pub title: Option<String>,
    pub company: Option<String>,
    pub contact_handle: Option<String>,
    pub location: Option<String>,
    pub relevance_score: f32,
    pub data_quality: DataQuality,
    pub discovered_at: DateTime<Utc>,
}

impl Target {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            title: None,
            company: None,
            contact_handle: None,
            location: None,
            relevance_score: 0.5,
            data_quality: DataQuality::Low,
            discovered_at: Utc::now(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_company(mut self, company: impl Into<String>) -> Self {
        self.company = Some(company.into());
        self.refresh_quality();
        self
    }

    pub fn with_contact(mut self, handle: impl Into<String>) -> Self {
        self.contact_handle = Some(handle.into());
        self.refresh_quality();
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_relevance(mut self, score: f32) -> Self {
        self.relevance_score = score.clamp(0.0, 1.0);
        self
    }

    fn refresh_quality(&mut self) {
        self.data_quality =
            DataQuality::derive(self.contact_handle.as_deref(), self.company.as_deref());
    }

    /// First token of the name, if the name is usable.
    pub fn first_name(&self) -> Option<&str> {
        self.name.split_whitespace().next()
    }
}

// ── Message draft ───────────────────────────────────────────────────

/// Lifecycle status of a single message. Declaration order is lifecycle order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Draft,
    Approved,
    Rejected,
    Sending,
    Sent,
    Failed,
    Delivered,
    Opened,
    Clicked,
    Replied,
    Bounced,
}

impl MessageStatus {
    pub const ALL: [MessageStatus; 11] = [
        Self::Draft,
        Self::Approved,
        Self::Rejected,
        Self::Sending,
        Self::Sent,
        Self::Failed,
        Self::Delivered,
        Self::Opened,
        Self::Clicked,
        Self::Replied,
        Self::Bounced,
    ];

    /// No further transition is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Rejected | Self::Failed | Self::Bounced | Self::Replied
        )
    }

    /// The message left our hands (sent or any later engagement state).
    pub fn is_outbound(&self) -> bool {
        matches!(
            self,
            Self::Sent | Self::Delivered | Self::Opened | Self::Clicked | Self::Replied | Self::Bounced
        )
    }
}

impl std::fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Draft => "draft",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Sending => "sending",
            Self::Sent => "sent",
            Self::Failed => "failed",
            Self::Delivered => "delivered",
            Self::Opened => "opened",
            Self::Clicked => "clicked",
            Self::Replied => "replied",
            Self::Bounced => "bounced",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for MessageStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|st| st.to_string() == s)
            .copied()
            .ok_or_else(|| format!("Unknown message status: {}", s))
    }
}

/// What was personalized in a draft, for audit and scoring.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Personalization {
    pub company_reference: bool,
    pub niche_specific: bool,
    pub location_specific: bool,
    pub news_reference: bool,
    #[serde(default)]
    pub hooks: Vec<String>,
}

impl Personalization {
    pub fn signal_count(&self) -> usize {
        [
            self.company_reference,
            self.niche_specific,
            self.location_specific,
            self.news_reference,
        ]
        .iter()
        .filter(|s| **s)
        .count()
    }
}

/// Link from a follow-up draft back to what produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FollowUpLink {
    pub original_message_id: Uuid,
    pub rule_id: Uuid,
    pub attempt_number: u32,
}

/// One generated message tied to exactly one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageDraft {
    pub id: Uuid,
    pub target_id: Uuid,
    pub channel: Channel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub body: String,
    pub tone: Tone,
    pub personalization: Personalization,
    pub quality_score: f32,
    pub status: MessageStatus,
    /// When each status this message passed through was entered.
    pub status_history: BTreeMap<MessageStatus, DateTime<Utc>>,
    /// Template the body was rendered from.
    #[serde(default)]
    pub template_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub follow_up: Option<FollowUpLink>,
    /// Last delivery error, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Transport-assigned id once sent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MessageDraft {
    /// Create a new draft. Subjects are dropped on channels that don't support them.
    pub fn new(
        target_id: Uuid,
        channel: Channel,
        subject: Option<String>,
        body: impl Into<String>,
        tone: Tone,
    ) -> Self {
        let now = Utc::now();
        let mut status_history = BTreeMap::new();
        status_history.insert(MessageStatus::Draft, now);
        Self {
            id: Uuid::new_v4(),
            target_id,
            channel,
            subject: subject.filter(|_| channel.supports_subject()),
            body: body.into(),
            tone,
            personalization: Personalization::default(),
            quality_score: 0.5,
            status: MessageStatus::Draft,
            status_history,
            template_id: String::new(),
            follow_up: None,
            last_error: None,
            transport_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_personalization(mut self, personalization: Personalization) -> Self {
        self.personalization = personalization;
        self
    }

    pub fn with_quality(mut self, score: f32) -> Self {
        self.quality_score = score.clamp(0.0, 1.0);
        self
    }

    pub fn with_template(mut self, template_id: impl Into<String>) -> Self {
        self.template_id = template_id.into();
        self
    }

    pub fn with_follow_up(mut self, link: FollowUpLink) -> Self {
        self.follow_up = Some(link);
        self
    }

    /// Move to `to` if the approval state machine allows it.
    pub fn transition(&mut self, to: MessageStatus, at: DateTime<Utc>) -> Result<(), ApprovalError> {
        if !crate::campaign::approval::can_transition(self.status, to) {
            return Err(ApprovalError::InvalidTransition {
                id: self.id,
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.status_history.insert(to, at);
        self.updated_at = at;
        Ok(())
    }

    /// When the message entered `status`, if it ever did.
    pub fn status_at(&self, status: MessageStatus) -> Option<DateTime<Utc>> {
        self.status_history.get(&status).copied()
    }

    pub fn sent_at(&self) -> Option<DateTime<Utc>> {
        self.status_at(MessageStatus::Sent)
    }
}

// ── Campaign ────────────────────────────────────────────────────────

/// Derived counters. Always a pure function of the campaign's messages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CampaignStats {
    pub total_targets: usize,
    pub total_messages: usize,
    pub by_status: BTreeMap<MessageStatus, usize>,
    pub average_quality: f32,
}

impl CampaignStats {
    pub fn compute(total_targets: usize, messages: &[MessageDraft]) -> Self {
        let mut by_status = BTreeMap::new();
        for msg in messages {
            *by_status.entry(msg.status).or_insert(0) += 1;
        }
        let average_quality = if messages.is_empty() {
            0.0
        } else {
            messages.iter().map(|m| m.quality_score).sum::<f32>() / messages.len() as f32
        };
        Self {
            total_targets,
            total_messages: messages.len(),
            by_status,
            average_quality,
        }
    }

    pub fn count(&self, status: MessageStatus) -> usize {
        self.by_status.get(&status).copied().unwrap_or(0)
    }
}

/// Per-campaign follow-up and tracking settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignSettings {
    pub follow_up_enabled: bool,
    pub follow_up_delay_hours: u32,
    pub max_follow_up_attempts: u32,
    pub track_opens: bool,
    pub track_clicks: bool,
}

impl Default for CampaignSettings {
    fn default() -> Self {
        Self {
            follow_up_enabled: true,
            follow_up_delay_hours: 72,
            max_follow_up_attempts: 3,
            track_opens: true,
            track_clicks: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    #[default]
    Active,
    Completed,
    Cancelled,
}

impl CampaignStatus {
    pub fn is_closed(&self) -> bool {
        !matches!(self, Self::Active)
    }
}

impl std::fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Completed => write!(f, "completed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for CampaignStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Unknown campaign status: {}", s)),
        }
    }
}

/// Every persisted part of a campaign. Stats are recomputed on conversion.
#[derive(Debug, Clone, Deserialize)]
pub struct CampaignParts {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub user_id: Option<String>,
    pub intent: Intent,
    #[serde(default)]
    pub channel_rationale: String,
    pub targets: Vec<Target>,
    pub messages: Vec<MessageDraft>,
    pub settings: CampaignSettings,
    #[serde(default)]
    pub status: CampaignStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<CampaignParts> for Campaign {
    fn from(p: CampaignParts) -> Self {
        let stats = CampaignStats::compute(p.targets.len(), &p.messages);
        Self {
            id: p.id,
            name: p.name,
            user_id: p.user_id,
            intent: p.intent,
            channel_rationale: p.channel_rationale,
            targets: p.targets,
            messages: p.messages,
            stats,
            settings: p.settings,
            status: p.status,
            created_at: p.created_at,
            updated_at: p.updated_at,
        }
    }
}

/// Listing row for a campaign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignSummary {
    pub id: Uuid,
    pub name: String,
    pub status: CampaignStatus,
    pub channel: Channel,
    pub total_messages: usize,
    pub created_at: DateTime<Utc>,
}

impl From<&Campaign> for CampaignSummary {
    fn from(c: &Campaign) -> Self {
        Self {
            id: c.id,
            name: c.name.clone(),
            status: c.status,
            channel: c.intent.channel,
            total_messages: c.messages.len(),
            created_at: c.created_at,
        }
    }
}

/// The aggregate produced by one orchestration run.
///
/// Targets are fixed at assembly. Messages only change through the
/// approval state machine, and every change recomputes `stats`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "CampaignParts")]
pub struct Campaign {
    pub id: Uuid,
    pub name: String,
    pub user_id: Option<String>,
    pub intent: Intent,
    pub channel_rationale: String,
    targets: Vec<Target>,
    messages: Vec<MessageDraft>,
    stats: CampaignStats,
    pub settings: CampaignSettings,
    pub status: CampaignStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Campaign {
    /// Assemble a campaign from already-validated pipeline outputs.
    pub fn assemble(
        intent: Intent,
        channel_rationale: impl Into<String>,
        targets: Vec<Target>,
        messages: Vec<MessageDraft>,
        settings: CampaignSettings,
        user_id: Option<String>,
    ) -> Self {
        let now = Utc::now();
        let stats = CampaignStats::compute(targets.len(), &messages);
        Self {
            id: Uuid::new_v4(),
            name: intent.campaign_name(),
            user_id,
            intent,
            channel_rationale: channel_rationale.into(),
            targets,
            messages,
            stats,
            settings,
            status: CampaignStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    pub fn messages(&self) -> &[MessageDraft] {
        &self.messages
    }

    pub fn stats(&self) -> &CampaignStats {
        &self.stats
    }

    pub fn target(&self, id: Uuid) -> Option<&Target> {
        self.targets.iter().find(|t| t.id == id)
    }

    pub fn message(&self, id: Uuid) -> Option<&MessageDraft> {
        self.messages.iter().find(|m| m.id == id)
    }

    /// Stats computed from scratch, for comparison with the stored value.
    pub fn recompute_stats(&self) -> CampaignStats {
        CampaignStats::compute(self.targets.len(), &self.messages)
    }

    /// Apply `f` to one message, then refresh stats and `updated_at`.
    pub(crate) fn update_message<T, E>(
        &mut self,
        id: Uuid,
        f: impl FnOnce(&mut MessageDraft) -> Result<T, E>,
    ) -> Option<Result<T, E>> {
        let msg = self.messages.iter_mut().find(|m| m.id == id)?;
        let result = f(msg);
        self.refresh();
        Some(result)
    }

    /// Append a message (follow-ups). Its target must belong to this campaign.
    pub(crate) fn push_message(&mut self, message: MessageDraft) -> bool {
        if self.target(message.target_id).is_none() {
            return false;
        }
        self.messages.push(message);
        self.refresh();
        true
    }

    pub(crate) fn set_status(&mut self, status: CampaignStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }

    fn refresh(&mut self) {
        self.stats = self.recompute_stats();
        self.updated_at = Utc::now();
    }

    /// Percentage of messages that reached a settled state (sent or terminal).
    pub fn progress_percent(&self) -> u8 {
        if self.messages.is_empty() {
            return 0;
        }
        let settled = self
            .messages
            .iter()
            .filter(|m| m.status.is_outbound() || m.status.is_terminal())
            .count();
        ((settled * 100) / self.messages.len()) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_campaign() -> Campaign {
        let intent = Intent::new(TargetType::Hotel, Purpose::Partnership)
            .with_count(2)
            .with_location("New York, NY");
        let t1 = Target::new("Ann Lee").with_company("Hotel One").with_contact("ann@one.com");
        let t2 = Target::new("Bo Chen").with_contact("bo@two.com");
        let m1 = MessageDraft::new(t1.id, Channel::Email, Some("Hi".into()), "body", Tone::Casual)
            .with_quality(0.8);
        let m2 = MessageDraft::new(t2.id, Channel::Email, None, "body", Tone::Casual)
            .with_quality(0.6);
        Campaign::assemble(
            intent.with_channel(Channel::Email),
            "explicit",
            vec![t1, t2],
            vec![m1, m2],
            CampaignSettings::default(),
            None,
        )
    }

    #[test]
    fn count_is_clamped() {
        assert_eq!(clamp_count(500), 100);
        assert_eq!(clamp_count(0), 1);
        assert_eq!(clamp_count(-3), 1);
        assert_eq!(clamp_count(42), 42);
        let intent = Intent::new(TargetType::Hotel, Purpose::General).with_count(500);
        assert_eq!(intent.count, 100);
    }

    #[test]
    fn deserialized_count_is_clamped() {
        let json = r#"{"channel":"unset","target_type":"hotel","purpose":"general","count":500,"tone":"casual","confidence":0.9}"#;
        let intent: Intent = serde_json::from_str(json).unwrap();
        assert_eq!(intent.count, 100);
        let json = r#"{"channel":"unset","target_type":"hotel","purpose":"general","count":0,"tone":"casual","confidence":0.9}"#;
        let intent: Intent = serde_json::from_str(json).unwrap();
        assert_eq!(intent.count, 1);
    }

    #[test]
    fn with_channel_returns_new_value() {
        let intent = Intent::new(TargetType::Creator, Purpose::BrandDeal);
        let resolved = intent.with_channel(Channel::Dm);
        assert_eq!(intent.channel, Channel::Unset);
        assert_eq!(resolved.channel, Channel::Dm);
    }

    #[test]
    fn lenient_parsing_falls_back() {
        assert_eq!(TargetType::parse_lenient("Restaurants"), TargetType::RestaurantOwner);
        assert_eq!(TargetType::parse_lenient("hotels"), TargetType::Hotel);
        assert_eq!(TargetType::parse_lenient("space pirates"), TargetType::Other);
        assert_eq!(Purpose::parse_lenient("brand-deal"), Purpose::BrandDeal);
        assert_eq!(Purpose::parse_lenient("world domination"), Purpose::General);
        assert_eq!(Channel::parse_lenient("Instagram DM"), Channel::Unset);
        assert_eq!(Channel::parse_lenient("instagram"), Channel::Dm);
        assert_eq!(Channel::parse_lenient("pigeon"), Channel::Unset);
        assert_eq!(Tone::parse_lenient("warm"), Tone::Friendly);
    }

    #[test]
    fn enum_display_parse_roundtrip() {
        for t in TargetType::ALL {
            assert_eq!(t.to_string().parse::<TargetType>().unwrap(), t);
        }
        for p in Purpose::ALL {
            assert_eq!(p.to_string().parse::<Purpose>().unwrap(), p);
        }
        for s in MessageStatus::ALL {
            assert_eq!(s.to_string().parse::<MessageStatus>().unwrap(), s);
        }
    }

    #[test]
    fn data_quality_derivation() {
        assert_eq!(DataQuality::derive(Some("a@b.com"), Some("Acme")), DataQuality::High);
        assert_eq!(DataQuality::derive(Some("a@b.com"), None), DataQuality::Medium);
        assert_eq!(DataQuality::derive(None, Some("Acme")), DataQuality::Low);
        assert_eq!(DataQuality::derive(Some("  "), Some("Acme")), DataQuality::Low);
        let t = Target::new("X").with_company("Acme").with_contact("x@acme.com");
        assert_eq!(t.data_quality, DataQuality::High);
    }

    #[test]
    fn subject_dropped_for_non_email() {
        let m = MessageDraft::new(Uuid::new_v4(), Channel::Dm, Some("Subj".into()), "b", Tone::Casual);
        assert!(m.subject.is_none());
        let m = MessageDraft::new(Uuid::new_v4(), Channel::Email, Some("Subj".into()), "b", Tone::Casual);
        assert_eq!(m.subject.as_deref(), Some("Subj"));
    }

    #[test]
    fn stats_are_computed_at_assembly() {
        let campaign = sample_campaign();
        let stats = campaign.stats();
        assert_eq!(stats.total_targets, 2);
        assert_eq!(stats.total_messages, 2);
        assert_eq!(stats.count(MessageStatus::Draft), 2);
        assert!((stats.average_quality - 0.7).abs() < 1e-5);
        assert_eq!(*stats, campaign.recompute_stats());
    }

    #[test]
    fn update_message_refreshes_stats() {
        let mut campaign = sample_campaign();
        let id = campaign.messages()[0].id;
        let result = campaign.update_message(id, |m| m.transition(MessageStatus::Approved, Utc::now()));
        assert!(matches!(result, Some(Ok(()))));
        assert_eq!(campaign.stats().count(MessageStatus::Approved), 1);
        assert_eq!(campaign.stats().count(MessageStatus::Draft), 1);
        assert_eq!(*campaign.stats(), campaign.recompute_stats());
    }

    #[test]
    fn push_message_rejects_foreign_target() {
        let mut campaign = sample_campaign();
        let stray = MessageDraft::new(Uuid::new_v4(), Channel::Email, None, "x", Tone::Casual);
        assert!(!campaign.push_message(stray));
        assert_eq!(campaign.messages().len(), 2);
    }

    #[test]
    fn deserialization_recomputes_stats() {
        let campaign = sample_campaign();
        let mut json = serde_json::to_value(&campaign).unwrap();
        json["stats"]["total_messages"] = serde_json::json!(999);
        let loaded: Campaign = serde_json::from_value(json).unwrap();
        assert_eq!(loaded.stats().total_messages, 2);
        assert_eq!(loaded, campaign);
    }

    #[test]
    fn campaign_name_from_intent() {
        let intent = Intent::new(TargetType::Hotel, Purpose::Partnership)
            .with_count(10)
            .with_location("NYC");
        assert_eq!(intent.campaign_name(), "Partnership outreach: 10 hotels in NYC");
    }

    #[test]
    fn progress_counts_settled_messages() {
        let mut campaign = sample_campaign();
        assert_eq!(campaign.progress_percent(), 0);
        let id = campaign.messages()[0].id;
        campaign.update_message(id, |m| m.transition(MessageStatus::Rejected, Utc::now()));
        assert_eq!(campaign.progress_percent(), 50);
    }
}
