//! Message generation: template selection, rendering, and scoring.
//!
//! `MessageGenerator` is the deterministic template path. It is also the
//! per-target fallback whenever a richer `DraftWriter` (the LLM writer)
//! fails or times out.

pub mod llm;
pub mod render;
pub mod scoring;
pub mod templates;

pub use llm::LlmDraftWriter;
pub use render::{RenderContext, Renderer};
pub use templates::{FollowUpTemplate, Template, TemplateCatalog};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::campaign::model::{FollowUpLink, Intent, MessageDraft, Target, Tone};
use crate::config::ScoringPolicy;
use crate::error::PipelineError;
use crate::followup::model::FollowUpRule;

/// Optional enrichment supplied by the caller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationContext {
    #[serde(default)]
    pub recent_news: Option<String>,
    #[serde(default)]
    pub custom_hooks: Vec<String>,
    /// Overrides the generator's sender name for this draft.
    #[serde(default)]
    pub sender_name: Option<String>,
}

/// Produces one draft for one target.
#[async_trait]
pub trait DraftWriter: Send + Sync {
    fn name(&self) -> &str;

    async fn write(
        &self,
        intent: &Intent,
        target: &Target,
        context: Option<&GenerationContext>,
    ) -> Result<MessageDraft, PipelineError>;
}

fn greeting(tone: Tone, first_name: Option<&str>) -> String {
    match (tone, first_name) {
        (Tone::Professional, Some(n)) => format!("Hi {n},"),
        (Tone::Casual, Some(n)) => format!("Hey {n}!"),
        (Tone::Direct, Some(n)) => format!("{n},"),
        (Tone::Friendly, Some(n)) => format!("Hi {n}!"),
        (Tone::Casual, None) => "Hey there!".to_string(),
        (Tone::Friendly, None) => "Hi there!".to_string(),
        (Tone::Professional | Tone::Direct, None) => "Hello,".to_string(),
    }
}

fn sign_off(tone: Tone, sender: &str) -> String {
    let closing = match tone {
        Tone::Professional => "Best regards,",
        Tone::Casual => "Cheers,",
        Tone::Direct => "Thanks,",
        Tone::Friendly => "Warmly,",
    };
    format!("{closing}\n{sender}")
}

/// Make sure a free-text fragment reads as a sentence.
fn sentence(text: &str) -> String {
    let text = text.trim();
    if text.ends_with(['.', '!', '?']) {
        text.to_string()
    } else {
        format!("{text}.")
    }
}

pub struct MessageGenerator {
    catalog: TemplateCatalog,
    renderer: Renderer,
    policy: ScoringPolicy,
    sender_name: String,
}

impl MessageGenerator {
    pub fn new(catalog: TemplateCatalog, policy: ScoringPolicy) -> Self {
        Self {
            catalog,
            renderer: Renderer::new(),
            policy,
            sender_name: render::neutral_default("sender_name").to_string(),
        }
    }

    pub fn with_sender_name(mut self, sender_name: impl Into<String>) -> Self {
        self.sender_name = sender_name.into();
        self
    }

    pub fn policy(&self) -> &ScoringPolicy {
        &self.policy
    }

    fn base_context(
        &self,
        intent: &Intent,
        target: &Target,
        tone: Tone,
        context: Option<&GenerationContext>,
    ) -> RenderContext {
        let first_name = target.first_name().filter(|n| !n.trim().is_empty());
        let sender = context
            .and_then(|c| c.sender_name.as_deref())
            .unwrap_or(&self.sender_name);

        let mut ctx = RenderContext::new();
        ctx.set("greeting", greeting(tone, first_name))
            .set("sign_off", sign_off(tone, sender))
            .set("sender_name", sender)
            .set_opt("first_name", first_name)
            .set("name", target.name.as_str())
            .set_opt("company", target.company.as_deref())
            .set_opt("title", target.title.as_deref())
            .set_opt(
                "location",
                target.location.as_deref().or(intent.location.as_deref()),
            )
            .set_opt("niche", intent.target_niche.as_deref())
            .set("target_type", intent.target_type.plural())
            .set("purpose", intent.purpose.label())
            .set("purpose_description", intent.purpose_description.as_str());

        if let Some(ctx_in) = context {
            if let Some(news) = ctx_in.recent_news.as_deref().filter(|n| !n.trim().is_empty()) {
                ctx.set("news", news)
                    .set("news_line", format!("I saw {} and had to reach out.", news.trim()));
            }
            if let Some(hook) = ctx_in.custom_hooks.iter().find(|h| !h.trim().is_empty()) {
                ctx.set("hook_line", sentence(hook));
            }
        }
        ctx
    }

    /// Placeholders only survive rendering when a supplied value carried one.
    fn warn_on_leftovers(&self, template_id: &str, subject: &str, body: &str) {
        if self.renderer.has_placeholders(subject) || self.renderer.has_placeholders(body) {
            warn!(template_id, "Rendered message contains a literal placeholder from a supplied value");
        }
    }

    /// Render a first-touch draft. Deterministic apart from the draft id and timestamps.
    pub fn generate(
        &self,
        intent: &Intent,
        target: &Target,
        context: Option<&GenerationContext>,
    ) -> MessageDraft {
        let template = self.catalog.select(intent.target_type, intent.purpose);
        let ctx = self.base_context(intent, target, intent.tone, context);

        let subject = self.renderer.render(&template.subject, &ctx);
        let body = self.renderer.render(&template.body, &ctx);
        self.warn_on_leftovers(&template.id, &subject, &body);
        let personalization = scoring::personalization(intent, target, context);
        let quality = scoring::quality_score(&self.policy, &personalization, intent.purpose);

        MessageDraft::new(target.id, intent.channel, Some(subject), body, intent.tone)
            .with_personalization(personalization)
            .with_quality(quality)
            .with_template(template.id.as_str())
    }

    /// Render a follow-up to `original` for a fired rule.
    pub fn generate_follow_up(
        &self,
        original: &MessageDraft,
        intent: &Intent,
        target: &Target,
        rule: &FollowUpRule,
        attempt_number: u32,
    ) -> MessageDraft {
        let template = self.catalog.select_follow_up(rule.trigger);
        let mut ctx = self.base_context(intent, target, rule.tone, None);
        ctx.set_opt("original_subject", original.subject.as_deref())
            .set("attempt", attempt_number.to_string());

        let subject = self.renderer.render(&template.subject, &ctx);
        let (body, template_id) = match rule.body_template.as_deref() {
            Some(custom) if !custom.trim().is_empty() => {
                (self.renderer.render(custom, &ctx), format!("rule:{}", rule.id))
            }
            _ => (self.renderer.render(&template.body, &ctx), template.id.clone()),
        };
        self.warn_on_leftovers(&template_id, &subject, &body);

        MessageDraft::new(target.id, original.channel, Some(subject), body, rule.tone)
            .with_personalization(original.personalization.clone())
            .with_quality(scoring::follow_up_score(&self.policy, original.quality_score))
            .with_template(template_id)
            .with_follow_up(FollowUpLink {
                original_message_id: original.id,
                rule_id: rule.id,
                attempt_number,
            })
    }
}

impl Default for MessageGenerator {
    fn default() -> Self {
        Self::new(TemplateCatalog::builtin(), ScoringPolicy::default())
    }
}

#[async_trait]
impl DraftWriter for MessageGenerator {
    fn name(&self) -> &str {
        "template"
    }

    async fn write(
        &self,
        intent: &Intent,
        target: &Target,
        context: Option<&GenerationContext>,
    ) -> Result<MessageDraft, PipelineError> {
        Ok(self.generate(intent, target, context))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::campaign::model::{Channel, MessageStatus, Purpose, TargetType};
    use crate::followup::model::TriggerType;

    fn intent() -> Intent {
        Intent::new(TargetType::RestaurantOwner, Purpose::Partnership)
            .with_location("New York, NY")
            .with_niche("vegan")
            .with_purpose_description("a co-branded tasting menu")
            .with_channel(Channel::Email)
    }

    fn target() -> Target {
        Target::new("Ana Ruiz")
            .with_company("Casa Ana")
            .with_contact("ana@casa.com")
    }

    #[test]
    fn renders_selected_template() {
        let generator = MessageGenerator::default().with_sender_name("Sam");
        let draft = generator.generate(&intent(), &target(), None);
        assert_eq!(draft.template_id, "restaurant.partnership");
        assert_eq!(draft.subject.as_deref(), Some("Partnership idea for Casa Ana"));
        assert!(draft.body.starts_with("Hi Ana,"));
        assert!(draft.body.contains("vegan restaurants"));
        assert!(draft.body.contains("a co-branded tasting menu"));
        assert!(draft.body.ends_with("Best regards,\nSam"));
        assert!(!draft.body.contains("{{"));
        assert_eq!(draft.status, MessageStatus::Draft);
    }

    #[test]
    fn generation_is_deterministic() {
        let generator = MessageGenerator::default();
        let (i, t) = (intent(), target());
        let a = generator.generate(&i, &t, None);
        let b = generator.generate(&i, &t, None);
        assert_eq!(a.body, b.body);
        assert_eq!(a.subject, b.subject);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn nameless_target_gets_neutral_salutation() {
        let target = Target::new("   ").with_company("Somewhere");
        let draft = MessageGenerator::default().generate(&intent(), &target, None);
        assert!(draft.body.starts_with("Hello,"));
    }

    #[test]
    fn dm_drafts_have_no_subject() {
        let i = Intent::new(TargetType::Creator, Purpose::BrandDeal)
            .with_tone(Tone::Casual)
            .with_channel(Channel::Dm);
        let draft = MessageGenerator::default().generate(&i, &Target::new("Jo"), None);
        assert!(draft.subject.is_none());
        assert!(draft.body.starts_with("Hey Jo!"));
        assert!(draft.body.contains("Big fan of your content."));
    }

    #[test]
    fn context_adds_news_and_hook() {
        let ctx = GenerationContext {
            recent_news: Some("your second location opening".into()),
            custom_hooks: vec!["we met at the Brooklyn food fair".into()],
            sender_name: Some("Riley".into()),
        };
        let draft = MessageGenerator::default().generate(&intent(), &target(), Some(&ctx));
        assert!(draft.body.contains("I saw your second location opening"));
        assert!(draft.body.contains("we met at the Brooklyn food fair."));
        assert!(draft.body.ends_with("Riley"));
        assert!(draft.personalization.news_reference);
    }

    #[test]
    fn caller_text_is_kept_verbatim() {
        let i = intent().with_purpose_description("a tasting menu  (two  seatings)");
        let ctx = GenerationContext {
            custom_hooks: vec!["ask about {{company}}  pricing".into()],
            ..Default::default()
        };
        let draft = MessageGenerator::default().generate(&i, &target(), Some(&ctx));
        assert!(draft.body.contains("a tasting menu  (two  seatings)"));
        assert!(draft.body.contains("ask about {{company}}  pricing."));
    }

    #[test]
    fn follow_up_decays_quality_and_links_back() {
        let generator = MessageGenerator::default();
        let (i, t) = (intent(), target());
        let original = generator.generate(&i, &t, None);
        let rule = FollowUpRule::new(uuid::Uuid::new_v4(), TriggerType::UnopenedAfterHours, 72, 3);
        let follow_up = generator.generate_follow_up(&original, &i, &t, &rule, 1);
        assert_eq!(follow_up.template_id, "follow_up.unopened");
        assert_eq!(
            follow_up.subject.as_deref(),
            Some("Re: Partnership idea for Casa Ana")
        );
        assert!((follow_up.quality_score - original.quality_score * 0.9).abs() < 1e-6);
        let link = follow_up.follow_up.unwrap();
        assert_eq!(link.original_message_id, original.id);
        assert_eq!(link.attempt_number, 1);
        assert_eq!(follow_up.target_id, t.id);
    }

    #[test]
    fn rule_template_overrides_body() {
        let generator = MessageGenerator::default();
        let (i, t) = (intent(), target());
        let original = generator.generate(&i, &t, None);
        let rule = FollowUpRule::new(uuid::Uuid::new_v4(), TriggerType::Manual, 0, 1)
            .with_template("{{greeting}} one last try on {{purpose_description}}.");
        let follow_up = generator.generate_follow_up(&original, &i, &t, &rule, 1);
        assert_eq!(follow_up.body, "Hi Ana, one last try on a co-branded tasting menu.");
        assert!(follow_up.template_id.starts_with("rule:"));
    }
}
