//! Template catalogs for initial outreach and follow-ups.
//!
//! Initial selection order, first match wins:
//! 1. exact `(target_type, purpose)`
//! 2. generic `(None, purpose)`
//! 3. generic `(None, General)`
//! 4. the catalog's built-in fallback
//!
//! Follow-up selection is by trigger type, falling back to a generic nudge.

use serde::{Deserialize, Serialize};

use crate::campaign::model::{Purpose, TargetType};
use crate::followup::model::TriggerType;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub id: String,
    /// `None` matches any target type.
    #[serde(default)]
    pub target_type: Option<TargetType>,
    pub purpose: Purpose,
    pub subject: String,
    pub body: String,
}

impl Template {
    fn new(
        id: &str,
        target_type: Option<TargetType>,
        purpose: Purpose,
        subject: &str,
        body: &str,
    ) -> Self {
        Self {
            id: id.to_string(),
            target_type,
            purpose,
            subject: subject.to_string(),
            body: body.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FollowUpTemplate {
    pub id: String,
    /// `None` is the generic follow-up.
    #[serde(default)]
    pub trigger: Option<TriggerType>,
    pub subject: String,
    pub body: String,
}

impl FollowUpTemplate {
    fn new(id: &str, trigger: Option<TriggerType>, subject: &str, body: &str) -> Self {
        Self {
            id: id.to_string(),
            trigger,
            subject: subject.to_string(),
            body: body.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TemplateCatalog {
    initial: Vec<Template>,
    follow_ups: Vec<FollowUpTemplate>,
    fallback: Template,
    follow_up_fallback: FollowUpTemplate,
}

impl TemplateCatalog {
    /// Catalog with caller-supplied templates and the built-in fallbacks.
    pub fn new(initial: Vec<Template>, follow_ups: Vec<FollowUpTemplate>) -> Self {
        Self {
            initial,
            follow_ups,
            fallback: builtin_fallback(),
            follow_up_fallback: builtin_follow_up_fallback(),
        }
    }

    /// The shipped template set.
    pub fn builtin() -> Self {
        Self::new(builtin_initial(), builtin_follow_ups())
    }

    pub fn select(&self, target_type: TargetType, purpose: Purpose) -> &Template {
        let exact = self
            .initial
            .iter()
            .find(|t| t.target_type == Some(target_type) && t.purpose == purpose);
        let generic = || {
            self.initial
                .iter()
                .find(|t| t.target_type.is_none() && t.purpose == purpose)
        };
        let general = || {
            self.initial
                .iter()
                .find(|t| t.target_type.is_none() && t.purpose == Purpose::General)
        };
        exact
            .or_else(generic)
            .or_else(general)
            .unwrap_or(&self.fallback)
    }

    pub fn select_follow_up(&self, trigger: TriggerType) -> &FollowUpTemplate {
        self.follow_ups
            .iter()
            .find(|t| t.trigger == Some(trigger))
            .or_else(|| self.follow_ups.iter().find(|t| t.trigger.is_none()))
            .unwrap_or(&self.follow_up_fallback)
    }
}

impl Default for TemplateCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

fn builtin_fallback() -> Template {
    Template::new(
        "builtin.fallback",
        None,
        Purpose::General,
        "Quick note",
        "{{greeting}}\n\n\
         I'm reaching out about {{purpose_description}}. {{hook_line}}\n\n\
         Would you be open to a short conversation?\n\n\
         {{sign_off}}",
    )
}

fn builtin_follow_up_fallback() -> FollowUpTemplate {
    FollowUpTemplate::new(
        "builtin.follow_up",
        None,
        "Re: {{original_subject}}",
        "{{greeting}}\n\n\
         Just following up on my earlier message about {{purpose_description}}.\n\n\
         {{sign_off}}",
    )
}

fn builtin_initial() -> Vec<Template> {
    use Purpose::*;
    use TargetType::*;
    vec![
        Template::new(
            "restaurant.partnership",
            Some(RestaurantOwner),
            Partnership,
            "Partnership idea for {{company}}",
            "{{greeting}}\n\n\
             I've been following {{company}} and love what you're doing in {{location}}. {{news_line}}\n\n\
             We work with {{niche}} restaurants on {{purpose_description}}, and I think there's a natural fit. {{hook_line}}\n\n\
             Would you be open to a 15-minute call next week?\n\n\
             {{sign_off}}",
        ),
        Template::new(
            "hotel.partnership",
            Some(Hotel),
            Partnership,
            "A partnership idea for {{company}} guests",
            "{{greeting}}\n\n\
             I'm reaching out to a few hotels in {{location}} about {{purpose_description}}. {{news_line}}\n\n\
             {{company}} stood out, and I'd love to explore how we could add value for your guests. {{hook_line}}\n\n\
             Could we find 15 minutes to talk?\n\n\
             {{sign_off}}",
        ),
        Template::new(
            "creator.brand_deal",
            Some(Creator),
            BrandDeal,
            "Brand deal for {{name}}",
            "{{greeting}}\n\n\
             Big fan of your {{niche}} content. {{news_line}}\n\n\
             We're putting together a paid collaboration around {{purpose_description}} and you'd be a great fit. {{hook_line}}\n\n\
             Open to hearing the details?\n\n\
             {{sign_off}}",
        ),
        Template::new(
            "influencer.brand_deal",
            Some(Influencer),
            BrandDeal,
            "Paid partnership for {{name}}",
            "{{greeting}}\n\n\
             Your {{niche}} audience is exactly who we want to reach. {{news_line}}\n\n\
             We'd love to work with you on {{purpose_description}}. {{hook_line}}\n\n\
             Can I send over the brief?\n\n\
             {{sign_off}}",
        ),
        Template::new(
            "gym.sponsorship",
            Some(Gym),
            Sponsorship,
            "Sponsoring {{company}}",
            "{{greeting}}\n\n\
             We're looking to sponsor a handful of gyms in {{location}} and {{company}} is at the top of our list. {{news_line}}\n\n\
             The idea is {{purpose_description}}. {{hook_line}}\n\n\
             Would you like to hear more?\n\n\
             {{sign_off}}",
        ),
        Template::new(
            "founder.networking",
            Some(Founder),
            Networking,
            "Founder to founder",
            "{{greeting}}\n\n\
             I'm also building a {{niche}} company and have been following {{company}}. {{news_line}}\n\n\
             I'd love to swap notes on {{purpose_description}}. {{hook_line}}\n\n\
             Up for a quick virtual coffee?\n\n\
             {{sign_off}}",
        ),
        Template::new(
            "investor.investment",
            Some(Investor),
            Investment,
            "Intro: raising for our {{niche}} company",
            "{{greeting}}\n\n\
             I'm reaching out because {{company}} backs {{niche}} founders. {{news_line}}\n\n\
             We're raising and I'd value your take on {{purpose_description}}. {{hook_line}}\n\n\
             Could I send a short deck?\n\n\
             {{sign_off}}",
        ),
        Template::new(
            "small_business.sales",
            Some(SmallBusiness),
            Sales,
            "Helping {{company}} grow",
            "{{greeting}}\n\n\
             I help local businesses in {{location}} with {{purpose_description}}. {{news_line}}\n\n\
             I think {{company}} could see results quickly. {{hook_line}}\n\n\
             Worth a quick chat?\n\n\
             {{sign_off}}",
        ),
        Template::new(
            "generic.partnership",
            None,
            Partnership,
            "Partnership idea for {{company}}",
            "{{greeting}}\n\n\
             I'm exploring partnerships with {{target_type}} and {{company}} stood out. {{news_line}}\n\n\
             The idea: {{purpose_description}}. {{hook_line}}\n\n\
             Would you be open to a short call?\n\n\
             {{sign_off}}",
        ),
        Template::new(
            "generic.sales",
            None,
            Sales,
            "An idea for {{company}}",
            "{{greeting}}\n\n\
             I work with {{target_type}} on {{purpose_description}}. {{news_line}}\n\n\
             {{hook_line}} I'd love to show you how it could work for {{company}}.\n\n\
             Do you have 15 minutes this week?\n\n\
             {{sign_off}}",
        ),
        Template::new(
            "generic.brand_deal",
            None,
            BrandDeal,
            "Collaboration opportunity",
            "{{greeting}}\n\n\
             We'd love to partner with you on a paid brand deal around {{purpose_description}}. {{news_line}}\n\n\
             {{hook_line}} Interested in the details?\n\n\
             {{sign_off}}",
        ),
        Template::new(
            "generic.collaboration",
            None,
            Collaboration,
            "Let's collaborate",
            "{{greeting}}\n\n\
             I think there's a great collaboration to be had around {{purpose_description}}. {{news_line}}\n\n\
             {{hook_line}} Want to brainstorm together?\n\n\
             {{sign_off}}",
        ),
        Template::new(
            "generic.sponsorship",
            None,
            Sponsorship,
            "Sponsorship opportunity",
            "{{greeting}}\n\n\
             We're looking for partners to sponsor around {{purpose_description}}. {{news_line}}\n\n\
             {{hook_line}} Would {{company}} be interested?\n\n\
             {{sign_off}}",
        ),
        Template::new(
            "generic.hiring",
            None,
            Hiring,
            "A role you might like",
            "{{greeting}}\n\n\
             I came across your work as {{title}} and wanted to reach out about {{purpose_description}}. {{news_line}}\n\n\
             {{hook_line}} Open to a quick conversation?\n\n\
             {{sign_off}}",
        ),
        Template::new(
            "generic.investment",
            None,
            Investment,
            "Investment opportunity",
            "{{greeting}}\n\n\
             I'm reaching out about {{purpose_description}}. {{news_line}}\n\n\
             {{hook_line}} Could I share a few details?\n\n\
             {{sign_off}}",
        ),
        Template::new(
            "generic.networking",
            None,
            Networking,
            "Would love to connect",
            "{{greeting}}\n\n\
             I've been following {{company}} and would love to connect about {{purpose_description}}. {{news_line}}\n\n\
             {{hook_line}} Coffee or a quick call sometime?\n\n\
             {{sign_off}}",
        ),
        Template::new(
            "generic.feedback",
            None,
            Feedback,
            "Quick question",
            "{{greeting}}\n\n\
             I'm gathering input from {{target_type}} on {{purpose_description}}. {{news_line}}\n\n\
             {{hook_line}} Would you be willing to share your perspective in a 10-minute call?\n\n\
             {{sign_off}}",
        ),
        Template::new(
            "generic.general",
            None,
            General,
            "Reaching out",
            "{{greeting}}\n\n\
             I'm reaching out about {{purpose_description}}. {{news_line}}\n\n\
             {{hook_line}} Would you be open to a short conversation?\n\n\
             {{sign_off}}",
        ),
    ]
}

fn builtin_follow_ups() -> Vec<FollowUpTemplate> {
    use TriggerType::*;
    vec![
        FollowUpTemplate::new(
            "follow_up.unopened",
            Some(UnopenedAfterHours),
            "Re: {{original_subject}}",
            "{{greeting}}\n\n\
             Bumping this in case it got buried. I'd still love to talk about {{purpose_description}}.\n\n\
             {{sign_off}}",
        ),
        FollowUpTemplate::new(
            "follow_up.opened",
            Some(OpenedNoReply),
            "Re: {{original_subject}}",
            "{{greeting}}\n\n\
             Following up on my note about {{purpose_description}}. Happy to answer any questions or send more details.\n\n\
             {{sign_off}}",
        ),
        FollowUpTemplate::new(
            "follow_up.clicked",
            Some(ClickedNoReply),
            "Re: {{original_subject}}",
            "{{greeting}}\n\n\
             Glad you had a chance to look. Would it help to walk through {{purpose_description}} together on a quick call?\n\n\
             {{sign_off}}",
        ),
        FollowUpTemplate::new(
            "follow_up.bounced",
            Some(Bounced),
            "{{original_subject}}",
            "{{greeting}}\n\n\
             My earlier message didn't reach you, so I'm trying again. I'm reaching out about {{purpose_description}}.\n\n\
             {{sign_off}}",
        ),
        FollowUpTemplate::new(
            "follow_up.manual",
            Some(Manual),
            "Re: {{original_subject}}",
            "{{greeting}}\n\n\
             Circling back on {{purpose_description}}. Let me know if now is a better time.\n\n\
             {{sign_off}}",
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match_wins() {
        let catalog = TemplateCatalog::builtin();
        let t = catalog.select(TargetType::RestaurantOwner, Purpose::Partnership);
        assert_eq!(t.id, "restaurant.partnership");
    }

    #[test]
    fn generic_purpose_next() {
        let catalog = TemplateCatalog::builtin();
        let t = catalog.select(TargetType::Realtor, Purpose::Partnership);
        assert_eq!(t.id, "generic.partnership");
    }

    #[test]
    fn generic_general_then_builtin() {
        let catalog = TemplateCatalog::new(
            vec![Template::new("g", None, Purpose::General, "s", "b")],
            Vec::new(),
        );
        assert_eq!(catalog.select(TargetType::Hotel, Purpose::Hiring).id, "g");

        let empty = TemplateCatalog::new(Vec::new(), Vec::new());
        assert_eq!(empty.select(TargetType::Hotel, Purpose::Hiring).id, "builtin.fallback");
    }

    #[test]
    fn every_purpose_has_a_generic_template() {
        let catalog = TemplateCatalog::builtin();
        for purpose in Purpose::ALL {
            assert!(
                catalog
                    .initial
                    .iter()
                    .any(|t| t.target_type.is_none() && t.purpose == purpose),
                "no generic template for {purpose}"
            );
        }
    }

    #[test]
    fn follow_up_by_trigger_with_fallback() {
        let catalog = TemplateCatalog::builtin();
        assert_eq!(
            catalog.select_follow_up(TriggerType::OpenedNoReply).id,
            "follow_up.opened"
        );
        let empty = TemplateCatalog::new(Vec::new(), Vec::new());
        assert_eq!(
            empty.select_follow_up(TriggerType::Bounced).id,
            "builtin.follow_up"
        );
    }
}
