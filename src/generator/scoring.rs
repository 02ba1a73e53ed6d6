//! Personalization signals and the advisory quality score.

use crate::campaign::model::{Intent, Personalization, Purpose, Target};
use crate::config::ScoringPolicy;

use super::GenerationContext;

/// Record which signals were available for a draft, with audit hooks.
pub fn personalization(
    intent: &Intent,
    target: &Target,
    context: Option<&GenerationContext>,
) -> Personalization {
    let mut hooks = Vec::new();

    let company = target.company.as_deref().filter(|c| !c.trim().is_empty());
    if let Some(company) = company {
        hooks.push(format!("company: {company}"));
    }

    let niche = intent.target_niche.as_deref().filter(|n| !n.trim().is_empty());
    if let Some(niche) = niche {
        hooks.push(format!("niche: {niche}"));
    }

    let location = target
        .location
        .as_deref()
        .or(intent.location.as_deref())
        .filter(|l| !l.trim().is_empty());
    if let Some(location) = location {
        hooks.push(format!("location: {location}"));
    }

    let news = context
        .and_then(|c| c.recent_news.as_deref())
        .filter(|n| !n.trim().is_empty());
    if let Some(news) = news {
        hooks.push(format!("recent news: {news}"));
    }

    if let Some(ctx) = context {
        hooks.extend(
            ctx.custom_hooks
                .iter()
                .filter(|h| !h.trim().is_empty())
                .map(|h| format!("hook: {h}")),
        );
    }

    Personalization {
        company_reference: company.is_some(),
        niche_specific: niche.is_some(),
        location_specific: location.is_some(),
        news_reference: news.is_some(),
        hooks,
    }
}

/// `base` plus a weight per signal present and for a specific purpose, capped at 1.0.
pub fn quality_score(policy: &ScoringPolicy, p: &Personalization, purpose: Purpose) -> f32 {
    let mut score = policy.base;
    if p.company_reference {
        score += policy.company_weight;
    }
    if p.niche_specific {
        score += policy.niche_weight;
    }
    if p.location_specific {
        score += policy.location_weight;
    }
    if p.news_reference {
        score += policy.news_weight;
    }
    if purpose != Purpose::General {
        score += policy.purpose_weight;
    }
    score.clamp(0.0, 1.0)
}

/// Score for a follow-up derived from the original's.
pub fn follow_up_score(policy: &ScoringPolicy, original: f32) -> f32 {
    (original * policy.follow_up_decay).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::campaign::model::TargetType;

    #[test]
    fn bare_target_scores_base() {
        let intent = Intent::new(TargetType::Other, Purpose::General);
        let target = Target::new("Ana");
        let p = personalization(&intent, &target, None);
        assert_eq!(p.signal_count(), 0);
        assert!(p.hooks.is_empty());
        assert!((quality_score(&ScoringPolicy::default(), &p, intent.purpose) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn all_signals_score_capped() {
        let intent = Intent::new(TargetType::Hotel, Purpose::Partnership)
            .with_niche("boutique")
            .with_location("Miami, FL");
        let target = Target::new("Ana").with_company("Casa Ana");
        let ctx = GenerationContext {
            recent_news: Some("your new rooftop bar".into()),
            custom_hooks: vec!["met at SXSW".into()],
            ..GenerationContext::default()
        };
        let p = personalization(&intent, &target, Some(&ctx));
        assert_eq!(p.signal_count(), 4);
        assert_eq!(p.hooks.len(), 5);
        let score = quality_score(&ScoringPolicy::default(), &p, intent.purpose);
        assert!((score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn follow_up_decays() {
        let policy = ScoringPolicy::default();
        assert!((follow_up_score(&policy, 0.8) - 0.72).abs() < 1e-6);
    }
}
