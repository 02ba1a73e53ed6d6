//! Flat export of a campaign's messages.
//!
//! A pure projection of the aggregate: one record per message, joined with
//! its target.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::model::{Campaign, MessageStatus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportRecord {
    pub target: String,
    pub contact_handle: Option<String>,
    pub company: Option<String>,
    pub subject: Option<String>,
    pub body: String,
    pub status: MessageStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Json,
    Csv,
}

impl ExportFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Json => "application/json",
            Self::Csv => "text/csv; charset=utf-8",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json => write!(f, "json"),
            Self::Csv => write!(f, "csv"),
        }
    }
}

impl FromStr for ExportFormat {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            other => Err(format!("Unknown export format: {other}")),
        }
    }
}

/// One record per message, in message order.
pub fn records(campaign: &Campaign) -> Vec<ExportRecord> {
    campaign
        .messages()
        .iter()
        .map(|m| {
            let target = campaign.target(m.target_id);
            ExportRecord {
                target: target.map(|t| t.name.clone()).unwrap_or_default(),
                contact_handle: target.and_then(|t| t.contact_handle.clone()),
                company: target.and_then(|t| t.company.clone()),
                subject: m.subject.clone(),
                body: m.body.clone(),
                status: m.status,
            }
        })
        .collect()
}

pub fn to_json(campaign: &Campaign) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(&records(campaign))
}

const CSV_HEADER: [&str; 6] = ["target", "contact_handle", "company", "subject", "body", "status"];

/// RFC 4180: CRLF line endings, fields quoted when they hold a comma,
/// quote, or line break, inner quotes doubled.
pub fn to_csv(campaign: &Campaign) -> String {
    let mut out = String::new();
    push_row(&mut out, CSV_HEADER.iter().copied());
    for r in records(campaign) {
        let status = r.status.to_string();
        push_row(
            &mut out,
            [
                r.target.as_str(),
                r.contact_handle.as_deref().unwrap_or(""),
                r.company.as_deref().unwrap_or(""),
                r.subject.as_deref().unwrap_or(""),
                r.body.as_str(),
                status.as_str(),
            ],
        );
    }
    out
}

fn push_row<'a>(out: &mut String, fields: impl IntoIterator<Item = &'a str>) {
    for (i, field) in fields.into_iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&escape(field));
    }
    out.push_str("\r\n");
}

fn escape(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Render in the requested format.
pub fn render(campaign: &Campaign, format: ExportFormat) -> Result<String, serde_json::Error> {
    match format {
        ExportFormat::Json => to_json(campaign),
        ExportFormat::Csv => Ok(to_csv(campaign)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::campaign::model::{
        CampaignSettings, Channel, Intent, MessageDraft, Purpose, Target, TargetType, Tone,
    };

    fn campaign() -> Campaign {
        let intent = Intent::new(TargetType::Hotel, Purpose::Partnership).with_channel(Channel::Email);
        let t1 = Target::new("Ann Lee")
            .with_company("Hotel One, Inc.")
            .with_contact("ann@one.com");
        let t2 = Target::new("Bo Chen");
        let m1 = MessageDraft::new(
            t1.id,
            Channel::Email,
            Some("Say \"hi\"".into()),
            "Hi Ann,\nLine two",
            Tone::Professional,
        );
        let m2 = MessageDraft::new(t2.id, Channel::Email, None, "Hello Bo", Tone::Professional);
        Campaign::assemble(intent, "explicit", vec![t1, t2], vec![m1, m2], CampaignSettings::default(), None)
    }

    #[test]
    fn records_join_targets() {
        let rows = records(&campaign());
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].target, "Ann Lee");
        assert_eq!(rows[0].contact_handle.as_deref(), Some("ann@one.com"));
        assert_eq!(rows[1].company, None);
        assert_eq!(rows[1].status, MessageStatus::Draft);
    }

    #[test]
    fn csv_quotes_per_rfc4180() {
        let csv = to_csv(&campaign());
        let mut lines = csv.split("\r\n");
        assert_eq!(
            lines.next().unwrap(),
            "target,contact_handle,company,subject,body,status"
        );
        assert!(csv.contains(
            "Ann Lee,ann@one.com,\"Hotel One, Inc.\",\"Say \"\"hi\"\"\",\"Hi Ann,\nLine two\",draft\r\n"
        ));
        assert!(csv.ends_with("Bo Chen,,,,Hello Bo,draft\r\n"));
    }

    #[test]
    fn json_is_an_array_of_records() {
        let json: serde_json::Value = serde_json::from_str(&to_json(&campaign()).unwrap()).unwrap();
        let rows = json.as_array().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["status"], "draft");
        assert_eq!(rows[0]["company"], "Hotel One, Inc.");
    }

    #[test]
    fn format_parsing() {
        assert_eq!("CSV".parse::<ExportFormat>().unwrap(), ExportFormat::Csv);
        assert!("xml".parse::<ExportFormat>().is_err());
        assert_eq!(ExportFormat::default(), ExportFormat::Json);
    }
}
