//! Defense log documents stored in the search index

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::time::{parse_civil_date, parse_civil_datetime};

/// Raw WAF log record as delivered by the upstream log service.
///
/// Dates are UTC+8 civil-time strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WafLogEntry {
    pub log_id: String,
    /// `yyyy-MM-dd`
    pub statis_date: String,
    pub target_url: String,
    pub site_name: String,
    pub attack_ip: String,
    pub attack_type: String,
    pub rule_id: String,
    pub rule_level: String,
    /// `yyyy-MM-dd HH:mm:ss`
    pub log_time: String,
    pub user_id: String,
}

/// Indexed defense log document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefendLogDocument {
    pub log_id: String,
    /// Ingestion/reporting day, decoupled from `log_time`
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub statis_date: DateTime<Utc>,
    pub target_url: String,
    pub site_name: String,
    pub atk_ip: String,
    pub atk_type: String,
    pub rule_id: String,
    pub rule_level: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub log_time: DateTime<Utc>,
    pub top_domain_id: String,
    pub sub_domain_id: String,
    pub user_id: String,
}

impl DefendLogDocument {
    pub fn from_entry(
        entry: WafLogEntry,
        top_domain_id: &str,
        sub_domain_id: &str,
    ) -> Result<Self, chrono::ParseError> {
        Ok(Self {
            statis_date: parse_civil_date(&entry.statis_date)?,
            log_time: parse_civil_datetime(&entry.log_time)?,
            log_id: entry.log_id,
            target_url: entry.target_url,
            site_name: entry.site_name,
            atk_ip: entry.attack_ip,
            atk_type: entry.attack_type,
            rule_id: entry.rule_id,
            rule_level: entry.rule_level,
            top_domain_id: top_domain_id.to_string(),
            sub_domain_id: sub_domain_id.to_string(),
            user_id: entry.user_id,
        })
    }

    /// Keyword value of an indexed field; a `.keyword` suffix is accepted
    pub fn keyword(&self, field: &str) -> Option<&str> {
        let value = match field.strip_suffix(".keyword").unwrap_or(field) {
            "log_id" => &self.log_id,
            "target_url" => &self.target_url,
            "site_name" => &self.site_name,
            "atk_ip" => &self.atk_ip,
            "atk_type" => &self.atk_type,
            "rule_id" => &self.rule_id,
            "rule_level" => &self.rule_level,
            "top_domain_id" => &self.top_domain_id,
            "sub_domain_id" => &self.sub_domain_id,
            "user_id" => &self.user_id,
            _ => return None,
        };
        Some(value.as_str())
    }

    /// Value of an indexed date field
    pub fn timestamp(&self, field: &str) -> Option<DateTime<Utc>> {
        match field {
            "statis_date" => Some(self.statis_date),
            "log_time" => Some(self.log_time),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry() -> WafLogEntry {
        WafLogEntry {
            log_id: "log-1".into(),
            statis_date: "2024-05-02".into(),
            target_url: "/login".into(),
            site_name: "shop".into(),
            attack_ip: "203.0.113.9".into(),
            attack_type: "sql_injection".into(),
            rule_id: "942100".into(),
            rule_level: "high".into(),
            log_time: "2024-05-02 09:30:00".into(),
            user_id: "tenant-1".into(),
        }
    }

    #[test]
    fn test_from_entry_parses_civil_times() {
        let doc = DefendLogDocument::from_entry(entry(), "top-1", "sub-1").unwrap();
        assert_eq!(doc.statis_date, Utc.with_ymd_and_hms(2024, 5, 1, 16, 0, 0).unwrap());
        assert_eq!(doc.log_time, Utc.with_ymd_and_hms(2024, 5, 2, 1, 30, 0).unwrap());
        assert_eq!(doc.top_domain_id, "top-1");
        assert_eq!(doc.keyword("atk_ip.keyword"), Some("203.0.113.9"));
        assert_eq!(doc.keyword("unknown"), None);
    }

    #[test]
    fn test_from_entry_rejects_bad_dates() {
        let mut bad = entry();
        bad.log_time = "yesterday".into();
        assert!(DefendLogDocument::from_entry(bad, "top-1", "sub-1").is_err());
    }
}
