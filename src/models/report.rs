//! Attack statistics report rows

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::aggregation::{assign_field, FieldSpec, FieldValue, HydrateError, ReportRecord};

/// The three fixed report shapes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReportKind {
    AttackType,
    AttackIp,
    TargetUrl,
}

impl ReportKind {
    pub const ALL: [ReportKind; 3] = [
        ReportKind::AttackType,
        ReportKind::AttackIp,
        ReportKind::TargetUrl,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReportKind::AttackType => "attack-type",
            ReportKind::AttackIp => "attack-ip",
            ReportKind::TargetUrl => "target-url",
        }
    }
}

impl fmt::Display for ReportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hourly attack counts per attack type
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttackTypeStat {
    pub id: String,
    pub user_id: String,
    pub sub_domain_id: String,
    pub top_domain_id: String,
    pub attack_type: String,
    pub attack_time: DateTime<Utc>,
    pub attack_count: i64,
    pub statis_time: DateTime<FixedOffset>,
}

/// Hourly attack counts per attacker IP
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttackIpStat {
    pub id: String,
    pub user_id: String,
    pub sub_domain_id: String,
    pub top_domain_id: String,
    pub attack_ip: String,
    pub attack_time: DateTime<Utc>,
    pub attack_count: i64,
    pub ip_count: Option<i64>,
    pub statis_time: DateTime<FixedOffset>,
}

/// Hourly attack counts and distinct attackers per target URL
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetUrlStat {
    pub id: String,
    pub user_id: String,
    pub sub_domain_id: String,
    pub top_domain_id: String,
    pub target_url: String,
    pub attack_time: DateTime<Utc>,
    pub attack_count: i64,
    pub ip_count: Option<i64>,
    pub statis_time: DateTime<FixedOffset>,
}

const ATTACK_TYPE_FIELDS: &[FieldSpec] = &[
    FieldSpec::plain("id"),
    FieldSpec::aliased("user_id", "userId"),
    FieldSpec::aliased("sub_domain_id", "subDomainId"),
    FieldSpec::aliased("top_domain_id", "domainId"),
    FieldSpec::aliased("attack_type", "attackType"),
    FieldSpec::aliased("attack_time", "attackTime"),
    FieldSpec::aliased("attack_count", "attackCount"),
];

const ATTACK_IP_FIELDS: &[FieldSpec] = &[
    FieldSpec::plain("id"),
    FieldSpec::aliased("user_id", "userId"),
    FieldSpec::aliased("sub_domain_id", "subDomainId"),
    FieldSpec::aliased("top_domain_id", "domainId"),
    FieldSpec::aliased("attack_ip", "attackIp"),
    FieldSpec::aliased("attack_time", "attackTime"),
    FieldSpec::aliased("attack_count", "attackCount"),
    FieldSpec::aliased("ip_count", "ipCount"),
];

const TARGET_URL_FIELDS: &[FieldSpec] = &[
    FieldSpec::plain("id"),
    FieldSpec::aliased("user_id", "userId"),
    FieldSpec::aliased("sub_domain_id", "subDomainId"),
    FieldSpec::aliased("top_domain_id", "domainId"),
    FieldSpec::aliased("target_url", "targetUrl"),
    FieldSpec::aliased("attack_time", "attackTime"),
    FieldSpec::aliased("attack_count", "attackCount"),
    FieldSpec::aliased("ip_count", "ipCount"),
];

impl ReportRecord for AttackTypeStat {
    const KIND: ReportKind = ReportKind::AttackType;

    fn fields() -> &'static [FieldSpec] {
        ATTACK_TYPE_FIELDS
    }

    fn assign(&mut self, field: &str, value: &FieldValue) -> Result<(), HydrateError> {
        match field {
            "id" => assign_field(&mut self.id, field, value),
            "user_id" => assign_field(&mut self.user_id, field, value),
            "sub_domain_id" => assign_field(&mut self.sub_domain_id, field, value),
            "top_domain_id" => assign_field(&mut self.top_domain_id, field, value),
            "attack_type" => assign_field(&mut self.attack_type, field, value),
            "attack_time" => assign_field(&mut self.attack_time, field, value),
            "attack_count" => assign_field(&mut self.attack_count, field, value),
            _ => Ok(()),
        }
    }

    fn stamp(&mut self, statis_time: DateTime<FixedOffset>, id: String) {
        self.statis_time = statis_time;
        self.id = id;
    }

    fn into_batch(records: Vec<Self>) -> ReportBatch {
        ReportBatch::AttackType(records)
    }
}

impl ReportRecord for AttackIpStat {
    const KIND: ReportKind = ReportKind::AttackIp;

    fn fields() -> &'static [FieldSpec] {
        ATTACK_IP_FIELDS
    }

    fn assign(&mut self, field: &str, value: &FieldValue) -> Result<(), HydrateError> {
        match field {
            "id" => assign_field(&mut self.id, field, value),
            "user_id" => assign_field(&mut self.user_id, field, value),
            "sub_domain_id" => assign_field(&mut self.sub_domain_id, field, value),
            "top_domain_id" => assign_field(&mut self.top_domain_id, field, value),
            "attack_ip" => assign_field(&mut self.attack_ip, field, value),
            "attack_time" => assign_field(&mut self.attack_time, field, value),
            "attack_count" => assign_field(&mut self.attack_count, field, value),
            "ip_count" => assign_field(&mut self.ip_count, field, value),
            _ => Ok(()),
        }
    }

    fn stamp(&mut self, statis_time: DateTime<FixedOffset>, id: String) {
        self.statis_time = statis_time;
        self.id = id;
    }

    fn into_batch(records: Vec<Self>) -> ReportBatch {
        ReportBatch::AttackIp(records)
    }
}

impl ReportRecord for TargetUrlStat {
    const KIND: ReportKind = ReportKind::TargetUrl;

    fn fields() -> &'static [FieldSpec] {
        TARGET_URL_FIELDS
    }

    fn assign(&mut self, field: &str, value: &FieldValue) -> Result<(), HydrateError> {
        match field {
            "id" => assign_field(&mut self.id, field, value),
            "user_id" => assign_field(&mut self.user_id, field, value),
            "sub_domain_id" => assign_field(&mut self.sub_domain_id, field, value),
            "top_domain_id" => assign_field(&mut self.top_domain_id, field, value),
            "target_url" => assign_field(&mut self.target_url, field, value),
            "attack_time" => assign_field(&mut self.attack_time, field, value),
            "attack_count" => assign_field(&mut self.attack_count, field, value),
            "ip_count" => assign_field(&mut self.ip_count, field, value),
            _ => Ok(()),
        }
    }

    fn stamp(&mut self, statis_time: DateTime<FixedOffset>, id: String) {
        self.statis_time = statis_time;
        self.id = id;
    }

    fn into_batch(records: Vec<Self>) -> ReportBatch {
        ReportBatch::TargetUrl(records)
    }
}

/// Hydrated rows of one report shape, ready for persistence
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "records", rename_all = "kebab-case")]
pub enum ReportBatch {
    AttackType(Vec<AttackTypeStat>),
    AttackIp(Vec<AttackIpStat>),
    TargetUrl(Vec<TargetUrlStat>),
}

impl ReportBatch {
    pub fn kind(&self) -> ReportKind {
        match self {
            ReportBatch::AttackType(_) => ReportKind::AttackType,
            ReportBatch::AttackIp(_) => ReportKind::AttackIp,
            ReportBatch::TargetUrl(_) => ReportKind::TargetUrl,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ReportBatch::AttackType(records) => records.len(),
            ReportBatch::AttackIp(records) => records.len(),
            ReportBatch::TargetUrl(records) => records.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
