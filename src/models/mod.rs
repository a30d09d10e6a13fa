pub mod log;
pub mod report;

pub use log::{DefendLogDocument, WafLogEntry};
pub use report::{AttackIpStat, AttackTypeStat, ReportBatch, ReportKind, TargetUrlStat};
