// ==========================================
// 企业培训学习管理系统 - 领域层
// ==========================================
// 职责: 定义实体与类型, 不依赖仓储/引擎层
// ==========================================

pub mod action_log;
pub mod completion_rule;
pub mod enrolment;
pub mod plan;
pub mod revision;
pub mod types;

// 重导出核心实体
pub use action_log::{compute_field_diff, ActionLog, ActionType, VOLATILE_FIELDS};
pub use completion_rule::{CompletionRule, ResolvedDueDate};
pub use enrolment::{ActorInfo, Enrolment, EnrolmentData, HistoryEntry};
pub use plan::{Plan, PlanReference};
pub use revision::EnrolmentRevision;
pub use types::{now_ts, ChildClass, ContentType, EnrolmentStatus, PlanStatus};
