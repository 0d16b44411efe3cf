// ==========================================
// 企业培训学习管理系统 - 引擎层
// ==========================================
// 职责: 实现选课生命周期业务规则, 不拼 SQL
// 红线: 事件只在事务提交之后发布
// ==========================================

pub mod content;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod plan_store;
pub mod propagation;
pub mod revision;
pub mod rule_resolver;

// 重导出核心引擎
pub use content::{ContentChildren, ContentGraph, ContentLookupCache, ContentResult};
pub use error::{EngineError, EngineResult};
pub use events::{
    EnrolmentEvent, EnrolmentEventType, EventBatch, MessageBus, NoOpMessageBus,
};
pub use orchestrator::{CreateEnrolmentRequest, EnrolmentOrchestrator, UpdateEnrolmentRequest};
pub use plan_store::PlanStore;
pub use propagation::{AssessmentEntry, CompletionPropagationEngine};
pub use revision::RevisionRecorder;
pub use rule_resolver::CompletionRuleResolver;
