// ==========================================
// 企业培训学习管理系统 - 核心库
// ==========================================
// 技术栈: Rust + SQLite
// 系统定位: 选课生命周期与完成度传播引擎
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 引擎层 - 业务规则
pub mod engine;

// 配置层 - 系统配置
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA 统一）
pub mod db;

// 日志系统
pub mod logging;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::types::{ChildClass, ContentType, EnrolmentStatus, PlanStatus};

// 领域实体
pub use domain::{
    ActionLog, ActionType, ActorInfo, CompletionRule, Enrolment, EnrolmentData,
    EnrolmentRevision, HistoryEntry, Plan, PlanReference, ResolvedDueDate,
};

// 引擎
pub use engine::{
    CompletionPropagationEngine, CompletionRuleResolver, ContentGraph, ContentLookupCache,
    CreateEnrolmentRequest, EngineError, EngineResult, EnrolmentEvent, EnrolmentEventType,
    EnrolmentOrchestrator, EventBatch, MessageBus, NoOpMessageBus, PlanStore,
    RevisionRecorder, UpdateEnrolmentRequest,
};

// 仓储
pub use repository::{
    ActionLogRepository, EnrolmentRepository, PlanRepository, RepositoryError,
    RepositoryResult, RevisionRepository, SqliteContentGraph,
};

// 配置
pub use config::ConfigManager;

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "企业培训学习管理系统";
