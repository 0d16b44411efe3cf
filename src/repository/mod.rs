// ==========================================
// 企业培训学习管理系统 - 数据仓储层
// ==========================================
// 红线: Repository 不含业务逻辑
// 职责: 提供数据访问接口, 屏蔽数据库细节
// 约束: 所有查询使用参数化, 防止 SQL 注入
// ==========================================

pub mod action_log_repo;
pub mod content_repo;
pub mod enrolment_repo;
pub mod error;
pub mod plan_repo;
pub mod revision_repo;

// 重导出核心仓储
pub use action_log_repo::ActionLogRepository;
pub use content_repo::SqliteContentGraph;
pub use enrolment_repo::EnrolmentRepository;
pub use error::{RepositoryError, RepositoryResult};
pub use plan_repo::PlanRepository;
pub use revision_repo::RevisionRepository;
