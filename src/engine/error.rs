// ==========================================
// 企业培训学习管理系统 - 引擎层错误类型
// ==========================================
// 工具: thiserror 派生宏
// 分类: 前置条件故障 / 冲突故障 / 瞬时竞态(不在此列, 按成功空操作处理) / 意外故障
// ==========================================

use crate::repository::error::RepositoryError;
use thiserror::Error;

/// 引擎层错误类型
#[derive(Error, Debug)]
pub enum EngineError {
    // ===== 前置条件故障 (4xx 等价) =====
    #[error("消息总线不可用, 拒绝开始变更")]
    BusUnavailable,

    #[error("学习对象不存在: {content_id}")]
    ContentNotFound { content_id: String },

    #[error("父选课记录不存在: {parent_enrolment_id}")]
    ParentNotFound { parent_enrolment_id: String },

    #[error("父选课记录 {parent_enrolment_id} 不属于同一 (user, tenant)")]
    ParentMismatch { parent_enrolment_id: String },

    // ===== 冲突故障 (409 等价) =====
    #[error("已存在选课记录 {existing_id}, 如需重新报读请设置 re_enrol=true")]
    Conflict { existing_id: String },

    #[error("无效的状态转换: from={from} to={to}")]
    InvalidTransition { from: String, to: String },

    #[error("选课记录未找到: {enrolment_id}")]
    EnrolmentNotFound { enrolment_id: String },

    #[error("没有可恢复的修订快照: {enrolment_id}")]
    NothingToRestore { enrolment_id: String },

    // ===== 意外故障 (500 等价, 事务已回滚) =====
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("内容图查询失败: {0}")]
    ContentGraph(String),

    #[error("配置读取失败: {0}")]
    Config(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl EngineError {
    /// 将内容图协作方错误收敛为引擎错误
    pub fn from_content_graph(e: Box<dyn std::error::Error + Send + Sync>) -> Self {
        EngineError::ContentGraph(e.to_string())
    }

    /// 将配置层错误收敛为引擎错误
    pub fn from_config(e: Box<dyn std::error::Error>) -> Self {
        EngineError::Config(e.to_string())
    }
}

/// Result 类型别名
pub type EngineResult<T> = Result<T, EngineError>;
