// ==========================================
// 企业培训学习管理系统 - 领域类型定义
// ==========================================
// 依据: 选课生命周期状态机 (pending → not-started → in-progress → completed)
// 红线: EXPIRED 仅限特权操作者写入
// ==========================================

use chrono::{NaiveDateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 当前时间(秒精度)
///
/// 数据库时间戳按 "%Y-%m-%d %H:%M:%S" 存储; 构造时即截断到秒,
/// 保证内存中的记录与落库回读的记录逐字段一致
pub fn now_ts() -> NaiveDateTime {
    let now = Utc::now().naive_utc();
    now.with_nanosecond(0).unwrap_or(now)
}

// ==========================================
// 选课状态 (Enrolment Status)
// ==========================================
// 正常流转: PENDING → NOT_STARTED → IN_PROGRESS → COMPLETED
// 特殊流转: recalculate 可将 COMPLETED 降级为 IN_PROGRESS
// 序列化格式: SCREAMING_SNAKE_CASE (与数据库一致)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnrolmentStatus {
    Pending,    // 待确认(未生效)
    NotStarted, // 未开始
    InProgress, // 进行中
    Completed,  // 已完成
    Expired,    // 已过期(仅特权操作者)
}

impl fmt::Display for EnrolmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

impl EnrolmentStatus {
    /// 转换为数据库存储的字符串
    pub fn to_db_str(&self) -> &'static str {
        match self {
            EnrolmentStatus::Pending => "PENDING",
            EnrolmentStatus::NotStarted => "NOT_STARTED",
            EnrolmentStatus::InProgress => "IN_PROGRESS",
            EnrolmentStatus::Completed => "COMPLETED",
            EnrolmentStatus::Expired => "EXPIRED",
        }
    }

    /// 从字符串解析状态(未知值回落为 PENDING)
    pub fn from_db_str(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "PENDING" => EnrolmentStatus::Pending,
            "NOT_STARTED" => EnrolmentStatus::NotStarted,
            "IN_PROGRESS" => EnrolmentStatus::InProgress,
            "COMPLETED" => EnrolmentStatus::Completed,
            "EXPIRED" => EnrolmentStatus::Expired,
            _ => EnrolmentStatus::Pending,
        }
    }

    /// 判断状态迁移是否合法
    ///
    /// # 参数
    /// - `to`: 目标状态
    /// - `privileged`: 是否特权操作者(允许写入 EXPIRED)
    /// - `recalculate`: 是否重算模式(允许 COMPLETED → IN_PROGRESS 降级)
    pub fn can_transition_to(&self, to: EnrolmentStatus, privileged: bool, recalculate: bool) -> bool {
        use EnrolmentStatus::*;

        if *self == to {
            return true; // 幂等更新交由空操作守卫处理
        }

        match (self, to) {
            // EXPIRED 仅限特权操作者
            (_, Expired) => privileged,
            (Expired, _) => privileged,
            // 正向流转
            (Pending, NotStarted) | (Pending, InProgress) | (Pending, Completed) => true,
            (NotStarted, InProgress) | (NotStarted, Completed) => true,
            (InProgress, Completed) => true,
            // 降级仅限重算模式
            (Completed, InProgress) => recalculate,
            _ => false,
        }
    }
}

// ==========================================
// 学习对象类型 (Content Type)
// ==========================================
// 层级: COURSE → MODULE → 叶子学习项
// 可评分叶子类型: ASSIGNMENT / QUIZ / INTERACTIVE / RICH_CONTENT / EXTERNAL_TOOL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContentType {
    Course,       // 课程
    Module,       // 模块(章节)
    Assignment,   // 作业
    Quiz,         // 测验
    Interactive,  // 互动课件
    RichContent,  // 图文内容
    ExternalTool, // 外部工具(LTI)
    Event,        // 面授/直播活动
    Resource,     // 资料(不可评分)
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

impl ContentType {
    /// 转换为数据库存储的字符串
    pub fn to_db_str(&self) -> &'static str {
        match self {
            ContentType::Course => "COURSE",
            ContentType::Module => "MODULE",
            ContentType::Assignment => "ASSIGNMENT",
            ContentType::Quiz => "QUIZ",
            ContentType::Interactive => "INTERACTIVE",
            ContentType::RichContent => "RICH_CONTENT",
            ContentType::ExternalTool => "EXTERNAL_TOOL",
            ContentType::Event => "EVENT",
            ContentType::Resource => "RESOURCE",
        }
    }

    /// 从字符串解析学习对象类型
    pub fn from_db_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "COURSE" => Some(ContentType::Course),
            "MODULE" => Some(ContentType::Module),
            "ASSIGNMENT" => Some(ContentType::Assignment),
            "QUIZ" => Some(ContentType::Quiz),
            "INTERACTIVE" => Some(ContentType::Interactive),
            "RICH_CONTENT" => Some(ContentType::RichContent),
            "EXTERNAL_TOOL" => Some(ContentType::ExternalTool),
            "EVENT" => Some(ContentType::Event),
            "RESOURCE" => Some(ContentType::Resource),
            _ => None,
        }
    }

    /// 是否为可评分叶子类型(成绩聚合到课程)
    pub fn is_assessable(&self) -> bool {
        matches!(
            self,
            ContentType::Assignment
                | ContentType::Quiz
                | ContentType::Interactive
                | ContentType::RichContent
                | ContentType::ExternalTool
        )
    }
}

// ==========================================
// 学习计划状态 (Plan Status)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlanStatus {
    Scheduled, // 已排期(生效)
    Completed, // 已完成
    Archived,  // 已归档
}

impl fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

impl PlanStatus {
    /// 转换为数据库存储的字符串
    pub fn to_db_str(&self) -> &'static str {
        match self {
            PlanStatus::Scheduled => "SCHEDULED",
            PlanStatus::Completed => "COMPLETED",
            PlanStatus::Archived => "ARCHIVED",
        }
    }

    /// 从字符串解析状态(未知值回落为 SCHEDULED)
    pub fn from_db_str(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "SCHEDULED" => PlanStatus::Scheduled,
            "COMPLETED" => PlanStatus::Completed,
            "ARCHIVED" => PlanStatus::Archived,
            _ => PlanStatus::Scheduled,
        }
    }
}

// ==========================================
// 子节点分类 (Child Class)
// ==========================================
// 必修: 全部完成才算完成
// 选修: 完成数量达到配额即可
// 活动: 至少一个完成(MODULE 类型节点要求全部完成, 见传播引擎)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChildClass {
    Mandatory, // 必修
    Elective,  // 选修
    Event,     // 面授/活动类
}

impl fmt::Display for ChildClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

impl ChildClass {
    /// 转换为数据库存储的字符串
    pub fn to_db_str(&self) -> &'static str {
        match self {
            ChildClass::Mandatory => "MANDATORY",
            ChildClass::Elective => "ELECTIVE",
            ChildClass::Event => "EVENT",
        }
    }

    /// 从字符串解析子节点分类
    pub fn from_db_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "MANDATORY" => Some(ChildClass::Mandatory),
            "ELECTIVE" => Some(ChildClass::Elective),
            "EVENT" => Some(ChildClass::Event),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip() {
        for s in [
            EnrolmentStatus::Pending,
            EnrolmentStatus::NotStarted,
            EnrolmentStatus::InProgress,
            EnrolmentStatus::Completed,
            EnrolmentStatus::Expired,
        ] {
            assert_eq!(EnrolmentStatus::from_db_str(s.to_db_str()), s);
        }
    }

    #[test]
    fn test_forward_transitions() {
        assert!(EnrolmentStatus::Pending.can_transition_to(EnrolmentStatus::NotStarted, false, false));
        assert!(EnrolmentStatus::NotStarted.can_transition_to(EnrolmentStatus::InProgress, false, false));
        assert!(EnrolmentStatus::InProgress.can_transition_to(EnrolmentStatus::Completed, false, false));
        // 反向流转默认拒绝
        assert!(!EnrolmentStatus::Completed.can_transition_to(EnrolmentStatus::NotStarted, false, false));
    }

    #[test]
    fn test_expired_requires_privilege() {
        assert!(!EnrolmentStatus::InProgress.can_transition_to(EnrolmentStatus::Expired, false, false));
        assert!(EnrolmentStatus::InProgress.can_transition_to(EnrolmentStatus::Expired, true, false));
    }

    #[test]
    fn test_demotion_requires_recalculate() {
        assert!(!EnrolmentStatus::Completed.can_transition_to(EnrolmentStatus::InProgress, false, false));
        assert!(EnrolmentStatus::Completed.can_transition_to(EnrolmentStatus::InProgress, false, true));
    }

    #[test]
    fn test_now_ts_is_second_precision() {
        assert_eq!(now_ts().nanosecond(), 0);
    }

    #[test]
    fn test_assessable_types() {
        assert!(ContentType::Quiz.is_assessable());
        assert!(ContentType::ExternalTool.is_assessable());
        assert!(!ContentType::Course.is_assessable());
        assert!(!ContentType::Event.is_assessable());
    }
}
