// ==========================================
// 企业培训学习管理系统 - 完成规则领域模型
// ==========================================
// 说明: 完成规则不单独建表, 按内容节点派生
// 变体: 固定日期 / 自身时长 / 父级相对时长 / 课程相对时长
// ==========================================

use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};

// ==========================================
// CompletionRule - 完成规则
// ==========================================
// entity_id 为规则所属的内容节点, 代表该规则创建计划时的目标实体
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule_type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompletionRule {
    /// 固定截止日期: 直接使用字面值
    Fixed {
        entity_id: String,
        due_ts: NaiveDateTime,
    },
    /// 自身时长: 基准日期 = 本记录的开始时间
    OwnDuration {
        entity_id: String,
        interval_days: i64,
    },
    /// 父级相对时长: 基准日期 = 递归解析父选课记录规则所得日期
    ParentDuration {
        entity_id: String,
        interval_days: i64,
    },
    /// 课程相对时长: 基准日期 = 祖先课程选课记录的开始时间
    CourseDuration {
        entity_id: String,
        interval_days: i64,
    },
}

impl CompletionRule {
    /// 规则所属的内容节点ID
    pub fn entity_id(&self) -> &str {
        match self {
            CompletionRule::Fixed { entity_id, .. }
            | CompletionRule::OwnDuration { entity_id, .. }
            | CompletionRule::ParentDuration { entity_id, .. }
            | CompletionRule::CourseDuration { entity_id, .. } => entity_id,
        }
    }

    /// 规则类型标识(用于审计与日志)
    pub fn rule_type_str(&self) -> &'static str {
        match self {
            CompletionRule::Fixed { .. } => "FIXED",
            CompletionRule::OwnDuration { .. } => "OWN_DURATION",
            CompletionRule::ParentDuration { .. } => "PARENT_DURATION",
            CompletionRule::CourseDuration { .. } => "COURSE_DURATION",
        }
    }

    /// 在基准日期上应用时长间隔(FIXED 规则忽略基准日期)
    pub fn apply_to_base(&self, base: NaiveDateTime) -> NaiveDateTime {
        match self {
            CompletionRule::Fixed { due_ts, .. } => *due_ts,
            CompletionRule::OwnDuration { interval_days, .. }
            | CompletionRule::ParentDuration { interval_days, .. }
            | CompletionRule::CourseDuration { interval_days, .. } => {
                base + Duration::days(*interval_days)
            }
        }
    }
}

// ==========================================
// ResolvedDueDate - 截止日期解析结果
// ==========================================
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedDueDate {
    pub due_ts: NaiveDateTime,    // 解析出的截止时间
    pub rule: CompletionRule,     // 命中的规则
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(0, 0, 0).unwrap()
    }

    #[test]
    fn test_fixed_rule_ignores_base() {
        let rule = CompletionRule::Fixed {
            entity_id: "c1".to_string(),
            due_ts: ts(2026, 9, 1),
        };
        assert_eq!(rule.apply_to_base(ts(2026, 1, 1)), ts(2026, 9, 1));
    }

    #[test]
    fn test_duration_rule_adds_interval() {
        let rule = CompletionRule::OwnDuration {
            entity_id: "c1".to_string(),
            interval_days: 7,
        };
        assert_eq!(rule.apply_to_base(ts(2026, 3, 1)), ts(2026, 3, 8));
    }
}
