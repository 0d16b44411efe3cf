// ==========================================
// 企业培训学习管理系统 - 操作日志领域模型
// ==========================================
// 红线: 所有结构性写入(创建/更新/删除/恢复)必须追加日志, 永不清理
// 说明: 与修订快照机制相互独立, 记录字段级差异供取证回放
// ==========================================

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// 差异计算时排除的易变字段
///
/// changed_at 每次写入都会变化, history 为内嵌审计摘要, 均不构成有意义差异
pub const VOLATILE_FIELDS: &[&str] = &["changed_at", "history"];

// ==========================================
// ActionLog - 操作日志
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionLog {
    pub action_id: String,              // 日志ID
    pub enrolment_id: String,           // 关联选课记录
    pub action_type: String,            // 操作类型 (存储为字符串)
    pub action_ts: NaiveDateTime,       // 操作时间戳
    pub actor: String,                  // 操作人

    // ===== 字段级差异 =====
    pub diff_json: Option<JsonValue>,   // {field: {from, to}} 结构

    // ===== 扩展 =====
    pub detail: Option<String>,         // 详细描述
}

// ==========================================
// ActionType - 操作类型
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionType {
    Create,      // 创建选课
    Update,      // 更新选课
    Delete,      // 删除/归档选课
    Restore,     // 从修订快照恢复
    Recalculate, // 重算降级
    Propagate,   // 完成度传播引发的父级变更
}

impl ActionType {
    /// 转换为字符串 (用于数据库存储)
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Create => "Create",
            ActionType::Update => "Update",
            ActionType::Delete => "Delete",
            ActionType::Restore => "Restore",
            ActionType::Recalculate => "Recalculate",
            ActionType::Propagate => "Propagate",
        }
    }

    /// 从字符串解析
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "Create" => Some(ActionType::Create),
            "Update" => Some(ActionType::Update),
            "Delete" => Some(ActionType::Delete),
            "Restore" => Some(ActionType::Restore),
            "Recalculate" => Some(ActionType::Recalculate),
            "Propagate" => Some(ActionType::Propagate),
            _ => None,
        }
    }
}

// ==========================================
// ActionLog 辅助方法
// ==========================================
impl ActionLog {
    /// 创建新的操作日志
    pub fn new(enrolment_id: String, action_type: ActionType, actor: String) -> Self {
        Self {
            action_id: uuid::Uuid::new_v4().to_string(),
            enrolment_id,
            action_type: action_type.as_str().to_string(),
            action_ts: crate::domain::now_ts(),
            actor,
            diff_json: None,
            detail: None,
        }
    }

    /// 设置字段级差异
    pub fn with_diff(mut self, diff: JsonValue) -> Self {
        self.diff_json = Some(diff);
        self
    }

    /// 设置详细描述
    pub fn with_detail(mut self, detail: String) -> Self {
        self.detail = Some(detail);
        self
    }
}

// ==========================================
// 字段级差异计算
// ==========================================

/// 剥离易变字段(顶层与 data 块内嵌的 history)
///
/// 差异计算前调用, 保证内嵌历史摘要不会污染字段级差异
pub fn strip_volatile(value: &mut JsonValue) {
    if let Some(obj) = value.as_object_mut() {
        for field in VOLATILE_FIELDS {
            obj.remove(*field);
        }
        if let Some(data) = obj.get_mut("data").and_then(|d| d.as_object_mut()) {
            data.remove("history");
        }
    }
}

/// 计算两个 JSON 对象间的字段级差异
///
/// # 参数
/// - `current`: 当前状态 (JSON 对象)
/// - `previous`: 变更前状态 (None ⇒ 全部字段视为新增)
///
/// # 返回
/// `{field: {"from": 旧值, "to": 新值}}` 结构; 无差异时返回空对象
///
/// # 约束
/// - VOLATILE_FIELDS 中的字段不参与比较
/// - 仅比较顶层字段; 嵌套对象按整体值比较
pub fn compute_field_diff(current: &JsonValue, previous: Option<&JsonValue>) -> JsonValue {
    let empty = Map::new();
    let cur = current.as_object().unwrap_or(&empty);
    let prev = previous.and_then(|p| p.as_object());

    let mut diff = Map::new();

    for (key, new_value) in cur {
        if VOLATILE_FIELDS.contains(&key.as_str()) {
            continue;
        }
        let old_value = prev.and_then(|p| p.get(key)).cloned().unwrap_or(JsonValue::Null);
        if &old_value != new_value {
            let mut entry = Map::new();
            entry.insert("from".to_string(), old_value);
            entry.insert("to".to_string(), new_value.clone());
            diff.insert(key.clone(), JsonValue::Object(entry));
        }
    }

    // 变更前存在但当前缺失的字段也纳入差异
    if let Some(prev_map) = prev {
        for (key, old_value) in prev_map {
            if VOLATILE_FIELDS.contains(&key.as_str()) || cur.contains_key(key) {
                continue;
            }
            if old_value.is_null() {
                continue; // null → null 不构成差异
            }
            let mut entry = Map::new();
            entry.insert("from".to_string(), old_value.clone());
            entry.insert("to".to_string(), JsonValue::Null);
            diff.insert(key.clone(), JsonValue::Object(entry));
        }
    }

    JsonValue::Object(diff)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_diff_detects_changed_field() {
        let prev = json!({"status": "NOT_STARTED", "result": null});
        let cur = json!({"status": "COMPLETED", "result": 88.0});

        let diff = compute_field_diff(&cur, Some(&prev));
        assert_eq!(diff["status"]["from"], "NOT_STARTED");
        assert_eq!(diff["status"]["to"], "COMPLETED");
        assert_eq!(diff["result"]["to"], 88.0);
    }

    #[test]
    fn test_diff_excludes_volatile_fields() {
        let prev = json!({"changed_at": "2026-01-01 00:00:00", "history": [], "status": "PENDING"});
        let cur = json!({"changed_at": "2026-02-02 00:00:00", "history": [1, 2], "status": "PENDING"});

        let diff = compute_field_diff(&cur, Some(&prev));
        assert_eq!(diff, json!({}));
    }

    #[test]
    fn test_diff_without_previous_marks_all_as_new() {
        let cur = json!({"status": "PENDING", "user_id": "u1"});
        let diff = compute_field_diff(&cur, None);
        assert_eq!(diff["status"]["from"], JsonValue::Null);
        assert_eq!(diff["user_id"]["to"], "u1");
    }

    #[test]
    fn test_diff_detects_removed_field() {
        let prev = json!({"status": "PENDING", "note": "hello"});
        let cur = json!({"status": "PENDING"});
        let diff = compute_field_diff(&cur, Some(&prev));
        assert_eq!(diff["note"]["from"], "hello");
        assert_eq!(diff["note"]["to"], JsonValue::Null);
    }

    #[test]
    fn test_strip_volatile_removes_nested_history() {
        let mut value = json!({
            "changed_at": "2026-01-01 00:00:00",
            "status": "PENDING",
            "data": {"history": [{"action": "Create"}], "actor": null}
        });
        strip_volatile(&mut value);
        assert!(value.get("changed_at").is_none());
        assert!(value["data"].get("history").is_none());
        assert_eq!(value["status"], "PENDING");
    }

    #[test]
    fn test_action_type_roundtrip() {
        for t in [
            ActionType::Create,
            ActionType::Update,
            ActionType::Delete,
            ActionType::Restore,
            ActionType::Recalculate,
            ActionType::Propagate,
        ] {
            assert_eq!(ActionType::from_str(t.as_str()), Some(t));
        }
    }
}
