// ==========================================
// 企业培训学习管理系统 - 选课记录领域模型
// ==========================================
// 红线: parent_enrolment_id 若存在, 必须指向同 (user, tenant) 的选课记录
// 说明: data_json 为结构化数据块, 内嵌 append-only 的 history 日志
// ==========================================

use crate::domain::types::EnrolmentStatus;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

// ==========================================
// Enrolment - 选课记录
// ==========================================
// 树形结构: 通过 parent_enrolment_id 引用构成, 根记录无父引用
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Enrolment {
    // ===== 主键与归属 =====
    pub enrolment_id: String,                // 选课记录ID
    pub user_id: String,                     // 学员ID
    pub tenant_id: String,                   // 租户ID

    // ===== 内容关联 =====
    pub content_id: String,                  // 学习对象ID
    pub parent_content_id: Option<String>,   // 父学习对象ID
    pub parent_enrolment_id: Option<String>, // 父选课记录ID (树形引用)

    // ===== 进度状态 =====
    pub status: EnrolmentStatus,             // 状态
    pub result: Option<f64>,                 // 成绩
    pub pass: i64,                           // 通过标志 (0/1)
    pub start_ts: Option<NaiveDateTime>,     // 开始时间
    pub end_ts: Option<NaiveDateTime>,       // 结束时间

    // ===== 扩展数据 =====
    pub data: EnrolmentData,                 // 结构化数据块 (存储为 data_json)

    // ===== 时间戳 =====
    pub created_at: NaiveDateTime,           // 创建时间
    pub changed_at: NaiveDateTime,           // 变更时间
}

// ==========================================
// EnrolmentData - 结构化数据块
// ==========================================
// 取代自由格式 map: history 为 append-only 审计摘要,
// actor 为事件载荷富化用的临时操作者信息
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnrolmentData {
    /// 内嵌历史日志 (append-only, 受 history_limit 封顶)
    #[serde(default)]
    pub history: Vec<HistoryEntry>,

    /// 操作者信息 (可选, 仅用于事件载荷富化)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<ActorInfo>,

    /// 其他扩展字段 (保持向前兼容)
    #[serde(default, flatten)]
    pub extra: Map<String, JsonValue>,
}

// ==========================================
// HistoryEntry - 内嵌历史条目
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub ts: NaiveDateTime,        // 记录时间
    pub actor: String,            // 操作者
    pub action: String,           // 动作标识 (与 ActionType 对齐)
    pub note: Option<String>,     // 备注
}

// ==========================================
// ActorInfo - 操作者信息
// ==========================================
// 由身份协作方提供, 不参与核心正确性, 仅富化事件载荷
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActorInfo {
    pub actor_id: String,             // 操作者ID
    pub display_name: Option<String>, // 显示名称
}

impl EnrolmentData {
    /// 追加一条历史条目, 超出上限时淘汰最旧条目
    pub fn append_history(&mut self, entry: HistoryEntry, limit: usize) {
        self.history.push(entry);
        if limit > 0 && self.history.len() > limit {
            let overflow = self.history.len() - limit;
            self.history.drain(0..overflow);
        }
    }

    /// 序列化为数据库存储的 JSON 字符串
    pub fn to_json_string(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    /// 从数据库 JSON 字符串解析(解析失败时回落为空块)
    pub fn from_json_str(s: &str) -> Self {
        serde_json::from_str(s).unwrap_or_default()
    }
}

impl Enrolment {
    /// 判断是否已完成
    pub fn is_completed(&self) -> bool {
        self.status == EnrolmentStatus::Completed
    }

    /// 判断是否已通过
    pub fn is_passed(&self) -> bool {
        self.pass != 0
    }

    /// 判断是否为根选课记录(无父选课引用)
    pub fn is_root(&self) -> bool {
        self.parent_enrolment_id.is_none()
    }

    /// 生成当前记录的完整 JSON 快照(用于事件载荷)
    pub fn to_event_payload(&self) -> JsonValue {
        serde_json::to_value(self).unwrap_or(JsonValue::Null)
    }
}
