// ==========================================
// 企业培训学习管理系统 - 学习计划领域模型
// ==========================================
// 红线: 同一 (user, tenant, content_type, content_id) 至多一条生效计划
// 说明: 重新指派是 upsert, 不是 insert; 显式 reassign 才创建新谱系
// ==========================================

use crate::domain::types::{ContentType, PlanStatus};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

// ==========================================
// Plan - 学习计划 (任务指派)
// ==========================================
// assigner_id 为空 ⇒ 自主学习/系统派生
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub plan_id: String,                 // 计划ID

    // ===== 复合键 =====
    pub user_id: String,                 // 学员ID
    pub tenant_id: String,               // 租户ID
    pub content_type: ContentType,       // 目标内容类型
    pub content_id: String,              // 目标内容ID

    // ===== 指派信息 =====
    pub assigner_id: Option<String>,     // 指派人ID (None ⇒ 自主学习)
    pub status: PlanStatus,              // 状态
    pub due_ts: Option<NaiveDateTime>,   // 截止时间

    // ===== 扩展数据 =====
    pub data_json: Option<JsonValue>,    // 扩展数据 (JSON)

    // ===== 时间戳 =====
    pub created_at: NaiveDateTime,       // 创建时间 (upsert 时保留原值)
    pub changed_at: NaiveDateTime,       // 变更时间
}

impl Plan {
    /// 创建新计划草稿(默认 SCHEDULED 状态)
    pub fn new_draft(
        user_id: String,
        tenant_id: String,
        content_type: ContentType,
        content_id: String,
    ) -> Self {
        let now = crate::domain::now_ts();
        Self {
            plan_id: uuid::Uuid::new_v4().to_string(),
            user_id,
            tenant_id,
            content_type,
            content_id,
            assigner_id: None,
            status: PlanStatus::Scheduled,
            due_ts: None,
            data_json: None,
            created_at: now,
            changed_at: now,
        }
    }

    /// 设置截止时间
    pub fn with_due_ts(mut self, due_ts: Option<NaiveDateTime>) -> Self {
        self.due_ts = due_ts;
        self
    }

    /// 设置指派人
    pub fn with_assigner(mut self, assigner_id: Option<String>) -> Self {
        self.assigner_id = assigner_id;
        self
    }

    /// 判断是否为自主学习(无指派人)
    pub fn is_self_directed(&self) -> bool {
        self.assigner_id.is_none()
    }

    /// 生成当前记录的完整 JSON 快照(用于事件载荷与 plan_revision)
    pub fn to_event_payload(&self) -> JsonValue {
        serde_json::to_value(self).unwrap_or(JsonValue::Null)
    }
}

// ==========================================
// PlanReference - 计划来源追溯
// ==========================================
// 记录计划的来源(如群组成员资格), 支持独立于计划本身的软删除
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanReference {
    pub reference_id: String,   // 追溯ID
    pub plan_id: String,        // 关联计划
    pub source_type: String,    // 来源类型 (如 GROUP_MEMBERSHIP)
    pub source_id: String,      // 来源ID
    pub active: bool,           // 生效标志 (软删除)
}

impl PlanReference {
    /// 创建新的来源追溯
    pub fn new(plan_id: String, source_type: String, source_id: String) -> Self {
        Self {
            reference_id: uuid::Uuid::new_v4().to_string(),
            plan_id,
            source_type,
            source_id,
            active: true,
        }
    }
}
