// ==========================================
// 企业培训学习管理系统 - 选课修订快照领域模型
// ==========================================
// 红线: 修订快照为不可变记录, 只追加不修改
// 用途: 有意义变更的留痕, 以及删除后的整树恢复
// ==========================================

use crate::domain::enrolment::Enrolment;
use crate::domain::types::EnrolmentStatus;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

// ==========================================
// EnrolmentRevision - 选课修订快照
// ==========================================
// 仅当至少一个受追踪字段与上次持久化状态不同时写入
// (或尚无任何快照时写入首个快照)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrolmentRevision {
    pub revision_id: String,                 // 快照ID
    pub enrolment_id: String,                // 关联选课记录

    // ===== 受追踪字段 =====
    pub user_id: String,                     // 学员ID
    pub tenant_id: String,                   // 租户ID
    pub content_id: String,                  // 学习对象ID
    pub parent_content_id: Option<String>,   // 父学习对象ID
    pub parent_enrolment_id: Option<String>, // 父选课记录ID
    pub status: EnrolmentStatus,             // 状态
    pub result: Option<f64>,                 // 成绩
    pub pass: i64,                           // 通过标志
    pub start_ts: Option<NaiveDateTime>,     // 开始时间
    pub end_ts: Option<NaiveDateTime>,       // 结束时间

    // ===== 元信息 =====
    pub note: Option<String>,                // 自由文本备注
    pub created_at: NaiveDateTime,           // 快照时间
}

impl EnrolmentRevision {
    /// 从选课记录生成快照
    pub fn from_enrolment(enrolment: &Enrolment, note: Option<String>) -> Self {
        Self {
            revision_id: uuid::Uuid::new_v4().to_string(),
            enrolment_id: enrolment.enrolment_id.clone(),
            user_id: enrolment.user_id.clone(),
            tenant_id: enrolment.tenant_id.clone(),
            content_id: enrolment.content_id.clone(),
            parent_content_id: enrolment.parent_content_id.clone(),
            parent_enrolment_id: enrolment.parent_enrolment_id.clone(),
            status: enrolment.status,
            result: enrolment.result,
            pass: enrolment.pass,
            start_ts: enrolment.start_ts,
            end_ts: enrolment.end_ts,
            note,
            created_at: crate::domain::now_ts(),
        }
    }

    /// 比较受追踪字段是否与另一快照一致
    ///
    /// 用于"无变化则不写快照"的判定, 备注与时间戳不参与比较
    pub fn tracked_fields_eq(&self, other: &EnrolmentRevision) -> bool {
        self.user_id == other.user_id
            && self.tenant_id == other.tenant_id
            && self.content_id == other.content_id
            && self.parent_content_id == other.parent_content_id
            && self.parent_enrolment_id == other.parent_enrolment_id
            && self.status == other.status
            && self.result == other.result
            && self.pass == other.pass
            && self.start_ts == other.start_ts
            && self.end_ts == other.end_ts
    }
}
