// ==========================================
// 企业培训学习管理系统 - 修订/审计记录器
// ==========================================
// 职责: 有意义变更的修订快照 + 结构性变更的操作日志
// 红线: 两套机制相互独立 —— 快照按受追踪字段去重, 日志逢写必录
// ==========================================

use crate::domain::action_log::{compute_field_diff, strip_volatile, ActionLog, ActionType};
use crate::domain::enrolment::Enrolment;
use crate::domain::revision::EnrolmentRevision;
use crate::engine::error::EngineResult;
use crate::engine::events::{EnrolmentEvent, EnrolmentEventType, EventBatch};
use crate::repository::{ActionLogRepository, RevisionRepository};
use serde_json::{Map, Value as JsonValue};
use std::sync::Arc;
use tracing::debug;

// ==========================================
// RevisionRecorder - 修订/审计记录器
// ==========================================
pub struct RevisionRecorder {
    revision_repo: Arc<RevisionRepository>,
    action_log_repo: Arc<ActionLogRepository>,
}

impl RevisionRecorder {
    /// 创建新的记录器实例
    pub fn new(
        revision_repo: Arc<RevisionRepository>,
        action_log_repo: Arc<ActionLogRepository>,
    ) -> Self {
        Self {
            revision_repo,
            action_log_repo,
        }
    }

    /// 有变化才写修订快照
    ///
    /// 比较当前状态与最近一次持久化快照的受追踪字段:
    /// - 无任何快照 ⇒ 写入首个快照
    /// - 至少一个字段不同 ⇒ 写入新快照
    /// - 完全一致 ⇒ 不写 (重复空操作更新产生零条快照)
    ///
    /// # 返回
    /// - `Ok(Some(revision))`: 已写入的快照
    /// - `Ok(None)`: 无变化, 未写入
    pub fn record_if_changed(
        &self,
        current: &Enrolment,
        note: Option<String>,
        batch: &mut EventBatch,
    ) -> EngineResult<Option<EnrolmentRevision>> {
        let candidate = EnrolmentRevision::from_enrolment(current, note);

        if let Some(latest) = self.revision_repo.find_latest(&current.enrolment_id)? {
            if latest.tracked_fields_eq(&candidate) {
                debug!(
                    enrolment_id = %current.enrolment_id,
                    "受追踪字段无变化, 跳过修订快照"
                );
                return Ok(None);
            }
        }

        self.revision_repo.insert(&candidate)?;
        batch.add(EnrolmentEvent::new(
            EnrolmentEventType::EnrolmentRevisionCreated,
            serde_json::to_value(&candidate).unwrap_or(JsonValue::Null),
        ));

        Ok(Some(candidate))
    }

    /// 追加操作日志(字段级差异)
    ///
    /// 逢结构性写入必录, 与快照机制无关; diff 排除易变字段
    pub fn record_action(
        &self,
        action_type: ActionType,
        actor: &str,
        current: &Enrolment,
        previous: Option<&Enrolment>,
        detail: Option<String>,
    ) -> EngineResult<ActionLog> {
        let mut current_json = current.to_event_payload();
        strip_volatile(&mut current_json);
        let previous_json = previous.map(|p| {
            let mut v = p.to_event_payload();
            strip_volatile(&mut v);
            v
        });
        let diff = compute_field_diff(&current_json, previous_json.as_ref());

        let mut log = ActionLog::new(
            current.enrolment_id.clone(),
            action_type,
            actor.to_string(),
        )
        .with_diff(diff);

        if let Some(d) = detail {
            log = log.with_detail(d);
        }

        self.action_log_repo.insert(&log)?;
        Ok(log)
    }

    /// 追加删除日志
    ///
    /// 删除没有"当前状态", diff 记录全部字段从既有值归零 ({from: 值, to: null}),
    /// 保留删除前的完整字段集供取证回放
    pub fn record_delete(
        &self,
        actor: &str,
        enrolment: &Enrolment,
        detail: Option<String>,
    ) -> EngineResult<ActionLog> {
        let mut previous_json = enrolment.to_event_payload();
        strip_volatile(&mut previous_json);
        let diff = compute_field_diff(&JsonValue::Object(Map::new()), Some(&previous_json));

        let mut log = ActionLog::new(
            enrolment.enrolment_id.clone(),
            ActionType::Delete,
            actor.to_string(),
        )
        .with_diff(diff);

        if let Some(d) = detail {
            log = log.with_detail(d);
        }

        self.action_log_repo.insert(&log)?;
        Ok(log)
    }
}
