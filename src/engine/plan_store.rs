// ==========================================
// 企业培训学习管理系统 - 学习计划存取引擎
// ==========================================
// 职责: 学习计划的合并式 upsert / 归档 / 来源追溯维护
// 红线: 同一 (user, tenant, content_type, content_id) 至多一条计划,
//       重新指派走合并, 不新建谱系
// 红线: 更新前必须先写 plan_revision 快照
// ==========================================

use crate::config::ConfigManager;
use crate::domain::plan::{Plan, PlanReference};
use crate::domain::types::PlanStatus;
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::events::{EnrolmentEvent, EnrolmentEventType, EventBatch};
use crate::repository::PlanRepository;
use std::sync::Arc;
use tracing::{debug, info};

// ==========================================
// PlanStore - 学习计划存取引擎
// ==========================================
pub struct PlanStore {
    plan_repo: Arc<PlanRepository>,
    config: Arc<ConfigManager>,
}

impl PlanStore {
    /// 创建新的计划存取引擎
    pub fn new(plan_repo: Arc<PlanRepository>, config: Arc<ConfigManager>) -> Self {
        Self { plan_repo, config }
    }

    /// 合并式 upsert
    ///
    /// # 行为
    /// - 复合键已存在 ⇒ 先写 plan_revision 快照, 再原地合并:
    ///   草稿的截止时间/指派人/扩展数据覆盖既有值(草稿为 None 则保留既有值),
    ///   created_at 保留原值(uplift 时以草稿覆盖), 发 PlanUpdated
    /// - 不存在 ⇒ 插入草稿:
    ///   传统语义(配置项, 默认开)下无截止时间的草稿不插入, 返回 None;
    ///   新语义下照常插入. 发 PlanCreated
    /// - suppress_events ⇒ 不入批次(系统派生计划场景)
    ///
    /// # 返回
    /// 生效的计划行; `None` 表示传统语义下无可落库的计划
    pub fn merge(
        &self,
        draft: Plan,
        suppress_events: bool,
        uplift: bool,
        batch: &mut EventBatch,
    ) -> EngineResult<Option<Plan>> {
        let existing = self.plan_repo.find_by_key(
            &draft.user_id,
            &draft.tenant_id,
            draft.content_type,
            &draft.content_id,
        )?;

        let now = crate::domain::now_ts();

        match existing {
            Some(current) => {
                // 更新前快照
                self.plan_repo
                    .insert_revision(&current.plan_id, &current.to_event_payload())?;

                let mut merged = current.clone();
                if draft.due_ts.is_some() {
                    merged.due_ts = draft.due_ts;
                }
                if draft.assigner_id.is_some() {
                    merged.assigner_id = draft.assigner_id;
                }
                if draft.data_json.is_some() {
                    merged.data_json = draft.data_json;
                }
                merged.status = draft.status;
                if uplift {
                    // 计划升格: 谱系起点改记为本次合并
                    merged.created_at = draft.created_at;
                }
                merged.changed_at = now;

                self.plan_repo.update(&merged)?;

                info!(
                    plan_id = %merged.plan_id,
                    user_id = %merged.user_id,
                    content_id = %merged.content_id,
                    uplift,
                    "合并更新学习计划"
                );

                if !suppress_events {
                    batch.add(
                        EnrolmentEvent::new(
                            EnrolmentEventType::PlanUpdated,
                            merged.to_event_payload(),
                        )
                        .with_original(current.to_event_payload()),
                    );
                }

                Ok(Some(merged))
            }
            None => {
                let legacy = self
                    .config
                    .legacy_merge_semantics()
                    .map_err(EngineError::from_config)?;
                if legacy && draft.due_ts.is_none() {
                    debug!(
                        user_id = %draft.user_id,
                        content_id = %draft.content_id,
                        "传统合并语义: 无截止时间且无既有计划, 不插入"
                    );
                    return Ok(None);
                }

                self.plan_repo.insert(&draft)?;

                info!(
                    plan_id = %draft.plan_id,
                    user_id = %draft.user_id,
                    content_id = %draft.content_id,
                    "创建学习计划"
                );

                if !suppress_events {
                    batch.add(EnrolmentEvent::new(
                        EnrolmentEventType::PlanCreated,
                        draft.to_event_payload(),
                    ));
                }

                Ok(Some(draft))
            }
        }
    }

    /// 归档学习计划
    ///
    /// 快照 → 状态置 ARCHIVED → 软删除其全部来源追溯 → PlanUpdated
    pub fn archive(&self, plan_id: &str, batch: &mut EventBatch) -> EngineResult<Option<Plan>> {
        let Some(current) = self.plan_repo.find_by_id(plan_id)? else {
            debug!(plan_id, "归档目标计划不存在, 空操作");
            return Ok(None);
        };

        if current.status == PlanStatus::Archived {
            return Ok(Some(current));
        }

        self.plan_repo
            .insert_revision(&current.plan_id, &current.to_event_payload())?;

        let mut archived = current.clone();
        archived.status = PlanStatus::Archived;
        archived.changed_at = crate::domain::now_ts();
        self.plan_repo.update(&archived)?;
        self.plan_repo.deactivate_references(plan_id)?;

        info!(plan_id, "学习计划已归档, 来源追溯已失效");

        batch.add(
            EnrolmentEvent::new(EnrolmentEventType::PlanUpdated, archived.to_event_payload())
                .with_original(current.to_event_payload()),
        );

        Ok(Some(archived))
    }

    /// 追加来源追溯
    pub fn add_reference(
        &self,
        plan_id: &str,
        source_type: &str,
        source_id: &str,
    ) -> EngineResult<PlanReference> {
        let reference = PlanReference::new(
            plan_id.to_string(),
            source_type.to_string(),
            source_id.to_string(),
        );
        self.plan_repo.insert_reference(&reference)?;
        Ok(reference)
    }
}
