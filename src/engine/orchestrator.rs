// ==========================================
// 企业培训学习管理系统 - 选课编排器
// ==========================================
// 职责: create / update / delete / restore 的事务编排
// 红线: 事件只在事务提交之后发布; 发布失败不回滚已提交状态
// 红线: 总线不可用时在任何写入之前快速失败
// ==========================================

use crate::config::ConfigManager;
use crate::db::TransactionScope;
use crate::domain::action_log::ActionType;
use crate::domain::enrolment::{ActorInfo, Enrolment, EnrolmentData, HistoryEntry};
use crate::domain::plan::Plan;
use crate::domain::revision::EnrolmentRevision;
use crate::domain::types::{ContentType, EnrolmentStatus};
use crate::engine::content::{ContentGraph, ContentLookupCache};
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::events::{EnrolmentEvent, EnrolmentEventType, EventBatch, MessageBus};
use crate::engine::plan_store::PlanStore;
use crate::engine::propagation::CompletionPropagationEngine;
use crate::engine::revision::RevisionRecorder;
use crate::engine::rule_resolver::CompletionRuleResolver;
use crate::repository::{
    ActionLogRepository, EnrolmentRepository, PlanRepository, RevisionRepository,
};
use chrono::NaiveDateTime;
use rusqlite::Connection;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

// ==========================================
// 请求类型
// ==========================================

/// 创建选课请求
#[derive(Debug, Clone)]
pub struct CreateEnrolmentRequest {
    pub user_id: String,                     // 学员ID
    pub tenant_id: String,                   // 租户ID
    pub content_id: String,                  // 学习对象ID
    pub parent_content_id: Option<String>,   // 父学习对象ID
    pub parent_enrolment_id: Option<String>, // 父选课记录ID
    pub status: Option<EnrolmentStatus>,     // 初始状态 (默认 NOT_STARTED)
    pub start_ts: Option<NaiveDateTime>,     // 开始时间
    pub due_ts: Option<NaiveDateTime>,       // 显式截止时间 (胜过规则)
    pub assigner_id: Option<String>,         // 指派人 (落到学习计划)
    pub re_enrol: bool,                      // 重新报读: 归档既有子树后新建
    pub actor: String,                       // 操作者标识
    pub actor_info: Option<ActorInfo>,       // 事件富化用操作者信息
}

impl CreateEnrolmentRequest {
    /// 构造最小请求
    pub fn new(user_id: &str, tenant_id: &str, content_id: &str, actor: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            tenant_id: tenant_id.to_string(),
            content_id: content_id.to_string(),
            parent_content_id: None,
            parent_enrolment_id: None,
            status: None,
            start_ts: None,
            due_ts: None,
            assigner_id: None,
            re_enrol: false,
            actor: actor.to_string(),
            actor_info: None,
        }
    }

    /// 设置父关联(子树挂载)
    pub fn with_parent(mut self, parent_content_id: &str, parent_enrolment_id: &str) -> Self {
        self.parent_content_id = Some(parent_content_id.to_string());
        self.parent_enrolment_id = Some(parent_enrolment_id.to_string());
        self
    }

    /// 设置显式截止时间
    pub fn with_due_ts(mut self, due_ts: NaiveDateTime) -> Self {
        self.due_ts = Some(due_ts);
        self
    }

    /// 设置指派人
    pub fn with_assigner(mut self, assigner_id: &str) -> Self {
        self.assigner_id = Some(assigner_id.to_string());
        self
    }

    /// 标记为重新报读
    pub fn with_re_enrol(mut self) -> Self {
        self.re_enrol = true;
        self
    }
}

/// 更新选课请求
#[derive(Debug, Clone, Default)]
pub struct UpdateEnrolmentRequest {
    pub enrolment_id: String,               // 目标选课记录
    pub status: Option<EnrolmentStatus>,    // 目标状态 (None ⇒ 不变)
    pub result: Option<f64>,                // 成绩 (None ⇒ 不变)
    pub pass: Option<i64>,                  // 通过标志 (None ⇒ 不变)
    pub start_ts: Option<NaiveDateTime>,    // 开始时间 (None ⇒ 不变)
    pub end_ts: Option<NaiveDateTime>,      // 结束时间 (None ⇒ 不变)
    pub privileged: bool,                   // 特权操作者 (允许 EXPIRED)
    pub recalculate: bool,                  // 重算模式 (允许降级)
    pub actor: String,                      // 操作者标识
    pub actor_info: Option<ActorInfo>,      // 事件富化用操作者信息
    pub note: Option<String>,               // 快照备注
}

impl UpdateEnrolmentRequest {
    /// 构造状态更新请求
    pub fn status_change(enrolment_id: &str, status: EnrolmentStatus, actor: &str) -> Self {
        Self {
            enrolment_id: enrolment_id.to_string(),
            status: Some(status),
            actor: actor.to_string(),
            ..Default::default()
        }
    }

    /// 设置成绩与通过标志
    pub fn with_result(mut self, result: f64, pass: i64) -> Self {
        self.result = Some(result);
        self.pass = Some(pass);
        self
    }

    /// 标记为重算模式
    pub fn with_recalculate(mut self) -> Self {
        self.recalculate = true;
        self
    }

    /// 标记为特权操作者
    pub fn with_privileged(mut self) -> Self {
        self.privileged = true;
        self
    }
}

// ==========================================
// EnrolmentOrchestrator - 选课编排器
// ==========================================
pub struct EnrolmentOrchestrator {
    conn: Arc<Mutex<Connection>>,
    enrolment_repo: Arc<EnrolmentRepository>,
    revision_repo: Arc<RevisionRepository>,
    plan_repo: Arc<PlanRepository>,
    recorder: Arc<RevisionRecorder>,
    config: Arc<ConfigManager>,
    propagation: CompletionPropagationEngine,
    resolver: CompletionRuleResolver,
    plan_store: PlanStore,
    graph: Arc<dyn ContentGraph>,
    bus: Arc<dyn MessageBus>,
}

impl EnrolmentOrchestrator {
    /// 基于共享连接组装全套仓储与引擎
    pub fn new(
        conn: Arc<Mutex<Connection>>,
        graph: Arc<dyn ContentGraph>,
        bus: Arc<dyn MessageBus>,
    ) -> EngineResult<Self> {
        let enrolment_repo = Arc::new(EnrolmentRepository::new(conn.clone()));
        let revision_repo = Arc::new(RevisionRepository::new(conn.clone()));
        let plan_repo = Arc::new(PlanRepository::new(conn.clone()));
        let action_log_repo = Arc::new(ActionLogRepository::new(conn.clone()));
        let config = Arc::new(
            ConfigManager::from_connection(conn.clone()).map_err(EngineError::from_config)?,
        );
        let recorder = Arc::new(RevisionRecorder::new(
            revision_repo.clone(),
            action_log_repo,
        ));
        let propagation = CompletionPropagationEngine::new(
            enrolment_repo.clone(),
            recorder.clone(),
            config.clone(),
        );
        let resolver = CompletionRuleResolver::new(enrolment_repo.clone());
        let plan_store = PlanStore::new(plan_repo.clone(), config.clone());

        Ok(Self {
            conn,
            enrolment_repo,
            revision_repo,
            plan_repo,
            recorder,
            config,
            propagation,
            resolver,
            plan_store,
            graph,
            bus,
        })
    }

    fn tx_err(e: rusqlite::Error) -> EngineError {
        EngineError::Repository(e.into())
    }

    // ==========================================
    // create - 创建选课
    // ==========================================

    /// 创建选课记录
    ///
    /// 流程: 总线前置检查 → 内容存在性 → 父引用校验 →
    /// 重复检查(或重新报读归档) → 插入 → 截止日期解析/计划合并/关联 →
    /// 完成度传播 → 快照与日志 → 提交 → 事件发布
    pub fn create(&self, req: CreateEnrolmentRequest) -> EngineResult<Enrolment> {
        if !self.bus.is_available() {
            return Err(EngineError::BusUnavailable);
        }

        let mut cache = ContentLookupCache::new(self.graph.as_ref());
        let exists = self
            .graph
            .exists(&req.content_id)
            .map_err(EngineError::from_content_graph)?;
        if !exists {
            return Err(EngineError::ContentNotFound {
                content_id: req.content_id,
            });
        }

        // 父引用校验: 父选课记录必须存在且归属同一 (user, tenant)
        if let Some(parent_id) = req.parent_enrolment_id.as_deref() {
            match self.enrolment_repo.find_by_id(parent_id)? {
                None => {
                    return Err(EngineError::ParentNotFound {
                        parent_enrolment_id: parent_id.to_string(),
                    });
                }
                Some(parent) => {
                    if parent.user_id != req.user_id || parent.tenant_id != req.tenant_id {
                        return Err(EngineError::ParentMismatch {
                            parent_enrolment_id: parent_id.to_string(),
                        });
                    }
                }
            }
        }

        let mut batch = EventBatch::new();
        let scope = TransactionScope::begin(self.conn.clone()).map_err(Self::tx_err)?;

        // 重复检查
        if let Some(existing) = self.enrolment_repo.find_by_key(
            &req.user_id,
            &req.tenant_id,
            &req.content_id,
            req.parent_content_id.as_deref(),
        )? {
            if !req.re_enrol {
                let _ = scope.rollback();
                return Err(EngineError::Conflict {
                    existing_id: existing.enrolment_id,
                });
            }
            // 重新报读: 同一事务内归档既有子树
            info!(
                existing_id = %existing.enrolment_id,
                "重新报读: 归档既有选课子树"
            );
            self.delete_cascade(&existing, true, &req.actor, &mut batch)?;
        }

        let now = crate::domain::now_ts();
        let history_limit = self
            .config
            .history_limit()
            .map_err(EngineError::from_config)?;

        let mut data = EnrolmentData {
            actor: req.actor_info.clone(),
            ..Default::default()
        };
        data.append_history(
            HistoryEntry {
                ts: now,
                actor: req.actor.clone(),
                action: ActionType::Create.as_str().to_string(),
                note: None,
            },
            history_limit,
        );

        let enrolment = Enrolment {
            enrolment_id: uuid::Uuid::new_v4().to_string(),
            user_id: req.user_id.clone(),
            tenant_id: req.tenant_id.clone(),
            content_id: req.content_id.clone(),
            parent_content_id: req.parent_content_id.clone(),
            parent_enrolment_id: req.parent_enrolment_id.clone(),
            status: req.status.unwrap_or(EnrolmentStatus::NotStarted),
            result: None,
            pass: 0,
            start_ts: req.start_ts,
            end_ts: None,
            data,
            created_at: now,
            changed_at: now,
        };

        // 插入; UNIQUE 违例 ⇒ 并发创建竞态, 回查胜出行并返回冲突
        if let Err(e) = self.enrolment_repo.insert(&enrolment) {
            if e.is_unique_violation() {
                let _ = scope.rollback();
                let winner = self.enrolment_repo.find_by_key(
                    &req.user_id,
                    &req.tenant_id,
                    &req.content_id,
                    req.parent_content_id.as_deref(),
                )?;
                return match winner {
                    Some(w) => Err(EngineError::Conflict {
                        existing_id: w.enrolment_id,
                    }),
                    None => Err(EngineError::Repository(e)),
                };
            }
            return Err(EngineError::Repository(e));
        }

        let mut created_event = EnrolmentEvent::new(
            EnrolmentEventType::EnrolmentCreated,
            enrolment.to_event_payload(),
        );
        if let Some(actor_info) = &req.actor_info {
            created_event = created_event.with_embedded(
                serde_json::to_value(actor_info).unwrap_or(serde_json::Value::Null),
            );
        }
        batch.add(created_event);

        // 截止日期解析 → 计划合并与关联
        self.attach_plan(&enrolment, &req, &mut cache, &mut batch)?;

        // 自底向上传播
        self.propagation
            .spread_status(&enrolment, false, &mut cache, &mut batch)?;

        self.recorder
            .record_if_changed(&enrolment, Some("创建选课".to_string()), &mut batch)?;
        self.recorder
            .record_action(ActionType::Create, &req.actor, &enrolment, None, None)?;

        scope.commit().map_err(Self::tx_err)?;

        let published = batch.flush(self.bus.as_ref());
        info!(
            enrolment_id = %enrolment.enrolment_id,
            user_id = %enrolment.user_id,
            content_id = %enrolment.content_id,
            published,
            "选课创建完成"
        );

        Ok(enrolment)
    }

    /// 截止日期解析结果落到学习计划并建立关联
    ///
    /// - 解析出截止日期 ⇒ 合并计划并关联
    /// - 无截止日期的独立根记录 ⇒ 机会性关联既有计划(不创建)
    fn attach_plan(
        &self,
        enrolment: &Enrolment,
        req: &CreateEnrolmentRequest,
        cache: &mut ContentLookupCache<'_>,
        batch: &mut EventBatch,
    ) -> EngineResult<()> {
        let content_type = cache
            .content_type(&enrolment.content_id)
            .map_err(EngineError::from_content_graph)?
            .unwrap_or(ContentType::Course);

        let resolved = self
            .resolver
            .resolve_due_date(enrolment, req.due_ts, cache)?;

        match resolved {
            Some(r) => {
                let draft = Plan::new_draft(
                    enrolment.user_id.clone(),
                    enrolment.tenant_id.clone(),
                    content_type,
                    enrolment.content_id.clone(),
                )
                .with_due_ts(Some(r.due_ts))
                .with_assigner(req.assigner_id.clone());

                if let Some(plan) = self.plan_store.merge(draft, false, false, batch)? {
                    self.plan_repo.link(&enrolment.enrolment_id, &plan.plan_id)?;
                    debug!(
                        enrolment_id = %enrolment.enrolment_id,
                        plan_id = %plan.plan_id,
                        rule_type = r.rule.rule_type_str(),
                        "选课已关联学习计划"
                    );
                }
            }
            None if enrolment.is_root() => {
                // 无规则无日期的独立根记录: 只关联既有计划, 不创建
                if let Some(plan) = self.plan_repo.find_by_key(
                    &enrolment.user_id,
                    &enrolment.tenant_id,
                    content_type,
                    &enrolment.content_id,
                )? {
                    self.plan_repo.link(&enrolment.enrolment_id, &plan.plan_id)?;
                    debug!(
                        enrolment_id = %enrolment.enrolment_id,
                        plan_id = %plan.plan_id,
                        "独立根记录机会性关联既有学习计划"
                    );
                }
            }
            None => {}
        }

        Ok(())
    }

    // ==========================================
    // update - 更新选课
    // ==========================================

    /// 更新选课记录
    ///
    /// 流程: 总线前置检查 → 迁移合法性 → 幂等空操作守卫 → 写入 →
    /// 快照与日志 → 完成度传播 → 提交 → 事件发布
    pub fn update(&self, req: UpdateEnrolmentRequest) -> EngineResult<Enrolment> {
        if !self.bus.is_available() {
            return Err(EngineError::BusUnavailable);
        }

        let mut cache = ContentLookupCache::new(self.graph.as_ref());
        let mut batch = EventBatch::new();
        let scope = TransactionScope::begin(self.conn.clone()).map_err(Self::tx_err)?;

        let Some(current) = self.enrolment_repo.find_by_id(&req.enrolment_id)? else {
            let _ = scope.rollback();
            return Err(EngineError::EnrolmentNotFound {
                enrolment_id: req.enrolment_id,
            });
        };

        let target = req.status.unwrap_or(current.status);
        if !current
            .status
            .can_transition_to(target, req.privileged, req.recalculate)
        {
            let _ = scope.rollback();
            return Err(EngineError::InvalidTransition {
                from: current.status.to_string(),
                to: target.to_string(),
            });
        }

        let mut updated = current.clone();
        updated.status = target;
        if let Some(result) = req.result {
            updated.result = Some(result);
        }
        if let Some(pass) = req.pass {
            updated.pass = pass;
        }
        if let Some(start_ts) = req.start_ts {
            updated.start_ts = Some(start_ts);
        }
        if let Some(end_ts) = req.end_ts {
            updated.end_ts = Some(end_ts);
        }

        // 幂等空操作守卫: 受追踪字段无变化且目标非 COMPLETED ⇒
        // 不写入不发布 (COMPLETED 总是重新处理, 保证传播一致性)
        let unchanged = updated.status == current.status
            && updated.result == current.result
            && updated.pass == current.pass
            && updated.start_ts == current.start_ts
            && updated.end_ts == current.end_ts;
        if unchanged && target != EnrolmentStatus::Completed {
            debug!(
                enrolment_id = %current.enrolment_id,
                "幂等空操作守卫: 无变化, 跳过写入与发布"
            );
            scope.commit().map_err(Self::tx_err)?;
            return Ok(current);
        }

        let now = crate::domain::now_ts();
        if target == EnrolmentStatus::Completed && updated.end_ts.is_none() {
            updated.end_ts = Some(now);
        }
        if target == EnrolmentStatus::InProgress && updated.start_ts.is_none() {
            updated.start_ts = Some(now);
        }
        updated.changed_at = now;
        updated.data.actor = req.actor_info.clone();

        let history_limit = self
            .config
            .history_limit()
            .map_err(EngineError::from_config)?;
        updated.data.append_history(
            HistoryEntry {
                ts: now,
                actor: req.actor.clone(),
                action: ActionType::Update.as_str().to_string(),
                note: Some(format!("{} → {}", current.status, target)),
            },
            history_limit,
        );

        let rows = self.enrolment_repo.update(&updated)?;
        if rows == 0 {
            // 查询与写入之间被并发删除: 良性竞态, 按空操作成功处理
            warn!(
                enrolment_id = %req.enrolment_id,
                "选课记录在更新期间被并发删除, 视为空操作"
            );
            scope.commit().map_err(Self::tx_err)?;
            return Ok(current);
        }

        self.recorder
            .record_if_changed(&updated, req.note.clone(), &mut batch)?;
        self.recorder.record_action(
            ActionType::Update,
            &req.actor,
            &updated,
            Some(&current),
            None,
        )?;

        let mut updated_event = EnrolmentEvent::new(
            EnrolmentEventType::EnrolmentUpdated,
            updated.to_event_payload(),
        )
        .with_original(current.to_event_payload());
        if let Some(actor_info) = &req.actor_info {
            updated_event = updated_event.with_embedded(
                serde_json::to_value(actor_info).unwrap_or(serde_json::Value::Null),
            );
        }
        batch.add(updated_event);

        // 自底向上传播 (重算标志透传, 允许祖先降级)
        self.propagation
            .spread_status(&updated, req.recalculate, &mut cache, &mut batch)?;

        scope.commit().map_err(Self::tx_err)?;

        let published = batch.flush(self.bus.as_ref());
        info!(
            enrolment_id = %updated.enrolment_id,
            from = %current.status,
            to = %target,
            published,
            "选课更新完成"
        );

        Ok(updated)
    }

    // ==========================================
    // delete - 级联删除
    // ==========================================

    /// 删除选课记录(级联后代)
    ///
    /// # 参数
    /// - `archive_children`: 是否为后代节点补写修订快照(根节点总是补写)
    ///
    /// # 返回
    /// 删除的节点数
    pub fn delete(
        &self,
        enrolment_id: &str,
        archive_children: bool,
        actor: &str,
    ) -> EngineResult<usize> {
        if !self.bus.is_available() {
            return Err(EngineError::BusUnavailable);
        }

        let mut batch = EventBatch::new();
        let scope = TransactionScope::begin(self.conn.clone()).map_err(Self::tx_err)?;

        let Some(root) = self.enrolment_repo.find_by_id(enrolment_id)? else {
            let _ = scope.rollback();
            return Err(EngineError::EnrolmentNotFound {
                enrolment_id: enrolment_id.to_string(),
            });
        };

        let deleted = self.delete_cascade(&root, archive_children, actor, &mut batch)?;

        scope.commit().map_err(Self::tx_err)?;

        let published = batch.flush(self.bus.as_ref());
        info!(enrolment_id, deleted, published, "选课级联删除完成");

        Ok(deleted)
    }

    /// 级联删除实现(可重入: 也用于重新报读的既有子树归档)
    ///
    /// 子节点先删(外键约束); 每个节点恰好一条 Delete 日志与一个删除事件
    fn delete_cascade(
        &self,
        root: &Enrolment,
        archive_children: bool,
        actor: &str,
        batch: &mut EventBatch,
    ) -> EngineResult<usize> {
        let subtree = self.enrolment_repo.find_subtree(&root.enrolment_id)?;

        let mut deleted = 0;
        for node in subtree.iter().rev() {
            if archive_children || node.enrolment_id == root.enrolment_id {
                self.recorder
                    .record_if_changed(node, Some("删除前快照".to_string()), batch)?;
            }
            self.recorder
                .record_delete(actor, node, Some("级联删除".to_string()))?;
            self.enrolment_repo.delete(&node.enrolment_id)?;
            batch.add(EnrolmentEvent::new(
                EnrolmentEventType::EnrolmentDeleted,
                node.to_event_payload(),
            ));
            deleted += 1;
        }

        Ok(deleted)
    }

    // ==========================================
    // restore - 从修订快照恢复
    // ==========================================

    /// 从最新修订快照重建已删除的选课记录及其后代(父先于子)
    ///
    /// # 返回
    /// 重建的选课记录 (先根序)
    pub fn restore(&self, enrolment_id: &str, actor: &str) -> EngineResult<Vec<Enrolment>> {
        if !self.bus.is_available() {
            return Err(EngineError::BusUnavailable);
        }

        let mut batch = EventBatch::new();
        let scope = TransactionScope::begin(self.conn.clone()).map_err(Self::tx_err)?;

        if let Some(existing) = self.enrolment_repo.find_by_id(enrolment_id)? {
            let _ = scope.rollback();
            return Err(EngineError::Conflict {
                existing_id: existing.enrolment_id,
            });
        }

        let Some(latest) = self.revision_repo.find_latest(enrolment_id)? else {
            let _ = scope.rollback();
            return Err(EngineError::NothingToRestore {
                enrolment_id: enrolment_id.to_string(),
            });
        };

        let history_limit = self
            .config
            .history_limit()
            .map_err(EngineError::from_config)?;

        let mut restored = Vec::new();
        self.restore_node(&latest, actor, history_limit, &mut restored, &mut batch)?;

        scope.commit().map_err(Self::tx_err)?;

        let published = batch.flush(self.bus.as_ref());
        info!(
            enrolment_id,
            restored = restored.len(),
            published,
            "选课恢复完成"
        );

        Ok(restored)
    }

    /// 重建单个节点并递归重建其后代(父先于子, 外键约束)
    fn restore_node(
        &self,
        revision: &EnrolmentRevision,
        actor: &str,
        history_limit: usize,
        restored: &mut Vec<Enrolment>,
        batch: &mut EventBatch,
    ) -> EngineResult<()> {
        let now = crate::domain::now_ts();

        let mut data = EnrolmentData::default();
        data.append_history(
            HistoryEntry {
                ts: now,
                actor: actor.to_string(),
                action: ActionType::Restore.as_str().to_string(),
                note: Some(format!("从快照 {} 恢复", revision.revision_id)),
            },
            history_limit,
        );

        let enrolment = Enrolment {
            enrolment_id: revision.enrolment_id.clone(),
            user_id: revision.user_id.clone(),
            tenant_id: revision.tenant_id.clone(),
            content_id: revision.content_id.clone(),
            parent_content_id: revision.parent_content_id.clone(),
            parent_enrolment_id: revision.parent_enrolment_id.clone(),
            status: revision.status,
            result: revision.result,
            pass: revision.pass,
            start_ts: revision.start_ts,
            end_ts: revision.end_ts,
            data,
            created_at: now,
            changed_at: now,
        };

        self.enrolment_repo.insert(&enrolment)?;
        // 恢复是从无到有的重建, previous 为空 ⇒ diff 记录全部字段为新增
        self.recorder.record_action(
            ActionType::Restore,
            actor,
            &enrolment,
            None,
            Some(format!("快照 {}", revision.revision_id)),
        )?;
        batch.add(EnrolmentEvent::new(
            EnrolmentEventType::EnrolmentCreated,
            enrolment.to_event_payload(),
        ));
        restored.push(enrolment);

        for child in self
            .revision_repo
            .find_latest_children(&revision.enrolment_id)?
        {
            // 子记录仍存活(未被级联删除)则跳过重建
            if self.enrolment_repo.find_by_id(&child.enrolment_id)?.is_some() {
                continue;
            }
            self.restore_node(&child, actor, history_limit, restored, batch)?;
        }

        Ok(())
    }
}
