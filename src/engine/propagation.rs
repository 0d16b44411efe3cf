// ==========================================
// 企业培训学习管理系统 - 完成度传播引擎
// ==========================================
// 职责: 子记录状态变更后, 自底向上重算祖先的完成/通过状态
// 红线: 幂等空操作守卫是并发重复级联的唯一安全网, 必须保持显式契约
// 红线: MODULE 类型节点要求全部活动子节点完成, 其他类型只需一个
//       (有意保留的非对称规则, 未经产品澄清不得"修复")
// ==========================================

use crate::config::ConfigManager;
use crate::domain::action_log::ActionType;
use crate::domain::enrolment::{Enrolment, HistoryEntry};
use crate::domain::types::{ContentType, EnrolmentStatus};
use crate::engine::content::{ContentChildren, ContentLookupCache};
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::events::{EnrolmentEvent, EnrolmentEventType, EventBatch};
use crate::engine::revision::RevisionRecorder;
use crate::repository::EnrolmentRepository;
use serde_json::{json, Value as JsonValue};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 传播引发变更时写入审计的操作者标识
const SYSTEM_ACTOR: &str = "system:propagation";

// ==========================================
// AssessmentEntry - 课程成绩聚合条目
// ==========================================
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AssessmentEntry {
    pub id: String,                 // 学习对象ID
    pub content_type: ContentType,  // 对象类型
    pub pass: i64,                  // 通过标志
    pub result: f64,                // 成绩 (无尝试时为 0)
}

// ==========================================
// CompletionPropagationEngine - 完成度传播引擎
// ==========================================
pub struct CompletionPropagationEngine {
    enrolment_repo: Arc<EnrolmentRepository>,
    recorder: Arc<RevisionRecorder>,
    config: Arc<ConfigManager>,
}

impl CompletionPropagationEngine {
    /// 创建新的传播引擎实例
    pub fn new(
        enrolment_repo: Arc<EnrolmentRepository>,
        recorder: Arc<RevisionRecorder>,
        config: Arc<ConfigManager>,
    ) -> Self {
        Self {
            enrolment_repo,
            recorder,
            config,
        }
    }

    /// 状态传播入口
    ///
    /// # 参数
    /// - `enrolment`: 刚发生状态变更的选课记录
    /// - `recalculate`: 重算模式, 允许 COMPLETED → IN_PROGRESS 降级
    /// - `cache`: 请求作用域内容查找缓存
    /// - `batch`: 事务内延迟发布批次
    ///
    /// 递归按实际内容层级深度自然有界, 不设显式深度守卫
    pub fn spread_status(
        &self,
        enrolment: &Enrolment,
        recalculate: bool,
        cache: &mut ContentLookupCache<'_>,
        batch: &mut EventBatch,
    ) -> EngineResult<()> {
        debug!(
            enrolment_id = %enrolment.enrolment_id,
            status = %enrolment.status,
            recalculate,
            "开始完成度传播"
        );

        self.ascend(enrolment, recalculate, cache, batch)?;

        // 可评分叶子触发课程级成绩聚合重发
        let trigger_type = cache
            .content_type(&enrolment.content_id)
            .map_err(EngineError::from_content_graph)?;
        if trigger_type.map(|t| t.is_assessable()).unwrap_or(false)
            && self
                .config
                .publish_course_updates()
                .map_err(EngineError::from_config)?
        {
            self.republish_course_aggregate(enrolment, cache, batch)?;
        }

        Ok(())
    }

    // ==========================================
    // 向上递归
    // ==========================================

    fn ascend(
        &self,
        child: &Enrolment,
        recalculate: bool,
        cache: &mut ContentLookupCache<'_>,
        batch: &mut EventBatch,
    ) -> EngineResult<()> {
        // 步骤1: 根记录到达, 终止
        let Some(parent_id) = child.parent_enrolment_id.clone() else {
            return Ok(());
        };

        let Some(parent) = self.enrolment_repo.find_by_id(&parent_id)? else {
            // 并发删除: 良性竞态, 记录后按空操作成功处理
            warn!(
                parent_enrolment_id = %parent_id,
                child_enrolment_id = %child.enrolment_id,
                "父选课记录在传播期间消失, 视为空操作"
            );
            return Ok(());
        };
        let previous = parent.clone();
        let mut parent = parent;

        // 步骤2: 可见性提升 —— 子记录进行中 ⇒ 未开始的父记录立即进行中
        let promoted = child.status == EnrolmentStatus::InProgress
            && parent.status == EnrolmentStatus::NotStarted;
        if promoted {
            parent.status = EnrolmentStatus::InProgress;
        }

        // 步骤3/4: 完成判定与重算降级
        let completion = self.completion_satisfied(&parent, cache)?;
        let mut target = parent.status;
        if completion {
            target = EnrolmentStatus::Completed;
        } else if recalculate && parent.status == EnrolmentStatus::Completed {
            // 子记录回退后父记录不再满足完成谓词 ⇒ 降级
            target = EnrolmentStatus::InProgress;
        }

        // 步骤5: 通过判定 (与完成判定同构, 基于通过标志)
        let pass_satisfied = self.pass_satisfied(&parent, cache)?;
        let new_pass: i64 = if pass_satisfied { 1 } else { 0 };

        // 幂等空操作守卫: 状态与通过标志均未变化且目标非 COMPLETED ⇒
        // 不写入不发布, 终止级联 (并发重复级联的主要防线);
        // COMPLETED 目标总是重新处理, 保证部分失败后的传播与审计一致性
        let state_changed = target != previous.status || new_pass != previous.pass;
        if !state_changed && target != EnrolmentStatus::Completed {
            debug!(
                enrolment_id = %parent.enrolment_id,
                status = %target,
                "状态未变化且目标非完成, 幂等守卫终止级联"
            );
            return Ok(());
        }

        let now = crate::domain::now_ts();
        let action_type = if target == EnrolmentStatus::InProgress
            && previous.status == EnrolmentStatus::Completed
        {
            ActionType::Recalculate
        } else {
            ActionType::Propagate
        };

        parent.status = target;
        parent.pass = new_pass;
        if target == EnrolmentStatus::Completed && previous.status != EnrolmentStatus::Completed {
            parent.end_ts = Some(now);
        }
        if target == EnrolmentStatus::InProgress && previous.status == EnrolmentStatus::Completed {
            // 降级后结束时间不再成立
            parent.end_ts = None;
        }
        parent.changed_at = now;

        let history_limit = self.config.history_limit().map_err(EngineError::from_config)?;
        parent.data.append_history(
            HistoryEntry {
                ts: now,
                actor: SYSTEM_ACTOR.to_string(),
                action: action_type.as_str().to_string(),
                note: Some(format!("{} → {}", previous.status, target)),
            },
            history_limit,
        );

        let rows = self.enrolment_repo.update(&parent)?;
        if rows == 0 {
            warn!(
                enrolment_id = %parent.enrolment_id,
                "父选课记录在更新与回读之间被并发删除, 视为空操作"
            );
            return Ok(());
        }

        info!(
            enrolment_id = %parent.enrolment_id,
            from = %previous.status,
            to = %target,
            pass = new_pass,
            "传播引擎更新父选课状态"
        );

        self.recorder
            .record_if_changed(&parent, Some("完成度传播".to_string()), batch)?;
        self.recorder
            .record_action(action_type, SYSTEM_ACTOR, &parent, Some(&previous), None)?;

        batch.add(
            EnrolmentEvent::new(
                EnrolmentEventType::EnrolmentUpdated,
                parent.to_event_payload(),
            )
            .with_original(previous.to_event_payload()),
        );

        // 继续向上递归 (重算标志透传)
        self.ascend(&parent, recalculate, cache, batch)
    }

    // ==========================================
    // 完成/通过谓词
    // ==========================================

    /// 完成谓词:
    /// (a) 已完成选修子节点数 ≥ 选修配额
    /// (b) 所有必修子节点完成 (若存在)
    /// (c) 活动子节点: MODULE 类型要求全部完成, 其他类型至少一个完成
    fn completion_satisfied(
        &self,
        parent: &Enrolment,
        cache: &mut ContentLookupCache<'_>,
    ) -> EngineResult<bool> {
        self.predicate_satisfied(parent, cache, |e| e.is_completed())
    }

    /// 通过谓词: 与完成谓词同构, 基于通过标志
    fn pass_satisfied(
        &self,
        parent: &Enrolment,
        cache: &mut ContentLookupCache<'_>,
    ) -> EngineResult<bool> {
        self.predicate_satisfied(parent, cache, |e| e.is_passed())
    }

    fn predicate_satisfied<F>(
        &self,
        parent: &Enrolment,
        cache: &mut ContentLookupCache<'_>,
        satisfied: F,
    ) -> EngineResult<bool>
    where
        F: Fn(&Enrolment) -> bool,
    {
        let children = cache
            .children(&parent.content_id)
            .map_err(EngineError::from_content_graph)?;

        let child_enrolments = self.enrolment_repo.find_children(&parent.enrolment_id)?;
        let by_content: HashMap<&str, &Enrolment> = child_enrolments
            .iter()
            .map(|e| (e.content_id.as_str(), e))
            .collect();
        let child_ok =
            |content_id: &String| by_content.get(content_id.as_str()).map(|e| satisfied(e)).unwrap_or(false);

        // (a) 选修配额
        let quota = cache
            .elective_quota(&parent.content_id)
            .map_err(EngineError::from_content_graph)?;
        let elective_done = children.elective.iter().filter(|c| child_ok(c)).count() as i64;
        if elective_done < quota {
            return Ok(false);
        }

        // (b) 必修全部满足 (若存在)
        if !children.mandatory.is_empty() && !children.mandatory.iter().all(&child_ok) {
            return Ok(false);
        }

        // (c) 活动子节点: 非对称规则
        if !children.events.is_empty() {
            let parent_type = cache
                .content_type(&parent.content_id)
                .map_err(EngineError::from_content_graph)?;
            let events_ok = if parent_type == Some(ContentType::Module) {
                children.events.iter().all(&child_ok)
            } else {
                children.events.iter().any(&child_ok)
            };
            if !events_ok {
                return Ok(false);
            }
        }

        Ok(true)
    }

    // ==========================================
    // 课程级成绩聚合重发
    // ==========================================

    /// 为触发记录所属课程重发更新事件, 携带聚合成绩
    ///
    /// - 恰好一个可评分后代 ⇒ 直接以其成绩作为 result
    /// - 多于一个 ⇒ 附 assessments 列表, 为无尝试的必修可评分项
    ///   合成零值占位, 保证聚合始终确定性枚举全部必修可评分项
    fn republish_course_aggregate(
        &self,
        trigger: &Enrolment,
        cache: &mut ContentLookupCache<'_>,
        batch: &mut EventBatch,
    ) -> EngineResult<()> {
        let Some(course) = self.locate_course_enrolment(trigger, cache)? else {
            debug!(
                enrolment_id = %trigger.enrolment_id,
                "未找到祖先课程选课记录, 跳过成绩聚合"
            );
            return Ok(());
        };

        // 课程选课子树中的可评分尝试
        let subtree = self.enrolment_repo.find_subtree(&course.enrolment_id)?;
        let mut attempts: Vec<(&Enrolment, ContentType)> = Vec::new();
        for e in subtree.iter().filter(|e| e.enrolment_id != course.enrolment_id) {
            let ct = cache
                .content_type(&e.content_id)
                .map_err(EngineError::from_content_graph)?;
            if let Some(ct) = ct {
                if ct.is_assessable() {
                    attempts.push((e, ct));
                }
            }
        }

        // 课程内容层级下的全部必修可评分项 (占位合成依据)
        let mut mandatory_assessable: Vec<(String, ContentType)> = Vec::new();
        self.collect_mandatory_assessable(&course.content_id, cache, &mut mandatory_assessable)?;

        let mut entries: Vec<AssessmentEntry> = attempts
            .iter()
            .map(|(e, ct)| AssessmentEntry {
                id: e.content_id.clone(),
                content_type: *ct,
                pass: e.pass,
                result: e.result.unwrap_or(0.0),
            })
            .collect();

        let attempted: std::collections::HashSet<&str> =
            attempts.iter().map(|(e, _)| e.content_id.as_str()).collect();
        for (content_id, ct) in &mandatory_assessable {
            if !attempted.contains(content_id.as_str()) {
                entries.push(AssessmentEntry {
                    id: content_id.clone(),
                    content_type: *ct,
                    pass: 0,
                    result: 0.0,
                });
            }
        }

        // 确定性排序
        entries.sort_by(|a, b| a.id.cmp(&b.id));

        let mut payload = course.to_event_payload();
        if attempts.len() == 1 && entries.len() == 1 {
            // 单一可评分后代 ⇒ 直接上浮其成绩
            if let Some(obj) = payload.as_object_mut() {
                obj.insert("result".to_string(), json!(entries[0].result));
            }
        } else if let Some(obj) = payload.as_object_mut() {
            obj.insert(
                "assessments".to_string(),
                serde_json::to_value(&entries).unwrap_or(JsonValue::Null),
            );
        }

        info!(
            course_enrolment_id = %course.enrolment_id,
            attempts = attempts.len(),
            entries = entries.len(),
            "重发课程更新事件(成绩聚合)"
        );

        batch.add(EnrolmentEvent::new(
            EnrolmentEventType::EnrolmentUpdated,
            payload,
        ));

        Ok(())
    }

    /// 定位最近的祖先课程选课记录
    ///
    /// 优先沿选课树父引用上行; 选课树未直接编码时回落到内容图祖先定位
    fn locate_course_enrolment(
        &self,
        trigger: &Enrolment,
        cache: &mut ContentLookupCache<'_>,
    ) -> EngineResult<Option<Enrolment>> {
        // 沿选课树上行
        let mut cursor = trigger.clone();
        while let Some(parent_id) = cursor.parent_enrolment_id.clone() {
            let Some(parent) = self.enrolment_repo.find_by_id(&parent_id)? else {
                break;
            };
            let ct = cache
                .content_type(&parent.content_id)
                .map_err(EngineError::from_content_graph)?;
            if ct == Some(ContentType::Course) {
                return Ok(Some(parent));
            }
            cursor = parent;
        }

        // 内容图回落: 经由父子内容边定位课程祖先
        let course_content = cache
            .ancestor_of_type(&trigger.content_id, ContentType::Course)
            .map_err(EngineError::from_content_graph)?;
        match course_content {
            Some(content_id) => Ok(self.enrolment_repo.find_by_user_content(
                &trigger.user_id,
                &trigger.tenant_id,
                &content_id,
            )?),
            None => Ok(None),
        }
    }

    /// 递归收集内容层级下的必修可评分项
    ///
    /// 仅沿必修边下钻: 选修/活动项无尝试时不合成占位
    fn collect_mandatory_assessable(
        &self,
        content_id: &str,
        cache: &mut ContentLookupCache<'_>,
        out: &mut Vec<(String, ContentType)>,
    ) -> EngineResult<()> {
        let children: ContentChildren = cache
            .children(content_id)
            .map_err(EngineError::from_content_graph)?;

        for child_id in &children.mandatory {
            let ct = cache
                .content_type(child_id)
                .map_err(EngineError::from_content_graph)?;
            match ct {
                Some(t) if t.is_assessable() => out.push((child_id.clone(), t)),
                _ => {}
            }
            self.collect_mandatory_assessable(child_id, cache, out)?;
        }

        Ok(())
    }
}
