// ==========================================
// 企业培训学习管理系统 - 完成规则解析器
// ==========================================
// 职责: 为选课记录解析截止日期(显式优先, 其次按内容节点配置的规则)
// 红线: 显式日期直接胜出, 不做任何规则查找
// ==========================================

use crate::domain::completion_rule::{CompletionRule, ResolvedDueDate};
use crate::domain::enrolment::Enrolment;
use crate::domain::types::ContentType;
use crate::engine::content::ContentLookupCache;
use crate::engine::error::{EngineError, EngineResult};
use crate::repository::EnrolmentRepository;
use chrono::NaiveDateTime;
use std::sync::Arc;
use tracing::debug;

// ==========================================
// CompletionRuleResolver - 截止日期解析器
// ==========================================
pub struct CompletionRuleResolver {
    enrolment_repo: Arc<EnrolmentRepository>,
}

impl CompletionRuleResolver {
    /// 创建新的解析器实例
    pub fn new(enrolment_repo: Arc<EnrolmentRepository>) -> Self {
        Self { enrolment_repo }
    }

    /// 解析选课记录的截止日期
    ///
    /// # 解析顺序
    /// 1. 调用方显式提供的日期 ⇒ 直接胜出, 合成 FIXED 规则返回
    /// 2. 内容节点配置的规则:
    ///    - FIXED: 字面值
    ///    - OWN_DURATION: 基准 = 本记录开始时间(缺省回落到创建时间)
    ///    - PARENT_DURATION: 基准 = 父选课记录递归解析所得截止日期;
    ///      无父选课记录 ⇒ 无截止日期
    ///    - COURSE_DURATION: 基准 = 祖先课程选课记录的开始时间
    /// 3. 均未命中 ⇒ None (编排器据此尝试机会性关联既有学习计划)
    pub fn resolve_due_date(
        &self,
        enrolment: &Enrolment,
        explicit: Option<NaiveDateTime>,
        cache: &mut ContentLookupCache<'_>,
    ) -> EngineResult<Option<ResolvedDueDate>> {
        if let Some(due_ts) = explicit {
            debug!(
                enrolment_id = %enrolment.enrolment_id,
                due_ts = %due_ts,
                "显式截止日期胜出, 跳过规则查找"
            );
            return Ok(Some(ResolvedDueDate {
                due_ts,
                rule: CompletionRule::Fixed {
                    entity_id: enrolment.content_id.clone(),
                    due_ts,
                },
            }));
        }

        let Some(rule) = cache
            .completion_rule(&enrolment.content_id)
            .map_err(EngineError::from_content_graph)?
        else {
            return Ok(None);
        };

        let base = match &rule {
            CompletionRule::Fixed { .. } => {
                // FIXED 忽略基准日期
                crate::domain::now_ts()
            }
            CompletionRule::OwnDuration { .. } => {
                enrolment.start_ts.unwrap_or(enrolment.created_at)
            }
            CompletionRule::ParentDuration { .. } => {
                let Some(parent_due) = self.resolve_parent_due(enrolment, cache)? else {
                    debug!(
                        enrolment_id = %enrolment.enrolment_id,
                        "PARENT_DURATION 规则但父级无可解析截止日期, 不产生截止日期"
                    );
                    return Ok(None);
                };
                parent_due
            }
            CompletionRule::CourseDuration { .. } => {
                let Some(course_start) = self.locate_course_start(enrolment, cache)? else {
                    debug!(
                        enrolment_id = %enrolment.enrolment_id,
                        "COURSE_DURATION 规则但无祖先课程选课记录, 不产生截止日期"
                    );
                    return Ok(None);
                };
                course_start
            }
        };

        let due_ts = rule.apply_to_base(base);
        debug!(
            enrolment_id = %enrolment.enrolment_id,
            rule_type = rule.rule_type_str(),
            due_ts = %due_ts,
            "按规则解析出截止日期"
        );

        Ok(Some(ResolvedDueDate { due_ts, rule }))
    }

    /// 递归解析父选课记录自身的截止日期(按父节点自己的规则)
    fn resolve_parent_due(
        &self,
        enrolment: &Enrolment,
        cache: &mut ContentLookupCache<'_>,
    ) -> EngineResult<Option<NaiveDateTime>> {
        let Some(parent_id) = enrolment.parent_enrolment_id.clone() else {
            return Ok(None);
        };
        let Some(parent) = self.enrolment_repo.find_by_id(&parent_id)? else {
            return Ok(None);
        };

        Ok(self
            .resolve_due_date(&parent, None, cache)?
            .map(|r| r.due_ts))
    }

    /// 定位祖先课程选课记录的开始时间
    fn locate_course_start(
        &self,
        enrolment: &Enrolment,
        cache: &mut ContentLookupCache<'_>,
    ) -> EngineResult<Option<NaiveDateTime>> {
        // 沿选课树上行查找课程类型祖先
        let mut cursor = enrolment.clone();
        while let Some(parent_id) = cursor.parent_enrolment_id.clone() {
            let Some(parent) = self.enrolment_repo.find_by_id(&parent_id)? else {
                break;
            };
            let ct = cache
                .content_type(&parent.content_id)
                .map_err(EngineError::from_content_graph)?;
            if ct == Some(ContentType::Course) {
                return Ok(Some(parent.start_ts.unwrap_or(parent.created_at)));
            }
            cursor = parent;
        }

        // 内容图回落
        let course_content = cache
            .ancestor_of_type(&enrolment.content_id, ContentType::Course)
            .map_err(EngineError::from_content_graph)?;
        if let Some(content_id) = course_content {
            if let Some(course) = self.enrolment_repo.find_by_user_content(
                &enrolment.user_id,
                &enrolment.tenant_id,
                &content_id,
            )? {
                return Ok(Some(course.start_ts.unwrap_or(course.created_at)));
            }
        }

        Ok(None)
    }
}
