// ==========================================
// 企业培训学习管理系统 - 内容图 SQLite 适配
// ==========================================
// 说明: ContentGraph trait 的 SQLite 实现, 读取 content_node / content_edge
// 红线: 本仓储只读; 内容目录的编辑归内容协作方所有
// ==========================================

use crate::domain::completion_rule::CompletionRule;
use crate::domain::types::{ChildClass, ContentType};
use crate::engine::content::{ContentChildren, ContentGraph, ContentResult};
use crate::repository::enrolment_repo::TS_FORMAT;
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex};

// ==========================================
// SqliteContentGraph - 内容图仓储
// ==========================================
pub struct SqliteContentGraph {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteContentGraph {
    /// 创建新的内容图仓储
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    fn children_inner(&self, content_id: &str) -> RepositoryResult<ContentChildren> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT child_id, child_class FROM content_edge WHERE parent_id = ?1 ORDER BY child_id",
        )?;
        let rows = stmt.query_map(params![content_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut children = ContentChildren::default();
        for row in rows {
            let (child_id, class) = row?;
            match ChildClass::from_db_str(&class) {
                Some(ChildClass::Mandatory) => children.mandatory.push(child_id),
                Some(ChildClass::Elective) => children.elective.push(child_id),
                Some(ChildClass::Event) => children.events.push(child_id),
                None => {
                    // 未知分类按必修处理, 宁严勿松
                    children.mandatory.push(child_id);
                }
            }
        }
        Ok(children)
    }

    fn rule_inner(&self, content_id: &str) -> RepositoryResult<Option<CompletionRule>> {
        let conn = self.get_conn()?;
        let row: Option<(Option<String>, Option<String>, Option<i64>)> = conn
            .query_row(
                "SELECT rule_type, rule_value, rule_interval_days
                 FROM content_node WHERE content_id = ?1",
                params![content_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let Some((rule_type, rule_value, interval_days)) = row else {
            return Ok(None);
        };

        let rule = match rule_type.as_deref() {
            Some("FIXED") => {
                let due = rule_value
                    .as_deref()
                    .and_then(|v| NaiveDateTime::parse_from_str(v, TS_FORMAT).ok());
                match due {
                    Some(due_ts) => Some(CompletionRule::Fixed {
                        entity_id: content_id.to_string(),
                        due_ts,
                    }),
                    None => {
                        tracing::warn!(content_id, "FIXED 完成规则缺少合法日期值, 按无规则处理");
                        None
                    }
                }
            }
            Some("OWN_DURATION") => interval_days.map(|d| CompletionRule::OwnDuration {
                entity_id: content_id.to_string(),
                interval_days: d,
            }),
            Some("PARENT_DURATION") => interval_days.map(|d| CompletionRule::ParentDuration {
                entity_id: content_id.to_string(),
                interval_days: d,
            }),
            Some("COURSE_DURATION") => interval_days.map(|d| CompletionRule::CourseDuration {
                entity_id: content_id.to_string(),
                interval_days: d,
            }),
            _ => None,
        };

        Ok(rule)
    }

    fn ancestor_inner(
        &self,
        content_id: &str,
        content_type: ContentType,
    ) -> RepositoryResult<Option<String>> {
        let conn = self.get_conn()?;
        // 沿 content_edge 向上递归, 返回最近的指定类型祖先
        let result: Option<String> = conn
            .query_row(
                r#"
                WITH RECURSIVE ancestors(content_id, depth) AS (
                    SELECT parent_id, 1 FROM content_edge WHERE child_id = ?1
                    UNION ALL
                    SELECT e.parent_id, a.depth + 1
                    FROM content_edge e
                    JOIN ancestors a ON e.child_id = a.content_id
                )
                SELECT a.content_id FROM ancestors a
                JOIN content_node n ON n.content_id = a.content_id
                WHERE n.content_type = ?2
                ORDER BY a.depth LIMIT 1
                "#,
                params![content_id, content_type.to_db_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(result)
    }
}

impl ContentGraph for SqliteContentGraph {
    fn get_children(&self, content_id: &str) -> ContentResult<ContentChildren> {
        Ok(self.children_inner(content_id)?)
    }

    fn get_elective_quota(&self, content_id: &str) -> ContentResult<i64> {
        let conn = self.get_conn()?;
        let quota: Option<i64> = conn
            .query_row(
                "SELECT elective_quota FROM content_node WHERE content_id = ?1",
                params![content_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(RepositoryError::from)?;
        Ok(quota.unwrap_or(0))
    }

    fn get_type(&self, content_id: &str) -> ContentResult<Option<ContentType>> {
        let conn = self.get_conn()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT content_type FROM content_node WHERE content_id = ?1",
                params![content_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(RepositoryError::from)?;
        Ok(raw.and_then(|s| ContentType::from_db_str(&s)))
    }

    fn get_ancestor_of_type(
        &self,
        content_id: &str,
        content_type: ContentType,
    ) -> ContentResult<Option<String>> {
        Ok(self.ancestor_inner(content_id, content_type)?)
    }

    fn exists(&self, content_id: &str) -> ContentResult<bool> {
        let conn = self.get_conn()?;
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM content_node WHERE content_id = ?1",
                params![content_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(RepositoryError::from)?;
        Ok(found.is_some())
    }

    fn get_completion_rule(&self, content_id: &str) -> ContentResult<Option<CompletionRule>> {
        Ok(self.rule_inner(content_id)?)
    }
}
