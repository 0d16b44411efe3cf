// ==========================================
// 企业培训学习管理系统 - 学习计划仓储
// ==========================================
// 红线: Repository 不做业务逻辑; upsert 语义由 PlanStore 引擎决定
// 覆盖: plan / plan_revision / plan_reference / enrolment_plan
// ==========================================

use crate::domain::plan::{Plan, PlanReference};
use crate::domain::types::{ContentType, PlanStatus};
use crate::repository::enrolment_repo::{fmt_ts, parse_ts, parse_ts_required, TS_FORMAT};
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection, Row};
use serde_json::Value as JsonValue;
use std::sync::{Arc, Mutex};

// ==========================================
// PlanRepository - 学习计划仓储
// ==========================================
pub struct PlanRepository {
    conn: Arc<Mutex<Connection>>,
}

impl PlanRepository {
    /// 创建新的学习计划仓储
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    fn map_row(row: &Row<'_>) -> rusqlite::Result<Plan> {
        let content_type: String = row.get("content_type")?;
        let status: String = row.get("status")?;
        let data_json: Option<String> = row.get("data_json")?;
        Ok(Plan {
            plan_id: row.get("plan_id")?,
            user_id: row.get("user_id")?,
            tenant_id: row.get("tenant_id")?,
            content_type: ContentType::from_db_str(&content_type).unwrap_or(ContentType::Course),
            content_id: row.get("content_id")?,
            assigner_id: row.get("assigner_id")?,
            status: PlanStatus::from_db_str(&status),
            due_ts: parse_ts(row.get("due_ts")?),
            data_json: data_json.and_then(|s| serde_json::from_str(&s).ok()),
            created_at: parse_ts_required(row.get("created_at")?),
            changed_at: parse_ts_required(row.get("changed_at")?),
        })
    }

    // ==========================================
    // plan 写入
    // ==========================================

    /// 插入学习计划
    pub fn insert(&self, plan: &Plan) -> RepositoryResult<String> {
        let conn = self.get_conn()?;

        conn.execute(
            r#"
            INSERT INTO plan (
                plan_id, user_id, tenant_id, content_type, content_id,
                assigner_id, status, due_ts, data_json, created_at, changed_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            params![
                plan.plan_id,
                plan.user_id,
                plan.tenant_id,
                plan.content_type.to_db_str(),
                plan.content_id,
                plan.assigner_id,
                plan.status.to_db_str(),
                fmt_ts(&plan.due_ts),
                plan.data_json.as_ref().map(|v| v.to_string()),
                plan.created_at.format(TS_FORMAT).to_string(),
                plan.changed_at.format(TS_FORMAT).to_string(),
            ],
        )?;

        Ok(plan.plan_id.clone())
    }

    /// 原地更新学习计划(含 created_at, uplift 场景会覆盖创建时间)
    pub fn update(&self, plan: &Plan) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;

        let rows = conn.execute(
            r#"
            UPDATE plan SET
                assigner_id = ?2, status = ?3, due_ts = ?4, data_json = ?5,
                created_at = ?6, changed_at = ?7
            WHERE plan_id = ?1
            "#,
            params![
                plan.plan_id,
                plan.assigner_id,
                plan.status.to_db_str(),
                fmt_ts(&plan.due_ts),
                plan.data_json.as_ref().map(|v| v.to_string()),
                plan.created_at.format(TS_FORMAT).to_string(),
                plan.changed_at.format(TS_FORMAT).to_string(),
            ],
        )?;

        Ok(rows)
    }

    // ==========================================
    // plan 查询
    // ==========================================

    /// 按主键查询
    pub fn find_by_id(&self, plan_id: &str) -> RepositoryResult<Option<Plan>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare("SELECT * FROM plan WHERE plan_id = ?1")?;
        let mut rows = stmt.query_map(params![plan_id], Self::map_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// 按复合键查询 (user, tenant, content_type, content_id)
    pub fn find_by_key(
        &self,
        user_id: &str,
        tenant_id: &str,
        content_type: ContentType,
        content_id: &str,
    ) -> RepositoryResult<Option<Plan>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT * FROM plan
            WHERE user_id = ?1 AND tenant_id = ?2
              AND content_type = ?3 AND content_id = ?4
            "#,
        )?;
        let mut rows = stmt.query_map(
            params![user_id, tenant_id, content_type.to_db_str(), content_id],
            Self::map_row,
        )?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    // ==========================================
    // plan_revision - 更新前快照
    // ==========================================

    /// 写入计划修订快照(整体 JSON)
    pub fn insert_revision(&self, plan_id: &str, snapshot: &JsonValue) -> RepositoryResult<String> {
        let conn = self.get_conn()?;
        let revision_id = uuid::Uuid::new_v4().to_string();
        conn.execute(
            r#"
            INSERT INTO plan_revision (revision_id, plan_id, snapshot_json, created_at)
            VALUES (?, ?, ?, datetime('now'))
            "#,
            params![revision_id, plan_id, snapshot.to_string()],
        )?;
        Ok(revision_id)
    }

    /// 统计某计划的修订快照数量
    pub fn count_revisions(&self, plan_id: &str) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM plan_revision WHERE plan_id = ?1",
            params![plan_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // ==========================================
    // plan_reference - 来源追溯
    // ==========================================

    /// 插入来源追溯
    pub fn insert_reference(&self, reference: &PlanReference) -> RepositoryResult<String> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO plan_reference (reference_id, plan_id, source_type, source_id, active)
            VALUES (?, ?, ?, ?, ?)
            "#,
            params![
                reference.reference_id,
                reference.plan_id,
                reference.source_type,
                reference.source_id,
                reference.active as i64,
            ],
        )?;
        Ok(reference.reference_id.clone())
    }

    /// 软删除某计划的全部来源追溯
    pub fn deactivate_references(&self, plan_id: &str) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let rows = conn.execute(
            "UPDATE plan_reference SET active = 0 WHERE plan_id = ?1",
            params![plan_id],
        )?;
        Ok(rows)
    }

    /// 查询某计划的来源追溯
    pub fn list_references(&self, plan_id: &str) -> RepositoryResult<Vec<PlanReference>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT reference_id, plan_id, source_type, source_id, active
             FROM plan_reference WHERE plan_id = ?1",
        )?;
        let rows = stmt.query_map(params![plan_id], |row| {
            Ok(PlanReference {
                reference_id: row.get(0)?,
                plan_id: row.get(1)?,
                source_type: row.get(2)?,
                source_id: row.get(3)?,
                active: row.get::<_, i64>(4)? != 0,
            })
        })?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    // ==========================================
    // enrolment_plan - 选课↔计划关联
    // ==========================================

    /// 判断关联是否已存在(去重关联)
    pub fn link_exists(&self, enrolment_id: &str, plan_id: &str) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM enrolment_plan WHERE enrolment_id = ?1 AND plan_id = ?2",
            params![enrolment_id, plan_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// 建立选课↔计划关联(已存在则忽略)
    pub fn link(&self, enrolment_id: &str, plan_id: &str) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO enrolment_plan (enrolment_id, plan_id) VALUES (?1, ?2)",
            params![enrolment_id, plan_id],
        )?;
        Ok(())
    }

    /// 查询与某选课记录关联的全部计划
    pub fn list_plans_for_enrolment(&self, enrolment_id: &str) -> RepositoryResult<Vec<Plan>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT p.* FROM plan p
            JOIN enrolment_plan ep ON ep.plan_id = p.plan_id
            WHERE ep.enrolment_id = ?1
            ORDER BY p.created_at
            "#,
        )?;
        let rows = stmt.query_map(params![enrolment_id], Self::map_row)?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }
}
