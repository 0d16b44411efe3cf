// ==========================================
// 企业培训学习管理系统 - 操作日志仓储
// ==========================================
// 红线: Repository 不做业务逻辑, 只做数据映射
// 红线: action_log 为 append-only, 不提供更新/删除接口
// ==========================================

use crate::domain::action_log::ActionLog;
use crate::repository::enrolment_repo::{parse_ts_required, TS_FORMAT};
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection, Row};
use std::sync::{Arc, Mutex};

// ==========================================
// ActionLogRepository - 操作日志仓储
// ==========================================
pub struct ActionLogRepository {
    conn: Arc<Mutex<Connection>>,
}

impl ActionLogRepository {
    /// 创建新的操作日志仓储
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    fn map_row(row: &Row<'_>) -> rusqlite::Result<ActionLog> {
        let diff_json: Option<String> = row.get("diff_json")?;
        Ok(ActionLog {
            action_id: row.get("action_id")?,
            enrolment_id: row.get("enrolment_id")?,
            action_type: row.get("action_type")?,
            action_ts: parse_ts_required(row.get("action_ts")?),
            actor: row.get("actor")?,
            diff_json: diff_json.and_then(|s| serde_json::from_str(&s).ok()),
            detail: row.get("detail")?,
        })
    }

    /// 插入操作日志
    ///
    /// # 返回
    /// - `Ok(action_id)`: 成功插入
    pub fn insert(&self, log: &ActionLog) -> RepositoryResult<String> {
        let conn = self.get_conn()?;

        conn.execute(
            r#"
            INSERT INTO action_log (
                action_id, enrolment_id, action_type, action_ts, actor,
                diff_json, detail
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
            params![
                log.action_id,
                log.enrolment_id,
                log.action_type,
                log.action_ts.format(TS_FORMAT).to_string(),
                log.actor,
                log.diff_json.as_ref().map(|v| v.to_string()),
                log.detail,
            ],
        )?;

        Ok(log.action_id.clone())
    }

    /// 查询某选课记录的全部日志(时间升序)
    pub fn list_for_enrolment(&self, enrolment_id: &str) -> RepositoryResult<Vec<ActionLog>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM action_log WHERE enrolment_id = ?1 ORDER BY action_ts, rowid",
        )?;
        let rows = stmt.query_map(params![enrolment_id], Self::map_row)?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    /// 按操作类型统计某选课记录的日志数量
    pub fn count_by_type(&self, enrolment_id: &str, action_type: &str) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM action_log WHERE enrolment_id = ?1 AND action_type = ?2",
            params![enrolment_id, action_type],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}
