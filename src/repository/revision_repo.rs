// ==========================================
// 企业培训学习管理系统 - 选课修订快照仓储
// ==========================================
// 红线: 快照只追加不修改; 恢复操作只读取不回写快照表
// ==========================================

use crate::domain::revision::EnrolmentRevision;
use crate::domain::types::EnrolmentStatus;
use crate::repository::enrolment_repo::{fmt_ts, parse_ts, parse_ts_required, TS_FORMAT};
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection, Row};
use std::sync::{Arc, Mutex};

// ==========================================
// RevisionRepository - 修订快照仓储
// ==========================================
pub struct RevisionRepository {
    conn: Arc<Mutex<Connection>>,
}

impl RevisionRepository {
    /// 创建新的修订快照仓储
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    fn map_row(row: &Row<'_>) -> rusqlite::Result<EnrolmentRevision> {
        let status: String = row.get("status")?;
        Ok(EnrolmentRevision {
            revision_id: row.get("revision_id")?,
            enrolment_id: row.get("enrolment_id")?,
            user_id: row.get("user_id")?,
            tenant_id: row.get("tenant_id")?,
            content_id: row.get("content_id")?,
            parent_content_id: row.get("parent_content_id")?,
            parent_enrolment_id: row.get("parent_enrolment_id")?,
            status: EnrolmentStatus::from_db_str(&status),
            result: row.get("result")?,
            pass: row.get("pass")?,
            start_ts: parse_ts(row.get("start_ts")?),
            end_ts: parse_ts(row.get("end_ts")?),
            note: row.get("note")?,
            created_at: parse_ts_required(row.get("created_at")?),
        })
    }

    /// 插入修订快照
    pub fn insert(&self, revision: &EnrolmentRevision) -> RepositoryResult<String> {
        let conn = self.get_conn()?;

        conn.execute(
            r#"
            INSERT INTO enrolment_revision (
                revision_id, enrolment_id, user_id, tenant_id, content_id,
                parent_content_id, parent_enrolment_id, status, result, pass,
                start_ts, end_ts, note, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            params![
                revision.revision_id,
                revision.enrolment_id,
                revision.user_id,
                revision.tenant_id,
                revision.content_id,
                revision.parent_content_id,
                revision.parent_enrolment_id,
                revision.status.to_db_str(),
                revision.result,
                revision.pass,
                fmt_ts(&revision.start_ts),
                fmt_ts(&revision.end_ts),
                revision.note,
                revision.created_at.format(TS_FORMAT).to_string(),
            ],
        )?;

        Ok(revision.revision_id.clone())
    }

    /// 查询某选课记录的最新快照
    pub fn find_latest(&self, enrolment_id: &str) -> RepositoryResult<Option<EnrolmentRevision>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT * FROM enrolment_revision
            WHERE enrolment_id = ?1
            ORDER BY created_at DESC, rowid DESC LIMIT 1
            "#,
        )?;
        let mut rows = stmt.query_map(params![enrolment_id], Self::map_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// 查询某选课记录的全部快照(时间升序)
    pub fn list_for_enrolment(&self, enrolment_id: &str) -> RepositoryResult<Vec<EnrolmentRevision>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT * FROM enrolment_revision
            WHERE enrolment_id = ?1
            ORDER BY created_at, rowid
            "#,
        )?;
        let rows = stmt.query_map(params![enrolment_id], Self::map_row)?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    /// 查询以某记录为父的全部子记录最新快照
    ///
    /// 用途: 删除后的整树恢复 —— 子树结构只能从快照重建
    pub fn find_latest_children(
        &self,
        parent_enrolment_id: &str,
    ) -> RepositoryResult<Vec<EnrolmentRevision>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT r.* FROM enrolment_revision r
            JOIN (
                SELECT enrolment_id, MAX(rowid) AS max_rowid
                FROM enrolment_revision
                WHERE parent_enrolment_id = ?1
                GROUP BY enrolment_id
            ) latest ON r.rowid = latest.max_rowid
            ORDER BY r.created_at
            "#,
        )?;
        let rows = stmt.query_map(params![parent_enrolment_id], Self::map_row)?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    /// 统计某选课记录的快照数量
    pub fn count_for_enrolment(&self, enrolment_id: &str) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM enrolment_revision WHERE enrolment_id = ?1",
            params![enrolment_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}
