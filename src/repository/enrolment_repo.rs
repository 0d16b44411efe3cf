// ==========================================
// 企业培训学习管理系统 - 选课记录仓储
// ==========================================
// 红线: Repository 不做业务逻辑, 只做数据映射
// 约束: 所有查询使用参数化, 防止 SQL 注入
// ==========================================

use crate::domain::enrolment::{Enrolment, EnrolmentData};
use crate::domain::types::EnrolmentStatus;
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::NaiveDateTime;
use rusqlite::{params, Connection, Row};
use std::sync::{Arc, Mutex};

/// 时间戳存储格式
pub(crate) const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// 格式化可选时间戳
pub(crate) fn fmt_ts(ts: &Option<NaiveDateTime>) -> Option<String> {
    ts.map(|t| t.format(TS_FORMAT).to_string())
}

/// 解析可选时间戳
pub(crate) fn parse_ts(s: Option<String>) -> Option<NaiveDateTime> {
    s.and_then(|v| NaiveDateTime::parse_from_str(&v, TS_FORMAT).ok())
}

/// 解析必填时间戳(解析失败回落为 epoch, 并在调用处留痕)
pub(crate) fn parse_ts_required(s: String) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(&s, TS_FORMAT).unwrap_or_default()
}

// ==========================================
// EnrolmentRepository - 选课记录仓储
// ==========================================
pub struct EnrolmentRepository {
    conn: Arc<Mutex<Connection>>,
}

impl EnrolmentRepository {
    /// 创建新的选课记录仓储
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// 获取数据库连接
    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 行映射
    fn map_row(row: &Row<'_>) -> rusqlite::Result<Enrolment> {
        let status: String = row.get("status")?;
        let data_json: String = row.get("data_json")?;
        Ok(Enrolment {
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
            data: EnrolmentData::from_json_str(&data_json),
            created_at: parse_ts_required(row.get("created_at")?),
            changed_at: parse_ts_required(row.get("changed_at")?),
        })
    }

    // ==========================================
    // 写入操作
    // ==========================================

    /// 插入选课记录
    ///
    /// # 返回
    /// - `Ok(enrolment_id)`: 成功插入
    /// - `Err(UniqueConstraintViolation)`: 复合键冲突(并发重复创建)
    pub fn insert(&self, enrolment: &Enrolment) -> RepositoryResult<String> {
        let conn = self.get_conn()?;

        conn.execute(
            r#"
            INSERT INTO enrolment (
                enrolment_id, user_id, tenant_id, content_id,
                parent_content_id, parent_enrolment_id, status, result,
                pass, start_ts, end_ts, data_json, created_at, changed_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            params![
                enrolment.enrolment_id,
                enrolment.user_id,
                enrolment.tenant_id,
                enrolment.content_id,
                enrolment.parent_content_id,
                enrolment.parent_enrolment_id,
                enrolment.status.to_db_str(),
                enrolment.result,
                enrolment.pass,
                fmt_ts(&enrolment.start_ts),
                fmt_ts(&enrolment.end_ts),
                enrolment.data.to_json_string(),
                enrolment.created_at.format(TS_FORMAT).to_string(),
                enrolment.changed_at.format(TS_FORMAT).to_string(),
            ],
        )?;

        Ok(enrolment.enrolment_id.clone())
    }

    /// 更新选课记录(按主键整行覆盖)
    ///
    /// # 返回
    /// - `Ok(rows)`: 受影响行数(0 ⇒ 记录已被并发删除)
    pub fn update(&self, enrolment: &Enrolment) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;

        let rows = conn.execute(
            r#"
            UPDATE enrolment SET
                user_id = ?2, tenant_id = ?3, content_id = ?4,
                parent_content_id = ?5, parent_enrolment_id = ?6,
                status = ?7, result = ?8, pass = ?9,
                start_ts = ?10, end_ts = ?11, data_json = ?12, changed_at = ?13
            WHERE enrolment_id = ?1
            "#,
            params![
                enrolment.enrolment_id,
                enrolment.user_id,
                enrolment.tenant_id,
                enrolment.content_id,
                enrolment.parent_content_id,
                enrolment.parent_enrolment_id,
                enrolment.status.to_db_str(),
                enrolment.result,
                enrolment.pass,
                fmt_ts(&enrolment.start_ts),
                fmt_ts(&enrolment.end_ts),
                enrolment.data.to_json_string(),
                enrolment.changed_at.format(TS_FORMAT).to_string(),
            ],
        )?;

        Ok(rows)
    }

    /// 删除选课记录(物理删除; 审计依赖修订快照与操作日志)
    pub fn delete(&self, enrolment_id: &str) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let rows = conn.execute(
            "DELETE FROM enrolment WHERE enrolment_id = ?1",
            params![enrolment_id],
        )?;
        Ok(rows)
    }

    // ==========================================
    // 查询操作
    // ==========================================

    /// 按主键查询
    pub fn find_by_id(&self, enrolment_id: &str) -> RepositoryResult<Option<Enrolment>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare("SELECT * FROM enrolment WHERE enrolment_id = ?1")?;
        let mut rows = stmt.query_map(params![enrolment_id], Self::map_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// 按复合键查询 (user, tenant, content, parent_content)
    ///
    /// parent_content 为 None 时按 IS NULL 匹配
    pub fn find_by_key(
        &self,
        user_id: &str,
        tenant_id: &str,
        content_id: &str,
        parent_content_id: Option<&str>,
    ) -> RepositoryResult<Option<Enrolment>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT * FROM enrolment
            WHERE user_id = ?1 AND tenant_id = ?2 AND content_id = ?3
              AND (parent_content_id = ?4 OR (?4 IS NULL AND parent_content_id IS NULL))
            "#,
        )?;
        let mut rows = stmt.query_map(
            params![user_id, tenant_id, content_id, parent_content_id],
            Self::map_row,
        )?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// 按 (user, tenant, content) 查询(忽略父内容, 用于祖先课程定位)
    pub fn find_by_user_content(
        &self,
        user_id: &str,
        tenant_id: &str,
        content_id: &str,
    ) -> RepositoryResult<Option<Enrolment>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT * FROM enrolment
            WHERE user_id = ?1 AND tenant_id = ?2 AND content_id = ?3
            ORDER BY created_at LIMIT 1
            "#,
        )?;
        let mut rows = stmt.query_map(params![user_id, tenant_id, content_id], Self::map_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// 查询直接子选课记录
    pub fn find_children(&self, parent_enrolment_id: &str) -> RepositoryResult<Vec<Enrolment>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM enrolment WHERE parent_enrolment_id = ?1 ORDER BY created_at",
        )?;
        let rows = stmt.query_map(params![parent_enrolment_id], Self::map_row)?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    /// 查询整棵子树(含根, 按深度先根序)
    ///
    /// 用于级联删除与课程成绩聚合; 递归 CTE, 深度由内容层级自然约束
    pub fn find_subtree(&self, root_enrolment_id: &str) -> RepositoryResult<Vec<Enrolment>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            WITH RECURSIVE subtree(enrolment_id, depth) AS (
                SELECT enrolment_id, 0 FROM enrolment WHERE enrolment_id = ?1
                UNION ALL
                SELECT e.enrolment_id, s.depth + 1
                FROM enrolment e
                JOIN subtree s ON e.parent_enrolment_id = s.enrolment_id
            )
            SELECT e.* FROM enrolment e
            JOIN subtree s ON e.enrolment_id = s.enrolment_id
            ORDER BY s.depth, e.created_at
            "#,
        )?;
        let rows = stmt.query_map(params![root_enrolment_id], Self::map_row)?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }
}
