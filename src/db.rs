// ==========================================
// 企业培训学习管理系统 - SQLite 连接初始化
// ==========================================
// 目标:
// - 统一所有 Connection::open 的 PRAGMA 行为 (foreign_keys / busy_timeout)
// - 集中管理 schema DDL 与 schema_version
// - 提供跨仓储事务作用域 (嵌套扁平化)
// ==========================================

use rusqlite::{Connection, OptionalExtension};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// 默认 busy_timeout(毫秒)
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// 当前代码所期望的 schema_version
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

/// 配置 SQLite 连接的统一 PRAGMA
///
/// 说明:
/// - foreign_keys 需要"每个连接"单独开启
/// - busy_timeout 需要"每个连接"单独配置
pub fn configure_sqlite_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    Ok(())
}

/// 打开 SQLite 连接并应用统一配置
pub fn open_sqlite_connection(db_path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    configure_sqlite_connection(&conn)?;
    Ok(conn)
}

/// 读取 schema_version(若表不存在则返回 None)
pub fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<i64>> {
    let has_table: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version' LIMIT 1",
            [],
            |_row| Ok(true),
        )
        .optional()?
        .unwrap_or(false);

    if !has_table {
        return Ok(None);
    }

    let v: Option<i64> =
        conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    Ok(v)
}

/// 初始化数据库 schema(幂等)
///
/// 覆盖: 选课 / 修订快照 / 学习计划 / 计划追溯 / 选课计划关联 /
///       操作日志 / 内容节点与边 / 配置表 / schema_version
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS config_scope (
            scope_id TEXT PRIMARY KEY,
            scope_type TEXT NOT NULL,
            scope_key TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(scope_type, scope_key)
        );

        INSERT OR IGNORE INTO config_scope (scope_id, scope_type, scope_key)
        VALUES ('global', 'GLOBAL', 'global');

        CREATE TABLE IF NOT EXISTS config_kv (
            scope_id TEXT NOT NULL REFERENCES config_scope(scope_id) ON DELETE CASCADE,
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (scope_id, key)
        );

        -- 选课记录 (树形: parent_enrolment_id 引用)
        -- UNIQUE 约束是并发重复创建竞态的最终防线
        CREATE TABLE IF NOT EXISTS enrolment (
            enrolment_id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            tenant_id TEXT NOT NULL,
            content_id TEXT NOT NULL,
            parent_content_id TEXT,
            parent_enrolment_id TEXT REFERENCES enrolment(enrolment_id),
            status TEXT NOT NULL,
            result REAL,
            pass INTEGER NOT NULL DEFAULT 0,
            start_ts TEXT,
            end_ts TEXT,
            data_json TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL,
            changed_at TEXT NOT NULL,
            UNIQUE(user_id, tenant_id, content_id, parent_content_id)
        );

        CREATE INDEX IF NOT EXISTS idx_enrolment_parent
            ON enrolment(parent_enrolment_id);
        CREATE INDEX IF NOT EXISTS idx_enrolment_user_tenant
            ON enrolment(user_id, tenant_id);

        -- 选课修订快照 (append-only)
        CREATE TABLE IF NOT EXISTS enrolment_revision (
            revision_id TEXT PRIMARY KEY,
            enrolment_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            tenant_id TEXT NOT NULL,
            content_id TEXT NOT NULL,
            parent_content_id TEXT,
            parent_enrolment_id TEXT,
            status TEXT NOT NULL,
            result REAL,
            pass INTEGER NOT NULL DEFAULT 0,
            start_ts TEXT,
            end_ts TEXT,
            note TEXT,
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_revision_enrolment
            ON enrolment_revision(enrolment_id, created_at);

        -- 学习计划 (复合键 upsert)
        CREATE TABLE IF NOT EXISTS plan (
            plan_id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            tenant_id TEXT NOT NULL,
            content_type TEXT NOT NULL,
            content_id TEXT NOT NULL,
            assigner_id TEXT,
            status TEXT NOT NULL,
            due_ts TEXT,
            data_json TEXT,
            created_at TEXT NOT NULL,
            changed_at TEXT NOT NULL,
            UNIQUE(user_id, tenant_id, content_type, content_id)
        );

        -- 计划修订快照 (更新前整体快照)
        CREATE TABLE IF NOT EXISTS plan_revision (
            revision_id TEXT PRIMARY KEY,
            plan_id TEXT NOT NULL,
            snapshot_json TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        -- 计划来源追溯 (软删除: active 标志)
        CREATE TABLE IF NOT EXISTS plan_reference (
            reference_id TEXT PRIMARY KEY,
            plan_id TEXT NOT NULL REFERENCES plan(plan_id),
            source_type TEXT NOT NULL,
            source_id TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1
        );

        -- 选课↔计划 多对多关联
        CREATE TABLE IF NOT EXISTS enrolment_plan (
            enrolment_id TEXT NOT NULL,
            plan_id TEXT NOT NULL,
            PRIMARY KEY (enrolment_id, plan_id)
        );

        -- 操作日志 (append-only, 永不清理)
        CREATE TABLE IF NOT EXISTS action_log (
            action_id TEXT PRIMARY KEY,
            enrolment_id TEXT NOT NULL,
            action_type TEXT NOT NULL,
            action_ts TEXT NOT NULL,
            actor TEXT NOT NULL,
            diff_json TEXT,
            detail TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_action_log_enrolment
            ON action_log(enrolment_id, action_ts);

        -- 内容节点 (学习对象目录, 由内容图协作方维护)
        CREATE TABLE IF NOT EXISTS content_node (
            content_id TEXT PRIMARY KEY,
            content_type TEXT NOT NULL,
            elective_quota INTEGER NOT NULL DEFAULT 0,
            rule_type TEXT,
            rule_value TEXT,
            rule_interval_days INTEGER
        );

        -- 内容层级边 (parent → child, 含子节点分类)
        CREATE TABLE IF NOT EXISTS content_edge (
            parent_id TEXT NOT NULL REFERENCES content_node(content_id),
            child_id TEXT NOT NULL REFERENCES content_node(content_id),
            child_class TEXT NOT NULL,
            PRIMARY KEY (parent_id, child_id)
        );

        CREATE INDEX IF NOT EXISTS idx_content_edge_child
            ON content_edge(child_id);
        "#,
    )?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [CURRENT_SCHEMA_VERSION],
    )?;

    Ok(())
}

// ==========================================
// TransactionScope - 跨仓储事务作用域
// ==========================================
// 编排器级别的事务: 多个仓储共享同一连接, 由最外层作用域
// BEGIN IMMEDIATE / COMMIT; 嵌套进入时检测到连接已在事务中,
// 自动扁平化为空操作, 仅最外层提交 (嵌套事务扁平化契约)
pub struct TransactionScope {
    conn: Arc<Mutex<Connection>>,
    owns: bool,
    finished: bool,
}

impl TransactionScope {
    /// 进入事务作用域
    ///
    /// 连接处于 autocommit ⇒ 本作用域发起 BEGIN IMMEDIATE 并持有提交权;
    /// 否则视为嵌套进入, 不发起新事务
    pub fn begin(conn: Arc<Mutex<Connection>>) -> rusqlite::Result<Self> {
        let owns = {
            let guard = lock(&conn)?;
            if guard.is_autocommit() {
                guard.execute_batch("BEGIN IMMEDIATE")?;
                true
            } else {
                false
            }
        };

        Ok(Self {
            conn,
            owns,
            finished: false,
        })
    }

    /// 是否持有提交权(最外层作用域)
    pub fn is_outermost(&self) -> bool {
        self.owns
    }

    /// 提交事务(仅最外层作用域生效)
    pub fn commit(mut self) -> rusqlite::Result<()> {
        self.finished = true;
        if self.owns {
            let guard = lock(&self.conn)?;
            guard.execute_batch("COMMIT")?;
        }
        Ok(())
    }

    /// 回滚事务(仅最外层作用域生效)
    pub fn rollback(mut self) -> rusqlite::Result<()> {
        self.finished = true;
        if self.owns {
            let guard = lock(&self.conn)?;
            guard.execute_batch("ROLLBACK")?;
        }
        Ok(())
    }
}

impl Drop for TransactionScope {
    fn drop(&mut self) {
        // 未显式提交/回滚即被丢弃 ⇒ 回滚兜底
        if self.owns && !self.finished {
            if let Ok(guard) = self.conn.lock() {
                let _ = guard.execute_batch("ROLLBACK");
            }
        }
    }
}

fn lock(conn: &Arc<Mutex<Connection>>) -> rusqlite::Result<MutexGuard<'_, Connection>> {
    conn.lock().map_err(|_| {
        rusqlite::Error::InvalidParameterName("数据库连接锁中毒".to_string())
    })
}
