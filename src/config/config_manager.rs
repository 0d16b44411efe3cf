// ==========================================
// 企业培训学习管理系统 - 配置管理器
// ==========================================
// 职责: 配置加载、查询、覆写管理
// 存储: config_kv 表 (key-value + scope)
// ==========================================

use crate::db::open_sqlite_connection;
use rusqlite::{params, Connection};
use serde_json::json;
use std::collections::HashMap;
use std::error::Error;
use std::sync::{Arc, Mutex};

// ==========================================
// 配置键常量
// ==========================================
pub mod config_keys {
    /// 计划合并的遗留语义: 无截止日期且无既有行 ⇒ 不插入 (默认 true)
    pub const PLAN_LEGACY_MERGE_SEMANTICS: &str = "plan/legacy_merge_semantics";
    /// 内嵌历史日志条目上限 (默认 50)
    pub const ENROLMENT_HISTORY_LIMIT: &str = "enrolment/history_limit";
    /// 是否在成绩聚合后重发课程更新事件 (默认 true)
    pub const PROPAGATION_PUBLISH_COURSE_UPDATES: &str = "propagation/publish_course_updates";
}

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// 创建新的 ConfigManager 实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> Result<Self, Box<dyn Error>> {
        let conn = open_sqlite_connection(db_path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建 ConfigManager
    ///
    /// 说明: 为保证连接行为一致, 会对传入连接再次应用统一 PRAGMA(幂等)
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Result<Self, Box<dyn Error>> {
        {
            let conn_guard = conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
            crate::db::configure_sqlite_connection(&conn_guard)?;
        }
        Ok(Self { conn })
    }

    /// 从 config_kv 表读取配置值(scope_id='global')
    fn get_config_value(&self, key: &str) -> Result<Option<String>, Box<dyn Error>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;

        let result = conn.query_row(
            "SELECT value FROM config_kv WHERE scope_id = 'global' AND key = ?1",
            params![key],
            |row| row.get::<_, String>(0),
        );

        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(Box::new(e)),
        }
    }

    /// 写入配置值(UPSERT, scope_id='global')
    pub fn set_config_value(&self, key: &str, value: &str) -> Result<(), Box<dyn Error>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
        conn.execute(
            "INSERT INTO config_kv (scope_id, key, value) VALUES ('global', ?1, ?2)
             ON CONFLICT(scope_id, key) DO UPDATE SET value = ?2",
            params![key, value],
        )?;
        Ok(())
    }

    // ==========================================
    // 类型化读取
    // ==========================================

    /// 计划合并是否采用遗留语义
    pub fn legacy_merge_semantics(&self) -> Result<bool, Box<dyn Error>> {
        Ok(self
            .get_config_value(config_keys::PLAN_LEGACY_MERGE_SEMANTICS)?
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true))
    }

    /// 内嵌历史日志条目上限
    pub fn history_limit(&self) -> Result<usize, Box<dyn Error>> {
        Ok(self
            .get_config_value(config_keys::ENROLMENT_HISTORY_LIMIT)?
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(50))
    }

    /// 是否重发课程更新事件(成绩聚合)
    pub fn publish_course_updates(&self) -> Result<bool, Box<dyn Error>> {
        Ok(self
            .get_config_value(config_keys::PROPAGATION_PUBLISH_COURSE_UPDATES)?
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true))
    }

    // ==========================================
    // 快照
    // ==========================================

    /// 获取所有 global 配置的快照(JSON 字符串)
    pub fn get_config_snapshot(&self) -> Result<String, Box<dyn Error>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;

        let mut stmt =
            conn.prepare("SELECT key, value FROM config_kv WHERE scope_id = 'global' ORDER BY key")?;

        let mut config_map: HashMap<String, String> = HashMap::new();
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        for row in rows {
            let (key, value) = row?;
            config_map.insert(key, value);
        }

        Ok(serde_json::to_string(&json!(config_map))?)
    }
}
