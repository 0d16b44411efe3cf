// ==========================================
// 测试辅助函数
// ==========================================
// 职责: 提供测试所需的数据库初始化、内容树搭建、记录型消息总线
// ==========================================

use enrolment_engine::db;
use enrolment_engine::engine::{EnrolmentEvent, EnrolmentEventType, MessageBus};
use rusqlite::{params, Connection};
use std::error::Error;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tempfile::NamedTempFile;

/// 创建临时测试数据库并初始化 schema
///
/// # 返回
/// - NamedTempFile: 临时数据库文件（需要保持存活）
/// - String: 数据库文件路径
pub fn create_test_db() -> Result<(NamedTempFile, String), Box<dyn Error>> {
    let temp_file = NamedTempFile::new()?;
    let db_path = temp_file.path().to_str().unwrap().to_string();

    let conn = db::open_sqlite_connection(&db_path)?;
    db::init_schema(&conn)?;

    Ok((temp_file, db_path))
}

/// 打开测试数据库连接(应用统一 PRAGMA)
pub fn open_test_connection(db_path: &str) -> Result<Connection, Box<dyn Error>> {
    Ok(db::open_sqlite_connection(db_path)?)
}

// ==========================================
// 内容树搭建
// ==========================================

/// 插入内容节点
pub fn add_content_node(
    conn: &Connection,
    content_id: &str,
    content_type: &str,
    elective_quota: i64,
) -> Result<(), Box<dyn Error>> {
    conn.execute(
        "INSERT INTO content_node (content_id, content_type, elective_quota)
         VALUES (?1, ?2, ?3)",
        params![content_id, content_type, elective_quota],
    )?;
    Ok(())
}

/// 插入带完成规则的内容节点
pub fn add_content_node_with_rule(
    conn: &Connection,
    content_id: &str,
    content_type: &str,
    rule_type: &str,
    rule_value: Option<&str>,
    rule_interval_days: Option<i64>,
) -> Result<(), Box<dyn Error>> {
    conn.execute(
        "INSERT INTO content_node
         (content_id, content_type, elective_quota, rule_type, rule_value, rule_interval_days)
         VALUES (?1, ?2, 0, ?3, ?4, ?5)",
        params![content_id, content_type, rule_type, rule_value, rule_interval_days],
    )?;
    Ok(())
}

/// 插入内容层级边 (child_class: MANDATORY / ELECTIVE / EVENT)
pub fn add_content_edge(
    conn: &Connection,
    parent_id: &str,
    child_id: &str,
    child_class: &str,
) -> Result<(), Box<dyn Error>> {
    conn.execute(
        "INSERT INTO content_edge (parent_id, child_id, child_class) VALUES (?1, ?2, ?3)",
        params![parent_id, child_id, child_class],
    )?;
    Ok(())
}

// ==========================================
// RecordingBus - 记录型消息总线
// ==========================================

/// 记录全部已发布事件的测试总线, 可切换可用性
#[derive(Default)]
pub struct RecordingBus {
    pub events: Mutex<Vec<EnrolmentEvent>>,
    unavailable: AtomicBool,
}

impl RecordingBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// 将总线置为不可用(快速失败前置检查测试)
    pub fn set_unavailable(&self) {
        self.unavailable.store(true, Ordering::SeqCst);
    }

    /// 已发布事件数量
    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    /// 按类型筛选已发布事件
    pub fn events_of(&self, event_type: EnrolmentEventType) -> Vec<EnrolmentEvent> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect()
    }
}

impl MessageBus for RecordingBus {
    fn publish(&self, event: &EnrolmentEvent) -> Result<(), Box<dyn Error + Send + Sync>> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }

    fn is_available(&self) -> bool {
        !self.unavailable.load(Ordering::SeqCst)
    }
}
