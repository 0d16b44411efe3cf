// ==========================================
// 企业培训学习管理系统 - 主入口
// ==========================================
// 职责: 初始化日志与数据库, 报告服务就绪状态
// ==========================================

use enrolment_engine::{db, logging, VERSION};

/// 默认数据库路径: <data_dir>/enrolment-engine/enrolment.db
fn get_default_db_path() -> String {
    let base = dirs::data_dir().unwrap_or_else(|| std::path::PathBuf::from("."));
    let dir = base.join("enrolment-engine");
    if let Err(e) = std::fs::create_dir_all(&dir) {
        tracing::warn!("无法创建数据目录 {:?}: {}, 回落到当前目录", dir, e);
        return "enrolment.db".to_string();
    }
    dir.join("enrolment.db").to_string_lossy().to_string()
}

fn main() -> anyhow::Result<()> {
    // 初始化日志系统
    logging::init();

    tracing::info!("==================================================");
    tracing::info!("企业培训学习管理系统 - 选课生命周期引擎");
    tracing::info!("系统版本: {}", VERSION);
    tracing::info!("==================================================");

    // 数据库路径: 命令行参数优先, 否则使用默认路径
    let db_path = std::env::args()
        .nth(1)
        .unwrap_or_else(get_default_db_path);
    tracing::info!("使用数据库: {}", db_path);

    let conn = db::open_sqlite_connection(&db_path)?;
    db::init_schema(&conn)?;

    let version = db::read_schema_version(&conn)?;
    tracing::info!("schema_version = {:?}, 数据库就绪", version);

    Ok(())
}
