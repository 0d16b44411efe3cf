// ==========================================
// 企业培训学习管理系统 - 配置层
// ==========================================
// 职责: 系统配置的存取与默认值
// ==========================================

pub mod config_manager;

pub use config_manager::{config_keys, ConfigManager};
