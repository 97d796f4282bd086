// ==========================================
// 工程勘察收费系统 - 配置层
// ==========================================
// 职责: 引擎配置定义与加载
// 存储: config_kv 表
// ==========================================

pub mod config_manager;
pub mod engine_config;
pub mod engine_config_trait;

// 重导出核心配置类型
pub use config_manager::{config_keys, ConfigManager};
pub use engine_config::{ConfigError, EngineConfig, OrgLiqCostTier};
pub use engine_config_trait::EngineConfigReader;
