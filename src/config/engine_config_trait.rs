// ==========================================
// 工程勘察收费系统 - 引擎配置读取 Trait
// ==========================================
// 职责: 定义引擎所需的配置读取接口（不包含实现）
// 红线: 不包含配置写入、不包含业务逻辑
// ==========================================

use crate::config::engine_config::{ConfigError, EngineConfig};
use async_trait::async_trait;

// ==========================================
// EngineConfigReader Trait
// ==========================================
// 实现者: ConfigManager（从 config_kv 表读取）
#[async_trait]
pub trait EngineConfigReader: Send + Sync {
    /// 加载引擎配置
    ///
    /// # 返回
    /// - 缺失或无效的键回退到默认值
    /// - 仅存储层故障返回 Err
    async fn load_engine_config(&self) -> Result<EngineConfig, ConfigError>;
}
