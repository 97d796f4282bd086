// ==========================================
// 工程勘察收费系统 - 配置管理器
// ==========================================
// 职责: 引擎配置加载、查询、覆写
// 存储: config_kv 表 (key-value + scope)
// ==========================================

use crate::config::engine_config::{validate_tiers, ConfigError, EngineConfig, OrgLiqCostTier};
use crate::config::engine_config_trait::EngineConfigReader;
use crate::db::open_sqlite_connection;
use async_trait::async_trait;
use rusqlite::{params, Connection};
use std::sync::{Arc, Mutex};
use tracing::warn;

/// 配置键
pub mod config_keys {
    pub const FLOAT_EPSILON: &str = "engine/float_epsilon";
    pub const ORG_LIQ_COST_TIERS: &str = "engine/org_liq_cost_tiers";
    pub const FAR_NORTH_REGION_TYPES: &str = "engine/far_north_region_types";
    pub const LOCALE: &str = "engine/locale";
}

const CONFIG_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS config_kv (
    scope_id TEXT NOT NULL,
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    PRIMARY KEY (scope_id, key)
);
"#;

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
    pub fn new(db_path: &str) -> Result<Self, ConfigError> {
        let conn = open_sqlite_connection(db_path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建（与目录共享同一数据库）
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Result<Self, ConfigError> {
        {
            let guard = conn
                .lock()
                .map_err(|e| ConfigError::LockError(e.to_string()))?;
            crate::db::configure_sqlite_connection(&guard)?;
        }
        Ok(Self { conn })
    }

    fn get_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>, ConfigError> {
        self.conn
            .lock()
            .map_err(|e| ConfigError::LockError(e.to_string()))
    }

    /// 建表（幂等）
    pub fn init_schema(&self) -> Result<(), ConfigError> {
        self.get_conn()?.execute_batch(CONFIG_SCHEMA)?;
        Ok(())
    }

    /// 读取 global scope 的配置值
    ///
    /// # 返回
    /// - Some(String): 配置值
    /// - None: 配置不存在
    pub fn get_global_config_value(&self, key: &str) -> Result<Option<String>, ConfigError> {
        let conn = self.get_conn()?;
        let result = conn.query_row(
            "SELECT value FROM config_kv WHERE scope_id = 'global' AND key = ?1",
            params![key],
            |row| row.get::<_, String>(0),
        );

        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// 写入 global scope 的配置值（UPSERT）
    pub fn set_global_config_value(&self, key: &str, value: &str) -> Result<(), ConfigError> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO config_kv (scope_id, key, value) VALUES ('global', ?1, ?2)
             ON CONFLICT(scope_id, key) DO UPDATE SET value = ?2",
            params![key, value],
        )?;
        Ok(())
    }

    /// 按键解析，失败时告警并返回 None（调用方回退默认值）
    fn parse_or_warn<T>(
        &self,
        key: &str,
        parse: impl FnOnce(&str) -> Result<T, String>,
    ) -> Result<Option<T>, ConfigError> {
        let Some(raw) = self.get_global_config_value(key)? else {
            return Ok(None);
        };
        match parse(&raw) {
            Ok(v) => Ok(Some(v)),
            Err(message) => {
                warn!(config_key = key, raw_value = %raw, error = %message, "配置值无效，使用默认值");
                Ok(None)
            }
        }
    }
}

// ==========================================
// EngineConfigReader Trait 实现
// ==========================================
#[async_trait]
impl EngineConfigReader for ConfigManager {
    async fn load_engine_config(&self) -> Result<EngineConfig, ConfigError> {
        let defaults = EngineConfig::default();

        let float_epsilon = self
            .parse_or_warn(config_keys::FLOAT_EPSILON, |raw| {
                let v = raw.trim().parse::<f64>().map_err(|e| e.to_string())?;
                if v.is_finite() && v > 0.0 {
                    Ok(v)
                } else {
                    Err(format!("必须为正数: {}", v))
                }
            })?
            .unwrap_or(defaults.float_epsilon);

        let org_liq_cost_tiers = self
            .parse_or_warn(config_keys::ORG_LIQ_COST_TIERS, |raw| {
                let tiers: Vec<OrgLiqCostTier> =
                    serde_json::from_str(raw).map_err(|e| e.to_string())?;
                validate_tiers(&tiers).map_err(|e| e.to_string())?;
                Ok(tiers)
            })?
            .unwrap_or(defaults.org_liq_cost_tiers);

        let far_north_region_types = self
            .parse_or_warn(config_keys::FAR_NORTH_REGION_TYPES, |raw| {
                let types: Vec<String> = raw
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
                if types.is_empty() {
                    Err("列表为空".to_string())
                } else {
                    Ok(types)
                }
            })?
            .unwrap_or(defaults.far_north_region_types);

        let locale = self
            .parse_or_warn(config_keys::LOCALE, |raw| match raw.trim() {
                "ru" | "en" => Ok(raw.trim().to_string()),
                other => Err(format!("不支持的语言: {}", other)),
            })?
            .unwrap_or(defaults.locale);

        let config = EngineConfig {
            float_epsilon,
            org_liq_cost_tiers,
            far_north_region_types,
            locale,
        };
        config.validate()?;
        Ok(config)
    }
}
