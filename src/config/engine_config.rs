// ==========================================
// 工程勘察收费系统 - 引擎配置
// ==========================================
// 职责: 浮点容差、组织/撤离费用档位、远北地区类型、审计语言
// 红线: 档位为左闭右开区间，按下限升序
// ==========================================

use crate::domain::money::deserialize_decimal;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 配置错误
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("配置数据库错误: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("配置锁获取失败: {0}")]
    LockError(String),

    #[error("配置值无效 (key={key}): {message}")]
    InvalidValue { key: String, message: String },
}

// ==========================================
// OrgLiqCostTier - 组织/撤离费用档位
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrgLiqCostTier {
    /// 下限（含）
    #[serde(deserialize_with = "deserialize_decimal")]
    pub min: Decimal,
    /// 上限（不含；None = 无上限）
    #[serde(default, deserialize_with = "crate::domain::money::deserialize_opt_decimal")]
    pub max: Option<Decimal>,
    #[serde(deserialize_with = "deserialize_decimal")]
    pub multiplier: Decimal,
}

impl OrgLiqCostTier {
    fn new(min: i64, max: Option<i64>, multiplier: Decimal) -> Self {
        Self {
            min: Decimal::from(min),
            max: max.map(Decimal::from),
            multiplier,
        }
    }

    pub fn contains(&self, cost: Decimal) -> bool {
        cost >= self.min && self.max.map_or(true, |max| cost < max)
    }
}

// ==========================================
// EngineConfig
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// 浮点比较容差
    pub float_epsilon: f64,
    /// 组织/撤离费用档位（升序）
    pub org_liq_cost_tiers: Vec<OrgLiqCostTier>,
    /// 视为远北地区的 region_type 取值
    pub far_north_region_types: Vec<String>,
    /// 依据链与问题消息语言
    pub locale: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            float_epsilon: 1e-6,
            org_liq_cost_tiers: default_org_liq_tiers(),
            far_north_region_types: vec!["far_north".to_string()],
            locale: "ru".to_string(),
        }
    }
}

/// 默认档位: <30000 → 2.5, 30000–75000 → 2.0, 75000–150000 → 1.5, ≥150000 → 1.0
pub fn default_org_liq_tiers() -> Vec<OrgLiqCostTier> {
    vec![
        OrgLiqCostTier::new(0, Some(30_000), Decimal::new(25, 1)),
        OrgLiqCostTier::new(30_000, Some(75_000), Decimal::new(20, 1)),
        OrgLiqCostTier::new(75_000, Some(150_000), Decimal::new(15, 1)),
        OrgLiqCostTier::new(150_000, None, Decimal::ONE),
    ]
}

impl EngineConfig {
    /// 校验配置
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.float_epsilon.is_finite() && self.float_epsilon > 0.0) {
            return Err(ConfigError::InvalidValue {
                key: "float_epsilon".to_string(),
                message: format!("必须为正数: {}", self.float_epsilon),
            });
        }
        validate_tiers(&self.org_liq_cost_tiers)?;
        if self.locale.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "locale".to_string(),
                message: "不能为空".to_string(),
            });
        }
        Ok(())
    }

    /// 是否为远北地区
    pub fn is_far_north(&self, region_type: Option<&str>) -> bool {
        region_type.map_or(false, |r| {
            self.far_north_region_types
                .iter()
                .any(|t| t.eq_ignore_ascii_case(r.trim()))
        })
    }

    /// 组织/撤离费用档位倍数
    ///
    /// # 规则
    /// - 远北地区强制取最高档（倍数最大者）
    /// - 否则按基数落入的档位
    /// - 无档位命中时为 1
    pub fn org_liq_cost_multiplier(&self, base_cost: Decimal, far_north: bool) -> Decimal {
        if far_north {
            return self
                .org_liq_cost_tiers
                .iter()
                .map(|t| t.multiplier)
                .max()
                .unwrap_or(Decimal::ONE);
        }
        self.org_liq_cost_tiers
            .iter()
            .find(|t| t.contains(base_cost))
            .map(|t| t.multiplier)
            .unwrap_or(Decimal::ONE)
    }
}

/// 档位校验: 非空、升序、区间不重叠
pub fn validate_tiers(tiers: &[OrgLiqCostTier]) -> Result<(), ConfigError> {
    let invalid = |message: String| ConfigError::InvalidValue {
        key: "org_liq_cost_tiers".to_string(),
        message,
    };

    if tiers.is_empty() {
        return Err(invalid("档位不能为空".to_string()));
    }
    for pair in tiers.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        match a.max {
            Some(max) if max <= b.min => {}
            _ => return Err(invalid(format!("档位未按升序排列: {} / {}", a.min, b.min))),
        }
    }
    for tier in tiers {
        if tier.max.map_or(false, |max| max <= tier.min) {
            return Err(invalid(format!("档位上限不大于下限: {}", tier.min)));
        }
    }
    Ok(())
}
