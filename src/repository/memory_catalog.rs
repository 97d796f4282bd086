// ==========================================
// 工程勘察收费系统 - 内存规则目录
// ==========================================
// 用途: 确定性的目录实现（测试与离线计算）
// 支持: JSON 快照加载 / 按查询类别注入故障
// ==========================================

use crate::domain::rule::{AddonRule, CoeffRule};
use crate::domain::types::{CoeffClass, Stage};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::rule_catalog::{CatalogQuery, RuleCatalog};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// 目录快照（与 norm_coeffs / norm_addons 表同形）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    #[serde(default, alias = "norm_coeffs")]
    pub coeffs: Vec<CoeffRule>,
    #[serde(default, alias = "norm_addons")]
    pub addons: Vec<AddonRule>,
}

// ==========================================
// InMemoryRuleCatalog
// ==========================================
#[derive(Debug, Clone, Default)]
pub struct InMemoryRuleCatalog {
    snapshot: CatalogSnapshot,
    failing: HashSet<CatalogQuery>,
}

impl InMemoryRuleCatalog {
    pub fn new(coeffs: Vec<CoeffRule>, addons: Vec<AddonRule>) -> Self {
        Self {
            snapshot: CatalogSnapshot { coeffs, addons },
            failing: HashSet::new(),
        }
    }

    pub fn from_snapshot(snapshot: CatalogSnapshot) -> Self {
        Self {
            snapshot,
            failing: HashSet::new(),
        }
    }

    /// 从 JSON 文本加载
    pub fn from_json_str(json: &str) -> RepositoryResult<Self> {
        let snapshot: CatalogSnapshot = serde_json::from_str(json)?;
        tracing::debug!(
            coeffs = snapshot.coeffs.len(),
            addons = snapshot.addons.len(),
            "加载内存规则目录"
        );
        Ok(Self::from_snapshot(snapshot))
    }

    /// 注入故障: 指定类别的查询返回 Unavailable
    pub fn fail_on(mut self, query: CatalogQuery) -> Self {
        self.failing.insert(query);
        self
    }

    pub fn snapshot(&self) -> &CatalogSnapshot {
        &self.snapshot
    }

    fn check(&self, query: CatalogQuery) -> RepositoryResult<()> {
        if self.failing.contains(&query) {
            return Err(RepositoryError::Unavailable(format!("{} 查询失败（注入）", query)));
        }
        Ok(())
    }

    fn candidates(&self, class: CoeffClass) -> impl Iterator<Item = &CoeffRule> {
        self.snapshot
            .coeffs
            .iter()
            .filter(move |r| r.is_candidate_for(class))
    }
}

#[async_trait]
impl RuleCatalog for InMemoryRuleCatalog {
    async fn query_k1(&self, table_no: u32, stage: Stage) -> RepositoryResult<Vec<CoeffRule>> {
        self.check(CatalogQuery::K1)?;
        Ok(self
            .candidates(CoeffClass::K1)
            .filter(|r| r.table_binding().map_or(true, |t| t == table_no))
            .filter(|r| r.apply_to.covers_stage(stage))
            .cloned()
            .collect())
    }

    async fn query_k2(&self) -> RepositoryResult<Vec<CoeffRule>> {
        self.check(CatalogQuery::K2)?;
        Ok(self.candidates(CoeffClass::K2).cloned().collect())
    }

    async fn query_k3(&self) -> RepositoryResult<Vec<CoeffRule>> {
        self.check(CatalogQuery::K3)?;
        Ok(self.candidates(CoeffClass::K3).cloned().collect())
    }

    async fn query_addons(&self) -> RepositoryResult<Vec<AddonRule>> {
        self.check(CatalogQuery::Addons)?;
        Ok(self.snapshot.addons.clone())
    }

    async fn query_addon_coefficients(&self, addon_code: &str) -> RepositoryResult<Vec<CoeffRule>> {
        self.check(CatalogQuery::AddonCoefficients)?;
        Ok(self
            .snapshot
            .coeffs
            .iter()
            .filter(|r| r.applies_to_addon() == Some(addon_code))
            .cloned()
            .collect())
    }
}
