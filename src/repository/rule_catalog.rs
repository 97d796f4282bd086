// ==========================================
// 工程勘察收费系统 - 规则目录端口 (RuleCatalog)
// ==========================================
// 职责: 定义引擎所需的只读规则查询接口（不包含实现）
// 红线: 目录只负责按范围返回候选规则，匹配在引擎侧完成
// 实现者: InMemoryRuleCatalog / SqliteRuleCatalog
// ==========================================

use crate::domain::rule::{AddonRule, CoeffRule};
use crate::domain::types::Stage;
use crate::repository::error::RepositoryResult;
use async_trait::async_trait;
use std::fmt;

/// 目录查询类别（用于日志与故障注入）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CatalogQuery {
    K1,
    K2,
    K3,
    Addons,
    AddonCoefficients,
}

impl fmt::Display for CatalogQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CatalogQuery::K1 => "K1",
            CatalogQuery::K2 => "K2",
            CatalogQuery::K3 => "K3",
            CatalogQuery::Addons => "addons",
            CatalogQuery::AddonCoefficients => "addon_coefficients",
        };
        write!(f, "{}", s)
    }
}

// ==========================================
// RuleCatalog Trait
// ==========================================
#[async_trait]
pub trait RuleCatalog: Send + Sync {
    /// K1 候选: 表注系数
    ///
    /// # 参数
    /// - table_no: 工作项所在价格表
    /// - stage: 请求阶段
    ///
    /// # 返回
    /// - 候选规则（可能包含未绑定表号的规则，由引擎拒绝）
    async fn query_k1(&self, table_no: u32, stage: Stage) -> RepositoryResult<Vec<CoeffRule>>;

    /// K2 候选: 总则 §15 成果形式
    async fn query_k2(&self) -> RepositoryResult<Vec<CoeffRule>>;

    /// K3 候选: 总则 §8/§14 生产条件
    async fn query_k3(&self) -> RepositoryResult<Vec<CoeffRule>>;

    /// 附加费规则（按目录顺序）
    async fn query_addons(&self) -> RepositoryResult<Vec<AddonRule>>;

    /// 附加费专用的二级系数（如组织/撤离的工期系数）
    ///
    /// # 参数
    /// - addon_code: 附加费代码（匹配条件 applies_to_addon）
    async fn query_addon_coefficients(&self, addon_code: &str) -> RepositoryResult<Vec<CoeffRule>>;
}
