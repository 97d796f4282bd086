// ==========================================
// 工程勘察收费系统 - 数据仓储层
// ==========================================
// 职责: 规则目录端口及其实现
// 红线: Repository 不含业务逻辑（匹配与合成在引擎层）
// ==========================================

pub mod error;
pub mod memory_catalog;
pub mod rule_catalog;
pub mod sqlite_catalog;

pub use error::{RepositoryError, RepositoryResult};
pub use memory_catalog::{CatalogSnapshot, InMemoryRuleCatalog};
pub use rule_catalog::{CatalogQuery, RuleCatalog};
pub use sqlite_catalog::SqliteRuleCatalog;
