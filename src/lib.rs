// ==========================================
// 工程勘察收费系统 - 核心库
// ==========================================
// 职责: 收费系数解析 (K1/K2/K3) 与费用汇总
// 技术栈: Rust + rust_decimal + SQLite
// 系统定位: 计算内核 (参数抽取与展示由外部协作方负责)
// ==========================================

// 初始化国际化系统
rust_i18n::i18n!("locales", fallback = "en");

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 参数、规则与结果
pub mod domain;

// 数据仓储层 - 规则目录
pub mod repository;

// 引擎层 - 匹配、解析与汇总
pub mod engine;

// 配置层 - 引擎配置
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA 统一）
pub mod db;

// 日志系统
pub mod logging;

// 国际化
pub mod i18n;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::types::{
    AddonKind, ApplyTo, BaseType, CalcType, CoeffClass, IssueKind, Stage, WorkStage,
};

// 领域实体
pub use domain::{
    AddonApplication, AddonRule, CalculationIssue, CalculationResult, CoeffRule, JobParameters,
    ParamKey, ParamValue, SourceRef, StageCalculation, WorkItem,
};

// 引擎
pub use engine::{
    AddonResolver, CalculationRequest, CoefficientResolver, ConditionCore, CostAggregator,
    EstimateCalculator, EstimateRequest, EstimateResult,
};

// 规则目录
pub use repository::{InMemoryRuleCatalog, RuleCatalog, SqliteRuleCatalog};

// 配置
pub use config::{ConfigManager, EngineConfig, EngineConfigReader};

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "工程勘察收费系统";
