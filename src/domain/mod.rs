// ==========================================
// 工程勘察收费系统 - 领域模型层
// ==========================================
// 职责: 定义作业参数、工作项、规则、计算结果与封闭枚举
// 红线: 不含数据访问逻辑，不含引擎逻辑
// ==========================================

pub mod money;
pub mod params;
pub mod result;
pub mod rule;
pub mod types;
pub mod work_item;

// 重导出核心类型
pub use money::{decimal_from_f64, round_money};
pub use params::{JobParameters, ParamError, ParamKey, ParamValue};
pub use result::{
    AddonApplication, CalculationIssue, CalculationResult, ClassResolution, ResolvedCoefficient,
    StageCalculation,
};
pub use rule::{AddonRule, CoeffRule, PiecewiseTerms, RuleConditions, SourceRef};
pub use types::{AddonKind, ApplyTo, BaseType, CalcType, CoeffClass, IssueKind, Stage, WorkStage};
pub use work_item::WorkItem;
