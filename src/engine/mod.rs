// ==========================================
// 工程勘察收费系统 - 引擎层
// ==========================================
// 职责: 条件匹配、系数解析、附加费计算、费用汇总
// 红线: Engine 不拼 SQL, 所有结果必须带来源与问题列表
// ==========================================

pub mod addon;
pub mod aggregator;
pub mod coefficient;
pub mod condition_core;
pub mod estimate;

// 重导出核心引擎
pub use addon::{AddonBases, AddonOutcome, AddonResolver};
pub use aggregator::{AggregationPhase, CalculationRequest, CostAggregator};
pub use coefficient::{
    matching_context, CoefficientResolution, CoefficientResolver, StageCoefficients,
    DESERT_FIELD_CODE, DESERT_OFFICE_CODE,
};
pub use condition_core::{ConditionCore, Criterion, CriterionTest, MalformedCondition, MatchOutcome};
pub use estimate::{EstimateCalculator, EstimateRequest, EstimateResult, LineIssue};
