// ==========================================
// 工程勘察收费系统 - 费用汇总引擎 (CostAggregator)
// ==========================================
// 状态机: NEW → STAGE_FIELD? → STAGE_OFFICE? → ADDONS → TOTAL_COEFFICIENTS → ROUNDED → DONE
// 红线: 阶段合计 = 单价 × 工作量 × K1 × K2 × K3，仅在阶段末舍入
// 红线: 总价 = (外业 + 内业 + Σ附加费) × Π(总价系数)，末尾再舍入一次
// 红线: 任何问题都不中断计算，总价始终给出并附带 errors / warnings
// ==========================================

use crate::config::EngineConfig;
use crate::domain::money::round_money;
use crate::domain::params::JobParameters;
use crate::domain::result::{
    AddonApplication, CalculationIssue, CalculationResult, ResolvedCoefficient, StageCalculation,
};
use crate::domain::types::{IssueKind, Stage, WorkStage};
use crate::domain::work_item::WorkItem;
use crate::engine::addon::{AddonBases, AddonResolver};
use crate::engine::coefficient::{matching_context, CoefficientResolution, CoefficientResolver};
use crate::i18n::{t_in, t_in_with_args};
use crate::repository::RuleCatalog;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

// ==========================================
// CalculationRequest - 计算请求
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalculationRequest {
    pub item: WorkItem,
    #[serde(deserialize_with = "crate::domain::money::deserialize_decimal")]
    pub quantity: Decimal,
    #[serde(default)]
    pub work_stage: WorkStage,
    #[serde(default)]
    pub params: JobParameters,
}

impl CalculationRequest {
    pub fn new(item: WorkItem, quantity: Decimal) -> Self {
        Self {
            item,
            quantity,
            work_stage: WorkStage::Both,
            params: JobParameters::new(),
        }
    }

    pub fn with_stage(mut self, work_stage: WorkStage) -> Self {
        self.work_stage = work_stage;
        self
    }

    pub fn with_params(mut self, params: JobParameters) -> Self {
        self.params = params;
        self
    }
}

// ==========================================
// AggregationPhase - 汇总状态
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregationPhase {
    New,
    StageField,
    StageOffice,
    Addons,
    TotalCoefficients,
    Rounded,
    Done,
}

impl AggregationPhase {
    /// 下一状态（按阶段选择器跳过未请求的阶段）
    pub fn next(self, work_stage: WorkStage) -> Option<Self> {
        let next = match self {
            AggregationPhase::New => {
                if work_stage.includes(Stage::Field) {
                    AggregationPhase::StageField
                } else if work_stage.includes(Stage::Office) {
                    AggregationPhase::StageOffice
                } else {
                    AggregationPhase::Addons
                }
            }
            AggregationPhase::StageField => {
                if work_stage.includes(Stage::Office) {
                    AggregationPhase::StageOffice
                } else {
                    AggregationPhase::Addons
                }
            }
            AggregationPhase::StageOffice => AggregationPhase::Addons,
            AggregationPhase::Addons => AggregationPhase::TotalCoefficients,
            AggregationPhase::TotalCoefficients => AggregationPhase::Rounded,
            AggregationPhase::Rounded => AggregationPhase::Done,
            AggregationPhase::Done => return None,
        };
        Some(next)
    }
}

impl fmt::Display for AggregationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AggregationPhase::New => "NEW",
            AggregationPhase::StageField => "STAGE_FIELD",
            AggregationPhase::StageOffice => "STAGE_OFFICE",
            AggregationPhase::Addons => "ADDONS",
            AggregationPhase::TotalCoefficients => "TOTAL_COEFFICIENTS",
            AggregationPhase::Rounded => "ROUNDED",
            AggregationPhase::Done => "DONE",
        };
        write!(f, "{}", s)
    }
}

/// 单次汇总的工作状态
struct Aggregation<'a> {
    request: &'a CalculationRequest,
    context: JobParameters,
    quantity: Decimal,
    coefficients: CoefficientResolution,
    field: Option<StageCalculation>,
    office: Option<StageCalculation>,
    addons: Vec<AddonApplication>,
    subtotal: Decimal,
    unrounded_total: Decimal,
    total: Decimal,
    issues: Vec<CalculationIssue>,
}

impl Aggregation<'_> {
    fn stage_total(&self, stage: Stage) -> Decimal {
        let calc = match stage {
            Stage::Field => &self.field,
            Stage::Office => &self.office,
        };
        calc.as_ref().map(|s| s.total).unwrap_or(Decimal::ZERO)
    }
}

// ==========================================
// CostAggregator
// ==========================================
pub struct CostAggregator {
    coefficients: CoefficientResolver,
    addons: AddonResolver,
    config: EngineConfig,
}

impl CostAggregator {
    pub fn new(catalog: Arc<dyn RuleCatalog>, config: EngineConfig) -> Self {
        Self {
            coefficients: CoefficientResolver::new(catalog.clone(), config.clone()),
            addons: AddonResolver::new(catalog, config.clone()),
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// 计算单个工作项
    ///
    /// # 返回
    /// - 始终返回结果；问题记录在 errors / warnings 中
    #[instrument(skip(self, request), fields(item = %request.item.id, work_stage = %request.work_stage))]
    pub async fn calculate(&self, request: &CalculationRequest) -> CalculationResult {
        info!(quantity = %request.quantity, "开始计算");

        let mut state = Aggregation {
            request,
            context: matching_context(&request.item, &request.params),
            quantity: request.quantity,
            coefficients: CoefficientResolution::default(),
            field: None,
            office: None,
            addons: Vec::new(),
            subtotal: Decimal::ZERO,
            unrounded_total: Decimal::ZERO,
            total: Decimal::ZERO,
            issues: Vec::new(),
        };

        let mut phase = AggregationPhase::New;
        loop {
            debug!(phase = %phase, "汇总状态");
            match phase {
                AggregationPhase::New => self.begin(&mut state).await,
                AggregationPhase::StageField => state.field = Some(self.stage(&mut state, Stage::Field)),
                AggregationPhase::StageOffice => state.office = Some(self.stage(&mut state, Stage::Office)),
                AggregationPhase::Addons => {
                    let bases = AddonBases {
                        field: state.stage_total(Stage::Field),
                        office: state.stage_total(Stage::Office),
                        quantity: state.quantity,
                    };
                    let outcome = self.addons.resolve(&state.context, bases).await;
                    state.addons = outcome.applications;
                    state.issues.extend(outcome.issues);
                }
                AggregationPhase::TotalCoefficients => self.apply_total_coefficients(&mut state),
                AggregationPhase::Rounded => state.total = round_money(state.unrounded_total),
                AggregationPhase::Done => break,
            }
            match phase.next(request.work_stage) {
                Some(next) => phase = next,
                None => break,
            }
        }

        let result = self.finish(state);
        info!(
            total = %result.total,
            errors = result.errors.len(),
            warnings = result.warnings.len(),
            "计算完成"
        );
        result
    }

    /// NEW: 校验工作量并并发解析所请求阶段的系数
    async fn begin(&self, state: &mut Aggregation<'_>) {
        let request = state.request;
        if request.quantity.is_sign_negative() && !request.quantity.is_zero() {
            warn!(quantity = %request.quantity, "工作量为负，按 0 计");
            state.issues.push(
                CalculationIssue::new(
                    IssueKind::InvalidQuantity,
                    t_in_with_args(
                        &self.config.locale,
                        "issue.invalid_quantity",
                        &[("quantity", &request.quantity.to_string())],
                    ),
                )
                .for_code(request.item.id.clone()),
            );
            state.quantity = Decimal::ZERO;
        }

        let stages: Vec<Stage> = [Stage::Field, Stage::Office]
            .into_iter()
            .filter(|s| request.work_stage.includes(*s))
            .collect();
        state.coefficients = self
            .coefficients
            .resolve(&request.item, &stages, &request.params)
            .await;
        state.issues.append(&mut state.coefficients.issues);
    }

    /// STAGE_*: 单价 × 工作量 × 阶段乘数，阶段末舍入
    fn stage(&self, state: &mut Aggregation<'_>, stage: Stage) -> StageCalculation {
        let request = state.request;
        let item = &request.item;
        let mut issues = Vec::new();

        let base_price = match item.price_for(stage) {
            Some(price) if !price.is_zero() => price,
            _ => {
                warn!(stage = %stage, item = %item.id, "阶段缺少单价，按 0 计");
                issues.push(
                    CalculationIssue::new(
                        IssueKind::MissingRequiredAttribute,
                        t_in_with_args(&self.config.locale, "issue.missing_price", &[("stage", stage.as_str())]),
                    )
                    .at_stage(stage)
                    .for_code(item.id.clone()),
                );
                Decimal::ZERO
            }
        };

        let (coefficients, multiplier) = match state.coefficients.stage(stage) {
            Some(resolved) => {
                issues.extend(resolved.issues.iter().cloned());
                (resolved.classes.clone(), resolved.multiplier)
            }
            None => (Vec::new(), Decimal::ONE),
        };

        let priced = base_price
            .checked_mul(state.quantity)
            .and_then(|base_cost| base_cost.checked_mul(multiplier).map(|cost| (base_cost, round_money(cost))));
        let (base_cost, total) = match priced {
            Some(priced) => priced,
            None => {
                issues.push(
                    self.overflow_issue(stage.as_str())
                        .at_stage(stage)
                        .for_code(item.id.clone()),
                );
                (Decimal::ZERO, Decimal::ZERO)
            }
        };
        debug!(stage = %stage, base_cost = %base_cost, multiplier = %multiplier, total = %total, "阶段合计");

        state.issues.extend(issues.iter().cloned());
        StageCalculation {
            stage,
            base_price,
            quantity: state.quantity,
            base_cost,
            coefficients,
            multiplier,
            total,
            issues,
        }
    }

    /// TOTAL_COEFFICIENTS: 小计 = 外业 + 内业 + 附加费，再连乘总价系数
    fn apply_total_coefficients(&self, state: &mut Aggregation<'_>) {
        let item_id = state.request.item.id.clone();
        let subtotal = state
            .stage_total(Stage::Field)
            .checked_add(state.stage_total(Stage::Office))
            .and_then(|stages| state.addons.iter().try_fold(stages, |acc, a| acc.checked_add(a.amount)));
        let Some(subtotal) = subtotal else {
            state.issues.push(self.overflow_issue("subtotal").for_code(item_id));
            state.subtotal = Decimal::ZERO;
            state.unrounded_total = Decimal::ZERO;
            return;
        };

        state.subtotal = subtotal;
        state.unrounded_total = match state
            .coefficients
            .deferred
            .iter()
            .try_fold(subtotal, |acc, c| acc.checked_mul(c.value))
        {
            Some(total) => total,
            None => {
                state.issues.push(self.overflow_issue("total coefficients").for_code(item_id));
                Decimal::ZERO
            }
        };
    }

    /// 超出十进制范围的金额按 0 计，记为错误
    fn overflow_issue(&self, step: &str) -> CalculationIssue {
        warn!(step = %step, "金额溢出，按 0 计");
        CalculationIssue::new(
            IssueKind::ArithmeticOverflow,
            t_in_with_args(&self.config.locale, "issue.arithmetic_overflow", &[("step", step)]),
        )
    }

    /// DONE: 依据链与问题分拣
    fn finish(&self, state: Aggregation<'_>) -> CalculationResult {
        let justification = self.justification(&state);
        let (errors, warnings): (Vec<_>, Vec<_>) = state.issues.into_iter().partition(|i| i.is_error());

        CalculationResult {
            item_id: state.request.item.id.clone(),
            item_reference: state.request.item.reference(),
            quantity: state.quantity,
            work_stage: state.request.work_stage,
            field: state.field,
            office: state.office,
            addons: state.addons,
            total_coefficients: state.coefficients.deferred,
            subtotal: state.subtotal,
            total: state.total,
            justification,
            errors,
            warnings,
        }
    }

    /// 依据链: 表/条款引用 → 各阶段 code=value → 附加费代码 → 总价系数代码
    fn justification(&self, state: &Aggregation<'_>) -> String {
        let locale = self.config.locale.as_str();
        let none = t_in(locale, "label.none");
        let item = &state.request.item;

        let mut parts = Vec::new();
        let reference = match (item.table_no, item.section.as_deref()) {
            (Some(t), Some(s)) => format!("{} {}, {}", t_in(locale, "label.table"), t, s),
            (Some(t), None) => format!("{} {}", t_in(locale, "label.table"), t),
            (None, Some(s)) => s.to_string(),
            (None, None) => item.id.clone(),
        };
        parts.push(reference);

        for (label, calc) in [("label.field", &state.field), ("label.office", &state.office)] {
            if let Some(calc) = calc {
                let coeffs = calc
                    .resolved()
                    .map(|c| format!("{}={}", c.code, c.value))
                    .collect::<Vec<_>>();
                parts.push(format!("{}: {}", t_in(locale, label), join_or(coeffs, &none)));
            }
        }

        let addons = state.addons.iter().map(|a| a.code.clone()).collect::<Vec<_>>();
        parts.push(format!("{}: {}", t_in(locale, "label.addons"), join_or(addons, &none)));

        let totals = state
            .coefficients
            .deferred
            .iter()
            .map(|c: &ResolvedCoefficient| c.code.clone())
            .collect::<Vec<_>>();
        parts.push(format!(
            "{}: {}",
            t_in(locale, "label.total_coefficients"),
            join_or(totals, &none)
        ));

        parts.join(" | ")
    }
}

fn join_or(items: Vec<String>, empty: &str) -> String {
    if items.is_empty() {
        empty.to_string()
    } else {
        items.join(", ")
    }
}
