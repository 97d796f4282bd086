// ==========================================
// 工程勘察收费系统 - 预算汇总 (EstimateCalculator)
// ==========================================
// 职责: 并发计算多个工作项，汇总总价并应用价格指数与合同系数
// 红线: 每次乘法后舍入（half-up, 2 位）；各行问题带工作项标识保留
// ==========================================

use crate::domain::money::round_money;
use crate::domain::result::{CalculationIssue, CalculationResult};
use crate::domain::types::IssueKind;
use crate::engine::aggregator::{CalculationRequest, CostAggregator};
use crate::i18n::t_in_with_args;
use futures::future::join_all;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EstimateRequest {
    pub lines: Vec<CalculationRequest>,
    #[serde(default, deserialize_with = "crate::domain::money::deserialize_opt_decimal")]
    pub price_index: Option<Decimal>,
    #[serde(default, deserialize_with = "crate::domain::money::deserialize_opt_decimal")]
    pub contract_coefficient: Option<Decimal>,
}

impl EstimateRequest {
    pub fn new(lines: Vec<CalculationRequest>) -> Self {
        Self {
            lines,
            ..Default::default()
        }
    }

    pub fn with_price_index(mut self, index: Decimal) -> Self {
        self.price_index = Some(index);
        self
    }

    pub fn with_contract_coefficient(mut self, coefficient: Decimal) -> Self {
        self.contract_coefficient = Some(coefficient);
        self
    }
}

/// 带工作项标识的问题
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineIssue {
    pub item_id: String,
    pub issue: CalculationIssue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimateResult {
    pub lines: Vec<CalculationResult>,
    /// Σ 各行总价
    pub lines_total: Decimal,
    /// 应用价格指数后（未提供时等于 lines_total）
    pub indexed_total: Decimal,
    pub total: Decimal,
    pub errors: Vec<LineIssue>,
    pub warnings: Vec<LineIssue>,
}

pub struct EstimateCalculator {
    aggregator: Arc<CostAggregator>,
}

impl EstimateCalculator {
    pub fn new(aggregator: Arc<CostAggregator>) -> Self {
        Self { aggregator }
    }

    #[instrument(skip(self, request), fields(lines = request.lines.len()))]
    pub async fn calculate(&self, request: &EstimateRequest) -> EstimateResult {
        let lines: Vec<CalculationResult> =
            join_all(request.lines.iter().map(|line| self.aggregator.calculate(line))).await;

        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        for line in &lines {
            errors.extend(line.errors.iter().map(|i| LineIssue {
                item_id: line.item_id.clone(),
                issue: i.clone(),
            }));
            warnings.extend(line.warnings.iter().map(|i| LineIssue {
                item_id: line.item_id.clone(),
                issue: i.clone(),
            }));
        }

        let mut lines_total = Decimal::ZERO;
        for line in &lines {
            match lines_total.checked_add(line.total) {
                Some(sum) => lines_total = sum,
                None => errors.push(self.overflow_issue(&line.item_id, "lines_total")),
            }
        }
        let indexed_total = self.apply_factor(
            lines_total,
            request.price_index,
            "price_index",
            &mut errors,
            &mut warnings,
        );
        let total = self.apply_factor(
            indexed_total,
            request.contract_coefficient,
            "contract_coefficient",
            &mut errors,
            &mut warnings,
        );

        info!(lines_total = %lines_total, total = %total, "预算汇总完成");
        EstimateResult {
            lines,
            lines_total,
            indexed_total,
            total,
            errors,
            warnings,
        }
    }

    /// 乘以可选系数并舍入；非正系数忽略并告警，溢出记错误按 0 计
    fn apply_factor(
        &self,
        amount: Decimal,
        factor: Option<Decimal>,
        name: &str,
        errors: &mut Vec<LineIssue>,
        warnings: &mut Vec<LineIssue>,
    ) -> Decimal {
        match factor {
            None => amount,
            Some(f) if f > Decimal::ZERO => match amount.checked_mul(f) {
                Some(product) => round_money(product),
                None => {
                    errors.push(self.overflow_issue("", name));
                    Decimal::ZERO
                }
            },
            Some(f) => {
                warn!(factor = name, value = %f, "预算系数无效，忽略");
                let message = t_in_with_args(
                    &self.aggregator.config().locale,
                    "issue.invalid_parameter",
                    &[("key", name), ("value", &f.to_string())],
                );
                warnings.push(LineIssue {
                    item_id: String::new(),
                    issue: CalculationIssue::new(IssueKind::InvalidParameter, message).for_code(name),
                });
                amount
            }
        }
    }

    fn overflow_issue(&self, item_id: &str, step: &str) -> LineIssue {
        warn!(item = %item_id, step = %step, "预算金额溢出，按 0 计");
        let message = t_in_with_args(
            &self.aggregator.config().locale,
            "issue.arithmetic_overflow",
            &[("step", step)],
        );
        LineIssue {
            item_id: item_id.to_string(),
            issue: CalculationIssue::new(IssueKind::ArithmeticOverflow, message).for_code(step),
        }
    }
}
