// ==========================================
// 工程勘察收费系统 - 计算结果
// ==========================================
// 红线: 结果为不可变终值，不持有目录状态引用
// 红线: 总价始终给出，并伴随显式 errors / warnings
// ==========================================

use crate::domain::rule::{CoeffRule, SourceRef};
use crate::domain::types::{AddonKind, ApplyTo, CoeffClass, IssueKind, Stage, WorkStage};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// ResolvedCoefficient - 已采用的系数
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedCoefficient {
    pub code: String,
    pub name: String,
    pub class: CoeffClass,
    pub value: Decimal,
    pub apply_to: ApplyTo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclusive_group: Option<String>,
    pub source: SourceRef,
}

impl ResolvedCoefficient {
    pub fn from_rule(rule: &CoeffRule, class: CoeffClass) -> Self {
        Self {
            code: rule.code.clone(),
            name: rule.name.clone(),
            class,
            value: rule.value,
            apply_to: rule.apply_to,
            exclusive_group: rule.exclusive_group.clone(),
            source: rule.source.clone(),
        }
    }
}

// ==========================================
// ClassResolution - 单一类别的合成结果
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassResolution {
    pub class: CoeffClass,
    /// 合成乘数（无规则时为 1）
    pub value: Decimal,
    /// 规则名称拼接
    pub reason: String,
    /// 来源引用拼接
    pub sources: String,
    pub rules: Vec<ResolvedCoefficient>,
    /// 目录不可用时降级为 1
    #[serde(default)]
    pub degraded: bool,
}

impl ClassResolution {
    /// 中性结果（乘数 1）
    pub fn neutral(class: CoeffClass) -> Self {
        Self {
            class,
            value: Decimal::ONE,
            reason: String::new(),
            sources: String::new(),
            rules: Vec::new(),
            degraded: false,
        }
    }

    /// 由已采用规则合成
    pub fn compose(class: CoeffClass, rules: Vec<ResolvedCoefficient>) -> Self {
        let value = rules.iter().fold(Decimal::ONE, |acc, r| acc.saturating_mul(r.value));
        let reason = rules
            .iter()
            .map(|r| if r.name.is_empty() { r.code.clone() } else { r.name.clone() })
            .collect::<Vec<_>>()
            .join("; ");
        let sources = rules
            .iter()
            .map(|r| r.source.to_string())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("; ");
        Self {
            class,
            value,
            reason,
            sources,
            rules,
            degraded: false,
        }
    }
}

// ==========================================
// CalculationIssue - 计算问题
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalculationIssue {
    pub kind: IssueKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
    /// 相关规则/附加费代码
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub message: String,
}

impl CalculationIssue {
    pub fn new(kind: IssueKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            stage: None,
            code: None,
            message: message.into(),
        }
    }

    pub fn at_stage(mut self, stage: Stage) -> Self {
        self.stage = Some(stage);
        self
    }

    pub fn for_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.kind.is_error()
    }
}

impl fmt::Display for CalculationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

// ==========================================
// StageCalculation - 阶段计算
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageCalculation {
    pub stage: Stage,
    pub base_price: Decimal,
    pub quantity: Decimal,
    /// 单价 × 工作量（未舍入）
    pub base_cost: Decimal,
    /// 按 K1 → K2 → K3 排列
    pub coefficients: Vec<ClassResolution>,
    /// 阶段乘数（各类别之积）
    pub multiplier: Decimal,
    /// 阶段合计（已在阶段边界舍入）
    pub total: Decimal,
    pub issues: Vec<CalculationIssue>,
}

impl StageCalculation {
    pub fn class_value(&self, class: CoeffClass) -> Decimal {
        self.coefficients
            .iter()
            .find(|c| c.class == class)
            .map(|c| c.value)
            .unwrap_or(Decimal::ONE)
    }

    /// 所有已采用系数（按类别顺序）
    pub fn resolved(&self) -> impl Iterator<Item = &ResolvedCoefficient> {
        self.coefficients.iter().flat_map(|c| c.rules.iter())
    }
}

// ==========================================
// AddonApplication - 附加费计算项
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddonApplication {
    pub code: String,
    pub name: String,
    pub kind: AddonKind,
    /// 有效费率（含倍数；固定金额时为金额本身）
    pub rate: Decimal,
    /// 计算基数
    pub base: Decimal,
    /// 金额（已舍入）
    pub amount: Decimal,
    pub source: SourceRef,
    /// 计算说明（如分段公式展开）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

// ==========================================
// CalculationResult - 计算结果
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalculationResult {
    pub item_id: String,
    pub item_reference: String,
    pub quantity: Decimal,
    pub work_stage: WorkStage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<StageCalculation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub office: Option<StageCalculation>,
    pub addons: Vec<AddonApplication>,
    /// 延后作用于总价的系数
    pub total_coefficients: Vec<ResolvedCoefficient>,
    /// 阶段合计 + 附加费（总价系数之前）
    pub subtotal: Decimal,
    pub total: Decimal,
    pub justification: String,
    pub errors: Vec<CalculationIssue>,
    pub warnings: Vec<CalculationIssue>,
}

impl CalculationResult {
    pub fn field_total(&self) -> Decimal {
        self.field.as_ref().map(|s| s.total).unwrap_or(Decimal::ZERO)
    }

    pub fn office_total(&self) -> Decimal {
        self.office.as_ref().map(|s| s.total).unwrap_or(Decimal::ZERO)
    }

    pub fn addon_total(&self) -> Decimal {
        self.addons.iter().map(|a| a.amount).sum()
    }

    pub fn addon(&self, code: &str) -> Option<&AddonApplication> {
        self.addons.iter().find(|a| a.code == code)
    }

    /// 无任何错误或警告
    pub fn is_fully_resolved(&self) -> bool {
        self.errors.is_empty() && self.warnings.is_empty()
    }

    pub fn has_issue(&self, kind: IssueKind) -> bool {
        self.errors.iter().chain(self.warnings.iter()).any(|i| i.kind == kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rc(code: &str, value: &str) -> ResolvedCoefficient {
        ResolvedCoefficient {
            code: code.to_string(),
            name: String::new(),
            class: CoeffClass::K2,
            value: Decimal::from_str_exact(value).unwrap(),
            apply_to: ApplyTo::Office,
            exclusive_group: None,
            source: SourceRef::section("п.15г"),
        }
    }

    #[test]
    fn test_compose_multiplies_and_joins() {
        let res = ClassResolution::compose(CoeffClass::K2, vec![rc("A", "1.1"), rc("B", "1.2")]);
        assert_eq!(res.value, Decimal::from_str_exact("1.32").unwrap());
        assert_eq!(res.reason, "A; B");
        assert_eq!(res.sources, "п.15г; п.15г");
        assert!(!res.degraded);
    }

    #[test]
    fn test_neutral_is_one() {
        let res = ClassResolution::neutral(CoeffClass::K3);
        assert_eq!(res.value, Decimal::ONE);
        assert!(res.rules.is_empty());
    }
}
