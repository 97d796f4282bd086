// ==========================================
// 工程勘察收费系统 - 规则实体 (CoeffRule / AddonRule)
// ==========================================
// 来源: 规则目录（只读），每次请求读取
// 红线: 规则必须携带来源引用，用于依据链
// ==========================================

use crate::domain::money::{decimal_from_json, deserialize_decimal};
use crate::domain::types::{AddonKind, ApplyTo, BaseType, CalcType, CoeffClass};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// 规则条件表（键 → JSON 标量）
pub type RuleConditions = BTreeMap<String, Value>;

// ==========================================
// SourceRef - 来源引用
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "deserialize_opt_label")]
    pub document: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "deserialize_opt_label")]
    pub table: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "deserialize_opt_label")]
    pub section: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "deserialize_opt_label")]
    pub note: Option<String>,
}

impl SourceRef {
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: Some(table.into()),
            ..Default::default()
        }
    }

    pub fn section(section: impl Into<String>) -> Self {
        Self {
            section: Some(section.into()),
            ..Default::default()
        }
    }

    /// 总则条款号: "п.15г" → 15, "§8" → 8
    pub fn section_number(&self) -> Option<u32> {
        self.section.as_deref().and_then(leading_number)
    }

    /// 表号: "9" / "табл. 9" → 9
    pub fn table_number(&self) -> Option<u32> {
        self.table.as_deref().and_then(leading_number)
    }

    pub fn is_empty(&self) -> bool {
        self.document.is_none() && self.table.is_none() && self.section.is_none() && self.note.is_none()
    }
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(doc) = &self.document {
            parts.push(doc.clone());
        }
        if let Some(table) = &self.table {
            parts.push(format!("табл. {}", table));
        }
        if let Some(section) = &self.section {
            parts.push(section.clone());
        }
        if let Some(note) = &self.note {
            parts.push(format!("прим. {}", note));
        }
        write!(f, "{}", parts.join(", "))
    }
}

/// 提取文本中第一段连续数字
fn leading_number(text: &str) -> Option<u32> {
    let digits: String = text
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

/// JSON 数字表号: 非负整数或整数值浮点（9 / 9.0），超出 u32 视为无效
fn table_number_from_json(n: &serde_json::Number) -> Option<u32> {
    if let Some(i) = n.as_u64() {
        return u32::try_from(i).ok();
    }
    n.as_f64()
        .filter(|f| f.fract() == 0.0 && *f >= 0.0 && *f <= f64::from(u32::MAX))
        .map(|f| f as u32)
}

/// 接受数字或字符串形式的标签（如 table: 9 / table: "9"）
fn deserialize_opt_label<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(match raw {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if s.trim().is_empty() => None,
        Some(Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}

// ==========================================
// CoeffRule - 乘数系数规则
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoeffRule {
    pub code: String,
    #[serde(default)]
    pub name: String,
    #[serde(deserialize_with = "deserialize_decimal")]
    pub value: Decimal,
    pub apply_to: ApplyTo,
    /// 目录标注的类别（可缺省，解析器按来源条款再过滤）
    #[serde(default, alias = "category", skip_serializing_if = "Option::is_none")]
    pub class: Option<CoeffClass>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclusive_group: Option<String>,
    #[serde(default)]
    pub conditions: RuleConditions,
    #[serde(default, alias = "source_ref")]
    pub source: SourceRef,
    /// 不可同时适用的规则代码
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub incompatible_with: Vec<String>,
}

impl CoeffRule {
    pub fn new(code: impl Into<String>, value: Decimal, apply_to: ApplyTo) -> Self {
        Self {
            code: code.into(),
            name: String::new(),
            value,
            apply_to,
            class: None,
            exclusive_group: None,
            conditions: RuleConditions::new(),
            source: SourceRef::default(),
            incompatible_with: Vec::new(),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn in_class(mut self, class: CoeffClass) -> Self {
        self.class = Some(class);
        self
    }

    pub fn in_group(mut self, group: impl Into<String>) -> Self {
        self.exclusive_group = Some(group.into());
        self
    }

    pub fn with_condition(mut self, key: impl Into<String>, value: Value) -> Self {
        self.conditions.insert(key.into(), value);
        self
    }

    pub fn with_source(mut self, source: SourceRef) -> Self {
        self.source = source;
        self
    }

    pub fn incompatible_with(mut self, code: impl Into<String>) -> Self {
        self.incompatible_with.push(code.into());
        self
    }

    /// 表号绑定: 条件 table_no 优先，其次来源引用中的表号
    pub fn table_binding(&self) -> Option<u32> {
        self.conditions
            .get("table_no")
            .and_then(|v| match v {
                Value::Number(n) => table_number_from_json(n),
                Value::String(s) => leading_number(s),
                _ => None,
            })
            .or_else(|| self.source.table_number())
    }

    /// 目录分类: 是否为指定类别的候选
    ///
    /// # 规则
    /// - 附加费工期系数（applies_to_addon）不属于任何类别
    /// - 显式类别优先
    /// - 未标注时: 有表号且无条款来源 → K1；有条款号 → K2/K3（由解析器按条款再过滤）
    pub fn is_candidate_for(&self, class: CoeffClass) -> bool {
        if self.applies_to_addon().is_some() {
            return false;
        }
        match (self.class, class) {
            (Some(declared), _) => declared == class,
            (None, CoeffClass::K1) => self.table_binding().is_some() && self.source.section.is_none(),
            (None, _) => self.source.section_number().is_some(),
        }
    }

    /// 规则作用于的附加费代码（如组织/撤离的工期系数）
    pub fn applies_to_addon(&self) -> Option<&str> {
        self.conditions.get("applies_to_addon").and_then(Value::as_str)
    }

    /// 估算系数（地区工资系数规则用于匹配的数值）
    pub fn estimate_coeff(&self) -> Option<Decimal> {
        self.conditions.get("estimate_coeff").and_then(decimal_from_json)
    }
}

// ==========================================
// AddonRule - 附加费规则
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddonRule {
    pub code: String,
    #[serde(default)]
    pub name: String,
    /// 缺省时按代码前缀推断
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<AddonKind>,
    pub calc_type: CalcType,
    #[serde(deserialize_with = "deserialize_decimal")]
    pub value: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_type: Option<BaseType>,
    #[serde(default)]
    pub conditions: RuleConditions,
    #[serde(default, alias = "source_ref")]
    pub source: SourceRef,
}

/// 分段公式参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PiecewiseTerms {
    pub fixed_amount: Decimal,
    pub percent_over: Decimal,
    /// 区间下限（千卢布）
    pub floor_thousand: Decimal,
    /// 区间上限（千卢布，开区间；None = 无上限）
    pub ceiling_thousand: Option<Decimal>,
}

impl AddonRule {
    pub fn new(code: impl Into<String>, calc_type: CalcType, value: Decimal) -> Self {
        Self {
            code: code.into(),
            name: String::new(),
            kind: None,
            calc_type,
            value,
            base_type: None,
            conditions: RuleConditions::new(),
            source: SourceRef::default(),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn of_kind(mut self, kind: AddonKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn on_base(mut self, base_type: BaseType) -> Self {
        self.base_type = Some(base_type);
        self
    }

    pub fn with_condition(mut self, key: impl Into<String>, value: Value) -> Self {
        self.conditions.insert(key.into(), value);
        self
    }

    pub fn with_source(mut self, source: SourceRef) -> Self {
        self.source = source;
        self
    }

    /// 有效类型（显式优先，否则按代码前缀）
    pub fn effective_kind(&self) -> AddonKind {
        self.kind.unwrap_or_else(|| AddonKind::infer_from_code(&self.code))
    }

    pub fn is_piecewise(&self) -> bool {
        self.calc_type == CalcType::Piecewise || self.effective_kind().is_piecewise_family()
    }

    /// 分段公式参数
    ///
    /// # 规则
    /// - fixed_amount 缺省为 0
    /// - percent_over 缺省取规则 value
    /// - 下限取 base_cost_thousand_min（缺省 0）
    pub fn piecewise_terms(&self) -> PiecewiseTerms {
        let get = |key: &str| self.conditions.get(key).and_then(decimal_from_json);
        PiecewiseTerms {
            fixed_amount: get("fixed_amount").unwrap_or(Decimal::ZERO),
            percent_over: get("percent_over").unwrap_or(self.value),
            floor_thousand: get("base_cost_thousand_min").unwrap_or(Decimal::ZERO),
            ceiling_thousand: get("base_cost_thousand_max"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_section_number_parsing() {
        assert_eq!(SourceRef::section("п.15г").section_number(), Some(15));
        assert_eq!(SourceRef::section("§8").section_number(), Some(8));
        assert_eq!(SourceRef::section("п. 14").section_number(), Some(14));
        assert_eq!(SourceRef::section("общие").section_number(), None);
    }

    #[test]
    fn test_table_binding_from_condition_or_source() {
        let rule: CoeffRule = serde_json::from_value(json!({
            "code": "T9_UNDERGROUND_INDUSTRIAL_1_75",
            "value": 1.75,
            "apply_to": "price",
            "conditions": {"table_no": 9, "has_underground_comms": true},
            "source_ref": {"table": 9, "note": 4}
        }))
        .unwrap();
        assert_eq!(rule.table_binding(), Some(9));
        assert_eq!(rule.source.note.as_deref(), Some("4"));

        let by_source: CoeffRule = serde_json::from_value(json!({
            "code": "T10_X",
            "value": "1,2",
            "apply_to": "field",
            "source_ref": {"table": "10"}
        }))
        .unwrap();
        assert_eq!(by_source.table_binding(), Some(10));

        let unbound = CoeffRule::new("FREE", Decimal::ONE, ApplyTo::Price);
        assert_eq!(unbound.table_binding(), None);
    }

    #[test]
    fn test_table_binding_accepts_integral_floats_only() {
        let bound = |v: Value| {
            CoeffRule::new("T", Decimal::ONE, ApplyTo::Price)
                .with_condition("table_no", v)
                .table_binding()
        };
        assert_eq!(bound(json!(9.0)), Some(9));
        assert_eq!(bound(json!(9.5)), None);
        assert_eq!(bound(json!(-1)), None);
        // 超出 u32 不截断
        assert_eq!(bound(json!(4_294_967_305u64)), None);

        // 无效的条件表号回退到来源引用
        let rule = CoeffRule::new("T", Decimal::ONE, ApplyTo::Price)
            .with_condition("table_no", json!(9.5))
            .with_source(SourceRef {
                table: Some("11".to_string()),
                ..Default::default()
            });
        assert_eq!(rule.table_binding(), Some(11));
    }

    #[test]
    fn test_candidate_classification() {
        let table_rule =
            CoeffRule::new("T9", Decimal::ONE, ApplyTo::Price).with_condition("table_no", json!(9));
        assert!(table_rule.is_candidate_for(CoeffClass::K1));
        assert!(!table_rule.is_candidate_for(CoeffClass::K2));

        let section_rule =
            CoeffRule::new("S15", Decimal::ONE, ApplyTo::Office).with_source(SourceRef::section("п.15г"));
        assert!(!section_rule.is_candidate_for(CoeffClass::K1));
        assert!(section_rule.is_candidate_for(CoeffClass::K2));
        assert!(section_rule.is_candidate_for(CoeffClass::K3));

        let declared = section_rule.clone().in_class(CoeffClass::K3);
        assert!(!declared.is_candidate_for(CoeffClass::K2));

        let duration = section_rule.with_condition("applies_to_addon", json!("ORG_LIQ_6PCT"));
        assert!(!duration.is_candidate_for(CoeffClass::K2));
    }

    #[test]
    fn test_addon_kind_inference_and_piecewise_terms() {
        let rule: AddonRule = serde_json::from_value(json!({
            "code": "PROGRAM_T78_100_500",
            "calc_type": "percent",
            "value": 0.03,
            "base_type": "subtotal",
            "conditions": {
                "base_cost_thousand_min": 100,
                "base_cost_thousand_max": 500,
                "fixed_amount": 4300,
                "percent_over": 0.03
            }
        }))
        .unwrap();

        assert_eq!(rule.effective_kind(), AddonKind::Program);
        assert!(rule.is_piecewise());
        let terms = rule.piecewise_terms();
        assert_eq!(terms.fixed_amount, Decimal::from(4300));
        assert_eq!(terms.floor_thousand, Decimal::from(100));
        assert_eq!(terms.ceiling_thousand, Some(Decimal::from(500)));
    }
}
