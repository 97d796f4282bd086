// ==========================================
// 工程勘察收费系统 - Condition Core 纯函数库
// ==========================================
// 职责: 规则条件解析、匹配法则、互斥组裁决、冲突检测
// 红线: 无状态、无副作用、无 I/O 操作
// 红线: 参数未设置永远不满足显式条件（无论条件为 true 还是 false）
// 红线: 规则未声明的条件键不缩小匹配范围
// ==========================================

use crate::domain::params::{JobParameters, ParamKey, ParamValue};
use crate::domain::rule::{CoeffRule, RuleConditions};
use serde_json::Value;

/// 仅供说明/计算使用、不参与匹配的条件键
pub const INFORMATIONAL_KEYS: [&str; 7] = [
    "table_no",
    "applies_to_addon",
    "fixed_amount",
    "percent_over",
    "formula_text",
    "estimate_coeff",
    "radioactivity_coeff_range",
];

// ==========================================
// Criterion - 已解析的单个条件
// ==========================================
#[derive(Debug, Clone, PartialEq)]
pub enum CriterionTest {
    /// 精确值（数组 = 任一取值）
    Equals(Value),
    /// 下限（含）
    Min(f64),
    /// 上限（含）
    Max(f64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Criterion {
    pub key: ParamKey,
    pub test: CriterionTest,
}

/// 条件解析失败（规则整体跳过）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedCondition {
    pub key: String,
    pub reason: String,
}

/// 匹配结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchOutcome {
    Matched,
    NotMatched,
    Malformed(MalformedCondition),
}

impl MatchOutcome {
    pub fn is_match(&self) -> bool {
        matches!(self, MatchOutcome::Matched)
    }
}

// ==========================================
// ConditionCore - 纯函数工具类
// ==========================================
pub struct ConditionCore;

impl ConditionCore {
    /// 解析规则条件表
    ///
    /// # 规则
    /// - 说明性键跳过
    /// - key_min / key_max → 闭区间边界
    /// - 未知键 / 非标量值 / 非数值边界 → MalformedCondition
    pub fn parse_conditions(conditions: &RuleConditions) -> Result<Vec<Criterion>, MalformedCondition> {
        let mut criteria = Vec::with_capacity(conditions.len());

        for (raw_key, value) in conditions {
            if INFORMATIONAL_KEYS.contains(&raw_key.as_str()) {
                continue;
            }
            if value.is_null() {
                // null 条件 = 未约束
                continue;
            }

            let malformed = |reason: &str| MalformedCondition {
                key: raw_key.clone(),
                reason: reason.to_string(),
            };

            if let Some(key) = ParamKey::parse(raw_key) {
                if value.is_object() {
                    return Err(malformed("条件值为嵌套对象"));
                }
                criteria.push(Criterion {
                    key,
                    test: CriterionTest::Equals(value.clone()),
                });
                continue;
            }

            let (base, is_min) = if let Some(base) = raw_key.strip_suffix("_min") {
                (base, true)
            } else if let Some(base) = raw_key.strip_suffix("_max") {
                (base, false)
            } else {
                return Err(malformed("未知条件键"));
            };

            let key = ParamKey::parse(base).ok_or_else(|| malformed("未知条件键"))?;
            let bound = bound_value(key, value).ok_or_else(|| malformed("区间边界不是数值"))?;
            criteria.push(Criterion {
                key,
                test: if is_min {
                    CriterionTest::Min(bound)
                } else {
                    CriterionTest::Max(bound)
                },
            });
        }

        Ok(criteria)
    }

    /// 判定单个条件
    pub fn criterion_matches(criterion: &Criterion, params: &JobParameters, epsilon: f64) -> bool {
        // 未设置的参数永远不满足显式条件
        let Some(actual) = params.get(criterion.key) else {
            return false;
        };
        let is_scale = criterion.key.is_scale();

        match &criterion.test {
            CriterionTest::Equals(expected) => value_equals(actual, expected, is_scale, epsilon),
            CriterionTest::Min(min) => {
                numeric_view(actual, is_scale).map_or(false, |v| v >= *min - epsilon)
            }
            CriterionTest::Max(max) => {
                numeric_view(actual, is_scale).map_or(false, |v| v <= *max + epsilon)
            }
        }
    }

    /// 判定规则条件表（全部条件成立才匹配）
    pub fn matches(conditions: &RuleConditions, params: &JobParameters, epsilon: f64) -> MatchOutcome {
        Self::matches_excluding(conditions, params, epsilon, &[])
    }

    /// 判定规则条件表，忽略指定参数键的条件（由调用方另行判定）
    pub fn matches_excluding(
        conditions: &RuleConditions,
        params: &JobParameters,
        epsilon: f64,
        excluded: &[ParamKey],
    ) -> MatchOutcome {
        match Self::parse_conditions(conditions) {
            Err(malformed) => MatchOutcome::Malformed(malformed),
            Ok(criteria) => {
                let all = criteria
                    .iter()
                    .filter(|c| !excluded.contains(&c.key))
                    .all(|c| Self::criterion_matches(c, params, epsilon));
                if all {
                    MatchOutcome::Matched
                } else {
                    MatchOutcome::NotMatched
                }
            }
        }
    }

    /// 规则条件是否引用了指定参数键
    pub fn references_any(conditions: &RuleConditions, keys: impl Fn(ParamKey) -> bool) -> bool {
        conditions.keys().any(|raw| {
            let base = raw
                .strip_suffix("_min")
                .or_else(|| raw.strip_suffix("_max"))
                .unwrap_or(raw);
            ParamKey::parse(raw)
                .or_else(|| ParamKey::parse(base))
                .map_or(false, &keys)
        })
    }

    /// 互斥组裁决
    ///
    /// # 规则
    /// - 每组仅保留 value 最大者，并列时保留目录顺序中的第一个
    /// - 未分组规则原样通过
    /// - 输出保持目录顺序
    pub fn resolve_exclusive_groups(rules: Vec<CoeffRule>) -> Vec<CoeffRule> {
        let mut winners: Vec<(String, usize)> = Vec::new();

        for (idx, rule) in rules.iter().enumerate() {
            let Some(group) = rule.exclusive_group.as_deref() else {
                continue;
            };
            match winners.iter_mut().find(|(g, _)| g == group) {
                Some((_, best)) => {
                    if rule.value > rules[*best].value {
                        *best = idx;
                    }
                }
                None => winners.push((group.to_string(), idx)),
            }
        }

        rules
            .into_iter()
            .enumerate()
            .filter(|(idx, rule)| match rule.exclusive_group.as_deref() {
                None => true,
                Some(group) => winners.iter().any(|(g, best)| g == group && best == idx),
            })
            .map(|(_, rule)| rule)
            .collect()
    }

    /// 检测互不兼容的规则对（任一方声明即成立，每对只报告一次）
    pub fn find_conflicts(rules: &[&CoeffRule]) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        for (i, a) in rules.iter().enumerate() {
            for b in rules.iter().skip(i + 1) {
                let marked = a.incompatible_with.iter().any(|c| c == &b.code)
                    || b.incompatible_with.iter().any(|c| c == &a.code);
                if marked {
                    pairs.push((a.code.clone(), b.code.clone()));
                }
            }
        }
        pairs
    }
}

/// 区间边界数值（比例尺按分母）
fn bound_value(key: ParamKey, value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let pv = ParamValue::Text(s.clone());
            if key.is_scale() {
                pv.scale_denominator()
            } else {
                pv.as_number()
            }
        }
        _ => None,
    }
}

fn numeric_view(actual: &ParamValue, is_scale: bool) -> Option<f64> {
    if is_scale {
        actual.scale_denominator()
    } else {
        actual.as_number()
    }
}

fn approx_eq(a: f64, b: f64, epsilon: f64) -> bool {
    (a - b).abs() <= epsilon
}

/// 精确值比较（布尔按布尔、数值带容差、比例尺按分母、文本忽略大小写）
fn value_equals(actual: &ParamValue, expected: &Value, is_scale: bool, epsilon: f64) -> bool {
    match expected {
        Value::Null => true,
        Value::Array(options) => options
            .iter()
            .any(|option| value_equals(actual, option, is_scale, epsilon)),
        Value::Bool(b) => actual.as_bool() == Some(*b),
        Value::Number(n) => {
            let Some(expected) = n.as_f64() else {
                return false;
            };
            numeric_view(actual, is_scale).map_or(false, |v| approx_eq(v, expected, epsilon))
        }
        Value::String(s) => {
            let expected = ParamValue::Text(s.clone());
            if is_scale {
                return match (actual.scale_denominator(), expected.scale_denominator()) {
                    (Some(a), Some(e)) => approx_eq(a, e, epsilon),
                    _ => false,
                };
            }
            match actual {
                ParamValue::Text(text) => text.trim().to_lowercase() == s.trim().to_lowercase(),
                ParamValue::Number(v) => expected
                    .as_number()
                    .map_or(false, |e| approx_eq(*v, e, epsilon)),
                ParamValue::Bool(_) => false,
            }
        }
        Value::Object(_) => false,
    }
}
