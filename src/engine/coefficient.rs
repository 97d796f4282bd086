// ==========================================
// 工程勘察收费系统 - 系数解析引擎 (CoefficientResolver)
// ==========================================
// 职责: 按阶段选出 K1/K2/K3 规则并合成阶段乘数，输出审计信息
// 红线: K1 必须绑定表号；K2 仅限 §15；K3 仅限 §8/§14
// 红线: 目录查询失败 → 该类别乘数为 1 并记录错误，不静默回退
// 红线: total 作用范围的规则延后到总价，不进入阶段乘数
// ==========================================

use crate::config::EngineConfig;
use crate::domain::money::decimal_from_f64;
use crate::domain::params::{JobParameters, ParamKey};
use crate::domain::result::{CalculationIssue, ClassResolution, ResolvedCoefficient};
use crate::domain::rule::{CoeffRule, SourceRef};
use crate::domain::types::{ApplyTo, CoeffClass, IssueKind, Stage};
use crate::domain::work_item::WorkItem;
use crate::engine::condition_core::{ConditionCore, MatchOutcome};
use crate::i18n::t_in_with_args;
use crate::repository::RuleCatalog;
use futures::future::join_all;
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// 沙漠/边远地区合成系数代码
pub const DESERT_FIELD_CODE: &str = "DESERT_FIELD";
pub const DESERT_OFFICE_CODE: &str = "DESERT_OFFICE";

// ==========================================
// StageCoefficients - 单阶段系数结果
// ==========================================
#[derive(Debug, Clone, PartialEq)]
pub struct StageCoefficients {
    pub stage: Stage,
    /// K1 → K2 → K3
    pub classes: Vec<ClassResolution>,
    /// 阶段乘数
    pub multiplier: Decimal,
    /// 阶段级问题（目录不可用、冲突等）
    pub issues: Vec<CalculationIssue>,
}

// ==========================================
// CoefficientResolution - 全部请求阶段的结果
// ==========================================
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CoefficientResolution {
    pub stages: Vec<StageCoefficients>,
    /// 延后作用于总价的系数（K2/K3 中 apply_to = total）
    pub deferred: Vec<ResolvedCoefficient>,
    /// 与阶段无关的问题（条件格式错误、参数无效等）
    pub issues: Vec<CalculationIssue>,
}

impl CoefficientResolution {
    pub fn stage(&self, stage: Stage) -> Option<&StageCoefficients> {
        self.stages.iter().find(|s| s.stage == stage)
    }
}

// ==========================================
// CoefficientResolver
// ==========================================
pub struct CoefficientResolver {
    catalog: Arc<dyn RuleCatalog>,
    config: EngineConfig,
}

/// 按类别筛选后的候选
#[derive(Default)]
struct ClassCandidates {
    /// 阶段作用的匹配规则（未做互斥组裁决）
    staged: Vec<CoeffRule>,
    /// 总价作用的匹配规则
    deferred: Vec<CoeffRule>,
}

impl CoefficientResolver {
    pub fn new(catalog: Arc<dyn RuleCatalog>, config: EngineConfig) -> Self {
        Self { catalog, config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// 解析单个阶段
    pub async fn resolve_stage(
        &self,
        item: &WorkItem,
        stage: Stage,
        params: &JobParameters,
    ) -> StageCoefficients {
        let mut resolution = self.resolve(item, &[stage], params).await;
        match resolution.stages.pop() {
            Some(mut stage_result) => {
                stage_result.issues.extend(resolution.issues);
                stage_result
            }
            None => StageCoefficients {
                stage,
                classes: CoeffClass::ALL.iter().map(|c| ClassResolution::neutral(*c)).collect(),
                multiplier: Decimal::ONE,
                issues: resolution.issues,
            },
        }
    }

    /// 解析请求的所有阶段
    ///
    /// # 说明
    /// - K2/K3 各查询一次，K1 按阶段查询，全部并发发出
    /// - 工作项属性仅补齐作业参数中未设置的键
    #[instrument(skip(self, item, params), fields(item = %item.id))]
    pub async fn resolve(
        &self,
        item: &WorkItem,
        stages: &[Stage],
        params: &JobParameters,
    ) -> CoefficientResolution {
        let context = matching_context(item, params);
        let mut resolution = CoefficientResolution::default();
        let mut reported: HashSet<String> = HashSet::new();

        let k1_queries = join_all(stages.iter().map(|stage| async move {
            match item.table_no {
                Some(table_no) => Some(self.catalog.query_k1(table_no, *stage).await),
                None => None,
            }
        }));
        let (k1_results, k2_result, k3_result) =
            tokio::join!(k1_queries, self.catalog.query_k2(), self.catalog.query_k3());

        if item.table_no.is_none() && !stages.is_empty() {
            resolution.issues.push(
                CalculationIssue::new(
                    IssueKind::MissingTableReference,
                    self.message("issue.item_without_table", &[("item", &item.id)]),
                )
                .for_code(item.id.clone()),
            );
        }

        let desert = self.desert_rules(&context, &mut resolution.issues);

        // K2/K3 的条件判定与阶段无关，先统一处理
        let k2: Result<ClassCandidates, String> = k2_result
            .map(|rules| {
                self.select_candidates(CoeffClass::K2, item, rules, &context, &mut resolution.issues, &mut reported)
            })
            .map_err(|e| e.to_string());
        let k3: Result<ClassCandidates, String> = k3_result
            .map(|mut rules| {
                rules.extend(desert);
                self.select_candidates(CoeffClass::K3, item, rules, &context, &mut resolution.issues, &mut reported)
            })
            .map_err(|e| e.to_string());

        let mut deferred = Vec::new();
        for (class, candidates) in [(CoeffClass::K2, &k2), (CoeffClass::K3, &k3)] {
            if let Ok(candidates) = candidates {
                deferred.extend(
                    candidates
                        .deferred
                        .iter()
                        .map(|r| ResolvedCoefficient::from_rule(r, class)),
                );
            }
        }

        // 总价系数同样参与互不兼容检查；总价系数之间的冲突与阶段无关，只记录一次
        let deferred_rules: Vec<&CoeffRule> = [&k2, &k3]
            .into_iter()
            .filter_map(|candidates| candidates.as_ref().ok())
            .flat_map(|candidates| candidates.deferred.iter())
            .collect();
        let deferred_codes: HashSet<&str> = deferred_rules.iter().map(|r| r.code.as_str()).collect();
        let mut withheld_total: HashSet<String> = HashSet::new();
        for (a, b) in ConditionCore::find_conflicts(&deferred_rules) {
            warn!(rule_a = %a, rule_b = %b, "总价系数互不兼容，均不采用");
            resolution.issues.push(self.conflict_issue(&a, &b));
            withheld_total.insert(a);
            withheld_total.insert(b);
        }

        for (stage, k1_result) in stages.iter().zip(k1_results) {
            let stage = *stage;
            let mut issues = Vec::new();

            let k1: Result<ClassCandidates, String> = match k1_result {
                None => Ok(ClassCandidates::default()),
                Some(result) => result
                    .map(|rules| {
                        self.select_candidates(CoeffClass::K1, item, rules, &context, &mut resolution.issues, &mut reported)
                    })
                    .map_err(|e| e.to_string()),
            };

            let per_class: Vec<(CoeffClass, Option<Vec<CoeffRule>>)> = [
                (CoeffClass::K1, &k1),
                (CoeffClass::K2, &k2),
                (CoeffClass::K3, &k3),
            ]
            .into_iter()
            .map(|(class, candidates)| {
                let rules = match candidates {
                    Ok(c) => Ok(c.staged.as_slice()),
                    Err(e) => Err(e.as_str()),
                };
                (class, self.stage_rules(class, stage, item, rules, &mut issues))
            })
            .collect();

            // 冲突: 被标注为不可同时适用的规则双双剔除
            let mut withheld: HashSet<String> = HashSet::new();
            {
                let all: Vec<&CoeffRule> = per_class
                    .iter()
                    .filter_map(|(_, rules)| rules.as_ref())
                    .flatten()
                    .chain(deferred_rules.iter().copied())
                    .collect();
                for (a, b) in ConditionCore::find_conflicts(&all) {
                    let a_total = deferred_codes.contains(a.as_str());
                    let b_total = deferred_codes.contains(b.as_str());
                    if a_total && b_total {
                        continue;
                    }
                    warn!(stage = %stage, rule_a = %a, rule_b = %b, "规则互不兼容，均不采用");
                    issues.push(self.conflict_issue(&a, &b).at_stage(stage));
                    for (code, total) in [(&a, a_total), (&b, b_total)] {
                        if total {
                            withheld_total.insert(code.clone());
                        }
                    }
                    withheld.insert(a);
                    withheld.insert(b);
                }
            }

            let classes: Vec<ClassResolution> = per_class
                .into_iter()
                .map(|(class, rules)| match rules {
                    None => ClassResolution {
                        degraded: true,
                        ..ClassResolution::neutral(class)
                    },
                    Some(rules) => {
                        let resolved = rules
                            .iter()
                            .filter(|r| !withheld.contains(&r.code))
                            .map(|r| ResolvedCoefficient::from_rule(r, class))
                            .collect();
                        ClassResolution::compose(class, resolved)
                    }
                })
                .collect();

            let multiplier = match classes.iter().try_fold(Decimal::ONE, |acc, c| acc.checked_mul(c.value)) {
                Some(multiplier) => multiplier,
                None => {
                    warn!(stage = %stage, "阶段乘数溢出，按 0 计");
                    issues.push(
                        CalculationIssue::new(
                            IssueKind::ArithmeticOverflow,
                            self.message("issue.arithmetic_overflow", &[("step", stage.as_str())]),
                        )
                        .at_stage(stage)
                        .for_code(item.id.clone()),
                    );
                    Decimal::ZERO
                }
            };
            for class in &classes {
                debug!(
                    stage = %stage,
                    class = %class.class,
                    value = %class.value,
                    rules = class.rules.len(),
                    degraded = class.degraded,
                    "系数类别解析完成"
                );
            }

            resolution.stages.push(StageCoefficients {
                stage,
                classes,
                multiplier,
                issues,
            });
        }

        resolution.deferred = resolve_deferred(
            deferred
                .into_iter()
                .filter(|c| !withheld_total.contains(&c.code))
                .collect(),
        );

        resolution
    }

    fn conflict_issue(&self, a: &str, b: &str) -> CalculationIssue {
        CalculationIssue::new(
            IssueKind::ConflictingRule,
            self.message("issue.conflicting_rule", &[("a", a), ("b", b)]),
        )
        .for_code(format!("{}+{}", a, b))
    }

    /// 阶段规则: 按作用范围过滤后做互斥组裁决
    ///
    /// # 返回
    /// - None: 目录查询失败（类别降级为 1，已记录错误）
    fn stage_rules(
        &self,
        class: CoeffClass,
        stage: Stage,
        item: &WorkItem,
        candidates: Result<&[CoeffRule], &str>,
        issues: &mut Vec<CalculationIssue>,
    ) -> Option<Vec<CoeffRule>> {
        match candidates {
            Ok(staged) => {
                let scoped: Vec<CoeffRule> = staged
                    .iter()
                    .filter(|r| r.apply_to.covers_stage(stage))
                    .cloned()
                    .collect();
                Some(ConditionCore::resolve_exclusive_groups(scoped))
            }
            Err(e) => {
                let table = item
                    .table_no
                    .map(|t| t.to_string())
                    .unwrap_or_else(|| "-".to_string());
                warn!(stage = %stage, class = %class, table = %table, error = %e, "规则目录查询失败，类别降级为 1");
                issues.push(
                    CalculationIssue::new(
                        IssueKind::CatalogUnavailable,
                        self.message(
                            "issue.catalog_unavailable",
                            &[
                                ("class", &class.to_string()),
                                ("table", &table),
                                ("error", e),
                            ],
                        ),
                    )
                    .at_stage(stage)
                    .for_code(class.to_string()),
                );
                None
            }
        }
    }

    /// 类别筛选 + 条件匹配
    ///
    /// # 规则
    /// - K1: 必须绑定表号且与工作项一致；apply_to ∈ {field, office, price}
    /// - K2/K3: 来源条款号必须属于该类别
    /// - 附加费模式下，存在附加费处理方式的条件规则不作为乘数
    /// - 条件格式错误的规则跳过并告警
    fn select_candidates(
        &self,
        class: CoeffClass,
        item: &WorkItem,
        rules: Vec<CoeffRule>,
        context: &JobParameters,
        issues: &mut Vec<CalculationIssue>,
        reported: &mut HashSet<String>,
    ) -> ClassCandidates {
        let addon_mode = context.is_true(ParamKey::ApplyConditionsAsAddons);
        let mut staged = Vec::new();
        let mut deferred = Vec::new();

        for mut rule in rules {
            match class {
                CoeffClass::K1 => match rule.table_binding() {
                    None => {
                        if reported.insert(format!("unbound:{}", rule.code)) {
                            warn!(rule = %rule.code, "K1 规则未绑定表号，拒绝");
                            issues.push(
                                CalculationIssue::new(
                                    IssueKind::MissingTableReference,
                                    self.message("issue.missing_table_reference", &[("code", &rule.code)]),
                                )
                                .for_code(rule.code.clone()),
                            );
                        }
                        continue;
                    }
                    Some(t) if Some(t) != item.table_no => continue,
                    Some(_) => {
                        if rule.apply_to == ApplyTo::Total {
                            continue;
                        }
                    }
                },
                CoeffClass::K2 | CoeffClass::K3 => {
                    let in_section = rule
                        .source
                        .section_number()
                        .map_or(false, |s| class.allowed_sections().contains(&s));
                    if !in_section {
                        debug!(rule = %rule.code, class = %class, section = ?rule.source.section, "来源条款不属于该类别，排除");
                        continue;
                    }
                }
            }

            if addon_mode && ConditionCore::references_any(&rule.conditions, |k| k.has_addon_treatment()) {
                debug!(rule = %rule.code, "附加费模式，条件规则不作为乘数");
                continue;
            }

            match ConditionCore::matches(&rule.conditions, context, self.config.float_epsilon) {
                MatchOutcome::Matched => {
                    rule.class = Some(class);
                    if rule.apply_to == ApplyTo::Total {
                        deferred.push(rule);
                    } else {
                        staged.push(rule);
                    }
                }
                MatchOutcome::NotMatched => {}
                MatchOutcome::Malformed(m) => {
                    if reported.insert(format!("malformed:{}", rule.code)) {
                        warn!(rule = %rule.code, key = %m.key, reason = %m.reason, "规则条件格式错误，跳过");
                        issues.push(
                            CalculationIssue::new(
                                IssueKind::MalformedCondition,
                                self.message(
                                    "issue.malformed_condition",
                                    &[("code", &rule.code), ("key", &m.key)],
                                ),
                            )
                            .for_code(rule.code.clone()),
                        );
                    }
                }
            }
        }

        ClassCandidates { staged, deferred }
    }

    /// 合成沙漠/边远地区 K3 系数对（由地区查询提供 desert_coeff）
    fn desert_rules(&self, context: &JobParameters, issues: &mut Vec<CalculationIssue>) -> Vec<CoeffRule> {
        let Some(raw) = context.get(ParamKey::DesertCoeff) else {
            return Vec::new();
        };
        let value = raw
            .as_number()
            .filter(|v| *v > 0.0)
            .and_then(decimal_from_f64);

        let Some(value) = value else {
            warn!(value = %raw, "desert_coeff 无效，忽略");
            issues.push(
                CalculationIssue::new(
                    IssueKind::InvalidParameter,
                    self.message(
                        "issue.invalid_parameter",
                        &[("key", ParamKey::DesertCoeff.as_str()), ("value", &raw.to_string())],
                    ),
                )
                .for_code(ParamKey::DesertCoeff.as_str()),
            );
            return Vec::new();
        };

        let source = SourceRef {
            document: Some("прил.".to_string()),
            section: Some("п.8".to_string()),
            ..Default::default()
        };
        vec![
            CoeffRule::new(DESERT_FIELD_CODE, value, ApplyTo::Field)
                .named("Пустынные и безводные районы (полевые)")
                .in_class(CoeffClass::K3)
                .with_source(source.clone()),
            CoeffRule::new(DESERT_OFFICE_CODE, value, ApplyTo::Office)
                .named("Пустынные и безводные районы (камеральные)")
                .in_class(CoeffClass::K3)
                .with_source(source),
        ]
    }

    fn message(&self, key: &str, args: &[(&str, &str)]) -> String {
        t_in_with_args(&self.config.locale, key, args)
    }
}

/// 匹配上下文: 作业参数 + 工作项属性（仅补齐未设置的键）
pub fn matching_context(item: &WorkItem, params: &JobParameters) -> JobParameters {
    let mut context = params.clone();
    context.fill_absent_from(&item.attribute_params());
    context
}

/// 总价系数的互斥组裁决（max 值胜出，并列取先出现者）
fn resolve_deferred(deferred: Vec<ResolvedCoefficient>) -> Vec<ResolvedCoefficient> {
    let mut kept: Vec<ResolvedCoefficient> = Vec::with_capacity(deferred.len());
    for coeff in deferred {
        match coeff.exclusive_group.as_deref() {
            None => kept.push(coeff),
            Some(group) => {
                match kept
                    .iter_mut()
                    .find(|k| k.exclusive_group.as_deref() == Some(group))
                {
                    Some(existing) => {
                        if coeff.value > existing.value {
                            *existing = coeff;
                        }
                    }
                    None => kept.push(coeff),
                }
            }
        }
    }
    kept
}
