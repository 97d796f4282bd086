// ==========================================
// 工程勘察收费系统 - 附加费引擎 (AddonResolver)
// ==========================================
// 职责: 按固定族顺序计算附加费，后序基数依赖前序结果
// 顺序: 内部运输 → 外部运输 → 组织/撤离 → 条件型 → 通用 → 分段公式族
// 红线: 每项金额在计算后立即舍入（half-up, 2 位）
// 红线: 条件型附加费仅在 apply_conditions_as_addons = true 时计算
// ==========================================

use crate::config::EngineConfig;
use crate::domain::money::{decimal_from_f64, round_money};
use crate::domain::params::{JobParameters, ParamKey};
use crate::domain::result::{AddonApplication, CalculationIssue};
use crate::domain::rule::AddonRule;
use crate::domain::types::{AddonKind, BaseType, CalcType, IssueKind};
use crate::engine::condition_core::{ConditionCore, MatchOutcome};
use crate::i18n::t_in_with_args;
use crate::repository::RuleCatalog;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

// ==========================================
// AddonBases - 附加费输入基数
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AddonBases {
    /// 外业合计（已舍入）
    pub field: Decimal,
    /// 内业合计（已舍入）
    pub office: Decimal,
    /// 工作量（per_unit 使用）
    pub quantity: Decimal,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct AddonOutcome {
    pub applications: Vec<AddonApplication>,
    pub issues: Vec<CalculationIssue>,
}

/// 计算过程中的累计状态（基数求和均带溢出检查）
struct RunningState {
    bases: AddonBases,
    internal_transport: Decimal,
    addons_sum: Decimal,
}

impl RunningState {
    fn subtotal(&self) -> Option<Decimal> {
        self.bases
            .field
            .checked_add(self.bases.office)?
            .checked_add(self.addons_sum)
    }

    fn base_for(&self, base_type: BaseType) -> Option<Decimal> {
        match base_type {
            BaseType::Field => Some(self.bases.field),
            BaseType::Office => Some(self.bases.office),
            BaseType::FieldPlusOffice => self.bases.field.checked_add(self.bases.office),
            BaseType::FieldPlusInternal => self.bases.field.checked_add(self.internal_transport),
            BaseType::Subtotal => self.subtotal(),
        }
    }

    /// 记入累计；溢出时不记入并返回 false
    fn record(&mut self, application: &AddonApplication) -> bool {
        let Some(addons_sum) = self.addons_sum.checked_add(application.amount) else {
            return false;
        };
        if application.kind == AddonKind::InternalTransport {
            let Some(internal) = self.internal_transport.checked_add(application.amount) else {
                return false;
            };
            self.internal_transport = internal;
        }
        self.addons_sum = addons_sum;
        true
    }
}

/// 调用方提供的分段公式基数（千卢布）
enum SuppliedBase {
    Value(Decimal),
    Invalid(String),
    Absent,
}

fn supplied_base_thousand(context: &JobParameters) -> SuppliedBase {
    match context.get(ParamKey::BaseCostThousand) {
        None => SuppliedBase::Absent,
        Some(raw) => raw
            .as_number()
            .filter(|v| *v >= 0.0)
            .and_then(decimal_from_f64)
            .map_or_else(|| SuppliedBase::Invalid(raw.to_string()), SuppliedBase::Value),
    }
}

// ==========================================
// AddonResolver
// ==========================================
pub struct AddonResolver {
    catalog: Arc<dyn RuleCatalog>,
    config: EngineConfig,
}

impl AddonResolver {
    pub fn new(catalog: Arc<dyn RuleCatalog>, config: EngineConfig) -> Self {
        Self { catalog, config }
    }

    /// 计算附加费
    ///
    /// # 参数
    /// - params: 匹配上下文（作业参数 + 工作项属性）
    /// - bases: 阶段合计与工作量
    ///
    /// # 返回
    /// - 按计算顺序排列的附加费及问题列表
    #[instrument(skip(self, params), fields(field = %bases.field, office = %bases.office))]
    pub async fn resolve(&self, params: &JobParameters, bases: AddonBases) -> AddonOutcome {
        let mut outcome = AddonOutcome::default();

        let rules = match self.catalog.query_addons().await {
            Ok(rules) => rules,
            Err(e) => {
                warn!(error = %e, "附加费目录查询失败");
                outcome.issues.push(
                    CalculationIssue::new(
                        IssueKind::CatalogUnavailable,
                        self.message("issue.addons_unavailable", &[("error", &e.to_string())]),
                    )
                    .for_code("addons"),
                );
                return outcome;
            }
        };

        // 派生参数: 外业费用（千卢布），覆盖调用方传入值
        let mut context = params.clone();
        if let Ok(thousand) = f64::try_from(bases.field / Decimal::ONE_THOUSAND) {
            context.set(ParamKey::FieldCostThousand, thousand);
        }

        // 按族分组，族内保持目录顺序
        let mut families: BTreeMap<AddonKind, Vec<AddonRule>> = BTreeMap::new();
        for rule in rules {
            families.entry(rule.effective_kind()).or_default().push(rule);
        }

        let mut state = RunningState {
            bases,
            internal_transport: Decimal::ZERO,
            addons_sum: Decimal::ZERO,
        };
        let addon_mode = context.is_true(ParamKey::ApplyConditionsAsAddons);

        for (kind, rules) in &families {
            let applications = match kind {
                AddonKind::InternalTransport | AddonKind::ExternalTransport => self
                    .single_bracket(*kind, rules, &context, &state, &mut outcome.issues)
                    .into_iter()
                    .collect::<Vec<_>>(),
                AddonKind::OrgLiquidation => {
                    if !context.is_true(ParamKey::IncludeOrgLiq) {
                        debug!("未要求组织/撤离费用，跳过");
                        continue;
                    }
                    match self.single_match(*kind, rules, &context, &mut outcome.issues) {
                        Some(rule) => self
                            .org_liquidation(rule, &context, &state, &mut outcome.issues)
                            .await
                            .into_iter()
                            .collect(),
                        None => Vec::new(),
                    }
                }
                kind if kind.is_condition_linked() => {
                    if !addon_mode {
                        continue;
                    }
                    self.single_bracket(*kind, rules, &context, &state, &mut outcome.issues)
                        .into_iter()
                        .collect()
                }
                kind if kind.is_piecewise_family() => self
                    .piecewise(*kind, rules, &context, &state, &mut outcome.issues)
                    .into_iter()
                    .collect(),
                _ => self.generic(rules, &context, &mut state, &mut outcome.issues),
            };

            for application in applications {
                if *kind != AddonKind::Generic && !state.record(&application) {
                    self.overflow(&application.code, &mut outcome.issues);
                    continue;
                }
                debug!(
                    code = %application.code,
                    kind = %application.kind,
                    rate = %application.rate,
                    base = %application.base,
                    amount = %application.amount,
                    "附加费计算完成"
                );
                outcome.applications.push(application);
            }
        }

        outcome
    }

    /// 族内单一匹配: 取目录顺序第一个，多于一个时告警
    fn single_match<'a>(
        &self,
        kind: AddonKind,
        rules: &'a [AddonRule],
        context: &JobParameters,
        issues: &mut Vec<CalculationIssue>,
    ) -> Option<&'a AddonRule> {
        let matched = self.matching(rules, context, &[], issues);
        if matched.len() > 1 {
            let codes = matched.iter().map(|r| r.code.as_str()).collect::<Vec<_>>().join(", ");
            warn!(kind = %kind, codes = %codes, "多个区间规则同时匹配，取第一个");
            issues.push(
                CalculationIssue::new(
                    IssueKind::AmbiguousBracket,
                    self.message(
                        "issue.ambiguous_bracket",
                        &[("kind", kind.as_str()), ("codes", &codes), ("code", &matched[0].code)],
                    ),
                )
                .for_code(matched[0].code.clone()),
            );
        }
        matched.into_iter().next()
    }

    /// 条件匹配（格式错误的规则跳过并告警）
    fn rule_matches(
        &self,
        rule: &AddonRule,
        context: &JobParameters,
        excluded: &[ParamKey],
        issues: &mut Vec<CalculationIssue>,
    ) -> bool {
        match ConditionCore::matches_excluding(&rule.conditions, context, self.config.float_epsilon, excluded) {
            MatchOutcome::Matched => true,
            MatchOutcome::NotMatched => false,
            MatchOutcome::Malformed(m) => {
                warn!(rule = %rule.code, key = %m.key, "附加费条件格式错误，跳过");
                issues.push(
                    CalculationIssue::new(
                        IssueKind::MalformedCondition,
                        self.message("issue.malformed_condition", &[("code", &rule.code), ("key", &m.key)]),
                    )
                    .for_code(rule.code.clone()),
                );
                false
            }
        }
    }

    fn matching<'a>(
        &self,
        rules: &'a [AddonRule],
        context: &JobParameters,
        excluded: &[ParamKey],
        issues: &mut Vec<CalculationIssue>,
    ) -> Vec<&'a AddonRule> {
        rules
            .iter()
            .filter(|rule| self.rule_matches(rule, context, excluded, issues))
            .collect()
    }

    /// 运输矩阵与条件型附加费: 只取一个匹配区间
    fn single_bracket(
        &self,
        kind: AddonKind,
        rules: &[AddonRule],
        context: &JobParameters,
        state: &RunningState,
        issues: &mut Vec<CalculationIssue>,
    ) -> Option<AddonApplication> {
        let rule = self.single_match(kind, rules, context, issues)?;
        let base_type = rule.base_type.unwrap_or_else(|| default_base(kind));
        let application = state
            .base_for(base_type)
            .and_then(|base| simple_application(rule, kind, base, state.bases.quantity));
        if application.is_none() {
            self.overflow(&rule.code, issues);
        }
        application
    }

    /// 通用附加费: 全部匹配规则依次计算，基数随前序结果滚动
    ///
    /// 无族前缀的 piecewise 规则同样按 [min, max) 选区间，基数取 base_cost_thousand 或当前小计 / 1000
    fn generic(
        &self,
        rules: &[AddonRule],
        context: &JobParameters,
        state: &mut RunningState,
        issues: &mut Vec<CalculationIssue>,
    ) -> Vec<AddonApplication> {
        let supplied = supplied_base_thousand(context);
        if let SuppliedBase::Invalid(raw) = &supplied {
            if rules.iter().any(|r| r.calc_type == CalcType::Piecewise) {
                issues.push(self.invalid_base_issue(raw));
            }
        }

        let mut applications = Vec::new();
        for rule in rules {
            let piecewise = rule.calc_type == CalcType::Piecewise;
            let excluded: &[ParamKey] = if piecewise { &[ParamKey::BaseCostThousand] } else { &[] };
            if !self.rule_matches(rule, context, excluded, issues) {
                continue;
            }

            let application = if piecewise {
                let base_thousand = match &supplied {
                    SuppliedBase::Value(v) => Some(*v),
                    SuppliedBase::Invalid(_) => continue,
                    SuppliedBase::Absent => state.subtotal().map(|s| s / Decimal::ONE_THOUSAND),
                };
                match base_thousand {
                    Some(b) if !within_bracket(rule, b) => continue,
                    Some(b) => piecewise_application(rule, AddonKind::Generic, b),
                    None => None,
                }
            } else {
                let base_type = rule.base_type.unwrap_or(BaseType::Subtotal);
                state
                    .base_for(base_type)
                    .and_then(|base| simple_application(rule, AddonKind::Generic, base, state.bases.quantity))
            };

            match application {
                Some(application) if state.record(&application) => applications.push(application),
                _ => self.overflow(&rule.code, issues),
            }
        }
        applications
    }

    /// 组织/撤离: 基础费率 × 费用档位倍数 × 工期系数
    async fn org_liquidation(
        &self,
        rule: &AddonRule,
        context: &JobParameters,
        state: &RunningState,
        issues: &mut Vec<CalculationIssue>,
    ) -> Option<AddonApplication> {
        let Some(base) = state.base_for(rule.base_type.unwrap_or(BaseType::FieldPlusInternal)) else {
            self.overflow(&rule.code, issues);
            return None;
        };
        let far_north = self.config.is_far_north(context.text(ParamKey::RegionType));
        let cost_multiplier = self.config.org_liq_cost_multiplier(base, far_north);

        let duration_multiplier = match self.catalog.query_addon_coefficients(&rule.code).await {
            Ok(coeffs) => coeffs
                .iter()
                .find(|c| {
                    ConditionCore::matches(&c.conditions, context, self.config.float_epsilon).is_match()
                })
                .map(|c| c.value)
                .unwrap_or(Decimal::ONE),
            Err(e) => {
                warn!(addon = %rule.code, error = %e, "工期系数查询失败，按 1 计");
                issues.push(
                    CalculationIssue::new(
                        IssueKind::CatalogUnavailable,
                        self.message(
                            "issue.addon_coefficients_unavailable",
                            &[("code", &rule.code), ("error", &e.to_string())],
                        ),
                    )
                    .for_code(rule.code.clone()),
                );
                Decimal::ONE
            }
        };

        let priced = rule
            .value
            .checked_mul(cost_multiplier)
            .and_then(|r| r.checked_mul(duration_multiplier))
            .and_then(|rate| base.checked_mul(rate).map(|amount| (rate, amount)));
        let Some((rate, amount)) = priced else {
            self.overflow(&rule.code, issues);
            return None;
        };

        Some(AddonApplication {
            code: rule.code.clone(),
            name: rule.name.clone(),
            kind: AddonKind::OrgLiquidation,
            rate,
            base,
            amount: round_money(amount),
            source: rule.source.clone(),
            detail: Some(format!(
                "{} × {} × {}{}",
                rule.value,
                cost_multiplier,
                duration_multiplier,
                if far_north { " (far north)" } else { "" }
            )),
        })
    }

    /// 分段公式族
    ///
    /// # 规则
    /// - 提供 base_cost_thousand 或对应 include_* 为 true 时计算
    /// - 基数: base_cost_thousand，否则当前小计 / 1000
    /// - 区间 [min, max)，上限缺省为开区间
    fn piecewise(
        &self,
        kind: AddonKind,
        rules: &[AddonRule],
        context: &JobParameters,
        state: &RunningState,
        issues: &mut Vec<CalculationIssue>,
    ) -> Option<AddonApplication> {
        let include_flag = match kind {
            AddonKind::Program => ParamKey::IncludeProgram,
            AddonKind::Report => ParamKey::IncludeReport,
            _ => ParamKey::IncludeRegistration,
        };

        let base_thousand = match supplied_base_thousand(context) {
            SuppliedBase::Value(v) => v,
            SuppliedBase::Invalid(raw) => {
                issues.push(self.invalid_base_issue(&raw));
                return None;
            }
            SuppliedBase::Absent if context.is_true(include_flag) => match state.subtotal() {
                Some(subtotal) => subtotal / Decimal::ONE_THOUSAND,
                None => {
                    self.overflow(kind.as_str(), issues);
                    return None;
                }
            },
            SuppliedBase::Absent => return None,
        };

        let in_bracket: Vec<&AddonRule> = self
            .matching(rules, context, &[ParamKey::BaseCostThousand], issues)
            .into_iter()
            .filter(|r| within_bracket(r, base_thousand))
            .collect();

        let rule = *in_bracket.first()?;
        if in_bracket.len() > 1 {
            let codes = in_bracket.iter().map(|r| r.code.as_str()).collect::<Vec<_>>().join(", ");
            issues.push(
                CalculationIssue::new(
                    IssueKind::AmbiguousBracket,
                    self.message(
                        "issue.ambiguous_bracket",
                        &[("kind", kind.as_str()), ("codes", &codes), ("code", &rule.code)],
                    ),
                )
                .for_code(rule.code.clone()),
            );
        }

        let application = piecewise_application(rule, kind, base_thousand);
        if application.is_none() {
            self.overflow(&rule.code, issues);
        }
        application
    }

    fn invalid_base_issue(&self, raw: &str) -> CalculationIssue {
        CalculationIssue::new(
            IssueKind::InvalidParameter,
            self.message(
                "issue.invalid_parameter",
                &[("key", ParamKey::BaseCostThousand.as_str()), ("value", raw)],
            ),
        )
        .for_code(ParamKey::BaseCostThousand.as_str())
    }

    /// 金额超出十进制范围: 记错误，该项按 0 计
    fn overflow(&self, step: &str, issues: &mut Vec<CalculationIssue>) {
        warn!(step = %step, "附加费金额溢出，按 0 计");
        issues.push(
            CalculationIssue::new(
                IssueKind::ArithmeticOverflow,
                self.message("issue.arithmetic_overflow", &[("step", step)]),
            )
            .for_code(step.to_string()),
        );
    }

    fn message(&self, key: &str, args: &[(&str, &str)]) -> String {
        t_in_with_args(&self.config.locale, key, args)
    }
}

/// 各族默认基数
fn default_base(kind: AddonKind) -> BaseType {
    match kind {
        AddonKind::InternalTransport
        | AddonKind::Seasonal
        | AddonKind::Mountain
        | AddonKind::SpecialRegime => BaseType::Field,
        AddonKind::ExternalTransport | AddonKind::OrgLiquidation => BaseType::FieldPlusInternal,
        AddonKind::Regional | AddonKind::IntermediateMaterials => BaseType::FieldPlusOffice,
        AddonKind::Generic | AddonKind::Program | AddonKind::Report | AddonKind::Registration => {
            BaseType::Subtotal
        }
    }
}

/// 分段区间 [min, max)，上限缺省为开区间
fn within_bracket(rule: &AddonRule, base_thousand: Decimal) -> bool {
    let terms = rule.piecewise_terms();
    base_thousand >= terms.floor_thousand && terms.ceiling_thousand.map_or(true, |max| base_thousand < max)
}

/// percent / fixed / per_unit 计算（溢出返回 None）
fn simple_application(
    rule: &AddonRule,
    kind: AddonKind,
    base: Decimal,
    quantity: Decimal,
) -> Option<AddonApplication> {
    let (base, amount) = match rule.calc_type {
        CalcType::Fixed => (Decimal::ZERO, Some(rule.value)),
        CalcType::PerUnit => (quantity, rule.value.checked_mul(quantity)),
        CalcType::Percent | CalcType::Piecewise => (base, base.checked_mul(rule.value)),
    };
    Some(AddonApplication {
        code: rule.code.clone(),
        name: rule.name.clone(),
        kind,
        rate: rule.value,
        base,
        amount: round_money(amount?),
        source: rule.source.clone(),
        detail: None,
    })
}

/// 固定额 + max(基数 − 下限, 0) × 1000 × 超出百分比（溢出返回 None）
fn piecewise_application(rule: &AddonRule, kind: AddonKind, base_thousand: Decimal) -> Option<AddonApplication> {
    let terms = rule.piecewise_terms();
    let over = base_thousand.checked_sub(terms.floor_thousand)?.max(Decimal::ZERO);
    let amount = over
        .checked_mul(Decimal::ONE_THOUSAND)?
        .checked_mul(terms.percent_over)?
        .checked_add(terms.fixed_amount)?;
    Some(AddonApplication {
        code: rule.code.clone(),
        name: rule.name.clone(),
        kind,
        rate: terms.percent_over,
        base: base_thousand,
        amount: round_money(amount),
        source: rule.source.clone(),
        detail: Some(format!(
            "{} + ({} − {}) × 1000 × {}",
            terms.fixed_amount, base_thousand, terms.floor_thousand, terms.percent_over
        )),
    })
}
