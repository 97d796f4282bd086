// ==========================================
// AddonResolver 集成测试
// ==========================================
// 测试范围:
// 1. 运输矩阵（场景 C）与顺序依赖
// 2. 组织/撤离: 费用档位 × 工期系数，远北地区取最高档
// 3. 分段公式（场景 D）与开关
// 4. 条件型附加费模式、通用附加费、目录故障
// ==========================================


use serde_json::json;
use survey_tariff::domain::{AddonKind, AddonRule, CalcType, IssueKind, JobParameters, ParamKey};
use survey_tariff::engine::{AddonBases, AddonOutcome, AddonResolver};
use survey_tariff::repository::{CatalogQuery, InMemoryRuleCatalog};
use test_helpers::*;

// ==========================================
// 辅助函数
// ==========================================

fn bases(field: &str, office: &str) -> AddonBases {
    AddonBases {
        field: d(field),
        office: d(office),
        quantity: d("1"),
    }
}

async fn run(catalog: InMemoryRuleCatalog, params: &JobParameters, bases: AddonBases) -> AddonOutcome {
    AddonResolver::new(shared(catalog), test_config())
        .resolve(params, bases)
        .await
}

fn codes(outcome: &AddonOutcome) -> Vec<&str> {
    outcome.applications.iter().map(|a| a.code.as_str()).collect()
}

fn transport_params() -> JobParameters {
    JobParameters::new()
        .with(ParamKey::DistanceToBaseKm, 8.0)
        .with(ParamKey::ExternalDistanceKm, 200.0)
        .with(ParamKey::ExpeditionDurationMonths, 2.0)
}

// ==========================================
// 运输
// ==========================================

#[tokio::test]
async fn test_scenario_c_internal_transport() {
    let params = JobParameters::new().with(ParamKey::DistanceToBaseKm, 8.0);
    let outcome = run(standard_catalog(), &params, bases("70000", "0")).await;

    assert_eq!(codes(&outcome), vec!["INTERNAL_5_10_0_75"]);
    let internal = &outcome.applications[0];
    assert_eq!(internal.kind, AddonKind::InternalTransport);
    assert_eq!(internal.rate, d("0.0875"));
    assert_eq!(internal.base, d("70000"));
    assert_eq!(internal.amount, d("6125.00"));
    assert!(outcome.issues.is_empty());
}

#[tokio::test]
async fn test_internal_transport_uses_field_cost_bracket() {
    let params = JobParameters::new().with(ParamKey::DistanceToBaseKm, 8.0);
    let outcome = run(standard_catalog(), &params, bases("100000", "0")).await;

    assert_eq!(codes(&outcome), vec!["INTERNAL_5_10_75_150"]);
    assert_eq!(outcome.applications[0].amount, d("7000.00"));
}

#[tokio::test]
async fn test_external_transport_base_includes_internal_amount() {
    let outcome = run(standard_catalog(), &transport_params(), bases("70000", "0")).await;

    assert_eq!(codes(&outcome), vec!["INTERNAL_5_10_0_75", "EXTERNAL_100_300_1_6"]);
    let external = &outcome.applications[1];
    assert_eq!(external.base, d("76125.00"));
    assert_eq!(external.amount, d("15225.00"));
}

#[tokio::test]
async fn test_absent_distance_selects_no_transport() {
    let outcome = run(standard_catalog(), &JobParameters::new(), bases("70000", "0")).await;
    assert!(outcome.applications.is_empty());
}

#[tokio::test]
async fn test_ambiguous_bracket_applies_first_and_warns() {
    let mut addons = addon_rules();
    addons.insert(
        1,
        AddonRule::new("INTERNAL_0_20_ANY", CalcType::Percent, d("0.05"))
            .with_condition("distance_to_base_km_min", json!(0))
            .with_condition("distance_to_base_km_max", json!(20)),
    );
    let catalog = InMemoryRuleCatalog::new(all_coeff_rules(), addons);

    let params = JobParameters::new().with(ParamKey::DistanceToBaseKm, 8.0);
    let outcome = run(catalog, &params, bases("70000", "0")).await;

    assert_eq!(codes(&outcome), vec!["INTERNAL_5_10_0_75"]);
    let warning = outcome
        .issues
        .iter()
        .find(|i| i.kind == IssueKind::AmbiguousBracket)
        .expect("应记录区间歧义");
    assert!(!warning.is_error());
    assert!(warning.message.contains("INTERNAL_0_20_ANY"));
}

// ==========================================
// 组织/撤离
// ==========================================

#[tokio::test]
async fn test_org_liquidation_requires_flag() {
    let outcome = run(standard_catalog(), &transport_params(), bases("70000", "0")).await;
    assert!(outcome.applications.iter().all(|a| a.kind != AddonKind::OrgLiquidation));
}

#[tokio::test]
async fn test_org_liquidation_cost_tier_and_duration() {
    let params = transport_params().with(ParamKey::IncludeOrgLiq, true);
    let outcome = run(standard_catalog(), &params, bases("70000", "0")).await;

    let org_liq = outcome
        .applications
        .iter()
        .find(|a| a.code == "ORG_LIQ_6PCT")
        .expect("应计算组织/撤离");
    // 基数 70000 + 6125 落入 75000–150000 档 (1.5)，工期 2 个月 (0.8)
    assert_eq!(org_liq.base, d("76125.00"));
    assert_eq!(org_liq.rate, d("0.072"));
    assert_eq!(org_liq.amount, d("5481.00"));
}

#[tokio::test]
async fn test_org_liquidation_far_north_takes_highest_tier() {
    let params = transport_params()
        .with(ParamKey::IncludeOrgLiq, true)
        .with(ParamKey::RegionType, "far_north");
    let outcome = run(standard_catalog(), &params, bases("70000", "0")).await;

    let org_liq = outcome
        .applications
        .iter()
        .find(|a| a.code == "ORG_LIQ_6PCT")
        .expect("应计算组织/撤离");
    assert_eq!(org_liq.rate, d("0.12"));
    assert_eq!(org_liq.amount, d("9135.00"));
}

#[tokio::test]
async fn test_org_liquidation_duration_failure_uses_one() {
    let catalog = standard_catalog().fail_on(CatalogQuery::AddonCoefficients);
    let params = transport_params().with(ParamKey::IncludeOrgLiq, true);
    let outcome = run(catalog, &params, bases("70000", "0")).await;

    let org_liq = outcome
        .applications
        .iter()
        .find(|a| a.code == "ORG_LIQ_6PCT")
        .expect("应计算组织/撤离");
    assert_eq!(org_liq.amount, d("6851.25"));
    assert!(outcome
        .issues
        .iter()
        .any(|i| i.kind == IssueKind::CatalogUnavailable && i.is_error()));
}

// ==========================================
// 分段公式
// ==========================================

#[tokio::test]
async fn test_scenario_d_piecewise_program() {
    let params = JobParameters::new().with(ParamKey::BaseCostThousand, 250.0);
    let outcome = run(standard_catalog(), &params, bases("0", "0")).await;

    assert_eq!(codes(&outcome), vec!["PROGRAM_100_500"]);
    let program = &outcome.applications[0];
    assert_eq!(program.kind, AddonKind::Program);
    assert_eq!(program.amount, d("8800.00"));
}

#[tokio::test]
async fn test_piecewise_bracket_is_half_open() {
    // 小计 100 000 → 100 千卢布，落入 [100, 500)
    let params = JobParameters::new().with(ParamKey::IncludeProgram, true);
    let outcome = run(standard_catalog(), &params, bases("70000", "30000")).await;

    assert_eq!(codes(&outcome), vec!["PROGRAM_100_500"]);
    assert_eq!(outcome.applications[0].amount, d("4300.00"));
}

#[tokio::test]
async fn test_piecewise_not_requested_is_skipped() {
    let outcome = run(standard_catalog(), &JobParameters::new(), bases("70000", "30000")).await;
    assert!(outcome.applications.is_empty());
}

#[tokio::test]
async fn test_piecewise_rejects_negative_base() {
    let params = JobParameters::new().with(ParamKey::BaseCostThousand, -5.0);
    let outcome = run(standard_catalog(), &params, bases("0", "0")).await;

    assert!(outcome.applications.is_empty());
    assert!(outcome
        .issues
        .iter()
        .any(|i| i.kind == IssueKind::InvalidParameter));
}

// ==========================================
// 条件型 / 通用附加费
// ==========================================

#[tokio::test]
async fn test_condition_linked_addon_only_in_addon_mode() {
    let params = JobParameters::new().with(ParamKey::UnfavorableMonths, 3.0);
    let outcome = run(standard_catalog(), &params, bases("70000", "0")).await;
    assert!(outcome.applications.is_empty());

    let params = params.with(ParamKey::ApplyConditionsAsAddons, true);
    let outcome = run(standard_catalog(), &params, bases("70000", "0")).await;
    assert_eq!(codes(&outcome), vec!["SEASONAL_3_4"]);
    assert_eq!(outcome.applications[0].amount, d("7000.00"));
}

#[tokio::test]
async fn test_generic_addons_calc_types() {
    let mut addons = addon_rules();
    addons.push(generic_addon());
    addons.push(AddonRule::new("SURVEY_MARKERS", CalcType::PerUnit, d("150")));
    addons.push(AddonRule::new("PERMIT_FEE", CalcType::Fixed, d("2500")));
    let catalog = InMemoryRuleCatalog::new(all_coeff_rules(), addons);

    let params = JobParameters::new().with(ParamKey::RegionType, "far_north");
    let bases = AddonBases {
        field: d("70000"),
        office: d("30000"),
        quantity: d("4"),
    };
    let outcome = run(catalog, &params, bases).await;

    assert_eq!(codes(&outcome), vec!["WINTER_CLOTHING", "SURVEY_MARKERS", "PERMIT_FEE"]);
    assert_eq!(outcome.applications[0].amount, d("2000.00"));
    assert_eq!(outcome.applications[1].base, d("4"));
    assert_eq!(outcome.applications[1].amount, d("600.00"));
    assert_eq!(outcome.applications[2].base, d("0"));
    assert_eq!(outcome.applications[2].amount, d("2500.00"));
}

/// 无族前缀的分段公式规则: [0, 100) 与 [100, 500)
fn generic_piecewise_catalog() -> InMemoryRuleCatalog {
    let bracket = |code: &str, min: u32, max: u32, fixed: u32, percent: f64| {
        AddonRule::new(code, CalcType::Piecewise, d("0"))
            .of_kind(AddonKind::Generic)
            .with_condition("base_cost_thousand_min", json!(min))
            .with_condition("base_cost_thousand_max", json!(max))
            .with_condition("fixed_amount", json!(fixed))
            .with_condition("percent_over", json!(percent))
    };
    InMemoryRuleCatalog::new(
        all_coeff_rules(),
        vec![
            bracket("SURVEY_EXTRA_0_100", 0, 100, 1000, 0.01),
            bracket("SURVEY_EXTRA_100_500", 100, 500, 2000, 0.02),
        ],
    )
}

#[tokio::test]
async fn test_generic_piecewise_uses_subtotal_and_half_open_bracket() {
    // 未提供 base_cost_thousand: 小计 100 000 → 100 千卢布，只落入 [100, 500)
    let outcome = run(generic_piecewise_catalog(), &JobParameters::new(), bases("70000", "30000")).await;

    assert_eq!(codes(&outcome), vec!["SURVEY_EXTRA_100_500"]);
    assert_eq!(outcome.applications[0].kind, AddonKind::Generic);
    assert_eq!(outcome.applications[0].amount, d("2000.00"));
    assert!(outcome.issues.is_empty());
}

#[tokio::test]
async fn test_generic_piecewise_prefers_supplied_base() {
    let params = JobParameters::new().with(ParamKey::BaseCostThousand, 99.5);
    let outcome = run(generic_piecewise_catalog(), &params, bases("70000", "30000")).await;

    // 1000 + 99.5 × 1000 × 0.01
    assert_eq!(codes(&outcome), vec!["SURVEY_EXTRA_0_100"]);
    assert_eq!(outcome.applications[0].amount, d("1995.00"));

    let params = JobParameters::new().with(ParamKey::BaseCostThousand, -1.0);
    let outcome = run(generic_piecewise_catalog(), &params, bases("70000", "30000")).await;
    assert!(outcome.applications.is_empty());
    let invalid: Vec<_> = outcome
        .issues
        .iter()
        .filter(|i| i.kind == IssueKind::InvalidParameter)
        .collect();
    assert_eq!(invalid.len(), 1);
}

#[tokio::test]
async fn test_addon_catalog_failure_is_reported() {
    let catalog = standard_catalog().fail_on(CatalogQuery::Addons);
    let outcome = run(catalog, &transport_params(), bases("70000", "0")).await;

    assert!(outcome.applications.is_empty());
    assert_eq!(outcome.issues.len(), 1);
    assert_eq!(outcome.issues[0].kind, IssueKind::CatalogUnavailable);
}

#[tokio::test]
async fn test_addon_order_follows_dependencies() {
    let params = transport_params()
        .with(ParamKey::IncludeOrgLiq, true)
        .with(ParamKey::BaseCostThousand, 250.0);
    let outcome = run(standard_catalog(), &params, bases("70000", "0")).await;

    assert_eq!(
        codes(&outcome),
        vec![
            "INTERNAL_5_10_0_75",
            "EXTERNAL_100_300_1_6",
            "ORG_LIQ_6PCT",
            "PROGRAM_100_500"
        ]
    );
}
