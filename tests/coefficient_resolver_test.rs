// ==========================================
// CoefficientResolver 集成测试
// ==========================================
// 测试范围:
// 1. K1 表号绑定与未绑定规则拒绝
// 2. K2 §15 / K3 §8/§14 条款范围
// 3. 互斥组裁决（场景 E）
// 4. 目录故障降级、冲突规则、附加费模式
// 5. 参数三态: 未设置不满足任何显式条件
// ==========================================


use serde_json::json;
use survey_tariff::domain::{
    ApplyTo, ClassResolution, CoeffClass, CoeffRule, IssueKind, JobParameters, ParamKey,
    SourceRef, Stage, WorkItem,
};
use survey_tariff::engine::{
    CoefficientResolver, StageCoefficients, DESERT_FIELD_CODE, DESERT_OFFICE_CODE,
};
use survey_tariff::repository::{CatalogQuery, InMemoryRuleCatalog};
use test_helpers::*;

// ==========================================
// 辅助函数
// ==========================================

fn resolver(catalog: InMemoryRuleCatalog) -> CoefficientResolver {
    CoefficientResolver::new(shared(catalog), test_config())
}

fn class(stage: &StageCoefficients, class: CoeffClass) -> &ClassResolution {
    stage
        .classes
        .iter()
        .find(|c| c.class == class)
        .expect("缺少系数类别")
}

fn codes(resolution: &ClassResolution) -> Vec<&str> {
    resolution.rules.iter().map(|r| r.code.as_str()).collect()
}

// ==========================================
// 场景与类别范围
// ==========================================

#[tokio::test]
async fn test_scenario_e_exclusive_group_keeps_max_value() {
    let params = JobParameters::new()
        .with(ParamKey::ColorPlan, true)
        .with(ParamKey::ComputerTech, true);

    let office = resolver(standard_catalog())
        .resolve_stage(&topo_item(), Stage::Office, &params)
        .await;

    let k2 = class(&office, CoeffClass::K2);
    assert_eq!(codes(k2), vec!["COMPUTER_TECH"]);
    assert_eq!(k2.value, d("1.20"));
}

#[tokio::test]
async fn test_stage_classes_are_ordered_k1_k2_k3() {
    let resolution = resolver(standard_catalog())
        .resolve(&topo_item(), &[Stage::Field, Stage::Office], &scenario_ab_params())
        .await;

    let field = resolution.stage(Stage::Field).expect("外业阶段缺失");
    let office = resolution.stage(Stage::Office).expect("内业阶段缺失");

    let order: Vec<CoeffClass> = field.classes.iter().map(|c| c.class).collect();
    assert_eq!(order, vec![CoeffClass::K1, CoeffClass::K2, CoeffClass::K3]);

    assert_eq!(class(field, CoeffClass::K1).value, d("1.75"));
    assert_eq!(class(field, CoeffClass::K2).value, d("1.30"));
    assert_eq!(class(field, CoeffClass::K3).value, d("1"));
    assert_eq!(field.multiplier, d("2.275"));

    assert_eq!(class(office, CoeffClass::K3).value, d("1.20"));
    assert_eq!(office.multiplier, d("2.73"));
    assert!(resolution.issues.is_empty());
}

#[tokio::test]
async fn test_k1_rejects_rule_without_table_binding() {
    let mut coeffs = all_coeff_rules();
    coeffs.push(unbound_k1_rule());
    let catalog = InMemoryRuleCatalog::new(coeffs, addon_rules());

    let resolution = resolver(catalog)
        .resolve(
            &topo_item(),
            &[Stage::Field],
            &JobParameters::new().with(ParamKey::HasUndergroundComms, true),
        )
        .await;

    let field = resolution.stage(Stage::Field).expect("外业阶段缺失");
    assert_eq!(codes(class(field, CoeffClass::K1)), vec!["T9_UNDERGROUND"]);
    assert_eq!(class(field, CoeffClass::K1).value, d("1.75"));

    let rejected: Vec<_> = resolution
        .issues
        .iter()
        .filter(|i| i.kind == IssueKind::MissingTableReference)
        .collect();
    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected[0].code.as_deref(), Some("K1_UNBOUND"));
}

#[tokio::test]
async fn test_k1_ignores_rules_of_other_tables() {
    let field = resolver(standard_catalog())
        .resolve_stage(
            &topo_item(),
            Stage::Field,
            &JobParameters::new().with(ParamKey::HasUndergroundComms, true),
        )
        .await;

    assert!(!codes(class(&field, CoeffClass::K1)).contains(&"T10_STRIP"));
}

#[tokio::test]
async fn test_k2_excludes_section_14_office_rule() {
    let office = resolver(standard_catalog())
        .resolve_stage(
            &topo_item(),
            Stage::Office,
            &JobParameters::new().with(ParamKey::OfficeInFieldCamp, true),
        )
        .await;

    assert!(codes(class(&office, CoeffClass::K2)).is_empty());
    assert_eq!(class(&office, CoeffClass::K2).value, d("1"));
    assert_eq!(codes(class(&office, CoeffClass::K3)), vec!["OFFICE_IN_CAMP"]);
}

#[tokio::test]
async fn test_apply_to_scopes_rules_per_stage() {
    let params = JobParameters::new().with(ParamKey::NightWork, true);
    let resolution = resolver(standard_catalog())
        .resolve(&topo_item(), &[Stage::Field, Stage::Office], &params)
        .await;

    let field = resolution.stage(Stage::Field).expect("外业阶段缺失");
    let office = resolution.stage(Stage::Office).expect("内业阶段缺失");
    assert_eq!(class(field, CoeffClass::K3).value, d("1.35"));
    assert_eq!(class(office, CoeffClass::K3).value, d("1"));
}

#[tokio::test]
async fn test_altitude_band_boundary_picks_higher_coefficient() {
    // 2000 m 同时落入两个闭区间，同组取较大值
    let field = resolver(standard_catalog())
        .resolve_stage(
            &topo_item(),
            Stage::Field,
            &JobParameters::new().with(ParamKey::Altitude, 2000.0),
        )
        .await;

    let k3 = class(&field, CoeffClass::K3);
    assert_eq!(codes(k3), vec!["MOUNTAIN_2000_3000"]);
    assert_eq!(k3.value, d("1.25"));
}

// ==========================================
// 总价系数
// ==========================================

#[tokio::test]
async fn test_total_scope_rules_are_deferred() {
    let params = JobParameters::new()
        .with(ParamKey::SalaryCoeff, 1.5)
        .with(ParamKey::IntermediateMaterials, true);

    let resolution = resolver(standard_catalog())
        .resolve(&topo_item(), &[Stage::Field, Stage::Office], &params)
        .await;

    let deferred: Vec<&str> = resolution.deferred.iter().map(|c| c.code.as_str()).collect();
    assert_eq!(deferred, vec!["INTERMEDIATE_MATERIALS", "SALARY_1_5"]);
    assert_eq!(resolution.deferred[0].class, CoeffClass::K2);
    assert_eq!(resolution.deferred[1].class, CoeffClass::K3);

    for stage in &resolution.stages {
        assert_eq!(stage.multiplier, d("1"));
    }
}

// ==========================================
// 降级与问题记录
// ==========================================

#[tokio::test]
async fn test_catalog_failure_degrades_class_to_neutral() {
    let catalog = standard_catalog().fail_on(CatalogQuery::K2);

    let resolution = resolver(catalog)
        .resolve(&topo_item(), &[Stage::Field, Stage::Office], &scenario_ab_params())
        .await;

    for stage in &resolution.stages {
        let k2 = class(stage, CoeffClass::K2);
        assert!(k2.degraded);
        assert_eq!(k2.value, d("1"));
        assert_eq!(class(stage, CoeffClass::K1).value, d("1.75"));

        let failure = stage
            .issues
            .iter()
            .find(|i| i.kind == IssueKind::CatalogUnavailable)
            .expect("应记录目录不可用");
        assert_eq!(failure.stage, Some(stage.stage));
        assert!(failure.message.contains("class K2 not available for table 9"));
    }
}

#[tokio::test]
async fn test_k3_failure_skips_desert_injection() {
    let catalog = standard_catalog().fail_on(CatalogQuery::K3);
    let field = resolver(catalog)
        .resolve_stage(
            &topo_item(),
            Stage::Field,
            &JobParameters::new().with(ParamKey::DesertCoeff, 1.25),
        )
        .await;

    let k3 = class(&field, CoeffClass::K3);
    assert!(k3.degraded);
    assert!(k3.rules.is_empty());
}

#[tokio::test]
async fn test_conflicting_rules_are_both_withheld() {
    let params = JobParameters::new()
        .with(ParamKey::DualMedia, true)
        .with(ParamKey::RestrictedMaterials, true);

    let office = resolver(standard_catalog())
        .resolve_stage(&topo_item(), Stage::Office, &params)
        .await;

    assert!(codes(class(&office, CoeffClass::K2)).is_empty());
    let conflict = office
        .issues
        .iter()
        .find(|i| i.kind == IssueKind::ConflictingRule)
        .expect("应记录冲突");
    assert!(conflict.message.contains("DUAL_MEDIA"));
    assert!(conflict.message.contains("RESTRICTED_MATERIALS"));
}

/// INTERMEDIATE_MATERIALS（总价作用）标注为与 other 互不兼容
fn catalog_with_total_conflict(other: &str) -> InMemoryRuleCatalog {
    let coeffs = all_coeff_rules()
        .into_iter()
        .map(|rule| {
            if rule.code == "INTERMEDIATE_MATERIALS" {
                rule.incompatible_with(other)
            } else {
                rule
            }
        })
        .collect();
    InMemoryRuleCatalog::new(coeffs, Vec::new())
}

#[tokio::test]
async fn test_total_scope_rule_conflicting_with_stage_rule_is_withheld() {
    let params = JobParameters::new()
        .with(ParamKey::IntermediateMaterials, true)
        .with(ParamKey::ArtificialLight, true);

    let resolution = resolver(catalog_with_total_conflict("ARTIFICIAL_LIGHT"))
        .resolve(&topo_item(), &[Stage::Field, Stage::Office], &params)
        .await;

    assert!(resolution.deferred.is_empty());
    for stage in &resolution.stages {
        assert!(!codes(class(stage, CoeffClass::K2)).contains(&"ARTIFICIAL_LIGHT"));
        let conflict = stage
            .issues
            .iter()
            .find(|i| i.kind == IssueKind::ConflictingRule)
            .expect("应记录冲突");
        assert_eq!(conflict.stage, Some(stage.stage));
        assert!(conflict.is_error());
    }
}

#[tokio::test]
async fn test_conflicting_total_scope_rules_are_reported_once() {
    let params = JobParameters::new()
        .with(ParamKey::IntermediateMaterials, true)
        .with(ParamKey::SalaryCoeff, 1.5);

    let resolution = resolver(catalog_with_total_conflict("SALARY_1_5"))
        .resolve(&topo_item(), &[Stage::Field, Stage::Office], &params)
        .await;

    assert!(resolution.deferred.is_empty());
    let conflicts: Vec<_> = resolution
        .issues
        .iter()
        .filter(|i| i.kind == IssueKind::ConflictingRule)
        .collect();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].code.as_deref(), Some("INTERMEDIATE_MATERIALS+SALARY_1_5"));
    assert!(resolution
        .stages
        .iter()
        .all(|s| s.issues.iter().all(|i| i.kind != IssueKind::ConflictingRule)));
}

#[tokio::test]
async fn test_malformed_condition_skips_rule() {
    let mut coeffs = all_coeff_rules();
    coeffs.push(
        CoeffRule::new("BROKEN", d("1.5"), ApplyTo::Price)
            .with_condition("table_no", json!(9))
            .with_condition("moon_phase", json!("full")),
    );
    let catalog = InMemoryRuleCatalog::new(coeffs, Vec::new());

    let resolution = resolver(catalog)
        .resolve(&topo_item(), &[Stage::Field, Stage::Office], &JobParameters::new())
        .await;

    let malformed: Vec<_> = resolution
        .issues
        .iter()
        .filter(|i| i.kind == IssueKind::MalformedCondition)
        .collect();
    // 两个阶段共用一次告警
    assert_eq!(malformed.len(), 1);
    assert!(!malformed[0].is_error());
    for stage in &resolution.stages {
        assert_eq!(stage.multiplier, d("1"));
    }
}

#[tokio::test]
async fn test_item_without_table_has_neutral_k1() {
    let mut item = topo_item();
    item.table_no = None;

    let resolution = resolver(standard_catalog())
        .resolve(&item, &[Stage::Field], &scenario_ab_params())
        .await;

    let field = resolution.stage(Stage::Field).expect("外业阶段缺失");
    assert!(class(field, CoeffClass::K1).rules.is_empty());
    assert_eq!(class(field, CoeffClass::K2).value, d("1.30"));
    assert!(resolution
        .issues
        .iter()
        .any(|i| i.kind == IssueKind::MissingTableReference));
}

// ==========================================
// 沙漠地区 / 附加费模式
// ==========================================

#[tokio::test]
async fn test_desert_coefficient_injects_pair() {
    let params = JobParameters::new().with(ParamKey::DesertCoeff, 1.25);
    let resolution = resolver(standard_catalog())
        .resolve(&topo_item(), &[Stage::Field, Stage::Office], &params)
        .await;

    let field = resolution.stage(Stage::Field).expect("外业阶段缺失");
    let office = resolution.stage(Stage::Office).expect("内业阶段缺失");
    assert_eq!(codes(class(field, CoeffClass::K3)), vec![DESERT_FIELD_CODE]);
    assert_eq!(codes(class(office, CoeffClass::K3)), vec![DESERT_OFFICE_CODE]);
    assert_eq!(class(field, CoeffClass::K3).value, d("1.25"));
}

#[tokio::test]
async fn test_invalid_desert_coefficient_is_ignored() {
    let params = JobParameters::new().with(ParamKey::DesertCoeff, -2.0);
    let resolution = resolver(standard_catalog())
        .resolve(&topo_item(), &[Stage::Field], &params)
        .await;

    let field = resolution.stage(Stage::Field).expect("外业阶段缺失");
    assert!(class(field, CoeffClass::K3).rules.is_empty());
    assert!(resolution
        .issues
        .iter()
        .any(|i| i.kind == IssueKind::InvalidParameter));
}

#[tokio::test]
async fn test_addon_mode_withholds_condition_coefficients() {
    let multiplicative = JobParameters::new().with(ParamKey::Altitude, 1800.0);
    let additive = multiplicative
        .clone()
        .with(ParamKey::ApplyConditionsAsAddons, true);
    let resolver = resolver(standard_catalog());

    let field = resolver
        .resolve_stage(&topo_item(), Stage::Field, &multiplicative)
        .await;
    assert_eq!(class(&field, CoeffClass::K3).value, d("1.15"));

    let field = resolver.resolve_stage(&topo_item(), Stage::Field, &additive).await;
    assert_eq!(class(&field, CoeffClass::K3).value, d("1"));
}

// ==========================================
// 参数三态
// ==========================================

#[tokio::test]
async fn test_absent_parameter_never_satisfies_false_condition() {
    let resolver = resolver(standard_catalog());

    let field = resolver
        .resolve_stage(&topo_item(), Stage::Field, &JobParameters::new())
        .await;
    assert!(class(&field, CoeffClass::K1).rules.is_empty());

    let explicit_false = JobParameters::new().with(ParamKey::HasDetailedWellsSketches, false);
    let field = resolver
        .resolve_stage(&topo_item(), Stage::Field, &explicit_false)
        .await;
    assert_eq!(codes(class(&field, CoeffClass::K1)), vec!["T9_NO_SKETCHES"]);
}

#[tokio::test]
async fn test_rule_without_conditions_matches_everywhere() {
    let mut coeffs = all_coeff_rules();
    coeffs.push(
        CoeffRule::new("ALWAYS", d("1.05"), ApplyTo::Field).with_source(SourceRef::section("п.8")),
    );
    let catalog = InMemoryRuleCatalog::new(coeffs, Vec::new());

    let field = resolver(catalog)
        .resolve_stage(&topo_item(), Stage::Field, &JobParameters::new())
        .await;
    assert_eq!(codes(class(&field, CoeffClass::K3)), vec!["ALWAYS"]);
}

#[tokio::test]
async fn test_item_attributes_fill_absent_parameters() {
    let mut coeffs = all_coeff_rules();
    coeffs.push(
        CoeffRule::new("T9_LARGE_SCALE", d("1.10"), ApplyTo::Price)
            .with_condition("table_no", json!(9))
            .with_condition("scale_max", json!("1:1000"))
            .with_source(SourceRef::table("9")),
    );
    let catalog = InMemoryRuleCatalog::new(coeffs, Vec::new());
    let resolver = resolver(catalog);

    // 工作项属性 scale = 1:500
    let field = resolver
        .resolve_stage(&topo_item(), Stage::Field, &JobParameters::new())
        .await;
    assert_eq!(codes(class(&field, CoeffClass::K1)), vec!["T9_LARGE_SCALE"]);

    // 作业参数优先于工作项属性
    let params = JobParameters::new().with(ParamKey::Scale, "1:2000");
    let field = resolver.resolve_stage(&topo_item(), Stage::Field, &params).await;
    assert!(class(&field, CoeffClass::K1).rules.is_empty());

    let item = WorkItem::new("bare").in_table(9);
    let field = resolver.resolve_stage(&item, Stage::Field, &JobParameters::new()).await;
    assert!(class(&field, CoeffClass::K1).rules.is_empty());
}
