// ==========================================
// 工程勘察收费系统 - 作业参数 (JobParameters)
// ==========================================
// 红线: 三态语义 {true, false, 未设置}，未设置 ≠ false
// 红线: 参数在系统边界一次性构建，匹配代码不再做形状归一化
// ==========================================

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

// ==========================================
// ParamKey - 参数键（封闭枚举）
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKey {
    // ===== 场地与比例尺 =====
    Territory,
    HasUndergroundComms,
    HasDetailedWellsSketches,
    HasPoleSketches,
    UpdateMode,
    Scale,
    HeightSection,
    Category,
    Section,
    SpecialObject,
    MeasurementDrawings,
    RedLines,
    AnalyticCoords,
    TreeSurvey,
    UseSatellite,
    NoCenter,
    VerticalSurvey,
    Area,
    StripWidth,

    // ===== 生产条件 (§8/§14) =====
    Altitude,
    UnfavorableMonths,
    SalaryCoeff,
    RegionType,
    SpecialRegime,
    NightWork,
    RadioactivityMsvPerYear,
    NoFieldAllowance,
    OfficeInFieldCamp,
    DesertCoeff,

    // ===== 成果形式 (§15) =====
    IntermediateMaterials,
    RestrictedMaterials,
    ArtificialLight,
    ColorPlan,
    ComputerTech,
    DualMedia,

    // ===== 运输/组织 =====
    DistanceToBaseKm,
    ExternalDistanceKm,
    ExpeditionDurationMonths,
    IncludeOrgLiq,

    // ===== 分段公式附加费 =====
    IncludeProgram,
    IncludeReport,
    IncludeRegistration,
    BaseCostThousand,

    // ===== 引擎派生 =====
    FieldCostThousand,

    // ===== 模式开关 =====
    ApplyConditionsAsAddons,
}

impl ParamKey {
    /// 规范名称
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamKey::Territory => "territory",
            ParamKey::HasUndergroundComms => "has_underground_comms",
            ParamKey::HasDetailedWellsSketches => "has_detailed_wells_sketches",
            ParamKey::HasPoleSketches => "has_pole_sketches",
            ParamKey::UpdateMode => "update_mode",
            ParamKey::Scale => "scale",
            ParamKey::HeightSection => "height_section",
            ParamKey::Category => "category",
            ParamKey::Section => "section",
            ParamKey::SpecialObject => "special_object",
            ParamKey::MeasurementDrawings => "measurement_drawings",
            ParamKey::RedLines => "red_lines",
            ParamKey::AnalyticCoords => "analytic_coords",
            ParamKey::TreeSurvey => "tree_survey",
            ParamKey::UseSatellite => "use_satellite",
            ParamKey::NoCenter => "no_center",
            ParamKey::VerticalSurvey => "vertical_survey",
            ParamKey::Area => "area",
            ParamKey::StripWidth => "strip_width",
            ParamKey::Altitude => "altitude",
            ParamKey::UnfavorableMonths => "unfavorable_months",
            ParamKey::SalaryCoeff => "salary_coeff",
            ParamKey::RegionType => "region_type",
            ParamKey::SpecialRegime => "special_regime",
            ParamKey::NightWork => "night_work",
            ParamKey::RadioactivityMsvPerYear => "radioactivity_msv_per_year",
            ParamKey::NoFieldAllowance => "no_field_allowance",
            ParamKey::OfficeInFieldCamp => "office_in_field_camp",
            ParamKey::DesertCoeff => "desert_coeff",
            ParamKey::IntermediateMaterials => "intermediate_materials",
            ParamKey::RestrictedMaterials => "restricted_materials",
            ParamKey::ArtificialLight => "artificial_light",
            ParamKey::ColorPlan => "color_plan",
            ParamKey::ComputerTech => "computer_tech",
            ParamKey::DualMedia => "dual_media",
            ParamKey::DistanceToBaseKm => "distance_to_base_km",
            ParamKey::ExternalDistanceKm => "external_distance_km",
            ParamKey::ExpeditionDurationMonths => "expedition_duration_months",
            ParamKey::IncludeOrgLiq => "include_org_liq",
            ParamKey::IncludeProgram => "include_program",
            ParamKey::IncludeReport => "include_report",
            ParamKey::IncludeRegistration => "include_registration",
            ParamKey::BaseCostThousand => "base_cost_thousand",
            ParamKey::FieldCostThousand => "field_cost_thousand",
            ParamKey::ApplyConditionsAsAddons => "apply_conditions_as_addons",
        }
    }

    /// 按名称解析（含历史别名）
    pub fn parse(name: &str) -> Option<Self> {
        let key = match name.trim().to_lowercase().as_str() {
            "territory" | "territory_type" => ParamKey::Territory,
            "has_underground_comms" => ParamKey::HasUndergroundComms,
            "has_detailed_wells_sketches" => ParamKey::HasDetailedWellsSketches,
            "has_pole_sketches" => ParamKey::HasPoleSketches,
            "update_mode" => ParamKey::UpdateMode,
            "scale" => ParamKey::Scale,
            "height_section" => ParamKey::HeightSection,
            "category" => ParamKey::Category,
            "section" => ParamKey::Section,
            "special_object" => ParamKey::SpecialObject,
            "measurement_drawings" => ParamKey::MeasurementDrawings,
            "red_lines" => ParamKey::RedLines,
            "analytic_coords" => ParamKey::AnalyticCoords,
            "tree_survey" => ParamKey::TreeSurvey,
            "use_satellite" => ParamKey::UseSatellite,
            "no_center" => ParamKey::NoCenter,
            "vertical_survey" => ParamKey::VerticalSurvey,
            "area" | "area_ha" => ParamKey::Area,
            "strip_width" => ParamKey::StripWidth,
            "altitude" => ParamKey::Altitude,
            "unfavorable_months" => ParamKey::UnfavorableMonths,
            "salary_coeff" => ParamKey::SalaryCoeff,
            "region_type" => ParamKey::RegionType,
            "special_regime" => ParamKey::SpecialRegime,
            "night_work" => ParamKey::NightWork,
            "radioactivity_msv_per_year" => ParamKey::RadioactivityMsvPerYear,
            "no_field_allowance" => ParamKey::NoFieldAllowance,
            "office_in_field_camp" => ParamKey::OfficeInFieldCamp,
            "desert_coeff" => ParamKey::DesertCoeff,
            "intermediate_materials" => ParamKey::IntermediateMaterials,
            "restricted_materials" | "classified_materials" => ParamKey::RestrictedMaterials,
            "artificial_light" | "artificial_lighting" => ParamKey::ArtificialLight,
            "color_plan" => ParamKey::ColorPlan,
            "computer_tech" | "use_computer" => ParamKey::ComputerTech,
            "dual_media" | "dual_format" => ParamKey::DualMedia,
            "distance_to_base_km" | "distance_from_base_km" => ParamKey::DistanceToBaseKm,
            "external_distance_km" | "distance_oneway_km" => ParamKey::ExternalDistanceKm,
            "expedition_duration_months" | "duration_months" => {
                ParamKey::ExpeditionDurationMonths
            }
            "include_org_liq" => ParamKey::IncludeOrgLiq,
            "include_program" => ParamKey::IncludeProgram,
            "include_report" => ParamKey::IncludeReport,
            "include_registration" => ParamKey::IncludeRegistration,
            "base_cost_thousand" => ParamKey::BaseCostThousand,
            "field_cost_thousand" => ParamKey::FieldCostThousand,
            "apply_conditions_as_addons" => ParamKey::ApplyConditionsAsAddons,
            _ => return None,
        };
        Some(key)
    }

    /// 同一条件存在附加费处理方式（与乘数处理互斥）
    pub fn has_addon_treatment(&self) -> bool {
        matches!(
            self,
            ParamKey::Altitude
                | ParamKey::UnfavorableMonths
                | ParamKey::SalaryCoeff
                | ParamKey::SpecialRegime
                | ParamKey::IntermediateMaterials
        )
    }

    /// 按比例尺分母比较
    pub fn is_scale(&self) -> bool {
        matches!(self, ParamKey::Scale)
    }
}

impl fmt::Display for ParamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// ParamValue - 参数值
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl ParamValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParamValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// 数值视图（文本形式的数字同样接受，如 "0,5"）
    pub fn as_number(&self) -> Option<f64> {
        match self {
            ParamValue::Number(n) => Some(*n),
            ParamValue::Text(s) => s.trim().replace(',', ".").parse::<f64>().ok(),
            ParamValue::Bool(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ParamValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// 比例尺分母: "1:500" → 500, 数值 500 → 500
    pub fn scale_denominator(&self) -> Option<f64> {
        match self {
            ParamValue::Number(n) => Some(*n),
            ParamValue::Text(s) => {
                let s = s.trim();
                let tail = match s.split_once(':') {
                    Some((_, denominator)) => denominator,
                    None => s,
                };
                tail.trim().replace(' ', "").parse::<f64>().ok()
            }
            ParamValue::Bool(_) => None,
        }
    }

    /// 从 JSON 标量构建（null → None）
    pub fn from_json(value: &Value) -> Result<Option<Self>, ParamError> {
        match value {
            Value::Null => Ok(None),
            Value::Bool(b) => Ok(Some(ParamValue::Bool(*b))),
            Value::Number(n) => n
                .as_f64()
                .map(|f| Some(ParamValue::Number(f)))
                .ok_or_else(|| ParamError::UnsupportedValue(n.to_string())),
            Value::String(s) => Ok(Some(ParamValue::Text(s.clone()))),
            Value::Array(_) | Value::Object(_) => Err(ParamError::UnsupportedValue(value.to_string())),
        }
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        ParamValue::Bool(value)
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        ParamValue::Number(value)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        ParamValue::Number(value as f64)
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Text(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::Text(value)
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(b) => write!(f, "{}", b),
            ParamValue::Number(n) => write!(f, "{}", n),
            ParamValue::Text(s) => write!(f, "{}", s),
        }
    }
}

/// 参数构建错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParamError {
    #[error("作业参数必须是 JSON 对象")]
    NotAnObject,

    #[error("参数 {key} 为嵌套结构，需在系统边界展平")]
    NestedValue { key: String },

    #[error("不支持的参数值: {0}")]
    UnsupportedValue(String),
}

// ==========================================
// JobParameters - 作业参数集合
// ==========================================
// 不在集合中 = 未设置（三态中的第三态）
// 反序列化统一经过 from_json（别名、null、未知键）
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct JobParameters {
    values: BTreeMap<ParamKey, ParamValue>,
}

impl JobParameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// 链式设置
    pub fn with(mut self, key: ParamKey, value: impl Into<ParamValue>) -> Self {
        self.values.insert(key, value.into());
        self
    }

    pub fn set(&mut self, key: ParamKey, value: impl Into<ParamValue>) {
        self.values.insert(key, value.into());
    }

    pub fn remove(&mut self, key: ParamKey) -> Option<ParamValue> {
        self.values.remove(&key)
    }

    pub fn get(&self, key: ParamKey) -> Option<&ParamValue> {
        self.values.get(&key)
    }

    pub fn contains(&self, key: ParamKey) -> bool {
        self.values.contains_key(&key)
    }

    /// 三态布尔: Some(true) / Some(false) / None(未设置或非布尔)
    pub fn flag(&self, key: ParamKey) -> Option<bool> {
        self.get(key).and_then(ParamValue::as_bool)
    }

    /// 仅当显式为 true 时成立
    pub fn is_true(&self, key: ParamKey) -> bool {
        self.flag(key) == Some(true)
    }

    pub fn number(&self, key: ParamKey) -> Option<f64> {
        self.get(key).and_then(ParamValue::as_number)
    }

    pub fn text(&self, key: ParamKey) -> Option<&str> {
        self.get(key).and_then(ParamValue::as_text)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ParamKey, &ParamValue)> {
        self.values.iter()
    }

    /// 用另一组参数补齐未设置的键（已设置的键保持不变）
    pub fn fill_absent_from(&mut self, other: &JobParameters) {
        for (key, value) in other.iter() {
            self.values.entry(*key).or_insert_with(|| value.clone());
        }
    }

    /// 从扁平 JSON 对象构建
    ///
    /// # 规则
    /// - null → 未设置
    /// - 未知键忽略（由上游归一化协作方负责）
    /// - 已知键取嵌套值 → NestedValue 错误
    pub fn from_json(value: &Value) -> Result<Self, ParamError> {
        let object = value.as_object().ok_or(ParamError::NotAnObject)?;
        let mut params = JobParameters::new();

        for (name, raw) in object {
            let Some(key) = ParamKey::parse(name) else {
                tracing::debug!(param = %name, "忽略未知作业参数");
                continue;
            };
            if raw.is_object() || raw.is_array() {
                return Err(ParamError::NestedValue { key: name.clone() });
            }
            if let Some(v) = ParamValue::from_json(raw)? {
                params.values.insert(key, v);
            }
        }

        Ok(params)
    }
}

impl TryFrom<Value> for JobParameters {
    type Error = ParamError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Null => Ok(JobParameters::new()),
            other => JobParameters::from_json(&other),
        }
    }
}

impl<'de> Deserialize<'de> for JobParameters {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Value::deserialize(deserializer)?;
        JobParameters::try_from(raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deserialize_goes_through_boundary_rules() {
        let params: JobParameters = serde_json::from_value(json!({
            "territory_type": "промпредприятие",
            "color_plan": null,
            "unknown_option": 42
        }))
        .unwrap();
        assert_eq!(params.len(), 1);
        assert_eq!(params.text(ParamKey::Territory), Some("промпредприятие"));
        assert!(!params.contains(ParamKey::ColorPlan));

        let empty: JobParameters = serde_json::from_value(Value::Null).unwrap();
        assert!(empty.is_empty());

        let nested: Result<JobParameters, _> =
            serde_json::from_value(json!({"scale": {"value": "1:500"}}));
        assert!(nested.is_err());
    }

    #[test]
    fn test_tri_state_flag() {
        let params = JobParameters::new()
            .with(ParamKey::ColorPlan, true)
            .with(ParamKey::DualMedia, false);

        assert_eq!(params.flag(ParamKey::ColorPlan), Some(true));
        assert_eq!(params.flag(ParamKey::DualMedia), Some(false));
        assert_eq!(params.flag(ParamKey::ComputerTech), None);
        assert!(!params.is_true(ParamKey::ComputerTech));
    }

    #[test]
    fn test_from_json_null_is_absent_and_aliases_resolve() {
        let params = JobParameters::from_json(&json!({
            "territory_type": "промпредприятие",
            "has_underground_comms": true,
            "color_plan": null,
            "distance_from_base_km": 8,
            "work_type": "топографическая съемка"
        }))
        .unwrap();

        assert_eq!(params.text(ParamKey::Territory), Some("промпредприятие"));
        assert_eq!(params.number(ParamKey::DistanceToBaseKm), Some(8.0));
        assert!(!params.contains(ParamKey::ColorPlan));
        assert_eq!(params.len(), 3);
    }

    #[test]
    fn test_from_json_rejects_nested_known_key() {
        let err = JobParameters::from_json(&json!({"scale": {"value": "1:500"}})).unwrap_err();
        assert_eq!(
            err,
            ParamError::NestedValue {
                key: "scale".to_string()
            }
        );
        assert_eq!(
            JobParameters::from_json(&json!([1, 2])).unwrap_err(),
            ParamError::NotAnObject
        );
    }

    #[test]
    fn test_scale_denominator() {
        assert_eq!(ParamValue::from("1:500").scale_denominator(), Some(500.0));
        assert_eq!(ParamValue::from("1 : 2 000").scale_denominator(), Some(2000.0));
        assert_eq!(ParamValue::from(1000.0).scale_denominator(), Some(1000.0));
        assert_eq!(ParamValue::from(true).scale_denominator(), None);
    }

    #[test]
    fn test_fill_absent_keeps_job_values() {
        let mut params = JobParameters::new().with(ParamKey::Scale, "1:1000");
        let item_attrs = JobParameters::new()
            .with(ParamKey::Scale, "1:500")
            .with(ParamKey::Category, "II");

        params.fill_absent_from(&item_attrs);
        assert_eq!(params.text(ParamKey::Scale), Some("1:1000"));
        assert_eq!(params.text(ParamKey::Category), Some("II"));
    }
}
