// ==========================================
// 工程勘察收费系统 - 领域类型定义
// ==========================================
// 依据: 收费标准 总则 §8/§14/§15, 表注系数, 附加费用表
// 红线: 系数类别、作用范围、附加费类型均为封闭枚举
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// 执行阶段 (Stage)
// ==========================================
// 外业(field) / 内业(office) 两个阶段独立计价
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Field,  // 外业
    Office, // 内业
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Field => "field",
            Stage::Office => "office",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 阶段选择器 (Work Stage Selector)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkStage {
    Field,
    Office,
    #[default]
    Both,
}

impl WorkStage {
    /// 是否包含指定阶段
    pub fn includes(&self, stage: Stage) -> bool {
        match self {
            WorkStage::Both => true,
            WorkStage::Field => stage == Stage::Field,
            WorkStage::Office => stage == Stage::Office,
        }
    }

    /// 从字符串解析（兼容俄文写法）
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "field" | "полевые" => Some(WorkStage::Field),
            "office" | "камеральные" => Some(WorkStage::Office),
            "both" | "обе" => Some(WorkStage::Both),
            _ => None,
        }
    }
}

impl fmt::Display for WorkStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkStage::Field => write!(f, "field"),
            WorkStage::Office => write!(f, "office"),
            WorkStage::Both => write!(f, "both"),
        }
    }
}

// ==========================================
// 系数作用范围 (Apply To)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyTo {
    Field,  // 仅外业
    Office, // 仅内业
    Total,  // 作用于总价（延后到汇总阶段）
    Price,  // 作用于单价（两个阶段均适用）
}

impl ApplyTo {
    /// 是否作用于指定阶段的单阶段乘数
    pub fn covers_stage(&self, stage: Stage) -> bool {
        match self {
            ApplyTo::Price => true,
            ApplyTo::Field => stage == Stage::Field,
            ApplyTo::Office => stage == Stage::Office,
            ApplyTo::Total => false,
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "field" => Some(ApplyTo::Field),
            "office" => Some(ApplyTo::Office),
            "total" => Some(ApplyTo::Total),
            "price" => Some(ApplyTo::Price),
            _ => None,
        }
    }
}

impl fmt::Display for ApplyTo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApplyTo::Field => write!(f, "field"),
            ApplyTo::Office => write!(f, "office"),
            ApplyTo::Total => write!(f, "total"),
            ApplyTo::Price => write!(f, "price"),
        }
    }
}

// ==========================================
// 系数类别 (Coefficient Class)
// ==========================================
// K1: 表注系数（必须绑定表号）
// K2: 总则 §15 成果形式选项
// K3: 总则 §8/§14 生产条件
// 顺序: K1 < K2 < K3（即连乘顺序）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CoeffClass {
    K1,
    K2,
    K3,
}

impl CoeffClass {
    pub const ALL: [CoeffClass; 3] = [CoeffClass::K1, CoeffClass::K2, CoeffClass::K3];

    /// 该类别允许的总则条款号
    ///
    /// K1 不按条款过滤（按表号绑定）
    pub fn allowed_sections(&self) -> &'static [u32] {
        match self {
            CoeffClass::K1 => &[],
            CoeffClass::K2 => &[15],
            CoeffClass::K3 => &[8, 14],
        }
    }
}

impl fmt::Display for CoeffClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoeffClass::K1 => write!(f, "K1"),
            CoeffClass::K2 => write!(f, "K2"),
            CoeffClass::K3 => write!(f, "K3"),
        }
    }
}

// ==========================================
// 附加费计算方式 (Calc Type)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalcType {
    Percent,   // 基数 × 费率
    Fixed,     // 固定金额
    PerUnit,   // 单价 × 工作量
    Piecewise, // 分段公式: 固定额 + 超出部分 × 百分比
}

impl CalcType {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "percent" => Some(CalcType::Percent),
            "fixed" => Some(CalcType::Fixed),
            "per_unit" => Some(CalcType::PerUnit),
            "piecewise" => Some(CalcType::Piecewise),
            _ => None,
        }
    }
}

// ==========================================
// 附加费基数类型 (Base Type)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaseType {
    Field,              // 外业合计
    Office,             // 内业合计
    FieldPlusOffice,    // 外业 + 内业
    FieldPlusInternal,  // 外业 + 内部运输
    Subtotal,           // 外业 + 内业 + 已计附加费
}

impl BaseType {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "field" => Some(BaseType::Field),
            "office" => Some(BaseType::Office),
            "field_plus_office" => Some(BaseType::FieldPlusOffice),
            "field_plus_internal" => Some(BaseType::FieldPlusInternal),
            "subtotal" => Some(BaseType::Subtotal),
            _ => None,
        }
    }
}

// ==========================================
// 附加费类型 (Addon Kind)
// ==========================================
// 声明顺序即计算顺序: 后序附加费的基数依赖前序结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddonKind {
    InternalTransport,      // 内部运输（表4）
    ExternalTransport,      // 外部运输（表5）
    OrgLiquidation,         // 组织/撤离（表6）
    Seasonal,               // 不利季节
    Regional,               // 地区工资系数
    Mountain,               // 山区海拔
    SpecialRegime,          // 特殊管制
    IntermediateMaterials,  // 中间成果提交
    Generic,                // 其他通用附加费
    Program,                // 勘察大纲（表78）
    Report,                 // 技术报告（表79）
    Registration,           // 登记/验收（表80）
}

impl AddonKind {
    /// 按约定代码前缀推断类型（目录未显式给出 kind 时使用）
    pub fn infer_from_code(code: &str) -> Self {
        let code = code.trim().to_uppercase();
        let prefixes: [(&str, AddonKind); 11] = [
            ("INTERNAL_", AddonKind::InternalTransport),
            ("EXTERNAL_", AddonKind::ExternalTransport),
            ("ORG_LIQ", AddonKind::OrgLiquidation),
            ("SEASONAL_", AddonKind::Seasonal),
            ("REGIONAL_", AddonKind::Regional),
            ("MOUNTAIN_", AddonKind::Mountain),
            ("SPECIAL_REGIME", AddonKind::SpecialRegime),
            ("INTERMEDIATE_MATERIALS", AddonKind::IntermediateMaterials),
            ("PROGRAM_", AddonKind::Program),
            ("REPORT_", AddonKind::Report),
            ("REGISTRATION_", AddonKind::Registration),
        ];
        prefixes
            .iter()
            .find(|(prefix, _)| code.starts_with(prefix))
            .map(|(_, kind)| *kind)
            .unwrap_or(AddonKind::Generic)
    }

    /// 是否为与 K3 条件互斥的条件型附加费
    pub fn is_condition_linked(&self) -> bool {
        matches!(
            self,
            AddonKind::Seasonal
                | AddonKind::Regional
                | AddonKind::Mountain
                | AddonKind::SpecialRegime
                | AddonKind::IntermediateMaterials
        )
    }

    /// 是否为分段公式族
    pub fn is_piecewise_family(&self) -> bool {
        matches!(
            self,
            AddonKind::Program | AddonKind::Report | AddonKind::Registration
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AddonKind::InternalTransport => "internal_transport",
            AddonKind::ExternalTransport => "external_transport",
            AddonKind::OrgLiquidation => "org_liquidation",
            AddonKind::Seasonal => "seasonal",
            AddonKind::Regional => "regional",
            AddonKind::Mountain => "mountain",
            AddonKind::SpecialRegime => "special_regime",
            AddonKind::IntermediateMaterials => "intermediate_materials",
            AddonKind::Generic => "generic",
            AddonKind::Program => "program",
            AddonKind::Report => "report",
            AddonKind::Registration => "registration",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "internal_transport" => Some(AddonKind::InternalTransport),
            "external_transport" => Some(AddonKind::ExternalTransport),
            "org_liquidation" => Some(AddonKind::OrgLiquidation),
            "seasonal" => Some(AddonKind::Seasonal),
            "regional" => Some(AddonKind::Regional),
            "mountain" => Some(AddonKind::Mountain),
            "special_regime" => Some(AddonKind::SpecialRegime),
            "intermediate_materials" => Some(AddonKind::IntermediateMaterials),
            "generic" => Some(AddonKind::Generic),
            "program" => Some(AddonKind::Program),
            "report" => Some(AddonKind::Report),
            "registration" => Some(AddonKind::Registration),
            _ => None,
        }
    }
}

impl fmt::Display for AddonKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 计算问题类型 (Issue Kind)
// ==========================================
// 错误类: CatalogUnavailable / ConflictingRule / InvalidQuantity / ArithmeticOverflow
// 警告类: 其余
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueKind {
    CatalogUnavailable,
    ConflictingRule,
    InvalidQuantity,
    MissingRequiredAttribute,
    MalformedCondition,
    AmbiguousBracket,
    InvalidParameter,
    MissingTableReference,
    ArithmeticOverflow,
}

impl IssueKind {
    /// 是否计入 errors（否则计入 warnings）
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            IssueKind::CatalogUnavailable
                | IssueKind::ConflictingRule
                | IssueKind::InvalidQuantity
                | IssueKind::ArithmeticOverflow
        )
    }
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IssueKind::CatalogUnavailable => "CATALOG_UNAVAILABLE",
            IssueKind::ConflictingRule => "CONFLICTING_RULE",
            IssueKind::InvalidQuantity => "INVALID_QUANTITY",
            IssueKind::MissingRequiredAttribute => "MISSING_REQUIRED_ATTRIBUTE",
            IssueKind::MalformedCondition => "MALFORMED_CONDITION",
            IssueKind::AmbiguousBracket => "AMBIGUOUS_BRACKET",
            IssueKind::InvalidParameter => "INVALID_PARAMETER",
            IssueKind::MissingTableReference => "MISSING_TABLE_REFERENCE",
            IssueKind::ArithmeticOverflow => "ARITHMETIC_OVERFLOW",
        };
        write!(f, "{}", s)
    }
}
