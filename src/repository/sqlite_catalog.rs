// ==========================================
// 工程勘察收费系统 - SQLite 规则目录
// ==========================================
// 表: norm_coeffs / norm_addons
// conditions / source_ref / incompatible_with 以 JSON 文本存储
// 红线: Repository 不含业务逻辑，只负责数据访问
// 红线: WHERE 子句不解析 JSON 列，坏行只在行映射时跳过
// ==========================================

use crate::db::{default_catalog_path, open_sqlite_connection};
use crate::domain::money::{decimal_from_f64, parse_decimal};
use crate::domain::rule::{AddonRule, CoeffRule, RuleConditions, SourceRef};
use crate::domain::types::{AddonKind, ApplyTo, BaseType, CalcType, CoeffClass, Stage};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::rule_catalog::RuleCatalog;
use async_trait::async_trait;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, Connection, Row};
use rust_decimal::Decimal;
use std::sync::{Arc, Mutex};
use tracing::warn;

/// 建表语句
pub const CATALOG_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS norm_coeffs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    code TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL DEFAULT '',
    category TEXT,
    value NUMERIC NOT NULL,
    apply_to TEXT NOT NULL,
    exclusive_group TEXT,
    conditions TEXT NOT NULL DEFAULT '{}',
    source_ref TEXT NOT NULL DEFAULT '{}',
    incompatible_with TEXT NOT NULL DEFAULT '[]'
);
CREATE TABLE IF NOT EXISTS norm_addons (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    code TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL DEFAULT '',
    kind TEXT,
    calc_type TEXT NOT NULL,
    value NUMERIC NOT NULL,
    base_type TEXT,
    conditions TEXT NOT NULL DEFAULT '{}',
    source_ref TEXT NOT NULL DEFAULT '{}'
);
"#;

const COEFF_COLUMNS: &str =
    "code, name, category, value, apply_to, exclusive_group, conditions, source_ref, incompatible_with";

// ==========================================
// SqliteRuleCatalog
// ==========================================
pub struct SqliteRuleCatalog {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRuleCatalog {
    /// 打开目录数据库
    pub fn new(db_path: &str) -> RepositoryResult<Self> {
        let conn = open_sqlite_connection(db_path)
            .map_err(|e| RepositoryError::DatabaseConnectionError(e.to_string()))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 打开默认位置的目录数据库（SURVEY_TARIFF_DB 或系统数据目录）
    pub fn open_default() -> RepositoryResult<Self> {
        let path = default_catalog_path().ok_or_else(|| {
            RepositoryError::DatabaseConnectionError("无法确定系统数据目录".to_string())
        })?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| RepositoryError::DatabaseConnectionError(e.to_string()))?;
        }
        let path = path.to_str().ok_or_else(|| {
            RepositoryError::DatabaseConnectionError(format!("路径不是 UTF-8: {}", path.display()))
        })?;
        Self::new(path)
    }

    /// 从已有连接创建（与 ConfigManager 共享同一数据库）
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 建表（幂等）
    pub fn init_schema(&self) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute_batch(CATALOG_SCHEMA)?;
        Ok(())
    }

    /// 写入系数规则
    pub fn insert_coeff(&self, rule: &CoeffRule) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO norm_coeffs (
                code, name, category, value, apply_to, exclusive_group,
                conditions, source_ref, incompatible_with
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                rule.code,
                rule.name,
                rule.class.map(|c| c.to_string()),
                rule.value.to_string(),
                rule.apply_to.to_string(),
                rule.exclusive_group,
                serde_json::to_string(&rule.conditions)?,
                serde_json::to_string(&rule.source)?,
                serde_json::to_string(&rule.incompatible_with)?,
            ],
        )?;
        Ok(())
    }

    /// 写入附加费规则
    pub fn insert_addon(&self, rule: &AddonRule) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO norm_addons (
                code, name, kind, calc_type, value, base_type, conditions, source_ref
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                rule.code,
                rule.name,
                rule.kind.map(|k| k.as_str().to_string()),
                calc_type_str(rule.calc_type),
                rule.value.to_string(),
                rule.base_type.map(base_type_str),
                serde_json::to_string(&rule.conditions)?,
                serde_json::to_string(&rule.source)?,
            ],
        )?;
        Ok(())
    }

    /// 查询系数规则（坏行跳过并告警）
    fn select_coeffs(&self, where_clause: &str, args: &[&dyn rusqlite::ToSql]) -> RepositoryResult<Vec<CoeffRule>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM norm_coeffs WHERE {} ORDER BY id",
            COEFF_COLUMNS, where_clause
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(args, |row| Ok(map_coeff_row(row)))?;

        let mut rules = Vec::new();
        for row in rows {
            match row? {
                Ok(rule) => rules.push(rule),
                Err(e) => warn!(error = %e, "跳过格式错误的系数规则"),
            }
        }
        Ok(rules)
    }

    /// 条款类候选（K2/K3）: SQL 只按类别列预筛，来源条款在行映射后判断
    fn select_class(&self, class: CoeffClass) -> RepositoryResult<Vec<CoeffRule>> {
        let class_label = class.to_string();
        let rules = self.select_coeffs("category IS NULL OR category = ?1", &[&class_label])?;
        Ok(rules
            .into_iter()
            .filter(|r| r.is_candidate_for(class))
            .collect())
    }
}

#[async_trait]
impl RuleCatalog for SqliteRuleCatalog {
    async fn query_k1(&self, table_no: u32, stage: Stage) -> RepositoryResult<Vec<CoeffRule>> {
        let rules = self.select_coeffs(
            "apply_to IN (?1, 'price') AND (category IS NULL OR category = 'K1')",
            &[&stage.as_str()],
        )?;
        Ok(rules
            .into_iter()
            .filter(|r| r.is_candidate_for(CoeffClass::K1))
            .filter(|r| r.table_binding().map_or(true, |t| t == table_no))
            .collect())
    }

    async fn query_k2(&self) -> RepositoryResult<Vec<CoeffRule>> {
        self.select_class(CoeffClass::K2)
    }

    async fn query_k3(&self) -> RepositoryResult<Vec<CoeffRule>> {
        self.select_class(CoeffClass::K3)
    }

    async fn query_addons(&self) -> RepositoryResult<Vec<AddonRule>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT code, name, kind, calc_type, value, base_type, conditions, source_ref
            FROM norm_addons
            ORDER BY id
            "#,
        )?;
        let rows = stmt.query_map([], |row| Ok(map_addon_row(row)))?;

        let mut rules = Vec::new();
        for row in rows {
            match row? {
                Ok(rule) => rules.push(rule),
                Err(e) => warn!(error = %e, "跳过格式错误的附加费规则"),
            }
        }
        Ok(rules)
    }

    async fn query_addon_coefficients(&self, addon_code: &str) -> RepositoryResult<Vec<CoeffRule>> {
        // instr 只做文本预筛，精确匹配在行映射之后
        let rules = self.select_coeffs("instr(conditions, ?1) > 0", &[&addon_code])?;
        Ok(rules
            .into_iter()
            .filter(|r| r.applies_to_addon() == Some(addon_code))
            .collect())
    }
}

// ==========================================
// 行映射
// ==========================================

fn malformed(table: &str, code: &str, message: impl Into<String>) -> RepositoryError {
    RepositoryError::MalformedRow {
        table: table.to_string(),
        code: code.to_string(),
        message: message.into(),
    }
}

/// NUMERIC 列 → Decimal（REAL 经最短十进制表示转换）
fn decimal_column(value: SqlValue) -> Option<Decimal> {
    match value {
        SqlValue::Integer(i) => Some(Decimal::from(i)),
        SqlValue::Real(f) => decimal_from_f64(f),
        SqlValue::Text(s) => parse_decimal(&s),
        _ => None,
    }
}

fn json_column<T: serde::de::DeserializeOwned + Default>(
    raw: Option<String>,
    table: &str,
    code: &str,
    column: &str,
) -> RepositoryResult<T> {
    match raw {
        None => Ok(T::default()),
        Some(s) if s.trim().is_empty() => Ok(T::default()),
        Some(s) => serde_json::from_str(&s)
            .map_err(|e| malformed(table, code, format!("{}: {}", column, e))),
    }
}

fn map_coeff_row(row: &Row<'_>) -> RepositoryResult<CoeffRule> {
    let code: String = row.get(0)?;
    let category: Option<String> = row.get(2)?;
    let class = match category.as_deref().map(str::trim) {
        None | Some("") => None,
        Some("K1") => Some(CoeffClass::K1),
        Some("K2") => Some(CoeffClass::K2),
        Some("K3") => Some(CoeffClass::K3),
        Some(other) => return Err(malformed("norm_coeffs", &code, format!("未知类别 {}", other))),
    };
    let value = decimal_column(row.get(3)?)
        .ok_or_else(|| malformed("norm_coeffs", &code, "value 不是数值"))?;
    let apply_to_raw: String = row.get(4)?;
    let apply_to = ApplyTo::from_str(&apply_to_raw)
        .ok_or_else(|| malformed("norm_coeffs", &code, format!("未知作用范围 {}", apply_to_raw)))?;

    let conditions: RuleConditions = json_column(row.get(6)?, "norm_coeffs", &code, "conditions")?;
    let source: SourceRef = json_column(row.get(7)?, "norm_coeffs", &code, "source_ref")?;
    let incompatible_with: Vec<String> =
        json_column(row.get(8)?, "norm_coeffs", &code, "incompatible_with")?;

    Ok(CoeffRule {
        name: row.get(1)?,
        value,
        apply_to,
        class,
        exclusive_group: row.get::<_, Option<String>>(5)?.filter(|g| !g.trim().is_empty()),
        conditions,
        source,
        incompatible_with,
        code,
    })
}

fn map_addon_row(row: &Row<'_>) -> RepositoryResult<AddonRule> {
    let code: String = row.get(0)?;
    let kind = match row.get::<_, Option<String>>(2)? {
        None => None,
        Some(s) if s.trim().is_empty() => None,
        Some(s) => Some(
            AddonKind::from_str(&s)
                .ok_or_else(|| malformed("norm_addons", &code, format!("未知附加费类型 {}", s)))?,
        ),
    };
    let calc_raw: String = row.get(3)?;
    let calc_type = CalcType::from_str(&calc_raw)
        .ok_or_else(|| malformed("norm_addons", &code, format!("未知计算方式 {}", calc_raw)))?;
    let value = decimal_column(row.get(4)?)
        .ok_or_else(|| malformed("norm_addons", &code, "value 不是数值"))?;
    let base_type = match row.get::<_, Option<String>>(5)? {
        None => None,
        Some(s) if s.trim().is_empty() => None,
        Some(s) => Some(
            BaseType::from_str(&s)
                .ok_or_else(|| malformed("norm_addons", &code, format!("未知基数类型 {}", s)))?,
        ),
    };

    Ok(AddonRule {
        name: row.get(1)?,
        kind,
        calc_type,
        value,
        base_type,
        conditions: json_column(row.get(6)?, "norm_addons", &code, "conditions")?,
        source: json_column(row.get(7)?, "norm_addons", &code, "source_ref")?,
        code,
    })
}

fn calc_type_str(calc_type: CalcType) -> &'static str {
    match calc_type {
        CalcType::Percent => "percent",
        CalcType::Fixed => "fixed",
        CalcType::PerUnit => "per_unit",
        CalcType::Piecewise => "piecewise",
    }
}

fn base_type_str(base_type: BaseType) -> String {
    match base_type {
        BaseType::Field => "field",
        BaseType::Office => "office",
        BaseType::FieldPlusOffice => "field_plus_office",
        BaseType::FieldPlusInternal => "field_plus_internal",
        BaseType::Subtotal => "subtotal",
    }
    .to_string()
}
