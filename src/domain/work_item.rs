// ==========================================
// 工程勘察收费系统 - 工作项 (WorkItem)
// ==========================================
// 来源: 价格目录，只读
// 外业/内业单价各自可缺省
// ==========================================

use crate::domain::money::deserialize_opt_decimal;
use crate::domain::params::{JobParameters, ParamKey, ParamValue};
use crate::domain::types::Stage;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: String,
    /// 价格表号（K1 绑定依据）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_no: Option<u32>,
    /// 表内行/条款引用
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub unit: String,
    #[serde(default, deserialize_with = "deserialize_opt_decimal")]
    pub price_field: Option<Decimal>,
    #[serde(default, deserialize_with = "deserialize_opt_decimal")]
    pub price_office: Option<Decimal>,
    /// 工作项自身属性（类别、比例尺等）
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
}

impl WorkItem {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            table_no: None,
            section: None,
            title: String::new(),
            unit: String::new(),
            price_field: None,
            price_office: None,
            attributes: BTreeMap::new(),
        }
    }

    pub fn in_table(mut self, table_no: u32) -> Self {
        self.table_no = Some(table_no);
        self
    }

    pub fn with_prices(mut self, field: Option<Decimal>, office: Option<Decimal>) -> Self {
        self.price_field = field;
        self.price_office = office;
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// 指定阶段的单价
    pub fn price_for(&self, stage: Stage) -> Option<Decimal> {
        match stage {
            Stage::Field => self.price_field,
            Stage::Office => self.price_office,
        }
    }

    /// 属性 → 作业参数（仅识别的标量属性）
    pub fn attribute_params(&self) -> JobParameters {
        let mut params = JobParameters::new();
        for (name, raw) in &self.attributes {
            let Some(key) = ParamKey::parse(name) else {
                continue;
            };
            if let Ok(Some(value)) = ParamValue::from_json(raw) {
                params.set(key, value);
            }
        }
        params
    }

    /// 依据链中的表/条款引用
    pub fn reference(&self) -> String {
        match (self.table_no, self.section.as_deref()) {
            (Some(t), Some(s)) => format!("табл. {}, {}", t, s),
            (Some(t), None) => format!("табл. {}", t),
            (None, Some(s)) => s.to_string(),
            (None, None) => self.id.clone(),
        }
    }
}
