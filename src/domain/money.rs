// ==========================================
// 工程勘察收费系统 - 金额与十进制工具
// ==========================================
// 红线: 金额全程使用 Decimal，禁止 f64 参与乘法
// 红线: 仅在三个边界舍入（阶段合计 / 单项附加费 / 总价），半数进位，2 位小数
// ==========================================

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Deserializer};
use std::str::FromStr;

/// 金额小数位
pub const MONEY_SCALE: u32 = 2;

/// 金额舍入（half-up, 2 位）
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// f64 → Decimal（经最短十进制表示，避免二进制误差进入金额）
///
/// # 返回
/// - NaN / 无穷 → None
pub fn decimal_from_f64(value: f64) -> Option<Decimal> {
    if !value.is_finite() {
        return None;
    }
    let text = format!("{}", value);
    Decimal::from_str_exact(&text)
        .or_else(|_| Decimal::from_str(&text))
        .ok()
        .map(|d| d.normalize())
}

/// 解析十进制文本（兼容逗号小数点）
pub fn parse_decimal(text: &str) -> Option<Decimal> {
    let cleaned = text.trim().replace(' ', "").replace(',', ".");
    Decimal::from_str_exact(&cleaned).ok()
}

/// serde: 接受 JSON 数字或字符串形式的十进制数
pub fn deserialize_decimal<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = serde_json::Value::deserialize(deserializer)?;
    decimal_from_json(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("无法解析为十进制数: {}", raw)))
}

/// serde: 可选十进制数（null / 缺省 → None）
pub fn deserialize_opt_decimal<'de, D>(deserializer: D) -> Result<Option<Decimal>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    match raw {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => decimal_from_json(&v)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("无法解析为十进制数: {}", v))),
    }
}

/// JSON 标量 → Decimal
pub fn decimal_from_json(value: &serde_json::Value) -> Option<Decimal> {
    match value {
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(Decimal::from(i))
            } else {
                n.as_f64().and_then(decimal_from_f64)
            }
        }
        serde_json::Value::String(s) => parse_decimal(s),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> Decimal {
        Decimal::from_str_exact(s).unwrap()
    }

    #[test]
    fn test_round_money_half_up() {
        assert_eq!(round_money(d("0.005")), d("0.01"));
        assert_eq!(round_money(d("2.675")), d("2.68"));
        assert_eq!(round_money(d("-0.005")), d("-0.01"));
        assert_eq!(round_money(d("969477.6")), d("969477.60"));
    }

    #[test]
    fn test_decimal_from_f64_is_shortest_repr() {
        assert_eq!(decimal_from_f64(1.1), Some(d("1.1")));
        assert_eq!(decimal_from_f64(0.0875), Some(d("0.0875")));
        assert_eq!(decimal_from_f64(f64::NAN), None);
    }

    #[test]
    fn test_decimal_from_json() {
        assert_eq!(decimal_from_json(&serde_json::json!(4632)), Some(d("4632")));
        assert_eq!(decimal_from_json(&serde_json::json!("1,75")), Some(d("1.75")));
        assert_eq!(decimal_from_json(&serde_json::json!(true)), None);
    }

    #[test]
    fn test_no_intermediate_rounding() {
        // 4632 × 92 × 1.75 × 1.30 仅在末尾舍入
        let total = d("4632") * d("92") * d("1.75") * d("1.30");
        assert_eq!(round_money(total), d("969477.60"));
    }
}
