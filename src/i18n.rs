// ==========================================
// 国际化 (i18n) 模块
// ==========================================
// 使用 rust-i18n 库，支持俄文（审计默认）和英文
// 注意: rust_i18n::i18n! 宏已在 lib.rs 中初始化
// 红线: 引擎只使用显式 locale 版本，不读写全局语言状态
// ==========================================

/// 按指定语言翻译
///
/// # 参数
/// - locale: 语言代码（"ru" 或 "en"；未知语言回退到 en）
/// - key: 消息键，如 "label.field"
pub fn t_in(locale: &str, key: &str) -> String {
    rust_i18n::t!(key, locale = locale).to_string()
}

/// 按指定语言翻译（带参数）
///
/// # 示例
/// ```no_run
/// use survey_tariff::i18n::t_in_with_args;
/// let msg = t_in_with_args("ru", "issue.missing_price", &[("stage", "field")]);
/// ```
pub fn t_in_with_args(locale: &str, key: &str, args: &[(&str, &str)]) -> String {
    let mut text = t_in(locale, key);
    for (k, v) in args {
        text = text.replace(&format!("%{{{}}}", k), v);
    }
    text
}
