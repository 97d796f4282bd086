// ==========================================
// 工程勘察收费系统 - 日志初始化
// ==========================================
// 职责: 安装 tracing 订阅器（宿主进程调用一次）
// 红线: 引擎内部只发事件，不安装订阅器
// ==========================================

use tracing_subscriber::{fmt, EnvFilter};

/// 日志输出格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// 人类可读（终端）
    #[default]
    Pretty,
    /// 每行一个 JSON 对象（日志采集）
    Json,
}

/// RUST_LOG 优先，未设置时使用 default_directive
fn env_filter(default_directive: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive))
}

/// 初始化日志系统
///
/// # 环境变量
/// - RUST_LOG: 日志级别过滤器（默认: info）
///   例如: RUST_LOG=survey_tariff::engine=debug
///
/// # 示例
/// ```no_run
/// use survey_tariff::logging::{self, LogFormat};
/// logging::init(LogFormat::Json);
/// ```
pub fn init(format: LogFormat) {
    let result = match format {
        LogFormat::Pretty => fmt()
            .with_env_filter(env_filter("info"))
            .with_target(true)
            .with_line_number(true)
            .try_init(),
        LogFormat::Json => fmt()
            .json()
            .with_env_filter(env_filter("info"))
            .with_current_span(true)
            .try_init(),
    };
    if let Err(e) = result {
        tracing::debug!(error = %e, "日志订阅器已安装，跳过");
    }
}

/// 测试环境日志（debug 级别，输出到测试捕获，可重复调用）
pub fn init_test() {
    let _ = fmt()
        .with_env_filter(env_filter("survey_tariff=debug"))
        .with_test_writer()
        .try_init();
}
