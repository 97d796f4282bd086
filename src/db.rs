// ==========================================
// 工程勘察收费系统 - SQLite 连接初始化
// ==========================================
// 目标:
// - 统一所有 Connection::open 的 PRAGMA 行为
// - 统一 busy_timeout，目录与配置共用同一连接设置
// ==========================================

use rusqlite::Connection;
use std::path::PathBuf;
use std::time::Duration;

/// 默认 busy_timeout（毫秒）
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// 目录数据库路径环境变量
pub const CATALOG_DB_ENV: &str = "SURVEY_TARIFF_DB";

/// 配置 SQLite 连接的统一 PRAGMA
///
/// 说明：
/// - 目录为只读使用，query_only 由调用方按需开启
/// - busy_timeout 需要“每个连接”单独配置
pub fn configure_sqlite_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    Ok(())
}

/// 打开 SQLite 连接并应用统一配置
pub fn open_sqlite_connection(db_path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    configure_sqlite_connection(&conn)?;
    Ok(conn)
}

/// 默认目录数据库路径
///
/// # 规则
/// - 环境变量 SURVEY_TARIFF_DB 优先
/// - 否则 <data_dir>/survey-tariff/catalog.db
/// - 无法确定系统数据目录时返回 None
pub fn default_catalog_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(CATALOG_DB_ENV) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }
    dirs::data_dir().map(|dir| dir.join("survey-tariff").join("catalog.db"))
}
