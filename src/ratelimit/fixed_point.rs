//! 定点数累加
//!
//! 限流账本的所有算术都在缩放后的整数域内进行。
//! 反复以浮点数累加一个很小的成本（如 $0.0001）会在几千次操作后
//! 出现可见的漂移；先按全局缩放因子转换成整数，之后的累加就是
//! 普通整数加法，与操作次数无关地保持精确。

/// 全局缩放因子
///
/// 以 0.0001 分为最小计量单位（10,000 单位 = 1 分），
/// 保证最小可计费成本换算成单位后是 ≥ 1 的整数，累加无舍入误差。
pub const SCALE: u64 = 10_000;

/// 将十进制数量转换为缩放后的整数单位（四舍五入到最近整数）
pub fn to_units(value: f64) -> u64 {
    if value <= 0.0 {
        return 0;
    }
    (value * SCALE as f64).round() as u64
}

/// 将整数单位转换回十进制数量（仅用于对外展示）
pub fn from_units(units: u64) -> f64 {
    units as f64 / SCALE as f64
}

/// 单位域内的加法
///
/// 就是普通整数加法（饱和以防御溢出），单独成函数是为了
/// 把"账本算术只在单位域内发生"这个约定落在类型边界上。
pub fn add(a: u64, b: u64) -> u64 {
    a.saturating_add(b)
}
