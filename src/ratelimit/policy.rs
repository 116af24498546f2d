//! 限流策略与分段键
//!
//! 策略从请求头里的描述符字符串解析一次，之后不可变。
//! 描述符格式: `{quota};w={窗口秒数}[;u={unit}][;s={segment}]`，
//! 例如 `1000;w=3600;u=cents;s=user`。

use serde::{Deserialize, Serialize};

use crate::error::GatewayError;
use crate::ratelimit::fixed_point;

/// 计量单位
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PolicyUnit {
    /// 请求数
    RequestCount,
    /// 金额（厘分，centi-cents）
    CostCentiUnits,
}

impl PolicyUnit {
    /// 从描述符的 `u=` 值解析
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "request" => Some(Self::RequestCount),
            "cents" => Some(Self::CostCentiUnits),
            _ => None,
        }
    }

    /// 描述符里的字符串表示
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RequestCount => "request",
            Self::CostCentiUnits => "cents",
        }
    }
}

/// 限流策略
///
/// 一条策略描述"某个分段在滑动窗口内最多用掉多少配额"。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    /// 配额（原始单位：请求数或分）
    pub quota: f64,
    /// 窗口长度（秒）
    pub window_seconds: u64,
    /// 计量单位
    pub unit: PolicyUnit,
    /// 分段维度（global / user / 自定义属性名）
    pub scope: String,
}

impl RateLimitPolicy {
    /// 解析策略描述符
    ///
    /// 未指定 `u=` 时默认请求数计量，未指定 `s=` 时默认 global 分段。
    pub fn parse(descriptor: &str) -> Result<Self, GatewayError> {
        let mut parts = descriptor.split(';').map(str::trim);

        let quota_str = parts
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| GatewayError::MalformedPolicy("空描述符".to_string()))?;
        let quota: f64 = quota_str.parse().map_err(|_| {
            GatewayError::MalformedPolicy(format!("无效的配额: {}", quota_str))
        })?;
        if quota <= 0.0 {
            return Err(GatewayError::MalformedPolicy(format!(
                "配额必须为正数: {}",
                quota
            )));
        }

        let mut window_seconds: Option<u64> = None;
        let mut unit = PolicyUnit::RequestCount;
        let mut scope = "global".to_string();

        for part in parts {
            let Some((key, value)) = part.split_once('=') else {
                return Err(GatewayError::MalformedPolicy(format!(
                    "无效的参数: {}",
                    part
                )));
            };
            match key {
                "w" => {
                    let w: u64 = value.parse().map_err(|_| {
                        GatewayError::MalformedPolicy(format!("无效的窗口: {}", value))
                    })?;
                    if w == 0 {
                        return Err(GatewayError::MalformedPolicy(
                            "窗口必须为正数".to_string(),
                        ));
                    }
                    window_seconds = Some(w);
                }
                "u" => {
                    unit = PolicyUnit::parse(value).ok_or_else(|| {
                        GatewayError::MalformedPolicy(format!("无效的单位: {}", value))
                    })?;
                }
                "s" => {
                    if !value.is_empty() {
                        scope = value.to_string();
                    }
                }
                _ => {
                    return Err(GatewayError::MalformedPolicy(format!(
                        "未知参数: {}",
                        key
                    )));
                }
            }
        }

        let window_seconds = window_seconds.ok_or_else(|| {
            GatewayError::MalformedPolicy("缺少窗口参数 w=".to_string())
        })?;

        Ok(Self {
            quota,
            window_seconds,
            unit,
            scope,
        })
    }

    /// 配额换算成定点单位
    pub fn quota_in_units(&self) -> u64 {
        fixed_point::to_units(self.quota)
    }

    /// 策略的规范字符串（用于响应头与日志）
    pub fn descriptor(&self) -> String {
        format!(
            "{};w={};u={};s={}",
            self.quota, self.window_seconds, self.unit.as_str(), self.scope
        )
    }
}

/// 分段键
///
/// 唯一标识一个 (策略, 分段取值) 组合，每个键恰好对应一个账本。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SegmentKey(String);

impl SegmentKey {
    /// 由策略和分段主体（组织/用户/属性值）构造
    ///
    /// 键里混入单位与窗口，同一主体在不同策略下各自独立计量。
    pub fn build(policy: &RateLimitPolicy, subject: &str) -> Self {
        Self(format!(
            "{}:{}:w={}:u={}",
            policy.scope,
            subject,
            policy.window_seconds,
            policy.unit.as_str()
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SegmentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_descriptor() {
        let policy = RateLimitPolicy::parse("1000;w=3600;u=cents;s=user").unwrap();
        assert_eq!(policy.quota, 1000.0);
        assert_eq!(policy.window_seconds, 3600);
        assert_eq!(policy.unit, PolicyUnit::CostCentiUnits);
        assert_eq!(policy.scope, "user");
    }

    #[test]
    fn test_parse_defaults() {
        let policy = RateLimitPolicy::parse("60;w=60").unwrap();
        assert_eq!(policy.unit, PolicyUnit::RequestCount);
        assert_eq!(policy.scope, "global");
    }

    #[test]
    fn test_parse_fractional_quota() {
        // 金额配额可以是小数分
        let policy = RateLimitPolicy::parse("0.5;w=60;u=cents").unwrap();
        assert_eq!(policy.quota_in_units(), 5_000);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(RateLimitPolicy::parse("").is_err());
        assert!(RateLimitPolicy::parse("abc;w=60").is_err());
        assert!(RateLimitPolicy::parse("10").is_err());
        assert!(RateLimitPolicy::parse("10;w=0").is_err());
        assert!(RateLimitPolicy::parse("10;w=60;u=tokens").is_err());
        assert!(RateLimitPolicy::parse("10;w=60;x=1").is_err());
        assert!(RateLimitPolicy::parse("-5;w=60").is_err());
    }

    #[test]
    fn test_segment_key_distinguishes_policies() {
        let a = RateLimitPolicy::parse("10;w=60").unwrap();
        let b = RateLimitPolicy::parse("10;w=3600").unwrap();
        let c = RateLimitPolicy::parse("10;w=60;u=cents").unwrap();

        let ka = SegmentKey::build(&a, "org_1");
        let kb = SegmentKey::build(&b, "org_1");
        let kc = SegmentKey::build(&c, "org_1");
        assert_ne!(ka, kb);
        assert_ne!(ka, kc);

        // 同策略同主体必须得到同一个键
        assert_eq!(ka, SegmentKey::build(&a, "org_1"));
        assert_ne!(ka, SegmentKey::build(&a, "org_2"));
    }

    #[test]
    fn test_descriptor_round_trip() {
        let policy = RateLimitPolicy::parse("100;w=60;u=cents;s=user").unwrap();
        let reparsed = RateLimitPolicy::parse(&policy.descriptor()).unwrap();
        assert_eq!(policy, reparsed);
    }
}
