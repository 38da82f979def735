//! 能力与需求的属性值

use semver::Version;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// 属性映射
pub type Attributes = BTreeMap<String, AttrValue>;

/// 指令映射
pub type Directives = BTreeMap<String, String>;

/// 属性值
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    /// 整数
    Long(i64),
    /// 语义化版本
    Version(Version),
    /// 字符串
    String(String),
    /// 列表
    List(Vec<AttrValue>),
}

impl AttrValue {
    /// 以字符串形式取值
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// 与过滤器中的字面量比较
    ///
    /// 版本与整数按语义比较，字面量无法解析时视为不可比较。
    pub fn compare_literal(&self, literal: &str) -> Option<Ordering> {
        match self {
            AttrValue::Long(v) => literal.trim().parse::<i64>().ok().map(|l| v.cmp(&l)),
            AttrValue::Version(v) => parse_version(literal).map(|l| v.cmp(&l)),
            AttrValue::String(s) => Some(s.as_str().cmp(literal)),
            AttrValue::List(_) => None,
        }
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Long(v) => write!(f, "{}", v),
            AttrValue::Version(v) => write!(f, "{}", v),
            AttrValue::String(s) => write!(f, "{}", s),
            AttrValue::List(items) => {
                let parts: Vec<String> = items.iter().map(|i| i.to_string()).collect();
                write!(f, "[{}]", parts.join(","))
            }
        }
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        AttrValue::String(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        AttrValue::String(value)
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        AttrValue::Long(value)
    }
}

impl From<Version> for AttrValue {
    fn from(value: Version) -> Self {
        AttrValue::Version(value)
    }
}

impl From<Vec<String>> for AttrValue {
    fn from(value: Vec<String>) -> Self {
        AttrValue::List(value.into_iter().map(AttrValue::String).collect())
    }
}

/// 宽松解析版本号
///
/// 接受 "1"、"1.2" 这样的缺省写法，缺失部分补零。
pub fn parse_version(text: &str) -> Option<Version> {
    let text = text.trim();
    if let Ok(v) = Version::parse(text) {
        return Some(v);
    }
    let mut parts = text.splitn(3, '.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next().map_or(Some(0), |p| p.parse().ok())?;
    let patch = parts.next().map_or(Some(0), |p| p.parse().ok())?;
    Some(Version::new(major, minor, patch))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_version_lenient() {
        assert_eq!(parse_version("1"), Some(Version::new(1, 0, 0)));
        assert_eq!(parse_version("1.2"), Some(Version::new(1, 2, 0)));
        assert_eq!(parse_version("1.2.3"), Some(Version::new(1, 2, 3)));
        assert_eq!(parse_version("x.y"), None);
    }

    #[test]
    fn test_compare_literal() {
        let v = AttrValue::Version(Version::new(1, 5, 0));
        assert_eq!(v.compare_literal("1.2"), Some(Ordering::Greater));
        assert_eq!(AttrValue::Long(3).compare_literal("3"), Some(Ordering::Equal));
        assert_eq!(AttrValue::from("b").compare_literal("a"), Some(Ordering::Greater));
    }
}
