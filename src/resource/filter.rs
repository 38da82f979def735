//! LDAP 风格过滤器
//!
//! 用于需求匹配和服务监听器过滤，支持：
//!
//! - 逻辑组合 `(&...)`、`(|...)`、`(!...)`
//! - 比较 `=`、`>=`、`<=`、`~=`
//! - 存在判断 `(attr=*)` 与子串匹配 `(attr=a*b*c)`
//!
//! 属性名不区分大小写；版本属性按语义化版本比较。
//!
//! # 示例
//!
//! ```
//! use chips_bundles::resource::{AttrValue, Attributes, Filter};
//!
//! let filter = Filter::parse("(&(osgi.wiring.package=com.acme.api)(version>=1.0))").unwrap();
//! let mut attrs = Attributes::new();
//! attrs.insert("osgi.wiring.package".into(), AttrValue::from("com.acme.api"));
//! attrs.insert("version".into(), AttrValue::Version(semver::Version::new(1, 2, 0)));
//! assert!(filter.matches(&attrs));
//! ```

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use super::attributes::{AttrValue, Attributes};
use crate::utils::{CoreError, Result};

/// 比较操作符
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    /// `=`
    Equal,
    /// `~=`
    Approx,
    /// `>=`
    GreaterEq,
    /// `<=`
    LessEq,
}

/// 过滤器语法树
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterNode {
    /// 与
    And(Vec<FilterNode>),
    /// 或
    Or(Vec<FilterNode>),
    /// 非
    Not(Box<FilterNode>),
    /// 属性比较
    Compare {
        attr: String,
        op: FilterOp,
        value: String,
    },
    /// 属性存在
    Present(String),
    /// 子串匹配，anchored 标记首尾片段是否必须贴边
    Substring {
        attr: String,
        parts: Vec<String>,
        anchored_start: bool,
        anchored_end: bool,
    },
}

/// 已解析的过滤器
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    source: String,
    root: FilterNode,
}

impl Filter {
    /// 解析过滤器表达式
    ///
    /// # 错误
    ///
    /// 语法错误时返回 `CoreError::InvalidFilter`
    pub fn parse(text: &str) -> Result<Self> {
        let mut parser = Parser {
            chars: text.trim().chars().collect(),
            pos: 0,
            source: text,
        };
        let root = parser.parse_filter()?;
        if parser.pos != parser.chars.len() {
            return Err(parser.error("表达式末尾存在多余字符"));
        }
        Ok(Self {
            source: text.trim().to_string(),
            root,
        })
    }

    /// 语法树根节点
    pub fn root(&self) -> &FilterNode {
        &self.root
    }

    /// 对属性映射求值
    pub fn matches(&self, attrs: &Attributes) -> bool {
        eval(&self.root, attrs)
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}

impl FromStr for Filter {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Filter::parse(s)
    }
}

// ==================== 求值 ====================

fn lookup<'a>(attrs: &'a Attributes, name: &str) -> Option<&'a AttrValue> {
    attrs.get(name).or_else(|| {
        attrs
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    })
}

fn eval(node: &FilterNode, attrs: &Attributes) -> bool {
    match node {
        FilterNode::And(children) => children.iter().all(|c| eval(c, attrs)),
        FilterNode::Or(children) => children.iter().any(|c| eval(c, attrs)),
        FilterNode::Not(child) => !eval(child, attrs),
        FilterNode::Present(attr) => lookup(attrs, attr).is_some(),
        FilterNode::Compare { attr, op, value } => {
            lookup(attrs, attr).map_or(false, |v| compare(v, *op, value))
        }
        FilterNode::Substring {
            attr,
            parts,
            anchored_start,
            anchored_end,
        } => lookup(attrs, attr).map_or(false, |v| {
            substring_matches(v, parts, *anchored_start, *anchored_end)
        }),
    }
}

fn compare(value: &AttrValue, op: FilterOp, literal: &str) -> bool {
    if let AttrValue::List(items) = value {
        return items.iter().any(|item| compare(item, op, literal));
    }
    match op {
        FilterOp::Equal => value.compare_literal(literal) == Some(Ordering::Equal),
        FilterOp::Approx => normalize(&value.to_string()) == normalize(literal),
        FilterOp::GreaterEq => matches!(
            value.compare_literal(literal),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        FilterOp::LessEq => matches!(
            value.compare_literal(literal),
            Some(Ordering::Less | Ordering::Equal)
        ),
    }
}

fn normalize(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

fn substring_matches(
    value: &AttrValue,
    parts: &[String],
    anchored_start: bool,
    anchored_end: bool,
) -> bool {
    if let AttrValue::List(items) = value {
        return items
            .iter()
            .any(|item| substring_matches(item, parts, anchored_start, anchored_end));
    }
    let text = value.to_string();
    let mut rest = text.as_str();
    for (index, part) in parts.iter().enumerate() {
        let first = index == 0;
        let last = index == parts.len() - 1;
        if first && anchored_start {
            match rest.strip_prefix(part.as_str()) {
                Some(r) => rest = r,
                None => return false,
            }
            if last && anchored_end {
                return rest.is_empty();
            }
            continue;
        }
        if last && anchored_end {
            return rest.ends_with(part.as_str());
        }
        match rest.find(part.as_str()) {
            Some(at) => rest = &rest[at + part.len()..],
            None => return false,
        }
    }
    true
}

// ==================== 解析 ====================

struct Parser<'a> {
    chars: Vec<char>,
    pos: usize,
    source: &'a str,
}

impl<'a> Parser<'a> {
    fn error(&self, reason: &str) -> CoreError {
        CoreError::InvalidFilter {
            filter: self.source.to_string(),
            reason: format!("{} (位置 {})", reason, self.pos),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while self.peek().map_or(false, char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, c: char) -> Result<()> {
        self.skip_ws();
        if self.peek() == Some(c) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(&format!("期望 '{}'", c)))
        }
    }

    fn parse_filter(&mut self) -> Result<FilterNode> {
        self.expect('(')?;
        self.skip_ws();
        let node = match self.peek() {
            Some('&') => {
                self.pos += 1;
                FilterNode::And(self.parse_list()?)
            }
            Some('|') => {
                self.pos += 1;
                FilterNode::Or(self.parse_list()?)
            }
            Some('!') => {
                self.pos += 1;
                FilterNode::Not(Box::new(self.parse_filter()?))
            }
            Some(_) => self.parse_item()?,
            None => return Err(self.error("表达式意外结束")),
        };
        self.expect(')')?;
        Ok(node)
    }

    fn parse_list(&mut self) -> Result<Vec<FilterNode>> {
        let mut children = Vec::new();
        loop {
            self.skip_ws();
            if self.peek() != Some('(') {
                break;
            }
            children.push(self.parse_filter()?);
        }
        if children.is_empty() {
            return Err(self.error("逻辑组合至少需要一个子表达式"));
        }
        Ok(children)
    }

    fn parse_item(&mut self) -> Result<FilterNode> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if matches!(c, '=' | '<' | '>' | '~' | '(' | ')') {
                break;
            }
            self.pos += 1;
        }
        let attr: String = self.chars[start..self.pos].iter().collect::<String>().trim().to_string();
        if attr.is_empty() {
            return Err(self.error("缺少属性名"));
        }

        let op = match self.peek() {
            Some('=') => {
                self.pos += 1;
                FilterOp::Equal
            }
            Some(c @ ('<' | '>' | '~')) => {
                self.pos += 1;
                if self.peek() != Some('=') {
                    return Err(self.error("期望 '='"));
                }
                self.pos += 1;
                match c {
                    '<' => FilterOp::LessEq,
                    '>' => FilterOp::GreaterEq,
                    _ => FilterOp::Approx,
                }
            }
            _ => return Err(self.error("缺少比较操作符")),
        };

        let (raw, stars) = self.parse_value()?;
        if op != FilterOp::Equal || stars.is_empty() {
            return Ok(FilterNode::Compare {
                attr,
                op,
                value: raw,
            });
        }
        if raw.is_empty() && stars.len() == 1 {
            return Ok(FilterNode::Present(attr));
        }

        // 按未转义的 '*' 切分
        let mut parts = Vec::new();
        let mut last = 0;
        for &star in &stars {
            parts.push(raw[last..star].to_string());
            last = star;
        }
        parts.push(raw[last..].to_string());
        let anchored_start = !parts[0].is_empty();
        let anchored_end = !parts[parts.len() - 1].is_empty();
        let parts = parts.into_iter().filter(|p| !p.is_empty()).collect();
        Ok(FilterNode::Substring {
            attr,
            parts,
            anchored_start,
            anchored_end,
        })
    }

    /// 读取值，返回去转义后的文本以及未转义 '*' 的字节位置
    fn parse_value(&mut self) -> Result<(String, Vec<usize>)> {
        let mut value = String::new();
        let mut stars = Vec::new();
        while let Some(c) = self.peek() {
            match c {
                ')' => break,
                '(' => return Err(self.error("值中存在未转义的 '('")),
                '\\' => {
                    self.pos += 1;
                    match self.peek() {
                        Some(escaped) => {
                            value.push(escaped);
                            self.pos += 1;
                        }
                        None => return Err(self.error("转义字符后缺少内容")),
                    }
                }
                '*' => {
                    stars.push(value.len());
                    self.pos += 1;
                }
                _ => {
                    value.push(c);
                    self.pos += 1;
                }
            }
        }
        Ok((value, stars))
    }
}
