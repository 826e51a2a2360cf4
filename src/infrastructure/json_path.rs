//! JSONPath 子集
//!
//! 支持：`$`、`.name`、`..name`、`['name']`、`[n]`、`[*]`、`.*`、`..*`，
//! 以及过滤表达式 `[?(@.a.b)]`、`[?(@.a <op> 字面量)]`
//! （`==` `!=` `<` `<=` `>` `>=`；字面量为字符串、数字、`true`/`false`/`null`）。
//! 切片、`&&`/`||` 与函数调用不支持，编译时报错。

use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;

use serde_json::Value;

use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Child(String),
    Index(usize),
    Wildcard,
    /// `..name`
    Descendant(String),
    /// `..*`
    DescendantWildcard,
    /// `[?(...)]`：数组逐元素判断，对象判断自身
    Filter(Filter),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// 过滤表达式：`@` 相对路径 + 可选比较
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    /// `@` 之后的字段名链
    pub operand: Vec<String>,
    /// 无比较时表示字段存在性判断
    pub comparison: Option<(CompareOp, Value)>,
}

impl Filter {
    fn parse(expr: &str) -> Result<Self, String> {
        let expr = expr.trim();
        if expr.contains("&&") || expr.contains("||") {
            return Err("logical operators in filters are not supported".into());
        }
        let rest = expr
            .strip_prefix('@')
            .ok_or_else(|| "filter must start with '@'".to_string())?;

        let (operand_src, comparison) = match find_operator(rest) {
            Some((at, op, len)) => {
                let literal = parse_literal(rest[at + len..].trim())?;
                (&rest[..at], Some((op, literal)))
            }
            None => (rest, None),
        };

        let operand = parse_operand(operand_src.trim())?;
        if operand.is_empty() && comparison.is_none() {
            return Err("empty filter".into());
        }
        Ok(Self {
            operand,
            comparison,
        })
    }

    fn matches(&self, node: &Value) -> bool {
        let target = self
            .operand
            .iter()
            .try_fold(node, |current, key| current.as_object()?.get(key));
        let Some(target) = target else {
            return false;
        };
        let Some((op, literal)) = &self.comparison else {
            return true;
        };

        let ordering = match (target, literal) {
            (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
                (Some(a), Some(b)) => a.partial_cmp(&b),
                _ => None,
            },
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (a, b) if a == b => Some(Ordering::Equal),
            _ => None,
        };
        match op {
            CompareOp::Eq => ordering == Some(Ordering::Equal),
            CompareOp::Ne => ordering != Some(Ordering::Equal),
            CompareOp::Lt => ordering == Some(Ordering::Less),
            CompareOp::Le => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
            CompareOp::Gt => ordering == Some(Ordering::Greater),
            CompareOp::Ge => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
        }
    }
}

/// 找到第一个不在引号内的比较运算符：(位置, 运算符, 长度)
fn find_operator(expr: &str) -> Option<(usize, CompareOp, usize)> {
    let bytes = expr.as_bytes();
    let mut quote: Option<u8> = None;
    for (i, &b) in bytes.iter().enumerate() {
        match quote {
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None => {
                let next = bytes.get(i + 1).copied();
                let found = match (b, next) {
                    (b'\'', _) | (b'"', _) => {
                        quote = Some(b);
                        None
                    }
                    (b'=', Some(b'=')) => Some((CompareOp::Eq, 2)),
                    (b'!', Some(b'=')) => Some((CompareOp::Ne, 2)),
                    (b'<', Some(b'=')) => Some((CompareOp::Le, 2)),
                    (b'>', Some(b'=')) => Some((CompareOp::Ge, 2)),
                    (b'<', _) => Some((CompareOp::Lt, 1)),
                    (b'>', _) => Some((CompareOp::Gt, 1)),
                    _ => None,
                };
                if let Some((op, len)) = found {
                    return Some((i, op, len));
                }
            }
        }
    }
    None
}

fn parse_operand(src: &str) -> Result<Vec<String>, String> {
    let chars: Vec<char> = src.chars().collect();
    let mut keys = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '.' => {
                let (name, next) = read_name(&chars, i + 1);
                if name.is_empty() {
                    return Err("empty name in filter".into());
                }
                keys.push(name.trim().to_string());
                i = next;
            }
            '[' => match parse_bracket(&chars, i)? {
                (Segment::Child(name), next) => {
                    keys.push(name);
                    i = next;
                }
                _ => return Err("only names are supported inside filters".into()),
            },
            c => return Err(format!("unexpected character '{c}' in filter")),
        }
    }
    Ok(keys)
}

fn parse_literal(src: &str) -> Result<Value, String> {
    if let Some(quoted) = src
        .strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
        .or_else(|| src.strip_prefix('"').and_then(|s| s.strip_suffix('"')))
    {
        return Ok(Value::String(quoted.to_string()));
    }
    match src {
        "true" => return Ok(Value::Bool(true)),
        "false" => return Ok(Value::Bool(false)),
        "null" => return Ok(Value::Null),
        _ => {}
    }
    serde_json::from_str::<serde_json::Number>(src)
        .map(Value::Number)
        .map_err(|_| format!("unsupported filter literal '{src}'"))
}

/// 具体位置中的一步
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Step {
    Key(String),
    Index(usize),
}

/// 已编译的 JSONPath
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonPath {
    source: String,
    segments: Vec<Segment>,
}

impl JsonPath {
    pub fn compile(path: &str) -> Result<Self, ConfigError> {
        let err = |reason: &str| ConfigError::InvalidJsonPath {
            path: path.to_string(),
            reason: reason.to_string(),
        };

        let chars: Vec<char> = path.trim().chars().collect();
        if chars.first() != Some(&'$') {
            return Err(err("path must start with '$'"));
        }

        let mut segments = Vec::new();
        let mut i = 1;
        while i < chars.len() {
            match chars[i] {
                '.' if chars.get(i + 1) == Some(&'.') => {
                    i += 2;
                    if chars.get(i) == Some(&'*') {
                        segments.push(Segment::DescendantWildcard);
                        i += 1;
                    } else if chars.get(i) == Some(&'[') {
                        let (seg, next) = parse_bracket(&chars, i).map_err(|r| err(&r))?;
                        match seg {
                            Segment::Child(name) => segments.push(Segment::Descendant(name)),
                            Segment::Wildcard => segments.push(Segment::DescendantWildcard),
                            _ => return Err(err("only names may follow '..'")),
                        }
                        i = next;
                    } else {
                        let (name, next) = read_name(&chars, i);
                        if name.is_empty() {
                            return Err(err("empty name after '..'"));
                        }
                        segments.push(Segment::Descendant(name));
                        i = next;
                    }
                }
                '.' => {
                    i += 1;
                    if chars.get(i) == Some(&'*') {
                        segments.push(Segment::Wildcard);
                        i += 1;
                    } else {
                        let (name, next) = read_name(&chars, i);
                        if name.is_empty() {
                            return Err(err("empty name after '.'"));
                        }
                        segments.push(Segment::Child(name));
                        i = next;
                    }
                }
                '[' => {
                    let (seg, next) = parse_bracket(&chars, i).map_err(|r| err(&r))?;
                    segments.push(seg);
                    i = next;
                }
                c => return Err(err(&format!("unexpected character '{c}'"))),
            }
        }

        Ok(Self {
            source: path.trim().to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// 是否包含递归或通配段
    pub fn is_definite(&self) -> bool {
        self.segments
            .iter()
            .all(|s| matches!(s, Segment::Child(_) | Segment::Index(_)))
    }

    /// 末段字段名（仅当末段为 `Child`）
    pub fn leaf_name(&self) -> Option<&str> {
        match self.segments.last() {
            Some(Segment::Child(name)) => Some(name),
            _ => None,
        }
    }

    /// 求出所有匹配位置（去重，文档顺序）
    pub fn locate(&self, root: &Value) -> Vec<Vec<Step>> {
        let mut out = Vec::new();
        let mut prefix = Vec::new();
        collect(root, &self.segments, &mut prefix, &mut out);
        let mut seen = HashSet::with_capacity(out.len());
        out.retain(|p| seen.insert(p.clone()));
        out
    }

    /// 对每个匹配节点调用 `f`，返回匹配数
    pub fn for_each_mut<F>(&self, root: &mut Value, mut f: F) -> usize
    where
        F: FnMut(&mut Value),
    {
        let locations = self.locate(root);
        let mut count = 0;
        for location in &locations {
            if let Some(node) = resolve_mut(root, location) {
                f(node);
                count += 1;
            }
        }
        count
    }
}

impl fmt::Display for JsonPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn read_name(chars: &[char], start: usize) -> (String, usize) {
    let mut end = start;
    while end < chars.len() && chars[end] != '.' && chars[end] != '[' {
        end += 1;
    }
    (chars[start..end].iter().collect(), end)
}

/// 解析 `[?(...)]`，`start` 指向 `[`；括号内引号中的字符不参与配对
fn parse_filter(chars: &[char], start: usize) -> Result<(Segment, usize), String> {
    let open = chars[start..]
        .iter()
        .position(|&c| c == '(')
        .map(|p| start + p)
        .ok_or_else(|| "filter must be wrapped in '(...)'".to_string())?;

    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut close = None;
    for (i, &c) in chars.iter().enumerate().skip(open) {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None => match c {
                '\'' | '"' => quote = Some(c),
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth == 0 {
                        close = Some(i);
                        break;
                    }
                }
                _ => {}
            },
        }
    }
    let close = close.ok_or_else(|| "unclosed filter".to_string())?;
    let tail = chars[close + 1..]
        .iter()
        .position(|&c| !c.is_whitespace())
        .map(|p| close + 1 + p);
    let end = match tail {
        Some(i) if chars[i] == ']' => i,
        _ => return Err("filter must end with ')]'".into()),
    };

    let expr: String = chars[open + 1..close].iter().collect();
    Ok((Segment::Filter(Filter::parse(&expr)?), end + 1))
}

/// 解析 `[...]`，`start` 指向 `[`
fn parse_bracket(chars: &[char], start: usize) -> Result<(Segment, usize), String> {
    let is_filter = chars[start + 1..]
        .iter()
        .find(|c| !c.is_whitespace())
        .is_some_and(|&c| c == '?');
    if is_filter {
        return parse_filter(chars, start);
    }

    let close = chars[start..]
        .iter()
        .position(|&c| c == ']')
        .map(|p| start + p)
        .ok_or_else(|| "unclosed '['".to_string())?;
    let inner: String = chars[start + 1..close].iter().collect();
    let inner = inner.trim();
    let next = close + 1;

    if inner == "*" {
        return Ok((Segment::Wildcard, next));
    }
    if let Some(quoted) = inner
        .strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
        .or_else(|| inner.strip_prefix('"').and_then(|s| s.strip_suffix('"')))
    {
        return Ok((Segment::Child(quoted.to_string()), next));
    }
    inner
        .parse::<usize>()
        .map(|n| (Segment::Index(n), next))
        .map_err(|_| format!("unsupported subscript '[{inner}]'"))
}

fn collect(node: &Value, segments: &[Segment], prefix: &mut Vec<Step>, out: &mut Vec<Vec<Step>>) {
    let Some((segment, rest)) = segments.split_first() else {
        out.push(prefix.clone());
        return;
    };

    match segment {
        Segment::Child(name) => {
            if let Some(child) = node.as_object().and_then(|m| m.get(name)) {
                prefix.push(Step::Key(name.clone()));
                collect(child, rest, prefix, out);
                prefix.pop();
            }
        }
        Segment::Index(index) => {
            if let Some(child) = node.as_array().and_then(|a| a.get(*index)) {
                prefix.push(Step::Index(*index));
                collect(child, rest, prefix, out);
                prefix.pop();
            }
        }
        Segment::Wildcard => for_children(node, prefix, |child, prefix| {
            collect(child, rest, prefix, out)
        }),
        Segment::Descendant(name) => {
            if let Some(child) = node.as_object().and_then(|m| m.get(name)) {
                prefix.push(Step::Key(name.clone()));
                collect(child, rest, prefix, out);
                prefix.pop();
            }
            for_children(node, prefix, |child, prefix| {
                collect(child, segments, prefix, out)
            });
        }
        Segment::DescendantWildcard => {
            for_children(node, prefix, |child, prefix| {
                collect(child, rest, prefix, out);
                collect(child, segments, prefix, out);
            });
        }
        Segment::Filter(filter) => match node {
            Value::Array(items) => {
                for (index, child) in items.iter().enumerate() {
                    if filter.matches(child) {
                        prefix.push(Step::Index(index));
                        collect(child, rest, prefix, out);
                        prefix.pop();
                    }
                }
            }
            Value::Object(_) if filter.matches(node) => collect(node, rest, prefix, out),
            _ => {}
        },
    }
}

fn for_children<F>(node: &Value, prefix: &mut Vec<Step>, mut f: F)
where
    F: FnMut(&Value, &mut Vec<Step>),
{
    match node {
        Value::Object(map) => {
            for (key, child) in map {
                prefix.push(Step::Key(key.clone()));
                f(child, prefix);
                prefix.pop();
            }
        }
        Value::Array(items) => {
            for (index, child) in items.iter().enumerate() {
                prefix.push(Step::Index(index));
                f(child, prefix);
                prefix.pop();
            }
        }
        _ => {}
    }
}

/// 按具体位置取可变节点
pub fn resolve_mut<'a>(root: &'a mut Value, location: &[Step]) -> Option<&'a mut Value> {
    location.iter().try_fold(root, |node, step| match step {
        Step::Key(key) => node.as_object_mut()?.get_mut(key),
        Step::Index(index) => node.as_array_mut()?.get_mut(*index),
    })
}
