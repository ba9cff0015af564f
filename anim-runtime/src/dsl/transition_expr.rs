//! 过渡表达式编译
//!
//! 把 `"a => b"`、`"a <=> b, c => *"`、`":enter"` 等表达式编译成一组匹配函数。
//! 任意一个匹配函数返回 `true` 即视为过渡匹配。

use std::fmt;
use std::rc::Rc;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::driver::ElementId;
use crate::error::AnimationError;
use crate::params::AnimationParams;

use super::state::{ANY_STATE, StateValue};

/// 过渡匹配函数 `(from, to, element, params) -> bool`
pub type TransitionMatcherFn = Rc<dyn Fn(&StateValue, &StateValue, ElementId, &AnimationParams) -> bool>;

const TRUE_BOOLEAN_VALUES: [&str; 2] = ["true", "1"];
const FALSE_BOOLEAN_VALUES: [&str; 2] = ["false", "0"];

/// 过渡表达式：字符串或自定义谓词
#[derive(Clone)]
pub enum TransitionExpr {
    Expr(String),
    Predicate(TransitionMatcherFn),
}

impl TransitionExpr {
    pub fn predicate(
        f: impl Fn(&StateValue, &StateValue, ElementId, &AnimationParams) -> bool + 'static,
    ) -> Self {
        Self::Predicate(matcher(f))
    }
}

/// 把闭包包装为匹配函数
pub fn matcher(
    f: impl Fn(&StateValue, &StateValue, ElementId, &AnimationParams) -> bool + 'static,
) -> TransitionMatcherFn {
    Rc::new(f)
}

impl fmt::Debug for TransitionExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Expr(expr) => f.debug_tuple("Expr").field(expr).finish(),
            Self::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

impl From<&str> for TransitionExpr {
    fn from(value: &str) -> Self {
        Self::Expr(value.to_string())
    }
}

impl From<String> for TransitionExpr {
    fn from(value: String) -> Self {
        Self::Expr(value)
    }
}

impl Serialize for TransitionExpr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Expr(expr) => serializer.serialize_str(expr),
            Self::Predicate(_) => Err(serde::ser::Error::custom("自定义过渡谓词无法序列化")),
        }
    }
}

impl<'de> Deserialize<'de> for TransitionExpr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let expr = String::deserialize(deserializer)?;
        if expr.is_empty() {
            return Err(D::Error::custom("过渡表达式不能为空"));
        }
        Ok(Self::Expr(expr))
    }
}

/// 编译过渡表达式
///
/// 逗号分隔的每一项独立解析；无法解析的项记录错误后跳过。
pub fn parse_transition_expr(
    expr: &TransitionExpr,
    errors: &mut Vec<AnimationError>,
) -> Vec<TransitionMatcherFn> {
    let mut matchers = Vec::new();
    match expr {
        TransitionExpr::Predicate(f) => matchers.push(f.clone()),
        TransitionExpr::Expr(text) => {
            for part in text.split(',') {
                parse_clause(part.trim(), &mut matchers, errors);
            }
        }
    }
    matchers
}

enum Alias {
    Expr(String),
    Matcher(TransitionMatcherFn),
}

fn parse_alias(alias: &str, errors: &mut Vec<AnimationError>) -> Alias {
    match alias {
        ":enter" => Alias::Expr("void => *".to_string()),
        ":leave" => Alias::Expr("* => void".to_string()),
        ":increment" => Alias::Matcher(matcher(|from, to, _, _| to.as_number() > from.as_number())),
        ":decrement" => Alias::Matcher(matcher(|from, to, _, _| to.as_number() < from.as_number())),
        _ => {
            errors.push(AnimationError::UnknownTransitionAlias {
                alias: alias.to_string(),
            });
            Alias::Expr("* => *".to_string())
        }
    }
}

fn parse_clause(clause: &str, matchers: &mut Vec<TransitionMatcherFn>, errors: &mut Vec<AnimationError>) {
    let expanded;
    let clause = if clause.starts_with(':') {
        match parse_alias(clause, errors) {
            Alias::Matcher(f) => {
                matchers.push(f);
                return;
            }
            Alias::Expr(expr) => {
                expanded = expr;
                expanded.as_str()
            }
        }
    } else {
        clause
    };

    let Some((lhs, bidirectional, rhs)) = split_clause(clause) else {
        errors.push(AnimationError::InvalidTransitionExpr {
            expr: clause.to_string(),
        });
        return;
    };

    matchers.push(make_state_matcher(lhs, rhs));
    if bidirectional && !(lhs == ANY_STATE && rhs == ANY_STATE) {
        matchers.push(make_state_matcher(rhs, lhs));
    }
}

/// `^(\*|[-\w]+)\s*(<?[=-]>)\s*(\*|[-\w]+)$`
fn split_clause(clause: &str) -> Option<(&str, bool, &str)> {
    let arrow = [clause.find("=>"), clause.find("->")]
        .into_iter()
        .flatten()
        .min()?;
    let (mut lhs, rhs) = (&clause[..arrow], &clause[arrow + 2..]);
    let bidirectional = match lhs.strip_suffix('<') {
        Some(rest) => {
            lhs = rest;
            true
        }
        None => false,
    };

    let lhs = lhs.trim_end();
    let rhs = rhs.trim_start();
    (is_state_token(lhs) && is_state_token(rhs)).then_some((lhs, bidirectional, rhs))
}

fn is_state_token(token: &str) -> bool {
    token == ANY_STATE
        || (!token.is_empty()
            && token
                .chars()
                .all(|c| c == '-' || c == '_' || c.is_ascii_alphanumeric()))
}

fn make_state_matcher(lhs: &str, rhs: &str) -> TransitionMatcherFn {
    let lhs = lhs.to_string();
    let rhs = rhs.to_string();
    matcher(move |from, to, _, _| side_matches(&lhs, from) && side_matches(&rhs, to))
}

fn side_matches(token: &str, value: &StateValue) -> bool {
    if token == ANY_STATE {
        return true;
    }
    match value {
        StateValue::Text(text) => text == token,
        StateValue::Bool(true) => TRUE_BOOLEAN_VALUES.contains(&token),
        StateValue::Bool(false) => FALSE_BOOLEAN_VALUES.contains(&token),
    }
}
