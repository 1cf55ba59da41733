//! Call arguments and their binding to plan parameters.

use crate::query::plan::{Binding, ParamRef, QueryPlan};
use crate::query::sql::ParamSource;
use crate::repo::error::{RepoError, RepoResult};
use rusqlite::types::Value;
use std::collections::BTreeMap;

/// One call argument: a scalar, or a collection for `IN` comparisons.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    Single(Value),
    List(Vec<Value>),
}

impl ArgValue {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Single(Value::Text(value.into()))
    }

    pub fn int(value: i64) -> Self {
        Self::Single(Value::Integer(value))
    }

    pub fn null() -> Self {
        Self::Single(Value::Null)
    }

    pub fn texts<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::List(
            values
                .into_iter()
                .map(|value| Value::Text(value.into()))
                .collect(),
        )
    }

    pub fn ints(values: impl IntoIterator<Item = i64>) -> Self {
        Self::List(values.into_iter().map(Value::Integer).collect())
    }
}

impl From<&str> for ArgValue {
    fn from(value: &str) -> Self {
        Self::text(value)
    }
}

impl From<String> for ArgValue {
    fn from(value: String) -> Self {
        Self::text(value)
    }
}

impl From<i64> for ArgValue {
    fn from(value: i64) -> Self {
        Self::int(value)
    }
}

impl From<i32> for ArgValue {
    fn from(value: i32) -> Self {
        Self::int(i64::from(value))
    }
}

/// Arguments of one repository call.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Args {
    #[default]
    None,
    /// For derived methods, in method-name order.
    Positional(Vec<ArgValue>),
    /// For declarative methods, keyed by placeholder name.
    Named(BTreeMap<String, ArgValue>),
}

impl Args {
    pub fn positional(values: impl IntoIterator<Item = ArgValue>) -> Self {
        Self::Positional(values.into_iter().collect())
    }

    pub fn named<K: Into<String>>(pairs: impl IntoIterator<Item = (K, ArgValue)>) -> Self {
        Self::Named(
            pairs
                .into_iter()
                .map(|(name, value)| (name.into(), value))
                .collect(),
        )
    }

    fn len(&self) -> usize {
        match self {
            Self::None => 0,
            Self::Positional(values) => values.len(),
            Self::Named(values) => values.len(),
        }
    }
}

/// Arguments checked against one plan's parameter binding.
#[derive(Debug)]
pub(crate) struct BoundArgs<'a> {
    method: &'a str,
    args: &'a Args,
}

impl<'a> BoundArgs<'a> {
    /// Checks `args` against every parameter `plan` declares.
    pub(crate) fn bind(plan: &QueryPlan, method: &'a str, args: &'a Args) -> RepoResult<Self> {
        Self::check(plan, method, args, true)?;
        Ok(Self { method, args })
    }

    /// Like [`BoundArgs::bind`], but named arguments the plan does not use
    /// are allowed. Count queries may use a subset of the method's
    /// parameters.
    pub(crate) fn bind_subset(
        plan: &QueryPlan,
        method: &'a str,
        args: &'a Args,
    ) -> RepoResult<Self> {
        Self::check(plan, method, args, false)?;
        Ok(Self { method, args })
    }

    fn check(plan: &QueryPlan, method: &str, args: &Args, exact: bool) -> RepoResult<()> {
        match (&plan.binding, args) {
            (Binding::Positional { arity: 0 }, Args::None) => Ok(()),
            (Binding::Positional { arity }, Args::Positional(values)) => {
                if values.len() == *arity {
                    Ok(())
                } else {
                    Err(RepoError::Binding(format!(
                        "`{method}` takes {arity} arguments, got {}",
                        values.len()
                    )))
                }
            }
            (Binding::Named { names }, Args::None) if names.is_empty() => Ok(()),
            (Binding::Named { names }, Args::Named(values)) => {
                if let Some(missing) = names.iter().find(|name| !values.contains_key(*name)) {
                    return Err(RepoError::Binding(format!(
                        "`{method}` has no argument for `:{missing}`"
                    )));
                }
                if exact {
                    if let Some(extra) = values.keys().find(|key| !names.contains(*key)) {
                        return Err(RepoError::Binding(format!(
                            "`{method}` has no parameter named `{extra}`"
                        )));
                    }
                }
                Ok(())
            }
            (Binding::Positional { arity }, other) => Err(RepoError::Binding(format!(
                "`{method}` takes {arity} positional arguments, got {} {}",
                other.len(),
                kind_name(other)
            ))),
            (Binding::Named { names }, other) => Err(RepoError::Binding(format!(
                "`{method}` takes named arguments ({}), got {} {}",
                names.join(", "),
                other.len(),
                kind_name(other)
            ))),
        }
    }

    fn value(&self, param: &ParamRef) -> Result<&'a ArgValue, String> {
        let found = match (param, self.args) {
            (ParamRef::Positional(index), Args::Positional(values)) => values.get(*index),
            (ParamRef::Named(name), Args::Named(values)) => values.get(name),
            _ => None,
        };
        found.ok_or_else(|| format!("`{}` has no argument for {param:?}", self.method))
    }
}

impl ParamSource for BoundArgs<'_> {
    fn scalar(&self, param: &ParamRef) -> Result<Value, String> {
        match self.value(param)? {
            ArgValue::Single(value) => Ok(value.clone()),
            ArgValue::List(_) => Err(format!(
                "`{}` got a list for {param:?}, which is compared to a single value",
                self.method
            )),
        }
    }

    fn list(&self, param: &ParamRef) -> Result<Vec<Value>, String> {
        match self.value(param)? {
            ArgValue::List(values) => Ok(values.clone()),
            ArgValue::Single(value) => Ok(vec![value.clone()]),
        }
    }
}

fn kind_name(args: &Args) -> &'static str {
    match args {
        Args::None => "arguments",
        Args::Positional(_) => "positional arguments",
        Args::Named(_) => "named arguments",
    }
}
