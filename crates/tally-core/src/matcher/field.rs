use std::cmp::Ordering;

use tally_config::{ConfigValue, FieldConstraintDef, FieldTest};
use wildmatch::WildMatch;

use crate::error::{CoreResult, config_error};
use crate::event::{Event, Value};

#[derive(Debug)]
enum Test {
    Eq(Value),
    Lt(Value),
    Gt(Value),
    Lte(Value),
    Gte(Value),
    OneOf(Vec<Value>),
    NotOneOf(Vec<Value>),
    Wildcard(WildMatch),
}

/// One compiled field predicate of a simple matcher.
#[derive(Debug)]
pub(crate) struct FieldConstraint {
    field: String,
    test: Test,
}

impl FieldConstraint {
    pub(crate) fn compile(matcher_id: &str, def: &FieldConstraintDef) -> CoreResult<Self> {
        let numeric = |v: &ConfigValue| -> CoreResult<Value> {
            let lit = literal(v);
            if lit.as_f64().is_none() {
                return Err(config_error(format!(
                    "matcher {matcher_id:?}: field {:?} compares against non-numeric literal {v}",
                    def.field
                )));
            }
            Ok(lit)
        };
        let test = match &def.test {
            FieldTest::Eq(v) => Test::Eq(literal(v)),
            FieldTest::Lt(v) => Test::Lt(numeric(v)?),
            FieldTest::Gt(v) => Test::Gt(numeric(v)?),
            FieldTest::Lte(v) => Test::Lte(numeric(v)?),
            FieldTest::Gte(v) => Test::Gte(numeric(v)?),
            FieldTest::OneOf(vs) | FieldTest::NotOneOf(vs) if vs.is_empty() => {
                return Err(config_error(format!(
                    "matcher {matcher_id:?}: field {:?} has an empty value set",
                    def.field
                )));
            }
            FieldTest::OneOf(vs) => Test::OneOf(vs.iter().map(literal).collect()),
            FieldTest::NotOneOf(vs) => Test::NotOneOf(vs.iter().map(literal).collect()),
            FieldTest::Wildcard(pattern) => Test::Wildcard(WildMatch::new(pattern)),
        };
        Ok(Self {
            field: def.field.clone(),
            test,
        })
    }

    /// A missing field never matches.
    pub(crate) fn matches(&self, event: &Event) -> bool {
        let Some(actual) = event.field(&self.field) else {
            return false;
        };
        match &self.test {
            Test::Eq(v) => values_equal(actual, v),
            Test::Lt(v) => numeric_cmp(actual, v) == Some(Ordering::Less),
            Test::Gt(v) => numeric_cmp(actual, v) == Some(Ordering::Greater),
            Test::Lte(v) => matches!(
                numeric_cmp(actual, v),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Test::Gte(v) => matches!(
                numeric_cmp(actual, v),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Test::OneOf(vs) => vs.iter().any(|v| values_equal(actual, v)),
            Test::NotOneOf(vs) => !vs.iter().any(|v| values_equal(actual, v)),
            Test::Wildcard(pattern) => actual.as_str().is_some_and(|s| pattern.matches(s)),
        }
    }
}

fn literal(v: &ConfigValue) -> Value {
    match v {
        ConfigValue::Int(i) => Value::Int(*i),
        ConfigValue::Float(f) => Value::Float(*f),
        ConfigValue::Str(s) => Value::Str(s.clone()),
    }
}

/// Integers and enums compare exactly; anything involving a float compares
/// as `f64`. Strings are not ordered against numbers.
fn numeric_cmp(a: &Value, b: &Value) -> Option<Ordering> {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        return Some(x.cmp(&y));
    }
    a.as_f64()?.partial_cmp(&b.as_f64()?)
}

pub(crate) fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::Str(_), _) | (_, Value::Str(_)) => false,
        _ => numeric_cmp(a, b) == Some(Ordering::Equal),
    }
}
