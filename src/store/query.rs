//! Filter/order/limit description shared by every store implementation.

use serde_json::Value;
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
  Eq,
  Gt,
  Gte,
  Lt,
  Lte,
  /// Case-insensitive substring for strings, membership for arrays
  Contains,
}

/// A predicate on one top-level field of a document.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
  pub field: String,
  pub op: FilterOp,
  pub value: Value,
}

impl Filter {
  pub fn new(field: impl Into<String>, op: FilterOp, value: impl Into<Value>) -> Self {
    Self {
      field: field.into(),
      op,
      value: value.into(),
    }
  }

  pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
    Self::new(field, FilterOp::Eq, value)
  }

  pub fn matches(&self, doc: &Value) -> bool {
    let Some(actual) = doc.get(&self.field) else {
      return false;
    };

    match self.op {
      FilterOp::Eq => compare(actual, &self.value) == Some(Ordering::Equal),
      FilterOp::Gt => compare(actual, &self.value) == Some(Ordering::Greater),
      FilterOp::Gte => matches!(
        compare(actual, &self.value),
        Some(Ordering::Greater | Ordering::Equal)
      ),
      FilterOp::Lt => compare(actual, &self.value) == Some(Ordering::Less),
      FilterOp::Lte => matches!(
        compare(actual, &self.value),
        Some(Ordering::Less | Ordering::Equal)
      ),
      FilterOp::Contains => match (actual, &self.value) {
        (Value::String(haystack), Value::String(needle)) => haystack
          .to_lowercase()
          .contains(&needle.to_lowercase()),
        (Value::Array(items), needle) => items.contains(needle),
        _ => false,
      },
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
  #[default]
  Asc,
  Desc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
  pub field: String,
  pub direction: Direction,
}

impl OrderBy {
  pub fn asc(field: impl Into<String>) -> Self {
    Self {
      field: field.into(),
      direction: Direction::Asc,
    }
  }

  pub fn desc(field: impl Into<String>) -> Self {
    Self {
      field: field.into(),
      direction: Direction::Desc,
    }
  }
}

/// A bounded scan over one collection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
  pub filters: Vec<Filter>,
  pub order_by: Option<OrderBy>,
  pub limit: Option<usize>,
}

impl Query {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn filter(mut self, filter: Filter) -> Self {
    self.filters.push(filter);
    self
  }

  pub fn order_by(mut self, order_by: OrderBy) -> Self {
    self.order_by = Some(order_by);
    self
  }

  pub fn limit(mut self, limit: usize) -> Self {
    self.limit = Some(limit);
    self
  }

  /// Apply this query to an in-memory list of documents.
  pub fn apply<I>(&self, docs: I) -> Vec<Value>
  where
    I: IntoIterator<Item = Value>,
  {
    let mut matched: Vec<Value> = docs
      .into_iter()
      .filter(|doc| self.filters.iter().all(|f| f.matches(doc)))
      .collect();

    if let Some(order) = &self.order_by {
      // Documents missing the field sort last in either direction
      matched.sort_by(|a, b| {
        match (a.get(&order.field), b.get(&order.field)) {
          (Some(x), Some(y)) => {
            let ord = compare(x, y).unwrap_or(Ordering::Equal);
            match order.direction {
              Direction::Asc => ord,
              Direction::Desc => ord.reverse(),
            }
          }
          (Some(_), None) => Ordering::Less,
          (None, Some(_)) => Ordering::Greater,
          (None, None) => Ordering::Equal,
        }
      });
    }

    if let Some(limit) = self.limit {
      matched.truncate(limit);
    }

    matched
  }
}

/// Compare two JSON scalars of the same kind. Mixed kinds are incomparable.
fn compare(a: &Value, b: &Value) -> Option<Ordering> {
  match (a, b) {
    (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
    (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
    (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
    (Value::Null, Value::Null) => Some(Ordering::Equal),
    _ => None,
  }
}
