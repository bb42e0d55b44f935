//! Typed query plans
//!
//! The core takes a fully-typed plan tree as input; there is no query
//! language or parser here. A plan is either a [`VectorPlan`] (ANN search,
//! optionally filtered) or a [`RetrievePlan`] (rows or a count matching a
//! predicate), and predicates are [`Expr`] trees over segment scalar fields.

use crate::FieldId;

/// Scalar types a segment field can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    Float,
    Double,
    Str,
}

impl DataType {
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            DataType::Int8 | DataType::Int16 | DataType::Int32 | DataType::Int64
        )
    }

    pub fn is_float(&self) -> bool {
        matches!(self, DataType::Float | DataType::Double)
    }

    pub fn is_numeric(&self) -> bool {
        self.is_integer() || self.is_float()
    }
}

/// A typed constant in a predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Bool(bool),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float(f32),
    Double(f64),
    Str(String),
}

impl Literal {
    pub fn data_type(&self) -> DataType {
        match self {
            Literal::Bool(_) => DataType::Bool,
            Literal::Int8(_) => DataType::Int8,
            Literal::Int16(_) => DataType::Int16,
            Literal::Int32(_) => DataType::Int32,
            Literal::Int64(_) => DataType::Int64,
            Literal::Float(_) => DataType::Float,
            Literal::Double(_) => DataType::Double,
            Literal::Str(_) => DataType::Str,
        }
    }

    fn as_i64(&self) -> Option<i64> {
        match *self {
            Literal::Int8(v) => Some(v as i64),
            Literal::Int16(v) => Some(v as i64),
            Literal::Int32(v) => Some(v as i64),
            Literal::Int64(v) => Some(v),
            _ => None,
        }
    }

    /// Coerce to a column's native type. Integer literals widen freely and
    /// narrow only when the value fits; integers convert to either float
    /// width; `f64 -> f32` narrows (plan literals commonly arrive as
    /// doubles). Bool and string require an exact match.
    pub fn cast_to(&self, ty: DataType) -> Option<Literal> {
        if self.data_type() == ty {
            return Some(self.clone());
        }
        match ty {
            DataType::Int8 => {
                let v = self.as_i64()?;
                i8::try_from(v).ok().map(Literal::Int8)
            }
            DataType::Int16 => {
                let v = self.as_i64()?;
                i16::try_from(v).ok().map(Literal::Int16)
            }
            DataType::Int32 => {
                let v = self.as_i64()?;
                i32::try_from(v).ok().map(Literal::Int32)
            }
            DataType::Int64 => self.as_i64().map(Literal::Int64),
            DataType::Float => match *self {
                Literal::Double(v) => Some(Literal::Float(v as f32)),
                _ => self.as_i64().map(|v| Literal::Float(v as f32)),
            },
            DataType::Double => match *self {
                Literal::Float(v) => Some(Literal::Double(v as f64)),
                _ => self.as_i64().map(|v| Literal::Double(v as f64)),
            },
            DataType::Bool | DataType::Str => None,
        }
    }
}

/// Comparison operator for column predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Lt,
    Le,
    Eq,
    Ne,
    Ge,
    Gt,
}

impl CompareOp {
    #[inline]
    pub fn eval<T: PartialOrd>(&self, lhs: T, rhs: T) -> bool {
        match self {
            CompareOp::Lt => lhs < rhs,
            CompareOp::Le => lhs <= rhs,
            CompareOp::Eq => lhs == rhs,
            CompareOp::Ne => lhs != rhs,
            CompareOp::Ge => lhs >= rhs,
            CompareOp::Gt => lhs > rhs,
        }
    }
}

/// Predicate node over segment scalar fields.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// `field <op> literal`
    ColumnCompare {
        field: FieldId,
        op: CompareOp,
        value: Literal,
    },
    /// `field IN (values…)`
    Term { field: FieldId, values: Vec<Literal> },
    /// Two-sided range with per-bound inclusivity; either bound may be open.
    Range {
        field: FieldId,
        lo: Option<Literal>,
        hi: Option<Literal>,
        inclusive_lo: bool,
        inclusive_hi: bool,
    },
    /// One-sided range kept in operator form (`field > 3`).
    UnaryRange {
        field: FieldId,
        op: CompareOp,
        value: Literal,
    },
    Not(Box<Expr>),
    /// N-ary AND / OR over boolean children.
    Conjunct { is_and: bool, children: Vec<Expr> },
    AlwaysTrue,
    AlwaysFalse,
}

impl Expr {
    pub fn compare(field: FieldId, op: CompareOp, value: Literal) -> Self {
        Expr::ColumnCompare { field, op, value }
    }

    pub fn term(field: FieldId, values: Vec<Literal>) -> Self {
        Expr::Term { field, values }
    }

    pub fn and(children: Vec<Expr>) -> Self {
        Expr::Conjunct {
            is_and: true,
            children,
        }
    }

    pub fn or(children: Vec<Expr>) -> Self {
        Expr::Conjunct {
            is_and: false,
            children,
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(child: Expr) -> Self {
        Expr::Not(Box::new(child))
    }
}

/// Distance metric for ANN search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    L2,
    Ip,
    Cosine,
    Hamming,
    Jaccard,
}

impl Metric {
    /// Larger scores are better for similarity metrics, smaller for
    /// distance metrics.
    pub fn is_similarity(&self) -> bool {
        matches!(self, Metric::Ip | Metric::Cosine)
    }

    /// Sentinel filled into empty result slots.
    pub fn worst_distance(&self) -> f32 {
        if self.is_similarity() {
            f32::NEG_INFINITY
        } else {
            f32::INFINITY
        }
    }

    /// True iff `a` is a strictly better score than `b` under this metric.
    #[inline]
    pub fn better(&self, a: f32, b: f32) -> bool {
        if self.is_similarity() {
            a > b
        } else {
            a < b
        }
    }
}

/// Per-query search parameters for the ANN path.
#[derive(Debug, Clone)]
pub struct SearchInfo {
    pub top_k: usize,
    pub metric: Metric,
    /// Round distances to this many decimals; negative disables rounding.
    pub round_decimal: i32,
    /// Opaque index-specific parameters (nprobe, ef, …).
    pub params: serde_json::Value,
}

impl SearchInfo {
    pub fn new(top_k: usize, metric: Metric) -> Self {
        Self {
            top_k,
            metric,
            round_decimal: -1,
            params: serde_json::Value::Null,
        }
    }

    pub fn with_round_decimal(mut self, round_decimal: i32) -> Self {
        self.round_decimal = round_decimal;
        self
    }

    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.params = params;
        self
    }
}

/// The batch of query vectors for one ANN search (`nq × dim`, row-major).
#[derive(Debug, Clone)]
pub struct PlaceholderGroup {
    nq: usize,
    dim: usize,
    data: Vec<f32>,
}

impl PlaceholderGroup {
    pub fn new(nq: usize, dim: usize, data: Vec<f32>) -> Self {
        assert_eq!(data.len(), nq * dim, "placeholder group shape mismatch");
        Self { nq, dim, data }
    }

    #[inline]
    pub fn num_queries(&self) -> usize {
        self.nq
    }

    #[inline]
    pub fn dim(&self) -> usize {
        self.dim
    }

    #[inline]
    pub fn query(&self, i: usize) -> &[f32] {
        &self.data[i * self.dim..(i + 1) * self.dim]
    }

    pub fn raw(&self) -> &[f32] {
        &self.data
    }
}

/// ANN search plan: top-K under a metric, optionally filtered.
#[derive(Debug, Clone)]
pub struct VectorPlan {
    pub vector_field: FieldId,
    pub search_info: SearchInfo,
    pub filter: Option<Expr>,
}

/// Retrieve plan: matching row offsets, or just their count.
#[derive(Debug, Clone)]
pub struct RetrievePlan {
    pub filter: Option<Expr>,
    /// Maximum offsets to return; negative means unbounded.
    pub limit: i64,
    pub is_count: bool,
}

/// One scalar field of a segment schema.
#[derive(Debug, Clone)]
pub struct FieldSchema {
    pub id: FieldId,
    pub name: String,
    pub data_type: DataType,
}

/// Scalar schema of a segment, used by the expression typing pre-pass.
#[derive(Debug, Clone, Default)]
pub struct SegmentSchema {
    fields: Vec<FieldSchema>,
}

impl SegmentSchema {
    pub fn new(fields: Vec<FieldSchema>) -> Self {
        Self { fields }
    }

    pub fn add_field(&mut self, id: FieldId, name: &str, data_type: DataType) -> FieldId {
        self.fields.push(FieldSchema {
            id,
            name: name.to_string(),
            data_type,
        });
        id
    }

    pub fn field(&self, id: FieldId) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.id == id)
    }

    pub fn fields(&self) -> &[FieldSchema] {
        &self.fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_cast_widening() {
        assert_eq!(
            Literal::Int8(5).cast_to(DataType::Int64),
            Some(Literal::Int64(5))
        );
        assert_eq!(
            Literal::Int64(300).cast_to(DataType::Int16),
            Some(Literal::Int16(300))
        );
        // out of range narrows are rejected
        assert_eq!(Literal::Int64(300).cast_to(DataType::Int8), None);
        assert_eq!(
            Literal::Int32(2).cast_to(DataType::Double),
            Some(Literal::Double(2.0))
        );
        assert_eq!(
            Literal::Double(1.5).cast_to(DataType::Float),
            Some(Literal::Float(1.5))
        );
        assert_eq!(Literal::Str("x".into()).cast_to(DataType::Int32), None);
        assert_eq!(Literal::Bool(true).cast_to(DataType::Int8), None);
    }

    #[test]
    fn test_compare_op_eval() {
        assert!(CompareOp::Lt.eval(1, 2));
        assert!(CompareOp::Ge.eval(2.0, 2.0));
        assert!(CompareOp::Ne.eval("a", "b"));
        assert!(!CompareOp::Gt.eval(1, 1));
    }

    #[test]
    fn test_metric_ordering() {
        assert!(Metric::L2.better(0.1, 0.5));
        assert!(Metric::Ip.better(0.5, 0.1));
        assert_eq!(Metric::L2.worst_distance(), f32::INFINITY);
        assert_eq!(Metric::Cosine.worst_distance(), f32::NEG_INFINITY);
    }

    #[test]
    fn test_placeholder_group_slicing() {
        let group = PlaceholderGroup::new(2, 3, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(group.num_queries(), 2);
        assert_eq!(group.query(1), &[4.0, 5.0, 6.0]);
    }

    #[test]
    #[should_panic(expected = "shape mismatch")]
    fn test_placeholder_group_shape_checked() {
        PlaceholderGroup::new(2, 3, vec![0.0; 5]);
    }
}
