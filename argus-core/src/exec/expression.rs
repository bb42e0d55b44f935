//! Predicate compilation and chunked evaluation
//!
//! Plans are compiled once per task: field types resolve against the
//! segment schema, literals coerce to column-native types, and term sets
//! pick their probe strategy. Evaluation then walks the segment one chunk
//! at a time, producing a byte-per-row boolean column per chunk.
//!
//! Missing values (false validity entries) evaluate to false under every
//! predicate; callers needing three-valued logic must wrap the plan in
//! explicit null checks.

use std::hash::Hash;

use rustc_hash::FxHashSet;

use crate::FieldId;
use crate::error::{Error, Result};
use crate::plan::{CompareOp, DataType, Expr, Literal, SegmentSchema};
use crate::segment::SegmentInternal;
use crate::structures::{ColumnChunk, ColumnVector, ScalarArray, simd};

/// Term sets at or below this size probe via the dispatched `find_term`
/// kernel; larger sets build a hash set once at compile time.
pub const TERM_KERNEL_LIMIT: usize = 16;

/// Integer/bool needle set with a size-dependent probe strategy.
pub(crate) enum NeedleSet<T> {
    Small(Vec<T>),
    Hash(FxHashSet<T>),
}

impl<T: simd::TermScalar + Eq + Hash> NeedleSet<T> {
    fn new(values: Vec<T>) -> Self {
        if values.len() <= TERM_KERNEL_LIMIT {
            NeedleSet::Small(values)
        } else {
            NeedleSet::Hash(values.into_iter().collect())
        }
    }

    #[inline]
    fn contains(&self, value: T) -> bool {
        match self {
            NeedleSet::Small(needles) => simd::find_term(needles, value),
            NeedleSet::Hash(set) => set.contains(&value),
        }
    }
}

/// Float needle set; the hash fallback keys on the raw bit pattern.
pub(crate) enum FloatNeedleSet<T> {
    Small(Vec<T>),
    Hash(FxHashSet<u64>),
}

trait FloatBits: Copy {
    fn bits(self) -> u64;
}

impl FloatBits for f32 {
    fn bits(self) -> u64 {
        self.to_bits() as u64
    }
}

impl FloatBits for f64 {
    fn bits(self) -> u64 {
        self.to_bits()
    }
}

impl<T: simd::TermScalar + FloatBits> FloatNeedleSet<T> {
    fn new(values: Vec<T>) -> Self {
        if values.len() <= TERM_KERNEL_LIMIT {
            FloatNeedleSet::Small(values)
        } else {
            FloatNeedleSet::Hash(values.into_iter().map(FloatBits::bits).collect())
        }
    }

    #[inline]
    fn contains(&self, value: T) -> bool {
        match self {
            FloatNeedleSet::Small(needles) => simd::find_term(needles, value),
            FloatNeedleSet::Hash(set) => set.contains(&value.bits()),
        }
    }
}

/// Compiled term set, one variant per column type.
pub(crate) enum TermSet {
    Bool(Vec<bool>),
    I8(NeedleSet<i8>),
    I16(NeedleSet<i16>),
    I32(NeedleSet<i32>),
    I64(NeedleSet<i64>),
    F32(FloatNeedleSet<f32>),
    F64(FloatNeedleSet<f64>),
    Str(FxHashSet<String>),
}

/// A predicate after the typing pre-pass: fields resolved, literals
/// coerced to column-native types.
pub(crate) enum CompiledExpr {
    Const(bool),
    Compare {
        field: FieldId,
        op: CompareOp,
        value: Literal,
    },
    Range {
        field: FieldId,
        lo: Option<Literal>,
        hi: Option<Literal>,
        inclusive_lo: bool,
        inclusive_hi: bool,
    },
    Term {
        field: FieldId,
        set: TermSet,
    },
    Not(Box<CompiledExpr>),
    Conjunct {
        is_and: bool,
        children: Vec<CompiledExpr>,
    },
}

fn field_type(schema: &SegmentSchema, field: FieldId) -> Result<DataType> {
    schema
        .field(field)
        .map(|f| f.data_type)
        .ok_or_else(|| Error::InvalidExpression(format!("unknown field {}", field)))
}

fn coerce(value: &Literal, ty: DataType, context: &str) -> Result<Literal> {
    value.cast_to(ty).ok_or_else(|| {
        Error::InvalidExpression(format!(
            "{}: literal {:?} is not comparable to a {:?} column",
            context,
            value.data_type(),
            ty
        ))
    })
}

/// Whether a literal's type class can ever compare against a column type.
fn type_class_compatible(value: &Literal, ty: DataType) -> bool {
    match value.data_type() {
        t if t == ty => true,
        t if t.is_numeric() => ty.is_numeric(),
        _ => false,
    }
}

fn compile_term_set(values: &[Literal], ty: DataType) -> Result<TermSet> {
    // out-of-range numeric terms can never match and are dropped; terms of
    // an incompatible type class are a plan error
    for value in values {
        if !type_class_compatible(value, ty) {
            return Err(Error::InvalidExpression(format!(
                "term of type {:?} against a {:?} column",
                value.data_type(),
                ty
            )));
        }
    }
    macro_rules! collect_casted {
        ($values:expr, $target:expr, $variant:ident, $ty:ty) => {
            $values
                .iter()
                .filter_map(|v| match v.cast_to($target) {
                    Some(Literal::$variant(x)) => Some(x),
                    _ => None,
                })
                .collect::<Vec<$ty>>()
        };
    }
    Ok(match ty {
        DataType::Bool => TermSet::Bool(collect_casted!(values, ty, Bool, bool)),
        DataType::Int8 => TermSet::I8(NeedleSet::new(collect_casted!(values, ty, Int8, i8))),
        DataType::Int16 => TermSet::I16(NeedleSet::new(collect_casted!(values, ty, Int16, i16))),
        DataType::Int32 => TermSet::I32(NeedleSet::new(collect_casted!(values, ty, Int32, i32))),
        DataType::Int64 => TermSet::I64(NeedleSet::new(collect_casted!(values, ty, Int64, i64))),
        DataType::Float => {
            TermSet::F32(FloatNeedleSet::new(collect_casted!(values, ty, Float, f32)))
        }
        DataType::Double => {
            TermSet::F64(FloatNeedleSet::new(collect_casted!(values, ty, Double, f64)))
        }
        DataType::Str => {
            TermSet::Str(collect_casted!(values, ty, Str, String).into_iter().collect())
        }
    })
}

/// Typing pre-pass + literal coercion. Every failure here aborts the whole
/// plan before any chunk is touched.
pub(crate) fn compile(expr: &Expr, schema: &SegmentSchema) -> Result<CompiledExpr> {
    match expr {
        Expr::AlwaysTrue => Ok(CompiledExpr::Const(true)),
        Expr::AlwaysFalse => Ok(CompiledExpr::Const(false)),
        Expr::ColumnCompare { field, op, value } | Expr::UnaryRange { field, op, value } => {
            let ty = field_type(schema, *field)?;
            if ty == DataType::Bool && !matches!(op, CompareOp::Eq | CompareOp::Ne) {
                return Err(Error::InvalidExpression(
                    "bool columns only support = and !=".into(),
                ));
            }
            Ok(CompiledExpr::Compare {
                field: *field,
                op: *op,
                value: coerce(value, ty, "compare")?,
            })
        }
        Expr::Range {
            field,
            lo,
            hi,
            inclusive_lo,
            inclusive_hi,
        } => {
            if lo.is_none() && hi.is_none() {
                return Err(Error::InvalidExpression(
                    "range expects at least one bound".into(),
                ));
            }
            let ty = field_type(schema, *field)?;
            if ty == DataType::Bool {
                return Err(Error::InvalidExpression(
                    "bool columns do not support ranges".into(),
                ));
            }
            let lo = lo.as_ref().map(|v| coerce(v, ty, "range")).transpose()?;
            let hi = hi.as_ref().map(|v| coerce(v, ty, "range")).transpose()?;
            Ok(CompiledExpr::Range {
                field: *field,
                lo,
                hi,
                inclusive_lo: *inclusive_lo,
                inclusive_hi: *inclusive_hi,
            })
        }
        Expr::Term { field, values } => {
            let ty = field_type(schema, *field)?;
            Ok(CompiledExpr::Term {
                field: *field,
                set: compile_term_set(values, ty)?,
            })
        }
        Expr::Not(child) => Ok(CompiledExpr::Not(Box::new(compile(child, schema)?))),
        Expr::Conjunct { is_and, children } => {
            // conjunct expressions expect at least one argument, and every
            // child must be boolean, which all predicate nodes are
            if children.is_empty() {
                return Err(Error::InvalidExpression(
                    "conjunct expressions expect at least one argument".into(),
                ));
            }
            let children = children
                .iter()
                .map(|child| compile(child, schema))
                .collect::<Result<Vec<_>>>()?;
            Ok(CompiledExpr::Conjunct {
                is_and: *is_and,
                children,
            })
        }
    }
}

// ── Evaluation ────────────────────────────────────────────────────────────

fn compare_rows<T: PartialOrd + Copy>(
    values: &[T],
    chunk: &ColumnChunk<'_>,
    op: CompareOp,
    rhs: T,
) -> Vec<bool> {
    values
        .iter()
        .enumerate()
        .map(|(row, &v)| chunk.is_valid(row) && op.eval(v, rhs))
        .collect()
}

fn compare_str_rows(
    values: &[String],
    chunk: &ColumnChunk<'_>,
    op: CompareOp,
    rhs: &str,
) -> Vec<bool> {
    values
        .iter()
        .enumerate()
        .map(|(row, v)| chunk.is_valid(row) && op.eval(v.as_str(), rhs))
        .collect()
}

fn range_rows<T: PartialOrd + Copy>(
    values: &[T],
    chunk: &ColumnChunk<'_>,
    lo: Option<T>,
    hi: Option<T>,
    inclusive_lo: bool,
    inclusive_hi: bool,
) -> Vec<bool> {
    values
        .iter()
        .enumerate()
        .map(|(row, &v)| {
            if !chunk.is_valid(row) {
                return false;
            }
            let above = match lo {
                Some(lo) => {
                    if inclusive_lo {
                        v >= lo
                    } else {
                        v > lo
                    }
                }
                None => true,
            };
            let below = match hi {
                Some(hi) => {
                    if inclusive_hi {
                        v <= hi
                    } else {
                        v < hi
                    }
                }
                None => true,
            };
            above && below
        })
        .collect()
}

fn type_mismatch() -> Error {
    Error::Unexpected("column/literal type mismatch after compilation".into())
}

fn eval_compare(
    chunk: &ColumnChunk<'_>,
    op: CompareOp,
    value: &Literal,
) -> Result<Vec<bool>> {
    Ok(match (&chunk.values, value) {
        (ScalarArray::Bool(v), Literal::Bool(l)) => compare_rows(v, chunk, op, *l),
        (ScalarArray::Int8(v), Literal::Int8(l)) => compare_rows(v, chunk, op, *l),
        (ScalarArray::Int16(v), Literal::Int16(l)) => compare_rows(v, chunk, op, *l),
        (ScalarArray::Int32(v), Literal::Int32(l)) => compare_rows(v, chunk, op, *l),
        (ScalarArray::Int64(v), Literal::Int64(l)) => compare_rows(v, chunk, op, *l),
        (ScalarArray::Float(v), Literal::Float(l)) => compare_rows(v, chunk, op, *l),
        (ScalarArray::Double(v), Literal::Double(l)) => compare_rows(v, chunk, op, *l),
        (ScalarArray::Str(v), Literal::Str(l)) => compare_str_rows(v, chunk, op, l),
        _ => return Err(type_mismatch()),
    })
}

macro_rules! unwrap_bound {
    ($bound:expr, $variant:ident) => {
        match $bound {
            Some(Literal::$variant(x)) => Some(*x),
            None => None,
            _ => return Err(type_mismatch()),
        }
    };
}

fn eval_range(
    chunk: &ColumnChunk<'_>,
    lo: &Option<Literal>,
    hi: &Option<Literal>,
    inclusive_lo: bool,
    inclusive_hi: bool,
) -> Result<Vec<bool>> {
    Ok(match &chunk.values {
        ScalarArray::Int8(v) => range_rows(
            v,
            chunk,
            unwrap_bound!(lo, Int8),
            unwrap_bound!(hi, Int8),
            inclusive_lo,
            inclusive_hi,
        ),
        ScalarArray::Int16(v) => range_rows(
            v,
            chunk,
            unwrap_bound!(lo, Int16),
            unwrap_bound!(hi, Int16),
            inclusive_lo,
            inclusive_hi,
        ),
        ScalarArray::Int32(v) => range_rows(
            v,
            chunk,
            unwrap_bound!(lo, Int32),
            unwrap_bound!(hi, Int32),
            inclusive_lo,
            inclusive_hi,
        ),
        ScalarArray::Int64(v) => range_rows(
            v,
            chunk,
            unwrap_bound!(lo, Int64),
            unwrap_bound!(hi, Int64),
            inclusive_lo,
            inclusive_hi,
        ),
        ScalarArray::Float(v) => range_rows(
            v,
            chunk,
            unwrap_bound!(lo, Float),
            unwrap_bound!(hi, Float),
            inclusive_lo,
            inclusive_hi,
        ),
        ScalarArray::Double(v) => range_rows(
            v,
            chunk,
            unwrap_bound!(lo, Double),
            unwrap_bound!(hi, Double),
            inclusive_lo,
            inclusive_hi,
        ),
        ScalarArray::Str(v) => {
            let lo = match lo {
                Some(Literal::Str(x)) => Some(x.as_str()),
                None => None,
                _ => return Err(type_mismatch()),
            };
            let hi = match hi {
                Some(Literal::Str(x)) => Some(x.as_str()),
                None => None,
                _ => return Err(type_mismatch()),
            };
            v.iter()
                .enumerate()
                .map(|(row, value)| {
                    if !chunk.is_valid(row) {
                        return false;
                    }
                    let above = lo.is_none_or(|lo| {
                        if inclusive_lo {
                            value.as_str() >= lo
                        } else {
                            value.as_str() > lo
                        }
                    });
                    let below = hi.is_none_or(|hi| {
                        if inclusive_hi {
                            value.as_str() <= hi
                        } else {
                            value.as_str() < hi
                        }
                    });
                    above && below
                })
                .collect()
        }
        ScalarArray::Bool(_) => return Err(type_mismatch()),
    })
}

fn eval_term(chunk: &ColumnChunk<'_>, set: &TermSet) -> Result<Vec<bool>> {
    macro_rules! probe {
        ($chunk:expr, $values:expr, $set:expr) => {
            $values
                .iter()
                .enumerate()
                .map(|(row, &v)| $chunk.is_valid(row) && $set.contains(v))
                .collect()
        };
    }
    Ok(match (&chunk.values, set) {
        (ScalarArray::Bool(v), TermSet::Bool(needles)) => v
            .iter()
            .enumerate()
            .map(|(row, value)| chunk.is_valid(row) && needles.contains(value))
            .collect(),
        (ScalarArray::Int8(v), TermSet::I8(set)) => probe!(chunk, v, set),
        (ScalarArray::Int16(v), TermSet::I16(set)) => probe!(chunk, v, set),
        (ScalarArray::Int32(v), TermSet::I32(set)) => probe!(chunk, v, set),
        (ScalarArray::Int64(v), TermSet::I64(set)) => probe!(chunk, v, set),
        (ScalarArray::Float(v), TermSet::F32(set)) => probe!(chunk, v, set),
        (ScalarArray::Double(v), TermSet::F64(set)) => probe!(chunk, v, set),
        (ScalarArray::Str(v), TermSet::Str(set)) => v
            .iter()
            .enumerate()
            .map(|(row, value)| chunk.is_valid(row) && set.contains(value))
            .collect(),
        _ => return Err(type_mismatch()),
    })
}

#[inline]
fn dominated(is_and: bool, running: &ColumnVector<bool>) -> bool {
    if is_and {
        simd::all_false(running.raw())
    } else {
        simd::all_true(running.raw())
    }
}

/// Evaluate one compiled predicate over one chunk. The result length is
/// exactly the chunk row count.
pub(crate) fn eval_chunk(
    expr: &CompiledExpr,
    segment: &dyn SegmentInternal,
    chunk: usize,
) -> Result<ColumnVector<bool>> {
    match expr {
        CompiledExpr::Const(value) => {
            Ok(ColumnVector::filled(*value, segment.chunk_rows(chunk)))
        }
        CompiledExpr::Compare { field, op, value } => {
            let data = segment.scalar_chunk(*field, chunk)?;
            Ok(ColumnVector::new(eval_compare(&data, *op, value)?))
        }
        CompiledExpr::Range {
            field,
            lo,
            hi,
            inclusive_lo,
            inclusive_hi,
        } => {
            let data = segment.scalar_chunk(*field, chunk)?;
            Ok(ColumnVector::new(eval_range(
                &data,
                lo,
                hi,
                *inclusive_lo,
                *inclusive_hi,
            )?))
        }
        CompiledExpr::Term { field, set } => {
            let data = segment.scalar_chunk(*field, chunk)?;
            Ok(ColumnVector::new(eval_term(&data, set)?))
        }
        CompiledExpr::Not(child) => {
            let mut result = eval_chunk(child, segment, chunk)?;
            simd::invert_bool(result.raw_mut());
            Ok(result)
        }
        CompiledExpr::Conjunct { is_and, children } => {
            let mut running = eval_chunk(&children[0], segment, chunk)?;
            // short-circuit: an all-false AND (or all-true OR) is already
            // decided and later children must not touch their columns
            if dominated(*is_and, &running) {
                return Ok(running);
            }
            for child in &children[1..] {
                let next = eval_chunk(child, segment, chunk)?;
                if *is_and {
                    simd::and_bool(running.raw_mut(), next.raw());
                } else {
                    simd::or_bool(running.raw_mut(), next.raw());
                }
                if dominated(*is_and, &running) {
                    break;
                }
            }
            Ok(running)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::Expr;
    use crate::segment::{MemSegment, Segment};

    fn segment() -> MemSegment {
        let mut builder = MemSegment::builder().with_chunk_size(4);
        builder.add_int64_column("age", vec![20, 30, 40, 50]);
        builder.add_int64_column("salary", vec![100, 0, 300, 400]);
        builder.add_string_column(
            "city",
            vec!["ams".into(), "ber".into(), "cdg".into(), "del".into()],
        );
        builder.build().unwrap()
    }

    fn eval(expr: &Expr, segment: &MemSegment) -> Vec<bool> {
        let compiled = compile(expr, segment.schema()).unwrap();
        eval_chunk(&compiled, segment, 0).unwrap().into_inner()
    }

    #[test]
    fn test_compare_widens_literal() {
        let segment = segment();
        let age = segment.schema().fields()[0].id;
        let expr = Expr::compare(age, CompareOp::Gt, Literal::Int32(30));
        assert_eq!(eval(&expr, &segment), vec![false, false, true, true]);
    }

    #[test]
    fn test_range_inclusivity() {
        let segment = segment();
        let age = segment.schema().fields()[0].id;
        let expr = Expr::Range {
            field: age,
            lo: Some(Literal::Int64(30)),
            hi: Some(Literal::Int64(50)),
            inclusive_lo: true,
            inclusive_hi: false,
        };
        assert_eq!(eval(&expr, &segment), vec![false, true, true, false]);
    }

    #[test]
    fn test_term_small_set() {
        let segment = segment();
        let age = segment.schema().fields()[0].id;
        let expr = Expr::term(age, vec![Literal::Int64(30), Literal::Int64(50)]);
        assert_eq!(eval(&expr, &segment), vec![false, true, false, true]);
    }

    #[test]
    fn test_term_large_set_uses_hash() {
        let segment = segment();
        let age = segment.schema().fields()[0].id;
        // 20 needles forces the hash-set path
        let values: Vec<Literal> = (0..20).map(|i| Literal::Int64(i * 10)).collect();
        let expr = Expr::term(age, values);
        assert_eq!(eval(&expr, &segment), vec![true, true, true, true]);
    }

    #[test]
    fn test_term_drops_unreachable_values() {
        let mut builder = MemSegment::builder();
        builder.add_int8_column("tiny", vec![1, 2, 3]);
        let segment = builder.build().unwrap();
        let tiny = segment.schema().fields()[0].id;
        // 300 does not fit in i8 and can never match
        let expr = Expr::term(tiny, vec![Literal::Int64(300), Literal::Int64(2)]);
        assert_eq!(eval(&expr, &segment), vec![false, true, false]);
    }

    #[test]
    fn test_string_predicates() {
        let segment = segment();
        let city = segment.schema().fields()[2].id;
        let expr = Expr::compare(city, CompareOp::Ge, Literal::Str("cdg".into()));
        assert_eq!(eval(&expr, &segment), vec![false, false, true, true]);

        let expr = Expr::term(city, vec![Literal::Str("ber".into())]);
        assert_eq!(eval(&expr, &segment), vec![false, true, false, false]);
    }

    #[test]
    fn test_not_and_conjunct() {
        let segment = segment();
        let age = segment.schema().fields()[0].id;
        let salary = segment.schema().fields()[1].id;

        let expr = Expr::not(Expr::compare(age, CompareOp::Gt, Literal::Int64(30)));
        assert_eq!(eval(&expr, &segment), vec![true, true, false, false]);

        let expr = Expr::and(vec![
            Expr::compare(age, CompareOp::Ge, Literal::Int64(30)),
            Expr::compare(salary, CompareOp::Gt, Literal::Int64(0)),
        ]);
        assert_eq!(eval(&expr, &segment), vec![false, false, true, true]);

        let expr = Expr::or(vec![
            Expr::compare(age, CompareOp::Eq, Literal::Int64(20)),
            Expr::compare(salary, CompareOp::Eq, Literal::Int64(400)),
        ]);
        assert_eq!(eval(&expr, &segment), vec![true, false, false, true]);
    }

    #[test]
    fn test_and_short_circuit_skips_columns() {
        let segment = segment();
        let age = segment.schema().fields()[0].id;
        let salary = segment.schema().fields()[1].id;

        let expr = Expr::and(vec![
            Expr::compare(age, CompareOp::Gt, Literal::Int64(100)),
            Expr::compare(salary, CompareOp::Gt, Literal::Int64(0)),
        ]);
        assert_eq!(eval(&expr, &segment), vec![false, false, false, false]);
        // the salary column must not have been read
        assert_eq!(segment.chunk_read_count(salary), 0);
        assert_eq!(segment.chunk_read_count(age), 1);
    }

    #[test]
    fn test_or_short_circuit_on_all_true() {
        let segment = segment();
        let age = segment.schema().fields()[0].id;
        let salary = segment.schema().fields()[1].id;

        let expr = Expr::or(vec![
            Expr::compare(age, CompareOp::Ge, Literal::Int64(0)),
            Expr::compare(salary, CompareOp::Gt, Literal::Int64(0)),
        ]);
        assert_eq!(eval(&expr, &segment), vec![true, true, true, true]);
        assert_eq!(segment.chunk_read_count(salary), 0);
    }

    #[test]
    fn test_validity_masks_to_false() {
        let mut builder = MemSegment::builder();
        let x = builder.add_int64_column("x", vec![1, 2, 3]);
        builder.set_validity(x, vec![true, false, true]);
        let segment = builder.build().unwrap();

        let expr = Expr::compare(x, CompareOp::Gt, Literal::Int64(0));
        let compiled = compile(&expr, segment.schema()).unwrap();
        let result = eval_chunk(&compiled, &segment, 0).unwrap();
        assert_eq!(result.raw(), &[true, false, true]);

        // NOT over a missing value flips the false; three-valued logic is
        // explicitly out of scope
        let expr = Expr::not(Expr::compare(x, CompareOp::Gt, Literal::Int64(0)));
        let compiled = compile(&expr, segment.schema()).unwrap();
        let result = eval_chunk(&compiled, &segment, 0).unwrap();
        assert_eq!(result.raw(), &[false, true, false]);
    }

    #[test]
    fn test_typing_failures() {
        let segment = segment();
        let age = segment.schema().fields()[0].id;

        // unknown field
        let expr = Expr::compare(999, CompareOp::Eq, Literal::Int64(1));
        assert!(matches!(
            compile(&expr, segment.schema()),
            Err(Error::InvalidExpression(_))
        ));

        // string literal against an int column
        let expr = Expr::compare(age, CompareOp::Eq, Literal::Str("x".into()));
        assert!(matches!(
            compile(&expr, segment.schema()),
            Err(Error::InvalidExpression(_))
        ));

        // empty conjunct
        let expr = Expr::and(vec![]);
        assert!(matches!(
            compile(&expr, segment.schema()),
            Err(Error::InvalidExpression(_))
        ));

        // term with a string against an int column
        let expr = Expr::term(age, vec![Literal::Str("x".into())]);
        assert!(matches!(
            compile(&expr, segment.schema()),
            Err(Error::InvalidExpression(_))
        ));
    }

    #[test]
    fn test_const_nodes() {
        let segment = segment();
        assert_eq!(
            eval(&Expr::AlwaysTrue, &segment),
            vec![true, true, true, true]
        );
        assert_eq!(
            eval(&Expr::AlwaysFalse, &segment),
            vec![false, false, false, false]
        );
    }
}
