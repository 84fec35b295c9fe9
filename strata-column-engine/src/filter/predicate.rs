use std::ops::Bound;
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, AsArray, BinaryArray, BooleanArray, Float64Array, Int64Array, Scalar,
    StringArray, UInt64Array,
};
use arrow::compute::kernels::cmp;
use arrow::compute::{
    and_kleene, can_cast_types, cast, is_not_null, is_null, not, or_kleene,
    prep_null_mask_filter,
};
use arrow::datatypes::{DataType, Schema};
use arrow::record_batch::RecordBatch;
use strata_expr::{Expr, Filter, Literal, Operator};
use strata_result::{Error, Result};

/// Check that every column a predicate names exists in `schema`.
pub fn validate_predicate(predicate: &Expr<String>, schema: &Schema) -> Result<()> {
    let mut missing = None;
    predicate.for_each_field(&mut |name| {
        if missing.is_none() && schema.index_of(name).is_err() {
            missing = Some(name.clone());
        }
    });
    match missing {
        Some(name) => Err(Error::InvalidArgumentError(format!(
            "predicate references unknown column `{name}`"
        ))),
        None => Ok(()),
    }
}

/// Evaluate `predicate` over the user columns of `batch`.
///
/// Comparisons follow three-valued logic; rows whose result is null are not
/// selected.
pub fn predicate_filter(batch: &RecordBatch, predicate: &Expr<String>) -> Result<BooleanArray> {
    let mask = eval(batch, predicate)?;
    if mask.null_count() == 0 {
        Ok(mask)
    } else {
        Ok(prep_null_mask_filter(&mask))
    }
}

fn eval(batch: &RecordBatch, expr: &Expr<String>) -> Result<BooleanArray> {
    let rows = batch.num_rows();
    match expr {
        Expr::Const(value) => Ok(BooleanArray::from(vec![*value; rows])),
        Expr::And(children) => {
            let mut acc = BooleanArray::from(vec![true; rows]);
            for child in children {
                acc = and_kleene(&acc, &eval(batch, child)?)?;
            }
            Ok(acc)
        }
        Expr::Or(children) => {
            let mut acc = BooleanArray::from(vec![false; rows]);
            for child in children {
                acc = or_kleene(&acc, &eval(batch, child)?)?;
            }
            Ok(acc)
        }
        Expr::Not(inner) => Ok(not(&eval(batch, inner)?)?),
        Expr::Pred(filter) => eval_filter(batch, filter),
    }
}

fn eval_filter(batch: &RecordBatch, filter: &Filter<String>) -> Result<BooleanArray> {
    let column = batch.column_by_name(&filter.field_id).ok_or_else(|| {
        Error::InvalidArgumentError(format!("unknown column `{}`", filter.field_id))
    })?;
    let rows = batch.num_rows();

    match &filter.op {
        Operator::Equals(lit) => compare(column, lit, CmpOp::Eq, rows),
        Operator::NotEquals(lit) => compare(column, lit, CmpOp::NotEq, rows),
        Operator::GreaterThan(lit) => compare(column, lit, CmpOp::Gt, rows),
        Operator::GreaterThanOrEquals(lit) => compare(column, lit, CmpOp::GtEq, rows),
        Operator::LessThan(lit) => compare(column, lit, CmpOp::Lt, rows),
        Operator::LessThanOrEquals(lit) => compare(column, lit, CmpOp::LtEq, rows),
        Operator::Range { lower, upper } => {
            let mut acc = BooleanArray::from(vec![true; rows]);
            let lower = match lower {
                Bound::Included(lit) => Some((lit, CmpOp::GtEq)),
                Bound::Excluded(lit) => Some((lit, CmpOp::Gt)),
                Bound::Unbounded => None,
            };
            let upper = match upper {
                Bound::Included(lit) => Some((lit, CmpOp::LtEq)),
                Bound::Excluded(lit) => Some((lit, CmpOp::Lt)),
                Bound::Unbounded => None,
            };
            for (lit, op) in lower.into_iter().chain(upper) {
                acc = and_kleene(&acc, &compare(column, lit, op, rows)?)?;
            }
            Ok(acc)
        }
        Operator::In(values) => {
            let mut acc = BooleanArray::from(vec![false; rows]);
            for lit in values {
                acc = or_kleene(&acc, &compare(column, lit, CmpOp::Eq, rows)?)?;
            }
            Ok(acc)
        }
        Operator::StartsWith(pattern) => {
            match_strings(column, &filter.field_id, |s| s.starts_with(pattern.as_str()))
        }
        Operator::EndsWith(pattern) => {
            match_strings(column, &filter.field_id, |s| s.ends_with(pattern.as_str()))
        }
        Operator::Contains(pattern) => {
            match_strings(column, &filter.field_id, |s| s.contains(pattern.as_str()))
        }
        Operator::IsNull => Ok(is_null(column.as_ref())?),
        Operator::IsNotNull => Ok(is_not_null(column.as_ref())?),
    }
}

#[derive(Clone, Copy, Debug)]
enum CmpOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

fn compare(column: &ArrayRef, lit: &Literal, op: CmpOp, rows: usize) -> Result<BooleanArray> {
    if lit.is_null() {
        return Ok(BooleanArray::new_null(rows));
    }
    let (lhs, rhs) = align(column, lit)?;
    let rhs = Scalar::new(rhs);
    let result = match op {
        CmpOp::Eq => cmp::eq(&lhs, &rhs)?,
        CmpOp::NotEq => cmp::neq(&lhs, &rhs)?,
        CmpOp::Lt => cmp::lt(&lhs, &rhs)?,
        CmpOp::LtEq => cmp::lt_eq(&lhs, &rhs)?,
        CmpOp::Gt => cmp::gt(&lhs, &rhs)?,
        CmpOp::GtEq => cmp::gt_eq(&lhs, &rhs)?,
    };
    Ok(result)
}

/// Bring a column and a literal to one comparable type.
///
/// The literal is normally cast to the column's type. When that loses the
/// value (a float against an integer column, or an integer out of the
/// column's range) the column is widened to the literal's type instead. A
/// string that does not parse as the type of a numeric column is rejected.
fn align(column: &ArrayRef, lit: &Literal) -> Result<(ArrayRef, ArrayRef)> {
    let raw = literal_array(lit)?;
    let col_type = column.data_type();
    if raw.data_type() == col_type {
        return Ok((Arc::clone(column), raw));
    }
    if matches!(lit, Literal::Float(_)) && col_type.is_integer() {
        return Ok((cast(column, &DataType::Float64)?, raw));
    }
    if !can_cast_types(raw.data_type(), col_type) {
        return Err(Error::InvalidArgumentError(format!(
            "cannot compare {} literal with column of type {col_type}",
            lit.kind()
        )));
    }
    let converted = cast(&raw, col_type)?;
    if converted.is_null(0)
        && col_type.is_numeric()
        && let Literal::String(text) = lit
    {
        return Err(Error::InvalidArgumentError(format!(
            "string literal {text:?} is not a valid {col_type} value"
        )));
    }
    if converted.is_null(0) && can_cast_types(col_type, raw.data_type()) {
        return Ok((cast(column, raw.data_type())?, raw));
    }
    Ok((Arc::clone(column), converted))
}

fn literal_array(lit: &Literal) -> Result<ArrayRef> {
    let array: ArrayRef = match lit {
        Literal::Null => {
            return Err(Error::Internal("null literal has no array form".into()));
        }
        Literal::Boolean(v) => Arc::new(BooleanArray::from(vec![*v])),
        Literal::Integer(v) => {
            if let Ok(v) = i64::try_from(*v) {
                Arc::new(Int64Array::from(vec![v]))
            } else if let Ok(v) = u64::try_from(*v) {
                Arc::new(UInt64Array::from(vec![v]))
            } else {
                return Err(Error::InvalidArgumentError(format!(
                    "integer literal {v} exceeds 64 bits"
                )));
            }
        }
        Literal::Float(v) => Arc::new(Float64Array::from(vec![*v])),
        Literal::String(v) => Arc::new(StringArray::from(vec![v.as_str()])),
        Literal::Binary(v) => Arc::new(BinaryArray::from(vec![v.as_slice()])),
    };
    Ok(array)
}

fn match_strings(
    column: &ArrayRef,
    name: &str,
    matches: impl Fn(&str) -> bool,
) -> Result<BooleanArray> {
    let strings = match column.data_type() {
        DataType::Utf8 => Arc::clone(column),
        DataType::LargeUtf8 | DataType::Utf8View => cast(column, &DataType::Utf8)?,
        other => {
            return Err(Error::InvalidArgumentError(format!(
                "pattern match on non-string column `{name}` ({other})"
            )));
        }
    };
    Ok(strings
        .as_string::<i32>()
        .iter()
        .map(|value| value.map(&matches))
        .collect())
}
