//! Translation of DataFusion logical filters into `Predicate`
//!
//! Only shapes that statistics can decide survive translation. A
//! translated predicate may be wider than the filter but never narrower:
//! dropping an AND operand widens it, so that is allowed wherever the
//! operand isn't negated. Under an odd number of NOTs dropping an operand
//! narrows the filter, so the whole conjunction is dropped there. A
//! disjunction with an untranslatable operand is always dropped.

use super::predicates::{CompareOp, Predicate};
use datafusion::common::ScalarValue;
use datafusion::logical_expr::{Expr, Operator};

/// Translate every filter, keeping the conjuncts that can be represented
pub fn predicates_from_exprs(filters: &[Expr]) -> Vec<Predicate> {
    let mut out = Vec::new();
    for filter in filters {
        let mut terms = Vec::new();
        collect_conjuncts(filter, &mut terms);
        out.extend(terms.into_iter().filter_map(translate));
    }
    out
}

/// Translate one expression into a predicate that keeps every row it keeps
pub fn translate(expr: &Expr) -> Option<Predicate> {
    translate_with_polarity(expr, false)
}

fn translate_with_polarity(expr: &Expr, negated: bool) -> Option<Predicate> {
    match expr {
        Expr::BinaryExpr(binary) => match binary.op {
            Operator::And => {
                let left = translate_with_polarity(&binary.left, negated);
                let right = translate_with_polarity(&binary.right, negated);
                match (left, right) {
                    (Some(l), Some(r)) => Some(l.and(r)),
                    (Some(one), None) | (None, Some(one)) if !negated => Some(one),
                    _ => None,
                }
            }
            Operator::Or => {
                let left = translate_with_polarity(&binary.left, negated)?;
                let right = translate_with_polarity(&binary.right, negated)?;
                Some(left.or(right))
            }
            op => {
                let op = compare_op(op)?;
                if let (Some(column), Some(value)) = (
                    extract_column_name(&binary.left),
                    extract_literal(&binary.right),
                ) {
                    return Some(Predicate::compare(column, op, value));
                }
                let column = extract_column_name(&binary.right)?;
                let value = extract_literal(&binary.left)?;
                Some(Predicate::compare(column, op.flip(), value))
            }
        },
        Expr::InList(in_list) => {
            let column = extract_column_name(&in_list.expr)?;
            let values = in_list
                .list
                .iter()
                .map(extract_literal)
                .collect::<Option<Vec<_>>>()?;
            let predicate = Predicate::in_list(column, values);
            Some(if in_list.negated {
                predicate.not()
            } else {
                predicate
            })
        }
        Expr::Between(between) => {
            let column = extract_column_name(&between.expr)?;
            let low = extract_literal(&between.low)?;
            let high = extract_literal(&between.high)?;
            let predicate = Predicate::gt_eq(column, low).and(Predicate::lt_eq(column, high));
            Some(if between.negated {
                predicate.not()
            } else {
                predicate
            })
        }
        Expr::IsNull(inner) => extract_column_name(inner).map(Predicate::is_null),
        Expr::IsNotNull(inner) => extract_column_name(inner).map(Predicate::is_not_null),
        Expr::Not(inner) => translate_with_polarity(inner, !negated).map(Predicate::not),
        Expr::Alias(alias) => translate_with_polarity(&alias.expr, negated),
        _ => None,
    }
}

fn collect_conjuncts<'a>(expr: &'a Expr, out: &mut Vec<&'a Expr>) {
    match expr {
        Expr::BinaryExpr(binary) if binary.op == Operator::And => {
            collect_conjuncts(&binary.left, out);
            collect_conjuncts(&binary.right, out);
        }
        _ => out.push(expr),
    }
}

fn compare_op(op: Operator) -> Option<CompareOp> {
    match op {
        Operator::Eq => Some(CompareOp::Eq),
        Operator::NotEq => Some(CompareOp::NotEq),
        Operator::Lt => Some(CompareOp::Lt),
        Operator::LtEq => Some(CompareOp::LtEq),
        Operator::Gt => Some(CompareOp::Gt),
        Operator::GtEq => Some(CompareOp::GtEq),
        _ => None,
    }
}

fn extract_column_name(expr: &Expr) -> Option<&str> {
    match expr {
        Expr::Column(column) => Some(column.name.as_str()),
        Expr::Alias(alias) => extract_column_name(&alias.expr),
        _ => None,
    }
}

fn extract_literal(expr: &Expr) -> Option<ScalarValue> {
    match expr {
        Expr::Literal(value, ..) => Some(value.clone()),
        Expr::Alias(alias) => extract_literal(&alias.expr),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use datafusion::logical_expr::{col, lit};

    #[test]
    fn test_translates_comparisons_and_flips_literal_first() {
        let preds =
            predicates_from_exprs(&[col("amount").gt(lit(100i64)), lit(5i64).lt(col("ts"))]);
        assert_eq!(
            preds,
            vec![Predicate::gt("amount", 100i64), Predicate::gt("ts", 5i64)]
        );
    }

    #[test]
    fn test_splits_top_level_conjuncts() {
        let filter = col("key").eq(lit("k1")).and(col("amount").lt_eq(lit(10i64)));
        let preds = predicates_from_exprs(&[filter]);
        assert_eq!(
            preds,
            vec![Predicate::eq("key", "k1"), Predicate::lt_eq("amount", 10i64)]
        );
    }

    #[test]
    fn test_translates_in_list_between_and_nulls() {
        let preds = predicates_from_exprs(&[
            col("key").in_list(vec![lit("a"), lit("b")], false),
            col("amount").between(lit(1i64), lit(9i64)),
            col("email").is_null(),
            !col("email").is_not_null(),
        ]);
        assert_eq!(
            preds,
            vec![
                Predicate::in_list("key", ["a", "b"]),
                Predicate::gt_eq("amount", 1i64).and(Predicate::lt_eq("amount", 9i64)),
                Predicate::is_null("email"),
                Predicate::is_not_null("email").not(),
            ]
        );
    }

    #[test]
    fn test_negated_in_list_becomes_not() {
        let preds = predicates_from_exprs(&[col("key").in_list(vec![lit("a")], true)]);
        assert_eq!(preds, vec![Predicate::in_list("key", ["a"]).not()]);
    }

    #[test]
    fn test_drops_untranslatable_conjuncts_only() {
        // col + col comparison can't be decided from stats
        let opaque = col("a").eq(col("b"));
        let preds = predicates_from_exprs(&[opaque.clone().and(col("c").gt(lit(1i64)))]);
        assert_eq!(preds, vec![Predicate::gt("c", 1i64)]);

        // Under OR the whole disjunction goes
        let preds = predicates_from_exprs(&[opaque.or(col("c").gt(lit(1i64)))]);
        assert!(preds.is_empty());
    }

    #[test]
    fn test_nested_and_under_or_keeps_known_side() {
        let filter = col("a")
            .gt(lit(1i64))
            .and(col("x").eq(col("y")))
            .or(col("b").lt(lit(2i64)));
        let preds = predicates_from_exprs(&[filter]);
        assert_eq!(
            preds,
            vec![Predicate::gt("a", 1i64).or(Predicate::lt("b", 2i64))]
        );
    }

    #[test]
    fn test_negated_conjunction_needs_both_sides() {
        let opaque = col("a").eq(col("b"));

        // NOT (amount > 100 AND a = b) holds for rows with amount > 100
        let filter = !(col("amount").gt(lit(100i64)).and(opaque.clone()));
        assert_eq!(translate(&filter), None);
        assert!(predicates_from_exprs(&[filter]).is_empty());

        // Double negation is positive again, so the known side may stand alone
        let filter = !!(col("amount").gt(lit(100i64)).and(opaque.clone()));
        assert_eq!(
            translate(&filter),
            Some(Predicate::gt("amount", 100i64).not().not())
        );

        // NOT over OR over a partial AND is still negated
        let filter = !(col("amount").gt(lit(100i64)).and(opaque).or(col("c").is_null()));
        assert_eq!(translate(&filter), None);
    }

    #[test]
    fn test_translated_negation_keeps_matching_file() {
        use crate::indexes::column_stats::ColumnStatistics;
        use crate::query::predicates::{FilePredicate, FileVerdict};
        use std::collections::HashMap;

        let stats = HashMap::from([(
            "amount".to_string(),
            ColumnStatistics::new(Some(200i64.into()), Some(300i64.into()), Some(0)),
        )]);
        let filter = !(col("amount").gt(lit(100)).and(col("a").eq(col("b"))));
        let preds = predicates_from_exprs(&[filter]);
        assert_eq!(preds.as_slice().evaluate(&stats), FileVerdict::MayInclude);
    }
}
