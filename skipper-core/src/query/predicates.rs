use crate::indexes::column_stats::{ColumnStatistics, FileStats};
use datafusion::common::ScalarValue;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;

/// Comparison operator of a column-vs-literal predicate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl CompareOp {
    /// Operator with its operands swapped (`5 < col` becomes `col > 5`)
    pub fn flip(self) -> Self {
        match self {
            CompareOp::Lt => CompareOp::Gt,
            CompareOp::LtEq => CompareOp::GtEq,
            CompareOp::Gt => CompareOp::Lt,
            CompareOp::GtEq => CompareOp::LtEq,
            other => other,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::NotEq => "!=",
            CompareOp::Lt => "<",
            CompareOp::LtEq => "<=",
            CompareOp::Gt => ">",
            CompareOp::GtEq => ">=",
        }
    }
}

/// Engine-neutral filter over named columns
///
/// Query front-ends translate their own expression trees into this form
/// (see `query::filters` for DataFusion). Only shapes that can be decided
/// from per-file min/max/null statistics are representable.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Compare {
        column: String,
        op: CompareOp,
        value: ScalarValue,
    },
    In {
        column: String,
        values: Vec<ScalarValue>,
    },
    IsNull(String),
    IsNotNull(String),
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn compare(
        column: impl Into<String>,
        op: CompareOp,
        value: impl Into<ScalarValue>,
    ) -> Self {
        Predicate::Compare {
            column: column.into(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(column: impl Into<String>, value: impl Into<ScalarValue>) -> Self {
        Self::compare(column, CompareOp::Eq, value)
    }

    pub fn not_eq(column: impl Into<String>, value: impl Into<ScalarValue>) -> Self {
        Self::compare(column, CompareOp::NotEq, value)
    }

    pub fn lt(column: impl Into<String>, value: impl Into<ScalarValue>) -> Self {
        Self::compare(column, CompareOp::Lt, value)
    }

    pub fn lt_eq(column: impl Into<String>, value: impl Into<ScalarValue>) -> Self {
        Self::compare(column, CompareOp::LtEq, value)
    }

    pub fn gt(column: impl Into<String>, value: impl Into<ScalarValue>) -> Self {
        Self::compare(column, CompareOp::Gt, value)
    }

    pub fn gt_eq(column: impl Into<String>, value: impl Into<ScalarValue>) -> Self {
        Self::compare(column, CompareOp::GtEq, value)
    }

    pub fn in_list<I, V>(column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<ScalarValue>,
    {
        Predicate::In {
            column: column.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_null(column: impl Into<String>) -> Self {
        Predicate::IsNull(column.into())
    }

    pub fn is_not_null(column: impl Into<String>) -> Self {
        Predicate::IsNotNull(column.into())
    }

    pub fn and(self, other: Predicate) -> Self {
        Predicate::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: Predicate) -> Self {
        Predicate::Or(Box::new(self), Box::new(other))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        Predicate::Not(Box::new(self))
    }

    /// Every column name this predicate reads
    pub fn columns(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns(&self, out: &mut BTreeSet<String>) {
        match self {
            Predicate::Compare { column, .. }
            | Predicate::In { column, .. }
            | Predicate::IsNull(column)
            | Predicate::IsNotNull(column) => {
                out.insert(column.clone());
            }
            Predicate::And(left, right) | Predicate::Or(left, right) => {
                left.collect_columns(out);
                right.collect_columns(out);
            }
            Predicate::Not(inner) => inner.collect_columns(out),
        }
    }

    /// Top-level conjuncts, with nested ANDs flattened
    pub fn conjuncts(&self) -> Vec<&Predicate> {
        let mut out = Vec::new();
        collect_conjuncts(self, &mut out);
        out
    }

    /// What the statistics allow this predicate to evaluate to across the file's rows
    fn outcome(&self, stats: &FileStats) -> Outcome {
        match self {
            Predicate::Compare { column, op, value } => match stats.get(column) {
                Some(col) => compare_outcome(col, *op, value),
                None => Outcome::UNKNOWN,
            },
            Predicate::In { column, values } => match stats.get(column) {
                Some(col) => in_list_outcome(col, values),
                None => Outcome::UNKNOWN,
            },
            Predicate::IsNull(column) => match stats.get(column) {
                Some(col) => Outcome {
                    may_be_true: col.may_contain_null(),
                    may_be_false: col.may_contain_non_null(),
                },
                None => Outcome::UNKNOWN,
            },
            Predicate::IsNotNull(column) => match stats.get(column) {
                Some(col) => Outcome {
                    may_be_true: col.may_contain_non_null(),
                    may_be_false: col.may_contain_null(),
                },
                None => Outcome::UNKNOWN,
            },
            Predicate::And(left, right) => {
                let (l, r) = (left.outcome(stats), right.outcome(stats));
                Outcome {
                    may_be_true: l.may_be_true && r.may_be_true,
                    may_be_false: l.may_be_false || r.may_be_false,
                }
            }
            Predicate::Or(left, right) => {
                let (l, r) = (left.outcome(stats), right.outcome(stats));
                Outcome {
                    may_be_true: l.may_be_true || r.may_be_true,
                    may_be_false: l.may_be_false && r.may_be_false,
                }
            }
            Predicate::Not(inner) => {
                let o = inner.outcome(stats);
                Outcome {
                    may_be_true: o.may_be_false,
                    may_be_false: o.may_be_true,
                }
            }
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Compare { column, op, value } => {
                write!(f, "{} {} {}", column, op.symbol(), value)
            }
            Predicate::In { column, values } => {
                let rendered: Vec<String> = values.iter().map(|v| v.to_string()).collect();
                write!(f, "{} IN ({})", column, rendered.join(", "))
            }
            Predicate::IsNull(column) => write!(f, "{} IS NULL", column),
            Predicate::IsNotNull(column) => write!(f, "{} IS NOT NULL", column),
            Predicate::And(left, right) => write!(f, "({} AND {})", left, right),
            Predicate::Or(left, right) => write!(f, "({} OR {})", left, right),
            Predicate::Not(inner) => write!(f, "NOT ({})", inner),
        }
    }
}

/// Decision for one file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileVerdict {
    /// Statistics prove no row can satisfy the predicate
    DefinitelyExcluded,
    /// Some row might satisfy the predicate; the file must be scanned
    MayInclude,
}

/// Narrow seam between the pruning algorithm and any filter representation
pub trait FilePredicate {
    fn evaluate(&self, stats: &FileStats) -> FileVerdict;
}

impl FilePredicate for Predicate {
    fn evaluate(&self, stats: &FileStats) -> FileVerdict {
        if self.outcome(stats).may_be_true {
            FileVerdict::MayInclude
        } else {
            FileVerdict::DefinitelyExcluded
        }
    }
}

impl FilePredicate for [Predicate] {
    /// Implicit AND across the list; an empty list excludes nothing
    fn evaluate(&self, stats: &FileStats) -> FileVerdict {
        let excluded = self
            .iter()
            .any(|p| p.evaluate(stats) == FileVerdict::DefinitelyExcluded);
        if excluded {
            FileVerdict::DefinitelyExcluded
        } else {
            FileVerdict::MayInclude
        }
    }
}

/// Render a predicate list for error messages and logs
pub fn describe(predicates: &[Predicate]) -> String {
    predicates
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// Union of the columns read by all predicates
pub fn referenced_columns(predicates: &[Predicate]) -> BTreeSet<String> {
    predicates.iter().flat_map(|p| p.columns()).collect()
}

/// Record keys pinned by top-level `key = ..` / `key IN (..)` conjuncts
///
/// Returns None when no conjunct constrains the key field. With several
/// such conjuncts the row must satisfy all of them, so their key sets are
/// intersected.
pub fn exact_match_keys(predicates: &[Predicate], key_field: &str) -> Option<BTreeSet<String>> {
    let mut keys: Option<BTreeSet<String>> = None;

    for conjunct in predicates.iter().flat_map(|p| p.conjuncts()) {
        let matched: BTreeSet<String> = match conjunct {
            Predicate::Compare {
                column,
                op: CompareOp::Eq,
                value,
            } if column == key_field => scalar_as_key(value).into_iter().collect(),
            Predicate::In { column, values } if column == key_field => {
                values.iter().filter_map(scalar_as_key).collect()
            }
            _ => continue,
        };

        keys = Some(match keys {
            None => matched,
            Some(existing) => existing.intersection(&matched).cloned().collect(),
        });
    }

    keys
}

fn collect_conjuncts<'a>(predicate: &'a Predicate, out: &mut Vec<&'a Predicate>) {
    match predicate {
        Predicate::And(left, right) => {
            collect_conjuncts(left, out);
            collect_conjuncts(right, out);
        }
        other => out.push(other),
    }
}

fn scalar_as_key(value: &ScalarValue) -> Option<String> {
    if value.is_null() {
        return None;
    }
    match value {
        ScalarValue::Utf8(Some(s))
        | ScalarValue::LargeUtf8(Some(s))
        | ScalarValue::Utf8View(Some(s)) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Whether some row may evaluate to TRUE, and whether some row may
/// evaluate to FALSE. Rows evaluating to NULL count as neither.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Outcome {
    may_be_true: bool,
    may_be_false: bool,
}

impl Outcome {
    const UNKNOWN: Outcome = Outcome {
        may_be_true: true,
        may_be_false: true,
    };

    const NEVER: Outcome = Outcome {
        may_be_true: false,
        may_be_false: false,
    };
}

fn compare_outcome(stats: &ColumnStatistics, op: CompareOp, value: &ScalarValue) -> Outcome {
    // Comparing against NULL, or a column with no non-null rows, is never TRUE or FALSE
    if value.is_null() || !stats.may_contain_non_null() {
        return Outcome::NEVER;
    }

    let min = stats.min.as_ref().and_then(|m| compare_values(m, value));
    let max = stats.max.as_ref().and_then(|m| compare_values(m, value));

    // Each check answers "is it possible?"; an unknown bound means yes
    let min_lt = min.map_or(true, |o| o == Ordering::Less);
    let min_le = min.map_or(true, |o| o != Ordering::Greater);
    let max_gt = max.map_or(true, |o| o == Ordering::Greater);
    let max_ge = max.map_or(true, |o| o != Ordering::Less);
    let all_equal = min == Some(Ordering::Equal) && max == Some(Ordering::Equal);

    match op {
        CompareOp::Eq => Outcome {
            may_be_true: min_le && max_ge,
            may_be_false: !all_equal,
        },
        CompareOp::NotEq => Outcome {
            may_be_true: !all_equal,
            may_be_false: min_le && max_ge,
        },
        CompareOp::Lt => Outcome {
            may_be_true: min_lt,
            may_be_false: max_ge,
        },
        CompareOp::LtEq => Outcome {
            may_be_true: min_le,
            may_be_false: max_gt,
        },
        CompareOp::Gt => Outcome {
            may_be_true: max_gt,
            may_be_false: min_le,
        },
        CompareOp::GtEq => Outcome {
            may_be_true: max_ge,
            may_be_false: min_lt,
        },
    }
}

fn in_list_outcome(stats: &ColumnStatistics, values: &[ScalarValue]) -> Outcome {
    if !stats.may_contain_non_null() {
        return Outcome::NEVER;
    }

    let mut may_be_true = false;
    let mut may_be_false = true;
    let mut has_null = false;
    for value in values {
        if value.is_null() {
            has_null = true;
            continue;
        }
        let eq = compare_outcome(stats, CompareOp::Eq, value);
        may_be_true |= eq.may_be_true;
        may_be_false &= eq.may_be_false;
    }

    // A row missing from a list holding NULL evaluates to NULL, not FALSE
    Outcome {
        may_be_true,
        may_be_false: may_be_false && !has_null,
    }
}

/// Order two scalars, coercing integer widths and string flavors
///
/// None means the values can't be ordered (mismatched types, NaN), which
/// callers treat as "anything is possible".
pub fn compare_values(left: &ScalarValue, right: &ScalarValue) -> Option<Ordering> {
    if let (Some(l), Some(r)) = (scalar_to_i128(left), scalar_to_i128(right)) {
        return Some(l.cmp(&r));
    }
    if let (Some(l), Some(r)) = (scalar_to_str(left), scalar_to_str(right)) {
        return Some(l.cmp(r));
    }
    if let (Some(l), Some(r)) = (scalar_to_f64(left), scalar_to_f64(right)) {
        return l.partial_cmp(&r);
    }
    if left.data_type() == right.data_type() {
        return left.partial_cmp(right);
    }
    None
}

fn scalar_to_i128(value: &ScalarValue) -> Option<i128> {
    match value {
        ScalarValue::Int8(Some(v)) => Some(i128::from(*v)),
        ScalarValue::Int16(Some(v)) => Some(i128::from(*v)),
        ScalarValue::Int32(Some(v)) => Some(i128::from(*v)),
        ScalarValue::Int64(Some(v)) => Some(i128::from(*v)),
        ScalarValue::UInt8(Some(v)) => Some(i128::from(*v)),
        ScalarValue::UInt16(Some(v)) => Some(i128::from(*v)),
        ScalarValue::UInt32(Some(v)) => Some(i128::from(*v)),
        ScalarValue::UInt64(Some(v)) => Some(i128::from(*v)),
        _ => None,
    }
}

fn scalar_to_f64(value: &ScalarValue) -> Option<f64> {
    match value {
        ScalarValue::Float32(Some(v)) => Some(f64::from(*v)),
        ScalarValue::Float64(Some(v)) => Some(*v),
        other => scalar_to_i128(other).map(|v| v as f64),
    }
}

fn scalar_to_str(value: &ScalarValue) -> Option<&str> {
    match value {
        ScalarValue::Utf8(Some(s))
        | ScalarValue::LargeUtf8(Some(s))
        | ScalarValue::Utf8View(Some(s)) => Some(s.as_str()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn file(column: &str, stats: ColumnStatistics) -> FileStats {
        HashMap::from([(column.to_string(), stats)])
    }

    fn range(min: i64, max: i64, nulls: u64) -> ColumnStatistics {
        ColumnStatistics::new(Some(min.into()), Some(max.into()), Some(nulls))
    }

    fn verdict(predicate: Predicate, stats: &FileStats) -> FileVerdict {
        predicate.evaluate(stats)
    }

    use super::FileVerdict::{DefinitelyExcluded as Out, MayInclude as In};

    #[test]
    fn test_comparisons_against_range() {
        let stats = file("amount", range(50, 150, 0));

        assert_eq!(verdict(Predicate::gt("amount", 100i64), &stats), In);
        assert_eq!(verdict(Predicate::gt("amount", 150i64), &stats), Out);
        assert_eq!(verdict(Predicate::gt_eq("amount", 150i64), &stats), In);
        assert_eq!(verdict(Predicate::lt("amount", 50i64), &stats), Out);
        assert_eq!(verdict(Predicate::lt_eq("amount", 50i64), &stats), In);
        assert_eq!(verdict(Predicate::eq("amount", 10i64), &stats), Out);
        assert_eq!(verdict(Predicate::eq("amount", 75i64), &stats), In);
    }

    #[test]
    fn test_not_equal_only_prunes_constant_files() {
        let constant = file("status", ColumnStatistics::new(
            Some("shipped".into()),
            Some("shipped".into()),
            Some(0),
        ));
        assert_eq!(verdict(Predicate::not_eq("status", "shipped"), &constant), Out);
        assert_eq!(verdict(Predicate::not_eq("status", "pending"), &constant), In);

        let spread = file("amount", range(1, 9, 0));
        assert_eq!(verdict(Predicate::not_eq("amount", 5i64), &spread), In);
    }

    #[test]
    fn test_in_list() {
        let stats = file("amount", range(50, 150, 0));
        assert_eq!(verdict(Predicate::in_list("amount", [1i64, 2, 3]), &stats), Out);
        assert_eq!(verdict(Predicate::in_list("amount", [1i64, 100]), &stats), In);
        assert_eq!(verdict(Predicate::in_list("amount", Vec::<i64>::new()), &stats), Out);

        let constant = file("amount", range(7, 7, 0));
        let not_in = Predicate::in_list("amount", [7i64, 8]).not();
        assert_eq!(verdict(not_in, &constant), Out);
    }

    #[test]
    fn test_null_handling() {
        let all_null = file(
            "email",
            ColumnStatistics::new(None, None, Some(10)).with_value_count(10),
        );
        assert_eq!(verdict(Predicate::is_null("email"), &all_null), In);
        assert_eq!(verdict(Predicate::is_not_null("email"), &all_null), Out);
        assert_eq!(verdict(Predicate::eq("email", "a@b.c"), &all_null), Out);

        let no_nulls = file("email", ColumnStatistics::new(
            Some("a".into()),
            Some("z".into()),
            Some(0),
        ));
        assert_eq!(verdict(Predicate::is_null("email"), &no_nulls), Out);
        assert_eq!(verdict(Predicate::is_not_null("email"), &no_nulls), In);

        // Null count unknown: can't rule out nulls
        let unknown = file(
            "email",
            ColumnStatistics::new(Some("a".into()), Some("z".into()), None),
        );
        assert_eq!(verdict(Predicate::is_null("email"), &unknown), In);
    }

    #[test]
    fn test_not_respects_null_rows() {
        // Every non-null value is < 10, but nulls exist: NOT(x < 10) is never TRUE
        let stats = file("x", range(1, 5, 3));
        assert_eq!(verdict(Predicate::lt("x", 10i64).not(), &stats), Out);
        assert_eq!(verdict(Predicate::lt("x", 3i64).not(), &stats), In);
    }

    #[test]
    fn test_and_or() {
        let stats = file("x", range(10, 20, 0));
        let miss = Predicate::gt("x", 30i64);
        let hit = Predicate::lt("x", 15i64);

        assert_eq!(verdict(miss.clone().and(hit.clone()), &stats), Out);
        assert_eq!(verdict(miss.clone().or(hit.clone()), &stats), In);
        assert_eq!(verdict(miss.clone().or(miss.clone()), &stats), Out);
        assert_eq!(verdict(miss.or(hit).not(), &stats), In);
    }

    #[test]
    fn test_unknown_columns_and_types_keep_file() {
        let stats = file("x", range(10, 20, 0));
        assert_eq!(verdict(Predicate::eq("y", 100i64), &stats), In);
        // String literal against integer stats can't be ordered
        assert_eq!(verdict(Predicate::eq("x", "100"), &stats), In);

        let missing_bounds = file("x", ColumnStatistics::new(None, Some(20i64.into()), Some(0)));
        assert_eq!(verdict(Predicate::lt("x", 0i64), &missing_bounds), In);
    }

    #[test]
    fn test_integer_widths_coerce() {
        let stats = file("x", range(10, 20, 0));
        assert_eq!(verdict(Predicate::eq("x", 30i32), &stats), Out);
        assert_eq!(verdict(Predicate::eq("x", 15u8), &stats), In);
        assert_eq!(verdict(Predicate::gt("x", 19.5f64), &stats), In);
        assert_eq!(verdict(Predicate::gt("x", 20.5f64), &stats), Out);
    }

    #[test]
    fn test_null_literal_never_matches() {
        let stats = file("x", range(10, 20, 0));
        assert_eq!(verdict(Predicate::eq("x", ScalarValue::Int64(None)), &stats), Out);
    }

    #[test]
    fn test_slice_is_conjunction() {
        let stats = file("x", range(10, 20, 0));
        let filters = vec![Predicate::gt("x", 5i64), Predicate::lt("x", 8i64)];
        assert_eq!(filters.as_slice().evaluate(&stats), Out);
        let empty: Vec<Predicate> = vec![];
        assert_eq!(empty.as_slice().evaluate(&stats), In);
    }

    #[test]
    fn test_exact_match_keys() {
        let filters = vec![
            Predicate::eq("key", "k1").and(Predicate::gt("amount", 5i64)),
            Predicate::gt("ts", 0i64),
        ];
        let keys = exact_match_keys(&filters, "key").unwrap();
        assert_eq!(keys.into_iter().collect::<Vec<_>>(), vec!["k1".to_string()]);

        let filters = vec![
            Predicate::in_list("key", ["k1", "k2", "k3"]),
            Predicate::in_list("key", ["k2", "k3", "k4"]),
        ];
        let keys = exact_match_keys(&filters, "key").unwrap();
        assert_eq!(keys.len(), 2);

        // Under OR the key is not pinned
        let filters = vec![Predicate::eq("key", "k1").or(Predicate::eq("other", 1i64))];
        assert!(exact_match_keys(&filters, "key").is_none());
    }

    #[test]
    fn test_columns_and_display() {
        let p = Predicate::eq("a", 1i64).and(Predicate::is_null("b").not());
        let cols: Vec<_> = p.columns().into_iter().collect();
        assert_eq!(cols, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(p.to_string(), "(a = 1 AND NOT (b IS NULL))");
        let list = [Predicate::eq("a", 1i64), Predicate::gt("b", 2i64)];
        assert_eq!(describe(&list), "a = 1 AND b > 2");
    }
}
