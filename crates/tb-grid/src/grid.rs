//! The parameter grid: names, per-name value columns, index lookup.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use tb_types::{seq_eq, GridError, ParamValue, TaskParams};

/// Ordered parameter names with one value column per name.
///
/// All columns share one length, `nvals`, which is the number of tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamGrid {
    names: Vec<String>,
    values: Vec<Vec<ParamValue>>,
}

impl ParamGrid {
    /// Zip mode: column `k` holds the values of `names[k]` for every task.
    pub fn direct(names: Vec<String>, values: Vec<Vec<ParamValue>>) -> Result<Self, GridError> {
        let grid = Self { names, values };
        grid.validate()?;
        Ok(grid)
    }

    /// Cartesian mode: every combination of the given value lists.
    ///
    /// Nested-loop order: the first parameter is the outer loop and varies
    /// slowest, the last parameter varies fastest.
    pub fn cartesian(names: Vec<String>, values: Vec<Vec<ParamValue>>) -> Result<Self, GridError> {
        check_names(&names, values.len())?;
        check_finite(&names, &values)?;

        let mut combos: Vec<Vec<ParamValue>> = vec![Vec::new()];
        for axis in &values {
            let mut next = Vec::with_capacity(combos.len() * axis.len());
            for existing in &combos {
                for value in axis {
                    let mut combo = existing.clone();
                    combo.push(value.clone());
                    next.push(combo);
                }
            }
            combos = next;
        }

        // Transpose task rows into per-name columns.
        let mut columns: Vec<Vec<ParamValue>> = (0..names.len())
            .map(|_| Vec::with_capacity(combos.len()))
            .collect();
        for combo in combos {
            for (column, value) in columns.iter_mut().zip(combo) {
                column.push(value);
            }
        }

        Ok(Self {
            names,
            values: columns,
        })
    }

    /// Build in the mode selected by `cartesian`.
    pub fn build(
        names: Vec<String>,
        values: Vec<Vec<ParamValue>>,
        cartesian: bool,
    ) -> Result<Self, GridError> {
        if cartesian {
            Self::cartesian(names, values)
        } else {
            Self::direct(names, values)
        }
    }

    /// Check the shape invariants. Used after deserializing a grid.
    pub fn validate(&self) -> Result<(), GridError> {
        check_names(&self.names, self.values.len())?;
        let expected = self.values[0].len();
        for (name, column) in self.names.iter().zip(&self.values) {
            if column.len() != expected {
                return Err(GridError::LengthMismatch {
                    name: name.clone(),
                    expected,
                    actual: column.len(),
                });
            }
        }
        check_finite(&self.names, &self.values)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn values(&self) -> &[Vec<ParamValue>] {
        &self.values
    }

    pub fn nparams(&self) -> usize {
        self.names.len()
    }

    /// Number of tasks.
    pub fn nvals(&self) -> usize {
        self.values.first().map_or(0, Vec::len)
    }

    /// Parameter dictionary of task `index`.
    pub fn task(&self, index: usize) -> Option<TaskParams> {
        if index >= self.nvals() {
            return None;
        }
        Some(
            self.names
                .iter()
                .zip(&self.values)
                .map(|(name, column)| (name.clone(), column[index].clone()))
                .collect(),
        )
    }

    pub fn iter(&self) -> impl Iterator<Item = TaskParams> + '_ {
        (0..self.nvals()).filter_map(move |i| self.task(i))
    }

    /// First task index whose dictionary deep-equals `params`.
    pub fn position(&self, params: &TaskParams) -> Option<usize> {
        self.iter().position(|candidate| candidate == *params)
    }
}

fn check_names(names: &[String], sequences: usize) -> Result<(), GridError> {
    if names.is_empty() {
        return Err(GridError::Empty);
    }
    if names.len() != sequences {
        return Err(GridError::ArityMismatch {
            names: names.len(),
            sequences,
        });
    }
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name.as_str()) {
            return Err(GridError::DuplicateName { name: name.clone() });
        }
    }
    Ok(())
}

fn check_finite(names: &[String], values: &[Vec<ParamValue>]) -> Result<(), GridError> {
    for (name, column) in names.iter().zip(values) {
        if !column.iter().all(ParamValue::is_finite) {
            return Err(GridError::NonFinite { name: name.clone() });
        }
    }
    Ok(())
}

/// Structural equality: same names in the same order and deep-equal columns.
impl PartialEq for ParamGrid {
    fn eq(&self, other: &Self) -> bool {
        self.names == other.names
            && self.values.len() == other.values.len()
            && self
                .values
                .iter()
                .zip(&other.values)
                .all(|(a, b)| seq_eq(a, b))
    }
}

impl fmt::Display for ParamGrid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ParamGrid({} tasks", self.nvals())?;
        for (name, column) in self.names.iter().zip(&self.values) {
            write!(f, "; {name}: [")?;
            for (i, value) in column.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{value}")?;
            }
            write!(f, "]")?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn ints(list: &[i64]) -> Vec<ParamValue> {
        list.iter().copied().map(ParamValue::Int).collect()
    }

    fn pair(params: &TaskParams) -> (i64, i64) {
        (params.get_i64("a").unwrap(), params.get_i64("b").unwrap())
    }

    #[test]
    fn cartesian_last_parameter_varies_fastest() {
        let grid =
            ParamGrid::cartesian(names(&["a", "b"]), vec![ints(&[0, 1]), ints(&[2, 3])]).unwrap();
        assert_eq!(grid.nvals(), 4);
        let tasks: Vec<_> = grid.iter().map(|p| pair(&p)).collect();
        assert_eq!(tasks, vec![(0, 2), (0, 3), (1, 2), (1, 3)]);
    }

    #[test]
    fn cartesian_three_axes_count_and_corners() {
        let grid = ParamGrid::cartesian(
            names(&["x", "y", "z"]),
            vec![ints(&[1, 2, 3]), ints(&[10, 11]), ints(&[7, 8])],
        )
        .unwrap();
        assert_eq!(grid.nvals(), 12);
        assert_eq!(grid.nparams(), 3);
        let first = grid.task(0).unwrap();
        let second = grid.task(1).unwrap();
        let last = grid.task(11).unwrap();
        assert_eq!(first.get_i64("z"), Some(7));
        assert_eq!(second.get_i64("z"), Some(8));
        assert_eq!(second.get_i64("x"), Some(1));
        assert_eq!(last.get_i64("x"), Some(3));
        assert_eq!(last.get_i64("y"), Some(11));
    }

    #[test]
    fn cartesian_with_empty_axis_has_no_tasks() {
        let grid = ParamGrid::cartesian(names(&["a", "b"]), vec![ints(&[1, 2]), vec![]]).unwrap();
        assert_eq!(grid.nvals(), 0);
        assert!(grid.task(0).is_none());
    }

    #[test]
    fn direct_zips_columns() {
        let columns = vec![ints(&[0, 1, 2]), ints(&[5, 6, 7])];
        let grid = ParamGrid::direct(names(&["a", "b"]), columns).unwrap();
        assert_eq!(grid.nvals(), 3);
        assert_eq!(pair(&grid.task(1).unwrap()), (1, 6));
        assert!(grid.task(3).is_none());
    }

    #[test]
    fn direct_rejects_ragged_columns() {
        let columns = vec![ints(&[0, 1, 2]), ints(&[5, 6])];
        let err = ParamGrid::direct(names(&["a", "b"]), columns).unwrap_err();
        assert_eq!(
            err,
            GridError::LengthMismatch {
                name: "b".into(),
                expected: 3,
                actual: 2
            }
        );
    }

    #[test]
    fn shape_errors() {
        assert_eq!(ParamGrid::direct(vec![], vec![]).unwrap_err(), GridError::Empty);
        assert_eq!(
            ParamGrid::build(names(&["a"]), vec![ints(&[1]), ints(&[2])], true).unwrap_err(),
            GridError::ArityMismatch {
                names: 1,
                sequences: 2
            }
        );
        assert_eq!(
            ParamGrid::direct(names(&["a", "a"]), vec![ints(&[1]), ints(&[2])]).unwrap_err(),
            GridError::DuplicateName { name: "a".into() }
        );
    }

    #[test]
    fn non_finite_floats_are_rejected_in_both_modes() {
        let nested = ParamValue::Seq(vec![ParamValue::Int(1), ParamValue::Float(f64::NAN)]);
        assert_eq!(
            ParamGrid::direct(names(&["a", "b"]), vec![ints(&[1]), vec![nested]]).unwrap_err(),
            GridError::NonFinite { name: "b".into() }
        );
        let infinite = vec![ParamValue::Float(1.5), ParamValue::Float(f64::INFINITY)];
        assert_eq!(
            ParamGrid::cartesian(names(&["a", "x"]), vec![ints(&[1, 2]), infinite]).unwrap_err(),
            GridError::NonFinite { name: "x".into() }
        );
    }

    #[test]
    fn built_grid_survives_json() {
        let column = vec![
            ParamValue::Float(-0.25),
            ParamValue::Float(1.5e10),
            ParamValue::callable("model", vec![ParamValue::Float(0.5)]),
        ];
        let grid = ParamGrid::direct(names(&["lr"]), vec![column]).unwrap();
        let json = serde_json::to_string(&grid).unwrap();
        let back: ParamGrid = serde_json::from_str(&json).unwrap();
        assert!(back.validate().is_ok());
        assert_eq!(back, grid);
    }

    #[test]
    fn structural_equality() {
        let a = ParamGrid::direct(names(&["a"]), vec![ints(&[1, 2])]).unwrap();
        let same = ParamGrid::direct(
            names(&["a"]),
            vec![vec![ParamValue::Float(1.0), ParamValue::Int(2)]],
        )
        .unwrap();
        let renamed = ParamGrid::direct(names(&["b"]), vec![ints(&[1, 2])]).unwrap();
        let longer = ParamGrid::direct(names(&["a"]), vec![ints(&[1, 2, 3])]).unwrap();
        assert_eq!(a, same);
        assert_ne!(a, renamed);
        assert_ne!(a, longer);

        let ab = ParamGrid::direct(names(&["a", "b"]), vec![ints(&[1]), ints(&[2])]).unwrap();
        let ba = ParamGrid::direct(names(&["b", "a"]), vec![ints(&[2]), ints(&[1])]).unwrap();
        assert_ne!(ab, ba);
    }

    #[test]
    fn position_finds_deep_equal_task() {
        let grid =
            ParamGrid::cartesian(names(&["a", "b"]), vec![ints(&[0, 1]), ints(&[2, 3])]).unwrap();
        let wanted = TaskParams::new().with("b", 3).with("a", 1);
        assert_eq!(grid.position(&wanted), Some(3));
        let missing = TaskParams::new().with("a", 9).with("b", 3);
        assert_eq!(grid.position(&missing), None);
    }

    #[test]
    fn validate_catches_corrupt_deserialized_grid() {
        let json = r#"{"names":["a","b"],"values":[[{"Int":1}],[]]}"#;
        let grid: ParamGrid = serde_json::from_str(json).unwrap();
        assert!(grid.validate().is_err());
    }
}
