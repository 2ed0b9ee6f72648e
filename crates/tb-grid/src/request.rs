//! The task definition a worker brings to the buffet.

use serde::{Deserialize, Serialize};

use tb_types::{GridError, ParamValue};

use crate::grid::ParamGrid;

/// Parameter names and values as supplied by a worker, before the grid is
/// built. Every worker sharing a buffet should bring the same request;
/// differences are reconciled by the store's merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridRequest {
    pub names: Vec<String>,
    pub values: Vec<Vec<ParamValue>>,
    /// Expand the Cartesian product instead of zipping the value lists.
    pub cartesian: bool,
}

impl GridRequest {
    pub fn new(cartesian: bool) -> Self {
        Self {
            names: Vec::new(),
            values: Vec::new(),
            cartesian,
        }
    }

    /// Zip mode request.
    pub fn direct() -> Self {
        Self::new(false)
    }

    /// Cartesian mode request.
    pub fn cartesian() -> Self {
        Self::new(true)
    }

    pub fn from_parts(names: Vec<String>, values: Vec<Vec<ParamValue>>, cartesian: bool) -> Self {
        Self {
            names,
            values,
            cartesian,
        }
    }

    pub fn param<V: Into<ParamValue>>(
        mut self,
        name: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.names.push(name.into());
        self.values
            .push(values.into_iter().map(Into::into).collect());
        self
    }

    pub fn has_param(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    pub fn build(&self) -> Result<ParamGrid, GridError> {
        ParamGrid::build(self.names.clone(), self.values.clone(), self.cartesian)
    }
}
