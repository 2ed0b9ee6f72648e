//! The buffet unit: one status per task plus the grid defining the tasks.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};

use tb_grid::ParamGrid;
use tb_types::{merge_error, BuffetError, BuffetResult, TaskParams, TaskStatus};

/// A task handed out by [`Buffet::claim_next`].
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimedTask {
    pub index: usize,
    pub params: TaskParams,
}

/// Status array and grid, persisted together as one generation.
///
/// A buffet written by an old tool may lack its grid; such a buffet can be
/// inspected and reset but not claimed from.
#[derive(Debug, Clone, PartialEq)]
pub struct Buffet {
    statuses: Vec<TaskStatus>,
    grid: Option<ParamGrid>,
}

impl Buffet {
    /// A fresh buffet with every task available.
    pub fn new(grid: ParamGrid) -> Self {
        Self {
            statuses: vec![TaskStatus::Available; grid.nvals()],
            grid: Some(grid),
        }
    }

    pub fn from_parts(statuses: Vec<TaskStatus>, grid: Option<ParamGrid>) -> BuffetResult<Self> {
        if let Some(grid) = &grid {
            if grid.nvals() != statuses.len() {
                return Err(BuffetError::Codec {
                    message: format!(
                        "status array has {} entries but the grid defines {} tasks",
                        statuses.len(),
                        grid.nvals()
                    ),
                });
            }
        }
        Ok(Self { statuses, grid })
    }

    pub fn statuses(&self) -> &[TaskStatus] {
        &self.statuses
    }

    pub fn grid(&self) -> Option<&ParamGrid> {
        self.grid.as_ref()
    }

    pub fn len(&self) -> usize {
        self.statuses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statuses.is_empty()
    }

    fn require_grid(&self) -> BuffetResult<&ParamGrid> {
        self.grid.as_ref().ok_or_else(|| BuffetError::UninitializedGrid {
            message: "buffet has no parameter grid, cannot hand out tasks".to_string(),
        })
    }

    fn check_index(&self, index: usize) -> BuffetResult<()> {
        if index >= self.statuses.len() {
            return Err(BuffetError::TaskIndexOutOfRange {
                index,
                len: self.statuses.len(),
            });
        }
        Ok(())
    }

    /// Mark the lowest available task as running and return it.
    ///
    /// Returns `Ok(None)` once no task is available.
    pub fn claim_next(&mut self) -> BuffetResult<Option<ClaimedTask>> {
        let grid = self.require_grid()?;

        let Some(index) = self
            .statuses
            .iter()
            .position(|status| *status == TaskStatus::Available)
        else {
            return Ok(None);
        };

        let params = grid.task(index).ok_or(BuffetError::TaskIndexOutOfRange {
            index,
            len: grid.nvals(),
        })?;
        self.statuses[index] = TaskStatus::Running;
        Ok(Some(ClaimedTask { index, params }))
    }

    /// Record the outcome of task `index`.
    pub fn complete(&mut self, index: usize, status: TaskStatus) -> BuffetResult<()> {
        if !status.is_outcome() {
            return Err(BuffetError::invalid_status(status));
        }
        self.check_index(index)?;
        self.statuses[index] = status;
        Ok(())
    }

    /// Record the outcome of a previously claimed task.
    ///
    /// If another worker merged a new grid since the claim, the task is
    /// looked up again by its parameters. Returns the index written.
    pub fn complete_claimed(
        &mut self,
        claimed: &ClaimedTask,
        status: TaskStatus,
    ) -> BuffetResult<usize> {
        let index = match self.grid.as_ref() {
            Some(grid) if grid.task(claimed.index).as_ref() != Some(&claimed.params) => {
                let moved = grid.position(&claimed.params).ok_or_else(|| {
                    merge_error!(
                        "claimed task {} {} no longer exists in the buffet",
                        claimed.index,
                        claimed.params
                    )
                })?;
                warn!("Task {} moved to index {} after a merge", claimed.index, moved);
                moved
            }
            _ => claimed.index,
        };
        self.complete(index, status)?;
        Ok(index)
    }

    /// Move every task in status `from` to status `to`; returns the indices
    /// that changed.
    pub fn reset(&mut self, from: TaskStatus, to: TaskStatus) -> BuffetResult<Vec<usize>> {
        if !to.is_outcome() {
            return Err(BuffetError::invalid_status(to));
        }
        let mut changed = Vec::new();
        for (index, status) in self.statuses.iter_mut().enumerate() {
            if *status == from && from != to {
                *status = to;
                changed.push(index);
            }
        }
        Ok(changed)
    }

    pub fn task(&self, index: usize) -> BuffetResult<TaskParams> {
        self.check_index(index)?;
        let grid = self.require_grid()?;
        grid.task(index).ok_or(BuffetError::TaskIndexOutOfRange {
            index,
            len: grid.nvals(),
        })
    }

    pub fn summary(&self) -> BuffetSummary {
        let mut summary = BuffetSummary {
            total: self.statuses.len(),
            ..BuffetSummary::default()
        };
        for status in &self.statuses {
            match status {
                TaskStatus::Available => summary.available += 1,
                TaskStatus::Running => summary.running += 1,
                TaskStatus::Success => summary.success += 1,
                TaskStatus::Failed => summary.failed += 1,
            }
        }
        summary
    }
}

/// Task counts per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuffetSummary {
    pub available: usize,
    pub running: usize,
    pub success: usize,
    pub failed: usize,
    pub total: usize,
}

impl BuffetSummary {
    pub fn count(&self, status: TaskStatus) -> usize {
        match status {
            TaskStatus::Available => self.available,
            TaskStatus::Running => self.running,
            TaskStatus::Success => self.success,
            TaskStatus::Failed => self.failed,
        }
    }

    /// Nothing left to claim and nothing in flight.
    pub fn is_drained(&self) -> bool {
        self.available == 0 && self.running == 0
    }
}

impl fmt::Display for BuffetSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} tasks finished, {} tasks failed, {} tasks running, \
             and {} tasks available out of a total of {} tasks",
            self.success, self.failed, self.running, self.available, self.total
        )
    }
}

/// Result of reconciling a persisted buffet with a requested grid.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome {
    /// The grids are structurally equal; nothing to write.
    Unchanged,
    /// A new generation over the requested grid, statuses carried over.
    Merged(Buffet),
}

/// Reconcile `saved` with the `requested` grid.
///
/// Every saved task must reappear in the requested grid; its status is
/// copied to the matching index and every new task starts available.
///
/// A buffet saved without a grid never takes on the requested one. With
/// merging disabled that is a configuration error; otherwise it is left
/// unchanged and stays unclaimable.
pub fn merge(
    saved: &Buffet,
    requested: &ParamGrid,
    allow_merge: bool,
) -> BuffetResult<MergeOutcome> {
    let Some(saved_grid) = saved.grid() else {
        if !allow_merge {
            return Err(BuffetError::Configuration {
                message: "persisted buffet has no grid to compare with the requested parameters"
                    .to_string(),
                saved: None,
                requested: Some(requested.to_string()),
            });
        }
        warn!("Buffet was saved without a grid, new tasks cannot be launched from it");
        return Ok(MergeOutcome::Unchanged);
    };

    if saved_grid == requested {
        return Ok(MergeOutcome::Unchanged);
    }

    if !allow_merge {
        return Err(BuffetError::Configuration {
            message: "persisted buffet differs from the requested parameters \
                      and merging is disabled"
                .to_string(),
            saved: Some(saved_grid.to_string()),
            requested: Some(requested.to_string()),
        });
    }

    info!(
        "Merging buffet of {} tasks into a new grid of {} tasks",
        saved_grid.nvals(),
        requested.nvals()
    );

    let mut statuses = vec![TaskStatus::Available; requested.nvals()];
    for (saved_index, saved_params) in saved_grid.iter().enumerate() {
        let Some(new_index) = requested.position(&saved_params) else {
            return Err(merge_error!(
                "unable to find a match for saved task {saved_index} {saved_params} \
                 in the requested grid"
            ));
        };
        debug!("Saved task {} matches requested task {}", saved_index, new_index);
        statuses[new_index] = saved.statuses[saved_index];
    }

    Ok(MergeOutcome::Merged(Buffet {
        statuses,
        grid: Some(requested.clone()),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tb_grid::GridRequest;

    fn grid(a: &[i64], b: &[i64]) -> ParamGrid {
        GridRequest::cartesian()
            .param("a", a.to_vec())
            .param("b", b.to_vec())
            .build()
            .unwrap()
    }

    fn assert_counts_add_up(buffet: &Buffet) {
        let s = buffet.summary();
        assert_eq!(s.available + s.running + s.success + s.failed, s.total);
        assert_eq!(s.total, buffet.len());
    }

    #[test]
    fn claims_in_index_order_until_drained() {
        let mut buffet = Buffet::new(grid(&[0, 1], &[2, 3]));
        let mut seen = Vec::new();
        while let Some(task) = buffet.claim_next().unwrap() {
            assert_counts_add_up(&buffet);
            seen.push(task.index);
        }
        assert_eq!(seen, vec![0, 1, 2, 3]);
        assert_eq!(buffet.summary().running, 4);
        assert!(buffet.claim_next().unwrap().is_none());
    }

    #[test]
    fn claim_returns_parameters() {
        let mut buffet = Buffet::new(grid(&[0, 1], &[2, 3]));
        buffet.claim_next().unwrap();
        let second = buffet.claim_next().unwrap().unwrap();
        assert_eq!(second.index, 1);
        assert_eq!(second.params.get_i64("a"), Some(0));
        assert_eq!(second.params.get_i64("b"), Some(3));
    }

    #[test]
    fn complete_reopens_or_finishes_tasks() {
        let mut buffet = Buffet::new(grid(&[0, 1], &[2]));
        let first = buffet.claim_next().unwrap().unwrap();
        buffet.complete(first.index, TaskStatus::Available).unwrap();
        assert_eq!(buffet.claim_next().unwrap().unwrap().index, 0);
        buffet.complete(0, TaskStatus::Success).unwrap();
        buffet.complete(1, TaskStatus::Failed).unwrap();
        let summary = buffet.summary();
        assert_eq!(summary.success, 1);
        assert_eq!(summary.failed, 1);
        assert!(summary.is_drained());
        assert_counts_add_up(&buffet);
    }

    #[test]
    fn complete_rejects_running_and_bad_index() {
        let mut buffet = Buffet::new(grid(&[0], &[1]));
        assert!(matches!(
            buffet.complete(0, TaskStatus::Running),
            Err(BuffetError::Status { .. })
        ));
        assert!(matches!(
            buffet.complete(5, TaskStatus::Success),
            Err(BuffetError::TaskIndexOutOfRange { index: 5, len: 1 })
        ));
    }

    #[test]
    fn complete_claimed_follows_merged_grid() {
        let mut saved = Buffet::new(grid(&[0, 1], &[5]));
        let claimed = saved.claim_next().unwrap().unwrap(); // a=0 at index 0
        let MergeOutcome::Merged(mut merged) = merge(&saved, &grid(&[1, 0], &[5]), true).unwrap()
        else {
            panic!("expected a merged buffet");
        };
        assert_eq!(merged.complete_claimed(&claimed, TaskStatus::Success).unwrap(), 1);
        assert_eq!(merged.statuses()[1], TaskStatus::Success);
        assert_eq!(merged.statuses()[0], TaskStatus::Available);

        let unchanged = saved.complete_claimed(&claimed, TaskStatus::Failed).unwrap();
        assert_eq!(unchanged, 0);
    }

    #[test]
    fn claim_without_grid_is_uninitialized() {
        let mut legacy = Buffet::from_parts(vec![TaskStatus::Available; 2], None).unwrap();
        assert!(matches!(
            legacy.claim_next(),
            Err(BuffetError::UninitializedGrid { .. })
        ));
        // Inspection and reset still work.
        assert_eq!(legacy.summary().available, 2);
        assert!(legacy.reset(TaskStatus::Available, TaskStatus::Failed).is_ok());
    }

    #[test]
    fn from_parts_rejects_size_mismatch() {
        let statuses = vec![TaskStatus::Available; 3];
        let result = Buffet::from_parts(statuses, Some(grid(&[0, 1], &[2, 3])));
        assert!(matches!(result, Err(BuffetError::Codec { .. })));
    }

    #[test]
    fn reset_moves_matching_statuses() {
        let mut buffet = Buffet::new(grid(&[0, 1, 2], &[0]));
        buffet.complete(0, TaskStatus::Failed).unwrap();
        buffet.complete(2, TaskStatus::Failed).unwrap();
        buffet.claim_next().unwrap();
        let changed = buffet.reset(TaskStatus::Failed, TaskStatus::Available).unwrap();
        assert_eq!(changed, vec![0, 2]);
        assert_eq!(buffet.summary().running, 1);
        assert!(buffet.reset(TaskStatus::Failed, TaskStatus::Running).is_err());
    }

    #[test]
    fn merge_identical_is_noop() {
        let mut saved = Buffet::new(grid(&[0, 1], &[2, 3]));
        saved.complete(2, TaskStatus::Success).unwrap();
        let outcome = merge(&saved, &grid(&[0, 1], &[2, 3]), false).unwrap();
        assert_eq!(outcome, MergeOutcome::Unchanged);
    }

    #[test]
    fn merge_superset_carries_statuses() {
        let mut saved = Buffet::new(grid(&[0, 1], &[2, 3]));
        saved.complete(0, TaskStatus::Success).unwrap(); // (0,2)
        saved.complete(3, TaskStatus::Failed).unwrap(); // (1,3)
        saved.claim_next().unwrap(); // (0,3) running

        let requested = grid(&[0, 1, 2], &[2, 3]);
        let MergeOutcome::Merged(merged) = merge(&saved, &requested, true).unwrap() else {
            panic!("expected a merged buffet");
        };
        assert_eq!(merged.len(), 6);
        assert_eq!(
            merged.statuses(),
            &[
                TaskStatus::Success,
                TaskStatus::Running,
                TaskStatus::Available,
                TaskStatus::Failed,
                TaskStatus::Available,
                TaskStatus::Available,
            ]
        );
        assert_eq!(merged.grid(), Some(&requested));
    }

    #[test]
    fn merge_reordered_grid_follows_parameters() {
        let mut saved = Buffet::new(grid(&[0, 1], &[5]));
        saved.complete(1, TaskStatus::Success).unwrap(); // a=1
        let requested = grid(&[1, 0], &[5]);
        let MergeOutcome::Merged(merged) = merge(&saved, &requested, true).unwrap() else {
            panic!("expected a merged buffet");
        };
        assert_eq!(merged.statuses()[0], TaskStatus::Success);
        assert_eq!(merged.statuses()[1], TaskStatus::Available);
    }

    #[test]
    fn merge_disabled_reports_both_grids() {
        let saved = Buffet::new(grid(&[0, 1], &[2]));
        let err = merge(&saved, &grid(&[0, 1, 2], &[2]), false).unwrap_err();
        match err {
            BuffetError::Configuration {
                saved, requested, ..
            } => {
                assert!(saved.unwrap().contains("2 tasks"));
                assert!(requested.unwrap().contains("3 tasks"));
            }
            other => panic!("expected configuration error, got {other:?}"),
        }
    }

    #[test]
    fn merge_fails_when_saved_task_disappears() {
        let saved = Buffet::new(grid(&[0, 1], &[2]));
        let err = merge(&saved, &grid(&[1, 2], &[2]), true).unwrap_err();
        assert!(matches!(err, BuffetError::Merge { .. }));
    }

    #[test]
    fn legacy_buffet_never_takes_a_requested_grid() {
        let legacy =
            Buffet::from_parts(vec![TaskStatus::Success, TaskStatus::Available], None).unwrap();
        let requested = grid(&[0, 1], &[2]);
        match merge(&legacy, &requested, false).unwrap_err() {
            BuffetError::Configuration {
                saved, requested, ..
            } => {
                assert!(saved.is_none());
                assert!(requested.unwrap().contains("2 tasks"));
            }
            other => panic!("expected configuration error, got {other:?}"),
        }

        assert_eq!(
            merge(&legacy, &requested, true).unwrap(),
            MergeOutcome::Unchanged
        );
        assert!(matches!(
            legacy.clone().claim_next(),
            Err(BuffetError::UninitializedGrid { .. })
        ));
    }

    #[test]
    fn summary_display() {
        let mut buffet = Buffet::new(grid(&[0, 1, 2], &[0]));
        buffet.complete(0, TaskStatus::Success).unwrap();
        let text = buffet.summary().to_string();
        assert!(text.starts_with("1 tasks finished"));
        assert!(text.ends_with("total of 3 tasks"));
    }
}
