//! # Carve Task
//!
//! This module defines the `CarveTask` which carves one voxel field on a
//! worker thread. One task is dispatched per field per batch.

use log::trace;

use crate::{
    core::MtResource,
    simulation_state::{
        task_management::task::{CompletionContext, JobOutcome, Task, TaskResult},
        voxels::{carve, CarveParams, CarveReport, FieldId, VoxelField},
    },
};

/// A task that carves a voxel field asynchronously.
///
/// The field's write lock is held for the whole carve, which serialises
/// carving per field while jobs against other fields run in parallel.
pub struct CarveTask {
    /// Id the field was registered under when the job was dispatched
    field_id: FieldId,
    /// A thread-safe reference to the field to carve
    field: MtResource<VoxelField>,
    /// Shape, region and work snapshot in the field's frame
    params: CarveParams,
}

impl CarveTask {
    /// Creates a new carve task.
    ///
    /// # Arguments
    /// * `field_id` - Registry id of the field
    /// * `field` - A thread-safe reference to the field
    /// * `params` - What to carve, already in the field's local frame
    pub fn new(field_id: FieldId, field: MtResource<VoxelField>, params: CarveParams) -> Self {
        CarveTask {
            field_id,
            field,
            params,
        }
    }
}

impl Task for CarveTask {
    fn process(&self) -> Box<dyn TaskResult + Send> {
        let report = {
            let mut field = self.field.get_mut();
            carve(&mut field, &self.params)
        };

        Box::new(CarveTaskResult {
            field_id: self.field_id,
            field: self.field.clone(),
            report,
        })
    }
}

/// The result of a carve task.
pub struct CarveTaskResult {
    field_id: FieldId,
    field: MtResource<VoxelField>,
    report: CarveReport,
}

impl TaskResult for CarveTaskResult {
    fn handle_result(self: Box<Self>, ctx: &mut CompletionContext<'_>) -> JobOutcome {
        if !ctx.fields.is_live(self.field_id, &self.field) {
            trace!("Field {} went away before its carve completed", self.field_id);
            return JobOutcome::stale();
        }

        let report = self.report;
        JobOutcome {
            hit: report.hit(),
            dirty: report.dirty.map(|range| (self.field_id, range)),
            yields: report.yields,
            timings: report.timings,
            ..JobOutcome::default()
        }
    }

    /// The tool is gone but the cells really changed, so the field's owner
    /// still hears about it.
    fn discard(self: Box<Self>, ctx: &mut CompletionContext<'_>) {
        if let Some(range) = self.report.dirty {
            if ctx.fields.is_live(self.field_id, &self.field) {
                ctx.regions.region_changed(self.field_id, range);
            }
        }
    }
}
