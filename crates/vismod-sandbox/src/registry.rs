//! Instance registry: constructed module instances grouped by instance id.
//!
//! One logical instance id owns one instance per non-excluded matrix cell.
//! Groups are only ever touched from the runtime's dispatch loop.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::error::SandboxError;
use crate::loader::LoadedClass;
use crate::matrix::{CellPlacement, MatrixLayout};
use crate::module::{FrameTick, ModuleInstance, Presentation};

// ─── Cell entry ─────────────────────────────────────────────────────────

/// One constructed instance bound to a grid cell.
pub struct CellInstance {
    pub cell: CellPlacement,
    pub presentation: Presentation,
    instance: Box<dyn ModuleInstance>,
}

impl CellInstance {
    pub fn new(cell: CellPlacement, instance: Box<dyn ModuleInstance>) -> Self {
        Self {
            cell,
            presentation: Presentation::default(),
            instance,
        }
    }

    pub fn accepts_frames(&self) -> bool {
        self.instance.accepts_frames()
    }

    pub async fn on_frame(&mut self, tick: FrameTick) -> Result<(), SandboxError> {
        self.instance.on_frame(tick).await
    }
}

// ─── Group ──────────────────────────────────────────────────────────────

/// All instances owned by one logical instance id.
pub struct InstanceGroup {
    instance_id: String,
    class: Arc<LoadedClass>,
    layout: MatrixLayout,
    cells: Vec<CellInstance>,
}

impl InstanceGroup {
    pub fn new(
        instance_id: impl Into<String>,
        class: Arc<LoadedClass>,
        layout: MatrixLayout,
        cells: Vec<CellInstance>,
    ) -> Self {
        Self {
            instance_id: instance_id.into(),
            class,
            layout,
            cells,
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn class(&self) -> &Arc<LoadedClass> {
        &self.class
    }

    pub fn layout(&self) -> &MatrixLayout {
        &self.layout
    }

    pub fn cells(&self) -> &[CellInstance] {
        &self.cells
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Run `method` on every cell, one after another.
    ///
    /// Declared methods go to the instance; built-ins not overridden by the
    /// class go to the cell's presentation state. The first failure stops
    /// the sweep.
    pub async fn invoke(&mut self, method: &str, options: &Value) -> Result<(), SandboxError> {
        let declared = self.class.is_declared(method);
        for cell in &mut self.cells {
            if declared {
                cell.instance.call(method, options).await?;
            } else if !cell.presentation.apply(method, options)? {
                return Err(SandboxError::UnknownMethod {
                    module_type: self.class.module_type().to_string(),
                    method: method.to_string(),
                });
            }
        }
        Ok(())
    }

    pub(crate) fn cell_mut(&mut self, index: usize) -> Option<&mut CellInstance> {
        self.cells.iter_mut().find(|c| c.cell.index == index)
    }

    /// Destroy every instance, logging and swallowing individual failures.
    ///
    /// Returns the number of instances whose `destroy` failed.
    pub fn destroy_all(&mut self) -> usize {
        let mut failures = 0;
        for mut cell in self.cells.drain(..) {
            if let Err(e) = cell.instance.destroy() {
                failures += 1;
                tracing::warn!(
                    instance_id = %self.instance_id,
                    cell = cell.cell.index,
                    "instance destroy failed: {e}"
                );
            }
        }
        failures
    }
}

// ─── Registry ───────────────────────────────────────────────────────────

#[derive(Default)]
pub struct InstanceRegistry {
    groups: HashMap<String, InstanceGroup>,
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a group, destroying any group previously under that id.
    pub fn insert(&mut self, group: InstanceGroup) {
        if let Some(mut previous) = self.groups.insert(group.instance_id.clone(), group) {
            previous.destroy_all();
        }
    }

    pub fn get(&self, instance_id: &str) -> Option<&InstanceGroup> {
        self.groups.get(instance_id)
    }

    pub fn get_mut(&mut self, instance_id: &str) -> Option<&mut InstanceGroup> {
        self.groups.get_mut(instance_id)
    }

    pub fn contains(&self, instance_id: &str) -> bool {
        self.groups.contains_key(instance_id)
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Total number of live instances across all groups.
    pub fn instance_count(&self) -> usize {
        self.groups.values().map(InstanceGroup::len).sum()
    }

    /// Destroy and remove one group. Returns `false` if it did not exist.
    pub fn destroy_instance(&mut self, instance_id: &str) -> bool {
        match self.groups.remove(instance_id) {
            Some(mut group) => {
                let failures = group.destroy_all();
                tracing::debug!(instance_id = %instance_id, failures, "instance group destroyed");
                true
            }
            None => false,
        }
    }

    /// Destroy every group. Returns how many groups were removed.
    pub fn destroy_all(&mut self) -> usize {
        let count = self.groups.len();
        for (_, mut group) in self.groups.drain() {
            group.destroy_all();
        }
        count
    }

    pub(crate) fn cell_mut(&mut self, instance_id: &str, index: usize) -> Option<&mut CellInstance> {
        self.groups.get_mut(instance_id)?.cell_mut(index)
    }
}
