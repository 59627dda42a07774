use std::{collections::BTreeMap, sync::Arc, time::Duration};

use cgmath::{Deg, Matrix4, Point3, Vector3};
use log::{debug, info, warn};
use thiserror::Error;

use super::world::DemoWorld;
use crate::{
    core::MtResource,
    simulation_state::{
        geometry::{DummyDesc, ModelLayout, ToolTransforms},
        structures::{BlockGrid, DamageLog},
        targeting::{FactionTable, OwnerId, StructureFlags},
        tools::{DefinitionError, TickOutcome, ToolDefinitions, ToolError, ToolMode, ToolSpawn},
        voxels::{DirtyRange, FieldId, VoxelCell, VoxelField, FULL_DENSITY},
        EntityId, HostServices, SimulationConfig, SimulationContext,
    },
};

/// Definitions of the demo drill, a drill/grinder block tool.
pub const DRILL_DEFINITIONS: &str = include_str!("../../demos/drill.json");

pub const TOOL_ID: EntityId = 7;
pub const FIELD_ID: FieldId = 1000;
pub const WALL_ID: EntityId = 2000;
pub const CRATE_ID: EntityId = 3000;

const TOOL_GRID: EntityId = 1;
const TOOL_OWNER: OwnerId = 1;
const WALL_OWNER: OwnerId = 99;
const TOOL_POWER: f32 = 5.0;
const ORE_MATERIAL: u8 = 3;
const ORE_CHANCE: f32 = 0.1;
const DIG_EVERY: u64 = 10;
const DIG_STEP: f32 = 0.25;
const JOB_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum SceneError {
    #[error("Bad tool definitions: {0}")]
    Definition(#[from] DefinitionError),
    #[error("Couldn't create the tool: {0}")]
    Tool(#[from] ToolError),
}

/// What a scene run did to the world.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SceneSummary {
    pub ticks: u64,
    pub solid_before: usize,
    pub solid_after: usize,
    pub harvested: BTreeMap<u8, f32>,
    pub regions_changed: usize,
    pub entities_damaged: usize,
    pub blocks_worked: usize,
    pub settled_batches: u64,
    pub jobs_completed: u64,
}

/// A drill boring into a rock field next to an enemy wall, driven by hand.
///
/// The tool starts at the origin facing `-Z`, inside a 16³ field of stone with
/// ore veins. A loose crate sits six metres down the bore. The wall stands off
/// to the `+X` side and only the grinder mode is pointed at it.
pub struct DemoScene {
    context: SimulationContext,
    world: DemoWorld,
    factions: FactionTable,
    damage: DamageLog,
    regions: Vec<(FieldId, DirtyRange)>,
    field: MtResource<VoxelField>,
    wall: Arc<BlockGrid>,
    depth: f32,
}

impl DemoScene {
    /// Builds the scene.
    ///
    /// # Arguments
    /// * `config` - Simulation settings, a zero worker count runs jobs inline
    /// * `definitions` - Definitions of the tool to place
    /// * `seed` - Seed of the ore veins
    pub fn new(
        config: SimulationConfig,
        definitions: &ToolDefinitions,
        seed: u64,
    ) -> Result<Self, SceneError> {
        let mut context = SimulationContext::new(config);
        let mut world = DemoWorld::new();

        let field = context.add_field(rock_field(seed));
        world.add_field(field.clone(), None);

        let wall = Arc::new(BlockGrid::new(
            WALL_ID,
            Matrix4::from_translation(Vector3::new(3.0, -1.0, -1.0)),
            (0..3)
                .flat_map(|y| (0..3).map(move |z| Point3::new(0, y, z)))
                .collect(),
        ));
        world.add_structure(wall.clone(), Some(WALL_OWNER), StructureFlags::default());
        world.add_destructible(
            CRATE_ID,
            None,
            Point3::new(0.0, 0.0, -6.0),
            Vector3::new(0.5, 0.5, 0.5),
            false,
        );

        context.add_tool(tool_spawn(), definitions)?;
        if let Some(tool) = context.tool_mut(TOOL_ID) {
            tool.set_power_available(TOOL_POWER, 0);
        }

        Ok(DemoScene {
            context,
            world,
            factions: FactionTable::new(),
            damage: DamageLog::default(),
            regions: Vec::new(),
            field,
            wall,
            depth: 0.0,
        })
    }

    pub fn context(&self) -> &SimulationContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut SimulationContext {
        &mut self.context
    }

    pub fn field(&self) -> &MtResource<VoxelField> {
        &self.field
    }

    pub fn wall(&self) -> &Arc<BlockGrid> {
        &self.wall
    }

    pub fn damage(&self) -> &DamageLog {
        &self.damage
    }

    pub fn regions(&self) -> &[(FieldId, DirtyRange)] {
        &self.regions
    }

    /// Runs one tick with the scene as host.
    pub fn step(&mut self) -> BTreeMap<EntityId, TickOutcome> {
        let mut host = HostServices {
            spatial: &self.world,
            factions: &self.factions,
            damage: &mut self.damage,
            regions: &mut self.regions,
        };
        self.context.tick(&mut host)
    }

    /// Waits for every job in flight.
    pub fn finish(&mut self) -> bool {
        let mut host = HostServices {
            spatial: &self.world,
            factions: &self.factions,
            damage: &mut self.damage,
            regions: &mut self.regions,
        };
        self.context.finish_jobs(&mut host, JOB_TIMEOUT)
    }

    fn place_tool(&mut self, world: Matrix4<f32>) {
        if let Some(tool) = self.context.tool_mut(TOOL_ID) {
            tool.set_transforms(ToolTransforms::at(world));
        }
    }

    /// Turns the tool to face the wall and switches it to grinding.
    pub fn aim_at_wall(&mut self) {
        let tick = self.context.tick_count();
        self.place_tool(Matrix4::from_angle_y(Deg(-90.0)));
        if let Some(tool) = self.context.tool_mut(TOOL_ID) {
            tool.set_mode(ToolMode::Grind, tick);
        }
    }

    /// Drills for `drill_ticks`, then grinds the wall for `grind_ticks`.
    pub fn run(&mut self, drill_ticks: u64, grind_ticks: u64) -> SceneSummary {
        let solid_before = self.field.get().solid_count();

        self.step();
        let tick = self.context.tick_count();
        let activated = self
            .context
            .tool_mut(TOOL_ID)
            .is_some_and(|tool| tool.set_activated(true, tick));
        if !activated {
            warn!("Demo tool refused to activate");
        }

        for _ in 0..drill_ticks {
            self.step();
            if self.context.tick_count() % DIG_EVERY == 0 {
                self.depth += DIG_STEP;
                self.place_tool(Matrix4::from_translation(Vector3::new(0.0, 0.0, -self.depth)));
            }
        }
        if !self.finish() {
            warn!("Drill jobs didn't finish");
        }
        info!(
            "Drilled {:.2}m, {} cell(s) left of {}",
            self.depth,
            self.field.get().solid_count(),
            solid_before
        );

        self.aim_at_wall();
        for _ in 0..grind_ticks {
            self.step();
        }
        if !self.finish() {
            warn!("Grind jobs didn't finish");
        }

        let tick = self.context.tick_count();
        if let Some(tool) = self.context.tool_mut(TOOL_ID) {
            tool.set_activated(false, tick);
        }
        self.step();

        let (harvested, settled_batches) = self
            .context
            .tool(TOOL_ID)
            .map(|tool| (tool.harvested().clone(), tool.batch().settled_batches()))
            .unwrap_or_default();
        let summary = SceneSummary {
            ticks: self.context.tick_count(),
            solid_before,
            solid_after: self.field.get().solid_count(),
            harvested,
            regions_changed: self.regions.len(),
            entities_damaged: self.damage.entities.len(),
            blocks_worked: self.damage.blocks.len(),
            settled_batches,
            jobs_completed: self.context.dispatcher().jobs_completed(),
        };
        debug!("{:?}", summary);
        summary
    }
}

/// The demo tool: a block tool on grid `1` with its muzzle a metre ahead.
pub fn tool_spawn() -> ToolSpawn {
    ToolSpawn {
        id: TOOL_ID,
        owner: Some(TOOL_OWNER),
        parent: TOOL_GRID,
        layout: ModelLayout {
            subparts: vec!["drill_head".to_string(), "grinder_disc".to_string()],
            dummies: vec![DummyDesc {
                name: "muzzle".to_string(),
                part: None,
                local: Matrix4::from_translation(Vector3::new(0.0, 0.0, -1.0)),
            }],
        },
        transforms: ToolTransforms::default(),
    }
}

/// Stone with ore veins, centred on the origin in `x` and `y` and reaching
/// from `z = -12` to `z = 3`.
fn rock_field(seed: u64) -> VoxelField {
    let mut rng = fastrand::Rng::with_seed(seed);
    let mut field = VoxelField::filled(
        FIELD_ID,
        Vector3::new(16, 16, 16),
        Matrix4::from_translation(Vector3::new(-8.0, -8.0, -12.0)),
        1,
    );
    for cell in field.bounds().cells() {
        if rng.f32() < ORE_CHANCE {
            field.set_cell(cell, VoxelCell::new(FULL_DENSITY, ORE_MATERIAL));
        }
    }
    field
}
