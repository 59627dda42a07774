//! # Tool Orchestrator
//!
//! One tick of one tool. The steps run in order and stop at the first gate the
//! tool fails:
//!
//! 1. Not functional: nothing to do. The first functional tick builds effects.
//! 2. Block tools re-check power on their power tick or when something changed.
//! 3. Unpowered, disabled (block tools) or not firing: stop.
//! 4. Place the volume and, when wanted, raycast along it.
//! 5. Not the mode's work tick, or a batch still in flight: stop.
//! 6. Tools caching their blocks re-work the cached set when a full work rate
//!    of it is still workable, and skip the rest.
//! 7. Query, filter and dispatch: instant damage for destructibles, a carve job
//!    per voxel field and a gather job per structure.
//!
//! Whenever a work tick ends with nothing in flight the hit outcome is
//! published right away, so tools doing only instant damage, or that stopped
//! firing, still update their `Hit` trigger.

use std::mem;

use log::trace;

use super::{tool::ToolInstance, ToolKind};
use crate::simulation_state::{
    geometry::{BroadPhase, EffectShape, EffectVolume, Location},
    structures::{DamageSink, GatherTask},
    targeting::{filter_candidates, FactionLookup, FilterRules, RayHit, SpatialQuery},
    task_management::{task::JobKind, JobDispatcher},
    voxels::{carve_region, CarveParams, CarveTask, FieldRegistry},
    SimulationConfig,
};

/// Damage dealt to each destructible per work tick.
pub const INSTANT_DAMAGE: f32 = 1.0;

/// Everything a tool's tick may read or hand work to.
pub struct UpdateContext<'a> {
    pub tick: u64,
    pub config: &'a SimulationConfig,
    pub fields: &'a FieldRegistry,
    pub dispatcher: &'a mut JobDispatcher,
    pub spatial: &'a dyn SpatialQuery,
    pub factions: &'a dyn FactionLookup,
    pub damage: &'a mut dyn DamageSink,
}

/// Where a tool's tick stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    NotFunctional,
    Unpowered,
    Disabled,
    /// Neither activated nor shooting.
    Idle,
    /// Not this mode's work tick.
    OffTick,
    /// The previous batch is still in flight.
    Busy,
    /// Cached blocks were worked again without a gather.
    Cached { blocks: usize },
    Dispatched {
        /// Destructibles damaged on the spot.
        instant: usize,
        /// Carve and gather jobs submitted.
        jobs: usize,
    },
}

/// Runs one tick of `tool`.
pub fn update_tool(tool: &mut ToolInstance, ctx: &mut UpdateContext<'_>) -> TickOutcome {
    let outcome = run_tool(tool, ctx);

    if tool.is_functional() && tool.is_work_tick(ctx.tick) && tool.batch.is_idle() {
        tool.finalize_hit(ctx.tick);
    }
    tool.track_av();
    outcome
}

fn run_tool(tool: &mut ToolInstance, ctx: &mut UpdateContext<'_>) -> TickOutcome {
    let tick = ctx.tick;
    if !tool.is_functional() {
        return TickOutcome::NotFunctional;
    }
    if !tool.is_functional_initialized() {
        tool.functional_init(tick);
    }

    let is_block = tool.kind() == ToolKind::Block;
    let interval = ctx.config.power_poll_interval.max(1);
    if is_block && (tool.needs_power_poll() || tick % interval == tool.id() % interval) {
        tool.poll_power(tick);
    }

    if !tool.is_powered() {
        return TickOutcome::Unpowered;
    }
    if is_block && !tool.is_enabled() {
        return TickOutcome::Disabled;
    }
    if !tool.is_firing() {
        return TickOutcome::Idle;
    }

    let definition = tool.mode_data().definition.clone();
    let action = tool.current_action();
    let params = definition.shape_params(action);
    let work_tick = tool.is_work_tick(tick);
    let mut pose = tool.pose();

    let mut ray_hit: Option<RayHit> = None;
    if !ctx.config.headless || work_tick && definition.shape == EffectShape::Ray {
        match ctx.spatial.raycast(pose.position, pose.forward, params.length) {
            Some(hit) if hit.entity.is_some() => {
                if definition.location == Location::Hit {
                    pose = tool.pose_at_hit(hit.position);
                }
                tool.update_hit_info(Some((hit.position, hit.material)), tick);
                ray_hit = Some(hit);
            }
            _ => tool.update_hit_info(None, tick),
        }
    }

    if !work_tick {
        return TickOutcome::OffTick;
    }
    if !tool.batch.is_idle() {
        trace!(
            "Tool {} still has {} job(s) in flight",
            tool.id(),
            tool.batch.active_threads()
        );
        return TickOutcome::Busy;
    }

    let block_work = definition.block_work(action);
    if block_work.cache_blocks {
        let cached = tool.batch.prune_work_set(tool.mode());
        let rate = block_work.work_rate.unwrap_or(0);
        if rate > 0 && cached >= rate {
            for entry in tool.batch.work_set() {
                ctx.damage
                    .apply_block_work(entry.structure.id(), &entry.block, &block_work, tool.id());
            }
            tool.batch.mark_working();
            trace!("Tool {} re-worked {} cached block(s)", tool.id(), cached);
            return TickOutcome::Cached { blocks: cached };
        }
        tool.batch.clear_work_set();
    }

    let mut volume = EffectVolume::new(definition.shape, pose, &params);
    let mut candidates = mem::take(&mut tool.candidates);
    candidates.clear();
    match volume.broad_phase() {
        BroadPhase::Sphere { center, radius } => {
            candidates.extend(ctx.spatial.entities_in_sphere(center, radius));
        }
        BroadPhase::Segment { start, end } => {
            candidates.extend(
                ctx.spatial
                    .entities_along_segment(start, end)
                    .into_iter()
                    .map(|(candidate, _)| candidate),
            );
        }
        BroadPhase::HitEntity => {
            if let Some(hit) = ray_hit {
                volume = volume.with_ray_fraction(hit.fraction);
                if let Some(candidate) = hit.entity.and_then(|entity| ctx.spatial.candidate(entity)) {
                    candidates.push(candidate);
                }
            }
        }
    }

    let rules = FilterRules {
        mode: tool.mode(),
        kind: tool.kind(),
        parent: tool.parent(),
        owner: tool.owner(),
        damage_characters: definition.damage_characters,
        affect_own_grid: definition.affect_own_grid,
        use_relations: tool.uses_relations(),
        target_mask: tool.target_mask(),
    };
    let mut targets = mem::take(&mut tool.targets);
    targets.clear();
    filter_candidates(&candidates, &volume, &rules, ctx.fields, ctx.factions, &mut targets);

    let instant = targets.destructibles.len();
    for &target in &targets.destructibles {
        ctx.damage
            .damage_entity(target, INSTANT_DAMAGE, tool.mode(), tool.id());
        tool.batch.mark_working();
    }

    let mut jobs = 0;
    let modifiers = tool.mode_data().modifiers.clone();
    for &field_id in &targets.fields {
        let Some(entry) = ctx.fields.entry(field_id) else {
            continue;
        };
        let placement = entry.placement();
        let Some(region) = carve_region(placement, &volume) else {
            trace!("Field {} lies outside the volume of tool {}", field_id, tool.id());
            continue;
        };
        let params = CarveParams::new(
            placement,
            &volume,
            region,
            definition.carve_work(action, modifiers.clone()),
        );
        ctx.dispatcher.submit(
            tool.id(),
            &mut tool.batch,
            JobKind::Carve,
            Box::new(CarveTask::new(field_id, entry.handle().clone(), params)),
        );
        jobs += 1;
    }

    for structure in targets.structures.drain(..) {
        let task = GatherTask::new(structure, volume, block_work, tool.id());
        ctx.dispatcher
            .submit(tool.id(), &mut tool.batch, JobKind::Gather, Box::new(task));
        jobs += 1;
    }

    trace!(
        "Tool {} tick {}: {} candidate(s), {} instant, {} job(s)",
        tool.id(),
        tick,
        candidates.len(),
        instant,
        jobs
    );

    candidates.clear();
    targets.clear();
    tool.candidates = candidates;
    tool.targets = targets;

    TickOutcome::Dispatched { instant, jobs }
}
