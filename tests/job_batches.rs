use cgmath::{EuclideanSpace, Matrix4, Point3, SquareMatrix, Vector3};
use tool_core::demo::{
    scene::{tool_spawn, TOOL_ID},
    DemoScene, DRILL_DEFINITIONS,
};
use tool_core::simulation_state::{
    geometry::{Aabb, EffectShape, EffectVolume, Pose, ShapeParams},
    structures::NullDamageSink,
    task_management::{task::CompletionContext, task::JobKind, BatchState, JobDispatcher},
    tools::{load_json, TickOutcome},
    voxels::{
        carve_region, CarveParams, CarveTask, CarveWork, DirtyRange, FieldId, FieldRegistry,
        VoxelField,
    },
    SimulationConfig,
};

const TOOL: u64 = 7;

fn sphere(radius: f32) -> ShapeParams {
    ShapeParams {
        radius,
        ..ShapeParams::default()
    }
}

fn centred_volume(field: &VoxelField, radius: f32) -> EffectVolume {
    let centre = field.to_world(Point3::new(4.5, 4.5, 4.5));
    let pose = Pose::new(centre, -Vector3::unit_z(), Vector3::unit_y());
    EffectVolume::new(EffectShape::Sphere, pose, &sphere(radius))
}

fn submit_carve(
    dispatcher: &mut JobDispatcher,
    batch: &mut BatchState,
    registry: &FieldRegistry,
    id: FieldId,
) {
    let handle = registry.get(id).unwrap();
    let (region, params) = {
        let field = handle.get();
        let volume = centred_volume(&field, 3.0);
        let region = carve_region(field.placement(), &volume).unwrap();
        (
            region,
            CarveParams::new(field.placement(), &volume, region, CarveWork::default()),
        )
    };
    assert!(!region.is_empty());
    dispatcher.submit(
        TOOL,
        batch,
        JobKind::Carve,
        Box::new(CarveTask::new(id, handle, params)),
    );
}

#[test]
fn three_jobs_completed_in_reverse_settle_on_the_third() {
    let mut registry = FieldRegistry::new();
    for i in 0..3 {
        registry.insert(VoxelField::filled(
            100 + i,
            Vector3::new(10, 10, 10),
            Matrix4::from_translation(Vector3::new(i as f32 * 20.0, 0.0, 0.0)),
            1,
        ));
    }

    let mut dispatcher = JobDispatcher::new(0);
    let mut batch = BatchState::default();
    for i in 0..3 {
        submit_carve(&mut dispatcher, &mut batch, &registry, 100 + i);
    }
    assert_eq!(batch.active_threads(), 3);

    let mut completed = dispatcher.poll();
    assert_eq!(completed.len(), 3);
    completed.reverse();

    let mut damage = NullDamageSink;
    let mut regions: Vec<(FieldId, DirtyRange)> = Vec::new();
    let mut settled = Vec::new();
    for job in completed {
        let outcome = {
            let mut ctx = CompletionContext {
                fields: &registry,
                damage: &mut damage,
                regions: &mut regions,
            };
            dispatcher.complete(&mut batch, job.result, &mut ctx)
        };
        settled.push(outcome);
        if settled.len() < 3 {
            assert!(regions.is_empty());
        }
    }

    assert!(settled[0].is_none());
    assert!(settled[1].is_none());
    let last = settled[2].unwrap();
    assert!(last.working);
    assert_eq!(last.fields_notified, 3);

    assert!(batch.is_idle());
    assert_eq!(batch.settled_batches(), 1);
    assert_eq!(regions.len(), 3);
    for (id, range) in &regions {
        let field = registry.get(*id).unwrap();
        assert!(!range.is_empty());
        assert!(range.is_within(&field.get().bounds()));
    }
    assert_eq!(dispatcher.jobs_completed(), 3);
    assert_eq!(dispatcher.jobs_outstanding(), 0);
}

#[test]
fn worker_pool_settles_every_batch_once() {
    let mut registry = FieldRegistry::new();
    for i in 0..4 {
        registry.insert(VoxelField::filled(
            200 + i,
            Vector3::new(10, 10, 10),
            Matrix4::from_translation(Vector3::new(0.0, i as f32 * 20.0, 0.0)),
            2,
        ));
    }

    let mut dispatcher = JobDispatcher::new(2);
    let mut batch = BatchState::default();
    for i in 0..4 {
        submit_carve(&mut dispatcher, &mut batch, &registry, 200 + i);
    }

    let mut damage = NullDamageSink;
    let mut regions: Vec<(FieldId, DirtyRange)> = Vec::new();
    let mut settlements = 0;
    while dispatcher.jobs_outstanding() > 0 {
        for job in dispatcher.wait(std::time::Duration::from_secs(10)) {
            let mut ctx = CompletionContext {
                fields: &registry,
                damage: &mut damage,
                regions: &mut regions,
            };
            if dispatcher.complete(&mut batch, job.result, &mut ctx).is_some() {
                settlements += 1;
            }
        }
    }

    assert_eq!(settlements, 1);
    assert!(batch.is_idle());
    assert_eq!(regions.len(), 4);
    assert!(batch.harvested().get(&2).is_some_and(|amount| *amount > 0.0));
}

#[test]
fn sphere_facing_forward_touches_near_box_only() {
    let pose = Pose::new(Point3::origin(), Vector3::unit_z(), Vector3::unit_y());
    let volume = EffectVolume::new(EffectShape::Sphere, pose, &sphere(2.0));
    let unit = Aabb::from_center_half_extents(Point3::origin(), Vector3::new(0.5, 0.5, 0.5));

    let near = Matrix4::from_translation(Vector3::new(0.0, 0.0, 1.0));
    let far = Matrix4::from_translation(Vector3::new(0.0, 0.0, 10.0));

    assert!(!volume.contains(&unit, &near).is_disjoint());
    assert!(volume.contains(&unit, &far).is_disjoint());
    assert!(!volume.contains(&unit, &Matrix4::identity()).is_disjoint());
}

#[test]
fn carve_of_a_centred_sphere_stays_inside_its_region() {
    let mut registry = FieldRegistry::new();
    let handle = registry.insert(VoxelField::filled(
        300,
        Vector3::new(10, 10, 10),
        Matrix4::identity(),
        1,
    ));

    let report = {
        let mut field = handle.get_mut();
        let volume = centred_volume(&field, 3.0);
        let region = carve_region(field.placement(), &volume).unwrap();
        let params = CarveParams::new(field.placement(), &volume, region, CarveWork::default());
        let report = tool_core::simulation_state::voxels::carve(&mut field, &params);
        let dirty = report.dirty.unwrap();
        assert!(!dirty.is_empty());
        assert!(dirty.is_within(&region));
        report
    };
    assert!(report.hit());
    assert!(handle.get().solid_count() < 1000);
}

#[test]
fn replaced_tool_never_settles_its_predecessors_jobs() {
    let definitions = load_json(DRILL_DEFINITIONS).unwrap();
    let config = SimulationConfig {
        worker_count: 0,
        ..SimulationConfig::default()
    };
    let mut scene = DemoScene::new(config, &definitions, 7).unwrap();

    scene.step();
    let tick = scene.context().tick_count();
    assert!(scene
        .context_mut()
        .tool_mut(TOOL_ID)
        .unwrap()
        .set_activated(true, tick));
    let dispatched = (0..20).any(|_| {
        matches!(
            scene.step().get(&TOOL_ID),
            Some(TickOutcome::Dispatched { jobs, .. }) if *jobs > 0
        )
    });
    assert!(dispatched);
    let old_generation = scene.context().tool(TOOL_ID).unwrap().batch().generation();

    scene
        .context_mut()
        .add_tool(tool_spawn(), &definitions)
        .unwrap();
    let fresh = scene.context().tool(TOOL_ID).unwrap();
    assert_ne!(fresh.batch().generation(), old_generation);
    assert!(fresh.batch().is_idle());

    // The old tool's carve result comes back on this tick.
    scene.step();
    assert!(scene.finish());

    let fresh = scene.context().tool(TOOL_ID).unwrap();
    assert!(fresh.batch().is_idle());
    assert_eq!(fresh.batch().settled_batches(), 0);
    assert!(fresh.harvested().is_empty());
    assert_eq!(scene.context().dispatcher().jobs_discarded(), 1);
    assert_eq!(scene.regions().len(), 1);
}
