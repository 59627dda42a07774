use std::{sync::mpsc, thread, time::Duration};

use tool_core::{
    demo::{scene::TOOL_ID, DemoScene, DRILL_DEFINITIONS},
    simulation_state::{
        tools::{load_json, TickOutcome, ToolMode},
        triggers::{Trigger, TriggerSet},
        SimulationConfig,
    },
};

fn scene(worker_count: usize) -> DemoScene {
    let definitions = load_json(DRILL_DEFINITIONS).unwrap();
    let config = SimulationConfig {
        worker_count,
        ..SimulationConfig::default()
    };
    DemoScene::new(config, &definitions, 42).unwrap()
}

/// Steps until the tool dispatches work, failing after `limit` ticks.
fn step_until_dispatched(scene: &mut DemoScene, limit: usize) -> (usize, usize) {
    for _ in 0..limit {
        if let Some(TickOutcome::Dispatched { instant, jobs }) = scene.step().get(&TOOL_ID) {
            return (*instant, *jobs);
        }
    }
    panic!("tool never dispatched within {} ticks", limit);
}

fn activate(scene: &mut DemoScene) {
    scene.step();
    let tick = scene.context().tick_count();
    let tool = scene.context_mut().tool_mut(TOOL_ID).unwrap();
    assert!(tool.set_activated(true, tick));
}

fn check_summary(scene: &mut DemoScene) {
    let summary = scene.run(200, 60);

    assert!(summary.solid_after < summary.solid_before);
    assert!(summary.regions_changed > 0);
    assert!(summary.harvested.values().sum::<f32>() > 0.0);
    assert!(summary.entities_damaged > 0);
    assert!(summary.blocks_worked > 0);
    assert!(summary.settled_batches > 0);
    assert_eq!(scene.context().dispatcher().jobs_outstanding(), 0);

    let tool = scene.context().tool(TOOL_ID).unwrap();
    assert!(tool.batch().is_idle());
    assert_eq!(tool.mode(), ToolMode::Grind);
    assert!(!tool.is_activated());
}

#[test]
fn drill_then_grind_inline() {
    let mut scene = scene(0);
    check_summary(&mut scene);
}

#[test]
fn drill_then_grind_on_workers() {
    let mut scene = scene(2);
    check_summary(&mut scene);
}

#[test]
fn block_work_only_lands_on_the_wall() {
    let mut scene = scene(0);
    scene.run(0, 60);

    assert!(!scene.damage().blocks.is_empty());
    for (structure, _, amount, mode) in &scene.damage().blocks {
        assert_eq!(*structure, tool_core::demo::scene::WALL_ID);
        assert_eq!(*mode, ToolMode::Grind);
        assert!(*amount > 0.0);
    }
}

#[test]
fn first_work_tick_carves_and_latches_the_hit() {
    let mut scene = scene(0);
    activate(&mut scene);

    let (_, jobs) = step_until_dispatched(&mut scene, 20);
    assert_eq!(jobs, 1);
    assert!(!scene.context().tool(TOOL_ID).unwrap().batch().is_idle());

    // Inline results are merged at the start of the next tick.
    scene.step();
    let tool = scene.context().tool(TOOL_ID).unwrap();
    assert!(tool.batch().is_idle());
    assert!(tool.was_hitting());
    assert!(tool.triggers().contains(Trigger::Hit));
    assert_eq!(scene.regions().len(), 1);
}

#[test]
fn removed_tool_results_are_discarded_but_still_notify() {
    let mut scene = scene(0);
    activate(&mut scene);
    step_until_dispatched(&mut scene, 20);

    assert!(scene.context_mut().remove_tool(TOOL_ID).is_some());
    assert!(scene.finish());

    assert!(scene.context().tool(TOOL_ID).is_none());
    assert_eq!(scene.context().dispatcher().jobs_discarded(), 1);
    assert_eq!(scene.regions().len(), 1);
}

#[test]
fn deactivating_while_activated_keeps_firing_flags_until_the_flag_drops() {
    let mut scene = scene(0);
    activate(&mut scene);
    let tick = scene.context().tick_count();
    let tool = scene.context_mut().tool_mut(TOOL_ID).unwrap();

    tool.update_triggers(TriggerSet::firing(), true, tick);
    let report = tool.update_triggers(TriggerSet::firing(), false, tick);
    assert!(report.suppressed);
    assert!(tool.triggers().contains(Trigger::Activated));

    assert!(tool.set_activated(false, tick));
    assert!(!tool.triggers().contains(Trigger::Activated));
}

#[test]
fn mode_round_trip_restores_available_triggers() {
    let mut scene = scene(0);
    activate(&mut scene);
    let tick = scene.context().tick_count();
    let tool = scene.context_mut().tool_mut(TOOL_ID).unwrap();

    let raw = tool.triggers().raw();
    let available = tool.triggers().available();
    assert!(tool.set_mode(ToolMode::Grind, tick));
    assert!(tool.set_mode(ToolMode::Drill, tick + 1));

    assert_eq!(tool.triggers().raw(), raw);
    assert_eq!(tool.triggers().available(), available);
    assert!(!tool.set_mode(ToolMode::Weld, tick + 2));
}

#[test]
fn removing_an_absent_trigger_changes_nothing() {
    let mut scene = scene(0);
    activate(&mut scene);
    let tick = scene.context().tick_count();
    let tool = scene.context_mut().tool_mut(TOOL_ID).unwrap();

    let raw = tool.triggers().raw();
    let report = tool.update_triggers(Trigger::RayHit.into(), false, tick);
    assert!(report.is_noop());
    let again = tool.update_triggers(Trigger::RayHit.into(), false, tick);
    assert!(again.is_noop());
    assert_eq!(tool.triggers().raw(), raw);
}

#[test]
fn ticks_do_not_wait_for_a_field_being_carved() {
    let definitions = load_json(DRILL_DEFINITIONS).unwrap();
    let config = SimulationConfig {
        worker_count: 1,
        headless: true,
        ..SimulationConfig::default()
    };
    let mut scene = DemoScene::new(config, &definitions, 42).unwrap();
    activate(&mut scene);

    let field = scene.field().clone();
    let (locked_tx, locked_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let carver = thread::spawn(move || {
        let _carving = field.get_mut();
        locked_tx.send(()).unwrap();
        release_rx.recv_timeout(Duration::from_secs(5)).is_ok()
    });
    locked_rx.recv().unwrap();

    let (_, jobs) = step_until_dispatched(&mut scene, 20);
    scene.step();
    let _ = release_tx.send(());

    assert!(carver.join().unwrap(), "tick blocked on the field lock");
    assert_eq!(jobs, 1);
    assert!(scene.finish());
    assert!(scene.context().tool(TOOL_ID).unwrap().batch().is_idle());
}

#[test]
fn grinder_reworks_cached_blocks_until_one_is_dismounted() {
    let mut scene = scene(0);
    activate(&mut scene);
    scene.aim_at_wall();

    let outcomes: Vec<TickOutcome> = (0..60)
        .filter_map(|_| scene.step().get(&TOOL_ID).copied())
        .collect();
    let gathers = outcomes
        .iter()
        .filter(|o| matches!(o, TickOutcome::Dispatched { jobs, .. } if *jobs > 0))
        .count();
    let cached = outcomes
        .iter()
        .filter(|o| matches!(o, TickOutcome::Cached { blocks: 4 }))
        .count();
    assert_eq!(gathers, 1);
    assert!(cached >= 2);

    let first = scene.context().tool(TOOL_ID).unwrap().batch().work_set()[0].block.position;
    assert!(scene.wall().remove_block(first));

    let regathered = (0..20).any(|_| {
        matches!(
            scene.step().get(&TOOL_ID),
            Some(TickOutcome::Dispatched { jobs, .. }) if *jobs > 0
        )
    });
    assert!(regathered);
    scene.step();

    let work_set = scene.context().tool(TOOL_ID).unwrap().batch().work_set();
    assert_eq!(work_set.len(), 4);
    assert!(work_set.iter().all(|cached| cached.block.position != first));
}
