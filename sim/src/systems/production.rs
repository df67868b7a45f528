//! Production system - advances recipe cycles on every producer.
//!
//! A producer runs only when all of these hold:
//! - its recipe index resolves in the `RecipeRegistry`;
//! - its output buffer has room for a full batch of products (backpressure
//!   freezes progress, it never resets it);
//! - it is mid-cycle, or its input buffer holds every ingredient (consumed
//!   all at once when the cycle starts);
//! - if it draws power, its network is connected and not blacked out.
//!
//! Speed comes from installed power shards and scales the draw non-linearly:
//! `draw = base × speed^power_exponent`.

use bevy_ecs::prelude::*;
use tracing::{debug, warn};

use crate::buffers::MachineBuffers;
use crate::components::*;
use crate::config::SimConfig;
use crate::registry::RecipeRegistry;
use crate::systems::DeltaTime;

/// Why a producer did not run this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleReason {
    NoRecipe,
    OutputFull,
    MissingInputs,
    Unpowered,
}

/// System that advances every producer by one tick.
///
/// ## Data Access
/// - Reads: DeltaTime, SimConfig, RecipeRegistry, PowerNode
/// - Writes: Producer, Consumer, MachineBuffers
///
/// Must run after `power_network_system` so blackout flags are this tick's.
pub fn production_system(
    dt: Res<DeltaTime>,
    config: Res<SimConfig>,
    recipes: Res<RecipeRegistry>,
    mut buffers: ResMut<MachineBuffers>,
    mut query: Query<(Entity, &mut Producer, Option<&mut Consumer>, Option<&PowerNode>)>,
) {
    let delta = dt.0;
    let tuning = &config.production;

    for (entity, mut producer, consumer, node) in query.iter_mut() {
        let speed = producer.compute_speed(tuning.bonus_per_shard, tuning.max_speed_multiplier);
        producer.speed_multiplier = speed;

        let outcome = step_producer(
            entity,
            &mut producer,
            &recipes,
            &mut buffers,
            delta,
            consumer.is_some(),
            node.is_some_and(PowerNode::is_powered),
        );

        if let Some(mut consumer) = consumer {
            let scaled = consumer.base_draw_mw * f64::from(speed.powf(tuning.power_exponent));
            match outcome {
                Ok(()) => {
                    consumer.demand_mw = scaled;
                    consumer.current_draw_mw = scaled;
                }
                // Still wants power; the network must see the load.
                Err(IdleReason::Unpowered) => {
                    consumer.demand_mw = scaled;
                    consumer.current_draw_mw = 0.0;
                }
                Err(_) => {
                    consumer.demand_mw = 0.0;
                    consumer.current_draw_mw = 0.0;
                }
            }
        }
    }
}

/// Advance one producer. `Ok(())` means it ran this tick.
fn step_producer(
    entity: Entity,
    producer: &mut Producer,
    recipes: &RecipeRegistry,
    buffers: &mut MachineBuffers,
    delta: f32,
    needs_power: bool,
    powered: bool,
) -> Result<(), IdleReason> {
    let was_active = producer.is_active;
    producer.is_active = false;

    let Some(recipe) = producer.recipe_index.and_then(|index| recipes.get(index)) else {
        if was_active || (producer.recipe_index.is_some() && producer.progress > 0.0) {
            warn!(?entity, recipe_index = ?producer.recipe_index, "Producer recipe is not registered");
        }
        return Err(IdleReason::NoRecipe);
    };

    let buffer = buffers.get_or_create(entity);

    if !buffer.output.can_accept_all(&recipe.products) {
        if was_active {
            debug!(?entity, recipe = %recipe.id, "Output full, producer stalled");
        }
        return Err(IdleReason::OutputFull);
    }

    if producer.at_cycle_start() && !buffer.input.has_all(&recipe.ingredients) {
        return Err(IdleReason::MissingInputs);
    }

    if needs_power && !powered {
        return Err(IdleReason::Unpowered);
    }

    if producer.at_cycle_start() {
        // has_all was checked above, so this cannot partially consume.
        buffer.input.consume_all(&recipe.ingredients);
    }

    producer.is_active = true;
    producer.progress += delta / recipe.duration * producer.speed_multiplier;

    if producer.progress >= 1.0 {
        producer.progress = 0.0;
        buffer.output.add_all(&recipe.products);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ItemStack, Recipe};

    fn setup(dt: f32) -> World {
        let mut world = World::new();
        let recipes = RecipeRegistry::from_recipes(vec![
            Recipe::new(
                "iron_ingot",
                2.0,
                vec![ItemStack::new("iron_ore", 5)],
                vec![ItemStack::new("iron_ingot", 2)],
            ),
            Recipe::new("iron_ore", 1.0, vec![], vec![ItemStack::new("iron_ore", 1)]),
        ])
        .unwrap();
        world.insert_resource(recipes);
        world.insert_resource(DeltaTime(dt));
        world.insert_resource(SimConfig::default());
        world.insert_resource(MachineBuffers::new(10));
        world
    }

    fn run(world: &mut World) {
        let mut schedule = Schedule::default();
        schedule.add_systems(production_system);
        schedule.run(world);
    }

    fn powered_node() -> PowerNode {
        PowerNode {
            network: NetworkId(0),
            connected: true,
            blackout: false,
        }
    }

    fn give_input(world: &mut World, entity: Entity, item: &str, amount: u32) {
        world
            .resource_mut::<MachineBuffers>()
            .get_or_create(entity)
            .input
            .add(item, amount);
    }

    fn input_count(world: &World, entity: Entity, item: &str) -> u32 {
        world
            .resource::<MachineBuffers>()
            .get(entity)
            .map_or(0, |b| b.input.count(item))
    }

    fn output_count(world: &World, entity: Entity, item: &str) -> u32 {
        world
            .resource::<MachineBuffers>()
            .get(entity)
            .map_or(0, |b| b.output.count(item))
    }

    #[test]
    fn test_short_ingredient_never_consumed() {
        let mut world = setup(0.5);
        let smelter = world
            .spawn((Producer::new(Some(0), 0), Consumer::new(4.0), powered_node()))
            .id();
        give_input(&mut world, smelter, "iron_ore", 3);

        for _ in 0..10 {
            run(&mut world);
        }

        let producer = world.get::<Producer>(smelter).unwrap();
        assert_eq!(producer.progress, 0.0);
        assert!(!producer.is_active);
        assert_eq!(input_count(&world, smelter, "iron_ore"), 3);
        assert_eq!(world.get::<Consumer>(smelter).unwrap().demand_mw, 0.0);
    }

    #[test]
    fn test_full_cycle_produces_outputs() {
        let mut world = setup(0.5);
        let smelter = world
            .spawn((Producer::new(Some(0), 0), Consumer::new(4.0), powered_node()))
            .id();
        give_input(&mut world, smelter, "iron_ore", 7);

        run(&mut world);
        assert_eq!(input_count(&world, smelter, "iron_ore"), 2); // consumed at cycle start
        assert!((world.get::<Producer>(smelter).unwrap().progress - 0.25).abs() < 1e-6);
        assert!((world.get::<Consumer>(smelter).unwrap().current_draw_mw - 4.0).abs() < 1e-9);

        for _ in 0..3 {
            run(&mut world);
        }
        assert_eq!(output_count(&world, smelter, "iron_ingot"), 2);
        assert_eq!(world.get::<Producer>(smelter).unwrap().progress, 0.0);

        // Second cycle cannot start with only 2 ore left.
        run(&mut world);
        assert!(!world.get::<Producer>(smelter).unwrap().is_active);
        assert_eq!(input_count(&world, smelter, "iron_ore"), 2);
    }

    #[test]
    fn test_blackout_forces_inactive_and_zero_draw() {
        let mut world = setup(0.5);
        let smelter = world
            .spawn((
                Producer::new(Some(0), 0),
                Consumer::new(4.0),
                PowerNode {
                    network: NetworkId(0),
                    connected: true,
                    blackout: true,
                },
            ))
            .id();
        give_input(&mut world, smelter, "iron_ore", 5);

        run(&mut world);

        let producer = world.get::<Producer>(smelter).unwrap();
        assert!(!producer.is_active);
        assert_eq!(producer.progress, 0.0);
        let consumer = world.get::<Consumer>(smelter).unwrap();
        assert_eq!(consumer.current_draw_mw, 0.0);
        assert!((consumer.demand_mw - 4.0).abs() < 1e-9);
        // Nothing consumed while unpowered.
        assert_eq!(input_count(&world, smelter, "iron_ore"), 5);
    }

    #[test]
    fn test_backpressure_freezes_progress() {
        let mut world = setup(0.5);
        let smelter = world
            .spawn((Producer::new(Some(0), 0), Consumer::new(4.0), powered_node()))
            .id();
        give_input(&mut world, smelter, "iron_ore", 5);
        run(&mut world);
        assert!((world.get::<Producer>(smelter).unwrap().progress - 0.25).abs() < 1e-6);

        // Fill the output slot to 9 of 10: a batch of 2 no longer fits.
        world
            .resource_mut::<MachineBuffers>()
            .get_or_create(smelter)
            .output
            .add("iron_ingot", 9);
        for _ in 0..5 {
            run(&mut world);
        }

        let producer = world.get::<Producer>(smelter).unwrap();
        assert!(!producer.is_active);
        assert!((producer.progress - 0.25).abs() < 1e-6);
        assert_eq!(output_count(&world, smelter, "iron_ingot"), 9);
    }

    #[test]
    fn test_missing_recipe_idles() {
        let mut world = setup(0.5);
        let machine = world
            .spawn((Producer::new(Some(42), 0), Consumer::new(4.0), powered_node()))
            .id();
        run(&mut world);

        assert!(!world.get::<Producer>(machine).unwrap().is_active);
        assert_eq!(world.get::<Consumer>(machine).unwrap().demand_mw, 0.0);
    }

    #[test]
    fn test_shards_speed_up_and_cost_more_power() {
        let mut world = setup(0.5);
        let miner = world
            .spawn((Producer::new(Some(1), 2), Consumer::new(5.0), powered_node()))
            .id();

        run(&mut world);

        let producer = world.get::<Producer>(miner).unwrap();
        assert!((producer.speed_multiplier - 2.0).abs() < 1e-6);
        // 0.5s / 1.0s × 2.0 = one full cycle
        assert_eq!(output_count(&world, miner, "iron_ore"), 1);

        let expected = 5.0 * f64::from(2.0f32.powf(1.6));
        let consumer = world.get::<Consumer>(miner).unwrap();
        assert!((consumer.current_draw_mw - expected).abs() < 1e-6);
    }

    #[test]
    fn test_unpowered_producer_without_consumer_runs() {
        let mut world = setup(1.0);
        let extractor = world.spawn(Producer::new(Some(1), 0)).id();

        run(&mut world);

        assert_eq!(output_count(&world, extractor, "iron_ore"), 1);
    }

    #[test]
    fn test_disconnected_consumer_stays_idle() {
        let mut world = setup(1.0);
        let miner = world.spawn((Producer::new(Some(1), 0), Consumer::new(5.0))).id();

        run(&mut world);

        assert!(!world.get::<Producer>(miner).unwrap().is_active);
        assert_eq!(output_count(&world, miner, "iron_ore"), 0);
    }
}
