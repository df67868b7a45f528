//! Basic demonstration of the factory simulation.
//!
//! Run with: cargo run --example basic_demo
//! Set `RUST_LOG=factory_sim=debug` for placement and pruning logs.

use factory_sim::{
    BuildingType, Command, GridPos, ItemStack, MemorySlotStorage, Milestone, MilestoneRegistry,
    PersistenceManager, PlacementRequest, Recipe, RecipeRegistry, SimConfig, SimWorld,
};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .init();

    println!("=== Factory Simulation Demo ===\n");

    let recipes = RecipeRegistry::from_recipes(vec![
        Recipe::new("iron_ore", 1.0, vec![], vec![ItemStack::new("iron_ore", 1)]),
        Recipe::new(
            "iron_ingot",
            2.0,
            vec![ItemStack::new("iron_ore", 1)],
            vec![ItemStack::new("iron_ingot", 1)],
        ),
    ])
    .expect("recipe ids are unique");
    let milestones = MilestoneRegistry::from_milestones(vec![Milestone {
        id: "hub_upgrade_1".into(),
        tier: 0,
        name: "HUB Upgrade 1".into(),
        cost: vec![ItemStack::new("iron_ore", 10)],
        unlocks: vec!["iron_ingot".into()],
    }])
    .expect("milestone ids are unique");

    let mut sim = SimWorld::with_registries(SimConfig::default(), recipes, milestones)
        .expect("default config is valid");

    // One coal generator feeding four miners.
    let net = sim.create_network();
    sim.place_now(PlacementRequest::new(BuildingType::CoalGenerator, GridPos::new(0, 0, 0)).on_network(net));
    for i in 0..4 {
        sim.submit(Command::place(
            PlacementRequest::new(BuildingType::Miner, GridPos::new(4 + i * 3, 0, 0))
                .on_network(net)
                .with_recipe(0),
        ));
    }

    println!("Running 10 simulated seconds at 30 ticks/sec...\n");
    for second in 1..=10 {
        sim.step(1.0);
        let ui = sim.ui_snapshot();
        for network in &ui.networks {
            println!(
                "t={:>2}s tick={:>3} network {}: {:.0}/{:.0} MW{}",
                second,
                sim.current_tick(),
                network.id,
                network.consumption,
                network.production,
                if network.blackout { " BLACKOUT" } else { "" }
            );
        }
    }

    let mut collected = 0;
    for i in 0..4 {
        collected += sim
            .collect_output(GridPos::new(4 + i * 3, 0, 0))
            .values()
            .sum::<u32>();
    }
    println!("\nCollected {} iron ore", collected);

    if let Some(outcome) = sim.deliver_milestone("hub_upgrade_1") {
        println!(
            "HUB Upgrade 1: completed={} unlocked={:?}",
            outcome.completed, outcome.unlocked_recipes
        );
    }

    let storage = MemorySlotStorage::new();
    let mut saves = PersistenceManager::new(storage, 3);
    match sim.save_game(&mut saves) {
        Ok(slot) => println!("Saved to slot {}", slot),
        Err(err) => println!("Save failed: {}", err),
    }

    println!("\n=== Final Frame (JSON) ===\n");
    println!("{}", sim.snapshot_json());
}
