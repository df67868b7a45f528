//! End-to-end scenarios driven through `SimWorld`.

use factory_sim::persistence::slot_key;
use factory_sim::*;

fn config_with_timestep(fixed_timestep: f32) -> SimConfig {
    SimConfig {
        fixed_timestep,
        ..Default::default()
    }
}

fn smelting_world(config: SimConfig) -> SimWorld {
    let recipes = RecipeRegistry::from_recipes(vec![Recipe::new(
        "steel_ingot",
        4.0,
        vec![ItemStack::new("iron_ore", 5)],
        vec![ItemStack::new("steel_ingot", 1)],
    )])
    .unwrap();
    SimWorld::with_registries(config, recipes, MilestoneRegistry::default()).unwrap()
}

fn sorted_records(sim: &mut SimWorld) -> Vec<BuildingRecord> {
    let mut records = sim.save_snapshot().entities;
    records.sort_by_key(|record| record.position);
    records
}

#[test]
fn bonus_producers_scale_base_production() {
    let mut config = config_with_timestep(0.25);
    config.power.bonus_fraction = 0.30;
    let mut sim = SimWorld::with_config(config).unwrap();
    let net = sim.create_network();

    for _ in 0..2 {
        sim.store_mut()
            .spawn((PowerNode::new(net), Generator { output_mw: 500.0 }));
    }
    sim.place_now(PlacementRequest::new(BuildingType::PowerAugmenter, GridPos::new(0, 0, 0)).on_network(net));
    sim.place_now(PlacementRequest::new(BuildingType::PowerAugmenter, GridPos::new(3, 0, 0)).on_network(net));

    sim.step(0.25);

    let network = sim.store().networks().get(net).cloned().unwrap();
    assert_eq!(network.base_production_mw, 1000.0);
    assert_eq!(network.total_production_mw, 2000.0);
    assert!((network.effective_production_mw - 2600.0).abs() < 1e-9);
    assert!((sim.ui_snapshot().networks[0].bonus_percent - 60.0).abs() < 1e-9);
}

#[test]
fn deficit_without_storage_blacks_out() {
    let mut sim = SimWorld::with_config(config_with_timestep(60.0)).unwrap();
    let net = sim.create_network();
    sim.store_mut()
        .spawn((PowerNode::new(net), Generator { output_mw: 100.0 }));
    let load = sim.store_mut().spawn((PowerNode::new(net), Consumer::new(150.0)));

    assert_eq!(sim.step(60.0), 1);

    let network = sim.store().networks().get(net).cloned().unwrap();
    assert!(network.blackout);
    assert_eq!(network.stored_mwh, 0.0);
    let consumer = sim.store().get::<Consumer>(load).copied().unwrap();
    assert_eq!(consumer.current_draw_mw, 0.0);
}

#[test]
fn storage_covers_deficit_until_drained() {
    let mut sim = SimWorld::with_config(config_with_timestep(60.0)).unwrap();
    let net = sim.create_network();
    sim.store_mut()
        .spawn((PowerNode::new(net), Generator { output_mw: 100.0 }));
    sim.store_mut().spawn((PowerNode::new(net), Consumer::new(150.0)));
    let battery = sim.store_mut().spawn((
        PowerNode::new(net),
        PowerStorage {
            capacity_mwh: 10.0,
            stored_mwh: 1.0,
        },
    ));

    // 50 MW over one minute is 0.8333 MWh, covered by the 1 MWh battery.
    sim.step(60.0);
    let network = sim.store().networks().get(net).cloned().unwrap();
    assert!(!network.blackout);
    assert!((network.stored_mwh - (1.0 - 50.0 / 60.0)).abs() < 1e-9);
    let stored = sim.store().get::<PowerStorage>(battery).unwrap().stored_mwh;
    assert!((stored - network.stored_mwh).abs() < 1e-9);

    // The remainder cannot cover the next minute.
    sim.step(60.0);
    let network = sim.store().networks().get(net).cloned().unwrap();
    assert!(network.blackout);
    assert_eq!(network.stored_mwh, 0.0);
}

#[test]
fn network_totals_stay_in_bounds() {
    let mut sim = SimWorld::with_config(config_with_timestep(30.0)).unwrap();
    let net = sim.create_network();
    sim.place_now(PlacementRequest::new(BuildingType::CoalGenerator, GridPos::new(0, 0, 0)).on_network(net));
    sim.place_now(PlacementRequest::new(BuildingType::PowerStorage, GridPos::new(3, 0, 0)).on_network(net));

    for _ in 0..200 {
        sim.step(30.0);
        let network = sim.store().networks().get(net).cloned().unwrap();
        assert!(network.total_production_mw >= 0.0);
        assert!(network.total_consumption_mw >= 0.0);
        assert!(network.stored_mwh >= 0.0);
        assert!(network.stored_mwh <= network.storage_capacity_mwh);
    }
    // 75 MW surplus fills the 100 MWh bank in 80 minutes.
    let network = sim.store().networks().get(net).cloned().unwrap();
    assert_eq!(network.stored_mwh, 100.0);
}

#[test]
fn short_ingredient_is_never_consumed() {
    let mut sim = smelting_world(config_with_timestep(0.5));
    let net = sim.create_network();
    sim.place_now(PlacementRequest::new(BuildingType::CoalGenerator, GridPos::new(0, 0, 0)).on_network(net));
    let pos = GridPos::new(4, 0, 0);
    let smelter = sim
        .place_now(PlacementRequest::new(BuildingType::Smelter, pos).on_network(net).with_recipe(0))
        .unwrap();

    sim.progression_mut().add_items("iron_ore", 3);
    assert_eq!(sim.load_input(pos, "iron_ore", 3), 3);
    sim.step(10.0);

    assert_eq!(sim.store().buffers().get(smelter).unwrap().input.count("iron_ore"), 3);
    let producer = sim.store().get::<Producer>(smelter).copied().unwrap();
    assert_eq!(producer.progress, 0.0);
    assert!(!producer.is_active);

    // Topping up lets the cycle start and finish.
    sim.progression_mut().add_items("iron_ore", 2);
    sim.load_input(pos, "iron_ore", 2);
    sim.step(4.0);
    assert_eq!(sim.collect_output(pos).get("steel_ingot"), Some(&1));
    assert_eq!(sim.store().buffers().get(smelter).unwrap().input.count("iron_ore"), 0);
}

#[test]
fn placement_claims_every_footprint_cell() {
    let mut sim = SimWorld::new();
    let origin = GridPos::new(-1, 0, 30);
    let id = sim
        .place_now(PlacementRequest::new(BuildingType::Assembler, origin).rotated(Rotation::Deg90))
        .unwrap();

    let footprint = BuildingType::Assembler.footprint(Rotation::Deg90);
    for cell in SpatialGrid::footprint_cells(origin, footprint.size_x, footprint.size_z) {
        assert_eq!(sim.store().building_at(cell), Some(id));
    }
    assert!(!sim
        .store()
        .grid()
        .can_place(origin, footprint.size_x, footprint.size_z));
    // The footprint straddles the chunk boundary at x = 0.
    assert_eq!(sim.store().grid().chunk_count(), 2);
}

#[test]
fn corrupted_newest_slot_falls_back_to_older() {
    let mut sim = SimWorld::new();
    let storage = MemorySlotStorage::new();
    let mut manager = PersistenceManager::new(storage.clone(), 3);

    sim.place_now(PlacementRequest::new(BuildingType::Foundation, GridPos::new(0, 0, 0)));
    assert_eq!(sim.save_game(&mut manager).unwrap(), 0);
    sim.place_now(PlacementRequest::new(BuildingType::Foundation, GridPos::new(1, 0, 0)));
    assert_eq!(sim.save_game(&mut manager).unwrap(), 1);

    // Flip one hex digit of the newest slot's checksum.
    let mut text = String::from_utf8(storage.raw(&slot_key(1)).unwrap()).unwrap();
    let field = text.find("\"checksum\": \"").unwrap() + "\"checksum\": \"".len();
    let digit = &text[field..field + 1];
    let flipped = if digit == "0" { "1" } else { "0" };
    text.replace_range(field..field + 1, flipped);
    storage.put_raw(&slot_key(1), text.into_bytes());

    let mut reopened = PersistenceManager::new(storage, 3);
    let loaded = reopened.load().unwrap();
    assert_eq!(loaded.slot, 0);
    assert_eq!(loaded.snapshot.entities.len(), 1);

    let mut fresh = SimWorld::new();
    let mut again = PersistenceManager::new(MemorySlotStorage::new(), 3);
    assert!(!fresh.load_game(&mut again));
}

#[test]
fn undo_redo_restores_exact_state() {
    let mut sim = smelting_world(config_with_timestep(0.5));
    let net = sim.create_network();

    let a = Command::place(
        PlacementRequest::new(BuildingType::Smelter, GridPos::new(0, 0, 0))
            .on_network(net)
            .with_recipe(0),
    );
    assert!(sim.execute_now(a));
    sim.progression_mut().add_items("iron_ore", 4);
    sim.load_input(GridPos::new(0, 0, 0), "iron_ore", 4);

    let b = Command::configure(GridPos::new(0, 0, 0), None, 2);
    assert!(sim.execute_now(b));
    let after_b = sorted_records(&mut sim);

    assert!(sim.undo());
    assert_ne!(sorted_records(&mut sim), after_b);
    assert!(sim.redo());
    let restored = sorted_records(&mut sim);
    assert_eq!(restored.len(), after_b.len());
    for (left, right) in restored.iter().zip(&after_b) {
        assert!(left.same_building(right));
    }

    assert!(sim.undo());
    assert!(sim.undo());
    assert!(!sim.undo());
    assert!(!sim.undo());
    assert_eq!(sim.store_mut().building_count(), 0);
}

#[test]
fn undo_redo_of_place_and_remove() {
    let mut sim = SimWorld::new();
    let pos = GridPos::new(10, 0, 10);
    sim.place_now(PlacementRequest::new(BuildingType::Miner, pos).with_shards(1));
    sim.execute_now(Command::place(PlacementRequest::new(BuildingType::Conveyor, GridPos::new(12, 0, 10))));
    let after_b = sorted_records(&mut sim);

    assert!(sim.execute_now(Command::remove(pos)));
    assert!(sim.store().building_at(pos).is_none());
    assert!(sim.undo());
    let restored = sorted_records(&mut sim);
    for (left, right) in restored.iter().zip(&after_b) {
        assert!(left.same_building(right));
    }
    assert!(sim.redo());
    assert!(sim.store().building_at(pos).is_none());
}
