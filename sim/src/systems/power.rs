//! Power network system - aggregates generation, demand and storage per network.
//!
//! Entities only store the id of the network they belong to. Network records
//! carry no member list; membership is rebuilt from the `PowerNode` components
//! every tick, so there is no back-reference to go stale when buildings are
//! placed or removed.
//!
//! ## Per-tick algorithm
//!
//! 1. Zero every known network's totals.
//! 2. Fold each member's generator output, bonus flat output, demand and
//!    storage into its network.
//! 3. Settle: `effective = total + bonus_fraction × base × bonus_count`, then
//!    charge storage from surplus or draw the deficit from it. A deficit the
//!    storage cannot cover drains it to zero and blacks the network out.
//! 4. Write blackout state back into every member and share the network charge
//!    across storage entities in proportion to their capacity.
//!
//! ## Parallelism Notes
//! With `--features parallel`, step 3 runs over networks with rayon. Each
//! network settles independently, so the result is identical.

use std::collections::HashMap;

use bevy_ecs::prelude::*;
#[cfg(feature = "parallel")]
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::components::*;
use crate::config::SimConfig;
use crate::systems::DeltaTime;

/// Aggregate state of one network, recomputed every tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PowerNetwork {
    pub id: NetworkId,
    /// Sum of generator output (excludes bonus producers' flat output).
    pub base_production_mw: f64,
    /// Sum of bonus producers' flat output.
    pub bonus_flat_mw: f64,
    /// `base_production_mw + bonus_flat_mw`.
    pub total_production_mw: f64,
    /// Total production plus the linear bonus.
    pub effective_production_mw: f64,
    pub total_consumption_mw: f64,
    pub storage_capacity_mwh: f64,
    pub stored_mwh: f64,
    pub bonus_producer_count: u32,
    pub blackout: bool,
    /// Members seen during the last aggregation.
    pub member_count: u32,
}

impl PowerNetwork {
    pub fn new(id: NetworkId) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    fn reset_totals(&mut self) {
        self.base_production_mw = 0.0;
        self.bonus_flat_mw = 0.0;
        self.total_production_mw = 0.0;
        self.effective_production_mw = 0.0;
        self.total_consumption_mw = 0.0;
        self.storage_capacity_mwh = 0.0;
        self.stored_mwh = 0.0;
        self.bonus_producer_count = 0;
        self.member_count = 0;
    }

    /// Effective production minus consumption, in MW.
    pub fn surplus_mw(&self) -> f64 {
        self.effective_production_mw - self.total_consumption_mw
    }

    /// Stored energy as a percentage of capacity.
    pub fn storage_percent(&self) -> f64 {
        if self.storage_capacity_mwh <= 0.0 {
            0.0
        } else {
            (self.stored_mwh / self.storage_capacity_mwh * 100.0).clamp(0.0, 100.0)
        }
    }

    /// Bonus on base production, as a percentage.
    pub fn bonus_percent(&self, bonus_fraction: f64) -> f64 {
        bonus_fraction * f64::from(self.bonus_producer_count) * 100.0
    }

    /// Charge share for a storage entity of the given capacity.
    pub fn share_for(&self, capacity_mwh: f64) -> f64 {
        if self.storage_capacity_mwh <= 0.0 {
            0.0
        } else {
            self.stored_mwh * (capacity_mwh / self.storage_capacity_mwh)
        }
    }

    /// Compute effective production and run the blackout/storage step.
    pub fn settle(&mut self, dt_seconds: f64, bonus_fraction: f64) {
        self.total_production_mw = self.base_production_mw + self.bonus_flat_mw;
        self.effective_production_mw = self.total_production_mw
            + bonus_fraction * self.base_production_mw * f64::from(self.bonus_producer_count);

        let hours = dt_seconds / 3600.0;
        let surplus = self.surplus_mw();
        self.stored_mwh = self.stored_mwh.clamp(0.0, self.storage_capacity_mwh);

        if surplus >= 0.0 {
            self.blackout = false;
            self.stored_mwh = (self.stored_mwh + surplus * hours).min(self.storage_capacity_mwh);
        } else {
            let deficit_mwh = -surplus * hours;
            if self.stored_mwh >= deficit_mwh {
                self.stored_mwh -= deficit_mwh;
                self.blackout = false;
            } else {
                self.stored_mwh = 0.0;
                self.blackout = true;
            }
        }

        self.stored_mwh = self.stored_mwh.clamp(0.0, self.storage_capacity_mwh);
    }
}

/// All known power networks.
#[derive(Resource, Debug, Default)]
pub struct PowerNetworks {
    networks: HashMap<NetworkId, PowerNetwork>,
    next_id: u32,
}

impl PowerNetworks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fresh network.
    pub fn create(&mut self) -> NetworkId {
        while self.networks.contains_key(&NetworkId(self.next_id)) {
            self.next_id = self.next_id.wrapping_add(1);
        }
        let id = NetworkId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);
        self.networks.insert(id, PowerNetwork::new(id));
        id
    }

    /// Register `id` if it is not known yet.
    pub fn ensure(&mut self, id: NetworkId) {
        self.networks.entry(id).or_insert_with(|| PowerNetwork::new(id));
        if id.0 >= self.next_id {
            self.next_id = id.0.wrapping_add(1);
        }
    }

    pub fn get(&self, id: NetworkId) -> Option<&PowerNetwork> {
        self.networks.get(&id)
    }

    pub fn get_mut(&mut self, id: NetworkId) -> Option<&mut PowerNetwork> {
        self.networks.get_mut(&id)
    }

    pub fn contains(&self, id: NetworkId) -> bool {
        self.networks.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.networks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.networks.is_empty()
    }

    /// Networks ordered by id.
    pub fn sorted(&self) -> Vec<&PowerNetwork> {
        let mut list: Vec<_> = self.networks.values().collect();
        list.sort_by_key(|n| n.id);
        list
    }

    /// Drop networks that had no members in the last aggregation.
    pub fn prune_orphans(&mut self) -> usize {
        let before = self.networks.len();
        self.networks.retain(|_, network| network.member_count > 0);
        before - self.networks.len()
    }

    pub fn clear(&mut self) {
        self.networks.clear();
        self.next_id = 0;
    }

    fn reset_totals(&mut self) {
        for network in self.networks.values_mut() {
            network.reset_totals();
        }
    }

    fn settle_all(&mut self, dt_seconds: f64, bonus_fraction: f64) {
        #[cfg(feature = "parallel")]
        {
            self.networks
                .par_iter_mut()
                .for_each(|(_, network)| network.settle(dt_seconds, bonus_fraction));
        }

        #[cfg(not(feature = "parallel"))]
        {
            for network in self.networks.values_mut() {
                network.settle(dt_seconds, bonus_fraction);
            }
        }
    }
}

/// System that recomputes every power network and writes blackout state back.
///
/// ## Data Access
/// - Reads: Generator, BonusProducer, DeltaTime, SimConfig
/// - Writes: PowerNetworks, PowerNode, PowerStorage, Consumer (pure consumers only)
pub fn power_network_system(
    dt: Res<DeltaTime>,
    config: Res<SimConfig>,
    mut networks: ResMut<PowerNetworks>,
    mut nodes: Query<(
        &mut PowerNode,
        Option<&Generator>,
        Option<&BonusProducer>,
        Option<&mut Consumer>,
        Option<&mut PowerStorage>,
        Has<Producer>,
    )>,
) {
    let before: HashMap<NetworkId, bool> = networks
        .networks
        .iter()
        .map(|(id, network)| (*id, network.blackout))
        .collect();

    networks.reset_totals();

    // Aggregate
    let mut skipped = 0usize;
    for (node, generator, bonus, consumer, storage, _) in nodes.iter() {
        let Some(network) = networks.get_mut(node.network) else {
            skipped += 1;
            continue;
        };
        network.member_count += 1;
        if let Some(generator) = generator {
            network.base_production_mw += generator.output_mw.max(0.0);
        }
        if let Some(bonus) = bonus {
            network.bonus_flat_mw += bonus.flat_output_mw.max(0.0);
            network.bonus_producer_count += 1;
        }
        if let Some(consumer) = consumer {
            network.total_consumption_mw += consumer.demand_mw.max(0.0);
        }
        if let Some(storage) = storage {
            let capacity = storage.capacity_mwh.max(0.0);
            network.storage_capacity_mwh += capacity;
            network.stored_mwh += storage.stored_mwh.clamp(0.0, capacity);
        }
    }
    if skipped > 0 {
        debug!(skipped, "Power nodes reference unknown networks");
    }

    networks.settle_all(f64::from(dt.0), config.power.bonus_fraction);

    for network in networks.networks.values() {
        match (before.get(&network.id).copied().unwrap_or(false), network.blackout) {
            (false, true) => warn!(
                network = network.id.0,
                production_mw = network.effective_production_mw,
                consumption_mw = network.total_consumption_mw,
                "Network blacked out"
            ),
            (true, false) => info!(network = network.id.0, "Network power restored"),
            _ => {}
        }
    }

    // Write back
    for (mut node, _, _, consumer, storage, has_producer) in nodes.iter_mut() {
        match networks.get(node.network) {
            Some(network) => {
                node.connected = true;
                node.blackout = network.blackout;
                if let Some(mut storage) = storage {
                    storage.stored_mwh = network.share_for(storage.capacity_mwh.max(0.0));
                }
            }
            None => {
                node.connected = false;
                node.blackout = false;
            }
        }

        if !has_producer {
            if let Some(mut consumer) = consumer {
                consumer.current_draw_mw = if node.is_powered() {
                    consumer.demand_mw
                } else {
                    0.0
                };
            }
        }
    }
}
