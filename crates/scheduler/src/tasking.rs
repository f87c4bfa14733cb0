// crates/scheduler/src/tasking.rs
//
// Launch allocation. A policy sees one self-contained state snapshot and the
// scenario it belongs to, and returns the launches for that turn. Policies
// keep no state between calls: the server skips turns with nothing to do, so
// consecutive calls are not consecutive ticks.

use api::{Coord, DroneId, Launch, Order, OrderId, Scenario, State};
use std::collections::HashSet;
use std::hash::Hash;
use thiserror::Error;

/// Decides which drones to launch, and with which orders, for one turn.
///
/// Implementations must be pure. Orders that cannot be served this turn are
/// simply left out; they stay pending on the server.
pub trait LaunchPolicy: Send + Sync {
    fn decide_launches(&self, scenario: &Scenario, state: &State) -> Vec<Launch>;

    /// Short name for logs and metrics.
    fn name(&self) -> &'static str;
}

/// Baseline policy: pending orders in received order, each on the next unused
/// available drone, one order per trip. Ignores capacity, range and SLA.
#[derive(Clone, Copy, Debug, Default)]
pub struct FirstAvailable;

impl LaunchPolicy for FirstAvailable {
    fn decide_launches(&self, _scenario: &Scenario, state: &State) -> Vec<Launch> {
        let drones = unique(state.available_drone_ids.iter());
        let orders = unique(state.pending_orders.iter().map(|o| &o.order_id));

        orders
            .into_iter()
            .zip(drones)
            .map(|(order_id, drone_id)| Launch::single(drone_id.clone(), order_id.clone()))
            .collect()
    }

    fn name(&self) -> &'static str {
        "first-available"
    }
}

/// Capacity, range, speed and deadline aware greedy policy.
///
/// Orders are served most urgent first: emergencies before resupply, then
/// orders that can still meet their SLA before those that cannot, then by SLA
/// deadline, creation time and id. Whether an order can still make it is
/// judged by a direct flight of the fastest configured drone from the
/// current time of day. Each available drone takes the most urgent order it
/// can reach and return from, then keeps appending orders in urgency order
/// while its capacity and range allow. The route is flown in the order the
/// stops were added.
#[derive(Clone, Copy, Debug, Default)]
pub struct SlaAware;

impl LaunchPolicy for SlaAware {
    fn decide_launches(&self, scenario: &Scenario, state: &State) -> Vec<Launch> {
        let warehouse = scenario.warehouse_position;
        let top_speed = scenario
            .drones
            .iter()
            .map(|d| d.max_speed)
            .filter(|speed| speed.is_finite() && *speed > 0.0)
            .reduce(f64::max);

        let mut seen = HashSet::new();
        let mut queue: Vec<(Urgency<'_>, &Order, Coord)> = state
            .pending_orders
            .iter()
            .filter(|o| seen.insert(&o.order_id))
            .filter_map(|o| {
                let at = scenario.hospital(&o.hospital)?;
                let eta = top_speed.map(|speed| warehouse.distance(&at) / speed);
                Some((urgency(o, scenario, state.time_of_day, eta), o, at))
            })
            .collect();
        queue.sort_by(|(a, ..), (b, ..)| a.cmp(b));

        let mut taken = vec![false; queue.len()];
        let mut remaining = queue.len();
        let mut launches = Vec::new();

        for drone_id in unique(state.available_drone_ids.iter()) {
            if remaining == 0 {
                break;
            }
            let Some(config) = scenario.drone(drone_id) else {
                continue;
            };
            let capacity = config.max_capacity as usize;

            let mut trip = Trip::new(warehouse);
            for (slot, (_, order, at)) in queue.iter().enumerate() {
                if trip.order_ids.len() >= capacity {
                    break;
                }
                if taken[slot] || trip.length_with(*at) > config.max_range {
                    continue;
                }
                trip.push(order.order_id.clone(), *at);
                taken[slot] = true;
                remaining -= 1;
            }

            if !trip.order_ids.is_empty() {
                launches.push(Launch {
                    drone_id: drone_id.clone(),
                    order_ids: trip.order_ids,
                });
            }
        }

        launches
    }

    fn name(&self) -> &'static str {
        "sla-aware"
    }
}

/// Selectable policies.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum PolicyKind {
    #[default]
    FirstAvailable,
    SlaAware,
}

impl PolicyKind {
    pub fn build(self) -> Box<dyn LaunchPolicy> {
        match self {
            PolicyKind::FirstAvailable => Box::new(FirstAvailable),
            PolicyKind::SlaAware => Box::new(SlaAware),
        }
    }
}

/// A launch list that breaks the per-turn launch rules.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LaunchViolation {
    #[error("{0} is not available")]
    DroneNotAvailable(DroneId),
    #[error("{0} is launched more than once")]
    DroneReused(DroneId),
    #[error("{0} is not pending")]
    OrderNotPending(OrderId),
    #[error("{0} is assigned more than once")]
    OrderReused(OrderId),
    #[error("{0} is launched without orders")]
    EmptyTrip(DroneId),
}

/// Checks that every drone is available and used once, and every order is
/// pending and assigned once.
pub fn validate_launches(state: &State, launches: &[Launch]) -> Result<(), LaunchViolation> {
    let available: HashSet<&DroneId> = state.available_drone_ids.iter().collect();
    let pending: HashSet<&OrderId> = state.pending_orders.iter().map(|o| &o.order_id).collect();

    let mut drones = HashSet::new();
    let mut orders = HashSet::new();
    for launch in launches {
        let drone_id = &launch.drone_id;
        if !available.contains(drone_id) {
            return Err(LaunchViolation::DroneNotAvailable(drone_id.clone()));
        }
        if !drones.insert(drone_id) {
            return Err(LaunchViolation::DroneReused(drone_id.clone()));
        }
        if launch.order_ids.is_empty() {
            return Err(LaunchViolation::EmptyTrip(drone_id.clone()));
        }
        for order_id in &launch.order_ids {
            if !pending.contains(order_id) {
                return Err(LaunchViolation::OrderNotPending(order_id.clone()));
            }
            if !orders.insert(order_id) {
                return Err(LaunchViolation::OrderReused(order_id.clone()));
            }
        }
    }
    Ok(())
}

/// Sort key: priority rank, SLA already lost, deadline, creation time, id.
type Urgency<'a> = (u8, bool, i64, i64, &'a OrderId);

fn urgency<'a>(
    order: &'a Order,
    scenario: &Scenario,
    time_of_day: i64,
    eta_secs: Option<f64>,
) -> Urgency<'a> {
    let deadline = order.deadline(scenario);
    let late = match (deadline, eta_secs) {
        (Some(deadline), Some(eta)) => time_of_day as f64 + eta > deadline as f64,
        _ => false,
    };
    (
        order.priority.rank(),
        late,
        deadline.unwrap_or(i64::MAX),
        order.time,
        &order.order_id,
    )
}

/// First occurrence wins; input order is kept.
fn unique<'a, T: Eq + Hash + 'a>(items: impl Iterator<Item = &'a T>) -> Vec<&'a T> {
    let mut seen = HashSet::new();
    items.filter(|item| seen.insert(*item)).collect()
}

struct Trip {
    warehouse: Coord,
    last_stop: Coord,
    outbound: f64,
    order_ids: Vec<OrderId>,
}

impl Trip {
    fn new(warehouse: Coord) -> Self {
        Self {
            warehouse,
            last_stop: warehouse,
            outbound: 0.0,
            order_ids: Vec::new(),
        }
    }

    /// Full route length, return leg included, if `at` were the next stop.
    fn length_with(&self, at: Coord) -> f64 {
        self.outbound + self.last_stop.distance(&at) + at.distance(&self.warehouse)
    }

    fn push(&mut self, order_id: OrderId, at: Coord) {
        self.outbound += self.last_stop.distance(&at);
        self.last_stop = at;
        self.order_ids.push(order_id);
    }
}
