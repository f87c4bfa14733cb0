// crates/api/src/model.rs
//
// Value types shared by the wire protocol and the scheduler. Field names on the
// wire are PascalCase; the reference server is written in Go and serializes nil
// slices as `null`, so every list here treats `null` as empty.

use serde::de::{self, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Identifier as the server sends it: a bare integer, or a name such as
/// `"order-12"`. It is echoed back in exactly the form it arrived in.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Ident {
    Num(i64),
    Name(String),
}

impl Ident {
    /// Reads an identifier out of a JSON object key, where integers arrive as
    /// strings.
    pub fn from_key(key: &str) -> Self {
        key.parse()
            .map(Ident::Num)
            .unwrap_or_else(|_| Ident::Name(key.to_owned()))
    }
}

macro_rules! ident_newtype {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Ident);

        impl From<i64> for $name {
            fn from(n: i64) -> Self {
                Self(Ident::Num(n))
            }
        }

        impl From<&str> for $name {
            fn from(name: &str) -> Self {
                Self(Ident::Name(name.to_owned()))
            }
        }

        impl From<String> for $name {
            fn from(name: String) -> Self {
                Self(Ident::Name(name))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match &self.0 {
                    Ident::Num(n) => write!(f, concat!($prefix, "-{}"), n),
                    Ident::Name(name) => f.write_str(name),
                }
            }
        }
    };
}

ident_newtype!(
    /// Server-assigned drone identifier, stable for the life of a scenario.
    DroneId,
    "drone"
);
ident_newtype!(
    /// Server-assigned order identifier, stable for the life of a scenario.
    OrderId,
    "order"
);

/// Planar position in the scenario's coordinate space.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Coord {
    pub x: f64,
    pub y: f64,
}

impl Coord {
    pub fn distance(&self, other: &Coord) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Priority {
    Emergency,
    Resupply,
}

impl Priority {
    /// Lower is more urgent.
    pub fn rank(self) -> u8 {
        match self {
            Priority::Emergency => 0,
            Priority::Resupply => 1,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DroneConfig {
    pub drone_id: DroneId,
    /// Maximum number of orders carried on one trip.
    pub max_capacity: u32,
    pub max_speed: f64,
    /// Maximum flight distance of one trip, return leg included.
    pub max_range: f64,
}

/// Immutable configuration of one scenario run.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Scenario {
    #[serde(default)]
    pub warehouse_position: Coord,
    #[serde(default, deserialize_with = "null_as_default")]
    pub hospitals: BTreeMap<String, Coord>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub drones: Vec<DroneConfig>,
    #[serde(default)]
    pub max_time: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub sla_secs: BTreeMap<Priority, i64>,
}

impl Scenario {
    pub fn drone(&self, id: &DroneId) -> Option<&DroneConfig> {
        self.drones.iter().find(|d| d.drone_id == *id)
    }

    pub fn hospital(&self, name: &str) -> Option<Coord> {
        self.hospitals.get(name).copied()
    }

    pub fn sla_secs(&self, priority: Priority) -> Option<i64> {
        self.sla_secs.get(&priority).copied()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Order {
    pub order_id: OrderId,
    /// Simulated time at which the order was created.
    pub time: i64,
    pub hospital: String,
    pub priority: Priority,
}

impl Order {
    /// Simulated time by which the order should be delivered, if the scenario
    /// defines an SLA for its priority.
    pub fn deadline(&self, scenario: &Scenario) -> Option<i64> {
        scenario
            .sla_secs(self.priority)
            .map(|sla| self.time.saturating_add(sla))
    }
}

/// A drone that is currently flying or recharging.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DroneStatus {
    pub drone_id: DroneId,
    pub time_to_availability: i64,
}

/// Self-contained snapshot of the world for one turn.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct State {
    #[serde(default)]
    pub time_of_day: i64,
    /// Accepts both a list of orders and an object keyed by order id.
    #[serde(default, deserialize_with = "pending_orders")]
    pub pending_orders: Vec<Order>,
    #[serde(default, alias = "AvailableDrones", deserialize_with = "null_as_default")]
    pub available_drone_ids: Vec<DroneId>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub busy_drones: Vec<DroneStatus>,
}

/// One drone sent out with one or more orders.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Launch {
    pub drone_id: DroneId,
    #[serde(default, deserialize_with = "null_as_default")]
    pub order_ids: Vec<OrderId>,
}

impl Launch {
    pub fn single(drone_id: DroneId, order_id: OrderId) -> Self {
        Self {
            drone_id,
            order_ids: vec![order_id],
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct KeySpec {
    pub full_name: String,
    pub stat_name: String,
    /// Ranking hint for leaderboards; opaque to the scheduler.
    pub priority: serde_json::Value,
    #[serde(rename = "Type")]
    pub kind: String,
    pub should_display: bool,
    pub display_name: String,
}

/// End-of-run summary. Reporting only.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Stats {
    #[serde(default, deserialize_with = "null_as_default")]
    pub key_specs: Vec<KeySpec>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub values: serde_json::Map<String, serde_json::Value>,
}

impl Stats {
    /// Values in key-spec order. A spec without a value yields `None`.
    pub fn ordered_values(&self) -> impl Iterator<Item = (&KeySpec, Option<&serde_json::Value>)> {
        self.key_specs
            .iter()
            .map(|spec| (spec, self.values.get(&spec.full_name)))
    }
}

pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Value of a keyed `PendingOrders` entry, where the id may live only in the key.
#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct KeyedOrder {
    #[serde(default)]
    order_id: Option<OrderId>,
    time: i64,
    hospital: String,
    priority: Priority,
}

fn pending_orders<'de, D>(deserializer: D) -> Result<Vec<Order>, D::Error>
where
    D: Deserializer<'de>,
{
    struct PendingOrdersVisitor;

    impl<'de> Visitor<'de> for PendingOrdersVisitor {
        type Value = Vec<Order>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a list of orders or an object of orders keyed by id")
        }

        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(Vec::new())
        }

        fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(Vec::new())
        }

        fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
            let mut orders = Vec::with_capacity(seq.size_hint().unwrap_or(0));
            while let Some(order) = seq.next_element::<Order>()? {
                orders.push(order);
            }
            Ok(orders)
        }

        // An `OrderId` inside the value wins over the key.
        fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
            let mut orders = Vec::with_capacity(map.size_hint().unwrap_or(0));
            while let Some((key, order)) = map.next_entry::<String, KeyedOrder>()? {
                orders.push(Order {
                    order_id: order
                        .order_id
                        .unwrap_or_else(|| OrderId(Ident::from_key(&key))),
                    time: order.time,
                    hospital: order.hospital,
                    priority: order.priority,
                });
            }
            Ok(orders)
        }
    }

    deserializer.deserialize_any(PendingOrdersVisitor)
}
