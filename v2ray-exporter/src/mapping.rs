//! Mapping from stats counter names to traffic metric families.
//!
//! The stats service names traffic counters
//! `<entity>>>><id>>>>traffic>>><direction>`, for example
//! `inbound>>>socks-in>>>traffic>>>uplink` or
//! `user>>>alice@example.com>>>traffic>>>downlink`. The service also reports
//! counters that do not follow this shape; those are skipped.

use std::collections::HashMap;

use tracing::trace;
use v2ray_stats::CounterSample;

const DELIMITER: &str = ">>>";

/// The kind of entity a traffic counter belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Entity {
    Inbound,
    Outbound,
    User,
}

impl Entity {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "inbound" => Some(Entity::Inbound),
            "outbound" => Some(Entity::Outbound),
            "user" => Some(Entity::User),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Entity::Inbound => "inbound",
            Entity::Outbound => "outbound",
            Entity::User => "user",
        }
    }

    /// Name of the label that carries the entity identifier.
    pub fn label_name(self) -> &'static str {
        match self {
            Entity::Inbound | Entity::Outbound => "tag",
            Entity::User => "user",
        }
    }
}

/// Traffic direction as seen from the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Direction {
    Uplink,
    Downlink,
}

impl Direction {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "uplink" => Some(Direction::Uplink),
            "downlink" => Some(Direction::Downlink),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Uplink => "uplink",
            Direction::Downlink => "downlink",
        }
    }
}

/// One of the six traffic metric families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrafficFamily {
    pub entity: Entity,
    pub direction: Direction,
}

impl TrafficFamily {
    pub const ALL: [TrafficFamily; 6] = [
        TrafficFamily::new(Entity::Inbound, Direction::Uplink),
        TrafficFamily::new(Entity::Inbound, Direction::Downlink),
        TrafficFamily::new(Entity::Outbound, Direction::Uplink),
        TrafficFamily::new(Entity::Outbound, Direction::Downlink),
        TrafficFamily::new(Entity::User, Direction::Uplink),
        TrafficFamily::new(Entity::User, Direction::Downlink),
    ];

    pub const fn new(entity: Entity, direction: Direction) -> Self {
        Self { entity, direction }
    }

    /// Metric name without the registry prefix, e.g. `inbound_uplink_bytes`.
    pub fn metric_name(&self) -> String {
        format!("{}_{}_bytes", self.entity.as_str(), self.direction.as_str())
    }

    pub fn help(&self) -> String {
        let subject = match self.entity {
            Entity::Inbound => "inbound tag",
            Entity::Outbound => "outbound tag",
            Entity::User => "user",
        };
        format!(
            "Bytes transferred {} per {}, as reported by the stats service",
            self.direction.as_str(),
            subject
        )
    }
}

/// A traffic value ready to be published under one family and label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabeledMetricValue {
    pub family: TrafficFamily,
    /// Entity identifier: inbound/outbound tag or user email.
    pub label: String,
    pub value: i64,
}

/// Parse a counter name into its family and entity identifier.
///
/// Returns `None` unless the name has exactly four `>>>`-separated fields with
/// a known entity, the `traffic` kind, a known direction and a non-empty id.
pub fn parse_stat_name(name: &str) -> Option<(TrafficFamily, &str)> {
    let mut fields = name.split(DELIMITER);
    let entity = Entity::parse(fields.next()?)?;
    let id = fields.next()?;
    let kind = fields.next()?;
    let direction = Direction::parse(fields.next()?)?;

    if fields.next().is_some() || kind != "traffic" || id.is_empty() {
        return None;
    }

    Some((TrafficFamily::new(entity, direction), id))
}

/// Translate raw counters into labeled traffic values.
///
/// Unrecognized counters are dropped. If the same (family, label) pair occurs
/// more than once the last sample wins, so the output never contains
/// duplicates. Output order follows first appearance in the input.
pub fn map_samples(samples: &[CounterSample]) -> Vec<LabeledMetricValue> {
    let mut values: Vec<LabeledMetricValue> = Vec::with_capacity(samples.len());
    let mut seen: HashMap<(TrafficFamily, &str), usize> = HashMap::with_capacity(samples.len());

    for sample in samples {
        let Some((family, id)) = parse_stat_name(&sample.name) else {
            trace!(name = %sample.name, "Ignoring counter outside the traffic schema");
            continue;
        };

        match seen.get(&(family, id)) {
            Some(&index) => values[index].value = sample.value,
            None => {
                seen.insert((family, id), values.len());
                values.push(LabeledMetricValue {
                    family,
                    label: id.to_string(),
                    value: sample.value,
                });
            }
        }
    }

    values
}
