//! Ordered items: the common shape of modules, lessons and navigation rows.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use lms_core::ServiceError;

/// Anything ordered relative to siblings sharing a parent key.
///
/// `parent_key` is the sibling scope: a course id for modules, a module id
/// for lessons, the parent item (or role, at the root) for navigation rows.
pub trait Ordered {
    fn id(&self) -> &str;
    fn parent_key(&self) -> &str;
    fn order(&self) -> u32;
    fn set_order(&mut self, order: u32);
}

/// Items that can change sibling scope (a lesson moved to another module).
pub trait Reparent: Ordered {
    fn set_parent_key(&mut self, parent_key: &str);
}

/// Minimal ordered record, used where no richer record type is needed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderedItem {
    pub id: String,
    pub parent_key: String,
    pub order: u32,
}

impl OrderedItem {
    pub fn new(id: impl Into<String>, parent_key: impl Into<String>, order: u32) -> Self {
        Self {
            id: id.into(),
            parent_key: parent_key.into(),
            order,
        }
    }
}

impl Ordered for OrderedItem {
    fn id(&self) -> &str {
        &self.id
    }

    fn parent_key(&self) -> &str {
        &self.parent_key
    }

    fn order(&self) -> u32 {
        self.order
    }

    fn set_order(&mut self, order: u32) {
        self.order = order;
    }
}

impl Reparent for OrderedItem {
    fn set_parent_key(&mut self, parent_key: &str) {
        self.parent_key = parent_key.to_string();
    }
}

/// Direction for the up/down controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
        }
    }
}

impl FromStr for Direction {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "up" => Ok(Direction::Up),
            "down" => Ok(Direction::Down),
            other => Err(ServiceError::Validation(format!(
                "unknown direction '{}', expected 'up' or 'down'",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_round_trips_through_str() {
        for dir in [Direction::Up, Direction::Down] {
            assert_eq!(dir.as_str().parse::<Direction>().unwrap(), dir);
        }
        assert!("sideways".parse::<Direction>().is_err());
    }

    #[test]
    fn direction_serde_is_lowercase() {
        assert_eq!(serde_json::to_string(&Direction::Up).unwrap(), "\"up\"");
    }

    #[test]
    fn reparent_rewrites_scope_only() {
        let mut item = OrderedItem::new("l1", "m1", 3);
        item.set_parent_key("m2");
        assert_eq!(item, OrderedItem::new("l1", "m2", 3));
    }
}
