//! Server-side role gating.
//!
//! The auth gateway in front of the daemon sets the caller's role; every
//! route names the [`Action`] it performs and asks [`permits`] before doing
//! anything.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Hospital food manager.
    Manager,
    /// Inner pantry staff.
    Pantry,
    /// Delivery personnel.
    Delivery,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Manager => "manager",
            Role::Pantry => "pantry",
            Role::Delivery => "delivery",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unrecognized role string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "manager" => Ok(Role::Manager),
            "pantry" => Ok(Role::Pantry),
            "delivery" => Ok(Role::Delivery),
            _ => Err(UnknownRole(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Read or write patient records, including contact and disease fields.
    ManagePatients,
    ManageDietCharts,
    ViewDietCharts,
    CreateDelivery,
    UpdateDeliveryStatus,
    ViewDeliveries,
    /// Open the live event stream.
    Subscribe,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::ManagePatients => "manage_patients",
            Action::ManageDietCharts => "manage_diet_charts",
            Action::ViewDietCharts => "view_diet_charts",
            Action::CreateDelivery => "create_delivery",
            Action::UpdateDeliveryStatus => "update_delivery_status",
            Action::ViewDeliveries => "view_deliveries",
            Action::Subscribe => "subscribe",
        }
    }
}

pub fn permits(role: Role, action: Action) -> bool {
    use Action::*;
    use Role::*;
    match action {
        ManagePatients | ManageDietCharts => role == Manager,
        ViewDietCharts => matches!(role, Manager | Pantry),
        CreateDelivery => role == Pantry,
        UpdateDeliveryStatus => matches!(role, Pantry | Delivery),
        ViewDeliveries | Subscribe => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_map_matches_desk_duties() {
        assert!(permits(Role::Manager, Action::ManagePatients));
        assert!(!permits(Role::Pantry, Action::ManagePatients));
        assert!(!permits(Role::Delivery, Action::ViewDietCharts));
        assert!(permits(Role::Pantry, Action::ViewDietCharts));
        assert!(permits(Role::Pantry, Action::CreateDelivery));
        assert!(!permits(Role::Manager, Action::CreateDelivery));
        assert!(permits(Role::Delivery, Action::UpdateDeliveryStatus));
        assert!(!permits(Role::Manager, Action::UpdateDeliveryStatus));
        for r in [Role::Manager, Role::Pantry, Role::Delivery] {
            assert!(permits(r, Action::ViewDeliveries));
            assert!(permits(r, Action::Subscribe));
        }
    }

    #[test]
    fn role_parse_is_case_insensitive() {
        assert_eq!("Pantry".parse::<Role>(), Ok(Role::Pantry));
        assert!("admin".parse::<Role>().is_err());
    }
}
