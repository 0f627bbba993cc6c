//! Client-side reconciliation of a baseline fetch with live events.

use meal_schemas::{DeliveryStatus, MealType, ResolvedDelivery, ResolvedDietChart};
use uuid::Uuid;

use crate::BusMsg;

/// What [`DashboardView::apply`] did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// New entry appended.
    Inserted,
    /// Existing entry replaced.
    Replaced,
    /// `newDelivery` for an id already present; nothing changed.
    Duplicate,
    /// Update for an id the view has never seen; caller should re-fetch.
    Unknown,
    /// Event carries no record (heartbeat).
    Ignored,
}

/// Local copy of the delivery and diet-chart lists, as a dashboard holds it.
#[derive(Debug, Clone, Default)]
pub struct DashboardView {
    deliveries: Vec<ResolvedDelivery>,
    diet_charts: Vec<ResolvedDietChart>,
}

impl DashboardView {
    pub fn from_baseline(
        deliveries: Vec<ResolvedDelivery>,
        diet_charts: Vec<ResolvedDietChart>,
    ) -> Self {
        Self {
            deliveries,
            diet_charts,
        }
    }

    pub fn apply(&mut self, msg: &BusMsg) -> Applied {
        match msg {
            BusMsg::NewDelivery(d) => {
                if self.deliveries.iter().any(|x| x.id == d.id) {
                    Applied::Duplicate
                } else {
                    self.deliveries.push(d.clone());
                    Applied::Inserted
                }
            }
            BusMsg::DeliveryUpdated(d) => match self.deliveries.iter_mut().find(|x| x.id == d.id) {
                Some(slot) => {
                    *slot = d.clone();
                    Applied::Replaced
                }
                None => Applied::Unknown,
            },
            BusMsg::DietChartUpdated(c) => {
                // Deliveries embed their chart; keep those copies current too.
                for d in self.deliveries.iter_mut().filter(|d| d.diet_chart.id == c.id) {
                    d.diet_chart = c.clone();
                }
                match self.diet_charts.iter_mut().find(|x| x.id == c.id) {
                    Some(slot) => {
                        *slot = c.clone();
                        Applied::Replaced
                    }
                    None => Applied::Unknown,
                }
            }
            BusMsg::Heartbeat { .. } => Applied::Ignored,
        }
    }

    pub fn deliveries(&self) -> &[ResolvedDelivery] {
        &self.deliveries
    }

    pub fn diet_charts(&self) -> &[ResolvedDietChart] {
        &self.diet_charts
    }

    pub fn deliveries_with(&self, status: Option<DeliveryStatus>) -> Vec<&ResolvedDelivery> {
        self.deliveries
            .iter()
            .filter(|d| status.map_or(true, |s| d.status == s))
            .collect()
    }

    /// `None` means no delivery has been created for that slot yet.
    pub fn delivery_for(
        &self,
        diet_chart_id: Uuid,
        meal_type: MealType,
    ) -> Option<&ResolvedDelivery> {
        self.deliveries
            .iter()
            .find(|d| d.diet_chart.id == diet_chart_id && d.meal_type == meal_type)
    }
}
