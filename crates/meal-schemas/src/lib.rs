//! Shared record types for the meal delivery service.
//!
//! Everything here is plain data: `Serialize + Deserialize`, camelCase on
//! the wire, no IO. Cross-references between records are by id; the
//! `Resolved*` types are the joined shapes handed to dashboards and carried
//! on the fan-out bus.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Domain parse error
// ---------------------------------------------------------------------------

/// A string fell outside one of the fixed value domains.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {domain}: {value:?}")]
pub struct DomainError {
    pub domain: &'static str,
    pub value: String,
}

// ---------------------------------------------------------------------------
// MealType
// ---------------------------------------------------------------------------

/// Which diet-chart slot a delivery corresponds to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MealType {
    Morning,
    Evening,
    Night,
}

impl MealType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MealType::Morning => "morning",
            MealType::Evening => "evening",
            MealType::Night => "night",
        }
    }
}

impl fmt::Display for MealType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MealType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "morning" => Ok(MealType::Morning),
            "evening" => Ok(MealType::Evening),
            "night" => Ok(MealType::Night),
            other => Err(DomainError {
                domain: "meal type",
                value: other.to_string(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// DeliveryStatus
// ---------------------------------------------------------------------------

/// Delivery lifecycle status, declared in forward order.
///
/// `pending` exists in the domain but freshly created deliveries start at
/// `preparing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Preparing,
    Ready,
    Delivering,
    Delivered,
}

impl DeliveryStatus {
    pub const ALL: [DeliveryStatus; 5] = [
        DeliveryStatus::Pending,
        DeliveryStatus::Preparing,
        DeliveryStatus::Ready,
        DeliveryStatus::Delivering,
        DeliveryStatus::Delivered,
    ];

    /// Position in the forward progression (0 = pending, 4 = delivered).
    pub fn rank(&self) -> u8 {
        match self {
            DeliveryStatus::Pending => 0,
            DeliveryStatus::Preparing => 1,
            DeliveryStatus::Ready => 2,
            DeliveryStatus::Delivering => 3,
            DeliveryStatus::Delivered => 4,
        }
    }

    /// True when moving from `self` to `next` would go backward.
    pub fn is_backward_to(&self, next: DeliveryStatus) -> bool {
        next.rank() < self.rank()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Preparing => "preparing",
            DeliveryStatus::Ready => "ready",
            DeliveryStatus::Delivering => "delivering",
            DeliveryStatus::Delivered => "delivered",
        }
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DeliveryStatus::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| DomainError {
                domain: "delivery status",
                value: s.to_string(),
            })
    }
}

// ---------------------------------------------------------------------------
// Patient
// ---------------------------------------------------------------------------

/// Full patient record. Contains contact details; only the manager role
/// ever sees this shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Patient {
    pub id: Uuid,
    pub name: String,
    pub age: u32,
    pub gender: String,
    pub room_number: String,
    pub bed_number: String,
    pub floor_number: String,
    pub contact_information: String,
    pub emergency_contact: String,
    pub diseases: Vec<String>,
    pub allergies: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Patient fields supplied on create and on full replace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPatient {
    pub name: String,
    pub age: u32,
    pub gender: String,
    pub room_number: String,
    pub bed_number: String,
    pub floor_number: String,
    #[serde(default)]
    pub contact_information: String,
    #[serde(default)]
    pub emergency_contact: String,
    #[serde(default)]
    pub diseases: Vec<String>,
    #[serde(default)]
    pub allergies: Vec<String>,
}

impl NewPatient {
    pub fn into_patient(self, id: Uuid, created_at: DateTime<Utc>) -> Patient {
        Patient {
            id,
            name: self.name,
            age: self.age,
            gender: self.gender,
            room_number: self.room_number,
            bed_number: self.bed_number,
            floor_number: self.floor_number,
            contact_information: self.contact_information,
            emergency_contact: self.emergency_contact,
            diseases: self.diseases,
            allergies: self.allergies,
            created_at,
            updated_at: created_at,
        }
    }
}

/// The part of a patient that joined records may expose to every role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientSummary {
    pub id: Uuid,
    pub name: String,
    pub age: u32,
    pub gender: String,
    pub room_number: String,
    pub bed_number: String,
    pub floor_number: String,
    pub allergies: Vec<String>,
}

impl From<&Patient> for PatientSummary {
    fn from(p: &Patient) -> Self {
        Self {
            id: p.id,
            name: p.name.clone(),
            age: p.age,
            gender: p.gender.clone(),
            room_number: p.room_number.clone(),
            bed_number: p.bed_number.clone(),
            floor_number: p.floor_number.clone(),
            allergies: p.allergies.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// DietChart
// ---------------------------------------------------------------------------

/// One meal slot of a diet chart.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MealPlan {
    #[serde(default)]
    pub ingredients: Vec<String>,
    #[serde(default)]
    pub instructions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DietChart {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub date: NaiveDate,
    pub morning: MealPlan,
    pub evening: MealPlan,
    pub night: MealPlan,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DietChart {
    /// Join with the owning patient.
    pub fn resolve(self, patient: &Patient) -> ResolvedDietChart {
        ResolvedDietChart {
            id: self.id,
            patient: PatientSummary::from(patient),
            date: self.date,
            morning: self.morning,
            evening: self.evening,
            night: self.night,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewDietChart {
    pub patient_id: Uuid,
    pub date: NaiveDate,
    #[serde(default)]
    pub morning: MealPlan,
    #[serde(default)]
    pub evening: MealPlan,
    #[serde(default)]
    pub night: MealPlan,
}

impl NewDietChart {
    pub fn into_chart(self, id: Uuid, created_at: DateTime<Utc>) -> DietChart {
        DietChart {
            id,
            patient_id: self.patient_id,
            date: self.date,
            morning: self.morning,
            evening: self.evening,
            night: self.night,
            created_at,
            updated_at: created_at,
        }
    }
}

/// Diet chart joined with its patient summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedDietChart {
    pub id: Uuid,
    pub patient: PatientSummary,
    pub date: NaiveDate,
    pub morning: MealPlan,
    pub evening: MealPlan,
    pub night: MealPlan,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ResolvedDietChart {
    pub fn meal(&self, meal_type: MealType) -> &MealPlan {
        match meal_type {
            MealType::Morning => &self.morning,
            MealType::Evening => &self.evening,
            MealType::Night => &self.night,
        }
    }
}

// ---------------------------------------------------------------------------
// Delivery
// ---------------------------------------------------------------------------

/// Fulfilment record for one meal slot of one diet chart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Delivery {
    pub id: Uuid,
    pub diet_chart_id: Uuid,
    pub meal_type: MealType,
    pub status: DeliveryStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Delivery {
    /// A fresh delivery in the initial `preparing` state.
    pub fn new(diet_chart_id: Uuid, meal_type: MealType, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            diet_chart_id,
            meal_type,
            status: DeliveryStatus::Preparing,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn resolve(self, diet_chart: ResolvedDietChart) -> ResolvedDelivery {
        ResolvedDelivery {
            id: self.id,
            diet_chart,
            meal_type: self.meal_type,
            status: self.status,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Delivery joined with its diet chart and patient summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedDelivery {
    pub id: Uuid,
    pub diet_chart: ResolvedDietChart,
    pub meal_type: MealType,
    pub status: DeliveryStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ResolvedDelivery {
    /// The meal slot this delivery carries.
    pub fn meal(&self) -> &MealPlan {
        self.diet_chart.meal(self.meal_type)
    }
}
