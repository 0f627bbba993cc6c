use std::sync::Arc;

use meal_db::Store;
use meal_fanout::{BusMsg, FanOut};
use meal_schemas::{NewDietChart, NewPatient, Patient, ResolvedDietChart};
use tracing::info;
use uuid::Uuid;

use crate::error::{DeliveryError, DeliveryResult};
use crate::retry::RetryPolicy;

/// Patient and diet-chart records maintained by the hospital food manager.
pub struct Roster {
    store: Arc<dyn Store>,
    fanout: Arc<FanOut>,
    retry: RetryPolicy,
}

impl Roster {
    pub fn new(store: Arc<dyn Store>, fanout: Arc<FanOut>) -> Self {
        Self {
            store,
            fanout,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    // Patients ---------------------------------------------------------------

    pub async fn create_patient(&self, patient: NewPatient) -> DeliveryResult<Patient> {
        validate_patient(&patient)?;
        let row = self
            .retry
            .run("insert_patient", || self.store.insert_patient(patient.clone()))
            .await?;
        info!(patient_id = %row.id, room = %row.room_number, "patient created");
        Ok(row)
    }

    pub async fn list_patients(&self) -> DeliveryResult<Vec<Patient>> {
        self.retry
            .run("list_patients", || self.store.list_patients())
            .await
            .map_err(DeliveryError::from)
    }

    pub async fn get_patient(&self, id: Uuid) -> DeliveryResult<Patient> {
        self.retry
            .run("find_patient", || self.store.find_patient(id))
            .await
            .map_err(DeliveryError::from)
    }

    pub async fn update_patient(&self, id: Uuid, patient: NewPatient) -> DeliveryResult<Patient> {
        validate_patient(&patient)?;
        let row = self
            .retry
            .run("update_patient", || self.store.update_patient(id, patient.clone()))
            .await?;
        info!(patient_id = %id, "patient updated");
        Ok(row)
    }

    pub async fn delete_patient(&self, id: Uuid) -> DeliveryResult<()> {
        self.retry
            .run("delete_patient", || self.store.delete_patient(id))
            .await?;
        info!(patient_id = %id, "patient deleted");
        Ok(())
    }

    // Diet charts ------------------------------------------------------------

    pub async fn create_diet_chart(&self, chart: NewDietChart) -> DeliveryResult<ResolvedDietChart> {
        let patient = self
            .retry
            .run("find_patient", || self.store.find_patient(chart.patient_id))
            .await?;
        let row = self
            .retry
            .run("insert_diet_chart", || self.store.insert_diet_chart(chart.clone()))
            .await?;
        info!(diet_chart_id = %row.id, patient_id = %patient.id, date = %row.date, "diet chart created");
        Ok(row.resolve(&patient))
    }

    pub async fn list_diet_charts(&self) -> DeliveryResult<Vec<ResolvedDietChart>> {
        self.retry
            .run("list_diet_charts", || self.store.list_diet_charts())
            .await
            .map_err(DeliveryError::from)
    }

    pub async fn get_diet_chart(&self, id: Uuid) -> DeliveryResult<ResolvedDietChart> {
        self.retry
            .run("resolve_diet_chart", || self.store.resolve_diet_chart(id))
            .await
            .map_err(DeliveryError::from)
    }

    /// Replace a diet chart and announce `dietChartUpdated`.
    pub async fn update_diet_chart(
        &self,
        id: Uuid,
        chart: NewDietChart,
    ) -> DeliveryResult<ResolvedDietChart> {
        let patient = self
            .retry
            .run("find_patient", || self.store.find_patient(chart.patient_id))
            .await?;
        let row = self
            .retry
            .run("update_diet_chart", || self.store.update_diet_chart(id, chart.clone()))
            .await?;

        let resolved = row.resolve(&patient);
        info!(diet_chart_id = %id, "diet chart updated");
        self.fanout.publish(BusMsg::DietChartUpdated(resolved.clone()));
        Ok(resolved)
    }

    pub async fn delete_diet_chart(&self, id: Uuid) -> DeliveryResult<()> {
        self.retry
            .run("delete_diet_chart", || self.store.delete_diet_chart(id))
            .await?;
        info!(diet_chart_id = %id, "diet chart deleted");
        Ok(())
    }
}

fn validate_patient(p: &NewPatient) -> DeliveryResult<()> {
    if p.name.trim().is_empty() {
        return Err(DeliveryError::InvalidInput("patient name is required".into()));
    }
    if p.room_number.trim().is_empty() {
        return Err(DeliveryError::InvalidInput("room number is required".into()));
    }
    // Persisted as a Postgres integer.
    if i32::try_from(p.age).is_err() {
        return Err(DeliveryError::InvalidInput(format!(
            "patient age out of range: {}",
            p.age
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    fn patient(age: u32) -> NewPatient {
        NewPatient {
            name: "Amara".to_string(),
            age,
            gender: "female".to_string(),
            room_number: "12".to_string(),
            bed_number: "1".to_string(),
            floor_number: "1".to_string(),
            contact_information: String::new(),
            emergency_contact: String::new(),
            diseases: vec![],
            allergies: vec![],
        }
    }

    #[test]
    fn age_beyond_storage_range_is_invalid_input() {
        assert!(validate_patient(&patient(88)).is_ok());
        assert!(validate_patient(&patient(i32::MAX as u32)).is_ok());
        let err = validate_patient(&patient(u32::MAX)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn name_and_room_are_required() {
        let mut p = patient(40);
        p.name = "  ".to_string();
        assert_eq!(validate_patient(&p).unwrap_err().kind(), ErrorKind::InvalidInput);

        let mut p = patient(40);
        p.room_number = String::new();
        assert_eq!(validate_patient(&p).unwrap_err().kind(), ErrorKind::InvalidInput);
    }
}
