//! PostgreSQL store. Runtime-checked sqlx queries; schema lives in
//! `migrations/` and is embedded with `sqlx::migrate!`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use meal_schemas::{
    Delivery, DeliveryStatus, DietChart, MealPlan, MealType, NewDietChart, NewPatient, Patient,
    PatientSummary, ResolvedDelivery, ResolvedDietChart,
};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::{Store, StoreError, StoreResult, TransitionGuard};

/// Connect to Postgres at `url`.
pub async fn connect(url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(url)
        .await
        .context("failed to connect to Postgres")?;
    Ok(pool)
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    tracing::info!("db migrations applied");
    Ok(())
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_deliveries_table: bool,
}

/// Connectivity + schema presence.
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as::<_, (i32,)>("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;

    let (exists,): (bool,) = sqlx::query_as::<_, (bool,)>(
        r#"
        select exists (
            select 1
            from information_schema.tables
            where table_schema='public' and table_name='deliveries'
        )
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    Ok(DbStatus {
        ok: one == 1,
        has_deliveries_table: exists,
    })
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

const UNIQUE_VIOLATION: &str = "23505";
const FOREIGN_KEY_VIOLATION: &str = "23503";

fn store_err(what: &str, e: sqlx::Error) -> StoreError {
    match &e {
        sqlx::Error::RowNotFound => StoreError::NotFound(what.to_string()),
        sqlx::Error::Database(db) => match db.code().as_deref() {
            Some(UNIQUE_VIOLATION) | Some(FOREIGN_KEY_VIOLATION) => {
                StoreError::Conflict(format!("{what}: {}", db.message()))
            }
            _ => StoreError::Unavailable(format!("{what}: {e}")),
        },
        _ => StoreError::Unavailable(format!("{what}: {e}")),
    }
}

fn decode<T>(what: &str, r: Result<T, sqlx::Error>) -> StoreResult<T> {
    r.map_err(|e| StoreError::Unavailable(format!("{what}: row decode failed: {e}")))
}

fn parse_domain<T: std::str::FromStr>(what: &str, raw: &str) -> StoreResult<T>
where
    T::Err: std::fmt::Display,
{
    raw.parse()
        .map_err(|e: T::Err| StoreError::Unavailable(format!("{what}: corrupt row: {e}")))
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

const PATIENT_COLUMNS: &str = "id, name, age, gender, room_number, bed_number, floor_number, \
     contact_information, emergency_contact, diseases, allergies, created_at, updated_at";

const CHART_COLUMNS: &str = "id, patient_id, chart_date, morning, evening, night, created_at, updated_at";

/// Diet chart joined with patient; aliases keep delivery columns free.
const RESOLVED_CHART_SELECT: &str = r#"
    c.id as chart_id, c.patient_id, c.chart_date, c.morning, c.evening, c.night,
    c.created_at as chart_created_at, c.updated_at as chart_updated_at,
    p.name as patient_name, p.age as patient_age, p.gender as patient_gender,
    p.room_number, p.bed_number, p.floor_number, p.allergies as patient_allergies
"#;

const DELIVERY_COLUMNS: &str = "id, diet_chart_id, meal_type, status, created_at, updated_at";

fn age_from_db(age: i32) -> StoreResult<u32> {
    u32::try_from(age).map_err(|_| StoreError::Unavailable(format!("corrupt row: negative age {age}")))
}

fn patient_from_row(row: &PgRow) -> StoreResult<Patient> {
    let w = "patient";
    Ok(Patient {
        id: decode(w, row.try_get("id"))?,
        name: decode(w, row.try_get("name"))?,
        age: age_from_db(decode(w, row.try_get("age"))?)?,
        gender: decode(w, row.try_get("gender"))?,
        room_number: decode(w, row.try_get("room_number"))?,
        bed_number: decode(w, row.try_get("bed_number"))?,
        floor_number: decode(w, row.try_get("floor_number"))?,
        contact_information: decode(w, row.try_get("contact_information"))?,
        emergency_contact: decode(w, row.try_get("emergency_contact"))?,
        diseases: decode(w, row.try_get("diseases"))?,
        allergies: decode(w, row.try_get("allergies"))?,
        created_at: decode(w, row.try_get("created_at"))?,
        updated_at: decode(w, row.try_get("updated_at"))?,
    })
}

fn meal_from_row(row: &PgRow, column: &str) -> StoreResult<MealPlan> {
    let Json(plan): Json<MealPlan> = decode("diet chart meal", row.try_get(column))?;
    Ok(plan)
}

fn chart_from_row(row: &PgRow) -> StoreResult<DietChart> {
    let w = "diet chart";
    Ok(DietChart {
        id: decode(w, row.try_get("id"))?,
        patient_id: decode(w, row.try_get("patient_id"))?,
        date: decode(w, row.try_get("chart_date"))?,
        morning: meal_from_row(row, "morning")?,
        evening: meal_from_row(row, "evening")?,
        night: meal_from_row(row, "night")?,
        created_at: decode(w, row.try_get("created_at"))?,
        updated_at: decode(w, row.try_get("updated_at"))?,
    })
}

fn resolved_chart_from_row(row: &PgRow) -> StoreResult<ResolvedDietChart> {
    let w = "resolved diet chart";
    Ok(ResolvedDietChart {
        id: decode(w, row.try_get("chart_id"))?,
        patient: PatientSummary {
            id: decode(w, row.try_get("patient_id"))?,
            name: decode(w, row.try_get("patient_name"))?,
            age: age_from_db(decode(w, row.try_get("patient_age"))?)?,
            gender: decode(w, row.try_get("patient_gender"))?,
            room_number: decode(w, row.try_get("room_number"))?,
            bed_number: decode(w, row.try_get("bed_number"))?,
            floor_number: decode(w, row.try_get("floor_number"))?,
            allergies: decode(w, row.try_get("patient_allergies"))?,
        },
        date: decode(w, row.try_get("chart_date"))?,
        morning: meal_from_row(row, "morning")?,
        evening: meal_from_row(row, "evening")?,
        night: meal_from_row(row, "night")?,
        created_at: decode(w, row.try_get("chart_created_at"))?,
        updated_at: decode(w, row.try_get("chart_updated_at"))?,
    })
}

fn delivery_from_row(row: &PgRow) -> StoreResult<Delivery> {
    let w = "delivery";
    let meal: String = decode(w, row.try_get("meal_type"))?;
    let status: String = decode(w, row.try_get("status"))?;
    Ok(Delivery {
        id: decode(w, row.try_get("id"))?,
        diet_chart_id: decode(w, row.try_get("diet_chart_id"))?,
        meal_type: parse_domain::<MealType>(w, &meal)?,
        status: parse_domain::<DeliveryStatus>(w, &status)?,
        created_at: decode(w, row.try_get("created_at"))?,
        updated_at: decode(w, row.try_get("updated_at"))?,
    })
}

fn resolved_delivery_from_row(row: &PgRow) -> StoreResult<ResolvedDelivery> {
    let delivery = delivery_from_row(row)?;
    let chart = resolved_chart_from_row(row)?;
    Ok(delivery.resolve(chart))
}

// ---------------------------------------------------------------------------
// PgStore
// ---------------------------------------------------------------------------

/// PostgreSQL-backed [`Store`].
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn exists(&self, table: &'static str, id: Uuid) -> StoreResult<bool> {
        let sql = format!("select exists (select 1 from {table} where id = $1)");
        let (found,): (bool,) = sqlx::query_as::<_, (bool,)>(&sql)
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| store_err(table, e))?;
        Ok(found)
    }

    async fn require(&self, table: &'static str, what: &str, id: Uuid) -> StoreResult<()> {
        if self.exists(table, id).await? {
            Ok(())
        } else {
            Err(StoreError::NotFound(format!("{what} {id}")))
        }
    }
}

#[async_trait]
impl Store for PgStore {
    fn backend_name(&self) -> &'static str {
        "postgres"
    }

    async fn insert_patient(&self, p: NewPatient) -> StoreResult<Patient> {
        let age = i32::try_from(p.age)
            .map_err(|_| StoreError::Conflict(format!("patient age out of range: {}", p.age)))?;
        let sql = format!(
            r#"
            insert into patients (
              id, name, age, gender, room_number, bed_number, floor_number,
              contact_information, emergency_contact, diseases, allergies
            ) values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            returning {PATIENT_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(Uuid::new_v4())
            .bind(&p.name)
            .bind(age)
            .bind(&p.gender)
            .bind(&p.room_number)
            .bind(&p.bed_number)
            .bind(&p.floor_number)
            .bind(&p.contact_information)
            .bind(&p.emergency_contact)
            .bind(&p.diseases)
            .bind(&p.allergies)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| store_err("insert patient", e))?;
        patient_from_row(&row)
    }

    async fn find_patient(&self, id: Uuid) -> StoreResult<Patient> {
        let sql = format!("select {PATIENT_COLUMNS} from patients where id = $1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| store_err(&format!("patient {id}"), e))?;
        patient_from_row(&row)
    }

    async fn list_patients(&self) -> StoreResult<Vec<Patient>> {
        let sql = format!("select {PATIENT_COLUMNS} from patients order by created_at, id");
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| store_err("list patients", e))?;
        rows.iter().map(patient_from_row).collect()
    }

    async fn update_patient(&self, id: Uuid, p: NewPatient) -> StoreResult<Patient> {
        let age = i32::try_from(p.age)
            .map_err(|_| StoreError::Conflict(format!("patient age out of range: {}", p.age)))?;
        let sql = format!(
            r#"
            update patients
            set name = $2, age = $3, gender = $4, room_number = $5, bed_number = $6,
                floor_number = $7, contact_information = $8, emergency_contact = $9,
                diseases = $10, allergies = $11, updated_at = now()
            where id = $1
            returning {PATIENT_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(&p.name)
            .bind(age)
            .bind(&p.gender)
            .bind(&p.room_number)
            .bind(&p.bed_number)
            .bind(&p.floor_number)
            .bind(&p.contact_information)
            .bind(&p.emergency_contact)
            .bind(&p.diseases)
            .bind(&p.allergies)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| store_err(&format!("patient {id}"), e))?;
        patient_from_row(&row)
    }

    async fn delete_patient(&self, id: Uuid) -> StoreResult<()> {
        let res = sqlx::query("delete from patients where id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| store_err(&format!("patient {id} still has diet charts"), e))?;
        if res.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("patient {id}")));
        }
        Ok(())
    }

    async fn insert_diet_chart(&self, c: NewDietChart) -> StoreResult<DietChart> {
        self.require("patients", "patient", c.patient_id).await?;
        let sql = format!(
            r#"
            insert into diet_charts (id, patient_id, chart_date, morning, evening, night)
            values ($1, $2, $3, $4, $5, $6)
            returning {CHART_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(Uuid::new_v4())
            .bind(c.patient_id)
            .bind(c.date)
            .bind(Json(&c.morning))
            .bind(Json(&c.evening))
            .bind(Json(&c.night))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| store_err("insert diet chart", e))?;
        chart_from_row(&row)
    }

    async fn find_diet_chart(&self, id: Uuid) -> StoreResult<DietChart> {
        let sql = format!("select {CHART_COLUMNS} from diet_charts where id = $1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| store_err(&format!("diet chart {id}"), e))?;
        chart_from_row(&row)
    }

    async fn resolve_diet_chart(&self, id: Uuid) -> StoreResult<ResolvedDietChart> {
        let sql = format!(
            "select {RESOLVED_CHART_SELECT} from diet_charts c \
             join patients p on p.id = c.patient_id where c.id = $1"
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| store_err(&format!("diet chart {id}"), e))?;
        resolved_chart_from_row(&row)
    }

    async fn list_diet_charts(&self) -> StoreResult<Vec<ResolvedDietChart>> {
        let sql = format!(
            "select {RESOLVED_CHART_SELECT} from diet_charts c \
             join patients p on p.id = c.patient_id order by c.created_at, c.id"
        );
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| store_err("list diet charts", e))?;
        rows.iter().map(resolved_chart_from_row).collect()
    }

    async fn update_diet_chart(&self, id: Uuid, c: NewDietChart) -> StoreResult<DietChart> {
        self.require("patients", "patient", c.patient_id).await?;
        let sql = format!(
            r#"
            update diet_charts
            set patient_id = $2, chart_date = $3, morning = $4, evening = $5, night = $6,
                updated_at = now()
            where id = $1
            returning {CHART_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(c.patient_id)
            .bind(c.date)
            .bind(Json(&c.morning))
            .bind(Json(&c.evening))
            .bind(Json(&c.night))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| store_err(&format!("diet chart {id}"), e))?;
        chart_from_row(&row)
    }

    async fn delete_diet_chart(&self, id: Uuid) -> StoreResult<()> {
        let res = sqlx::query("delete from diet_charts where id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| store_err(&format!("diet chart {id} still has deliveries"), e))?;
        if res.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("diet chart {id}")));
        }
        Ok(())
    }

    async fn find_delivery_by_chart_and_meal(
        &self,
        diet_chart_id: Uuid,
        meal_type: MealType,
    ) -> StoreResult<Option<Delivery>> {
        let sql = format!(
            "select {DELIVERY_COLUMNS} from deliveries where diet_chart_id = $1 and meal_type = $2"
        );
        let row = sqlx::query(&sql)
            .bind(diet_chart_id)
            .bind(meal_type.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| store_err("find delivery by chart and meal", e))?;
        row.as_ref().map(delivery_from_row).transpose()
    }

    async fn insert_delivery(&self, d: Delivery) -> StoreResult<Delivery> {
        self.require("diet_charts", "diet chart", d.diet_chart_id).await?;
        let sql = format!(
            r#"
            insert into deliveries (id, diet_chart_id, meal_type, status, created_at, updated_at)
            values ($1, $2, $3, $4, $5, $6)
            returning {DELIVERY_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(d.id)
            .bind(d.diet_chart_id)
            .bind(d.meal_type.as_str())
            .bind(d.status.as_str())
            .bind(d.created_at)
            .bind(d.updated_at)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                store_err(
                    &format!(
                        "delivery already exists for diet chart {} {}",
                        d.diet_chart_id, d.meal_type
                    ),
                    e,
                )
            })?;
        delivery_from_row(&row)
    }

    async fn update_delivery_status(
        &self,
        id: Uuid,
        status: DeliveryStatus,
        guard: TransitionGuard,
    ) -> StoreResult<Delivery> {
        // The rank check runs inside the UPDATE so it cannot race another writer.
        let sql = format!(
            r#"
            update deliveries
            set status = $2, updated_at = now()
            where id = $1
              and ($3 = false or (case status
                    when 'pending' then 0
                    when 'preparing' then 1
                    when 'ready' then 2
                    when 'delivering' then 3
                    when 'delivered' then 4
                  end) <= $4)
            returning {DELIVERY_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(status.as_str())
            .bind(guard == TransitionGuard::ForwardOnly)
            .bind(i32::from(status.rank()))
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| store_err(&format!("delivery {id}"), e))?;

        if let Some(row) = row {
            return delivery_from_row(&row);
        }

        // Nothing updated: either the id is unknown or the guard refused.
        let current: Option<(String,)> =
            sqlx::query_as::<_, (String,)>("select status from deliveries where id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| store_err(&format!("delivery {id}"), e))?;
        match current {
            None => Err(StoreError::NotFound(format!("delivery {id}"))),
            Some((raw,)) => {
                let current = parse_domain::<DeliveryStatus>("delivery", &raw)?;
                guard.check(id, current, status)?;
                Err(StoreError::Conflict(format!(
                    "delivery {id} changed concurrently; retry the update"
                )))
            }
        }
    }

    async fn resolve_delivery(&self, id: Uuid) -> StoreResult<ResolvedDelivery> {
        let sql = format!(
            r#"
            select d.id, d.diet_chart_id, d.meal_type, d.status, d.created_at, d.updated_at,
                   {RESOLVED_CHART_SELECT}
            from deliveries d
            join diet_charts c on c.id = d.diet_chart_id
            join patients p on p.id = c.patient_id
            where d.id = $1
            "#
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| store_err(&format!("delivery {id}"), e))?;
        resolved_delivery_from_row(&row)
    }

    async fn list_deliveries(
        &self,
        status: Option<DeliveryStatus>,
    ) -> StoreResult<Vec<ResolvedDelivery>> {
        let sql = format!(
            r#"
            select d.id, d.diet_chart_id, d.meal_type, d.status, d.created_at, d.updated_at,
                   {RESOLVED_CHART_SELECT}
            from deliveries d
            join diet_charts c on c.id = d.diet_chart_id
            join patients p on p.id = c.patient_id
            where ($1::text is null or d.status = $1)
            order by d.created_at, d.id
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(status.map(|s| s.as_str()))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| store_err("list deliveries", e))?;
        rows.iter().map(resolved_delivery_from_row).collect()
    }
}
