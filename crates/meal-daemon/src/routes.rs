//! Axum router and all HTTP handlers for meal-daemon.
//!
//! Every handler except health names the [`Action`] it performs and checks
//! the caller's role (header `x-meal-role`) before touching state.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, put},
    Json, Router,
};
use futures_util::{Stream, StreamExt};
use meal_delivery::access::{permits, Action, Role};
use meal_delivery::{parse_id, parse_meal_type, parse_status, DeliveryError, ErrorKind};
use meal_fanout::SessionStream;
use meal_schemas::{NewDietChart, NewPatient};
use tracing::warn;

use crate::{
    api_types::{
        AccessRefusedResponse, CreateDeliveryRequest, DeliveryListQuery, ErrorResponse,
        HealthResponse, UpdateDeliveryRequest,
    },
    state::AppState,
};

pub const ROLE_HEADER: &str = "x-meal-role";

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/stream", get(stream))
        .route("/api/deliveries", get(list_deliveries).post(create_delivery))
        .route("/api/deliveries/:id", put(update_delivery))
        .route("/api/diet-charts", get(list_diet_charts).post(create_diet_chart))
        .route(
            "/api/diet-charts/:id",
            get(get_diet_chart)
                .put(update_diet_chart)
                .delete(delete_diet_chart),
        )
        .route("/api/patients", get(list_patients).post(create_patient))
        .route(
            "/api/patients/:id",
            get(get_patient).put(update_patient).delete(delete_patient),
        )
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Access and error mapping
// ---------------------------------------------------------------------------

fn authorize(headers: &HeaderMap, action: Action) -> Result<Role, Response> {
    let refused = |status: StatusCode, error: String| {
        (
            status,
            Json(AccessRefusedResponse {
                error,
                action: action.as_str().to_string(),
            }),
        )
            .into_response()
    };

    let Some(raw) = headers.get(ROLE_HEADER).and_then(|v| v.to_str().ok()) else {
        return Err(refused(
            StatusCode::UNAUTHORIZED,
            format!("missing {ROLE_HEADER} header"),
        ));
    };
    let role: Role = raw
        .parse()
        .map_err(|_| refused(StatusCode::UNAUTHORIZED, format!("unknown role {raw:?}")))?;

    if !permits(role, action) {
        return Err(refused(
            StatusCode::FORBIDDEN,
            format!("role {role} may not {}", action.as_str()),
        ));
    }
    Ok(role)
}

fn error_response(e: DeliveryError) -> Response {
    let status = match e.kind() {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
        ErrorKind::Unavailable => {
            warn!(error = %e, "store unavailable");
            StatusCode::SERVICE_UNAVAILABLE
        }
    };
    (status, Json(ErrorResponse::new(e.kind(), e.to_string()))).into_response()
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, Response> {
    payload
        .map(|Json(v)| v)
        .map_err(|rej| error_response(DeliveryError::InvalidInput(rej.body_text())))
}

fn respond<T: serde::Serialize>(status: StatusCode, out: Result<T, DeliveryError>) -> Response {
    match out {
        Ok(v) => (status, Json(v)).into_response(),
        Err(e) => error_response(e),
    }
}

fn no_content(out: Result<(), DeliveryError>) -> Response {
    match out {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}

macro_rules! try_resp {
    ($e:expr) => {
        match $e {
            Ok(v) => v,
            Err(resp) => return resp,
        }
    };
}

// ---------------------------------------------------------------------------
// GET /api/health
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: st.build.service,
            version: st.build.version,
            sessions: st.fanout.session_count(),
            store: st.store_backend,
        }),
    )
}

// ---------------------------------------------------------------------------
// GET /api/stream  (SSE)
// ---------------------------------------------------------------------------

pub(crate) async fn stream(State(st): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let role = try_resp!(authorize(&headers, Action::Subscribe));

    let mut out_headers = HeaderMap::new();
    out_headers.insert("Cache-Control", HeaderValue::from_static("no-cache"));
    out_headers.insert("Connection", HeaderValue::from_static("keep-alive"));

    let session = st.fanout.connect(role.as_str());
    let events = session_to_sse(session.into_stream());

    (out_headers, Sse::new(events).keep_alive(KeepAlive::new())).into_response()
}

fn session_to_sse(session: SessionStream) -> impl Stream<Item = Result<Event, Infallible>> {
    session.filter_map(|msg| async move {
        let data = msg.payload_json().ok()?;
        Some(Ok(Event::default().event(msg.event_name()).data(data)))
    })
}

// ---------------------------------------------------------------------------
// /api/deliveries
// ---------------------------------------------------------------------------

pub(crate) async fn create_delivery(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<CreateDeliveryRequest>, JsonRejection>,
) -> Response {
    try_resp!(authorize(&headers, Action::CreateDelivery));
    let req = try_resp!(body(payload));

    let chart_id = try_resp!(parse_id(&req.diet_chart_id).map_err(error_response));
    let meal = try_resp!(parse_meal_type(&req.meal_type).map_err(error_response));

    respond(
        StatusCode::CREATED,
        st.engine.create_delivery(chart_id, meal).await,
    )
}

pub(crate) async fn update_delivery(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    payload: Result<Json<UpdateDeliveryRequest>, JsonRejection>,
) -> Response {
    try_resp!(authorize(&headers, Action::UpdateDeliveryStatus));
    let req = try_resp!(body(payload));

    let id = try_resp!(parse_id(&id).map_err(error_response));
    let status = try_resp!(parse_status(&req.status).map_err(error_response));

    respond(StatusCode::OK, st.engine.update_status(id, status).await)
}

pub(crate) async fn list_deliveries(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(q): Query<DeliveryListQuery>,
) -> Response {
    try_resp!(authorize(&headers, Action::ViewDeliveries));

    let filter = match q.status.as_deref() {
        None | Some("") => None,
        Some(raw) => Some(try_resp!(parse_status(raw).map_err(error_response))),
    };
    respond(StatusCode::OK, st.engine.list_deliveries(filter).await)
}

// ---------------------------------------------------------------------------
// /api/diet-charts
// ---------------------------------------------------------------------------

pub(crate) async fn list_diet_charts(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    try_resp!(authorize(&headers, Action::ViewDietCharts));
    respond(StatusCode::OK, st.roster.list_diet_charts().await)
}

pub(crate) async fn get_diet_chart(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    try_resp!(authorize(&headers, Action::ViewDietCharts));
    let id = try_resp!(parse_id(&id).map_err(error_response));
    respond(StatusCode::OK, st.roster.get_diet_chart(id).await)
}

pub(crate) async fn create_diet_chart(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<NewDietChart>, JsonRejection>,
) -> Response {
    try_resp!(authorize(&headers, Action::ManageDietCharts));
    let chart = try_resp!(body(payload));
    respond(StatusCode::CREATED, st.roster.create_diet_chart(chart).await)
}

pub(crate) async fn update_diet_chart(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    payload: Result<Json<NewDietChart>, JsonRejection>,
) -> Response {
    try_resp!(authorize(&headers, Action::ManageDietCharts));
    let id = try_resp!(parse_id(&id).map_err(error_response));
    let chart = try_resp!(body(payload));
    respond(StatusCode::OK, st.roster.update_diet_chart(id, chart).await)
}

pub(crate) async fn delete_diet_chart(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    try_resp!(authorize(&headers, Action::ManageDietCharts));
    let id = try_resp!(parse_id(&id).map_err(error_response));
    no_content(st.roster.delete_diet_chart(id).await)
}

// ---------------------------------------------------------------------------
// /api/patients
// ---------------------------------------------------------------------------

pub(crate) async fn list_patients(State(st): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    try_resp!(authorize(&headers, Action::ManagePatients));
    respond(StatusCode::OK, st.roster.list_patients().await)
}

pub(crate) async fn get_patient(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    try_resp!(authorize(&headers, Action::ManagePatients));
    let id = try_resp!(parse_id(&id).map_err(error_response));
    respond(StatusCode::OK, st.roster.get_patient(id).await)
}

pub(crate) async fn create_patient(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<NewPatient>, JsonRejection>,
) -> Response {
    try_resp!(authorize(&headers, Action::ManagePatients));
    let patient = try_resp!(body(payload));
    respond(StatusCode::CREATED, st.roster.create_patient(patient).await)
}

pub(crate) async fn update_patient(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    payload: Result<Json<NewPatient>, JsonRejection>,
) -> Response {
    try_resp!(authorize(&headers, Action::ManagePatients));
    let id = try_resp!(parse_id(&id).map_err(error_response));
    let patient = try_resp!(body(payload));
    respond(StatusCode::OK, st.roster.update_patient(id, patient).await)
}

pub(crate) async fn delete_patient(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    try_resp!(authorize(&headers, Action::ManagePatients));
    let id = try_resp!(parse_id(&id).map_err(error_response));
    no_content(st.roster.delete_patient(id).await)
}
