// src/attendance.rs
//
// Attendance day-state resolver. The backend owns the PENDING -> CLOCKED_IN ->
// COMPLETE state machine; this module observes it, validates what the backend
// reports, and advances it one step per `mark`.

use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::{Result, RrhhError};
use crate::notifier::{Notification, Notifier};

pub type EmployeeId = i64;

// --- Wire types ---

/// `GET /Asistencias/estado/{employeeId}`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EstadoAsistenciaResponse {
    pub tiene_registro: bool,
    pub puede_marcar_entrada: bool,
    pub puede_marcar_salida: bool,
    #[serde(default)]
    pub estado: Option<String>,
    #[serde(default)]
    pub hora_entrada: Option<String>,
    #[serde(default)]
    pub hora_salida: Option<String>,
    #[serde(default)]
    pub mensaje: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarcarRequest {
    pub empleado_id: EmployeeId,
}

/// `POST /Asistencias/marcar`. The backend answers 200 even when it refuses the
/// mark; `exito` carries the real outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarcarResponse {
    pub exito: bool,
    #[serde(default)]
    pub mensaje: Option<String>,
    #[serde(default)]
    pub accion: Option<String>,
    #[serde(default)]
    pub hora: Option<String>,
    #[serde(default)]
    pub estado: Option<String>,
    #[serde(default)]
    pub hora_entrada: Option<String>,
    #[serde(default)]
    pub hora_salida: Option<String>,
    #[serde(default)]
    pub puede_marcar_entrada: bool,
    #[serde(default)]
    pub puede_marcar_salida: bool,
}

// --- Domain types ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttendanceStatus {
    Pending,
    ClockedIn,
    Complete,
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AttendanceStatus::Pending => "PENDING",
            AttendanceStatus::ClockedIn => "CLOCKED_IN",
            AttendanceStatus::Complete => "COMPLETE",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayPhase {
    Pending,
    ClockedIn {
        clock_in: NaiveDateTime,
    },
    Complete {
        clock_in: NaiveDateTime,
        clock_out: NaiveDateTime,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkAction {
    ClockIn,
    ClockOut,
}

impl MarkAction {
    fn from_wire(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "ENTRADA" => Some(MarkAction::ClockIn),
            "SALIDA" => Some(MarkAction::ClockOut),
            _ => None,
        }
    }
}

impl fmt::Display for MarkAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarkAction::ClockIn => f.write_str("ENTRADA"),
            MarkAction::ClockOut => f.write_str("SALIDA"),
        }
    }
}

/// Today's attendance as reported by the backend, validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttendanceDayState {
    pub phase: DayPhase,
    pub has_record: bool,
    pub can_clock_in: bool,
    pub can_clock_out: bool,
    /// Raw backend label (`PRESENTE`, `TARDANZA`, `COMPLETO`, ...), display only.
    pub label: Option<String>,
    pub message: String,
}

const DEFAULT_BLOCKED_MESSAGE: &str = "No puedes marcar en este momento";

impl AttendanceDayState {
    pub fn from_status(response: EstadoAsistenciaResponse, today: NaiveDate) -> Result<Self> {
        Self::build(
            response.tiene_registro,
            response.puede_marcar_entrada,
            response.puede_marcar_salida,
            response.estado,
            response.hora_entrada.as_deref(),
            response.hora_salida.as_deref(),
            response.mensaje,
            today,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        has_record: bool,
        can_clock_in: bool,
        can_clock_out: bool,
        label: Option<String>,
        clock_in: Option<&str>,
        clock_out: Option<&str>,
        message: Option<String>,
        today: NaiveDate,
    ) -> Result<Self> {
        if can_clock_in && can_clock_out {
            return Err(RrhhError::InvalidPayload(
                "backend allows clock-in and clock-out at the same time".to_string(),
            ));
        }

        let clock_in = parse_optional_timestamp(clock_in, today)?;
        let clock_out = parse_optional_timestamp(clock_out, today)?;

        let phase = match (clock_in, clock_out) {
            (None, None) => DayPhase::Pending,
            (Some(clock_in), None) => DayPhase::ClockedIn { clock_in },
            (Some(clock_in), Some(clock_out)) => DayPhase::Complete {
                clock_in,
                clock_out,
            },
            (None, Some(_)) => {
                return Err(RrhhError::InvalidPayload(
                    "clock-out time reported without a clock-in time".to_string(),
                ))
            }
        };

        match phase {
            DayPhase::Pending if can_clock_out => {
                return Err(RrhhError::InvalidPayload(
                    "clock-out offered before any clock-in".to_string(),
                ))
            }
            DayPhase::ClockedIn { .. } if can_clock_in => {
                return Err(RrhhError::InvalidPayload(
                    "clock-in offered after the day was already clocked in".to_string(),
                ))
            }
            DayPhase::Complete { .. } if can_clock_in || can_clock_out => {
                return Err(RrhhError::InvalidPayload(
                    "completed day still offers an action".to_string(),
                ))
            }
            DayPhase::ClockedIn { .. } | DayPhase::Complete { .. } if !has_record => {
                return Err(RrhhError::InvalidPayload(
                    "attendance times reported without a record".to_string(),
                ))
            }
            _ => {}
        }

        let message = message
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| default_message(phase, can_clock_in, can_clock_out).to_string());

        Ok(Self {
            phase,
            has_record,
            can_clock_in,
            can_clock_out,
            label: label.filter(|l| !l.trim().is_empty()),
            message,
        })
    }

    pub fn status(&self) -> AttendanceStatus {
        match self.phase {
            DayPhase::Pending => AttendanceStatus::Pending,
            DayPhase::ClockedIn { .. } => AttendanceStatus::ClockedIn,
            DayPhase::Complete { .. } => AttendanceStatus::Complete,
        }
    }

    pub fn clock_in_time(&self) -> Option<NaiveDateTime> {
        match self.phase {
            DayPhase::Pending => None,
            DayPhase::ClockedIn { clock_in } | DayPhase::Complete { clock_in, .. } => {
                Some(clock_in)
            }
        }
    }

    pub fn clock_out_time(&self) -> Option<NaiveDateTime> {
        match self.phase {
            DayPhase::Complete { clock_out, .. } => Some(clock_out),
            _ => None,
        }
    }

    /// The action the single dashboard button would perform, if enabled.
    pub fn next_action(&self) -> Option<MarkAction> {
        if self.can_clock_in {
            Some(MarkAction::ClockIn)
        } else if self.can_clock_out {
            Some(MarkAction::ClockOut)
        } else {
            None
        }
    }
}

fn default_message(phase: DayPhase, can_clock_in: bool, can_clock_out: bool) -> &'static str {
    match phase {
        DayPhase::Pending if can_clock_in => "Puedes marcar tu entrada",
        DayPhase::ClockedIn { .. } if can_clock_out => "Puedes marcar tu salida",
        DayPhase::Complete { .. } => "Jornada completada",
        _ => DEFAULT_BLOCKED_MESSAGE,
    }
}

/// Backend timestamps arrive as `2026-01-13T08:12:00` (optionally with
/// fractional seconds or an offset), or as a bare `08:12:00` for today.
pub fn parse_backend_timestamp(raw: &str, today: NaiveDate) -> Result<NaiveDateTime> {
    let raw = raw.trim();
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Ok(dt);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Local).naive_local());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f") {
        return Ok(dt);
    }
    if let Ok(time) = NaiveTime::parse_from_str(raw, "%H:%M:%S%.f") {
        return Ok(today.and_time(time));
    }
    if let Ok(time) = NaiveTime::parse_from_str(raw, "%H:%M") {
        return Ok(today.and_time(time));
    }
    Err(RrhhError::InvalidPayload(format!(
        "unrecognised timestamp '{}'",
        raw
    )))
}

fn parse_optional_timestamp(raw: Option<&str>, today: NaiveDate) -> Result<Option<NaiveDateTime>> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        Some(value) => parse_backend_timestamp(value, today).map(Some),
        None => Ok(None),
    }
}

/// Result of a successful mark.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkOutcome {
    pub action: Option<MarkAction>,
    pub at: Option<NaiveDateTime>,
    pub message: String,
    /// Day state after the mark. `None` when neither the mark reply nor the
    /// follow-up read produced a usable state.
    pub state: Option<AttendanceDayState>,
}

impl MarkOutcome {
    /// Only `exito: false` is an error. An accepted mark whose reply cannot be
    /// validated still counts; its state is left to the next read.
    pub fn from_response(response: MarcarResponse, today: NaiveDate) -> Result<Self> {
        if !response.exito {
            return Err(RrhhError::Rejected {
                message: response
                    .mensaje
                    .filter(|m| !m.trim().is_empty())
                    .unwrap_or_else(|| "No se pudo marcar asistencia".to_string()),
            });
        }

        let message = response
            .mensaje
            .clone()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| "Asistencia marcada".to_string());
        let action = response.accion.as_deref().and_then(MarkAction::from_wire);
        let at = match parse_optional_timestamp(response.hora.as_deref(), today) {
            Ok(at) => at,
            Err(e) => {
                warn!("Ignoring mark time in accepted mark: {}", e);
                None
            }
        };

        // The reply may omit the timestamp it just recorded; `hora` carries it.
        let present = |raw: &Option<String>| raw.as_deref().map_or(false, |s| !s.trim().is_empty());
        let mut clock_in = response.hora_entrada;
        let mut clock_out = response.hora_salida;
        match action {
            Some(MarkAction::ClockIn) if !present(&clock_in) => clock_in = response.hora.clone(),
            Some(MarkAction::ClockOut) if !present(&clock_out) => clock_out = response.hora.clone(),
            _ => {}
        }

        let state = match AttendanceDayState::build(
            true,
            response.puede_marcar_entrada,
            response.puede_marcar_salida,
            response.estado,
            clock_in.as_deref(),
            clock_out.as_deref(),
            Some(message.clone()),
            today,
        ) {
            Ok(state) => Some(state),
            Err(e) => {
                warn!("Accepted mark reply has no usable day state: {}", e);
                None
            }
        };

        Ok(Self {
            action,
            at,
            message,
            state,
        })
    }
}

// --- Backend seam ---

#[async_trait]
pub trait AttendanceApi: Send + Sync {
    async fn fetch_day_state(&self, employee_id: EmployeeId) -> Result<EstadoAsistenciaResponse>;
    async fn mark_attendance(&self, employee_id: EmployeeId) -> Result<MarcarResponse>;
}

// --- Resolver ---

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    Applied(AttendanceDayState),
    /// A newer response had already been applied; this one was dropped.
    Stale,
    /// No employee identity yet.
    Skipped,
    /// The read failed; the previous state (if any) is kept.
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DayView {
    Loading,
    Ready(AttendanceDayState),
    Unavailable(String),
}

#[derive(Debug, Default)]
struct ResolverState {
    current: Option<AttendanceDayState>,
    last_applied_seq: u64,
    last_error: Option<String>,
}

struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlight(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn view_of(state: &ResolverState) -> DayView {
    match (&state.current, &state.last_error) {
        (Some(current), _) => DayView::Ready(current.clone()),
        (None, Some(error)) => DayView::Unavailable(error.clone()),
        (None, None) => DayView::Loading,
    }
}

pub struct AttendanceResolver {
    api: Arc<dyn AttendanceApi>,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
    employee_id: Option<EmployeeId>,
    next_seq: AtomicU64,
    marking: AtomicBool,
    state: Mutex<ResolverState>,
    updates: watch::Sender<DayView>,
}

impl AttendanceResolver {
    pub fn new(
        api: Arc<dyn AttendanceApi>,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn Notifier>,
        employee_id: Option<EmployeeId>,
    ) -> Self {
        Self {
            api,
            clock,
            notifier,
            employee_id,
            next_seq: AtomicU64::new(0),
            marking: AtomicBool::new(false),
            state: Mutex::new(ResolverState::default()),
            updates: watch::channel(DayView::Loading).0,
        }
    }

    pub fn employee_id(&self) -> Option<EmployeeId> {
        self.employee_id
    }

    pub fn is_marking(&self) -> bool {
        self.marking.load(Ordering::Acquire)
    }

    pub async fn snapshot(&self) -> Option<AttendanceDayState> {
        self.state.lock().await.current.clone()
    }

    pub async fn view(&self) -> DayView {
        view_of(&*self.state.lock().await)
    }

    /// Receives the view each time it changes.
    pub fn subscribe(&self) -> watch::Receiver<DayView> {
        self.updates.subscribe()
    }

    fn publish(&self, state: &ResolverState) {
        let view = view_of(state);
        self.updates.send_if_modified(|current| {
            if *current == view {
                false
            } else {
                *current = view;
                true
            }
        });
    }

    pub(crate) fn issue_seq(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) async fn apply(&self, seq: u64, fresh: AttendanceDayState) -> RefreshOutcome {
        let mut state = self.state.lock().await;
        if seq < state.last_applied_seq {
            debug!(
                "Discarding stale attendance response (seq {} < last applied {})",
                seq, state.last_applied_seq
            );
            return RefreshOutcome::Stale;
        }
        state.last_applied_seq = seq;
        state.current = Some(fresh.clone());
        state.last_error = None;
        self.publish(&state);
        RefreshOutcome::Applied(fresh)
    }

    /// Re-reads today's state from the backend. Never fails: errors leave the
    /// previous state in place.
    pub async fn refresh(&self) -> RefreshOutcome {
        let Some(employee_id) = self.employee_id else {
            debug!("No employee identity resolved, skipping attendance refresh");
            return RefreshOutcome::Skipped;
        };

        let seq = self.issue_seq();
        let result = self
            .api
            .fetch_day_state(employee_id)
            .await
            .and_then(|response| AttendanceDayState::from_status(response, self.clock.today()));

        match result {
            Ok(fresh) => self.apply(seq, fresh).await,
            Err(e) => {
                warn!(
                    "Failed to refresh attendance state for employee {}: {}",
                    employee_id, e
                );
                let message = e.user_message();
                let mut state = self.state.lock().await;
                state.last_error = Some(message.clone());
                self.publish(&state);
                RefreshOutcome::Failed(message)
            }
        }
    }

    /// Advances today's record by one step (clock-in or clock-out).
    pub async fn mark(&self) -> Result<MarkOutcome> {
        let Some(employee_id) = self.employee_id else {
            self.notifier
                .notify(Notification::error("No hay empleado autenticado"));
            return Err(RrhhError::MissingEmployee);
        };

        let _in_flight = InFlight::acquire(&self.marking).ok_or(RrhhError::MarkInFlight)?;

        if let Some(current) = self.snapshot().await {
            if current.next_action().is_none() {
                return Err(RrhhError::MarkNotAllowed(current.message));
            }
        }

        let seq = self.issue_seq();
        info!("Marking attendance for employee {}", employee_id);
        let result = self
            .api
            .mark_attendance(employee_id)
            .await
            .and_then(|response| MarkOutcome::from_response(response, self.clock.today()));

        let mut outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Attendance mark failed for employee {}: {}", employee_id, e);
                self.notifier.notify(
                    Notification::error("Error al marcar asistencia")
                        .with_description(e.user_message()),
                );
                return Err(e);
            }
        };

        info!(
            "Attendance marked for employee {}: action={:?} status={:?}",
            employee_id,
            outcome.action,
            outcome.state.as_ref().map(AttendanceDayState::status)
        );
        self.notifier
            .notify(Notification::success(outcome.message.clone()));

        if let Some(state) = &outcome.state {
            self.apply(seq, state.clone()).await;
        }
        if let RefreshOutcome::Applied(latest) = self.refresh().await {
            outcome.state = Some(latest);
        }
        Ok(outcome)
    }

    /// Re-fetches on a fixed interval forever; the first tick fires at once.
    pub async fn run_polling(self: Arc<Self>, interval: Duration) {
        info!(
            "Starting attendance polling every {} seconds",
            interval.as_secs()
        );
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            match self.refresh().await {
                RefreshOutcome::Applied(state) => {
                    debug!("Attendance state refreshed: {}", state.status())
                }
                RefreshOutcome::Stale => debug!("Poll response was stale"),
                RefreshOutcome::Skipped => debug!("Poll skipped, no employee"),
                RefreshOutcome::Failed(e) => warn!("Poll failed: {}", e),
            }
        }
    }

    pub fn spawn_polling(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(Arc::clone(self).run_polling(interval))
    }
}
