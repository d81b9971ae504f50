// src/payroll_gate.rs
//
// Decides on each dashboard load whether a biweekly payroll period should be
// generated, and remembers per month which periods the client already
// triggered. The backend stays the authority on duplicates.

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::attendance::EmployeeId;
use crate::clock::Clock;
use crate::error::{Result, RrhhError};
use crate::notifier::{Notification, Notifier};
use crate::payroll::{BiweeklyPeriod, DetalleNomina, GenerarNominaQuincenalRequest, NominaDto, Quincena};
use crate::storage::{get_json, set_json, KeyValueStore};

pub fn flag_key(year: i32, month: u32) -> String {
    format!("nomina_generada_{}_{}", year, month)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayrollGenerationFlag {
    #[serde(default)]
    pub quincena1: bool,
    #[serde(default)]
    pub quincena2: bool,
}

impl PayrollGenerationFlag {
    pub fn is_generated(&self, quincena: Quincena) -> bool {
        match quincena {
            Quincena::First => self.quincena1,
            Quincena::Second => self.quincena2,
        }
    }

    pub fn mark_generated(&mut self, quincena: Quincena) {
        match quincena {
            Quincena::First => self.quincena1 = true,
            Quincena::Second => self.quincena2 = true,
        }
    }
}

#[async_trait]
pub trait PayrollApi: Send + Sync {
    async fn generate_biweekly_payroll(
        &self,
        request: &GenerarNominaQuincenalRequest,
    ) -> Result<Vec<DetalleNomina>>;
    async fn list_payrolls(&self) -> Result<Vec<NominaDto>>;
}

/// Periods the automatic check should generate on `today`, given the flag
/// stored under the current month's key.
///
/// The first half of the current month is due from the 16th. The second half
/// of the previous month is due from the 1st, so it is offered on every load
/// until its slot in the current month's flag is set.
pub fn due_periods(today: NaiveDate, flag: &PayrollGenerationFlag) -> Vec<BiweeklyPeriod> {
    let mut due = Vec::with_capacity(2);

    let first_half = BiweeklyPeriod::containing(today.with_day(1).unwrap_or(today));
    if first_half.is_closed(today) && !flag.quincena1 {
        due.push(first_half);
    }

    let previous_second_half = BiweeklyPeriod::second_of_previous_month(today);
    if previous_second_half.is_closed(today) && !flag.quincena2 {
        due.push(previous_second_half);
    }

    due
}

#[derive(Debug, Clone)]
pub struct GateReport {
    pub checked_on: NaiveDate,
    pub generated: Vec<(BiweeklyPeriod, usize)>,
    pub failed: Vec<(BiweeklyPeriod, String)>,
    /// Generated periods whose flag could not be saved. They are offered again
    /// on the next load; the backend refuses the duplicate.
    pub unsaved_flags: Vec<(BiweeklyPeriod, String)>,
    /// Payroll rows re-read after a successful generation.
    pub refreshed: Option<Vec<NominaDto>>,
}

impl GateReport {
    pub fn is_noop(&self) -> bool {
        self.generated.is_empty() && self.failed.is_empty()
    }
}

pub struct PayrollGate {
    api: Arc<dyn PayrollApi>,
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
}

impl PayrollGate {
    pub fn new(
        api: Arc<dyn PayrollApi>,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            api,
            store,
            clock,
            notifier,
        }
    }

    /// Reads the flag for `today`'s month, creating it when absent.
    pub fn load_flag(&self, today: NaiveDate) -> Result<PayrollGenerationFlag> {
        let key = flag_key(today.year(), today.month());
        match get_json::<PayrollGenerationFlag>(self.store.as_ref(), &key) {
            Ok(Some(flag)) => Ok(flag),
            Ok(None) => {
                debug!("Initialising payroll flag '{}'", key);
                let flag = PayrollGenerationFlag::default();
                set_json(self.store.as_ref(), &key, &flag)?;
                Ok(flag)
            }
            Err(RrhhError::Json(e)) => {
                warn!("Payroll flag '{}' is unreadable, resetting it: {}", key, e);
                let flag = PayrollGenerationFlag::default();
                set_json(self.store.as_ref(), &key, &flag)?;
                Ok(flag)
            }
            Err(e) => Err(e),
        }
    }

    /// Runs both generation rules once. Generation failures are reported
    /// through the notifier and the report; only a failure to load the flag is
    /// returned.
    pub async fn run_automatic_check(&self) -> Result<GateReport> {
        let today = self.clock.today();
        let key = flag_key(today.year(), today.month());
        let mut flag = self.load_flag(today)?;

        let mut report = GateReport {
            checked_on: today,
            generated: Vec::new(),
            failed: Vec::new(),
            unsaved_flags: Vec::new(),
            refreshed: None,
        };

        let due = due_periods(today, &flag);
        if due.is_empty() {
            debug!("No payroll period due on {} (flag {:?})", today, flag);
            return Ok(report);
        }

        for period in due {
            info!("Automatic payroll generation for {}", period);
            let request = GenerarNominaQuincenalRequest::for_period(period, today);
            match self.api.generate_biweekly_payroll(&request).await {
                Ok(rows) => {
                    flag.mark_generated(period.quincena());
                    if let Err(e) = set_json(self.store.as_ref(), &key, &flag) {
                        error!("Failed to save payroll flag '{}' after generating {}: {}", key, period, e);
                        self.notifier.notify(
                            Notification::warning("No se pudo guardar el estado de la nómina")
                                .with_description(e.user_message()),
                        );
                        report.unsaved_flags.push((period, e.user_message()));
                    }
                    info!(
                        "Generated payroll for {} ({} employees)",
                        period,
                        rows.len()
                    );
                    let description = match period.quincena() {
                        Quincena::First => "Primera quincena generada exitosamente",
                        Quincena::Second => "Segunda quincena generada exitosamente",
                    };
                    self.notifier.notify(
                        Notification::success("Nómina generada automáticamente")
                            .with_description(description),
                    );
                    report.generated.push((period, rows.len()));
                }
                Err(e) => {
                    error!("Automatic payroll generation for {} failed: {}", period, e);
                    let message = e.user_message();
                    self.notifier.notify(
                        Notification::error("Error al generar nómina automáticamente")
                            .with_description(message.clone()),
                    );
                    report.failed.push((period, message));
                }
            }
        }

        if !report.generated.is_empty() {
            match self.api.list_payrolls().await {
                Ok(rows) => report.refreshed = Some(rows),
                Err(e) => warn!("Failed to reload payrolls after generation: {}", e),
            }
        }

        Ok(report)
    }

    /// Generates a period on demand. Flags are neither read nor written.
    pub async fn generate_manual(
        &self,
        period: BiweeklyPeriod,
        fecha_pago: Option<NaiveDate>,
        empleados_ids: Option<Vec<EmployeeId>>,
    ) -> Result<Vec<DetalleNomina>> {
        let today = self.clock.today();
        if !period.is_closed(today) {
            return Err(RrhhError::PeriodNotClosed {
                period,
                closes_on: period.closes_on(),
            });
        }

        let request = GenerarNominaQuincenalRequest::for_period(period, fecha_pago.unwrap_or(today))
            .with_employees(empleados_ids);
        info!(
            "Manual payroll generation for {} (pay date {}, employees {:?})",
            period, request.fecha_pago, request.empleados_ids
        );

        match self.api.generate_biweekly_payroll(&request).await {
            Ok(rows) => {
                self.notifier.notify(
                    Notification::success("Nómina generada")
                        .with_description(format!("{}: {} empleados", period, rows.len())),
                );
                Ok(rows)
            }
            Err(e) => {
                error!("Manual payroll generation for {} failed: {}", period, e);
                self.notifier.notify(
                    Notification::error("Error al generar nómina").with_description(e.user_message()),
                );
                Err(e)
            }
        }
    }
}
