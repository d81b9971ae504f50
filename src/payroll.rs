// src/payroll.rs
//
// Payroll (nómina) types. All amounts are computed by the backend; the client
// only formats and displays them.

use chrono::{Datelike, Days, Months, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write;

use crate::attendance::EmployeeId;
use crate::error::{Result, RrhhError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Quincena {
    /// Days 1-15.
    First,
    /// Day 16 to the end of the month.
    Second,
}

impl Quincena {
    pub fn number(self) -> u8 {
        match self {
            Quincena::First => 1,
            Quincena::Second => 2,
        }
    }
}

impl TryFrom<u8> for Quincena {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(Quincena::First),
            2 => Ok(Quincena::Second),
            other => Err(format!("quincena must be 1 or 2, got {}", other)),
        }
    }
}

impl From<Quincena> for u8 {
    fn from(value: Quincena) -> Self {
        value.number()
    }
}

/// One biweekly payroll period of a given month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BiweeklyPeriod {
    quincena: Quincena,
    month_start: NaiveDate,
}

impl BiweeklyPeriod {
    pub fn new(quincena: Quincena, month: u32, year: i32) -> Result<Self> {
        let month_start = NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(|| {
            RrhhError::InvalidPeriod(format!("{}/{} is not a valid month", month, year))
        })?;
        Ok(Self {
            quincena,
            month_start,
        })
    }

    /// The period a given day falls in.
    pub fn containing(date: NaiveDate) -> Self {
        let quincena = if date.day() <= 15 {
            Quincena::First
        } else {
            Quincena::Second
        };
        Self {
            quincena,
            month_start: month_start_of(date),
        }
    }

    /// Second half of the month before `date`'s month (December of the previous
    /// year when `date` is in January).
    pub fn second_of_previous_month(date: NaiveDate) -> Self {
        Self {
            quincena: Quincena::Second,
            month_start: month_start_of(date) - Months::new(1),
        }
    }

    pub fn quincena(&self) -> Quincena {
        self.quincena
    }

    pub fn month(&self) -> u32 {
        self.month_start.month()
    }

    pub fn year(&self) -> i32 {
        self.month_start.year()
    }

    pub fn start_date(&self) -> NaiveDate {
        match self.quincena {
            Quincena::First => self.month_start,
            Quincena::Second => self.month_start + Days::new(15),
        }
    }

    pub fn end_date(&self) -> NaiveDate {
        match self.quincena {
            Quincena::First => self.month_start + Days::new(14),
            Quincena::Second => self.next_month_start() - Days::new(1),
        }
    }

    /// First day on which the period may be generated: the 16th for the first
    /// half, the 1st of the next month for the second half.
    pub fn closes_on(&self) -> NaiveDate {
        self.end_date() + Days::new(1)
    }

    pub fn is_closed(&self, today: NaiveDate) -> bool {
        today >= self.closes_on()
    }

    fn next_month_start(&self) -> NaiveDate {
        self.month_start + Months::new(1)
    }
}

fn month_start_of(date: NaiveDate) -> NaiveDate {
    date - Days::new(u64::from(date.day0()))
}

impl fmt::Display for BiweeklyPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ordinal = match self.quincena {
            Quincena::First => "1ª",
            Quincena::Second => "2ª",
        };
        write!(f, "{} quincena {:02}/{}", ordinal, self.month(), self.year())
    }
}

/// Body of the generation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerarNominaQuincenalRequest {
    pub quincena: Quincena,
    pub mes: u32,
    pub anio: i32,
    /// Serialised as `yyyy-MM-dd`.
    pub fecha_pago: NaiveDate,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub empleados_ids: Option<Vec<EmployeeId>>,
}

impl GenerarNominaQuincenalRequest {
    pub fn for_period(period: BiweeklyPeriod, fecha_pago: NaiveDate) -> Self {
        Self {
            quincena: period.quincena(),
            mes: period.month(),
            anio: period.year(),
            fecha_pago,
            empleados_ids: None,
        }
    }

    pub fn with_employees(mut self, ids: Option<Vec<EmployeeId>>) -> Self {
        self.empleados_ids = ids.filter(|ids| !ids.is_empty());
        self
    }
}

/// Per-employee row returned by the generation endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetalleNomina {
    pub empleado_id: EmployeeId,
    #[serde(default)]
    pub nombre_completo: String,
    #[serde(default)]
    pub departamento: Option<String>,
    #[serde(default)]
    pub puesto: Option<String>,
    #[serde(default)]
    pub salario_base_quincenal: Decimal,
    #[serde(default)]
    pub total_horas_extra: Decimal,
    #[serde(default)]
    pub bonificaciones: Decimal,
    #[serde(default)]
    pub total_bruto: Decimal,
    #[serde(default)]
    pub total_deducciones: Decimal,
    #[serde(default)]
    pub total_neto: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NominaEstado {
    Pendiente,
    Anulada,
    Other(String),
}

impl From<String> for NominaEstado {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "PENDIENTE" => NominaEstado::Pendiente,
            "ANULADA" => NominaEstado::Anulada,
            _ => NominaEstado::Other(value),
        }
    }
}

impl From<NominaEstado> for String {
    fn from(value: NominaEstado) -> Self {
        match value {
            NominaEstado::Pendiente => "PENDIENTE".to_string(),
            NominaEstado::Anulada => "ANULADA".to_string(),
            NominaEstado::Other(other) => other,
        }
    }
}

impl fmt::Display for NominaEstado {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NominaEstado::Pendiente => f.write_str("PENDIENTE"),
            NominaEstado::Anulada => f.write_str("ANULADA"),
            NominaEstado::Other(other) => f.write_str(other),
        }
    }
}

/// Payroll row as listed by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NominaDto {
    pub id_nomina: i64,
    pub empleado_id: EmployeeId,
    #[serde(default)]
    pub codigo_empleado: Option<String>,
    #[serde(default)]
    pub nombre_empleado: String,
    #[serde(default)]
    pub puesto: Option<String>,
    #[serde(default)]
    pub departamento: Option<String>,
    /// Date tag of the period, e.g. `2024-03-16T00:00:00`.
    #[serde(default)]
    pub periodo_nomina: Option<String>,
    #[serde(default)]
    pub salario_base: Decimal,
    #[serde(default)]
    pub monto_horas_extra: Decimal,
    #[serde(default)]
    pub bonificaciones: Decimal,
    #[serde(default)]
    pub total_bruto: Decimal,
    #[serde(default)]
    pub deducciones: Decimal,
    #[serde(default)]
    pub total_neto: Decimal,
    pub estado: NominaEstado,
}

impl NominaDto {
    /// Period derived from the date tag.
    pub fn period(&self) -> Option<BiweeklyPeriod> {
        let tag = self.periodo_nomina.as_deref()?;
        let date_part = tag.get(..10)?;
        NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
            .ok()
            .map(BiweeklyPeriod::containing)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumenNominaQuincenal {
    #[serde(default)]
    pub quincena: Option<u8>,
    #[serde(default)]
    pub mes: Option<u32>,
    #[serde(default)]
    pub anio: Option<i32>,
    #[serde(default)]
    pub total_empleados: u32,
    #[serde(default)]
    pub total_bruto: Decimal,
    #[serde(default)]
    pub total_deducciones: Decimal,
    #[serde(default)]
    pub total_neto: Decimal,
}

/// Formats an amount the way the dashboard shows colones: `₡1 234 567,89`.
pub fn format_colones(amount: Decimal) -> String {
    let rounded = format!("{:.2}", amount.round_dp(2).abs());
    let (int_part, frac_part) = rounded.split_once('.').unwrap_or((rounded.as_str(), "00"));

    let digits: Vec<char> = int_part.chars().collect();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, digit) in digits.iter().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(' ');
        }
        grouped.push(*digit);
    }

    let sign = if amount.is_sign_negative() && !amount.round_dp(2).is_zero() {
        "-"
    } else {
        ""
    };
    format!("{}₡{},{}", sign, grouped, frac_part)
}

#[derive(Debug, Serialize)]
struct NominaCsvRow<'a> {
    id_nomina: i64,
    empleado_id: EmployeeId,
    codigo_empleado: &'a str,
    nombre_empleado: &'a str,
    periodo: String,
    salario_base: Decimal,
    monto_horas_extra: Decimal,
    bonificaciones: Decimal,
    total_bruto: Decimal,
    deducciones: Decimal,
    total_neto: Decimal,
    estado: String,
}

/// Writes payroll rows as CSV with a header line.
pub fn write_payroll_csv<W: Write>(rows: &[NominaDto], writer: W) -> Result<()> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    for row in rows {
        csv_writer.serialize(NominaCsvRow {
            id_nomina: row.id_nomina,
            empleado_id: row.empleado_id,
            codigo_empleado: row.codigo_empleado.as_deref().unwrap_or(""),
            nombre_empleado: &row.nombre_empleado,
            periodo: row.period().map(|p| p.to_string()).unwrap_or_default(),
            salario_base: row.salario_base,
            monto_horas_extra: row.monto_horas_extra,
            bonificaciones: row.bonificaciones,
            total_bruto: row.total_bruto,
            deducciones: row.deducciones,
            total_neto: row.total_neto,
            estado: row.estado.to_string(),
        })?;
    }
    csv_writer
        .flush()
        .map_err(|e| crate::error::io_context(e, "Failed to flush payroll CSV"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn period_bounds_follow_month_length() {
        let q1 = BiweeklyPeriod::new(Quincena::First, 2, 2024).unwrap();
        assert_eq!(q1.start_date(), date(2024, 2, 1));
        assert_eq!(q1.end_date(), date(2024, 2, 15));
        assert_eq!(q1.closes_on(), date(2024, 2, 16));

        let q2 = BiweeklyPeriod::new(Quincena::Second, 2, 2024).unwrap();
        assert_eq!(q2.start_date(), date(2024, 2, 16));
        assert_eq!(q2.end_date(), date(2024, 2, 29));
        assert_eq!(q2.closes_on(), date(2024, 3, 1));

        let dec_q2 = BiweeklyPeriod::new(Quincena::Second, 12, 2023).unwrap();
        assert_eq!(dec_q2.end_date(), date(2023, 12, 31));
        assert_eq!(dec_q2.closes_on(), date(2024, 1, 1));
    }

    #[test]
    fn containing_splits_on_the_fifteenth() {
        assert_eq!(
            BiweeklyPeriod::containing(date(2024, 5, 15)).quincena(),
            Quincena::First
        );
        assert_eq!(
            BiweeklyPeriod::containing(date(2024, 5, 16)).quincena(),
            Quincena::Second
        );
    }

    #[test]
    fn previous_month_rolls_back_the_year_in_january() {
        let period = BiweeklyPeriod::second_of_previous_month(date(2024, 1, 1));
        assert_eq!(period.quincena(), Quincena::Second);
        assert_eq!(period.month(), 12);
        assert_eq!(period.year(), 2023);

        let period = BiweeklyPeriod::second_of_previous_month(date(2024, 3, 31));
        assert_eq!((period.month(), period.year()), (2, 2024));
    }

    #[test]
    fn invalid_month_is_rejected() {
        assert!(matches!(
            BiweeklyPeriod::new(Quincena::First, 13, 2024),
            Err(RrhhError::InvalidPeriod(_))
        ));
    }

    #[test]
    fn generation_request_wire_format() {
        let period = BiweeklyPeriod::new(Quincena::Second, 12, 2023).unwrap();
        let request = GenerarNominaQuincenalRequest::for_period(period, date(2024, 1, 1));
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "quincena": 2,
                "mes": 12,
                "anio": 2023,
                "fechaPago": "2024-01-01"
            })
        );

        let with_ids = request.with_employees(Some(vec![4, 9]));
        let json = serde_json::to_value(&with_ids).unwrap();
        assert_eq!(json["empleadosIds"], serde_json::json!([4, 9]));
    }

    #[test]
    fn quincena_rejects_out_of_range_numbers() {
        assert!(serde_json::from_str::<Quincena>("3").is_err());
        assert_eq!(serde_json::from_str::<Quincena>("1").unwrap(), Quincena::First);
    }

    #[test]
    fn nomina_dto_accepts_numbers_and_unknown_status() {
        let raw = serde_json::json!({
            "idNomina": 31,
            "empleadoId": 7,
            "codigoEmpleado": "EMP-007",
            "nombreEmpleado": "Ana Solís",
            "periodoNomina": "2024-03-16T00:00:00",
            "salarioBase": 450000.5,
            "totalBruto": 475000,
            "deducciones": 48925.25,
            "totalNeto": 426074.75,
            "estado": "PAGADA"
        });
        let dto: NominaDto = serde_json::from_value(raw).unwrap();
        assert_eq!(dto.salario_base, dec!(450000.5));
        assert_eq!(dto.bonificaciones, Decimal::ZERO);
        assert_eq!(dto.estado, NominaEstado::Other("PAGADA".to_string()));
        let period = dto.period().unwrap();
        assert_eq!(period.quincena(), Quincena::Second);
        assert_eq!((period.month(), period.year()), (3, 2024));
    }

    #[test]
    fn colones_formatting() {
        assert_eq!(format_colones(dec!(1234567.891)), "₡1 234 567,89");
        assert_eq!(format_colones(dec!(0)), "₡0,00");
        assert_eq!(format_colones(dec!(999)), "₡999,00");
        assert_eq!(format_colones(dec!(-1500.5)), "-₡1 500,50");
    }

    #[test]
    fn csv_export_has_header_and_rows() {
        let dto = NominaDto {
            id_nomina: 1,
            empleado_id: 7,
            codigo_empleado: Some("EMP-007".to_string()),
            nombre_empleado: "Ana Solís".to_string(),
            puesto: None,
            departamento: None,
            periodo_nomina: Some("2024-03-01T00:00:00".to_string()),
            salario_base: dec!(450000),
            monto_horas_extra: dec!(0),
            bonificaciones: dec!(0),
            total_bruto: dec!(450000),
            deducciones: dec!(46350),
            total_neto: dec!(403650),
            estado: NominaEstado::Pendiente,
        };
        let mut out = Vec::new();
        write_payroll_csv(&[dto], &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let mut lines = text.lines();
        assert!(lines.next().unwrap().starts_with("id_nomina,empleado_id,"));
        let row = lines.next().unwrap();
        assert!(row.contains("EMP-007"));
        assert!(row.contains("1ª quincena 03/2024"));
        assert!(row.ends_with("PENDIENTE"));
    }
}
