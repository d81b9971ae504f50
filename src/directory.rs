// src/directory.rs
//
// Read-only listings consumed by the dashboard tables.

use serde::{Deserialize, Serialize};

use crate::attendance::EmployeeId;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Empleado {
    #[serde(alias = "id")]
    pub id_empleado: EmployeeId,
    #[serde(default)]
    pub codigo_empleado: Option<String>,
    #[serde(default)]
    pub nombre: Option<String>,
    #[serde(default)]
    pub apellidos: Option<String>,
    #[serde(default)]
    pub nombre_completo: Option<String>,
    #[serde(default, alias = "email")]
    pub correo: Option<String>,
    #[serde(default)]
    pub id_departamento: Option<i64>,
    #[serde(default)]
    pub id_puesto: Option<i64>,
    #[serde(default)]
    pub estado: Option<String>,
}

impl Empleado {
    pub fn display_name(&self) -> String {
        if let Some(full) = self.nombre_completo.as_deref().filter(|n| !n.trim().is_empty()) {
            return full.to_string();
        }
        let parts: Vec<&str> = [self.nombre.as_deref(), self.apellidos.as_deref()]
            .into_iter()
            .flatten()
            .filter(|p| !p.trim().is_empty())
            .collect();
        if parts.is_empty() {
            format!("Empleado #{}", self.id_empleado)
        } else {
            parts.join(" ")
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Puesto {
    pub id_puesto: i64,
    pub nombre_puesto: String,
    #[serde(default)]
    pub descripcion: Option<String>,
    #[serde(default)]
    pub nivel_jerarquico: Option<i32>,
    #[serde(default)]
    pub salario_minimo: rust_decimal::Decimal,
    #[serde(default)]
    pub salario_maximo: rust_decimal::Decimal,
    #[serde(default)]
    pub estado: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Departamento {
    pub id_departamento: i64,
    pub nombre_departamento: String,
    #[serde(default)]
    pub descripcion: Option<String>,
    #[serde(default)]
    pub id_jefe_departamento: Option<i64>,
    #[serde(default)]
    pub estado: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rol {
    #[serde(alias = "id")]
    pub id_rol: i64,
    #[serde(alias = "nombre")]
    pub nombre_rol: String,
    #[serde(default)]
    pub descripcion: Option<String>,
}

/// Attendance record as stored by the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AsistenciaRecord {
    pub id_asistencia: i64,
    pub empleado_id: EmployeeId,
    #[serde(default)]
    pub codigo_empleado: Option<String>,
    #[serde(default)]
    pub nombre_empleado: String,
    /// `2026-01-13T00:00:00`
    pub fecha_registro: String,
    #[serde(default)]
    pub hora_entrada: Option<String>,
    #[serde(default)]
    pub hora_salida: Option<String>,
    /// TimeSpan, `08:48:00`
    #[serde(default)]
    pub horas_trabajadas: Option<String>,
    #[serde(default)]
    pub estado: Option<String>,
}

impl AsistenciaRecord {
    pub fn date(&self) -> &str {
        self.fecha_registro
            .split('T')
            .next()
            .unwrap_or(&self.fecha_registro)
    }

    /// Worked time in minutes, from the `HH:MM:SS` TimeSpan.
    pub fn worked_minutes(&self) -> u32 {
        let Some(span) = self.horas_trabajadas.as_deref() else {
            return 0;
        };
        let mut parts = span.split(':');
        let hours: u32 = parts.next().and_then(|h| h.trim().parse().ok()).unwrap_or(0);
        let minutes: u32 = parts.next().and_then(|m| m.trim().parse().ok()).unwrap_or(0);
        hours * 60 + minutes
    }
}

#[derive(Debug, Clone, Default)]
pub struct AttendanceFilter {
    pub empleado_id: Option<EmployeeId>,
    pub fecha_inicio: Option<chrono::NaiveDate>,
    pub fecha_fin: Option<chrono::NaiveDate>,
}

impl AttendanceFilter {
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(id) = self.empleado_id {
            pairs.push(("empleadoId", id.to_string()));
        }
        if let Some(from) = self.fecha_inicio {
            pairs.push(("fechaInicio", from.format("%Y-%m-%d").to_string()));
        }
        if let Some(to) = self.fecha_fin {
            pairs.push(("fechaFin", to.format("%Y-%m-%d").to_string()));
        }
        pairs
    }
}
