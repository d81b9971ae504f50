// src/main.rs

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::fs::File;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use rrhh_core::attendance::{AttendanceResolver, DayView, RefreshOutcome};
use rrhh_core::directory::AttendanceFilter;
use rrhh_core::payroll::{format_colones, write_payroll_csv, BiweeklyPeriod, NominaDto, Quincena};
use rrhh_core::payroll_gate::PayrollGate;
use rrhh_core::session::{LoginCredentials, SessionContext, ROLE_ADMIN, ROLE_EMPLEADO};
use rrhh_core::{
    ClientConfig, Clock, ConsoleNotifier, FileStore, KeyValueStore, Notification, Notifier,
    RrhhClient, RrhhError, SystemClock,
};

#[derive(Parser, Debug)]
#[command(name = "rrhh", version, about = "RRHH dashboard client: attendance and biweekly payroll")]
struct Cli {
    /// Overrides RRHH_API_BASE_URL.
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Overrides RRHH_STATE_FILE.
    #[arg(long, global = true)]
    state_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Log in and store the session.
    Login {
        username: Option<String>,
        /// Read from stdin when omitted.
        #[arg(long)]
        password: Option<String>,
        /// Remember the username for the next login.
        #[arg(long)]
        remember: bool,
    },
    Logout,
    Whoami,
    /// Today's attendance state.
    Estado,
    /// Clock in or out, whichever is next.
    Marcar,
    /// Keep polling today's attendance state.
    Watch {
        #[arg(long)]
        interval_secs: Option<u64>,
    },
    Nominas {
        #[command(subcommand)]
        command: NominasCommand,
    },
    Asistencias {
        #[arg(long)]
        empleado: Option<i64>,
        #[arg(long)]
        desde: Option<NaiveDate>,
        #[arg(long)]
        hasta: Option<NaiveDate>,
    },
    Empleados,
    Puestos,
    Departamentos,
    Roles,
}

#[derive(Subcommand, Debug)]
enum NominasCommand {
    /// List payrolls. Admins run the automatic generation check first.
    List {
        #[arg(long, requires_all = ["mes", "anio"])]
        quincena: Option<u8>,
        #[arg(long)]
        mes: Option<u32>,
        #[arg(long)]
        anio: Option<i32>,
        #[arg(long)]
        csv: Option<PathBuf>,
        #[arg(long)]
        no_gate: bool,
    },
    /// Run the automatic generation check only.
    Gate,
    /// Generate a closed period on demand.
    Generar {
        quincena: u8,
        mes: u32,
        anio: i32,
        #[arg(long)]
        fecha_pago: Option<NaiveDate>,
        /// Comma-separated employee ids; all employees when omitted.
        #[arg(long, value_delimiter = ',')]
        empleados: Vec<i64>,
    },
    Resumen {
        quincena: u8,
        mes: u32,
        anio: i32,
    },
    Anular {
        id: i64,
    },
}

struct App {
    session: SessionContext,
    client: RrhhClient,
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
    config: ClientConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("setting default subscriber failed")?;

    let cli = Cli::parse();

    let mut config = ClientConfig::from_env().context("Failed to load configuration")?;
    if let Some(url) = cli.api_url {
        config.api_base_url = url;
    }
    if let Some(path) = cli.state_file {
        config.state_file = path;
    }
    config.validate().context("Invalid configuration")?;

    let store: Arc<dyn KeyValueStore> = Arc::new(
        FileStore::open(&config.state_file)
            .with_context(|| format!("Failed to open state file {}", config.state_file.display()))?,
    );
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let client = RrhhClient::new(config.clone()).context("Failed to create API client")?;
    let session = SessionContext::bootstrap(store.clone(), clock.clone(), client.clone())
        .context("Failed to restore session")?;

    let mut app = App {
        session,
        client,
        store,
        clock,
        notifier: Arc::new(ConsoleNotifier),
        config,
    };

    let result = app.run(cli.command).await;
    match result {
        Ok(()) => Ok(()),
        Err(e) if matches!(e.downcast_ref::<RrhhError>(), Some(RrhhError::SessionExpired)) => {
            warn!("Session expired, clearing local session");
            app.session.logout().await?;
            bail!("Session expired, please log in again")
        }
        Err(e) => Err(e),
    }
}

impl App {
    async fn run(&mut self, command: Command) -> Result<()> {
        match command {
            Command::Login {
                username,
                password,
                remember,
            } => self.login(username, password, remember).await,
            Command::Logout => {
                self.session.logout().await?;
                println!("Sesión cerrada");
                Ok(())
            }
            Command::Whoami => self.whoami(),
            Command::Estado => self.estado().await,
            Command::Marcar => self.marcar().await,
            Command::Watch { interval_secs } => self.watch(interval_secs).await,
            Command::Nominas { command } => self.nominas(command).await,
            Command::Asistencias {
                empleado,
                desde,
                hasta,
            } => {
                self.require_login()?;
                let filter = AttendanceFilter {
                    empleado_id: empleado,
                    fecha_inicio: desde,
                    fecha_fin: hasta,
                };
                let rows = self.client.list_attendance(&filter).await?;
                for row in &rows {
                    println!(
                        "{:<10} {:<6} {:<28} {:<8} {:<8} {:>5} min  {}",
                        row.date(),
                        row.empleado_id,
                        row.nombre_empleado,
                        row.hora_entrada.as_deref().map(time_part).unwrap_or("-"),
                        row.hora_salida.as_deref().map(time_part).unwrap_or("-"),
                        row.worked_minutes(),
                        row.estado.as_deref().unwrap_or("")
                    );
                }
                println!("{} registros", rows.len());
                Ok(())
            }
            Command::Empleados => {
                self.require_login()?;
                for employee in self.client.list_employees().await? {
                    println!(
                        "{:<6} {:<10} {:<32} {}",
                        employee.id_empleado,
                        employee.codigo_empleado.as_deref().unwrap_or("-"),
                        employee.display_name(),
                        employee.correo.as_deref().unwrap_or("")
                    );
                }
                Ok(())
            }
            Command::Puestos => {
                self.require_login()?;
                for puesto in self.client.list_positions().await? {
                    println!(
                        "{:<6} {:<32} {} - {}",
                        puesto.id_puesto,
                        puesto.nombre_puesto,
                        format_colones(puesto.salario_minimo),
                        format_colones(puesto.salario_maximo)
                    );
                }
                Ok(())
            }
            Command::Departamentos => {
                self.require_login()?;
                for departamento in self.client.list_departments().await? {
                    println!(
                        "{:<6} {:<32} {}",
                        departamento.id_departamento,
                        departamento.nombre_departamento,
                        departamento.estado.as_deref().unwrap_or("")
                    );
                }
                Ok(())
            }
            Command::Roles => {
                self.require_login()?;
                for rol in self.client.list_roles().await? {
                    println!("{:<6} {}", rol.id_rol, rol.nombre_rol);
                }
                Ok(())
            }
        }
    }

    fn require_login(&self) -> Result<()> {
        if !self.session.is_authenticated() {
            return Err(RrhhError::NotAuthenticated).context("Run `rrhh login` first");
        }
        if self.session.is_expiring_soon(5) {
            warn!("Session expires soon, consider logging in again");
            self.notifier.notify(
                Notification::warning("Tu sesión está por expirar")
                    .with_description("Inicia sesión de nuevo para no perder cambios"),
            );
        }
        Ok(())
    }

    fn require_attendance_access(&self) -> Result<()> {
        self.require_login()?;
        if !self.session.has_any_role(&[ROLE_EMPLEADO, ROLE_ADMIN]) {
            bail!("Attendance requires the {} or {} role", ROLE_EMPLEADO, ROLE_ADMIN);
        }
        Ok(())
    }

    fn require_admin(&self) -> Result<()> {
        self.require_login()?;
        if !self.session.has_role(ROLE_ADMIN) {
            bail!("This command requires the {} role", ROLE_ADMIN);
        }
        Ok(())
    }

    fn resolver(&self) -> Arc<AttendanceResolver> {
        Arc::new(AttendanceResolver::new(
            Arc::new(self.client.clone()),
            self.clock.clone(),
            self.notifier.clone(),
            self.session.employee_id(),
        ))
    }

    fn payroll_gate(&self) -> PayrollGate {
        PayrollGate::new(
            Arc::new(self.client.clone()),
            self.store.clone(),
            self.clock.clone(),
            self.notifier.clone(),
        )
    }

    async fn login(
        &mut self,
        username: Option<String>,
        password: Option<String>,
        remember: bool,
    ) -> Result<()> {
        let username = match username {
            Some(username) => username,
            None => match self.session.remembered_username()? {
                Some(remembered) => {
                    info!("Using remembered username '{}'", remembered);
                    remembered
                }
                None => prompt("Usuario: ")?,
            },
        };
        let password = match password {
            Some(password) => password,
            None => prompt("Contraseña: ")?,
        };

        let user = self
            .session
            .login(LoginCredentials { username, password }, remember)
            .await
            .context("Login failed")?;
        println!(
            "Bienvenido, {} ({})",
            user.full_name.as_deref().unwrap_or(&user.username),
            user.roles.join(", ")
        );
        println!("Inicio: {}", self.session.home_route());
        Ok(())
    }

    fn whoami(&self) -> Result<()> {
        let Some(user) = self.session.user().filter(|_| self.session.is_authenticated()) else {
            println!("No hay sesión activa");
            return Ok(());
        };
        println!("Usuario:   {} (#{})", user.username, user.user_id);
        if let Some(name) = &user.full_name {
            println!("Nombre:    {}", name);
        }
        if let Some(employee_id) = user.employee_id {
            println!(
                "Empleado:  #{} {}",
                employee_id,
                user.employee_code.as_deref().unwrap_or("")
            );
        }
        println!("Roles:     {}", user.roles.join(", "));
        if let Some(expires_at) = self.session.expires_at() {
            println!("Expira:    {}", expires_at.format("%Y-%m-%d %H:%M"));
        }
        println!("Inicio:    {}", self.session.home_route());
        Ok(())
    }

    async fn estado(&self) -> Result<()> {
        self.require_attendance_access()?;
        let resolver = self.resolver();
        if let RefreshOutcome::Failed(message) = resolver.refresh().await {
            warn!("Attendance status unavailable: {}", message);
        }
        print_day_view(&resolver.view().await);
        Ok(())
    }

    async fn marcar(&self) -> Result<()> {
        self.require_attendance_access()?;
        let resolver = self.resolver();
        resolver.refresh().await;
        let outcome = resolver.mark().await?;
        if let Some(at) = outcome.at {
            println!("Hora: {}", at.format("%H:%M:%S"));
        }
        match outcome.state {
            Some(state) => print_day_view(&DayView::Ready(state)),
            None => println!("{}", outcome.message),
        }
        Ok(())
    }

    async fn watch(&self, interval_secs: Option<u64>) -> Result<()> {
        self.require_attendance_access()?;
        let interval = interval_secs
            .filter(|secs| *secs > 0)
            .map(std::time::Duration::from_secs)
            .unwrap_or_else(|| self.config.poll_interval());
        let resolver = self.resolver();
        let mut updates = resolver.subscribe();
        let handle = resolver.spawn_polling(interval);

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                changed = updates.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
            let view = updates.borrow_and_update().clone();
            print_day_view(&view);
        }
        handle.abort();
        info!("Stopped watching attendance");
        Ok(())
    }

    async fn nominas(&self, command: NominasCommand) -> Result<()> {
        match command {
            NominasCommand::List {
                quincena,
                mes,
                anio,
                csv,
                no_gate,
            } => {
                self.require_login()?;
                if self.session.has_role(ROLE_ADMIN) && !no_gate {
                    self.payroll_gate().run_automatic_check().await?;
                }
                let rows = match (quincena, mes, anio) {
                    (Some(q), Some(m), Some(y)) => {
                        self.client
                            .list_payrolls_for_period(parse_period(q, m, y)?)
                            .await?
                    }
                    _ => self.client.list_payrolls().await?,
                };
                print_payrolls(&rows);
                if let Some(path) = csv {
                    let file = File::create(&path)
                        .with_context(|| format!("Failed to create {}", path.display()))?;
                    write_payroll_csv(&rows, file)?;
                    println!("Exportado a {}", path.display());
                }
                Ok(())
            }
            NominasCommand::Gate => {
                self.require_admin()?;
                let report = self.payroll_gate().run_automatic_check().await?;
                if report.is_noop() {
                    println!("Sin quincenas pendientes ({})", report.checked_on);
                }
                for (period, count) in &report.generated {
                    println!("Generada {}: {} empleados", period, count);
                }
                for (period, message) in &report.failed {
                    println!("Falló {}: {}", period, message);
                }
                for (period, message) in &report.unsaved_flags {
                    println!("Generada {} sin guardar estado: {}", period, message);
                }
                Ok(())
            }
            NominasCommand::Generar {
                quincena,
                mes,
                anio,
                fecha_pago,
                empleados,
            } => {
                self.require_admin()?;
                let period = parse_period(quincena, mes, anio)?;
                let empleados = Some(empleados).filter(|ids| !ids.is_empty());
                let rows = self
                    .payroll_gate()
                    .generate_manual(period, fecha_pago, empleados)
                    .await?;
                for row in &rows {
                    println!(
                        "{:<6} {:<32} bruto {:>16} deducciones {:>14} neto {:>16}",
                        row.empleado_id,
                        row.nombre_completo,
                        format_colones(row.total_bruto),
                        format_colones(row.total_deducciones),
                        format_colones(row.total_neto)
                    );
                }
                Ok(())
            }
            NominasCommand::Resumen { quincena, mes, anio } => {
                self.require_login()?;
                let period = parse_period(quincena, mes, anio)?;
                let summary = self.client.payroll_summary(period).await?;
                println!("{}", period);
                println!("Empleados:    {}", summary.total_empleados);
                println!("Total bruto:  {}", format_colones(summary.total_bruto));
                println!("Deducciones:  {}", format_colones(summary.total_deducciones));
                println!("Total neto:   {}", format_colones(summary.total_neto));
                Ok(())
            }
            NominasCommand::Anular { id } => {
                self.require_admin()?;
                self.client.annul_payroll(id).await?;
                println!("Nómina #{} anulada", id);
                Ok(())
            }
        }
    }
}

fn parse_period(quincena: u8, mes: u32, anio: i32) -> Result<BiweeklyPeriod> {
    let quincena = Quincena::try_from(quincena).map_err(RrhhError::InvalidPeriod)?;
    Ok(BiweeklyPeriod::new(quincena, mes, anio)?)
}

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush().context("Failed to flush stdout")?;
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read from stdin")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn time_part(raw: &str) -> &str {
    raw.split('T').nth(1).unwrap_or(raw)
}

fn print_day_view(view: &DayView) {
    match view {
        DayView::Loading => println!("Cargando estado de asistencia..."),
        DayView::Unavailable(message) => println!("Estado no disponible: {}", message),
        DayView::Ready(state) => {
            println!(
                "Estado:  {}{}",
                state.status(),
                state
                    .label
                    .as_deref()
                    .map(|label| format!(" ({})", label))
                    .unwrap_or_default()
            );
            if let Some(clock_in) = state.clock_in_time() {
                println!("Entrada: {}", clock_in.format("%H:%M:%S"));
            }
            if let Some(clock_out) = state.clock_out_time() {
                println!("Salida:  {}", clock_out.format("%H:%M:%S"));
            }
            match state.next_action() {
                Some(action) => println!("Siguiente: {}", action),
                None => println!("Siguiente: -"),
            }
            println!("{}", state.message);
        }
    }
}

fn print_payrolls(rows: &[NominaDto]) {
    for row in rows {
        println!(
            "{:<6} {:<28} {:<22} neto {:>16}  {}",
            row.id_nomina,
            row.nombre_empleado,
            row.period().map(|p| p.to_string()).unwrap_or_default(),
            format_colones(row.total_neto),
            row.estado
        );
    }
    println!("{} nóminas", rows.len());
}
