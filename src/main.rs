//! mini-scada - Headless Runner
//!
//! Usage:
//!
//! ```text
//! mini-scada [PROJECT_FILE] [SECONDS]   poll a project (or the simulated demo)
//! mini-scada scan TARGET [PORT...]      look for controllers on a network
//! ```

use anyhow::{bail, Context};
use mini_scada::{
    backend::{Driver, S7Driver},
    config::{DriverKind, ProjectFile},
    discovery,
    events::EventLog,
    types::{Area, DataType, TagSpec},
    PollingService, SampleStore,
};
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_RUN_SECS: u64 = 10;

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    if args.first().map(String::as_str) == Some("scan") {
        return run_scan(&args[1..]);
    }

    let project = match args.first() {
        Some(path) => ProjectFile::load(path).with_context(|| format!("loading {}", path))?,
        None => demo_project()?,
    };
    let run_for = match args.get(1) {
        Some(secs) => Duration::from_secs(secs.parse().context("SECONDS must be an integer")?),
        None => Duration::from_secs(DEFAULT_RUN_SECS),
    };

    let _log_guard = mini_scada::logging::init(&project.logging);
    tracing::info!("Starting mini-scada project '{}'", project.name);

    run_project(&project, run_for)
}

/// Simulated tank farm used when no project file is given
fn demo_project() -> anyhow::Result<ProjectFile> {
    let mut project = ProjectFile::new("Simulated demo");
    project.connection.driver = DriverKind::Simulated;
    project.polling.coalesce_gap = Some(16);
    project.tags = vec![
        TagSpec::new("TankLevel", Area::DataBlock, 1, 0, DataType::Real32)?,
        TagSpec::new_bool("PumpOn", Area::DataBlock, 1, 4, 0)?,
        TagSpec::new("BatchCount", Area::DataBlock, 1, 6, DataType::Int16)?,
    ];
    if let Some(dir) = mini_scada::config::default_workspace_dir() {
        project.store.workspace = Some(dir.join("demo"));
    }
    Ok(project)
}

fn make_driver(project: &ProjectFile) -> anyhow::Result<Box<dyn Driver>> {
    match project.connection.driver {
        DriverKind::S7 => Ok(Box::new(S7Driver::new(project.connection.timeout()))),
        #[cfg(feature = "simulator")]
        DriverKind::Simulated => Ok(Box::new(mini_scada::backend::SimulatedDriver::demo())),
        #[cfg(not(feature = "simulator"))]
        DriverKind::Simulated => bail!("built without the `simulator` feature"),
    }
}

fn run_project(project: &ProjectFile, run_for: Duration) -> anyhow::Result<()> {
    let workspace = project.store.workspace_dir()?;
    let store = SampleStore::open(&workspace)
        .with_context(|| format!("opening workspace {:?}", workspace))?;
    let events = Arc::new(EventLog::default());

    let service = PollingService::builder_boxed(make_driver(project)?)
        .store(store)
        .tags(project.tags.clone())
        .config(project.polling_config())
        .events(events.clone())
        .spawn()?;

    let target = project.connection.target();
    service
        .connect_target(target.clone())
        .with_context(|| format!("connecting to {}", target))?;
    service.start_polling()?;

    std::thread::sleep(run_for);
    service.stop_polling();

    let status = service.status();
    println!(
        "{}: {} cycles, {} samples, {} tag errors, {} store failures",
        status.service_state,
        status.cycles_completed,
        status.samples_written,
        status.tag_errors,
        status.store_failures
    );
    let mut latest: Vec<_> = service.store().get_latest_values().into_values().collect();
    latest.sort_by(|a, b| a.tag_name.cmp(&b.tag_name));
    for sample in latest {
        println!("  {:<20} {}", sample.tag_name, sample.value);
    }
    if let Some(error) = &status.last_error {
        println!("last error: {}", error);
    }
    for line in events.lines().iter().rev().take(5).rev() {
        println!("{}", line);
    }

    service.disconnect()?;
    service.shutdown()?;
    Ok(())
}

fn run_scan(args: &[String]) -> anyhow::Result<()> {
    let _log_guard = mini_scada::logging::init(&Default::default());

    let Some(target) = args.first() else {
        bail!("usage: mini-scada scan TARGET [PORT...]");
    };
    let ports: Vec<u16> = if args.len() > 1 {
        args[1..]
            .iter()
            .map(|p| p.parse().with_context(|| format!("invalid port '{}'", p)))
            .collect::<anyhow::Result<_>>()?
    } else {
        vec![mini_scada::backend::DEFAULT_PORT]
    };

    let hits = discovery::scan(
        target,
        &ports,
        discovery::DEFAULT_SCAN_TIMEOUT,
        discovery::DEFAULT_SCAN_WORKERS,
        None,
    )?;
    if hits.is_empty() {
        println!("no hosts found");
    }
    for hit in hits {
        println!("{:<16} {:?}", hit.ip, hit.open_ports);
    }
    Ok(())
}
