//! Sequences a provisioning run: module check, PCI scan, plan, reconcile.

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use error_stack::Report;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::classifier::Classifier;
use crate::config::Config;
use crate::kmod::ModuleProber;
use crate::kmod::CORE_MODULE;
use crate::node::DeviceFs;
use crate::node::NodeOutcome;
use crate::node::NodeSynchronizer;
use crate::pci::PciBus;
use crate::pci::PciError;
use crate::pci::SysfsPciBus;
use crate::plan::build_plan;
use crate::plan::ModuleStates;

/// Per-node results of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub unchanged: usize,
    pub created: usize,
    pub fixed: usize,
    pub failed: Vec<PathBuf>,
}

impl RunReport {
    pub fn total(&self) -> usize {
        self.unchanged + self.created + self.fixed + self.failed.len()
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    fn record(&mut self, outcome: NodeOutcome) {
        match outcome {
            NodeOutcome::Unchanged => self.unchanged += 1,
            NodeOutcome::Created => self.created += 1,
            NodeOutcome::Fixed => self.fixed += 1,
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The core driver is not loaded, nothing was scanned.
    ModuleNotLoaded,
    /// No eligible GPU was found.
    NoDevices,
    /// The plan was computed but not applied.
    DryRun { planned: usize },
    Completed(RunReport),
}

impl RunOutcome {
    /// Failing specs make the run fail; skipped runs succeed.
    pub fn exit_code(&self) -> ExitCode {
        match self {
            RunOutcome::Completed(report) if !report.is_success() => ExitCode::FAILURE,
            _ => ExitCode::SUCCESS,
        }
    }
}

pub struct Provisioner<'a> {
    config: &'a Config,
    prober: ModuleProber,
}

impl<'a> Provisioner<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self {
            config,
            prober: ModuleProber::from_paths(&config.paths),
        }
    }

    /// Runs against the sysfs PCI bus.
    ///
    /// # Errors
    ///
    /// - [`PciError`] if the PCI bus cannot be opened or enumerated
    pub fn run<F: DeviceFs>(&self, fs: F) -> Result<RunOutcome, Report<PciError>> {
        if !self.core_module_loaded() {
            return Ok(RunOutcome::ModuleNotLoaded);
        }

        let bus = SysfsPciBus::open(&self.config.paths.sysfs_pci)?;
        self.provision(&bus, fs)
    }

    /// Runs against an already opened bus.
    pub fn run_with<B: PciBus + ?Sized, F: DeviceFs>(
        &self,
        bus: &B,
        fs: F,
    ) -> Result<RunOutcome, Report<PciError>> {
        if !self.core_module_loaded() {
            return Ok(RunOutcome::ModuleNotLoaded);
        }

        self.provision(bus, fs)
    }

    fn core_module_loaded(&self) -> bool {
        self.log_driver_version();

        if self.prober.is_loaded(CORE_MODULE) {
            return true;
        }
        error!("No {CORE_MODULE} module is loaded. Aborting.");
        false
    }

    fn log_driver_version(&self) {
        let path = &self.config.paths.driver_version;
        match fs::read_to_string(path) {
            Ok(version) => info!(version = version.trim(), "Found NVIDIA driver"),
            Err(e) => debug!(path = %path.display(), error = %e, "Driver version unavailable"),
        }
    }

    fn provision<B: PciBus + ?Sized, F: DeviceFs>(
        &self,
        bus: &B,
        fs: F,
    ) -> Result<RunOutcome, Report<PciError>> {
        let descriptors = bus.devices()?;
        let candidates = Classifier::new(bus).count_candidates(&descriptors);
        info!(candidates, "Finished PCI scan");

        let modules = ModuleStates::probe(&self.prober);
        debug!(?modules, "Probed optional modules");

        let plan = build_plan(&self.config.paths.dev_root, candidates, &modules);
        if plan.is_empty() {
            info!("No NVIDIA devices detected. Skipping...");
            return Ok(RunOutcome::NoDevices);
        }

        if self.config.dry_run {
            for spec in &plan {
                info!(
                    device = %spec.device,
                    mode = %format!("{:o}", spec.mode),
                    "Would reconcile {}",
                    spec.path.display()
                );
            }
            return Ok(RunOutcome::DryRun {
                planned: plan.len(),
            });
        }

        let synchronizer = NodeSynchronizer::new(fs);
        let mut report = RunReport::default();

        for spec in &plan {
            match synchronizer.reconcile(spec) {
                Ok(outcome) => {
                    debug!(?outcome, "Result for {}", spec.path.display());
                    report.record(outcome);
                }
                Err(e) => {
                    warn!(error = %e, "Result for {}: failed", spec.path.display());
                    report.failed.push(spec.path.clone());
                }
            }
        }

        info!(
            unchanged = report.unchanged,
            created = report.created,
            fixed = report.fixed,
            failed = report.failed.len(),
            "Device nodes reconciled"
        );
        Ok(RunOutcome::Completed(report))
    }
}
