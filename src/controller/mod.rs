//! Controller: the one process-wide handle. Owns the job database
//! connection factory, the archive-mount list, and the global interrupt
//! latch; binds user intents (start a job, resume a pending one) to the
//! Scanner/Executor pair and hands workers a small cloneable [`JobHandle`]
//! rather than exposing itself to them.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use crate::archive_mount::ArchiveMountLayer;
use crate::cli::Cli;
use crate::config::Config;
use crate::executor::copy_move::{CopyMoveExecutor, Mode};
use crate::executor::delete::DeleteExecutor;
use crate::jpl::{ConflictPolicy, Job, Jpl, Operation};
use crate::progress::{self, ControlEvents, FinalResult, ProgressConsumer};
use crate::scanner::scan_sources;

/// Global, process-wide: set from the SIGTERM/SIGINT handler and observed
/// by every active worker through its [`ControlEvents::request_interrupt`].
static PROCESS_INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// How often the interrupt monitor thread checks [`PROCESS_INTERRUPTED`] and
/// rebroadcasts it to every job's [`ControlEvents`].
const INTERRUPT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Registry of every job's control latches still reachable, so the signal
/// handler's process-wide flag can be forwarded to whichever jobs happen to
/// be running when SIGTERM/SIGINT arrives.
type InterruptRegistry = Arc<Mutex<Vec<Weak<ControlEvents>>>>;

/// A worker-facing handle: a job id, its control events, and the progress
/// bus it writes to. Cheap to clone; never exposes the Controller itself to
/// a worker thread.
#[derive(Clone)]
pub struct JobHandle {
    pub job_id: i64,
    pub control: Arc<ControlEvents>,
}

pub struct RunningJob {
    pub handle: JobHandle,
    pub consumer: ProgressConsumer,
    pub join: std::thread::JoinHandle<FinalResult>,
}

pub struct Controller {
    config: Config,
    jpl: Option<Jpl>,
    archive_mounts: ArchiveMountLayer,
    last_cwd: Option<PathBuf>,
    interrupt_registry: InterruptRegistry,
}

impl Controller {
    pub fn new(config: Config, cli: &Cli) -> Self {
        install_signal_handler();

        let jpl = if cli.nodb {
            None
        } else {
            let path = cli.database.clone().unwrap_or_else(default_database_path);
            match Jpl::open(&path) {
                Ok(jpl) => Some(jpl),
                Err(err) => {
                    log::warn!("controller: {err}, continuing with job persistence disabled");
                    None
                }
            }
        };

        let interrupt_registry: InterruptRegistry = Arc::new(Mutex::new(Vec::new()));
        spawn_interrupt_monitor(interrupt_registry.clone());

        Self {
            config,
            jpl,
            archive_mounts: ArchiveMountLayer::new(),
            last_cwd: cli.start_path.clone(),
            interrupt_registry,
        }
    }

    /// Registers `control` so a future SIGTERM/SIGINT reaches this job even
    /// though the Controller never touches it again after spawning the
    /// worker thread.
    fn track(&self, control: &Arc<ControlEvents>) {
        let mut registry = self.interrupt_registry.lock().unwrap_or_else(|e| e.into_inner());
        registry.retain(|weak| weak.strong_count() > 0);
        registry.push(Arc::downgrade(control));
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn archive_mounts_mut(&mut self) -> &mut ArchiveMountLayer {
        &mut self.archive_mounts
    }

    /// Jobs left `InProgress` from a prior run, for the startup
    /// resume-or-discard prompt the UI presents.
    pub fn pending_jobs(&self) -> Vec<Job> {
        self.jpl.as_ref().map(Jpl::get_jobs).unwrap_or_default()
    }

    pub fn discard_job(&self, job_id: i64) {
        if let Some(jpl) = &self.jpl {
            jpl.delete_job(job_id);
        }
    }

    /// Scans `sources` and starts a copy or move job, persisting it (when
    /// the job database is available) before any file is touched so it can
    /// be resumed if this process is killed mid-run.
    pub fn start_copy_move(
        &self,
        operation: Operation,
        sources: &[PathBuf],
        cwd: &Path,
        destination: &Path,
        conflict_policy: ConflictPolicy,
    ) -> Result<RunningJob, crate::scanner::ScanError> {
        let control = ControlEvents::new();
        self.track(&control);
        let waker = Arc::new(|| {});
        let (producer, consumer) = progress::channel(waker);

        let scan = scan_sources(sources, &control, |sample| {
            producer.push_throttled(progress::ProgressMessage::Scan(sample));
        })?;

        let replace_first_path = !destination.is_dir();
        let items = scan.items;

        let (job_id, items) = match &self.jpl {
            Some(jpl) => jpl.new_job(
                operation,
                cwd,
                Some(destination),
                Some(conflict_policy),
                &scan.scan_error,
                &scan.scan_skipped,
                items,
            ),
            None => (-1, items),
        };

        let handle = JobHandle { job_id, control: control.clone() };
        let jpl = self.jpl.clone().unwrap_or_else(Jpl::detached);
        let cwd = cwd.to_path_buf();
        let destination = destination.to_path_buf();
        let scan_error = scan.scan_error;
        let scan_skipped = scan.scan_skipped;

        let join = std::thread::spawn(move || {
            let mut sorted = items;
            sorted.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
            let mut executor = CopyMoveExecutor::new(
                jpl,
                job_id,
                Mode::from(operation),
                cwd,
                destination,
                conflict_policy,
                replace_first_path,
                control,
                producer,
            );
            executor.seed_scan_side_bands(&scan_error, &scan_skipped);
            executor.run(sorted)
        });

        Ok(RunningJob { handle, consumer, join })
    }

    pub fn start_delete(&self, sources: &[PathBuf]) -> Result<RunningJob, crate::scanner::ScanError> {
        let control = ControlEvents::new();
        self.track(&control);
        let (producer, consumer) = progress::channel(Arc::new(|| {}));

        let scan = scan_sources(sources, &control, |sample| {
            producer.push_throttled(progress::ProgressMessage::Scan(sample));
        })?;

        let mut items = scan.items;
        items.sort_by(|a, b| b.sort_key().cmp(&a.sort_key()));

        let (job_id, items) = match &self.jpl {
            Some(jpl) => jpl.new_job(Operation::Delete, Path::new("/"), None, None, &scan.scan_error, &scan.scan_skipped, items),
            None => (-1, items),
        };

        let handle = JobHandle { job_id, control: control.clone() };
        let jpl = self.jpl.clone().unwrap_or_else(Jpl::detached);
        let scan_error = scan.scan_error;
        let scan_skipped = scan.scan_skipped;

        let join = std::thread::spawn(move || {
            let mut executor = DeleteExecutor::new(jpl, job_id, control, producer);
            executor.seed_scan_side_bands(&scan_error, &scan_skipped);
            executor.run(items)
        });

        Ok(RunningJob { handle, consumer, join })
    }

    /// Resumes a pending job loaded from the database on startup.
    pub fn resume_copy_move(&self, job: Job) -> RunningJob {
        let control = ControlEvents::new();
        self.track(&control);
        let (producer, consumer) = progress::channel(Arc::new(|| {}));
        let jpl = self.jpl.clone().unwrap_or_else(Jpl::detached);
        let items = jpl.get_file_list(job.id);
        let replace_first_path = job.replace_first_path;
        let destination = job.destination.clone().unwrap_or_else(|| job.cwd.clone());
        let conflict_policy = job.conflict_policy.unwrap_or(ConflictPolicy::Skip);
        let mode = Mode::from(job.operation);
        let cwd = job.cwd.clone();
        let job_id = job.id;

        let handle = JobHandle { job_id, control: control.clone() };
        let join = std::thread::spawn(move || {
            let executor = CopyMoveExecutor::new(jpl, job_id, mode, cwd, destination, conflict_policy, replace_first_path, control, producer)
                .resume_from(&job);
            executor.run(items)
        });

        RunningJob { handle, consumer, join }
    }

    /// Runs the Controller's own, non-interactive portion of the mainloop:
    /// installs the interrupt handler (already done in `new`) and reports
    /// what pending jobs exist. A real terminal UI drives everything past
    /// this; this exists so the binary has an observable default action.
    pub fn run(&mut self) -> i32 {
        let pending = self.pending_jobs();
        if !pending.is_empty() {
            log::info!("{} job(s) left in progress from a previous run", pending.len());
        }
        if process_interrupted() {
            1
        } else {
            0
        }
    }

    pub fn write_last_cwd(&self, path: &Path) -> std::io::Result<()> {
        let cwd = self.last_cwd.clone().unwrap_or_else(|| PathBuf::from("."));
        std::fs::write(path, cwd.to_string_lossy().as_bytes())
    }

    pub fn quit(&mut self) {
        self.archive_mounts.quit();
    }
}

fn default_database_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("twinpane")
        .join("jobs.sqlite3")
}

extern "C" fn handle_interrupt(_signum: libc::c_int) {
    PROCESS_INTERRUPTED.store(true, Ordering::SeqCst);
}

fn install_signal_handler() {
    unsafe {
        libc::signal(libc::SIGTERM, handle_interrupt as libc::sighandler_t);
        libc::signal(libc::SIGINT, handle_interrupt as libc::sighandler_t);
    }
}

/// Forwards [`PROCESS_INTERRUPTED`] into every job's [`ControlEvents`] once
/// the signal handler sets it. A signal handler itself cannot safely touch
/// anything beyond a single atomic store, so the actual fan-out happens here
/// on an ordinary thread.
fn spawn_interrupt_monitor(registry: InterruptRegistry) {
    std::thread::spawn(move || loop {
        std::thread::sleep(INTERRUPT_POLL_INTERVAL);
        if !process_interrupted() {
            continue;
        }
        let mut jobs = registry.lock().unwrap_or_else(|e| e.into_inner());
        for weak in jobs.iter() {
            if let Some(control) = weak.upgrade() {
                control.request_interrupt();
            }
        }
        jobs.retain(|weak| weak.strong_count() > 0);
    });
}

/// Whether the process has received SIGTERM/SIGINT; workers fold this into
/// their own [`ControlEvents`] via [`ControlEvents::request_interrupt`]
/// rather than reading the global directly, so they stay testable without
/// a real signal.
pub fn process_interrupted() -> bool {
    PROCESS_INTERRUPTED.load(Ordering::SeqCst)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_with_no_pending_jobs_returns_zero() {
        let cli = Cli {
            version: false,
            printwd: None,
            database: None,
            nodb: true,
            nocolor: false,
            tabsize: 4,
            debug: false,
            start_path: None,
        };
        let mut controller = Controller::new(Config::default(), &cli);
        assert_eq!(controller.run(), 0);
    }
}
