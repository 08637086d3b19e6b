//! Workers and workload orchestration
//!
//! A [`Workload`] owns N workers, each with its own connection, random
//! source and registry copy, all sharing one metadata catalog. Workers run
//! the weighted action loop on their own OS thread; the loop is the single
//! place that classifies action outcomes into statistics and drives the
//! reconnect ladder.

use crate::action::{Action, ActionRegistry, CreateTable, ExecutionError};
use crate::checksum::{ChecksumError, DatabaseChecksum};
use crate::discovery::{MetadataPopulator, SchemaDiscovery};
use crate::metadata::Metadata;
use crate::random::RandomSource;
use crate::sql::{LoggedConnection, SqlConnector, SqlError, SqlStatus};
use crate::stats::WorkerStatistics;
use crate::table::TableType;
use std::error::Error;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{error, info, warn};

/// Settings of one workload run
#[derive(Debug, Clone)]
pub struct WorkloadParams {
    pub action_config: crate::action::AllConfig,
    pub duration_in_seconds: u64,
    pub repeat_times: u64,
    pub number_of_workers: usize,
    pub max_reconnect_attempts: u64,
    /// Base seed; per-worker seeds are derived from it
    pub seed: u64,
}

impl Default for WorkloadParams {
    fn default() -> Self {
        Self {
            action_config: crate::action::AllConfig::default(),
            duration_in_seconds: 60,
            repeat_times: 10,
            number_of_workers: 5,
            max_reconnect_attempts: 5,
            seed: 0,
        }
    }
}

/// Workload-level failures
#[derive(Debug)]
pub enum WorkloadError {
    NoSuchWorker { index: usize, max: usize },
    /// The connection was lost and could not be rebuilt
    NotConnected,
    Sql(SqlError),
}

impl fmt::Display for WorkloadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkloadError::NoSuchWorker { index, max } => {
                write!(f, "No such worker {}, maximum is {}", index, max)
            }
            WorkloadError::NotConnected => write!(f, "Worker has no usable connection"),
            WorkloadError::Sql(err) => write!(f, "{}", err),
        }
    }
}

impl Error for WorkloadError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            WorkloadError::Sql(err) => Some(err),
            _ => None,
        }
    }
}

impl From<SqlError> for WorkloadError {
    fn from(err: SqlError) -> Self {
        WorkloadError::Sql(err)
    }
}

fn generate_timestamp() -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    format!("{}_{:03}", now.as_secs(), now.subsec_millis())
}

fn write_metadata_dump(
    dir: &Path,
    timestamp: &str,
    suffix: &str,
    metadata: &Metadata,
) -> std::io::Result<()> {
    fs::create_dir_all(dir)?;
    let filename = dir.join(format!("metadata_{}.{}.txt", timestamp, suffix));
    fs::write(filename, metadata.dump())
}

/// One database client with its own connection and random source
pub struct Worker {
    name: String,
    connector: SqlConnector,
    conn: Option<LoggedConnection>,
    config: WorkloadParams,
    metadata: Arc<Metadata>,
    rand: RandomSource,
    log_dir: PathBuf,
}

impl Worker {
    pub fn new(
        name: impl Into<String>,
        connector: SqlConnector,
        config: WorkloadParams,
        metadata: Arc<Metadata>,
        seed: u64,
    ) -> Result<Self, WorkloadError> {
        let conn = connector()?;
        Ok(Self {
            name: name.into(),
            connector,
            conn: Some(conn),
            config,
            metadata,
            rand: RandomSource::new(seed),
            log_dir: PathBuf::from("logs"),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Drop the current connection, then build a fresh one
    pub fn reconnect(&mut self) -> Result<(), WorkloadError> {
        self.conn = None;
        self.conn = Some((self.connector)()?);
        Ok(())
    }

    pub fn sql_connection(&mut self) -> Result<&mut LoggedConnection, WorkloadError> {
        self.conn.as_mut().ok_or(WorkloadError::NotConnected)
    }

    /// Run the create-table action `count` times
    pub fn create_random_tables(&mut self, count: usize) -> Result<(), ExecutionError> {
        let creator = CreateTable::new(self.config.action_config.ddl.clone(), TableType::Normal);
        for _ in 0..count {
            let conn = match self.conn.as_mut() {
                Some(conn) => conn,
                None => return Err(ExecutionError::Other("worker is not connected".to_string())),
            };
            creator.execute(&self.metadata, &mut self.rand, conn)?;
        }
        Ok(())
    }

    /// Rebuild the shared catalog from the live database
    pub fn discover_existing_schema(&mut self) -> Result<(), SqlError> {
        info!(
            "Worker {} starting schema discovery from existing database",
            self.name
        );

        let conn = match self.conn.as_mut() {
            Some(conn) => conn,
            None => {
                return Err(SqlError::new(
                    "08003",
                    "connection does not exist",
                    SqlStatus::ServerGone,
                ))
            }
        };

        let mut discovery = SchemaDiscovery::new(conn);
        let populator = MetadataPopulator::new(&self.metadata);

        match populator.populate_from_existing_database(&mut discovery) {
            Ok(()) => {
                info!(
                    "Worker {} completed schema discovery, found {} tables",
                    self.name,
                    self.metadata.size()
                );
                Ok(())
            }
            Err(err) => {
                error!("Worker {} schema discovery failed: {}", self.name, err);
                Err(err)
            }
        }
    }

    pub fn reset_metadata(&self) {
        self.metadata.reset();
    }

    /// Snapshot the catalog, rediscover from the server and compare
    ///
    /// On mismatch both versions are dumped to timestamped files under the
    /// log directory and false is returned.
    pub fn validate_metadata(&mut self) -> bool {
        let original = self.metadata.snapshot();

        self.reset_metadata();
        if let Err(err) = self.discover_existing_schema() {
            error!("Metadata validation failed with exception: {}", err);
            return false;
        }

        let is_valid = *self.metadata == original;

        if !is_valid {
            let timestamp = generate_timestamp();
            if let Err(err) =
                write_metadata_dump(&self.log_dir, &timestamp, "orig", &original).and_then(|_| {
                    write_metadata_dump(&self.log_dir, &timestamp, "new", &self.metadata)
                })
            {
                error!("Failed to write metadata dump files: {}", err);
            }
            error!(
                "Metadata validation failed - reloaded metadata differs from original. \
                 Debug files written with timestamp {}",
                timestamp
            );
        }

        is_valid
    }

    /// Checksum all catalog tables into a CSV file
    pub fn calculate_database_checksums(
        &mut self,
        path: impl AsRef<Path>,
    ) -> Result<(), ChecksumError> {
        let conn = match self.conn.as_mut() {
            Some(conn) => conn,
            None => {
                return Err(ChecksumError::Sql(SqlError::new(
                    "08003",
                    "connection does not exist",
                    SqlStatus::ServerGone,
                )))
            }
        };
        let mut checksummer = DatabaseChecksum::new(conn, &self.metadata);
        checksummer.calculate_all_table_checksums()?;
        checksummer.write_results_to_file(path)?;
        Ok(())
    }

    /// The weighted action loop; runs until `duration` elapses or the
    /// reconnect ladder is exhausted
    fn action_loop(
        &mut self,
        actions: &ActionRegistry,
        stats: &mut WorkerStatistics,
        duration: Duration,
    ) {
        let begin = Instant::now();
        let mut connection_attempts: u64 = 0;

        while begin.elapsed() < duration {
            let total = actions.total_weight();
            if total == 0 {
                warn!("Worker {}: no runnable actions registered", self.name);
                break;
            }

            let offset = self.rand.random_number(0usize, total - 1);
            let factory = match actions.lookup_by_weight_offset(offset) {
                Ok(factory) => factory,
                Err(err) => {
                    // a parallel removal shrank the registry under us
                    warn!("Worker {}: {}", self.name, err);
                    continue;
                }
            };
            let action = factory.build(&self.config.action_config);

            stats.start_action(&factory.name);
            let conn = match self.conn.as_mut() {
                Some(conn) => conn,
                None => {
                    error!("Worker {} has no connection, stopping", self.name);
                    break;
                }
            };
            conn.reset_accumulated_sql_time();

            let outcome = action.execute(&self.metadata, &mut self.rand, conn);
            let sql_time = conn.accumulated_sql_time();

            let mut stop = false;
            let recorded = match outcome {
                Ok(()) => {
                    connection_attempts = 0;
                    stats.record_success(&factory.name, sql_time)
                }
                Err(ExecutionError::Action(err)) => {
                    warn!(
                        "Worker {} Action failed ({}): {}",
                        self.name, err.name, err.message
                    );
                    stats.record_action_failure(&factory.name, &err.name, sql_time)
                }
                Err(ExecutionError::Sql(err)) => {
                    warn!("Worker {} SQL failed ({}): {}", self.name, err.code, err);
                    let recorded = stats.record_sql_failure(&factory.name, &err.code, sql_time);

                    if err.server_gone() {
                        connection_attempts += 1;
                        if connection_attempts <= self.config.max_reconnect_attempts {
                            if connection_attempts > 1 {
                                std::thread::sleep(Duration::from_millis(1000));
                            }
                            warn!("Lost connection to the server, trying to reconnect");
                            if let Err(reconnect_err) = self.reconnect() {
                                error!(
                                    "Worker {} reconnect failed: {}",
                                    self.name, reconnect_err
                                );
                                stop = true;
                            }
                        } else {
                            error!(
                                "Failed to connect {} times, stopping worker",
                                connection_attempts
                            );
                            stop = true;
                        }
                    }

                    recorded
                }
                Err(err) => {
                    warn!("Worker {} Action failed (other): {}", self.name, err);
                    stats.record_other_failure(&factory.name, sql_time)
                }
            };

            if let Err(err) = recorded {
                error!("Worker {} statistics error: {}", self.name, err);
            }
            if stop {
                break;
            }
        }
    }
}

/// A worker plus the thread and statistics of its action loop
pub struct RandomWorker {
    worker: Option<Worker>,
    actions: Arc<ActionRegistry>,
    handle: Option<JoinHandle<(Worker, WorkerStatistics)>>,
    stats: WorkerStatistics,
}

impl RandomWorker {
    pub fn new(worker: Worker, actions: ActionRegistry) -> Self {
        Self {
            worker: Some(worker),
            actions: Arc::new(actions),
            handle: None,
            stats: WorkerStatistics::new(),
        }
    }

    /// Start the action loop on its own thread
    pub fn run_thread(&mut self, duration: Duration) {
        if self.handle.is_some() {
            error!("Error: thread is already running");
            return;
        }
        let mut worker = match self.worker.take() {
            Some(worker) => worker,
            None => {
                error!("Worker state is missing, cannot start");
                return;
            }
        };

        info!("Worker {} starting, resetting statistics", worker.name);
        let actions = Arc::clone(&self.actions);

        self.handle = Some(std::thread::spawn(move || {
            let mut stats = WorkerStatistics::new();
            stats.start();
            worker.action_loop(&actions, &mut stats, duration);
            stats.stop();

            info!("Worker {} exiting", worker.name);
            info!(
                "\n=== Worker {} Statistics ===\n{}",
                worker.name,
                stats.report()
            );
            (worker, stats)
        }));
    }

    /// Wait for the loop to finish and collect its statistics
    pub fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            match handle.join() {
                Ok((worker, stats)) => {
                    self.worker = Some(worker);
                    self.stats = stats;
                }
                Err(_) => error!("Worker thread panicked"),
            }
        }
    }

    /// The registry this worker draws from; scenario code can add or
    /// remove actions per worker before a run
    pub fn possible_actions(&self) -> &ActionRegistry {
        &self.actions
    }

    /// Statistics of the last completed run
    pub fn statistics(&self) -> &WorkerStatistics {
        &self.stats
    }

    /// Access to the underlying worker while no thread is running
    pub fn worker_mut(&mut self) -> Option<&mut Worker> {
        self.worker.as_mut()
    }

    pub fn reconnect(&mut self) -> Result<(), WorkloadError> {
        match self.worker.as_mut() {
            Some(worker) => worker.reconnect(),
            None => Err(WorkloadError::NotConnected),
        }
    }
}

/// N workers sharing a catalog, driven for a fixed duration
pub struct Workload {
    duration: Duration,
    workers: Vec<RandomWorker>,
}

impl Workload {
    pub fn new(
        params: WorkloadParams,
        connector: SqlConnector,
        metadata: Arc<Metadata>,
        actions: &ActionRegistry,
    ) -> Result<Self, WorkloadError> {
        let duration = Duration::from_secs(params.duration_in_seconds);
        let mut workers = Vec::new();

        if params.repeat_times > 0 {
            for idx in 0..params.number_of_workers {
                let name = format!("Worker {}", idx + 1);
                let seed = RandomSource::derive_seed(params.seed, idx as u64 + 1);
                let worker = Worker::new(
                    name,
                    Arc::clone(&connector),
                    params.clone(),
                    Arc::clone(&metadata),
                    seed,
                )?;
                workers.push(RandomWorker::new(worker, actions.clone()));
            }
        }

        Ok(Self { duration, workers })
    }

    /// Start all workers
    pub fn run(&mut self) {
        for worker in &mut self.workers {
            worker.run_thread(self.duration);
        }
    }

    /// Join all workers
    pub fn wait_completion(&mut self) {
        for worker in &mut self.workers {
            worker.join();
        }
    }

    /// Force a fresh connection on every (idle) worker
    pub fn reconnect_workers(&mut self) -> Result<(), WorkloadError> {
        for worker in &mut self.workers {
            worker.reconnect()?;
        }
        Ok(())
    }

    /// Per-worker handle; indexes start at 1, as the scenario host expects
    pub fn worker(&mut self, index: usize) -> Result<&mut RandomWorker, WorkloadError> {
        let max = self.workers.len();
        if index == 0 || index > max {
            return Err(WorkloadError::NoSuchWorker { index, max });
        }
        Ok(&mut self.workers[index - 1])
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}
