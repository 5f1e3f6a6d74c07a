//! Runner — CLI entry point for the multi-project task runner and
//! dependency scheduler.

use std::fs;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use eyre::{Context, Result};
use tracing::{debug, info, warn};

use runner::cli::{Cli, Command, effective_command, get_log_path};
use runner::config::Config;
use runner::domain::{Classification, Task, TaskStatus};
use runner::executor::{Executor, TmuxMultiplexer};
use runner::oauth::{OAuthStore, SharedOAuthStore};
use runner::resolver;
use runner::service::TaskService;
use runner::state::{RunnerState, RunnerStatus, is_pid_alive, stale_state_sweep};
use runner::supervisor::{SpawnMode, Supervisor, SupervisorConfig};
use runner::worktree::{WorktreeConfig, WorktreeManager};
use runner::{daemon, http, oauth};

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    let log_path = get_log_path();
    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent).context("Failed to create log directory")?;
    }

    let level_str = cli_log_level.or(config_log_level);
    let level = match level_str.map(str::to_uppercase).as_deref() {
        Some("TRACE") => tracing::Level::TRACE,
        Some("DEBUG") => tracing::Level::DEBUG,
        Some("INFO") => tracing::Level::INFO,
        Some("WARN") | Some("WARNING") => tracing::Level::WARN,
        Some("ERROR") => tracing::Level::ERROR,
        Some(other) => {
            eprintln!("Warning: Unknown log-level '{other}', defaulting to INFO");
            tracing::Level::INFO
        }
        None => tracing::Level::INFO,
    };

    let log_file = fs::File::create(&log_path).context("Failed to create log file")?;
    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!(?log_path, "Logging initialized");
    Ok(())
}

fn home_dir() -> std::path::PathBuf {
    dirs::home_dir().unwrap_or_else(|| std::path::PathBuf::from("."))
}

fn build_service(config: &Config) -> TaskService {
    TaskService::new(&config.brain.dir, "brain-index", home_dir())
}

fn build_executor(config: &Config, state_dir: &Path) -> Executor {
    Executor::new(
        state_dir.join("scratch"),
        config.agent.default_agent.clone(),
        config.agent.default_model.clone(),
        Arc::new(TmuxMultiplexer),
    )
}

fn build_worktree(config: &Config, repo_root: std::path::PathBuf) -> WorktreeManager {
    WorktreeManager::new(WorktreeConfig {
        repo_root,
        worktree_subdir: config.git.worktree_subdir.clone(),
        setup_timeout_secs: config.git.setup_timeout_secs,
        agent_command: config.agent.default_agent.clone(),
    })
}

fn build_supervisor(config: &Config, project: &str, spawn_mode: SpawnMode) -> Supervisor {
    let service = build_service(config);
    let executor = build_executor(config, &config.storage.state_dir);
    let worktree = build_worktree(config, home_dir());
    let supervisor_config = SupervisorConfig {
        project: project.to_string(),
        home_dir: home_dir(),
        state_dir: config.storage.state_dir.clone(),
        max_concurrent: config.concurrency.max_concurrent,
        poll_interval: Duration::from_secs(config.concurrency.poll_interval_secs),
        max_spawn_failures: config.concurrency.max_spawn_failures,
        spawn_mode,
    };
    Supervisor::new(supervisor_config, service, executor, worktree)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_log_level = Config::load_log_level(cli.config.as_ref());
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    let command = effective_command(&cli);
    debug!(?command, "main: dispatching command");

    match command {
        Some(Command::Start { project, tui, background }) => cmd_start(&config, &project, tui, background).await,
        Some(Command::StartBg { project }) => cmd_start_bg(&config, &project),
        Some(Command::Stop { project }) => cmd_stop(&config, project.as_deref()),
        Some(Command::Status { project }) => cmd_status(&config, project.as_deref()).await,
        Some(Command::List { project }) => cmd_list(&config, project.as_deref()).await,
        Some(Command::Ready { project }) => cmd_selection(&config, &project, Classification::Ready).await,
        Some(Command::Waiting { project }) => cmd_selection(&config, &project, Classification::Waiting).await,
        Some(Command::Blocked { project }) => cmd_selection(&config, &project, Classification::Blocked).await,
        Some(Command::RunOne { project }) => cmd_run_one(&config, &project).await,
        Some(Command::Logs { follow, lines }) => cmd_logs(follow, lines),
        Some(Command::Config) => cmd_config(&config),
        Some(Command::RunSupervisor { project }) => cmd_run_supervisor(&config, &project).await,
        None => {
            eprintln!("No command given. Run with --help for usage.");
            Ok(())
        }
    }
}

async fn poll_loop(sup: &mut Supervisor) -> Result<()> {
    sup.recover().await.context("initial crash recovery")?;
    sup.start().context("starting supervisor")?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("main: received ctrl-c, stopping supervisor");
                sup.stop().await.context("stopping supervisor")?;
                return Ok(());
            }
            _ = tokio::time::sleep(sup.poll_interval()) => {
                if let Err(e) = sup.tick().await {
                    warn!(error = %e, "main: supervisor tick failed, continuing");
                }
                if sup.status() == RunnerStatus::Stopped {
                    return Ok(());
                }
            }
        }
    }
}

async fn cmd_start(config: &Config, project: &str, tui: bool, background: bool) -> Result<()> {
    if background {
        return cmd_start_bg(config, project);
    }
    if project == "all" {
        return cmd_start_all(config).await;
    }
    let spawn_mode = if tui { SpawnMode::Tui } else { SpawnMode::Background };
    let mut sup = build_supervisor(config, project, spawn_mode);
    poll_loop(&mut sup).await
}

/// `runner start all`: one supervisor task per project plus the HTTP/OAuth
/// surface, all in this process, torn down together on ctrl-c.
async fn cmd_start_all(config: &Config) -> Result<()> {
    let service = build_service(config);
    let projects = service.list_projects().context("listing projects")?;
    info!(count = projects.len(), "cmd_start_all: starting fleet");

    let mut handles = Vec::new();
    for project in projects {
        // A fleet run has no single interactive pane to attach to, so every
        // project supervisor spawns tasks in the background regardless of
        // how `start all` itself was invoked.
        let mut sup = build_supervisor(config, &project, SpawnMode::Background);
        handles.push(tokio::spawn(async move { poll_loop(&mut sup).await }));
    }

    let http_config = config.clone();
    let http_handle = tokio::spawn(async move {
        if let Err(e) = mount_http_server(&http_config).await {
            warn!(error = %e, "cmd_start_all: HTTP server exited with error");
        }
    });

    for handle in handles {
        if let Err(e) = handle.await {
            warn!(error = %e, "cmd_start_all: a project supervisor task panicked");
        }
    }
    http_handle.abort();
    Ok(())
}

fn cmd_start_bg(config: &Config, project: &str) -> Result<()> {
    let pid = daemon::start_detached(&config.storage.state_dir, project)?;
    println!("Started supervisor for \"{project}\" (pid {pid})");
    Ok(())
}

async fn cmd_run_supervisor(config: &Config, project: &str) -> Result<()> {
    runner::state::write_supervisor_pid(&config.storage.state_dir, project).context("registering supervisor pid")?;
    let mut sup = build_supervisor(config, project, SpawnMode::Background);
    let result = poll_loop(&mut sup).await;
    runner::state::remove_supervisor_pid(&config.storage.state_dir, project);
    result
}

fn cmd_stop(config: &Config, project: Option<&str>) -> Result<()> {
    match project {
        Some(project) => daemon::stop(&config.storage.state_dir, project),
        None => {
            let removed = stale_state_sweep(&config.storage.state_dir).context("sweeping stale state")?;
            println!("Cleared {} stale supervisor state file(s)", removed.len());
            Ok(())
        }
    }
}

async fn cmd_status(config: &Config, project: Option<&str>) -> Result<()> {
    match project {
        Some(project) => {
            let Some(state) = RunnerState::load(&config.storage.state_dir, project) else {
                println!("No state recorded for \"{project}\"");
                return Ok(());
            };
            let running = daemon::is_supervisor_running(&config.storage.state_dir, project);
            println!(
                "{project}: status={:?} running={running} tasks_in_flight={} spawned={} completed={}",
                state.status,
                state.running_tasks.len(),
                state.stats.total_spawned,
                state.stats.total_completed
            );
        }
        None => {
            let service = build_service(config);
            for project in service.list_projects().context("listing projects")? {
                if let Some(state) = RunnerState::load(&config.storage.state_dir, &project) {
                    let running = daemon::is_supervisor_running(&config.storage.state_dir, &project);
                    println!("{project}: status={:?} running={running}", state.status);
                } else {
                    println!("{project}: no state recorded");
                }
            }
        }
    }
    Ok(())
}

fn print_tasks(label: &str, tasks: &[&Task]) {
    println!("{label} ({}):", tasks.len());
    for task in tasks {
        println!("  {} [{}] {}", task.id, task.status, task.title);
    }
}

async fn cmd_list(config: &Config, project: Option<&str>) -> Result<()> {
    let mut service = build_service(config);
    let projects = match project {
        Some(p) => vec![p.to_string()],
        None => service.list_projects().context("listing projects")?,
    };

    for project in projects {
        let tasks = service.tasks(&project).await.with_context(|| format!("loading tasks for \"{project}\""))?;
        let result = resolver::resolve(tasks);
        println!(
            "{project}: total={} ready={} waiting={} blocked={}",
            result.stats.total, result.stats.ready, result.stats.waiting, result.stats.blocked
        );
    }
    Ok(())
}

async fn cmd_selection(config: &Config, project: &str, classification: Classification) -> Result<()> {
    let mut service = build_service(config);
    let tasks = service.tasks(project).await.with_context(|| format!("loading tasks for \"{project}\""))?;
    let result = resolver::resolve(tasks);

    let selected: Vec<&Task> = result
        .tasks
        .iter()
        .filter(|t| match classification {
            Classification::Waiting => matches!(t.classification, Classification::Waiting | Classification::WaitingOnParent),
            Classification::Blocked => matches!(t.classification, Classification::Blocked | Classification::BlockedByParent),
            other => t.classification == other,
        })
        .map(|t| &t.task)
        .collect();

    print_tasks(&format!("{classification:?}"), &selected);
    Ok(())
}

async fn cmd_run_one(config: &Config, project: &str) -> Result<()> {
    let mut service = build_service(config);
    let tasks = service.tasks(project).await.with_context(|| format!("loading tasks for \"{project}\""))?.to_vec();
    let result = resolver::resolve(&tasks);

    let Some(task) = result.ready_sorted().first().map(|t| t.task.clone()) else {
        println!("No ready tasks in \"{project}\"");
        return Ok(());
    };

    println!("Running task {} ({})", task.id, task.title);
    service.set_status(project, &task.id, TaskStatus::InProgress).await.context("marking task in_progress")?;

    let workdir = service.resolve_workdir(&home_dir(), &task);
    let workdir = if let Some(branch) = &task.git_branch {
        let worktree = build_worktree(config, home_dir());
        worktree.ensure(branch).await.context("materializing worktree")?.unwrap_or(workdir)
    } else {
        workdir
    };

    let executor = build_executor(config, &config.storage.state_dir);
    let handle = executor.spawn_background(&task, &workdir, false).await.context("spawning task")?;
    println!("Spawned pid {}, waiting for completion...", handle.pid);

    while is_pid_alive(handle.pid) {
        tokio::time::sleep(Duration::from_millis(500)).await;
    }

    executor.cleanup(&task.id).await;
    println!("Task {} finished", task.id);
    Ok(())
}

fn cmd_logs(follow: bool, lines: usize) -> Result<()> {
    let path = get_log_path();
    let file = fs::File::open(&path).with_context(|| format!("opening log file {}", path.display()))?;
    let mut reader = BufReader::new(file);

    let mut buffer: Vec<String> = Vec::new();
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {
                buffer.push(line.trim_end().to_string());
                if buffer.len() > lines {
                    buffer.remove(0);
                }
            }
            Err(e) => return Err(e).context("reading log file"),
        }
    }
    for line in &buffer {
        println!("{line}");
    }

    if follow {
        loop {
            line.clear();
            match reader.read_line(&mut line) {
                Ok(0) => std::thread::sleep(Duration::from_millis(500)),
                Ok(_) => print!("{line}"),
                Err(_) => {
                    reader.seek(SeekFrom::Start(0)).ok();
                }
            }
        }
    }
    Ok(())
}

fn cmd_config(config: &Config) -> Result<()> {
    println!("{}", serde_yaml::to_string(config).context("serializing config")?);
    Ok(())
}

async fn mount_http_server(config: &Config) -> Result<()> {
    let service = Arc::new(tokio::sync::Mutex::new(build_service(config)));
    let oauth_store: SharedOAuthStore = Arc::new(tokio::sync::Mutex::new(
        OAuthStore::open(&config.storage.oauth_db_path, config.oauth.clone()).context("opening OAuth store")?,
    ));

    let state = http::HttpState {
        brain_dir: config.brain.dir.clone(),
        service,
    };
    let oauth_state = oauth::OAuthState { store: oauth_store.clone() };

    let app = http::router(state, config.oauth.enabled.then_some(oauth_store.clone())).merge(oauth::router(oauth_state));

    let addr = format!("{}:{}", config.brain.host, config.brain.port);
    let listener = tokio::net::TcpListener::bind(&addr).await.with_context(|| format!("binding {addr}"))?;
    info!(%addr, "mount_http_server: listening");
    axum::serve(listener, app).await.context("serving HTTP")
}
