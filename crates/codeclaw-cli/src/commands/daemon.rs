/// Daemon lifecycle management commands
use anyhow::{Context, Result};
use codeclaw_core::{
    config::Paths,
    daemon_control::DaemonControl,
    ipc::{DaemonStatus, IpcClient, IpcRequest, IpcResponse},
    Daemon,
};
use std::{env, fs, process::Command, time::Duration};
use sysinfo::{Pid, System};

fn is_alive(pid: u32) -> bool {
    let mut sys = System::new();
    sys.refresh_process(Pid::from_u32(pid))
}

pub fn start_daemon(paths: &Paths) -> Result<()> {
    let control = DaemonControl::for_paths(paths);
    let sock_path = paths.socket();

    // 1. Check if daemon is already running
    match control.get_pid() {
        Ok(Some(pid)) if is_alive(pid) => {
            log::info!("Daemon is already running (PID: {pid}).");
            return Ok(());
        }
        Ok(None) => {}
        Ok(Some(_)) | Err(_) => {
            log::warn!("Removing stale PID file.");
            control.remove_pid()?;
        }
    }

    // 2. Clean up old socket if it exists
    if sock_path.exists() {
        log::warn!("Removing stale socket file.");
        fs::remove_file(&sock_path)?;
    }

    log::info!("Starting CodeClaw daemon...");

    // 3. Spawn a new process for the daemon
    let current_exe = env::current_exe()?;
    let current_dir = env::current_dir()?;
    let child = Command::new(current_exe)
        .arg("daemon-internal-start")
        .current_dir(current_dir)
        .spawn()
        .context("Failed to spawn the daemon process")?;

    // 4. In parent process, write PID and exit
    log::info!("Daemon process started with PID: {}", child.id());
    control.write_pid(child.id())?;
    println!("Daemon started. Logs: {}", paths.log_file().display());

    Ok(())
}

pub async fn run_daemon_process(paths: &Paths) -> Result<()> {
    // This is the detached daemon process; nobody is watching its stderr
    setup_daemon_logging(paths)?;
    log::info!("Daemon process started internally.");

    if let Err(e) = daemon_main_logic(paths).await {
        log::error!("Daemon main logic exited with a fatal error: {e:#}");
        return Err(e);
    }

    Ok(())
}

async fn daemon_main_logic(paths: &Paths) -> Result<()> {
    let daemon = Daemon::from_paths(paths)?;
    daemon.serve(paths).await
}

pub async fn stop_daemon(paths: &Paths) -> Result<()> {
    let control = DaemonControl::for_paths(paths);
    let sock_path = paths.socket();

    let Some(pid) = control.get_pid()? else {
        log::info!("Daemon is not running (no PID file).");
        if sock_path.exists() {
            fs::remove_file(&sock_path)?;
        }
        return Ok(());
    };

    log::info!("Stopping CodeClaw daemon (PID: {pid})...");
    let client = IpcClient::new(&sock_path);

    match client.send_command(IpcRequest::Shutdown).await {
        Ok(IpcResponse::Ack(_)) => {
            log::info!("Daemon shutdown signal sent. Waiting for process to exit...");
            tokio::time::sleep(Duration::from_secs(2)).await;

            let mut sys = System::new();
            if sys.refresh_process(Pid::from_u32(pid)) {
                log::warn!("Daemon did not stop gracefully. Force killing...");
                if let Some(process) = sys.process(Pid::from_u32(pid)) {
                    process.kill();
                }
            } else {
                log::info!("Daemon stopped successfully.");
            }
        }
        Ok(resp) => log::error!("Received unexpected response from daemon: {resp:?}"),
        Err(e) => {
            log::error!("Failed to send shutdown command: {e}. Forcing cleanup.");
            let mut sys = System::new();
            if sys.refresh_process(Pid::from_u32(pid)) {
                if let Some(process) = sys.process(Pid::from_u32(pid)) {
                    process.kill();
                    log::info!("Process killed.");
                }
            }
        }
    }

    // Cleanup
    control.remove_pid()?;
    if sock_path.exists() {
        fs::remove_file(&sock_path)?;
    }
    Ok(())
}

fn print_status(status: &DaemonStatus) {
    println!("Daemon Status: {}", if status.paused { "Paused" } else { "Running" });
    println!(
        "Pending sessions: {} (push at {})",
        status.pending, status.push_threshold
    );
    println!(
        "Automatic push: {}",
        if status.auto_push { "on" } else { "off" }
    );
    println!(
        "Destination: {}",
        status.destination.as_deref().unwrap_or("(not configured)")
    );
    if status.halted {
        println!("Retries halted after a permanent failure; run `codeclaw daemon sync`");
    } else if let Some(at) = status.next_retry_at {
        println!(
            "Retry {} scheduled at {}",
            status.retry_attempts,
            at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    if let Some(at) = status.last_sync_at {
        println!("Last push: {}", at.format("%Y-%m-%d %H:%M:%S"));
    }
    if let Some(error) = &status.last_error {
        println!("Last error: {error}");
    }
}

pub async fn show_status(paths: &Paths) -> Result<()> {
    let client = IpcClient::new(&paths.socket());
    match client.send_command(IpcRequest::Status).await {
        Ok(IpcResponse::Status(status)) => print_status(&status),
        Ok(IpcResponse::Error(e)) => anyhow::bail!("Daemon error: {e}"),
        Ok(_) => anyhow::bail!("Unexpected response from daemon"),
        Err(e) => {
            log::debug!("Failed to get status: {e}");
            println!("Daemon Status: Not running (or not responding)");
        }
    }
    Ok(())
}

/// Pause, resume or force a sync
pub async fn send_control(paths: &Paths, request: IpcRequest) -> Result<()> {
    let client = IpcClient::new(&paths.socket());
    let response = client
        .send_command(request)
        .await
        .context("Daemon is not running; start it with `codeclaw daemon start`")?;
    match response {
        IpcResponse::Ack(message) => {
            println!("{message}");
            Ok(())
        }
        IpcResponse::Error(e) => anyhow::bail!("Daemon error: {e}"),
        IpcResponse::Status(_) => anyhow::bail!("Unexpected response from daemon"),
    }
}

fn setup_daemon_logging(paths: &Paths) -> Result<()> {
    use std::fs::{create_dir_all, OpenOptions};

    let log_path = paths.log_file();

    if let Some(parent) = log_path.parent() {
        create_dir_all(parent)?;
    }

    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("Failed to open {}", log_path.display()))?;

    env_logger::Builder::from_default_env()
        .target(env_logger::Target::Pipe(Box::new(log_file)))
        .filter_level(log::LevelFilter::Debug)
        .init();

    Ok(())
}
