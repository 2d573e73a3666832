use anyhow::{Context, Result, bail};
use clap::{CommandFactory, Parser};
use longvox::backend::Backends;
use longvox::cli::{Cli, Commands, ConfigAction, JobArgs};
use longvox::config::Config;
use longvox::daemon::run_daemon;
use longvox::ipc::client::send_command;
use longvox::ipc::protocol::{Command, Response};
use longvox::ipc::server::IpcServer;
use longvox::job::{FileLedger, Job, JobLedger, JobParameters, JobStore, params};
use longvox::pipeline::{CancelToken, JobOutcome};
use longvox::service::{JobService, JobSummary};
use owo_colors::OwoColorize;
use serde_json::Value;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    longvox::logging::init(cli.quiet, cli.verbose);

    match cli.command {
        Commands::Split {
            input,
            max_chars,
            min_merge_chars,
            json,
        } => {
            let config = load_config(cli.config.as_deref(), cli.projects_dir)?;
            let mut limits = config.split_limits();
            if let Some(max) = max_chars {
                limits.max_chars = max;
            }
            if let Some(min) = min_merge_chars {
                limits.min_merge_chars = min;
            }
            if limits.max_chars == 0 {
                bail!("--max-chars must be greater than 0");
            }
            let chunks = longvox::text::split(&read_input(&input)?, limits);
            if json {
                println!("{}", serde_json::to_string_pretty(&chunks)?);
            } else {
                for (i, chunk) in chunks.iter().enumerate() {
                    println!(
                        "{} {}",
                        format!("[{:03}] ({} chars)", i, longvox::text::char_len(chunk)).dimmed(),
                        chunk
                    );
                }
            }
        }
        Commands::Run { job, retry_delay } => {
            let mut config = load_config(cli.config.as_deref(), cli.projects_dir)?;
            if let Some(delay) = retry_delay {
                config.retry.delay_ms = delay.as_millis() as u64;
            }
            let text = read_input(&job.input)?;
            let parameters = job_parameters(&job);
            let job_ref = job.job_ref.clone();
            let service = load_service(config, cli.quiet).await?;
            let cancel = cancel_on_ctrl_c(cli.quiet);

            let outcome = tokio::task::spawn_blocking(move || {
                service.run_blocking(&text, parameters, job_ref.as_deref(), &cancel)
            })
            .await
            .context("job thread panicked")??;
            report_outcome(&outcome)?;
        }
        Commands::Recover {
            job_ref,
            retry_delay,
            socket,
        } => {
            if socket.is_some() {
                handle_ipc_command(socket, Command::RecoverJob { job_ref }).await?;
                return Ok(());
            }
            let mut config = load_config(cli.config.as_deref(), cli.projects_dir)?;
            if let Some(delay) = retry_delay {
                config.retry.delay_ms = delay.as_millis() as u64;
            }
            let service = load_service(config, cli.quiet).await?;
            let cancel = cancel_on_ctrl_c(cli.quiet);

            let result =
                tokio::task::spawn_blocking(move || service.recover_blocking(&job_ref, &cancel))
                    .await
                    .context("job thread panicked")?;
            match result {
                Ok(outcome) => report_outcome(&outcome)?,
                Err(longvox::LongvoxError::JobAlreadyFinished { job_ref }) => {
                    println!("{}", format!("Job '{}' is already finished", job_ref).green());
                }
                Err(e) => return Err(e.into()),
            }
        }
        Commands::Status { job, json } => {
            let config = load_config(cli.config.as_deref(), cli.projects_dir)?;
            let ledger = FileLedger::new(JobStore::new(&config.storage.projects_dir));
            match job {
                Some(job) => {
                    let record = find_job(&ledger, &job)?;
                    if json {
                        println!("{}", serde_json::to_string_pretty(&record)?);
                    } else {
                        print_job(&record);
                    }
                }
                None => {
                    let mut summaries = Vec::new();
                    for job_ref in ledger.store().list_jobs()? {
                        match ledger.load(&job_ref) {
                            Ok(record) => summaries.push(JobSummary::from(&record)),
                            Err(e) => {
                                tracing::warn!(job = %job_ref, error = %e, "skipping unreadable ledger")
                            }
                        }
                    }
                    print_summaries(&summaries);
                }
            }
        }
        Commands::Daemon { socket } => {
            let config = load_config(cli.config.as_deref(), cli.projects_dir)?;
            run_daemon(config, socket, cli.quiet).await?;
        }
        Commands::Submit { job, socket } => {
            let command = Command::CreateJob {
                text: read_input(&job.input)?,
                parameters: job_parameters(&job),
                job_ref: job.job_ref.clone(),
            };
            handle_ipc_command(socket, command).await?;
        }
        Commands::Cancel { job, socket } => {
            handle_ipc_command(socket, Command::CancelJob { job }).await?;
        }
        Commands::JobStatus { job, socket } => {
            let command = match job {
                Some(job) => Command::JobStatus { job },
                None => Command::ListJobs,
            };
            handle_ipc_command(socket, command).await?;
        }
        Commands::Config { action } => {
            handle_config_command(action, cli.config.as_deref(), cli.projects_dir)?;
        }
        Commands::Completions { shell } => {
            clap_complete::generate(
                shell,
                &mut Cli::command(),
                "longvox",
                &mut std::io::stdout(),
            );
        }
    }

    Ok(())
}

/// Load configuration from file or use defaults.
///
/// Priority order:
/// 1. Custom config path from CLI (--config)
/// 2. Default config path (~/.config/longvox/config.toml)
/// 3. Built-in defaults
///
/// Environment variables and `--projects-dir` apply on top.
fn load_config(custom_path: Option<&Path>, projects_dir: Option<PathBuf>) -> Result<Config> {
    let config = if let Some(path) = custom_path {
        Config::load(path).with_context(|| format!("Failed to load {}", path.display()))?
    } else {
        Config::load_or_default(&Config::default_path())?
    };

    let mut config = config.with_env_overrides();
    if let Some(dir) = projects_dir {
        config.storage.projects_dir = dir;
    }
    config.validate()?;
    Ok(config)
}

/// Read text from a file, or stdin when the path is `-`.
fn read_input(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("Failed to read stdin")?;
        return Ok(text);
    }
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

/// Fold the typed flags into the opaque parameter map. Explicit `--param`
/// entries win over the typed flags.
fn job_parameters(args: &JobArgs) -> JobParameters {
    let mut parameters = JobParameters::new();
    if let Some(format) = &args.format {
        parameters.insert(params::KEY_OUTPUT_FORMAT.into(), Value::from(format.as_str()));
    }
    if args.verify {
        parameters.insert(params::KEY_VERIFY.into(), Value::Bool(true));
    }
    if let Some(tolerance) = args.tolerance {
        parameters.insert(params::KEY_TOLERANCE.into(), Value::from(tolerance));
    }
    if let Some(retries) = args.retries {
        parameters.insert(params::KEY_AUTO_RETRY.into(), Value::from(retries));
    }
    for (key, value) in &args.params {
        parameters.insert(key.clone(), value.clone());
    }
    parameters
}

/// Build backends off the async runtime and wrap them in a service.
async fn load_service(config: Config, quiet: bool) -> Result<Arc<JobService>> {
    if !quiet {
        eprintln!("Loading backend '{}'...", config.backend.name);
    }
    let service = tokio::task::spawn_blocking(move || {
        Backends::from_config(&config).map(|backends| JobService::new(config, backends))
    })
    .await
    .context("backend loading task panicked")??;
    Ok(Arc::new(service))
}

/// Cancel the returned token on the first Ctrl-C. The job stops before its
/// next chunk and stays recoverable.
fn cancel_on_ctrl_c(quiet: bool) -> CancelToken {
    let cancel = CancelToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            if !quiet {
                eprintln!("\nStopping after the current chunk...");
            }
            token.cancel();
        }
    });
    cancel
}

/// Resolve a job id or reference against the projects directory.
fn find_job(ledger: &FileLedger, job: &str) -> Result<Job> {
    if ledger.exists(job) {
        return Ok(ledger.load(job)?);
    }
    for job_ref in ledger.store().list_jobs()? {
        if let Ok(record) = ledger.load(&job_ref)
            && record.job_id.to_string() == job
        {
            return Ok(record);
        }
    }
    bail!("Unknown job: {}", job)
}

fn report_outcome(outcome: &JobOutcome) -> Result<()> {
    match outcome {
        JobOutcome::Completed {
            final_path,
            duration_sec,
            ..
        } => {
            println!(
                "{} {} ({})",
                "Completed:".green(),
                final_path.display(),
                humantime::format_duration(Duration::from_millis(
                    (duration_sec.max(0.0) * 1000.0).round() as u64
                ))
            );
            Ok(())
        }
        JobOutcome::Cancelled {
            job_ref,
            chunks_completed,
        } => {
            println!(
                "{} '{}' after {} chunks. Resume with: longvox recover {}",
                "Cancelled".yellow(),
                job_ref,
                chunks_completed,
                job_ref
            );
            Ok(())
        }
        JobOutcome::Incomplete { job_ref, missing } => {
            eprintln!(
                "{} '{}' is missing {}",
                "Incomplete:".yellow(),
                job_ref,
                missing.join(", ")
            );
            bail!("job '{}' could not be assembled", job_ref)
        }
        JobOutcome::Failed {
            job_ref,
            failed_chunk,
            reason,
            recover_token,
        } => {
            eprintln!(
                "{} chunk {} of '{}': {}",
                "Failed:".red(),
                failed_chunk,
                job_ref,
                reason
            );
            eprintln!("Resume with: longvox recover {}", recover_token);
            bail!("job '{}' failed", job_ref)
        }
    }
}

fn print_job(job: &Job) {
    println!("{}", job.job_ref.bold());
    println!("  {}      {}", "Id:".dimmed(), job.job_id);
    println!("  {}  {}", "Status:".dimmed(), job.status);
    println!("  {} {}", "Backend:".dimmed(), job.backend);
    println!(
        "  {}  {}/{}",
        "Chunks:".dimmed(),
        job.chunks_completed,
        job.total_chunks
    );
    if let Some(file) = &job.final_file {
        println!("  {}  {}", "Output:".dimmed(), file);
    }
    if let Some(reason) = &job.failure_reason {
        println!("  {}  {}", "Reason:".dimmed(), reason.red());
    }
    if !job.missing_files.is_empty() {
        println!(
            "  {} {}",
            "Missing:".dimmed(),
            job.missing_files.join(", ").yellow()
        );
    }
}

fn print_summaries(jobs: &[JobSummary]) {
    if jobs.is_empty() {
        println!("No jobs");
        return;
    }
    for job in jobs {
        let marker = if job.active {
            "●".green().to_string()
        } else {
            "○".to_string()
        };
        println!(
            "  {} {:<30} {:<11} {}/{}",
            marker,
            job.job_ref,
            job.status.to_string(),
            job.chunks_completed,
            job.total_chunks
        );
    }
}

/// Handle configuration commands.
fn handle_config_command(
    action: ConfigAction,
    custom_path: Option<&Path>,
    projects_dir: Option<PathBuf>,
) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = load_config(custom_path, projects_dir)?;
            print!("{}", toml::to_string_pretty(&config)?);
        }
        ConfigAction::Path => {
            let path = custom_path
                .map(Path::to_path_buf)
                .unwrap_or_else(Config::default_path);
            println!("{}", path.display());
        }
    }
    Ok(())
}

/// Send a command to the daemon and print the response.
async fn handle_ipc_command(socket: Option<PathBuf>, command: Command) -> Result<()> {
    let socket_path = socket.unwrap_or_else(IpcServer::default_socket_path);

    match send_command(&socket_path, command).await {
        Ok(response) => match response {
            Response::Ok => {
                println!("{}", "OK".green());
            }
            Response::JobCreated {
                job_id,
                job_ref,
                total_chunks,
            } => {
                println!(
                    "{} '{}' ({} chunks, id {})",
                    "Started".green(),
                    job_ref,
                    total_chunks,
                    job_id
                );
            }
            Response::RecoveryStarted {
                job_ref,
                resume_index,
                total_chunks,
                ..
            } => {
                println!(
                    "{} '{}' at chunk {}/{}",
                    "Resuming".green(),
                    job_ref,
                    resume_index,
                    total_chunks
                );
            }
            Response::AlreadyFinished {
                job_ref,
                final_file,
            } => match final_file {
                Some(file) => println!("Job '{}' is already finished: {}", job_ref, file.green()),
                None => println!("Job '{}' is already finished", job_ref),
            },
            Response::JobStatus { job } => print_job(&job),
            Response::Jobs { jobs } => print_summaries(&jobs),
            Response::Error { message } => {
                eprintln!("{} {}", "Error:".red(), message);
                std::process::exit(1);
            }
        },
        Err(e) => {
            eprintln!("{} {}", "Failed to communicate with daemon:".red(), e);
            eprintln!("Is the daemon running? Start it with: longvox daemon");
            std::process::exit(1);
        }
    }

    Ok(())
}
