use std::future::Future;
use std::io::{BufRead, Write};
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;

use clap::{error::ErrorKind, Parser};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use itertools::Itertools;
use tracing_subscriber::EnvFilter;

use crate::cli::args::{CliArgs, Command, SessionCommand, SessionSetArgs};
use crate::cli::validation;
use crate::client::{self, ClientOptions, Endpoints, HttpCollectionClient};
use crate::config::{self, ConfigFile};
use crate::output::print::{NoSurface, PrintSurface, SurfaceKind, SystemBrowser};
use crate::output::{self, EMPTY_PLACEHOLDER};
use crate::record::{value_text, EntityKind, Record};
use crate::session::{AuthUser, SessionContext};
use crate::utils;
use crate::view::trend::TrendSummary;
use crate::view::{
    AssumeYes, BulkDeleteOutcome, BulkDeleteReport, CollectionView, ConfirmGate, CsvOptions,
    DeleteOutcome, PrintOptions, ViewError,
};

fn format_kv_line(label: &str, value: &str) {
    println!(":: {:<14}: {}", label, value);
}

/// y/N prompt on the controlling terminal.
#[derive(Clone, Copy, Debug, Default)]
pub struct TerminalConfirm;

impl ConfirmGate for TerminalConfirm {
    fn confirm(&self, prompt: &str) -> bool {
        print!("{prompt} [y/N] ");
        if std::io::stdout().flush().is_err() {
            return false;
        }
        let mut answer = String::new();
        match std::io::stdin().lock().read_line(&mut answer) {
            Ok(_) => matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"),
            Err(_) => false,
        }
    }
}

#[derive(Clone, Debug)]
struct RunConfig {
    command: Command,
    verbose: u8,
    config_path: Option<PathBuf>,
    session_path: Option<PathBuf>,
    base_url: String,
    user_id: Option<i64>,
    page_size: NonZeroUsize,
    timeout: u64,
    proxy: Option<String>,
    export_dir: PathBuf,
    csv_bom: bool,
    print_surface: SurfaceKind,
    endpoints: Endpoints,
}

fn build_run_config(
    args: CliArgs,
    cfg: ConfigFile,
    config_path: Option<PathBuf>,
) -> Result<RunConfig, String> {
    validation::validate(&args)?;

    let base_url = args
        .base_url
        .or(cfg.base_url)
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty())
        .unwrap_or_else(|| client::DEFAULT_BASE_URL.to_string());
    validation::validate_base_url(&base_url)
        .map_err(|e| format!("invalid base_url '{base_url}': {e}"))?;

    let timeout = args
        .timeout
        .or(cfg.timeout)
        .unwrap_or(client::DEFAULT_TIMEOUT_SECS);
    if timeout == 0 {
        return Err("invalid timeout, expected a positive number of seconds".to_string());
    }

    let list_page_size = match &args.command {
        Command::List(list) => list.page_size,
        _ => None,
    };
    let page_size_raw = list_page_size
        .or(cfg.page_size)
        .unwrap_or(crate::view::paginator::DEFAULT_PAGE_SIZE);
    let page_size = NonZeroUsize::new(page_size_raw)
        .ok_or_else(|| "invalid page_size, expected positive integer".to_string())?;

    let proxy = args.proxy.or(cfg.proxy).filter(|p| !p.trim().is_empty());
    let export_dir = config::expand_tilde(cfg.export_dir.as_deref().unwrap_or("."));
    let csv_bom = cfg.csv_bom.unwrap_or(true);

    let print_surface = match cfg.print_surface.as_deref() {
        Some(raw) => SurfaceKind::parse(raw)
            .ok_or_else(|| format!("invalid print_surface '{raw}', expected browser or none"))?,
        None => SurfaceKind::Browser,
    };

    let mut endpoints = Endpoints::default();
    if let Some(overrides) = cfg.endpoints.as_ref() {
        overrides.apply(&mut endpoints);
    }

    let session_path = match cfg.session_file.as_deref() {
        Some(p) => Some(config::expand_tilde(p)),
        None => config::default_session_path(),
    };

    Ok(RunConfig {
        command: args.command,
        verbose: args.verbose,
        config_path,
        session_path,
        base_url,
        user_id: args.user_id.or(cfg.user_id),
        page_size,
        timeout,
        proxy,
        export_dir,
        csv_bom,
        print_surface,
        endpoints,
    })
}

fn init_tracing(verbose: u8) {
    let filter = if verbose == 0 && std::env::var_os("RUST_LOG").is_some() {
        EnvFilter::from_default_env()
    } else {
        let level = match verbose {
            0 => "warn",
            1 => "info",
            _ => "debug",
        };
        EnvFilter::new(format!("healthmate={level}"))
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

async fn with_spinner<F: Future>(message: String, fut: F) -> F::Output {
    let pb = ProgressBar::new_spinner();
    pb.set_draw_target(ProgressDrawTarget::stderr());
    if let Ok(style) = ProgressStyle::with_template(":: {spinner} {msg} [{elapsed}]") {
        pb.set_style(style);
    }
    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(120));
    let out = fut.await;
    pb.finish_and_clear();
    out
}

fn load_session(run: &RunConfig) -> Result<SessionContext, String> {
    match run.session_path.as_deref() {
        Some(path) => SessionContext::load(path).map_err(|e| e.to_string()),
        None => Ok(SessionContext::signed_out()),
    }
}

fn open_view(
    run: &RunConfig,
    kind: EntityKind,
) -> Result<CollectionView<HttpCollectionClient>, String> {
    let source = HttpCollectionClient::new(ClientOptions {
        base_url: run.base_url.clone(),
        timeout_secs: run.timeout,
        proxy: run.proxy.clone(),
        endpoints: run.endpoints.clone(),
    })
    .map_err(|e| e.to_string())?;

    match run.user_id {
        Some(owner) => Ok(CollectionView::new(kind, owner, source, run.page_size)),
        None => {
            let session = load_session(run)?;
            CollectionView::for_session(kind, &session, source, run.page_size)
                .map_err(|e| e.to_string())
        }
    }
}

/// Notices are printed and end the command successfully.
fn finish<T>(result: Result<T, ViewError>) -> Result<Option<T>, String> {
    match result {
        Ok(v) => Ok(Some(v)),
        Err(e) if e.is_notice() => {
            println!("{}", e.to_string().yellow());
            Ok(None)
        }
        Err(e) => Err(e.to_string()),
    }
}

async fn load_view(view: &CollectionView<HttpCollectionClient>) -> Result<(), String> {
    let message = format!("Loading {}...", view.kind().title().to_lowercase());
    with_spinner(message, view.load())
        .await
        .map(|_| ())
        .map_err(|e| e.to_string())
}

fn render_bulk_delete(report: &BulkDeleteReport, remaining: usize) {
    println!(
        "{} {} record(s): {} ({} remaining)",
        "Deleted".green(),
        report.deleted.len(),
        report.deleted.iter().join(", "),
        remaining
    );
    for (id, message) in &report.failed {
        println!("{} record {}: {}", "Not deleted".red(), id, message);
    }
    if let Err(message) = &report.reload {
        println!("{} {}", "Reloading failed:".red(), message);
    }
}

fn render_page(view: &CollectionView<HttpCollectionClient>, page: &crate::view::PageView) {
    let kind = view.kind();
    println!(
        "{}  {}",
        kind.title().bold(),
        format!(
            "user {} :: page {}/{} :: {} records",
            view.owner(),
            page.page,
            page.total_pages,
            page.total_records
        )
        .dimmed()
    );
    if let Some(banner) = view.error() {
        println!("{}", banner.red());
    }
    let table = output::render_table(output::table_columns(kind), &page.rows, &view.selection());
    for line in table.lines() {
        if line.trim() == EMPTY_PLACEHOLDER {
            println!("{}", line.dimmed());
        } else {
            println!("{line}");
        }
    }

    if kind == EntityKind::HealthData {
        let summary = TrendSummary::from_records(&view.records());
        if !summary.is_empty() {
            println!();
            for line in summary.lines() {
                println!("{}", line.cyan());
            }
        }
    }

    if let (Some(cmp), Some(text)) = (view.comparison(), view.comparison_text()) {
        println!();
        let line = format!("{text}  (#{} vs #{})", cmp.first_id, cmp.second_id);
        if cmp.delta >= 0.0 {
            println!("{}", line.green().bold());
        } else {
            println!("{}", line.red().bold());
        }
    }
}

fn render_record(kind: EntityKind, record: &Record) {
    println!("{}", format!("{} #{}", kind.title(), record.id).bold());
    format_kv_line("id", &record.id.to_string());
    format_kv_line("timestamp", &record.formatted_timestamp());
    for (key, value) in &record.fields {
        if value.is_null() {
            continue;
        }
        let text = value_text(value);
        let text = if key == "detailedGuidance" {
            utils::strip_markdown_headings(&text)
        } else {
            text
        };
        format_kv_line(key, &text);
    }
}

fn print_surface(run: &RunConfig, no_open: bool) -> Box<dyn PrintSurface> {
    if no_open || run.print_surface == SurfaceKind::None {
        Box::new(NoSurface)
    } else {
        Box::new(SystemBrowser)
    }
}

fn run_session(run: &RunConfig, cmd: &SessionCommand) -> Result<(), String> {
    let mut session = load_session(run)?;
    match cmd {
        SessionCommand::Show => match session.user() {
            Some(user) => {
                format_kv_line("user id", &user.user_id.to_string());
                format_kv_line("username", &user.username);
                format_kv_line("name", user.display_name());
                format_kv_line("email", user.email.as_deref().unwrap_or("-"));
                format_kv_line("role", user.role.as_deref().unwrap_or("-"));
            }
            None => println!("{}", "Not signed in.".yellow()),
        },
        SessionCommand::Set(SessionSetArgs {
            user_id,
            username,
            email,
            full_name,
            role,
        }) => {
            let user = AuthUser {
                user_id: *user_id,
                username: username.clone(),
                email: email.clone(),
                full_name: full_name.clone(),
                role: role.clone(),
            };
            session.save(user).map_err(|e| e.to_string())?;
            println!("{} user {}", "Signed in as".green(), user_id);
        }
        SessionCommand::Clear => {
            if session.clear().map_err(|e| e.to_string())? {
                println!("{}", "Signed out.".green());
            } else {
                println!("{}", "Not signed in.".yellow());
            }
        }
    }
    Ok(())
}

fn run_init_config(run: &RunConfig) -> Result<(), String> {
    let path = run
        .config_path
        .clone()
        .or_else(config::default_config_path)
        .ok_or_else(|| "cannot determine a config location, pass --config".to_string())?;
    if config::ensure_default_config_file(&path)? {
        println!("{} {}", "Wrote".green(), path.display());
    } else {
        println!("{} {} (left unchanged)", "Exists".yellow(), path.display());
    }
    Ok(())
}

async fn run_async(run: RunConfig) -> Result<(), String> {
    match run.command.clone() {
        Command::List(list) => {
            let view = open_view(&run, list.view.into())?;
            load_view(&view).await?;
            view.set_page(list.page);
            if let Some(raw) = list.select.as_deref() {
                for id in utils::parse_id_csv(raw)? {
                    view.toggle_select(id).map_err(|e| e.to_string())?;
                }
            }
            render_page(&view, &view.page());
        }
        Command::Show(show) => {
            let kind: EntityKind = show.view.into();
            let view = open_view(&run, kind)?;
            load_view(&view).await?;
            let record = view
                .get(show.id)
                .ok_or_else(|| ViewError::UnknownRecord { kind, id: show.id }.to_string())?;
            render_record(kind, &record);
        }
        Command::Delete(delete) => {
            let view = open_view(&run, delete.view.into())?;
            load_view(&view).await?;
            let gate: Box<dyn ConfirmGate> = if delete.yes {
                Box::new(AssumeYes)
            } else {
                Box::new(TerminalConfirm)
            };
            match (delete.id, delete.ids.as_deref()) {
                (_, Some(raw)) => {
                    let ids = utils::parse_id_csv(raw)?;
                    let outcome = view.delete_records(&ids, gate.as_ref()).await;
                    match outcome.map_err(|e| e.to_string())? {
                        BulkDeleteOutcome::Cancelled => println!("{}", "Cancelled.".yellow()),
                        BulkDeleteOutcome::Finished(report) => render_bulk_delete(&report, view.len()),
                    }
                }
                (Some(id), None) => {
                    let outcome = view.delete_record(id, gate.as_ref()).await;
                    match outcome.map_err(|e| e.to_string())? {
                        DeleteOutcome::Cancelled => println!("{}", "Cancelled.".yellow()),
                        DeleteOutcome::Deleted(_) => println!(
                            "{} record {} ({} remaining)",
                            "Deleted".green(),
                            id,
                            view.len()
                        ),
                        DeleteOutcome::DeletedReloadFailed { message } => println!(
                            "{} record {}, but reloading failed: {}",
                            "Deleted".green(),
                            id,
                            message.red()
                        ),
                    }
                }
                (None, None) => return Err("delete needs a record id or --id".to_string()),
            }
        }
        Command::Export(export) => {
            let view = open_view(&run, export.view.into())?;
            load_view(&view).await?;
            let options = CsvOptions {
                dir: export
                    .out_dir
                    .as_deref()
                    .map(config::expand_tilde)
                    .unwrap_or_else(|| run.export_dir.clone()),
                bom: run.csv_bom && !export.no_bom,
            };
            if let Some(artifact) = finish(view.export_csv(&options).await)? {
                println!(
                    "{} {} rows to {}",
                    "Exported".green(),
                    artifact.rows,
                    artifact.path.display()
                );
            }
        }
        Command::Print(print) => {
            let view = open_view(&run, print.view.into())?;
            load_view(&view).await?;
            let ids = print.ids.as_deref().map(utils::parse_id_csv).transpose()?;
            let options = PrintOptions {
                dir: print
                    .out_dir
                    .as_deref()
                    .map(config::expand_tilde)
                    .unwrap_or_else(|| run.export_dir.clone()),
            };
            let surface = print_surface(&run, print.no_open);
            let result = view
                .export_printable(&options, surface.as_ref(), ids.as_deref())
                .await;
            match result {
                Err(ViewError::PopupBlocked { path, .. }) if print.no_open => {
                    println!("{} {}", "Wrote".green(), path.display());
                }
                other => {
                    if let Some(artifact) = finish(other)? {
                        println!(
                            "{} {} records, opened {}",
                            "Printed".green(),
                            artifact.rows,
                            artifact.path.display()
                        );
                    }
                }
            }
        }
        Command::Session(cmd) => run_session(&run, &cmd)?,
        Command::InitConfig => run_init_config(&run)?,
    }
    Ok(())
}

/// Loads the config file and merges it with `args`. Color is switched off as
/// soon as either source asks for it, so later errors print plain.
fn prepare_run(args: CliArgs) -> Result<RunConfig, String> {
    if args.no_color {
        colored::control::set_override(false);
    }
    let user_config_path = args.config.as_deref().map(config::expand_tilde);
    let cfg = match user_config_path.as_ref() {
        Some(path) => config::load_config(path, false)?,
        None => match config::default_config_path() {
            Some(path) => config::load_config(&path, true)?,
            None => ConfigFile::default(),
        },
    };
    if cfg.no_color.unwrap_or(false) {
        colored::control::set_override(false);
    }
    build_run_config(args, cfg, user_config_path)
}

pub fn run_cli() -> Result<(), String> {
    let args = match CliArgs::try_parse() {
        Ok(args) => args,
        Err(e) => match e.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                print!("{e}");
                return Ok(());
            }
            _ => return Err(e.to_string()),
        },
    };

    let run = prepare_run(args)?;
    init_tracing(run.verbose);

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("failed to build runtime: {e}"))?;

    rt.block_on(run_async(run))
}
