use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, anyhow, bail};
use chrono::{NaiveDate, Utc};
use tasksync_shared::{AttachmentFile, TaskPatch, TaskStatus, UserProfile};
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::backend::{CancelHandle, UploadProgress};
use crate::cli::{AddArgs, Command, EditArgs, FilterArgs, ViewArgs, parse_move_pair};
use crate::config::Config;
use crate::dashboard::{Dashboard, Notice, NoticeLevel, ViewMode};
use crate::datastore::DataStore;
use crate::datetime::today;
use crate::error::SyncError;
use crate::gateway::{MutationGateway, UploadControl};
use crate::mirror::LiveMirror;
use crate::render::Renderer;
use crate::session::{ProfileCard, Session};

const WATCH_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[instrument(skip(store, cfg, renderer, command))]
pub async fn dispatch(store: &DataStore, cfg: &Config, renderer: &Renderer, command: Command) -> anyhow::Result<()> {
    debug!(?command, "dispatching command");
    match command {
        Command::Login { uid, name, email, photo } => cmd_login(store, renderer, uid, name, email, photo),
        Command::Logout => cmd_logout(store),
        Command::Whoami => cmd_whoami(store, renderer),
        Command::Add(args) => cmd_add(store, cfg, renderer, args).await,
        Command::List(args) => cmd_view(store, renderer, ViewMode::List, args).await,
        Command::Board(args) => cmd_view(store, renderer, ViewMode::Board, args).await,
        Command::Show { id } => cmd_show(store, cfg, renderer, &id).await,
        Command::Edit(args) => cmd_edit(store, cfg, renderer, args).await,
        Command::Delete { id } => cmd_delete(store, cfg, renderer, &id).await,
        Command::SelectStatus { status, ids } => cmd_select_status(store, cfg, renderer, &status, &ids).await,
        Command::SelectDelete { ids } => cmd_select_delete(store, cfg, renderer, &ids).await,
        Command::History { id } => cmd_history(store, cfg, renderer, &id).await,
        Command::Watch { board, list, filters } => {
            let mode = if board {
                ViewMode::Board
            } else if list {
                ViewMode::List
            } else {
                cfg.view_mode()
            };
            cmd_watch(store, renderer, mode, filters).await
        }
    }
}

fn cmd_login(
    store: &DataStore,
    renderer: &Renderer,
    uid: String,
    name: Option<String>,
    email: Option<String>,
    photo: Option<String>,
) -> anyhow::Result<()> {
    if uid.trim().is_empty() {
        bail!("user id must not be empty");
    }
    let profile = UserProfile {
        display_name: name,
        email,
        photo_url: photo,
        ..UserProfile::new(uid.trim())
    };
    store.sign_in(profile.clone())?;
    let mut out = io::stdout().lock();
    write!(out, "Signed in as ")?;
    renderer.write_profile(&mut out, &ProfileCard::from_profile(&profile))?;
    Ok(())
}

fn cmd_logout(store: &DataStore) -> anyhow::Result<()> {
    store.sign_out()?;
    println!("Signed out.");
    Ok(())
}

fn cmd_whoami(store: &DataStore, renderer: &Renderer) -> anyhow::Result<()> {
    let session = Session::new(store);
    match session.current_user() {
        Some(profile) => renderer.write_profile(&mut io::stdout().lock(), &ProfileCard::from_profile(&profile)),
        None => {
            println!("Not signed in.");
            Ok(())
        }
    }
}

/// Opens a dashboard on the signed-in account's live task set, with the
/// initial snapshot applied.
async fn open_dashboard(store: &DataStore, mode: ViewMode) -> anyhow::Result<Dashboard> {
    let session = Session::new(store);
    let mirror = LiveMirror::open(&session, store).await?;
    let mut dashboard = Dashboard::new(mirror, mode);
    dashboard.pump();
    Ok(dashboard)
}

fn gateway(store: &DataStore) -> anyhow::Result<MutationGateway<'_, DataStore, DataStore, DataStore>> {
    let session = Session::new(store);
    Ok(MutationGateway::new(store, store, &session)?)
}

fn parse_status(raw: &str) -> anyhow::Result<TaskStatus> {
    raw.parse::<TaskStatus>().map_err(|err| anyhow!(err))
}

fn apply_filters(dashboard: &mut Dashboard, filters: &FilterArgs) -> anyhow::Result<()> {
    let view = dashboard.filters_mut();
    if let Some(category) = &filters.category {
        view.set_category(category);
    }
    if let Some(due) = &filters.due {
        view.set_due(due)?;
    }
    if let Some(search) = &filters.search {
        view.set_search(search);
    }
    Ok(())
}

/// Prints and drops the dashboard's notices. Errors go to stderr and make
/// the command fail.
fn finish(mut dashboard: Dashboard, renderer: &Renderer) -> anyhow::Result<()> {
    dashboard.unmount();
    let notices = dashboard.drain_notices();
    let (errors, infos): (Vec<Notice>, Vec<Notice>) =
        notices.into_iter().partition(|n| n.level == NoticeLevel::Error);
    renderer.write_notices(&mut io::stdout().lock(), &infos)?;
    renderer.write_notices(&mut io::stderr().lock(), &errors)?;
    if errors.is_empty() {
        Ok(())
    } else {
        Err(anyhow!("{} operation(s) failed", errors.len()))
    }
}

#[instrument(skip(store, cfg, renderer, args), fields(title = %args.title))]
async fn cmd_add(store: &DataStore, cfg: &Config, renderer: &Renderer, args: AddArgs) -> anyhow::Result<()> {
    let gateway = gateway(store)?;
    let mut dashboard = open_dashboard(store, cfg.view_mode()).await?;

    dashboard.form.title = args.title;
    dashboard.form.description = args.description;
    dashboard.form.category = args.category;
    dashboard.form.due_date = args.due;
    if let Some(status) = &args.status {
        dashboard.form.status = parse_status(status)?;
    }
    if let Some(path) = &args.attach {
        dashboard.form.attachment = Some(read_attachment(path)?);
    }

    let upload = UploadControl::default();
    let created = if dashboard.form.attachment.is_some() {
        let monitor = monitor_upload(upload.progress(), upload.cancel_handle());
        tokio::select! {
            created = dashboard.submit_form(&gateway, &upload) => created,
            () = monitor => None,
        }
    } else {
        dashboard.submit_form(&gateway, &upload).await
    };

    if let Some(task) = created {
        info!(task_id = %task.id, "created task");
    }
    finish(dashboard, renderer)
}

fn read_attachment(path: &Path) -> anyhow::Result<AttachmentFile> {
    let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| anyhow!("attachment path has no file name: {}", path.display()))?;
    Ok(AttachmentFile { file_name, bytes })
}

/// Reports upload progress on stderr and turns Ctrl-C into a cancel of the
/// transfer. Never completes on its own.
async fn monitor_upload(mut progress: watch::Receiver<UploadProgress>, cancel: CancelHandle) {
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut progress_open = true;
    let mut interrupted = false;

    loop {
        tokio::select! {
            changed = progress.changed(), if progress_open => {
                if changed.is_err() {
                    progress_open = false;
                    continue;
                }
                let current = *progress.borrow_and_update();
                eprint!("\ruploading attachment {:>3.0}%", current.fraction() * 100.0);
                if current.bytes_transferred >= current.total_bytes {
                    eprintln!();
                }
            }
            signal = &mut ctrl_c, if !interrupted => {
                interrupted = true;
                if let Err(err) = signal {
                    warn!(error = %err, "failed to listen for Ctrl-C");
                    continue;
                }
                eprintln!();
                warn!("cancelling attachment upload");
                cancel.cancel();
            }
            else => std::future::pending::<()>().await,
        }
    }
}

async fn cmd_view(store: &DataStore, renderer: &Renderer, mode: ViewMode, args: ViewArgs) -> anyhow::Result<()> {
    let mut dashboard = open_dashboard(store, mode).await?;
    apply_filters(&mut dashboard, &args.filters)?;
    let today = today(Utc::now());

    if let Some(raw) = &args.move_pair {
        let (active, over) = parse_move_pair(raw)?;
        let bucket = dashboard
            .mirror()
            .get(&active)
            .map(|task| task.status)
            .ok_or_else(|| SyncError::UnknownTask(active.clone()))?;
        if !dashboard.reorder(bucket, &active, &over, today) {
            dashboard.notify(Notice::error(format!(
                "cannot move {active} onto {over}: both must be shown in the same status bucket"
            )));
        }
    }

    draw(&dashboard, renderer, today, &mut io::stdout().lock())?;
    finish(dashboard, renderer)
}

fn draw<W: Write>(dashboard: &Dashboard, renderer: &Renderer, today: NaiveDate, out: &mut W) -> anyhow::Result<()> {
    match dashboard.mode() {
        ViewMode::List => {
            let projection = dashboard.projection(today);
            renderer.write_task_list(out, projection.tasks(), dashboard.selection(), today)
        }
        ViewMode::Board => {
            let buckets: Vec<_> = TaskStatus::ALL
                .into_iter()
                .map(|status| (status, dashboard.bucket_view(status, today)))
                .collect();
            renderer.write_board(out, &buckets, dashboard.selection(), today)
        }
    }
}

async fn cmd_show(store: &DataStore, cfg: &Config, renderer: &Renderer, id: &str) -> anyhow::Result<()> {
    let dashboard = open_dashboard(store, cfg.view_mode()).await?;
    let task = dashboard
        .mirror()
        .get(id)
        .ok_or_else(|| SyncError::UnknownTask(id.to_string()))?;
    renderer.write_task_info(&mut io::stdout().lock(), task, today(Utc::now()))?;
    finish(dashboard, renderer)
}

#[instrument(skip(store, cfg, renderer, args), fields(task_id = %args.id))]
async fn cmd_edit(store: &DataStore, cfg: &Config, renderer: &Renderer, args: EditArgs) -> anyhow::Result<()> {
    let patch = TaskPatch {
        title: args.title,
        description: args.description,
        category: args.category,
        status: args.status.as_deref().map(parse_status).transpose()?,
        due_date: args.due,
    };
    if patch.is_empty() {
        bail!("nothing to change; pass at least one field");
    }

    let gateway = gateway(store)?;
    let mut dashboard = open_dashboard(store, cfg.view_mode()).await?;
    dashboard.edit(&gateway, &args.id, &patch).await;
    finish(dashboard, renderer)
}

async fn cmd_delete(store: &DataStore, cfg: &Config, renderer: &Renderer, id: &str) -> anyhow::Result<()> {
    let gateway = gateway(store)?;
    let mut dashboard = open_dashboard(store, cfg.view_mode()).await?;
    if !dashboard.mirror().table().contains(id) {
        return Err(SyncError::UnknownTask(id.to_string()).into());
    }
    dashboard.delete(&gateway, id).await;
    finish(dashboard, renderer)
}

fn select_all(dashboard: &mut Dashboard, ids: &[String]) {
    for id in ids {
        if !dashboard.selection().is_selected(id) {
            dashboard.toggle_selected(id);
        }
    }
}

async fn cmd_select_status(
    store: &DataStore,
    cfg: &Config,
    renderer: &Renderer,
    status: &str,
    ids: &[String],
) -> anyhow::Result<()> {
    let status = parse_status(status)?;
    let gateway = gateway(store)?;
    let mut dashboard = open_dashboard(store, cfg.view_mode()).await?;
    select_all(&mut dashboard, ids);
    dashboard.bulk_set_status(&gateway, status).await;
    finish(dashboard, renderer)
}

async fn cmd_select_delete(store: &DataStore, cfg: &Config, renderer: &Renderer, ids: &[String]) -> anyhow::Result<()> {
    let gateway = gateway(store)?;
    let mut dashboard = open_dashboard(store, cfg.view_mode()).await?;
    select_all(&mut dashboard, ids);
    dashboard.bulk_delete(&gateway).await;
    finish(dashboard, renderer)
}

async fn cmd_history(store: &DataStore, cfg: &Config, renderer: &Renderer, id: &str) -> anyhow::Result<()> {
    let dashboard = open_dashboard(store, cfg.view_mode()).await?;
    let task = dashboard
        .mirror()
        .get(id)
        .ok_or_else(|| SyncError::UnknownTask(id.to_string()))?;
    renderer.write_history(&mut io::stdout().lock(), task)?;
    finish(dashboard, renderer)
}

/// Redraws on every applied snapshot. Changes made by other processes,
/// including a sign-out, are picked up by polling the data and session files.
#[instrument(skip(store, renderer, filters))]
async fn cmd_watch(store: &DataStore, renderer: &Renderer, mode: ViewMode, filters: FilterArgs) -> anyhow::Result<()> {
    let mut dashboard = open_dashboard(store, mode).await?;
    apply_filters(&mut dashboard, &filters)?;
    let mut auth = Session::new(store).auth_changes();
    let owner = dashboard.mirror().owner().to_string();

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut poll = tokio::time::interval(WATCH_POLL_INTERVAL);

    redraw(&dashboard, renderer)?;
    loop {
        tokio::select! {
            signal = &mut ctrl_c => {
                if let Err(err) = signal {
                    warn!(error = %err, "failed to listen for Ctrl-C");
                }
                break;
            }
            live = dashboard.next_snapshot() => {
                if !live {
                    warn!("subscription closed");
                    break;
                }
                redraw(&dashboard, renderer)?;
            }
            changed = auth.changed() => {
                if changed.is_err() {
                    break;
                }
                let still_owner = auth.borrow_and_update().as_ref().is_some_and(|p| p.uid == owner);
                if !still_owner {
                    dashboard.notify(Notice::info("Signed out; stopped watching."));
                    break;
                }
            }
            _ = poll.tick() => {
                if let Err(err) = store.refresh() {
                    warn!(error = %err, "failed to re-read task data");
                }
                if let Err(err) = store.refresh_session() {
                    warn!(error = %err, "failed to re-read session");
                }
            }
        }
    }

    info!("watch stopped");
    finish(dashboard, renderer)
}

fn redraw(dashboard: &Dashboard, renderer: &Renderer) -> anyhow::Result<()> {
    let today = today(Utc::now());
    let mut out = io::stdout().lock();
    writeln!(
        out,
        "\n== {} view, {} task(s), revision {} ==",
        dashboard.mode(),
        dashboard.mirror().table().len(),
        dashboard.mirror().revision()
    )?;
    draw(dashboard, renderer, today, &mut out)?;
    out.flush()?;
    Ok(())
}
