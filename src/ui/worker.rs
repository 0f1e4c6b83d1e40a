//! Background loader: fetch the merge request and build its regions.

use std::collections::HashMap;
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;

use crate::config::Palette;
use crate::core::{format_file, Comment};
use crate::remote::{note_to_comment, Change, GitLab};
use crate::ui::app::{AppMsg, LoadedData};
use crate::ui::region::{FileRegion, Region};

/// Fixed worker count for per-file formatting.
const WORKERS: usize = 4;
/// Depth of the bounded work queue feeding the workers.
const QUEUE_DEPTH: usize = 8;

/// Everything the loader needs to run, cloneable so `:Load` can re-run it.
#[derive(Debug, Clone)]
pub struct LoadParams {
    /// API root, e.g. `https://host/api`.
    pub api_url: String,
    /// Private token for the remote.
    pub token: String,
    /// Full project path (`group/project`).
    pub project: String,
    /// Merge request iid.
    pub iid: u64,
    /// Current viewport width for initial line maps.
    pub width: usize,
    /// Render palette handed to each region.
    pub palette: Palette,
}

/// Run the loader pipeline on a detached thread; the result arrives as one
/// [`AppMsg::Loaded`] message.
pub fn spawn_load(params: LoadParams, tx: Sender<AppMsg>) {
    thread::spawn(move || {
        let result = load(params);
        let _ = tx.send(AppMsg::Loaded(result));
    });
}

struct WorkItem {
    idx: usize,
    change: Change,
    comments: Vec<Comment>,
}

fn load(params: LoadParams) -> Result<LoadedData, String> {
    let client = Arc::new(
        GitLab::new(&params.api_url, params.token.clone()).map_err(|e| e.to_string())?,
    );

    let mr = client
        .fetch_mr(&params.project, params.iid)
        .map_err(|e| e.to_string())?;
    tracing::info!(
        iid = mr.iid,
        files = mr.changes.len(),
        discussions = mr.discussions.len(),
        "merge request fetched"
    );

    // Partition diff notes by the file they apply to, tagging each with its
    // parent discussion id.
    let mut notes_by_file: HashMap<String, Vec<Comment>> = HashMap::new();
    for discussion in &mr.discussions {
        for note in &discussion.notes {
            if note.kind.as_deref() != Some("DiffNote") {
                continue;
            }
            let Some(comment) = note_to_comment(note, &discussion.id) else {
                continue;
            };
            notes_by_file
                .entry(comment.position().new_path.clone())
                .or_default()
                .push(comment);
        }
    }

    let slots: Mutex<Vec<Option<Result<FileRegion, String>>>> =
        Mutex::new((0..mr.changes.len()).map(|_| None).collect());
    let base_ref = mr.diff_refs.base_sha.clone();

    let (work_tx, work_rx) = crossbeam_channel::bounded::<WorkItem>(QUEUE_DEPTH);

    thread::scope(|scope| {
        for _ in 0..WORKERS {
            let work_rx = work_rx.clone();
            let client = &client;
            let slots = &slots;
            let params = &params;
            let base_ref = &base_ref;
            scope.spawn(move || {
                for item in work_rx.iter() {
                    let result = build_region(client, params, base_ref, &item);
                    slots.lock()[item.idx] = Some(result);
                }
            });
        }
        drop(work_rx);

        for (idx, change) in mr.changes.iter().enumerate() {
            let comments = notes_by_file
                .get(&change.new_path)
                .cloned()
                .unwrap_or_default();
            let item = WorkItem {
                idx,
                change: change.clone(),
                comments,
            };
            if work_tx.send(item).is_err() {
                break;
            }
        }
        drop(work_tx);
    });

    let mut regions: Vec<Box<dyn Region>> = Vec::with_capacity(mr.changes.len());
    for (idx, slot) in slots.into_inner().into_iter().enumerate() {
        match slot {
            Some(Ok(region)) => regions.push(Box::new(region)),
            Some(Err(e)) => {
                return Err(format!(
                    "failed to prepare {}: {e}",
                    mr.changes[idx].new_path
                ))
            }
            None => {
                return Err(format!(
                    "no result for {} (worker died)",
                    mr.changes[idx].new_path
                ))
            }
        }
    }

    Ok(LoadedData {
        regions,
        merge_request: mr,
        client,
    })
}

fn build_region(
    client: &GitLab,
    params: &LoadParams,
    base_ref: &str,
    item: &WorkItem,
) -> Result<FileRegion, String> {
    let base = if item.change.new_file {
        String::new()
    } else {
        client
            .fetch_file_raw(&params.project, &item.change.old_path, base_ref)
            .map_err(|e| e.to_string())?
    };

    let file = format_file(&base, &item.change).map_err(|e| e.to_string())?;

    Ok(FileRegion::new(
        file,
        &item.change,
        item.comments.clone(),
        params.width,
        params.palette.clone(),
    ))
}
