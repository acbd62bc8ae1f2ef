use log::{error, info, warn};
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Result as NotifyResult, Watcher};
use std::path::{Path, PathBuf};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::IndexError;
use crate::image_index::ImageIndex;
use crate::scanner::is_hidden_path;

/// Messages delivered to the single owner of the index entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexEvent {
    Added(PathBuf),
    Removed(PathBuf),
    WatchError(String),
    RestartWatch,
}

impl IndexEvent {
    pub fn path(&self) -> Option<&Path> {
        match self {
            IndexEvent::Added(path) | IndexEvent::Removed(path) => Some(path),
            _ => None,
        }
    }
}

/// Maps a raw notify event to add/remove events. Everything else is ignored.
pub fn classify(event: &Event) -> Vec<IndexEvent> {
    let added = |paths: &[PathBuf]| -> Vec<IndexEvent> {
        paths.iter().cloned().map(IndexEvent::Added).collect()
    };
    let removed = |paths: &[PathBuf]| -> Vec<IndexEvent> {
        paths.iter().cloned().map(IndexEvent::Removed).collect()
    };
    let paths = event.paths.as_slice();

    match &event.kind {
        EventKind::Create(_) => added(paths),
        EventKind::Remove(_) => removed(paths),
        EventKind::Modify(ModifyKind::Name(mode)) => match mode {
            RenameMode::From => removed(paths),
            RenameMode::To => added(paths),
            RenameMode::Both => {
                let mut events = removed(&paths[..paths.len().min(1)]);
                events.extend(added(paths.get(1..).unwrap_or(&[])));
                events
            }
            _ => paths
                .iter()
                .map(|path| match path.exists() {
                    true => IndexEvent::Added(path.clone()),
                    false => IndexEvent::Removed(path.clone()),
                })
                .collect(),
        },
        _ => Vec::new(),
    }
}

/// Like [`classify`], minus events for dotfiles and anything inside dot-directories.
pub fn visible_events(root: &Path, event: &Event) -> Vec<IndexEvent> {
    classify(event)
        .into_iter()
        .filter(|e| e.path().map(|p| !is_hidden_path(root, p)).unwrap_or(true))
        .collect()
}

/// Owns the notify handle for the image root. The handle can be closed and
/// recreated; events keep flowing into the same channel.
pub struct DirectoryWatcher {
    root: PathBuf,
    sender: mpsc::UnboundedSender<IndexEvent>,
    watcher: Option<RecommendedWatcher>,
}

impl DirectoryWatcher {
    pub fn start(root: &Path, sender: mpsc::UnboundedSender<IndexEvent>) -> Result<Self, IndexError> {
        let mut watcher = Self {
            root: root.to_path_buf(),
            sender,
            watcher: None,
        };
        watcher.open()?;
        Ok(watcher)
    }

    fn open(&mut self) -> Result<(), IndexError> {
        let root = self.root.clone();
        let sender = self.sender.clone();
        let mut watcher = notify::recommended_watcher(move |res: NotifyResult<Event>| match res {
            Ok(event) => {
                for index_event in visible_events(&root, &event) {
                    let _ = sender.send(index_event);
                }
            }
            Err(e) => {
                let _ = sender.send(IndexEvent::WatchError(e.to_string()));
            }
        })
        .map_err(|source| IndexError::Watch {
            path: self.root.clone(),
            source,
        })?;

        watcher
            .watch(&self.root, RecursiveMode::Recursive)
            .map_err(|source| IndexError::Watch {
                path: self.root.clone(),
                source,
            })?;
        self.watcher = Some(watcher);
        Ok(())
    }

    pub fn restart(&mut self) -> Result<(), IndexError> {
        self.stop();
        self.open()?;
        info!("Restarted watcher on {}", self.root.display());
        Ok(())
    }

    pub fn stop(&mut self) {
        self.watcher.take();
    }

    pub fn is_running(&self) -> bool {
        self.watcher.is_some()
    }
}

/// The single writer of the index: consumes [`IndexEvent`]s and rebuilds.
pub struct IndexUpdater {
    index: ImageIndex,
    events: mpsc::UnboundedReceiver<IndexEvent>,
    watcher: Option<DirectoryWatcher>,
}

impl IndexUpdater {
    pub fn new(index: ImageIndex, events: mpsc::UnboundedReceiver<IndexEvent>) -> Self {
        Self {
            index,
            events,
            watcher: None,
        }
    }

    pub fn with_watcher(mut self, watcher: DirectoryWatcher) -> Self {
        self.watcher = Some(watcher);
        self
    }

    /// Waits for the next event, drains whatever else is queued, and rebuilds
    /// once. Returns `false` when the event channel is closed.
    pub async fn process_next(&mut self) -> bool {
        let first = match self.events.recv().await {
            Some(event) => event,
            None => return false,
        };
        let mut batch = vec![first];
        while let Ok(event) = self.events.try_recv() {
            batch.push(event);
        }

        let mut rescan = false;
        let mut restart = false;
        for event in batch {
            match event {
                IndexEvent::Added(path) => {
                    info!("File {} added", path.display());
                    rescan = true;
                }
                IndexEvent::Removed(path) => {
                    info!("File {} removed", path.display());
                    rescan = true;
                }
                IndexEvent::WatchError(message) => {
                    warn!("Filesystem watch error: {}", message);
                    restart = true;
                }
                IndexEvent::RestartWatch => restart = true,
            }
        }

        if restart {
            self.restart_watcher();
            // changes made while the handle was closed were not reported
            rescan = true;
        }
        if rescan {
            if let Err(e) = self.index.rebuild().await {
                error!("Error updating image list: {}", e);
            }
        }
        true
    }

    fn restart_watcher(&mut self) {
        if let Some(watcher) = self.watcher.as_mut() {
            if let Err(e) = watcher.restart() {
                error!("Failed to restart watcher: {}", e);
            }
        }
    }

    pub async fn run(mut self, mut shutdown: oneshot::Receiver<()>) {
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                more = self.process_next() => {
                    if !more {
                        break;
                    }
                }
            }
        }
        if let Some(watcher) = self.watcher.as_mut() {
            watcher.stop();
        }
        info!("Stopped watching {}", self.index.root().display());
    }
}

/// Index plus watcher plus update task, with an explicit start/shutdown lifecycle.
pub struct IndexService {
    index: ImageIndex,
    sender: mpsc::UnboundedSender<IndexEvent>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl IndexService {
    /// Opens the index, starts watching, and completes the initial build
    /// before returning.
    pub async fn start(root: impl AsRef<Path>) -> Result<Self, IndexError> {
        let index = ImageIndex::open(root)?;
        let (sender, events) = mpsc::unbounded_channel();

        info!("Watching for changes to {}", index.root().display());
        let watcher = DirectoryWatcher::start(index.root(), sender.clone())?;

        info!("Building list of images");
        index.rebuild().await?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let updater = IndexUpdater::new(index.clone(), events).with_watcher(watcher);
        let task = tokio::spawn(updater.run(shutdown_rx));

        Ok(Self {
            index,
            sender,
            shutdown: Some(shutdown_tx),
            task: Some(task),
        })
    }

    pub fn index(&self) -> ImageIndex {
        self.index.clone()
    }

    /// Closes and recreates the notify handle.
    pub fn restart_watcher(&self) {
        let _ = self.sender.send(IndexEvent::RestartWatch);
    }

    pub async fn shutdown(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!("Index update task failed: {}", e);
            }
        }
    }
}
