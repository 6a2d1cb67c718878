//! # Session
//!
//! A session is one execution of a binary. It owns a timestamped directory under
//! `<CORRIDOR_SW_ROOT>/<sessions_dir>`, holding the log file, CSV archives in `arch/`, and any
//! JSON data handed to [`save`] or [`Session::save`]. Serialisation and file writes happen on a
//! background thread so the control loop never blocks on the disk.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::{
    ffi::OsString,
    fs::{self, File},
    path::{Path, PathBuf},
    sync::{
        mpsc::{self, Receiver, RecvTimeoutError, Sender},
        Mutex,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use chrono::{DateTime, Utc};
use conquer_once::OnceCell;
use erased_serde::Serialize;
use log::{debug, info, warn};
use thiserror::Error;

use crate::time;

// ---------------------------------------------------------------------------
// STATICS AND CONSTANTS
// ---------------------------------------------------------------------------

static EPOCH: OnceCell<DateTime<Utc>> = OnceCell::uninit();

/// Sender used by the free [`save`] functions, installed by [`Session::new`].
static GLOBAL_SAVER: OnceCell<Mutex<Sender<SaveMsg>>> = OnceCell::uninit();

/// Timestamp format used in session directory and file names (strftime syntax).
const STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

const SAVER_POLL: Duration = Duration::from_millis(50);

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// The running session.
pub struct Session {
    /// Directory holding everything this session writes
    pub session_root: PathBuf,

    /// Directory for CSV archives
    pub arch_root: PathBuf,

    pub log_file_path: PathBuf,

    /// Time at which the session was created
    pub epoch: DateTime<Utc>,

    saver: Sender<SaveMsg>,
    saver_handle: Option<JoinHandle<()>>,
}

type SaveData = Box<dyn Serialize + Send>;

enum SaveMsg {
    Write { rel_path: PathBuf, data: SaveData },
    Shutdown,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("CORRIDOR_SW_ROOT is not set, cannot locate the sessions directory")]
    SwRootNotSet,

    #[error("Failed to create session directory {0:?}: {1}")]
    CreateDir(PathBuf, std::io::Error),

    #[error("A session has already been started in this process ({0})")]
    AlreadyStarted(conquer_once::TryInitError),

    #[error("Failed to spawn the save thread: {0}")]
    SpawnSaver(std::io::Error),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Session {
    /// Create the session directory `<sessions_dir>/<exec_name>_<timestamp>` and start the save
    /// thread. Only one session may exist per process.
    pub fn new(exec_name: &str, sessions_dir: &str) -> Result<Self, SessionError> {
        let epoch = Utc::now();
        EPOCH
            .try_init_once(|| epoch)
            .map_err(SessionError::AlreadyStarted)?;

        let session_root = crate::host::get_sw_root()
            .map_err(|_| SessionError::SwRootNotSet)?
            .join(sessions_dir)
            .join(format!("{}_{}", exec_name, epoch.format(STAMP_FORMAT)));
        let arch_root = session_root.join("arch");

        for dir in [&session_root, &arch_root] {
            fs::create_dir_all(dir).map_err(|e| SessionError::CreateDir(dir.clone(), e))?;
        }

        let (saver, inbox) = mpsc::channel();
        if GLOBAL_SAVER
            .try_init_once(|| Mutex::new(saver.clone()))
            .is_err()
        {
            warn!("Global save channel already installed");
        }

        let thread_root = session_root.clone();
        let saver_handle = thread::Builder::new()
            .name("session_saver".into())
            .spawn(move || run_saver(thread_root, inbox))
            .map_err(SessionError::SpawnSaver)?;

        Ok(Session {
            log_file_path: session_root.join(format!("{}.log", exec_name)),
            session_root,
            arch_root,
            epoch,
            saver,
            saver_handle: Some(saver_handle),
        })
    }

    /// Queue `data` to be written as JSON at `rel_path` inside the session directory.
    pub fn save<P: AsRef<Path>, T: Serialize + Send + 'static>(&self, rel_path: P, data: T) {
        send(&self.saver, rel_path.as_ref(), Box::new(data));
    }

    /// Finish the session, blocking until every queued save has been written.
    pub fn exit(mut self) {
        info!("Flushing pending saves");

        if self.saver.send(SaveMsg::Shutdown).is_err() {
            warn!("Save thread had already stopped");
        }

        match self.saver_handle.take().map(JoinHandle::join) {
            Some(Err(_)) => warn!("Save thread panicked"),
            _ => info!("Session closed"),
        }
    }
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Seconds since the session epoch, `NaN` before a session exists.
pub fn get_elapsed_seconds() -> f64 {
    get_epoch()
        .and_then(|e| time::duration_to_seconds(Utc::now() - *e))
        .unwrap_or(f64::NAN)
}

pub fn get_epoch() -> Option<&'static DateTime<Utc>> {
    EPOCH.get()
}

/// Queue `data` to be written inside the current session directory.
///
/// Does nothing but warn if no session has been created.
pub fn save<P: AsRef<Path>, T: Serialize + Send + 'static>(rel_path: P, data: T) {
    let rel_path = rel_path.as_ref();

    match GLOBAL_SAVER.get().map(Mutex::lock) {
        Some(Ok(saver)) => send(&saver, rel_path, Box::new(data)),
        Some(Err(_)) => warn!("Save channel lock poisoned, dropping {:?}", rel_path),
        None => warn!("No session, dropping {:?}", rel_path),
    }
}

/// As [`save`], with the current time inserted between the file stem and extension, e.g.
/// `summary.json` becomes `summary_20201020_121314.json`.
pub fn save_with_timestamp<P: AsRef<Path>, T: Serialize + Send + 'static>(rel_path: P, data: T) {
    save(stamped(rel_path.as_ref(), &Utc::now()), data);
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

fn send(saver: &Sender<SaveMsg>, rel_path: &Path, data: SaveData) {
    let msg = SaveMsg::Write {
        rel_path: rel_path.to_path_buf(),
        data,
    };

    if let Err(e) = saver.send(msg) {
        warn!("Save thread unavailable, dropping {:?}: {}", rel_path, e);
    }
}

fn stamped(path: &Path, now: &DateTime<Utc>) -> PathBuf {
    let mut name: OsString = path.file_stem().unwrap_or_default().to_os_string();
    name.push(format!("_{}", now.format(STAMP_FORMAT)));

    if let Some(ext) = path.extension() {
        name.push(".");
        name.push(ext);
    }

    path.with_file_name(name)
}

fn run_saver(root: PathBuf, inbox: Receiver<SaveMsg>) {
    loop {
        match inbox.recv_timeout(SAVER_POLL) {
            Ok(SaveMsg::Write { rel_path, data }) => {
                let path = root.join(rel_path);
                match path.extension().and_then(|e| e.to_str()) {
                    Some("json") => write_json(&path, &data),
                    other => warn!("Cannot save {:?}, unsupported extension {:?}", path, other),
                }
            }
            Err(RecvTimeoutError::Timeout) => (),
            Ok(SaveMsg::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

fn write_json(path: &Path, data: &SaveData) {
    if let Some(parent) = path.parent() {
        if let Err(e) = fs::create_dir_all(parent) {
            warn!("Cannot create {:?}: {}", parent, e);
            return;
        }
    }

    let result = File::create(path)
        .map_err(|e| e.to_string())
        .and_then(|f| serde_json::to_writer_pretty(f, data).map_err(|e| e.to_string()));

    match result {
        Ok(()) => debug!("Saved {:?}", path),
        Err(e) => warn!("Failed to save {:?}: {}", path, e),
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_stamped() {
        let now = Utc.with_ymd_and_hms(2020, 10, 20, 12, 13, 14).unwrap();

        assert_eq!(
            stamped(Path::new("run_summary.json"), &now),
            PathBuf::from("run_summary_20201020_121314.json")
        );
        assert_eq!(
            stamped(Path::new("debug/plan"), &now),
            PathBuf::from("debug/plan_20201020_121314")
        );
    }
}
