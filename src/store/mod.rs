//! Embedded SQLite store with one logical writer and a pool of concurrent
//! readers. All mutation funnels through a dedicated writer thread owning the
//! read-write connection; reads run on read-only connections over WAL.

mod schema;

use std::path::Path;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::thread::{self, JoinHandle, available_parallelism};

use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags};

use crate::errors::{DbError, Result};

const WRITE_CHANNEL_BOUND: usize = 1024;
const READ_CHANNEL_BOUND: usize = 4096;
const MIN_READ_THREADS: usize = 1;
const MAX_READ_THREADS: usize = 8;

type WriteJob = Box<dyn FnOnce(&mut Connection) + Send>;
type ReadJob = Box<dyn FnOnce(&Connection) + Send>;

enum WriteRequest {
    Run(WriteJob),
    Shutdown,
}

enum ReadRequest {
    Run(ReadJob),
    Shutdown,
}

#[derive(Debug, Clone, Default)]
pub struct StoreOptions {
    /// Reader thread count; defaults to available parallelism, clamped.
    pub read_threads: Option<usize>,
}

/// Handle to the store. Cheap to share behind an `Arc`; dropping the last
/// handle shuts the worker threads down.
pub struct SqliteStore {
    write_tx: SyncSender<WriteRequest>,
    read_tx: SyncSender<ReadRequest>,
    writer: Mutex<Option<JoinHandle<()>>>,
    readers: Mutex<Vec<JoinHandle<()>>>,
}

impl SqliteStore {
    /// Opens (creating if absent) the database at `path`, applies pragmas,
    /// bootstraps the schema, and spawns the writer thread and read pool.
    ///
    /// # Errors
    /// Any open, pragma, or schema failure here is fatal to startup.
    pub fn open(path: &Path, options: &StoreOptions) -> Result<Self> {
        let conn = Connection::open(path)?;
        schema::apply_pragmas(&conn)?;
        schema::register_regexp(&conn)?;
        schema::initialize(&conn)?;

        let (write_tx, write_rx) = mpsc::sync_channel(WRITE_CHANNEL_BOUND);
        let writer = thread::Builder::new()
            .name("fluxbase-writer".to_string())
            .spawn(move || run_writer(conn, write_rx))?;

        let count = options
            .read_threads
            .unwrap_or_else(|| available_parallelism().map_or(MIN_READ_THREADS, usize::from))
            .clamp(MIN_READ_THREADS, MAX_READ_THREADS);
        let (read_tx, read_rx) = mpsc::sync_channel(READ_CHANNEL_BOUND);
        let read_rx = Arc::new(Mutex::new(read_rx));
        let mut readers = Vec::with_capacity(count);
        for i in 0..count {
            // the writer connection above has created the file by now
            let conn = open_read_only(path)?;
            let rx = Arc::clone(&read_rx);
            let handle = thread::Builder::new()
                .name(format!("fluxbase-reader-{i}"))
                .spawn(move || run_reader(conn, rx))?;
            readers.push(handle);
        }
        log::info!("store opened at {} with {count} reader threads", path.display());
        Ok(Self {
            write_tx,
            read_tx,
            writer: Mutex::new(Some(writer)),
            readers: Mutex::new(readers),
        })
    }

    /// Runs `job` against a pooled read-only connection.
    ///
    /// # Errors
    /// `StoreClosed` after shutdown, otherwise whatever `job` returns.
    pub fn read<T, F>(&self, job: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let boxed: ReadJob = Box::new(move |conn| {
            let _ = tx.send(job(conn));
        });
        self.read_tx.send(ReadRequest::Run(boxed)).map_err(|_| DbError::StoreClosed)?;
        rx.recv().map_err(|_| DbError::StoreClosed)?
    }

    /// Runs `job` on the writer thread. Each job is one atomic unit with
    /// respect to other writes; there is no implicit transaction across jobs.
    ///
    /// # Errors
    /// `StoreClosed` after shutdown, otherwise whatever `job` returns.
    pub fn write<T, F>(&self, job: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let boxed: WriteJob = Box::new(move |conn| {
            let _ = tx.send(job(conn));
        });
        self.write_tx.send(WriteRequest::Run(boxed)).map_err(|_| DbError::StoreClosed)?;
        rx.recv().map_err(|_| DbError::StoreClosed)?
    }

    /// Like [`write`](Self::write), but wraps `job` in an explicit
    /// transaction: commit on `Ok`, rollback on `Err`.
    ///
    /// # Errors
    /// `StoreClosed` after shutdown, otherwise whatever `job` returns.
    pub fn transaction<T, F>(&self, job: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&rusqlite::Transaction<'_>) -> Result<T> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let boxed: WriteJob = Box::new(move |conn| {
            let _ = tx.send(run_in_transaction(conn, job));
        });
        self.write_tx.send(WriteRequest::Run(boxed)).map_err(|_| DbError::StoreClosed)?;
        rx.recv().map_err(|_| DbError::StoreClosed)?
    }

    /// Drains pending work and joins the worker threads. Safe to call twice.
    pub fn close(&self) {
        let _ = self.write_tx.send(WriteRequest::Shutdown);
        let mut readers = self.readers.lock();
        for _ in 0..readers.len() {
            let _ = self.read_tx.send(ReadRequest::Shutdown);
        }
        if let Some(handle) = self.writer.lock().take() {
            let _ = handle.join();
        }
        for handle in readers.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for SqliteStore {
    fn drop(&mut self) {
        self.close();
    }
}

fn open_read_only(path: &Path) -> Result<Connection> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    conn.execute_batch("PRAGMA busy_timeout = 5000")?;
    schema::register_regexp(&conn)?;
    Ok(conn)
}

fn run_writer(mut conn: Connection, requests: Receiver<WriteRequest>) {
    while let Ok(request) = requests.recv() {
        match request {
            WriteRequest::Run(job) => job(&mut conn),
            WriteRequest::Shutdown => break,
        }
    }
}

fn run_reader(conn: Connection, requests: Arc<Mutex<Receiver<ReadRequest>>>) {
    loop {
        // readers compete for work; the lock covers only the recv
        let request = {
            let rx = requests.lock();
            rx.recv()
        };
        match request {
            Ok(ReadRequest::Run(job)) => job(&conn),
            Ok(ReadRequest::Shutdown) | Err(_) => break,
        }
    }
}

fn run_in_transaction<T, F>(conn: &mut Connection, job: F) -> Result<T>
where
    F: FnOnce(&rusqlite::Transaction<'_>) -> Result<T>,
{
    let tx = conn.transaction()?;
    let value = job(&tx)?;
    tx.commit()?;
    Ok(value)
}
