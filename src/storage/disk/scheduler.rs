use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicU8, Ordering},
        mpsc::{self, Receiver, Sender},
        Arc,
    },
    task::{Context, Poll, Wake, Waker},
    thread::{self, JoinHandle, Thread},
};

use anyhow::Context as _;
use parking_lot::Mutex;
use tracing::{debug, error};

use super::manager::DiskManager;
use crate::{error::DiskError, storage::page::page::PageId};

// Enum representing different states of the I/O operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IoStatus {
    Pending = 0,    // Operation is still in progress
    Success = 1,    // Operation completed successfully
    WriteError = 2, // Write operation failed
    ReadError = 3,  // Read operation failed
    Disconnected = 4, // Never reached the worker, or the worker died with it
}

impl IoStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => IoStatus::Success,
            2 => IoStatus::WriteError,
            3 => IoStatus::ReadError,
            4 => IoStatus::Disconnected,
            _ => IoStatus::Pending,
        }
    }
}

/// Completion handle of one disk request.
///
/// Can be `.await`ed from async code or blocked on with [`IoFuture::wait`].
pub struct IoFuture {
    flag: Arc<AtomicU8>,
    waker: Arc<Mutex<Option<Waker>>>,
}

impl IoFuture {
    fn new() -> Self {
        IoFuture {
            flag: Arc::new(AtomicU8::new(IoStatus::Pending as u8)),
            waker: Arc::new(Mutex::new(None)),
        }
    }

    fn outcome(&self) -> Option<Result<(), DiskError>> {
        match IoStatus::from_u8(self.flag.load(Ordering::Acquire)) {
            IoStatus::Pending => None,
            IoStatus::Success => Some(Ok(())),
            IoStatus::WriteError => Some(Err(DiskError::WriteFailed)),
            IoStatus::ReadError => Some(Err(DiskError::ReadFailed)),
            IoStatus::Disconnected => Some(Err(DiskError::Disconnected)),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.outcome().is_some()
    }

    /// Parks the calling thread until the worker has run the request.
    pub fn wait(mut self) -> Result<(), DiskError> {
        let waker = Waker::from(Arc::new(ThreadWaker(thread::current())));
        let mut cx = Context::from_waker(&waker);

        loop {
            match Pin::new(&mut self).poll(&mut cx) {
                Poll::Ready(result) => return result,
                Poll::Pending => thread::park(),
            }
        }
    }
}

impl Future for IoFuture {
    type Output = Result<(), DiskError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(result) = self.outcome() {
            return Poll::Ready(result);
        }

        *self.waker.lock() = Some(cx.waker().clone());

        // The worker may have finished between the first check and storing the waker
        match self.outcome() {
            Some(result) => Poll::Ready(result),
            None => Poll::Pending,
        }
    }
}

struct ThreadWaker(Thread);

impl Wake for ThreadWaker {
    fn wake(self: Arc<Self>) {
        self.0.unpark();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.0.unpark();
    }
}

pub enum DiskData {
    Write(Box<[u8]>),
    // Filled by the worker, the issuer keeps the other handle
    Read(Arc<Mutex<Box<[u8]>>>),
    Deallocate,
}

// Struct representing a request to perform disk I/O.
pub struct DiskRequest {
    pub data: DiskData,

    // ID of the page being read from / written to disk.
    pub page_id: PageId,

    // Signals the request issuer when the request has been completed.
    done_flag: Arc<AtomicU8>,
    waker: Arc<Mutex<Option<Waker>>>,
}

impl DiskRequest {
    pub fn new(data: DiskData, page_id: PageId, future: &IoFuture) -> Self {
        DiskRequest {
            data,
            page_id,
            done_flag: Arc::clone(&future.flag),
            waker: Arc::clone(&future.waker),
        }
    }

    fn complete(self, status: IoStatus) {
        self.finish(status);
    }

    fn finish(&self, status: IoStatus) {
        self.done_flag.store(status as u8, Ordering::Release);
        if let Some(waker) = self.waker.lock().take() {
            waker.wake();
        }
    }
}

impl Drop for DiskRequest {
    fn drop(&mut self) {
        // Dropped without being run, e.g. still queued when the worker died
        if IoStatus::from_u8(self.done_flag.load(Ordering::Acquire)) == IoStatus::Pending {
            self.finish(IoStatus::Disconnected);
        }
    }
}

/// Runs disk requests on a single background worker, strictly in the order
/// they were scheduled.
pub struct DiskScheduler {
    sender: Option<Sender<DiskRequest>>,
    worker: Option<JoinHandle<()>>,
}

impl DiskScheduler {
    pub fn new(manager: Box<dyn DiskManager>) -> anyhow::Result<Self> {
        let (tx, rx) = mpsc::channel();

        let worker = thread::Builder::new()
            .name("disk-scheduler".into())
            .spawn(move || Self::run_worker(manager, rx))
            .context("failed to spawn disk scheduler worker")?;

        Ok(DiskScheduler {
            sender: Some(tx),
            worker: Some(worker),
        })
    }

    fn run_worker(mut manager: Box<dyn DiskManager>, rx: Receiver<DiskRequest>) {
        // Ends once every sender is gone and the queue is drained
        while let Ok(request) = rx.recv() {
            let page_id = request.page_id;
            // Any failure is reported through the request, the worker keeps going
            let status = match &request.data {
                DiskData::Write(data) => match manager.write_page(page_id, data) {
                    Ok(()) => IoStatus::Success,
                    Err(err) => {
                        error!(page_id, error = %err, "disk write failed");
                        IoStatus::WriteError
                    }
                },
                DiskData::Read(buffer) => {
                    let mut buffer = buffer.lock();
                    match manager.read_page(page_id, &mut buffer) {
                        Ok(()) => IoStatus::Success,
                        Err(err) => {
                            error!(page_id, error = %err, "disk read failed");
                            IoStatus::ReadError
                        }
                    }
                }
                DiskData::Deallocate => match manager.deallocate_page(page_id) {
                    Ok(()) => IoStatus::Success,
                    Err(err) => {
                        error!(page_id, error = %err, "page deallocation failed");
                        IoStatus::WriteError
                    }
                },
            };

            request.complete(status);
        }

        debug!("disk scheduler worker stopped");
    }

    pub fn create_future(&self) -> IoFuture {
        IoFuture::new()
    }

    /// Queues a request behind everything scheduled before it.
    pub fn schedule(&self, request: DiskRequest) {
        let Some(tx) = &self.sender else {
            request.complete(IoStatus::Disconnected);
            return;
        };

        if let Err(mpsc::SendError(request)) = tx.send(request) {
            error!(page_id = request.page_id, "disk scheduler worker is gone");
            request.complete(IoStatus::Disconnected);
        }
    }

    pub fn schedule_write(&self, page_id: PageId, data: Box<[u8]>) -> IoFuture {
        let future = self.create_future();
        self.schedule(DiskRequest::new(DiskData::Write(data), page_id, &future));
        future
    }

    pub fn schedule_read(&self, page_id: PageId, buffer: Arc<Mutex<Box<[u8]>>>) -> IoFuture {
        let future = self.create_future();
        self.schedule(DiskRequest::new(DiskData::Read(buffer), page_id, &future));
        future
    }

    pub fn schedule_deallocate(&self, page_id: PageId) -> IoFuture {
        let future = self.create_future();
        self.schedule(DiskRequest::new(DiskData::Deallocate, page_id, &future));
        future
    }
}

impl Drop for DiskScheduler {
    fn drop(&mut self) {
        // Closing the channel lets the worker finish what is queued
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("disk scheduler worker panicked");
            }
        }
    }
}
