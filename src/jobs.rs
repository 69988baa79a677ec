//! Job queue (C11): the core never schedules work directly, it enqueues an
//! opaque descriptor onto an external queue (spec §6 "Job queue"). Only the
//! VTXO inventory monitor uses this interface. Production deployments swap
//! in a real queue behind the same trait; here we ship an in-process stub
//! backed by an unbounded channel, the way the teacher wires a stub adapter
//! behind a trait for anything it doesn't own end-to-end.

use serde_json::Value;
use tokio::sync::mpsc;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct JobDescriptor {
    pub function_name: String,
    pub args: Value,
    pub timeout_secs: u64,
    pub result_ttl_secs: u64,
}

pub trait JobQueue: Send + Sync {
    fn enqueue(&self, job: JobDescriptor);
}

/// In-memory stand-in for the external job queue. Jobs are logged and
/// dropped; nothing in this core ever blocks waiting on a job result.
pub struct InProcessJobQueue {
    sender: mpsc::UnboundedSender<JobDescriptor>,
}

impl InProcessJobQueue {
    /// Returns the queue handle plus the receiver half, so callers can spin
    /// up a worker loop (or in tests, just drain and assert).
    pub fn new() -> (Self, mpsc::UnboundedReceiver<JobDescriptor>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl JobQueue for InProcessJobQueue {
    fn enqueue(&self, job: JobDescriptor) {
        tracing::info!(function = %job.function_name, "enqueuing job");
        if self.sender.send(job).is_err() {
            tracing::warn!("job queue receiver dropped; job discarded");
        }
    }
}

/// Spawns a stub worker that just logs every job it receives.
pub fn spawn_stub_worker(mut receiver: mpsc::UnboundedReceiver<JobDescriptor>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(job) = receiver.recv().await {
            tracing::debug!(function = %job.function_name, args = ?job.args, "stub job worker received job");
        }
    })
}
