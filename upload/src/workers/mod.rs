//! §4.7/§4.8: one worker loop per queue, respecting its per-stage concurrency cap,
//! driving the eleven stage handlers. `main.rs` spawns one [`spawn_worker`] call per
//! queue; each loop polls, claims, runs its handler, and reports completion/failure
//! back to the fabric so retry/backoff (§4.7) and the planner's cross-node
//! singleton lock (via `claim`'s atomic semantics) stay entirely inside
//! [`crate::queue`].

pub mod cleanup_warm;
pub mod finalize_multipart;
pub mod new_data_item;
pub mod optical_post;
pub mod planner;
pub mod poster;
pub mod preparer;
pub mod put_offsets;
pub mod seeder;
pub mod unbundle_nested;
pub mod verifier;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use log::{error, warn};

use crate::deps::Deps;
use crate::queue::{Job, JobQueue, QueueName};

const EMPTY_QUEUE_POLL_INTERVAL: Duration = Duration::from_millis(500);
const AT_CAPACITY_POLL_INTERVAL: Duration = Duration::from_millis(250);

pub fn spawn_worker<F, Fut>(deps: Arc<Deps>, queue: QueueName, handler: F) -> tokio::task::JoinHandle<()>
where
    F: Fn(Arc<Deps>, Job) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            match deps.job_queue.running_count(queue).await {
                Ok(running) if running >= queue.concurrency_cap() => {
                    tokio::time::sleep(AT_CAPACITY_POLL_INTERVAL).await;
                    continue;
                }
                Ok(_) => {}
                Err(err) => {
                    error!("{queue} running_count failed: {err}");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            }

            let job = match deps.job_queue.claim(queue).await {
                Ok(Some(job)) => job,
                Ok(None) => {
                    tokio::time::sleep(EMPTY_QUEUE_POLL_INTERVAL).await;
                    continue;
                }
                Err(err) => {
                    error!("{queue} claim failed: {err}");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };

            let job_id = job.id;
            match handler(deps.clone(), job).await {
                Ok(()) => {
                    if let Err(err) = deps.job_queue.complete(job_id).await {
                        error!("{queue} complete({job_id}) failed: {err}");
                    }
                }
                Err(err) => {
                    warn!("{queue} job {job_id} failed: {err:#}");
                    if let Err(err) = deps.job_queue.fail(job_id, &err.to_string()).await {
                        error!("{queue} fail({job_id}) failed: {err}");
                    }
                }
            }
        }
    })
}

/// Spawns the full set of eleven stage workers, plus the planner's own ~5 min
/// scheduling tick and cleanup-warm's daily tick (§4.8), onto the given deps.
pub fn spawn_all(deps: Arc<Deps>) -> Vec<tokio::task::JoinHandle<()>> {
    vec![
        spawn_worker(deps.clone(), QueueName::NewDataItem, |d, j| async move { new_data_item::handle(&d, &j).await }),
        spawn_worker(deps.clone(), QueueName::Preparer, |d, j| async move { preparer::handle(&d, &j).await }),
        spawn_worker(deps.clone(), QueueName::Poster, |d, j| async move { poster::handle(&d, &j).await }),
        spawn_worker(deps.clone(), QueueName::Seeder, |d, j| async move { seeder::handle(&d, &j).await }),
        spawn_worker(deps.clone(), QueueName::Verifier, |d, j| async move { verifier::handle(&d, &j).await }),
        spawn_worker(deps.clone(), QueueName::PutOffsets, |d, j| async move { put_offsets::handle(&d, &j).await }),
        spawn_worker(deps.clone(), QueueName::OpticalPost, |d, j| async move { optical_post::handle(&d, &j).await }),
        spawn_worker(deps.clone(), QueueName::UnbundleNested, |d, j| async move { unbundle_nested::handle(&d, &j).await }),
        spawn_worker(deps.clone(), QueueName::FinalizeMultipart, |d, j| async move { finalize_multipart::handle(&d, &j).await }),
        spawn_worker(deps.clone(), QueueName::CleanupWarm, |d, j| async move { cleanup_warm::handle(&d, &j).await }),
        planner::spawn_scheduler(deps.clone()),
        cleanup_warm::spawn_scheduler(deps),
    ]
}

/// Reads `content_id` (base64url) out of a job payload, the shape every ingestion
/// fan-out job (`newDataItem`, `opticalPost`, `unbundleNested`) shares.
pub(crate) fn content_id_from_payload(job: &Job) -> anyhow::Result<gateway_common::ContentId> {
    let raw = job.payload.get("content_id").and_then(|v| v.as_str()).ok_or_else(|| anyhow::anyhow!("job payload missing content_id"))?;
    raw.parse().map_err(|e: &str| anyhow::anyhow!("malformed content_id in job payload: {e}"))
}

/// Reads `plan_id` (uuid) out of a job payload, the shape `prepare`/`post`/`seed`/
/// `verify` jobs share.
pub(crate) fn plan_id_from_payload(job: &Job) -> anyhow::Result<uuid::Uuid> {
    let raw = job.payload.get("plan_id").and_then(|v| v.as_str()).ok_or_else(|| anyhow::anyhow!("job payload missing plan_id"))?;
    raw.parse().map_err(|e| anyhow::anyhow!("malformed plan_id in job payload: {e}"))
}

/// Reads `session_id` (uuid) out of a `finalize-multipart` job payload.
pub(crate) fn session_id_from_payload(job: &Job) -> anyhow::Result<uuid::Uuid> {
    let raw = job.payload.get("session_id").and_then(|v| v.as_str()).ok_or_else(|| anyhow::anyhow!("job payload missing session_id"))?;
    raw.parse().map_err(|e| anyhow::anyhow!("malformed session_id in job payload: {e}"))
}
