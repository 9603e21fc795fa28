//! §4.8 "put-offsets": receives batched offset records already computed by
//! `preparer` and upserts them into the offset index. Deterministic and
//! retry-safe — a re-claim after a crash re-applies the same batch harmlessly.

use crate::deps::Deps;
use crate::offset_index::OffsetRecord;
use crate::queue::Job;

pub async fn handle(deps: &Deps, job: &Job) -> anyhow::Result<()> {
    let records: Vec<OffsetRecord> = job
        .payload
        .get("records")
        .ok_or_else(|| anyhow::anyhow!("job payload missing records"))?
        .clone()
        .into_iter()
        .map(serde_json::from_value)
        .collect::<Result<_, _>>()?;
    deps.offset_index_store.upsert_batch(records).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use gateway_common::ContentId;
    use uuid::Uuid;

    use super::*;
    use crate::deps::test_support::fake_deps;
    use crate::offset_index::OffsetIndexStore;
    use crate::queue::{JobStatus, QueueName};

    fn record(id: u8) -> OffsetRecord {
        OffsetRecord {
            item_id: ContentId::new([id; 32]),
            root_bundle_id: Uuid::new_v4().to_string(),
            start_offset_in_bundle: 32,
            raw_length: 100,
            payload_content_type: Some("text/plain".into()),
            payload_data_start: 64,
            parent_data_item_id: None,
            created_at: Utc::now(),
        }
    }

    fn job_for(records: &[OffsetRecord]) -> Job {
        Job {
            id: Uuid::new_v4(),
            queue: QueueName::PutOffsets,
            payload: serde_json::json!({ "records": records }),
            attempt: 0,
            status: JobStatus::Running,
            available_at: Utc::now(),
            created_at: Utc::now(),
            last_error: None,
        }
    }

    #[tokio::test]
    async fn upserts_a_batch_of_records() {
        let deps = fake_deps();
        let records = vec![record(1), record(2)];

        handle(&deps, &job_for(&records)).await.unwrap();

        assert!(deps.offset_index_store.get(records[0].item_id).await.unwrap().is_some());
        assert!(deps.offset_index_store.get(records[1].item_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn reapplying_the_same_batch_is_harmless() {
        let deps = fake_deps();
        let records = vec![record(3)];
        handle(&deps, &job_for(&records)).await.unwrap();
        handle(&deps, &job_for(&records)).await.unwrap();
        let fetched = deps.offset_index_store.get(records[0].item_id).await.unwrap().unwrap();
        assert_eq!(fetched.start_offset_in_bundle, records[0].start_offset_in_bundle);
    }
}
