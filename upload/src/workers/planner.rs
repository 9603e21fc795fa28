//! §4.8 "planner (singleton, scheduled every ~5 min)". Runs as an ordinary job on
//! the `Planner` queue (concurrency cap 1, §4.7), which is what makes it a de facto
//! global singleton: the fabric's atomic `claim` means only one node's worker ever
//! holds the in-progress planning job at a time, with no separate leader election.

use std::sync::Arc;
use std::time::Duration;

use gateway_common::config::{BUNDLE_OVERDUE_BLOCKS, PLAN_MAX_BYTES, PLAN_MAX_ITEMS};

use crate::bundle_plan::BundlePlan;
use crate::deps::Deps;
use crate::items::DataItem;
use crate::queue::{Job, QueueName};

const SCHEDULE_INTERVAL: Duration = Duration::from_secs(5 * 60);
const DEFAULT_APP_NAME: &str = "bundling-gateway";

/// Ticks every ~5 min, enqueueing one planning cycle. Multiple nodes ticking
/// concurrently is harmless: the `Planner` queue's concurrency cap of 1 plus
/// `claim`'s atomic semantics mean at most one node is ever actually running a
/// cycle, and an idle tick that finds nothing eligible completes instantly.
pub fn spawn_scheduler(deps: Arc<Deps>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(SCHEDULE_INTERVAL).await;
            if let Err(err) = deps.job_queue.enqueue(QueueName::Planner, serde_json::json!({})).await {
                log::error!("failed to enqueue a planner cycle: {err}");
            }
        }
    })
}

pub async fn handle(deps: &Deps, _job: &Job) -> anyhow::Result<()> {
    let current_height = deps.chain_gateway.current_height().await?;
    let eligible = deps.item_store.eligible_for_planning(Some(current_height), BUNDLE_OVERDUE_BLOCKS).await?;
    if eligible.is_empty() {
        return Ok(());
    }

    for plan in group_first_fit_decreasing(eligible, &deps.premium_tags) {
        let item_ids: Vec<_> = plan.item_ids.clone();
        deps.item_store.mark_planned(&item_ids, plan.id).await?;
        deps.bundle_plan_store.insert_plan(plan.clone()).await?;
        deps.job_queue.enqueue(QueueName::Preparer, serde_json::json!({ "plan_id": plan.id.to_string() })).await?;
    }
    Ok(())
}

/// §4.8 "Grouping: first-fit-decreasing by item byte count, maximum plan size
/// 2 GiB, maximum 10 000 items per plan" plus "Segregation: items carrying one of
/// a configured set of premium tags become their own segregated plans".
fn group_first_fit_decreasing(mut items: Vec<DataItem>, premium_tags: &[String]) -> Vec<BundlePlan> {
    items.sort_by(|a, b| b.byte_count.cmp(&a.byte_count));

    struct Bin {
        app_name: String,
        premium_tag: Option<String>,
        item_ids: Vec<gateway_common::ContentId>,
        total_bytes: u64,
    }

    let mut bins: Vec<Bin> = Vec::new();
    for item in items {
        let segregation_key = item.premium_tag.clone().filter(|tag| premium_tags.contains(tag));

        let fit = bins.iter_mut().find(|bin| {
            bin.premium_tag == segregation_key
                && bin.item_ids.len() < PLAN_MAX_ITEMS
                && bin.total_bytes.saturating_add(item.byte_count) <= PLAN_MAX_BYTES
        });

        match fit {
            Some(bin) => {
                bin.item_ids.push(item.content_id);
                bin.total_bytes += item.byte_count;
            }
            None => {
                let app_name = segregation_key.clone().unwrap_or_else(|| DEFAULT_APP_NAME.to_string());
                bins.push(Bin { app_name, premium_tag: segregation_key, item_ids: vec![item.content_id], total_bytes: item.byte_count });
            }
        }
    }

    bins.into_iter()
        .map(|bin| BundlePlan::new(bin.item_ids, bin.total_bytes, bin.premium_tag, bin.app_name))
        .collect()
}

#[cfg(test)]
mod tests {
    use gateway_common::money::Credits;
    use gateway_common::tags::TagList;
    use gateway_common::ContentId;

    use super::*;

    fn item(id: u8, bytes: u64, premium_tag: Option<&str>) -> DataItem {
        DataItem::new(ContentId::new([id; 32]), "alice", bytes, Credits(1), &TagList::default(), 1_000, premium_tag.map(str::to_string))
    }

    #[test]
    fn splits_premium_tagged_items_into_their_own_plan() {
        let items = vec![item(1, 1_000, Some("premium-app")), item(2, 2_000, None)];
        let plans = group_first_fit_decreasing(items, &["premium-app".to_string()]);
        assert_eq!(plans.len(), 2);
        let premium_plan = plans.iter().find(|p| p.premium_tag.as_deref() == Some("premium-app")).unwrap();
        assert_eq!(premium_plan.item_ids.len(), 1);
    }

    #[test]
    fn respects_the_max_plan_byte_budget() {
        let items = vec![item(1, PLAN_MAX_BYTES - 100, None), item(2, 200, None)];
        let plans = group_first_fit_decreasing(items, &[]);
        assert_eq!(plans.len(), 2, "the second item must not be packed past the byte budget");
    }

    #[test]
    fn packs_items_without_a_premium_tag_into_one_plan() {
        let items = vec![item(1, 100, None), item(2, 200, None), item(3, 50, None)];
        let plans = group_first_fit_decreasing(items, &[]);
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].item_ids.len(), 3);
    }
}
