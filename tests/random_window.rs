mod common;

use std::collections::BTreeMap;

use chroma_faucet::entities::request::RequestStatus;
use common::{Harness, random_group, test_config, wallet_id};

fn closed_window_catalog() -> BTreeMap<String, chroma_faucet::config::AssetGroup> {
    BTreeMap::from([(
        "airdrop".to_string(),
        random_group("airdrop", "asset_b", 1, -7_200, -3_600),
    )])
}

#[tokio::test]
async fn lottery_promotes_up_to_future_balance() {
    let harness = Harness::new(test_config(closed_window_catalog())).await;
    for n in 1..=3 {
        harness
            .seed_request(&wallet_id(n), "airdrop", "asset_b", 1, RequestStatus::Waiting)
            .await;
    }
    harness.wallet.set_balance("asset_b", 2);

    harness.scheduler().tick().await;

    assert_eq!(harness.count_in_status(RequestStatus::Waiting).await, 0);
    assert_eq!(harness.count_in_status(RequestStatus::Pending).await, 2);
    assert_eq!(harness.count_in_status(RequestStatus::Unmet).await, 1);
}

#[tokio::test]
async fn sufficient_balance_promotes_everyone() {
    let harness = Harness::new(test_config(closed_window_catalog())).await;
    for n in 1..=3 {
        harness
            .seed_request(&wallet_id(n), "airdrop", "asset_b", 1, RequestStatus::Waiting)
            .await;
    }
    harness.wallet.set_balance("asset_b", 5);

    harness.scheduler().tick().await;

    assert_eq!(harness.count_in_status(RequestStatus::Pending).await, 3);
    assert_eq!(harness.count_in_status(RequestStatus::Unmet).await, 0);
}

#[tokio::test]
async fn zero_balance_marks_everyone_unmet() {
    let harness = Harness::new(test_config(closed_window_catalog())).await;
    for n in 1..=3 {
        harness
            .seed_request(&wallet_id(n), "airdrop", "asset_b", 1, RequestStatus::Waiting)
            .await;
    }

    harness.scheduler().tick().await;

    assert_eq!(harness.count_in_status(RequestStatus::Pending).await, 0);
    assert_eq!(harness.count_in_status(RequestStatus::Unmet).await, 3);
}

#[tokio::test]
async fn open_window_leaves_waiting_rows_untouched() {
    let assets = BTreeMap::from([(
        "airdrop".to_string(),
        random_group("airdrop", "asset_b", 1, -3_600, 3_600),
    )]);
    let harness = Harness::new(test_config(assets)).await;
    harness
        .seed_request(&wallet_id(1), "airdrop", "asset_b", 1, RequestStatus::Waiting)
        .await;
    harness.wallet.set_balance("asset_b", 10);

    harness.scheduler().tick().await;

    assert_eq!(harness.count_in_status(RequestStatus::Waiting).await, 1);
    assert_eq!(harness.count_in_status(RequestStatus::Pending).await, 0);
}

#[tokio::test]
async fn promoted_winners_flow_into_the_next_batch() {
    let mut config = test_config(closed_window_catalog());
    config.scheduler.min_requests = 2;
    let harness = Harness::new(config).await;
    for n in 1..=2 {
        harness
            .seed_request(&wallet_id(n), "airdrop", "asset_b", 1, RequestStatus::Waiting)
            .await;
    }
    harness.wallet.set_balance("asset_b", 2);

    // resolution runs before batching within the same pass
    harness.scheduler().tick().await;

    assert_eq!(harness.wallet.send_count(), 1);
    assert_eq!(harness.count_in_status(RequestStatus::Served).await, 2);
}
