mod common;

use std::collections::BTreeMap;

use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};

use chroma_faucet::eligibility::{AdmissionError, DenialReason, NEW_REQUEST_GRACE_SECS};
use chroma_faucet::entities::request::{self, RequestStatus};
use chroma_faucet::store;
use common::{Harness, random_group, standard_group, test_config, wallet_id};

fn one_standard_group() -> BTreeMap<String, chroma_faucet::config::AssetGroup> {
    BTreeMap::from([(
        "group_1".to_string(),
        standard_group("first group", "asset_a", 100),
    )])
}

#[tokio::test]
async fn standard_admission_queues_pending() {
    let harness = Harness::new(test_config(one_standard_group())).await;
    let admitted = harness
        .admit(&wallet_id(1), "group_1")
        .await
        .expect("admission");

    assert_eq!(admitted.group, "group_1");
    assert_eq!(admitted.asset.asset_id, "asset_a");
    assert_eq!(admitted.asset.amount, 100);
    assert_eq!(admitted.status, RequestStatus::Pending);
    assert_eq!(harness.count_in_status(RequestStatus::Pending).await, 1);
}

#[tokio::test]
async fn second_request_for_same_group_is_denied() {
    let harness = Harness::new(test_config(one_standard_group())).await;
    harness
        .admit(&wallet_id(1), "group_1")
        .await
        .expect("first admission");

    let denied = harness.admit(&wallet_id(1), "group_1").await.unwrap_err();
    match denied {
        AdmissionError::Denied { reason, .. } => {
            assert_eq!(reason, DenialReason::AlreadyRequested)
        }
        other => panic!("unexpected admission result: {other}"),
    }
    // a different requester is unaffected
    harness
        .admit(&wallet_id(2), "group_1")
        .await
        .expect("other wallet");
}

#[tokio::test]
async fn unknown_group_is_rejected() {
    let harness = Harness::new(test_config(one_standard_group())).await;
    let err = harness.admit(&wallet_id(1), "no_such_group").await.unwrap_err();
    assert!(matches!(err, AdmissionError::UnknownGroup(_)));
    assert_eq!(harness.count_in_status(RequestStatus::Pending).await, 0);
}

#[tokio::test]
async fn missing_group_draws_from_non_migration_groups() {
    let harness = Harness::new(test_config(one_standard_group())).await;
    let admitted = harness
        .engine
        .try_admit(&wallet_id(1), None, "rcpt-x", "inv-x")
        .await
        .expect("admission without explicit group");
    assert_eq!(admitted.group, "group_1");
}

#[tokio::test]
async fn random_group_admits_as_waiting_inside_window() {
    let assets = BTreeMap::from([(
        "airdrop".to_string(),
        random_group("airdrop", "asset_b", 1, -3_600, 3_600),
    )]);
    let harness = Harness::new(test_config(assets)).await;

    let admitted = harness
        .admit(&wallet_id(1), "airdrop")
        .await
        .expect("admission inside window");
    assert_eq!(admitted.status, RequestStatus::Waiting);
    assert_eq!(harness.count_in_status(RequestStatus::Waiting).await, 1);
}

#[tokio::test]
async fn requests_outside_window_are_denied() {
    for (open, close) in [(3_600, 7_200), (-7_200, -3_600)] {
        let assets = BTreeMap::from([(
            "airdrop".to_string(),
            random_group("airdrop", "asset_b", 1, open, close),
        )]);
        let harness = Harness::new(test_config(assets)).await;

        let denied = harness.admit(&wallet_id(1), "airdrop").await.unwrap_err();
        match denied {
            AdmissionError::Denied { reason, .. } => {
                assert_eq!(reason, DenialReason::OutsideWindow)
            }
            other => panic!("unexpected admission result: {other}"),
        }
    }
}

#[tokio::test]
async fn racing_admissions_leave_exactly_one_request() {
    let harness = Harness::new(test_config(one_standard_group())).await;
    let wallet = wallet_id(7);

    let (first, second) = tokio::join!(
        harness
            .engine
            .try_admit(&wallet, Some("group_1"), "rcpt-a", "inv-a"),
        harness
            .engine
            .try_admit(&wallet, Some("group_1"), "rcpt-b", "inv-b"),
    );

    let successes = [&first, &second].iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1, "exactly one racer may win");
    let loser = if first.is_ok() { second } else { first };
    match loser.unwrap_err() {
        AdmissionError::Denied { reason, .. } => {
            assert_eq!(reason, DenialReason::AlreadyRequested)
        }
        other => panic!("unexpected admission result: {other}"),
    }
    assert_eq!(harness.count_in_status(RequestStatus::Pending).await, 1);
    assert_eq!(harness.count_in_status(RequestStatus::New).await, 0);
}

#[tokio::test]
async fn stale_new_rows_are_swept() {
    let harness = Harness::new(test_config(one_standard_group())).await;
    let wallet = wallet_id(1);
    let idx = harness
        .seed_request(&wallet, "group_1", "asset_a", 100, RequestStatus::New)
        .await;

    // backdate past the grace window
    request::Entity::update_many()
        .col_expr(
            request::Column::Timestamp,
            Expr::value(store::current_timestamp() - NEW_REQUEST_GRACE_SECS - 60),
        )
        .filter(request::Column::Idx.eq(idx))
        .exec(&harness.database)
        .await
        .expect("backdate");

    harness.engine.sweep_stale(&wallet).await.expect("sweep");
    assert_eq!(harness.count_in_status(RequestStatus::New).await, 0);

    // a fresh abandoned row inside the grace window survives
    harness
        .seed_request(&wallet, "group_1", "asset_a", 100, RequestStatus::New)
        .await;
    harness.engine.sweep_stale(&wallet).await.expect("sweep");
    assert_eq!(harness.count_in_status(RequestStatus::New).await, 1);
}
