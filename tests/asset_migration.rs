mod common;

use std::collections::BTreeMap;

use chroma_faucet::asset_migration::{self, CacheLookup};
use chroma_faucet::config::FaucetConfig;
use chroma_faucet::eligibility::{AdmissionError, DenialReason};
use chroma_faucet::entities::request::RequestStatus;
use chroma_faucet::store;
use common::{Harness, standard_group, test_config, wallet_id};

fn migration_config() -> FaucetConfig {
    let assets = BTreeMap::from([
        (
            "group_1".to_string(),
            standard_group("first group", "asset_a", 100),
        ),
        (
            "successor".to_string(),
            standard_group("successor group", "asset_new", 10),
        ),
    ]);
    let mut config = test_config(assets);
    config.asset_migration_map = Some(BTreeMap::from([(
        "asset_new".to_string(),
        "asset_old".to_string(),
    )]));
    config.validate().expect("migration config must be valid");
    config
}

#[tokio::test]
async fn boot_scan_collects_owed_wallets_and_rewrites_in_flight() {
    let harness = Harness::new(migration_config()).await;
    // served the retired asset, never its successor: owed
    harness
        .seed_request(&wallet_id(1), "legacy", "asset_old", 10, RequestStatus::Served)
        .await;
    // already holds the successor: not owed
    harness
        .seed_request(&wallet_id(2), "legacy", "asset_old", 10, RequestStatus::Served)
        .await;
    harness
        .seed_request(&wallet_id(2), "successor", "asset_new", 10, RequestStatus::Served)
        .await;
    // still queued for the retired asset: rewritten, not cached
    let queued = harness
        .seed_request(&wallet_id(3), "legacy", "asset_old", 10, RequestStatus::Pending)
        .await;

    asset_migration::run_boot_migration(&harness.database, &harness.config, &harness.cache)
        .await
        .expect("boot migration");

    assert_eq!(
        harness.cache.lookup("successor", &wallet_id(1)).await,
        CacheLookup::Owed
    );
    assert_eq!(
        harness.cache.lookup("successor", &wallet_id(2)).await,
        CacheLookup::WalletAbsent
    );
    assert_eq!(harness.cache.outstanding_wallets().await, 1);

    let pending = store::by_status_oldest_first(&harness.database, RequestStatus::Pending)
        .await
        .expect("query");
    let row = pending.iter().find(|r| r.idx == queued).expect("queued row");
    assert_eq!(row.asset_id.as_deref(), Some("asset_new"));

    // second run is a no-op
    asset_migration::run_boot_migration(&harness.database, &harness.config, &harness.cache)
        .await
        .expect("rerun");
    assert_eq!(harness.cache.outstanding_wallets().await, 1);
}

#[tokio::test]
async fn owed_wallet_claims_successor_then_group_completes() {
    let harness = Harness::new(migration_config()).await;
    harness
        .seed_request(&wallet_id(1), "legacy", "asset_old", 10, RequestStatus::Served)
        .await;
    asset_migration::run_boot_migration(&harness.database, &harness.config, &harness.cache)
        .await
        .expect("boot migration");

    // an unlisted wallet is turned away while the migration is in progress
    let denied = harness.admit(&wallet_id(9), "successor").await.unwrap_err();
    match denied {
        AdmissionError::Denied { reason, .. } => {
            assert_eq!(reason, DenialReason::NotInMigrationList)
        }
        other => panic!("unexpected admission result: {other}"),
    }

    // the owed wallet gets exactly the successor asset
    let admitted = harness
        .admit(&wallet_id(1), "successor")
        .await
        .expect("claim");
    assert_eq!(admitted.asset.asset_id, "asset_new");
    assert_eq!(admitted.status, RequestStatus::Pending);
    assert!(harness.cache.is_empty().await);

    // with the group drained the denial reason changes
    let denied = harness.admit(&wallet_id(9), "successor").await.unwrap_err();
    match denied {
        AdmissionError::Denied { reason, .. } => {
            assert_eq!(reason, DenialReason::MigrationComplete)
        }
        other => panic!("unexpected admission result: {other}"),
    }

    // and the claimant cannot draw twice
    let denied = harness.admit(&wallet_id(1), "successor").await.unwrap_err();
    match denied {
        AdmissionError::Denied { reason, .. } => {
            assert_eq!(reason, DenialReason::AlreadyRequested)
        }
        other => panic!("unexpected admission result: {other}"),
    }
}

#[tokio::test]
async fn migration_groups_are_excluded_from_random_group_choice() {
    let harness = Harness::new(migration_config()).await;
    // without an explicit group, only non-migration groups are drawn
    for n in 1..=5 {
        let admitted = harness
            .engine
            .try_admit(&wallet_id(n), None, "rcpt", &format!("inv-{n}"))
            .await
            .expect("admission");
        assert_eq!(admitted.group, "group_1");
    }
}
