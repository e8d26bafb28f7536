//! Status-machine transitions and their exactly-once side effects.

mod common;

use tempfile::tempdir;

use common::{participant, participant_set, validator, CHAIN_ID};
use epoch_proofs::types::{ParticipantStatus, SeedInfo, SeedType};
use epoch_proofs::{Keeper, SnapshotStore, ValidationParams};

fn keeper_with_epoch() -> (Keeper, tempfile::TempDir) {
    let dir = tempdir().expect("temp dir");
    let store = SnapshotStore::open(dir.path()).expect("open store");
    let keeper = Keeper::new(store, CHAIN_ID.to_string(), ValidationParams::default());

    let validators: Vec<_> = (1..=2).map(validator).collect();
    let refs: Vec<_> = validators.iter().collect();
    let set = participant_set(5, 100, &refs, 100);
    keeper.advance_epoch(&set).expect("commit epoch");
    keeper.promote_upcoming_epoch().expect("promote epoch");
    (keeper, dir)
}

#[test]
fn invalidation_writes_one_exclusion_row_and_slashes_once() {
    let (keeper, _dir) = keeper_with_epoch();
    let v = validator(1);
    let mut p = participant(&v, 100);
    p.epochs_completed = 2;
    p.current_epoch_stats.validated_inferences = 95;
    p.current_epoch_stats.invalidated_inferences = 5;

    // Healthy stats: no transition, no side effects.
    keeper.update_participant_status(&mut p, 120).expect("update");
    assert_eq!(p.status, ParticipantStatus::Active);
    assert!(keeper
        .store()
        .get_excluded_participant(5, &p.address)
        .expect("read")
        .is_none());

    // Stats degrade past the statistical threshold.
    p.current_epoch_stats.validated_inferences = 80;
    p.current_epoch_stats.invalidated_inferences = 20;
    keeper.update_participant_status(&mut p, 130).expect("update");
    assert_eq!(p.status, ParticipantStatus::Invalid);
    let balance_after_slash = p.coin_balance;
    assert_eq!(balance_after_slash, 900);

    let exclusion = keeper
        .store()
        .get_excluded_participant(5, &p.address)
        .expect("read")
        .expect("exclusion recorded");
    assert_eq!(exclusion.reason, "statistical_invalidations");
    assert_eq!(exclusion.effective_height, 130);
    assert!(!keeper
        .store()
        .is_epoch_group_member(5, &p.address)
        .expect("membership read"));

    // A second pass over an already-invalid participant changes nothing.
    keeper.update_participant_status(&mut p, 140).expect("update");
    assert_eq!(p.status, ParticipantStatus::Invalid);
    assert_eq!(p.coin_balance, balance_after_slash);
    let unchanged = keeper
        .store()
        .get_excluded_participant(5, &p.address)
        .expect("read")
        .expect("row still present");
    assert_eq!(unchanged.effective_height, 130);
}

#[test]
fn ramping_participant_has_no_side_effects() {
    let (keeper, _dir) = keeper_with_epoch();
    let v = validator(2);
    let mut p = participant(&v, 100);
    p.epochs_completed = 0;
    p.current_epoch_stats.inference_count = 10;

    keeper.update_participant_status(&mut p, 120).expect("update");
    assert_eq!(p.status, ParticipantStatus::Ramping);
    assert_eq!(p.coin_balance, 1_000);
    assert!(keeper
        .store()
        .get_excluded_participant(5, &p.address)
        .expect("read")
        .is_none());
}

#[test]
fn consecutive_failures_invalidate_regardless_of_stats() {
    let (keeper, _dir) = keeper_with_epoch();
    let v = validator(1);
    let mut p = participant(&v, 100);
    p.epochs_completed = 3;
    p.consecutive_invalid_inferences = 20;
    p.current_epoch_stats.validated_inferences = 1_000;

    keeper.update_participant_status(&mut p, 150).expect("update");
    assert_eq!(p.status, ParticipantStatus::Invalid);
    let exclusion = keeper
        .store()
        .get_excluded_participant(5, &p.address)
        .expect("read")
        .expect("exclusion recorded");
    assert_eq!(exclusion.reason, "consecutive_failures");
}

#[test]
fn seed_recovery_state_survives_epoch_rotation() {
    let (keeper, _dir) = keeper_with_epoch();
    let store = keeper.store();

    let mut batch = store.begin();
    batch
        .set_active_seed(
            SeedType::Previous,
            &SeedInfo {
                seed: 7177,
                epoch_index: 4,
                signature: String::new(),
                claimed: false,
                active: true,
            },
        )
        .expect("seed");
    batch.commit().expect("commit");

    let mut batch = store.begin();
    assert!(batch.mark_seed_claimed(SeedType::Previous).expect("claim"));
    batch.commit().expect("commit");

    let seed = store
        .get_active_seed(SeedType::Previous)
        .expect("read")
        .expect("active seed");
    assert!(seed.claimed);
    assert_eq!(seed.epoch_index, 4);
}
