use rstest::rstest;
use serial_test::serial;

use anemone_core::common_tests::linked_queue_core_tests::*;
use anemone_core::common_tests::linked_queue_stress_tests::*;
use anemone_crossbeam::EpochGuard;

#[rstest]
fn core_fifo_basics() {
    test_fifo_basics::<EpochGuard>();
}

#[rstest]
fn core_peek_and_contains() {
    test_peek_and_contains::<EpochGuard>();
}

#[rstest]
fn core_guarded_peek() {
    test_guarded_peek::<EpochGuard>();
}

#[rstest]
fn core_remove_arbitrary() {
    test_remove_arbitrary::<EpochGuard>();
}

#[rstest]
fn core_iteration() {
    test_iteration::<EpochGuard>();
}

#[rstest]
#[serial(stress_tests)]
fn stress_mpmc_exactly_once() {
    test_mpmc_exactly_once::<EpochGuard>();
}

#[rstest]
#[serial(stress_tests)]
fn stress_readers_during_mutation() {
    test_readers_during_mutation::<EpochGuard>();
}

#[rstest]
#[serial(stress_tests)]
fn stress_paired_operations() {
    test_paired_operations_conserve_items::<EpochGuard>();
}
