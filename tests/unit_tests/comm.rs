use crate::run_on_ranks;
use geofem::comm::{exclusive_prefix_sum, global_sum, Communicator, OffsetStrategy, SerialCommunicator};
use geofem::proptest::rank_counts;
use geofem::Error;
use proptest::prelude::*;

#[test]
fn serial_communicator_has_a_single_rank() {
    let comm = SerialCommunicator;
    assert_eq!(comm.rank(), 0);
    assert_eq!(comm.size(), 1);
    assert_eq!(exclusive_prefix_sum(&comm, 7, OffsetStrategy::RankChain).unwrap(), 0);
    assert_eq!(global_sum(&comm, 7).unwrap(), 7);
    assert!(matches!(comm.send_usize(1, 3), Err(Error::Communication(_))));
}

#[test]
fn thread_communicator_rejects_invalid_peers() {
    let results = run_on_ranks(2, |comm| (comm.send_usize(comm.rank(), 1).is_err(), comm.send_usize(5, 1).is_err()));
    assert_eq!(results, vec![(true, true), (true, true)]);
}

#[test]
fn chain_offsets_for_fixed_counts() {
    let counts = [3, 0, 5, 2];
    let offsets = run_on_ranks(4, |comm| {
        exclusive_prefix_sum(comm, counts[comm.rank()], OffsetStrategy::RankChain).unwrap()
    });
    assert_eq!(offsets, vec![0, 3, 3, 8]);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prefix_sum_strategies_agree_with_sequential_sum(counts in rank_counts()) {
        let expected: Vec<usize> = (0..counts.len()).map(|rank| counts[..rank].iter().sum()).collect();
        let total: usize = counts.iter().sum();
        for strategy in [OffsetStrategy::RankChain, OffsetStrategy::ExclusiveScan] {
            let results = run_on_ranks(counts.len(), |comm| {
                let offset = exclusive_prefix_sum(comm, counts[comm.rank()], strategy).unwrap();
                let sum = global_sum(comm, counts[comm.rank()]).unwrap();
                (offset, sum)
            });
            let offsets: Vec<usize> = results.iter().map(|(offset, _)| *offset).collect();
            prop_assert_eq!(&offsets, &expected);
            prop_assert!(results.iter().all(|(_, sum)| *sum == total));
        }
    }
}
