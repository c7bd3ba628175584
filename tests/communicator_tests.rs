use mesh_narray::algs::communicator::{CommTag, Communicator, NoComm, ThreadComm, Wait};

#[test]
fn thread_round_trip() {
    let tag = CommTag(0x1000);
    let mut world = ThreadComm::world(2);
    let c1 = world.pop().unwrap();
    let c0 = world.pop().unwrap();

    let msg = b"hello";
    let _s = c0.isend(1, tag.as_u16(), msg);

    let mut buf = [0u8; 5];
    let h = c1.irecv(0, tag.as_u16(), &mut buf);
    let got = h.wait().unwrap();
    assert_eq!(&got, msg);
}

#[test]
fn thread_fifo_order() {
    let tag = CommTag(0x1001);
    let world = ThreadComm::world(2);

    for i in 0..10u8 {
        world[0].isend(1, tag.as_u16(), &[i]);
    }
    let mut out = Vec::new();
    for _ in 0..10 {
        let mut b = [0u8; 1];
        let h = world[1].irecv(0, tag.as_u16(), &mut b);
        out.push(h.wait().unwrap()[0]);
    }
    assert_eq!(out, (0u8..10u8).collect::<Vec<_>>());
}

#[test]
fn truncation_is_ok() {
    let tag = CommTag(0x1002);
    let world = ThreadComm::world(2);

    world[0].isend(1, tag.as_u16(), &[1, 2, 3, 4, 5, 6]);
    let mut b = [0u8; 4];
    let got = world[1].irecv(0, tag.as_u16(), &mut b).wait().unwrap();
    assert_eq!(got, vec![1, 2, 3, 4]);
}

#[test]
fn tags_do_not_mix() {
    let world = ThreadComm::world(2);
    world[0].isend(1, 7, b"seven");
    world[0].isend(1, 8, b"eight");
    let mut b = [0u8; 5];
    assert_eq!(world[1].irecv(0, 8, &mut b).wait().unwrap(), b"eight");
    assert_eq!(world[1].irecv(0, 7, &mut b).wait().unwrap(), b"seven");
}

#[test]
fn counts_exchange_on_threads() {
    let got = ThreadComm::run(3, |comm| {
        let me = comm.rank() as u64;
        let counts: Vec<u64> = (0..3).map(|d| me * 10 + d).collect();
        comm.all_to_all_counts(CommTag(0x2000), &counts).unwrap()
    });
    assert_eq!(got[0], vec![0, 10, 20]);
    assert_eq!(got[2], vec![2, 12, 22]);
}

#[test]
fn nocomm_is_a_single_rank() {
    assert_eq!((NoComm.rank(), NoComm.size()), (0, 1));
    assert_eq!(NoComm.all_to_all_counts(CommTag(1), &[5]).unwrap(), vec![5]);
    assert!(NoComm.all_to_all_counts(CommTag(1), &[5, 6]).is_err());
    let mut b = [0u8; 2];
    assert!(NoComm.irecv(0, 1, &mut b).wait().is_none());
}
