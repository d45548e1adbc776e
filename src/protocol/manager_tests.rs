use super::*;
use crate::error::LinkError;
use crate::protocol::diagnostic::{Dtc, DtcReport};
use crate::protocol::transport::cm::TpControl;
use crate::protocol::NULL_ADDRESS;

use alloc::collections::VecDeque;
use alloc::rc::Rc;
use alloc::vec;
use core::cell::{Cell, RefCell};

/// In-memory link: frames the engine sends pile up in `sent`, frames pushed
/// into `inbox` come back from `receive`.
#[derive(Clone, Default)]
struct MockLink {
    sent: Rc<RefCell<Vec<Frame>>>,
    inbox: Rc<RefCell<VecDeque<Frame>>>,
}

impl MockLink {
    fn new() -> Self {
        Self::default()
    }

    fn sent_frames(&self) -> Vec<Frame> {
        self.sent.borrow().clone()
    }

    fn clear_sent(&self) {
        self.sent.borrow_mut().clear();
    }

    fn push_incoming(&self, frame: Frame) {
        self.inbox.borrow_mut().push_back(frame);
    }
}

impl CanLink for MockLink {
    fn send(&mut self, frame: &Frame) -> Result<(), LinkError> {
        self.sent.borrow_mut().push(*frame);
        Ok(())
    }

    fn receive(&mut self) -> Option<Frame> {
        self.inbox.borrow_mut().pop_front()
    }

    fn bitrate(&self) -> u32 {
        250_000
    }
}

fn claim_from(address: Address, name: Name) -> Frame {
    let id = CanId::builder(PGN_ADDRESS_CLAIM, address)
        .destination(BROADCAST_ADDRESS)
        .priority(6)
        .build()
        .unwrap();
    Frame::new(id, &name.to_le_bytes())
}

fn manager_with_link() -> (NetworkManager, MockLink) {
    let mut manager = NetworkManager::default();
    let link = MockLink::new();
    manager.attach_link(0, Box::new(link.clone())).unwrap();
    (manager, link)
}

fn claimed_cf(manager: &mut NetworkManager, link: &MockLink, address: Address) -> InternalCfHandle {
    let name = Name::builder()
        .identity_number(u32::from(address))
        .manufacturer_code(100)
        .self_configurable(true)
        .build();
    let handle = manager.create_internal_cf(name, 0, address).unwrap();
    manager.start_address_claim(handle).unwrap();
    manager.update(250);
    link.clear_sent();
    handle
}

#[test]
fn unopposed_claim_completes_with_the_preferred_address() {
    let (mut manager, link) = manager_with_link();
    let name = Name::from_raw(0x8000_10CA_00C8_FA2A);
    let handle = manager.create_internal_cf(name, 0, 0x28).unwrap();

    let claimed = Rc::new(Cell::new(NULL_ADDRESS));
    let inner = Rc::clone(&claimed);
    manager.on_address_claimed(handle, move |address| inner.set(*address));

    manager.start_address_claim(handle).unwrap();
    let sent = link.sent_frames();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].id.pgn(), PGN_REQUEST);
    assert_eq!(sent[1].id.pgn(), PGN_ADDRESS_CLAIM);
    assert_eq!(sent[1].id.source_address(), 0x28);

    manager.update(250);
    assert_eq!(manager.claim_state(handle), Some(ClaimState::Claimed));
    assert_eq!(manager.internal_address(handle), Some(0x28));
    assert_eq!(claimed.get(), 0x28);
}

#[test]
fn lost_contest_moves_to_the_next_address() {
    let (mut manager, link) = manager_with_link();
    let ours = Name::builder()
        .identity_number(100)
        .manufacturer_code(50)
        .self_configurable(true)
        .build();
    let handle = manager.create_internal_cf(ours, 0, 0x28).unwrap();
    manager.start_address_claim(handle).unwrap();
    link.clear_sent();

    let stronger = Name::builder()
        .identity_number(50)
        .manufacturer_code(50)
        .self_configurable(true)
        .build();
    link.push_incoming(claim_from(0x28, stronger));
    manager.update(1);

    // Our next claim goes out for 0x29.
    let reclaims: Vec<Frame> = link
        .sent_frames()
        .into_iter()
        .filter(|frame| frame.id.pgn() == PGN_ADDRESS_CLAIM)
        .collect();
    assert_eq!(reclaims.len(), 1);
    assert_eq!(reclaims[0].id.source_address(), 0x29);

    manager.update(250);
    assert_eq!(manager.claim_state(handle), Some(ClaimState::Claimed));
    assert_eq!(manager.internal_address(handle), Some(0x29));

    // The contender is tracked as an external control function.
    let external = manager.registry().lookup_by_address(0, 0x28).unwrap();
    assert_eq!(external.name, stronger);
}

#[test]
fn send_refuses_before_the_claim_completes() {
    let (mut manager, _link) = manager_with_link();
    let handle = manager
        .create_internal_cf(Name::from_raw(1), 0, 0x28)
        .unwrap();

    let err = manager
        .send(0xFEF5, &[0x01, 0x02], handle, BROADCAST_ADDRESS, 6)
        .unwrap_err();
    assert_eq!(err, NetworkError::NotClaimed);
}

#[test]
fn send_without_link_fails() {
    let mut manager = NetworkManager::default();
    let handle = manager
        .create_internal_cf(Name::from_raw(1), 0, 0x28)
        .unwrap();
    manager.start_address_claim(handle).ok();
    manager.update(250);

    let err = manager
        .send(0xFEF5, &[0x01, 0x02], handle, BROADCAST_ADDRESS, 6)
        .unwrap_err();
    assert_eq!(err, NetworkError::NoLink { port: 0 });
}

#[test]
fn payload_size_picks_single_frame_or_transport() {
    let (mut manager, link) = manager_with_link();
    let handle = claimed_cf(&mut manager, &link, 0x28);

    manager
        .send(0xFEF5, &[0u8; 8], handle, BROADCAST_ADDRESS, 6)
        .unwrap();
    let sent = link.sent_frames();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].id.pgn(), 0xFEF5);
    link.clear_sent();

    manager
        .send(0xFEF6, &[0u8; 9], handle, BROADCAST_ADDRESS, 6)
        .unwrap();
    let sent = link.sent_frames();
    assert_eq!(sent.len(), 1);
    assert!(matches!(
        TpControl::decode(sent[0].payload()).unwrap(),
        TpControl::Bam { total_size: 9, total_packets: 2, pgn: 0xFEF6 }
    ));
}

#[test]
fn callbacks_fire_in_registration_order() {
    let mut manager = NetworkManager::default();
    let order = Rc::new(RefCell::new(Vec::new()));

    let first = Rc::clone(&order);
    manager.register_pgn_callback(0xFEF5, move |_| first.borrow_mut().push(1));
    let second = Rc::clone(&order);
    manager.register_pgn_callback(0xFEF5, move |_| second.borrow_mut().push(2));

    manager.inject_message(Message::new(0xFEF5, 0x30, BROADCAST_ADDRESS, vec![0x01]));
    assert_eq!(order.borrow().as_slice(), &[1, 2]);
}

#[test]
fn destination_specific_traffic_for_others_is_filtered() {
    let (mut manager, link) = manager_with_link();
    let _handle = claimed_cf(&mut manager, &link, 0x28);

    let hits = Rc::new(Cell::new(0));
    let inner = Rc::clone(&hits);
    manager.register_pgn_callback(0xEF00, move |_| inner.set(inner.get() + 1));

    // Addressed to someone else: dropped.
    let other = CanId::builder(0xEF00, 0x30).destination(0x50).build().unwrap();
    link.push_incoming(Frame::new(other, &[1, 2, 3]));
    manager.update(1);
    assert_eq!(hits.get(), 0);

    // Addressed to us: dispatched.
    let ours = CanId::builder(0xEF00, 0x30).destination(0x28).build().unwrap();
    link.push_incoming(Frame::new(ours, &[1, 2, 3]));
    manager.update(1);
    assert_eq!(hits.get(), 1);
}

#[test]
fn request_for_address_claim_reannounces() {
    let (mut manager, link) = manager_with_link();
    let _handle = claimed_cf(&mut manager, &link, 0x28);

    let request_id = CanId::builder(PGN_REQUEST, 0x30)
        .destination(BROADCAST_ADDRESS)
        .build()
        .unwrap();
    link.push_incoming(Frame::new(request_id, &[0x00, 0xEE, 0x00]));
    manager.update(1);

    let claims: Vec<Frame> = link
        .sent_frames()
        .into_iter()
        .filter(|frame| frame.id.pgn() == PGN_ADDRESS_CLAIM)
        .collect();
    assert_eq!(claims.len(), 1);
    assert_eq!(claims[0].id.source_address(), 0x28);
}

#[test]
fn unhandled_specific_request_is_nacked() {
    let (mut manager, link) = manager_with_link();
    let _handle = claimed_cf(&mut manager, &link, 0x28);

    let request_id = CanId::builder(PGN_REQUEST, 0x30).destination(0x28).build().unwrap();
    link.push_incoming(Frame::new(request_id, &[0xF5, 0xFE, 0x00]));
    manager.update(1);

    let sent = link.sent_frames();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].id.pgn(), PGN_ACKNOWLEDGEMENT);
    assert_eq!(sent[0].payload()[0], 1, "negative acknowledgement");
    assert_eq!(sent[0].payload()[4], 0x30, "requester echoed");
    assert_eq!(&sent[0].payload()[5..8], &[0xF5, 0xFE, 0x00]);
}

#[test]
fn broadcast_requests_are_never_nacked() {
    let (mut manager, link) = manager_with_link();
    let _handle = claimed_cf(&mut manager, &link, 0x28);

    let request_id = CanId::builder(PGN_REQUEST, 0x30)
        .destination(BROADCAST_ADDRESS)
        .build()
        .unwrap();
    link.push_incoming(Frame::new(request_id, &[0xF5, 0xFE, 0x00]));
    manager.update(1);
    assert!(link.sent_frames().is_empty());
}

#[test]
fn registered_request_handler_answers() {
    let (mut manager, link) = manager_with_link();
    let _handle = claimed_cf(&mut manager, &link, 0x28);

    manager.register_request_handler(0xFEF5, |_requester| Some(vec![0xAA; 8]));

    let request_id = CanId::builder(PGN_REQUEST, 0x30).destination(0x28).build().unwrap();
    link.push_incoming(Frame::new(request_id, &[0xF5, 0xFE, 0x00]));
    manager.update(1);

    let sent = link.sent_frames();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].id.pgn(), 0xFEF5);
    assert_eq!(sent[0].payload(), &[0xAA; 8]);
}

#[test]
fn dm1_broadcasts_every_second_until_cleared() {
    let (mut manager, link) = manager_with_link();
    let handle = claimed_cf(&mut manager, &link, 0x28);
    manager.enable_diagnostics(handle);
    manager
        .diagnostics_mut(handle)
        .unwrap()
        .set_active(Dtc::new(500, 3))
        .unwrap();

    for _ in 0..3 {
        for _ in 0..10 {
            manager.update(100);
        }
    }
    let dm1_frames: Vec<Frame> = link
        .sent_frames()
        .into_iter()
        .filter(|frame| frame.id.pgn() == PGN_DM1)
        .collect();
    assert_eq!(dm1_frames.len(), 3);
    let report = DtcReport::decode(dm1_frames[0].payload()).unwrap();
    assert_eq!(report.dtcs.len(), 1);
    assert_eq!(report.dtcs[0].spn, 500);

    // Clearing stops the cadence within one interval.
    manager.diagnostics_mut(handle).unwrap().clear_all_active();
    link.clear_sent();
    for _ in 0..20 {
        manager.update(100);
    }
    assert!(link.sent_frames().iter().all(|f| f.id.pgn() != PGN_DM1));
}

#[test]
fn dm13_over_the_link_suspends_dm1() {
    let (mut manager, link) = manager_with_link();
    let handle = claimed_cf(&mut manager, &link, 0x28);
    manager.enable_diagnostics(handle);
    manager
        .diagnostics_mut(handle)
        .unwrap()
        .set_active(Dtc::new(500, 3))
        .unwrap();

    // dm1 = suspend, five seconds.
    let dm13_id = CanId::builder(PGN_DM13, 0x30).destination(0x28).build().unwrap();
    link.push_incoming(Frame::new(dm13_id, &[0xCF, 0xFF, 5, 0, 0xFF, 0xFF, 0xFF, 0xFF]));
    manager.update(1);
    assert!(manager.diagnostics_mut(handle).unwrap().is_dm1_suspended());

    for _ in 0..50 {
        manager.update(100);
    }
    assert!(link.sent_frames().iter().all(|f| f.id.pgn() != PGN_DM1));

    // Past the suspension the cadence resumes.
    manager.update(100);
    manager.update(100);
    assert!(link.sent_frames().iter().any(|f| f.id.pgn() == PGN_DM1));
}

#[test]
fn request_for_dm2_returns_previous_faults() {
    let (mut manager, link) = manager_with_link();
    let handle = claimed_cf(&mut manager, &link, 0x28);
    manager.enable_diagnostics(handle);
    {
        let diag = manager.diagnostics_mut(handle).unwrap();
        diag.set_active(Dtc::new(500, 3)).unwrap();
        diag.clear_all_active();
    }

    let request_id = CanId::builder(PGN_REQUEST, 0x30).destination(0x28).build().unwrap();
    link.push_incoming(Frame::new(request_id, &[0xCB, 0xFE, 0x00]));
    manager.update(1);

    let sent = link.sent_frames();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].id.pgn(), crate::protocol::PGN_DM2);
    let report = DtcReport::decode(sent[0].payload()).unwrap();
    assert_eq!(report.dtcs.len(), 1);
}

#[test]
fn dm11_request_clears_and_acknowledges() {
    let (mut manager, link) = manager_with_link();
    let handle = claimed_cf(&mut manager, &link, 0x28);
    manager.enable_diagnostics(handle);
    manager
        .diagnostics_mut(handle)
        .unwrap()
        .set_active(Dtc::new(500, 3))
        .unwrap();

    let request_id = CanId::builder(PGN_REQUEST, 0x30).destination(0x28).build().unwrap();
    link.push_incoming(Frame::new(request_id, &[0xD3, 0xFE, 0x00]));
    manager.update(1);

    let diag = manager.diagnostics_mut(handle).unwrap();
    assert!(diag.active_dtcs().is_empty());
    assert!(diag.previous_dtcs().is_empty());

    let sent = link.sent_frames();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].id.pgn(), PGN_ACKNOWLEDGEMENT);
    assert_eq!(sent[0].payload()[0], 0, "positive acknowledgement");
}

#[test]
fn transport_receive_flows_to_dispatch() {
    let (mut manager, link) = manager_with_link();
    let _handle = claimed_cf(&mut manager, &link, 0x28);

    let received = Rc::new(RefCell::new(None));
    let inner = Rc::clone(&received);
    manager.register_pgn_callback(0xEF00, move |message| {
        *inner.borrow_mut() = Some(message.clone());
    });

    let data: Vec<u8> = (0..20u8).collect();
    let rts = CanId::builder(crate::protocol::PGN_TP_CM, 0x30).destination(0x28).priority(7).build().unwrap();
    link.push_incoming(Frame::new(
        rts,
        &TpControl::Rts { total_size: 20, total_packets: 3, max_packets_per_cts: 0xFF, pgn: 0xEF00 }.encode(),
    ));
    manager.update(1);

    // Our CTS went out; stream the three packets.
    assert!(link
        .sent_frames()
        .iter()
        .any(|frame| frame.id.pgn() == crate::protocol::PGN_TP_CM));
    let dt = |sequence: u8, chunk: &[u8]| {
        let id = CanId::builder(crate::protocol::PGN_TP_DT, 0x30).destination(0x28).priority(7).build().unwrap();
        let mut payload = [0xFF; 8];
        payload[0] = sequence;
        payload[1..1 + chunk.len()].copy_from_slice(chunk);
        Frame::new(id, &payload)
    };
    link.push_incoming(dt(1, &data[0..7]));
    link.push_incoming(dt(2, &data[7..14]));
    link.push_incoming(dt(3, &data[14..20]));
    link.clear_sent();
    manager.update(1);

    let message = received.borrow().clone().expect("message dispatched");
    assert_eq!(message.pgn, 0xEF00);
    assert_eq!(message.data, data);

    // The end-of-message acknowledgement went back to the sender.
    assert!(link.sent_frames().iter().any(|frame| {
        frame.id.pgn() == crate::protocol::PGN_TP_CM
            && matches!(
                TpControl::decode(frame.payload()),
                Ok(TpControl::Eoma { .. })
            )
    }));
}

#[test]
fn send_callback_reports_broadcast_completion() {
    let (mut manager, link) = manager_with_link();
    let handle = claimed_cf(&mut manager, &link, 0x28);

    let outcome = Rc::new(Cell::new(None));
    let inner = Rc::clone(&outcome);
    manager
        .send_with_callback(0xFEF6, &[0u8; 20], handle, BROADCAST_ADDRESS, 6, move |ok| {
            inner.set(Some(ok))
        })
        .unwrap();
    assert_eq!(outcome.get(), None);

    manager.update(150);
    assert_eq!(outcome.get(), Some(true));
}

#[test]
fn bus_load_reflects_observed_traffic() {
    let (mut manager, link) = manager_with_link();
    assert_eq!(manager.bus_load(0), 0.0);

    for _ in 0..50 {
        let id = CanId::builder(0xFEF5, 0x30).build().unwrap();
        link.push_incoming(Frame::new(id, &[0u8; 8]));
    }
    manager.update(100);
    assert!(manager.bus_load(0) > 0.0);
}

#[test]
fn monitor_tap_captures_raw_frames() {
    let (mut manager, link) = manager_with_link();
    manager.set_monitor(0, true);

    let id = CanId::builder(0xFEF5, 0x30).build().unwrap();
    link.push_incoming(Frame::new(id, &[1, 2, 3]));
    manager.update(1);

    let tapped = manager.drain_monitor(0);
    assert_eq!(tapped.len(), 1);
    assert_eq!(tapped[0].id.pgn(), 0xFEF5);
    assert!(manager.drain_monitor(0).is_empty());
}

#[test]
fn destroying_a_cf_aborts_its_sessions() {
    let (mut manager, link) = manager_with_link();
    let handle = claimed_cf(&mut manager, &link, 0x28);

    manager
        .send(0xEF00, &[0u8; 100], handle, 0x42, 6)
        .unwrap();
    assert_eq!(manager.active_transport_sessions(), 1);

    manager.destroy_internal_cf(handle);
    assert_eq!(manager.active_transport_sessions(), 0);
    assert!(manager.internal_address(handle).is_none());
    assert!(!manager.drain_transport_errors().is_empty());
}
