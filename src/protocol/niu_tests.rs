use super::*;
use crate::error::LinkError;
use crate::protocol::manager::NetworkConfig;
use crate::protocol::transport::link::CanLink;

use alloc::collections::VecDeque;
use alloc::rc::Rc;
use core::cell::RefCell;

#[derive(Clone, Default)]
struct MockLink {
    sent: Rc<RefCell<Vec<Frame>>>,
    inbox: Rc<RefCell<VecDeque<Frame>>>,
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

fn segment() -> (NetworkManager, MockLink) {
    let mut manager = NetworkManager::new(NetworkConfig::default());
    let link = MockLink::default();
    manager
        .attach_link(0, alloc::boxed::Box::new(link.clone()))
        .unwrap();
    (manager, link)
}

fn data_frame(pgn: u32, source: Address, destination: Address) -> Frame {
    let pf = ((pgn >> 8) & 0xFF) as u8;
    let builder = CanId::builder(pgn, source);
    let id = if pf >= 240 {
        builder.build().unwrap()
    } else {
        builder.destination(destination).build().unwrap()
    };
    Frame::new(id, &[0x11, 0x22, 0x33, 0x44])
}

fn claim_address(manager: &mut NetworkManager, address: Address) {
    let name = Name::builder()
        .identity_number(u32::from(address) + 1)
        .self_configurable(true)
        .build();
    let handle = manager.create_internal_cf(name, 0, address).unwrap();
    manager.start_address_claim(handle).unwrap();
    manager.update(250);
}

#[test]
fn repeater_forwards_both_directions() {
    let (mut tractor, tractor_link) = segment();
    let (mut implement, implement_link) = segment();

    let mut repeater = Repeater::new(NiuConfig::default().set_name("CableRepeater"));
    repeater.core.initialize(&mut tractor, &mut implement).unwrap();
    assert_eq!(repeater.core.state(), NiuState::Active);

    tractor_link
        .inbox
        .borrow_mut()
        .push_back(data_frame(0xFEF5, 0x20, BROADCAST_ADDRESS));
    tractor.update(1);
    repeater.process(&mut tractor, &mut implement, 1);

    let crossed = implement_link.sent.borrow();
    assert_eq!(crossed.len(), 1);
    assert_eq!(crossed[0].id.pgn(), 0xFEF5);
    drop(crossed);

    implement_link
        .inbox
        .borrow_mut()
        .push_back(data_frame(0xFEF6, 0x30, BROADCAST_ADDRESS));
    implement.update(1);
    repeater.process(&mut tractor, &mut implement, 1);
    assert_eq!(tractor_link.sent.borrow().len(), 1);

    assert_eq!(repeater.core.forwarded(), 2);
    assert_eq!(repeater.core.blocked(), 0);
}

#[test]
fn block_list_stops_matching_groups() {
    let (mut tractor, tractor_link) = segment();
    let (mut implement, implement_link) = segment();

    let mut repeater = Repeater::new(NiuConfig::default());
    repeater.core.initialize(&mut tractor, &mut implement).unwrap();
    repeater.core.block_pgn(0xFECA, FilterDirection::Both).unwrap();

    tractor_link
        .inbox
        .borrow_mut()
        .push_back(data_frame(0xFECA, 0x20, BROADCAST_ADDRESS));
    tractor_link
        .inbox
        .borrow_mut()
        .push_back(data_frame(0xFEF5, 0x20, BROADCAST_ADDRESS));
    tractor.update(1);
    repeater.process(&mut tractor, &mut implement, 1);

    let crossed = implement_link.sent.borrow();
    assert_eq!(crossed.len(), 1);
    assert_eq!(crossed[0].id.pgn(), 0xFEF5);
    assert_eq!(repeater.core.blocked(), 1);
    assert_eq!(repeater.core.forwarded(), 1);
}

#[test]
fn block_all_mode_requires_an_allow_entry() {
    let (mut tractor, tractor_link) = segment();
    let (mut implement, implement_link) = segment();

    let mut repeater = Repeater::new(NiuConfig::default().mode(NiuFilterMode::BlockAll));
    repeater.core.initialize(&mut tractor, &mut implement).unwrap();
    repeater.core.allow_pgn(0xFEF5, FilterDirection::Both).unwrap();

    tractor_link
        .inbox
        .borrow_mut()
        .push_back(data_frame(0xFEF5, 0x20, BROADCAST_ADDRESS));
    tractor_link
        .inbox
        .borrow_mut()
        .push_back(data_frame(0xFEF6, 0x20, BROADCAST_ADDRESS));
    tractor.update(1);
    repeater.process(&mut tractor, &mut implement, 1);

    let crossed = implement_link.sent.borrow();
    assert_eq!(crossed.len(), 1);
    assert_eq!(crossed[0].id.pgn(), 0xFEF5);
}

#[test]
fn rate_limited_filter_caps_the_forwarding_rate() {
    let (mut tractor, tractor_link) = segment();
    let (mut implement, implement_link) = segment();

    let mut repeater = Repeater::new(NiuConfig::default().mode(NiuFilterMode::BlockAll));
    repeater.core.initialize(&mut tractor, &mut implement).unwrap();
    repeater
        .core
        .allow_pgn_rate_limited(0xFEF5, 100, true)
        .unwrap();

    // Ten frames at 20 ms spacing survive as exactly two.
    for _ in 0..10 {
        tractor_link
            .inbox
            .borrow_mut()
            .push_back(data_frame(0xFEF5, 0x20, BROADCAST_ADDRESS));
        tractor.update(20);
        repeater.process(&mut tractor, &mut implement, 20);
    }
    assert_eq!(implement_link.sent.borrow().len(), 2);
}

#[test]
fn reset_keeps_only_persistent_filters() {
    let mut core = NiuCore::new(NiuConfig::default());
    core.block_pgn(0xFECA, FilterDirection::Both).unwrap();
    core.allow_pgn_rate_limited(0xFEF5, 100, true).unwrap();
    assert_eq!(core.filters().len(), 2);

    core.reset();
    assert_eq!(core.filters().len(), 1);
    assert_eq!(core.persistent_filters().len(), 1);
    assert_eq!(core.forwarded(), 0);
}

#[test]
fn filter_table_is_bounded() {
    let mut core = NiuCore::new(NiuConfig::default());
    for pgn in 0..MAX_NIU_FILTERS as u32 {
        core.allow_pgn(0xF000 + pgn, FilterDirection::Both).unwrap();
    }
    assert_eq!(
        core.allow_pgn(0xAAAA, FilterDirection::Both).unwrap_err(),
        NiuError::FilterTableFull
    );
}

#[test]
fn bridge_keeps_local_destination_traffic_local() {
    let (mut tractor, tractor_link) = segment();
    let (mut implement, implement_link) = segment();

    let mut bridge = Bridge::new(NiuConfig::default().set_name("SmartBridge"));
    bridge.core.initialize(&mut tractor, &mut implement).unwrap();
    bridge.learn_address(0x21, Side::Tractor);

    // Destination known on the originating side: stays local.
    tractor_link
        .inbox
        .borrow_mut()
        .push_back(data_frame(0xEF00, 0x20, 0x21));
    tractor.update(1);
    bridge.process(&mut tractor, &mut implement, 1);
    assert!(implement_link.sent.borrow().is_empty());

    // Unknown destination: flooded across.
    tractor_link
        .inbox
        .borrow_mut()
        .push_back(data_frame(0xEF00, 0x20, 0x31));
    tractor.update(1);
    bridge.process(&mut tractor, &mut implement, 1);
    assert_eq!(implement_link.sent.borrow().len(), 1);

    // The bridge learned the talker's side from its traffic.
    assert_eq!(bridge.lookup_address(0x20), Some(Side::Tractor));
}

#[test]
fn learning_entries_age_out() {
    let mut table = LearningTable::default();
    table.learn(0x20, Side::Tractor, 0);
    table.learn(0x30, Side::Implement, LEARNING_AGE_MS);

    table.purge_expired(LEARNING_AGE_MS + 1);
    assert_eq!(table.lookup(0x20), None);
    assert_eq!(table.lookup(0x30), Some(Side::Implement));
    assert_eq!(table.len(), 1);
}

#[test]
fn translation_db_maps_addresses_per_side() {
    let mut db = TranslationDb::default();
    let engine = Name::builder().identity_number(100).build();
    db.add(engine, 0x20, 0x40);

    assert_eq!(db.translate(0x20, Side::Tractor), 0x40);
    assert_eq!(db.translate(0x40, Side::Implement), 0x20);
    assert_eq!(db.translate(0x99, Side::Tractor), NULL_ADDRESS);

    assert!(!db.is_address_available(0x20, Side::Tractor));
    assert!(db.is_address_available(0x99, Side::Tractor));
}

#[test]
fn router_rewrites_crossing_addresses() {
    let (mut tractor, tractor_link) = segment();
    let (mut implement, implement_link) = segment();

    let mut router = Router::new(NiuConfig::default().set_name("AddressRouter"));
    router.core.initialize(&mut tractor, &mut implement).unwrap();

    let engine = Name::builder().identity_number(100).build();
    let task_controller = Name::builder().identity_number(200).build();
    router.add_translation(engine, 0x20, 0x40);
    router.add_translation(task_controller, 0x50, 0x21);

    // Destination-specific: both ends are rewritten.
    tractor_link
        .inbox
        .borrow_mut()
        .push_back(data_frame(0xEF00, 0x20, 0x50));
    tractor.update(1);
    router.process(&mut tractor, &mut implement, 1);
    {
        let crossed = implement_link.sent.borrow();
        assert_eq!(crossed.len(), 1);
        assert_eq!(crossed[0].id.source_address(), 0x40);
        assert_eq!(crossed[0].id.destination(), 0x21);
    }

    // Broadcasts keep the global destination but rewrite the source.
    tractor_link
        .inbox
        .borrow_mut()
        .push_back(data_frame(0xFEF5, 0x20, BROADCAST_ADDRESS));
    tractor.update(1);
    router.process(&mut tractor, &mut implement, 1);
    {
        let crossed = implement_link.sent.borrow();
        assert_eq!(crossed.len(), 2);
        assert_eq!(crossed[1].id.source_address(), 0x40);
        assert_eq!(crossed[1].id.destination(), BROADCAST_ADDRESS);
    }
}

#[test]
fn router_drops_untranslated_traffic() {
    let (mut tractor, tractor_link) = segment();
    let (mut implement, implement_link) = segment();

    let mut router = Router::new(NiuConfig::default());
    router.core.initialize(&mut tractor, &mut implement).unwrap();

    tractor_link
        .inbox
        .borrow_mut()
        .push_back(data_frame(0xFEF5, 0x66, BROADCAST_ADDRESS));
    tractor.update(1);
    router.process(&mut tractor, &mut implement, 1);
    assert!(implement_link.sent.borrow().is_empty());
}

#[test]
fn gateway_transforms_and_blocks_messages() {
    let (mut tractor, tractor_link) = segment();
    let (mut implement, implement_link) = segment();

    let mut gateway = Gateway::new(NiuConfig::default().set_name("ProtocolGateway"));
    gateway
        .router
        .core
        .initialize(&mut tractor, &mut implement)
        .unwrap();

    let sensor = Name::builder().identity_number(500).build();
    gateway.add_translation(sensor, 0x25, 0x45);

    // Rework: double the first payload byte.
    gateway.register_tractor_transform(0xFEF5, |message| {
        let mut reworked = message.clone();
        reworked.data[0] = reworked.data[0].wrapping_mul(2);
        Some(reworked)
    });
    // Block the proprietary group entirely.
    gateway.register_tractor_transform(0xEF00, |_| None);

    tractor_link
        .inbox
        .borrow_mut()
        .push_back(data_frame(0xFEF5, 0x25, BROADCAST_ADDRESS));
    tractor.update(1);
    gateway.process(&mut tractor, &mut implement, 1);
    {
        let crossed = implement_link.sent.borrow();
        assert_eq!(crossed.len(), 1);
        assert_eq!(crossed[0].id.source_address(), 0x45);
        assert_eq!(crossed[0].payload()[0], 0x22);
    }

    tractor_link
        .inbox
        .borrow_mut()
        .push_back(data_frame(0xEF00, 0x25, 0x45));
    tractor.update(1);
    gateway.process(&mut tractor, &mut implement, 1);
    assert_eq!(implement_link.sent.borrow().len(), 1, "blocked by transform");
}

#[test]
fn initialize_rejects_cross_segment_address_conflicts() {
    let (mut tractor, _tractor_link) = segment();
    let (mut implement, _implement_link) = segment();
    claim_address(&mut tractor, 0x28);
    claim_address(&mut implement, 0x28);

    let mut repeater = Repeater::new(NiuConfig::default());
    let err = repeater
        .core
        .initialize(&mut tractor, &mut implement)
        .unwrap_err();
    assert_eq!(err, NiuError::AddressConflict { address: 0x28 });
    assert_eq!(repeater.core.state(), NiuState::Offline);

    assert!(!repeater
        .core
        .check_address_unique(0x28, &tractor, &implement));
}

#[test]
fn network_message_round_trips_for_every_function() {
    let cases = [
        NiuNetworkMessage {
            function: NiuFunction::AddFilterEntry,
            port_number: 1,
            filter_pgn: 0xFEF5,
            ..Default::default()
        },
        NiuNetworkMessage {
            function: NiuFunction::DeleteFilterEntry,
            port_number: 0,
            filter_pgn: 0x1F234,
            ..Default::default()
        },
        NiuNetworkMessage {
            function: NiuFunction::SetFilterMode,
            port_number: 0,
            filter_mode: NiuFilterMode::BlockAll,
            ..Default::default()
        },
        NiuNetworkMessage {
            function: NiuFunction::PortStatsRequest,
            port_number: 1,
            ..Default::default()
        },
        NiuNetworkMessage {
            function: NiuFunction::PortStatsResponse,
            port_number: 1,
            msgs_forwarded: 12_345,
            msgs_blocked: 678,
            ..Default::default()
        },
    ];
    for message in cases {
        assert_eq!(NiuNetworkMessage::decode(&message.encode()).unwrap(), message);
    }
}

#[test]
fn network_messages_manage_the_filter_table() {
    let mut core = NiuCore::new(NiuConfig::default());

    core.handle_network_message(&NiuNetworkMessage {
        function: NiuFunction::AddFilterEntry,
        filter_pgn: 0xFEF5,
        ..Default::default()
    });
    assert_eq!(core.filters().len(), 1);

    core.handle_network_message(&NiuNetworkMessage {
        function: NiuFunction::SetFilterMode,
        filter_mode: NiuFilterMode::BlockAll,
        ..Default::default()
    });
    assert_eq!(core.filter_mode(Side::Tractor), NiuFilterMode::BlockAll);
    assert_eq!(core.filter_mode(Side::Implement), NiuFilterMode::BlockAll);

    core.handle_network_message(&NiuNetworkMessage {
        function: NiuFunction::DeleteFilterEntry,
        filter_pgn: 0xFEF5,
        ..Default::default()
    });
    assert!(core.filters().is_empty());

    let response = core
        .handle_network_message(&NiuNetworkMessage {
            function: NiuFunction::PortStatsRequest,
            port_number: 1,
            ..Default::default()
        })
        .expect("statistics response");
    assert_eq!(response.function, NiuFunction::PortStatsResponse);
    assert_eq!(response.port_number, 1);
}
