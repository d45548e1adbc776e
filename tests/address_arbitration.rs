//! Address-claim scenarios across two live nodes sharing one segment: the
//! lower NAME keeps the contested address, the loser either re-claims or
//! gives up depending on its self-configurable bit.
mod helpers;

use helpers::VirtualBus;
use isobus_core::error::NetworkError;
use isobus_core::protocol::management::address_claim::ClaimState;
use isobus_core::protocol::management::name::Name;
use isobus_core::protocol::manager::NetworkManager;
use isobus_core::protocol::{BROADCAST_ADDRESS, NULL_ADDRESS};
use pretty_assertions::assert_eq;

fn node(bus: &VirtualBus) -> NetworkManager {
    let mut manager = NetworkManager::default();
    manager.attach_link(0, Box::new(bus.endpoint())).unwrap();
    manager
}

fn pump(managers: &mut [&mut NetworkManager], steps: u32, dt_ms: u32) {
    for _ in 0..steps {
        for manager in managers.iter_mut() {
            manager.update(dt_ms);
        }
    }
}

#[test]
fn contested_address_goes_to_the_lower_name() {
    let bus = VirtualBus::new();
    let mut strong_node = node(&bus);
    let mut weak_node = node(&bus);

    let strong_name = Name::builder()
        .identity_number(50)
        .manufacturer_code(50)
        .self_configurable(true)
        .build();
    let weak_name = Name::builder()
        .identity_number(100)
        .manufacturer_code(50)
        .self_configurable(true)
        .build();

    let strong = strong_node.create_internal_cf(strong_name, 0, 0x28).unwrap();
    let weak = weak_node.create_internal_cf(weak_name, 0, 0x28).unwrap();

    strong_node.start_address_claim(strong).unwrap();
    weak_node.start_address_claim(weak).unwrap();

    pump(&mut [&mut strong_node, &mut weak_node], 40, 10);

    assert_eq!(strong_node.claim_state(strong), Some(ClaimState::Claimed));
    assert_eq!(strong_node.internal_address(strong), Some(0x28));

    assert_eq!(weak_node.claim_state(weak), Some(ClaimState::Claimed));
    assert_eq!(weak_node.internal_address(weak), Some(0x29));

    // Each side tracks the other as an external control function.
    assert_eq!(
        strong_node.registry().lookup_by_address(0, 0x29).unwrap().name,
        weak_name
    );
    assert_eq!(
        weak_node.registry().lookup_by_address(0, 0x28).unwrap().name,
        strong_name
    );
}

#[test]
fn fixed_address_loser_ends_in_failed() {
    let bus = VirtualBus::new();
    let mut strong_node = node(&bus);
    let mut weak_node = node(&bus);

    let strong_name = Name::builder().identity_number(50).build();
    let weak_name = Name::builder().identity_number(100).build();

    let strong = strong_node.create_internal_cf(strong_name, 0, 0x28).unwrap();
    let weak = weak_node.create_internal_cf(weak_name, 0, 0x28).unwrap();

    strong_node.start_address_claim(strong).unwrap();
    weak_node.start_address_claim(weak).unwrap();

    pump(&mut [&mut strong_node, &mut weak_node], 40, 10);

    assert_eq!(strong_node.internal_address(strong), Some(0x28));
    assert_eq!(weak_node.claim_state(weak), Some(ClaimState::Failed));
    assert_eq!(weak_node.internal_address(weak), Some(NULL_ADDRESS));

    // A failed control function cannot send.
    let err = weak_node
        .send(0xFEF5, &[0u8; 8], weak, BROADCAST_ADDRESS, 6)
        .unwrap_err();
    assert_eq!(err, NetworkError::NotClaimed);
}

#[test]
fn partners_bind_to_the_peer_once_it_claims() {
    use isobus_core::protocol::management::name::{NameFilter, NameFilterField};
    use std::cell::Cell;
    use std::rc::Rc;

    let bus = VirtualBus::new();
    let mut observer = node(&bus);
    let mut peer = node(&bus);

    let partner = observer.create_partner(
        0,
        vec![NameFilter::new(NameFilterField::FunctionCode, 25)],
    );
    let found = Rc::new(Cell::new(NULL_ADDRESS));
    let inner = Rc::clone(&found);
    observer
        .registry_mut()
        .partner_mut(partner)
        .unwrap()
        .on_partner_found
        .subscribe(move |address| inner.set(*address));

    let peer_name = Name::builder()
        .identity_number(777)
        .function_code(25)
        .self_configurable(true)
        .build();
    let handle = peer.create_internal_cf(peer_name, 0, 0x85).unwrap();
    peer.start_address_claim(handle).unwrap();

    pump(&mut [&mut observer, &mut peer], 30, 10);

    assert_eq!(found.get(), 0x85);
    let bound = observer.registry().partner(partner).unwrap();
    assert_eq!(bound.cf.address, 0x85);
    assert_eq!(bound.cf.name, peer_name);
}
