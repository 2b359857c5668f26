//! End-to-end loopback wiring: manager, registered providers, augmenters.

use std::cell::RefCell;
use std::rc::Rc;

use glam::{DQuat, DVec3};

use poselink_core::topics;
use poselink_core::types::{FrameRef, PeerRole, SessionConfig};
use poselink_core::wire::SerializedPose;
use poselink_reality::{
    ForwardTarget, ProviderDescriptor, ProviderHandler, RealityError, SelectorConfig,
    SelectorEvent, SelectorState,
};
use poselink_runtime::{AugmenterRuntime, ManagerRuntime};
use poselink_session::{ConnectionState, MessageChannel, SessionPort, loopback_pair};
use poselink_sync::{FrameState, SyncConfig};

/// Records every provider-side port so the test can script frame states.
struct TestProvider {
    ports: Rc<RefCell<Vec<SessionPort>>>,
}

impl ProviderHandler for TestProvider {
    fn connect(
        &mut self,
        _descriptor: &ProviderDescriptor,
        endpoint: Box<dyn MessageChannel>,
    ) -> Result<(), RealityError> {
        let mut port = SessionPort::new();
        port.open(endpoint, SessionConfig::new(PeerRole::Viewer))?;
        self.ports.borrow_mut().push(port);
        Ok(())
    }
}

fn fixed_pose(x: f64) -> SerializedPose {
    SerializedPose::new(DVec3::new(x, 0.0, 0.0), DQuat::IDENTITY, FrameRef::Fixed)
}

fn publish(ports: &Rc<RefCell<Vec<SessionPort>>>, state: &FrameState) {
    let mut ports = ports.borrow_mut();
    if let Some(port) = ports.last_mut() {
        port.pump();
        if port.is_connected() {
            port.send(
                topics::REALITY_FRAME_STATE,
                serde_json::to_value(state).expect("serializable state"),
            );
        }
    }
}

fn pump_providers(ports: &Rc<RefCell<Vec<SessionPort>>>) {
    for port in ports.borrow_mut().iter_mut() {
        port.pump();
    }
}

#[test]
fn pose_flow_with_fan_out_isolation() {
    let ports: Rc<RefCell<Vec<SessionPort>>> = Rc::default();
    let mut manager = ManagerRuntime::new(
        SyncConfig::default(),
        SelectorConfig {
            default_provider: Some(ProviderDescriptor::new("test")),
            ..SelectorConfig::default()
        },
    );
    manager.register_provider(
        "test",
        Box::new(TestProvider {
            ports: Rc::clone(&ports),
        }),
    );

    let mut one = AugmenterRuntime::new(SyncConfig::default());
    let (near, far) = loopback_pair();
    manager.attach_peer(Box::new(far)).expect("attach one");
    one.connect(Box::new(near), SessionConfig::default())
        .expect("connect one");
    let _sub = one.subscribe("b");

    let mut two = AugmenterRuntime::new(SyncConfig::default());
    let (near, far) = loopback_pair();
    manager.attach_peer(Box::new(far)).expect("attach two");
    two.connect(Box::new(near), SessionConfig::default())
        .expect("connect two");

    manager.start().expect("start");

    for tick in 0..6u64 {
        let state = FrameState::new(tick, tick as f64)
            .with_entity("user", fixed_pose(0.5))
            .with_entity("a", fixed_pose(1.0))
            .with_entity("b", fixed_pose(2.0))
            .with_entity("c", fixed_pose(3.0));
        publish(&ports, &state);
        manager.tick().expect("manager tick");
        one.tick();
        two.tick();
    }

    let time = one.synchronizer().time();
    // Both replicas carry the primary set.
    assert!(
        one.graph()
            .resolve_position("user", time, &FrameRef::Fixed)
            .is_some()
    );
    assert!(
        two.graph()
            .resolve_position("user", time, &FrameRef::Fixed)
            .is_some()
    );

    // Subscriber one sees its extra entity; subscriber two never does.
    let b = one
        .graph()
        .resolve_position("b", time, &FrameRef::Fixed)
        .expect("subscribed entity");
    assert_eq!(b, DVec3::new(2.0, 0.0, 0.0));
    assert!(!two.graph().contains("b"));
    // Unsubscribed extras never leave the manager.
    assert!(!one.graph().contains("c"));
}

#[test]
fn provider_failover_is_gapless() {
    let first_ports: Rc<RefCell<Vec<SessionPort>>> = Rc::default();
    let second_ports: Rc<RefCell<Vec<SessionPort>>> = Rc::default();

    let mut manager = ManagerRuntime::new(SyncConfig::default(), SelectorConfig::default());
    manager.register_provider(
        "first",
        Box::new(TestProvider {
            ports: Rc::clone(&first_ports),
        }),
    );
    manager.register_provider(
        "second",
        Box::new(TestProvider {
            ports: Rc::clone(&second_ports),
        }),
    );

    manager
        .set_desired_provider(Some(ProviderDescriptor::new("first")))
        .expect("first desire");
    for _ in 0..4 {
        pump_providers(&first_ports);
        manager.tick().expect("tick");
    }
    assert_eq!(manager.selector_state(), SelectorState::Active);
    manager.drain_selector_events();

    manager
        .set_desired_provider(Some(ProviderDescriptor::new("second")))
        .expect("second desire");
    // Nothing has been pumped yet: the old provider must still be current.
    assert_eq!(manager.selector_state(), SelectorState::Active);
    assert!(first_ports.borrow()[0].is_connected());

    for _ in 0..4 {
        pump_providers(&first_ports);
        pump_providers(&second_ports);
        manager.tick().expect("tick");
    }

    let changes = manager
        .drain_selector_events()
        .into_iter()
        .filter(|e| matches!(e, SelectorEvent::ProviderChanged { .. }))
        .count();
    assert_eq!(changes, 1);
    assert_eq!(manager.selector_state(), SelectorState::Active);
    assert_eq!(
        first_ports.borrow()[0].state(),
        ConnectionState::Closed
    );
    assert!(second_ports.borrow()[0].is_connected());
}

#[test]
fn peer_declared_provider_drives_selection_and_routing() {
    let ports: Rc<RefCell<Vec<SessionPort>>> = Rc::default();
    let mut manager = ManagerRuntime::new(SyncConfig::default(), SelectorConfig::default());
    manager.register_provider(
        "alt",
        Box::new(TestProvider {
            ports: Rc::clone(&ports),
        }),
    );

    let mut augmenter = AugmenterRuntime::new(SyncConfig::default());
    let (near, far) = loopback_pair();
    let peer_id = manager.attach_peer(Box::new(far)).expect("attach");
    augmenter
        .connect(Box::new(near), SessionConfig::default())
        .expect("connect");

    let mut reply = augmenter.declare_desired_provider(Some(&ProviderDescriptor::new("alt")));
    for _ in 0..4 {
        pump_providers(&ports);
        manager.tick().expect("tick");
        augmenter.tick();
    }

    assert!(reply.try_take().expect("declared").is_ok());
    assert_eq!(manager.selector_state(), SelectorState::Active);
    // Side-channel traffic from this provider belongs to the declaring peer.
    assert_eq!(manager.forward_target(), ForwardTarget::Peer(peer_id));
}

#[test]
fn provider_side_channel_reaches_declaring_peer() {
    let ports: Rc<RefCell<Vec<SessionPort>>> = Rc::default();
    let mut manager = ManagerRuntime::new(SyncConfig::default(), SelectorConfig::default());
    manager.register_provider(
        "alt",
        Box::new(TestProvider {
            ports: Rc::clone(&ports),
        }),
    );

    let mut augmenter = AugmenterRuntime::new(SyncConfig::default());
    let (near, far) = loopback_pair();
    manager.attach_peer(Box::new(far)).expect("attach");
    augmenter
        .connect(Box::new(near), SessionConfig::default())
        .expect("connect");

    let seen: Rc<RefCell<Vec<serde_json::Value>>> = Rc::default();
    let sink = Rc::clone(&seen);
    augmenter.port_mut().on_notify("viewer.custom", move |payload| {
        sink.borrow_mut().push(payload.clone());
    });

    let _reply = augmenter.declare_desired_provider(Some(&ProviderDescriptor::new("alt")));
    for _ in 0..4 {
        pump_providers(&ports);
        manager.tick().expect("tick");
        augmenter.tick();
    }
    assert_eq!(manager.selector_state(), SelectorState::Active);

    // A topic the manager has no handler for is forwarded opaquely to the
    // peer that declared the provider, not dropped as a protocol error.
    {
        let mut ports = ports.borrow_mut();
        let port = ports.last_mut().expect("provider port");
        assert!(port.send("viewer.custom", serde_json::json!({"k": 1})));
    }
    for _ in 0..3 {
        pump_providers(&ports);
        manager.tick().expect("tick");
        augmenter.tick();
    }

    assert_eq!(seen.borrow().as_slice(), [serde_json::json!({"k": 1})]);
}

#[test]
fn peer_side_channel_reaches_declared_provider() {
    let ports: Rc<RefCell<Vec<SessionPort>>> = Rc::default();
    let mut manager = ManagerRuntime::new(SyncConfig::default(), SelectorConfig::default());
    manager.register_provider(
        "alt",
        Box::new(TestProvider {
            ports: Rc::clone(&ports),
        }),
    );

    let mut augmenter = AugmenterRuntime::new(SyncConfig::default());
    let (near, far) = loopback_pair();
    manager.attach_peer(Box::new(far)).expect("attach");
    augmenter
        .connect(Box::new(near), SessionConfig::default())
        .expect("connect");

    let _reply = augmenter.declare_desired_provider(Some(&ProviderDescriptor::new("alt")));
    for _ in 0..4 {
        pump_providers(&ports);
        manager.tick().expect("tick");
        augmenter.tick();
    }
    assert_eq!(manager.selector_state(), SelectorState::Active);

    let seen: Rc<RefCell<Vec<serde_json::Value>>> = Rc::default();
    {
        let mut ports = ports.borrow_mut();
        let sink = Rc::clone(&seen);
        ports
            .last_mut()
            .expect("provider port")
            .on_notify("viewer.adjust", move |payload| {
                sink.borrow_mut().push(payload.clone());
            });
    }

    assert!(
        augmenter
            .port_mut()
            .send("viewer.adjust", serde_json::json!({"scale": 2.0}))
    );
    for _ in 0..3 {
        manager.tick().expect("tick");
        pump_providers(&ports);
        augmenter.tick();
    }

    assert_eq!(seen.borrow().as_slice(), [serde_json::json!({"scale": 2.0})]);
}

#[test]
fn undeclared_provider_messages_land_in_manager_inbox() {
    let ports: Rc<RefCell<Vec<SessionPort>>> = Rc::default();
    let mut manager = ManagerRuntime::new(SyncConfig::default(), SelectorConfig::default());
    manager.register_provider(
        "alt",
        Box::new(TestProvider {
            ports: Rc::clone(&ports),
        }),
    );

    manager
        .set_desired_provider(Some(ProviderDescriptor::new("alt")))
        .expect("desire");
    for _ in 0..4 {
        pump_providers(&ports);
        manager.tick().expect("tick");
    }
    assert_eq!(manager.selector_state(), SelectorState::Active);
    assert_eq!(manager.forward_target(), ForwardTarget::Manager);

    {
        let mut ports = ports.borrow_mut();
        let port = ports.last_mut().expect("provider port");
        assert!(port.send("env.lighting", serde_json::json!({"lux": 40})));
    }
    for _ in 0..2 {
        pump_providers(&ports);
        manager.tick().expect("tick");
    }

    let inbox = manager.drain_provider_messages();
    assert_eq!(
        inbox,
        vec![("env.lighting".to_owned(), serde_json::json!({"lux": 40}))]
    );
}
